//! Hardware registry exclusivity and capture plumbing

use amix_common::Channels;
use amix_engine::hw::{HardwareBackend, HardwareRegistry, HwConfig, HwDirection, HwType, SimulatedBackend};
use amix_engine::Error;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

fn registry() -> (HardwareRegistry, Arc<SimulatedBackend>) {
    let backend = Arc::new(SimulatedBackend::manual(32));
    (
        HardwareRegistry::new(Arc::clone(&backend) as Arc<dyn HardwareBackend>),
        backend,
    )
}

fn silence() -> Option<amix_engine::hw::RequestCallback> {
    Some(Box::new(|buf: &mut [i16], _: Channels| buf.fill(0)))
}

#[test]
fn test_second_binding_of_same_type_rejected() {
    let (registry, _backend) = registry();
    let config = HwConfig::output(HwType::I2s, 16_000, Channels::Stereo);

    let first = registry.open(config, silence()).unwrap();
    assert!(registry.is_bound(HwType::I2s));

    let err = registry.open(config, silence()).err().unwrap();
    assert!(matches!(err, Error::Config(_)));

    // other types stay available
    let other = registry
        .open(HwConfig::output(HwType::Codec, 16_000, Channels::Mono), silence())
        .unwrap();
    assert_eq!(other.config().hw_type, HwType::Codec);
    drop(first);
}

#[test]
fn test_dropping_handle_frees_the_type() {
    let (registry, backend) = registry();
    let config = HwConfig::output(HwType::Spdif, 48_000, Channels::Stereo);

    let handle = registry.open(config, silence()).unwrap();
    assert!(backend.tick(HwType::Spdif));
    drop(handle);
    assert!(!registry.is_bound(HwType::Spdif));
    assert!(!backend.tick(HwType::Spdif));

    assert!(registry.open(config, silence()).is_ok());
}

#[test]
fn test_failed_open_does_not_leak_the_type() {
    let (registry, _backend) = registry();
    let config = HwConfig::output(HwType::PsdDac, 16_000, Channels::Mono);

    // outputs need a request callback
    assert!(registry.open(config, None).is_err());
    assert!(!registry.is_bound(HwType::PsdDac));
    assert!(registry.open(config, silence()).is_ok());
}

#[test]
fn test_in_out_binding_captures_and_plays() {
    let (registry, backend) = registry();
    let config = HwConfig::output(HwType::Codec, 16_000, Channels::Mono).with_direction(HwDirection::InOut);
    let handle = registry
        .open(config, Some(Box::new(|buf: &mut [i16], _: Channels| buf.fill(9))))
        .unwrap();

    let capture = handle.capture().unwrap();
    let notified = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&notified);
    let reader = capture.capture_output_add(Some(Arc::new(move |n: u32| {
        counter.fetch_add(n, Ordering::SeqCst);
    })));

    backend.tick(HwType::Codec);
    assert_eq!(notified.load(Ordering::SeqCst), 32);
    assert_eq!(capture.available(reader), 32);
    assert_eq!(backend.take_played(HwType::Codec), vec![9; 32]);

    // stereo read of a mono capture duplicates samples
    let mut dst = vec![0i16; 64];
    assert_eq!(capture.read_pcm(reader, &mut dst, Channels::Stereo), 32);
    assert!(dst.chunks_exact(2).all(|frame| frame[0] == frame[1]));
    assert_eq!(capture.available(reader), 0);
}
