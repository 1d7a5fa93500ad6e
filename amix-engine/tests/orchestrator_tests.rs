//! Scene orchestration on a manual-clock simulated backend
//!
//! The tokio test runtime is single threaded, so the orchestrator task only
//! runs while a test awaits; hardware periods run when the test ticks them.

mod helpers;

use amix_common::{AudioType, Channels};
use amix_engine::codec::DecoderConfig;
use amix_engine::hw::{HwConfig, HwType, SimulatedBackend};
use amix_engine::mix::DecoderState;
use amix_engine::scene::{
    EncodedFrame, LocalPlaybackParams, LocalPlaybackScene, LoopbackParams, LoopbackScene, MemorySource, Scene,
    SceneEvent, StreamSinkParams, StreamSinkScene, ToneGenerator, ToneParams, SINK_START_FRAMES,
};
use helpers::*;
use std::sync::Arc;
use std::time::Duration;

fn output_hw() -> HwConfig {
    HwConfig::output(HwType::I2s, RATE, Channels::Mono)
}

fn tone(duration_ms: u32, journal: Option<&Journal>) -> ToneParams {
    let journal = journal.cloned();
    ToneParams {
        source: Box::new(ToneGenerator::new(RATE, Channels::Mono, 1_000, duration_ms)),
        audio_type: AudioType::Pcm,
        decoder: DecoderConfig::new(RATE, Channels::Mono),
        hw: output_hw(),
        on_destroyed: journal.map(|journal| {
            Box::new(move || journal.lock().push("tone-hook".to_string())) as Box<dyn FnOnce() + Send>
        }),
    }
}

fn has(journal: &Journal, entry: &str) -> bool {
    journal.lock().iter().any(|e| e == entry)
}

#[tokio::test]
async fn test_scenario_e_create_tears_down_tone_then_main() {
    let (orchestrator, _backend) = orchestrator(64);
    let journal = journal();

    let a = orchestrator
        .create(|_| Ok(RecordingScene::new("a", &journal).with_session().boxed()))
        .await
        .unwrap();
    assert!(eventually(|| has(&journal, "create:a")).await);

    let t = orchestrator.tone_play(tone(50, Some(&journal))).await.unwrap().unwrap();
    assert_eq!(orchestrator.tone_scene(), Some(t));
    assert_eq!(orchestrator.main_scene(), Some(a));
    let engine = orchestrator.engine().clone();
    assert!(
        eventually(|| engine
            .session()
            .map_or(false, |session| session.snapshot().decoders.len() == 1))
        .await
    );

    let b = orchestrator
        .create(|_| Ok(RecordingScene::new("b", &journal).with_session().boxed()))
        .await
        .unwrap();
    assert!(eventually(|| has(&journal, "create:b")).await);

    // the tone's decoder was already gone when scene a was destroyed
    assert_eq!(
        *journal.lock(),
        vec!["create:a", "destroy:a decoders=0", "tone-hook", "create:b"]
    );
    assert_ne!(a, b);
    assert_eq!(orchestrator.main_scene(), Some(b));
    assert_eq!(orchestrator.tone_scene(), None);

    // the new scene starts with a free tone slot
    assert!(orchestrator.tone_play(tone(50, None)).await.unwrap().is_some());
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overlapping_creates_replace_each_other_in_turn() {
    let (orchestrator, _backend) = orchestrator(64);
    let journal = journal();

    // a slow allocation that finishes first, then a slower one started inside it
    let first = {
        let handle = orchestrator.handle();
        let journal = Arc::clone(&journal);
        tokio::spawn(async move {
            handle
                .create(move |_| {
                    std::thread::sleep(Duration::from_millis(50));
                    Ok(RecordingScene::new("a", &journal).boxed())
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let b = orchestrator
        .create(|_| {
            std::thread::sleep(Duration::from_millis(150));
            Ok(RecordingScene::new("b", &journal).boxed())
        })
        .await
        .unwrap();
    let a = first.await.unwrap().unwrap();

    assert!(eventually(|| has(&journal, "create:b")).await);
    assert_ne!(a, b);
    assert_eq!(orchestrator.main_scene(), Some(b));

    orchestrator.shutdown().await;
    assert_eq!(
        *journal.lock(),
        vec!["create:a", "destroy:a decoders=0", "create:b", "destroy:b decoders=0"]
    );
}

#[tokio::test]
async fn test_events_for_replaced_scene_are_dropped() {
    let (orchestrator, _backend) = orchestrator(64);
    let journal = journal();

    let a = orchestrator
        .create(|_| Ok(RecordingScene::new("a", &journal).boxed()))
        .await
        .unwrap();
    let b = orchestrator
        .create(|_| Ok(RecordingScene::new("b", &journal).boxed()))
        .await
        .unwrap();

    assert!(orchestrator.send_event(a, SceneEvent::HwInNewSamples(1)));
    assert!(orchestrator.send_event(b, SceneEvent::HwInNewSamples(1)));
    assert!(eventually(|| has(&journal, "event:b:samples")).await);
    assert!(!has(&journal, "event:a:samples"));

    // a destroy for the old scene is stale as well
    orchestrator.destroy(a).await.unwrap();
    assert!(orchestrator.recv_encoded_data(b, true, vec![1, 2]));
    assert!(eventually(|| has(&journal, "event:b:frame")).await);
    assert_eq!(orchestrator.main_scene(), Some(b));
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_events_are_handled_in_order() {
    let (orchestrator, _backend) = orchestrator(64);
    let journal = journal();
    let a = orchestrator
        .create(|_| Ok(RecordingScene::new("a", &journal).boxed()))
        .await
        .unwrap();

    let events = orchestrator.events();
    let sender = std::thread::spawn(move || {
        events.send_event(a, SceneEvent::HwInNewSamples(1));
        events.send_event(a, SceneEvent::RecvEncodedFrame(EncodedFrame::Lost));
        events.send_event(a, SceneEvent::HwInNewSamples(2));
    });
    sender.join().unwrap();

    assert!(eventually(|| journal.lock().len() == 4).await);
    assert_eq!(
        *journal.lock(),
        vec!["create:a", "event:a:samples", "event:a:frame", "event:a:samples"]
    );
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_request_destroy_from_outside_the_loop() {
    let (orchestrator, _backend) = orchestrator(64);
    let journal = journal();
    let a = orchestrator
        .create(|_| Ok(RecordingScene::new("a", &journal).boxed()))
        .await
        .unwrap();
    assert!(eventually(|| has(&journal, "create:a")).await);

    assert!(orchestrator.request_destroy(a));
    assert!(orchestrator.request_destroy(a));
    assert!(eventually(|| orchestrator.main_scene().is_none()).await);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let destroys = journal.lock().iter().filter(|e| e.starts_with("destroy:a")).count();
    assert_eq!(destroys, 1);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_tone_refused_by_scene_without_tone_support() {
    let (orchestrator, _backend) = orchestrator(64);
    let journal = journal();
    orchestrator
        .create(|_| Ok(RecordingScene::new("a", &journal).boxed()))
        .await
        .unwrap();

    assert!(orchestrator.tone_play(tone(50, None)).await.unwrap().is_none());
    assert_eq!(orchestrator.tone_scene(), None);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_tone_as_main_plays_out_and_destroys_itself() {
    let (orchestrator, backend) = orchestrator(64);
    let journal = journal();

    let t = orchestrator.tone_play(tone(20, Some(&journal))).await.unwrap().unwrap();
    assert_eq!(orchestrator.main_scene(), Some(t));
    assert_eq!(orchestrator.tone_scene(), Some(t));

    let engine = orchestrator.engine().clone();
    assert!(
        eventually(|| engine.session().map_or(false, |session| {
            session
                .snapshot()
                .decoders
                .first()
                .map_or(false, |(_, _, state)| *state == DecoderState::PcmAllMixed)
        }))
        .await
    );

    // 640 reserve + 320 tone samples, 64 per period
    for _ in 0..40 {
        if has(&journal, "tone-hook") {
            break;
        }
        backend.tick(HwType::I2s);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(eventually(|| has(&journal, "tone-hook")).await);
    assert_eq!(orchestrator.main_scene(), None);
    assert_eq!(orchestrator.tone_scene(), None);
    assert!(!orchestrator.engine().is_initialized());

    let played = backend.take_played(HwType::I2s);
    assert!(played.len() >= 960);
    assert!(played[..640].iter().all(|&s| s == 0));
    assert!(played[640..960].iter().any(|&s| s != 0));
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_non_immediate_tone_stop_lets_tone_finish() {
    let (orchestrator, _backend) = orchestrator(64);
    let t = orchestrator.tone_play(tone(20, None)).await.unwrap().unwrap();

    orchestrator.tone_stop(false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(orchestrator.tone_scene(), Some(t));

    orchestrator.tone_stop(true).await.unwrap();
    assert!(eventually(|| orchestrator.tone_scene().is_none()).await);
    assert_eq!(orchestrator.main_scene(), None);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_local_playback_reports_decoder_started() {
    let (orchestrator, backend) = orchestrator(64);

    let params = LocalPlaybackParams {
        source: Box::new(MemorySource::from_samples(&vec![100i16; 4_000])),
        audio_type: AudioType::Pcm,
        decoder: DecoderConfig::new(RATE, Channels::Mono),
        hw: output_hw(),
    };
    let id = orchestrator
        .create(|_| Ok(Box::new(LocalPlaybackScene::new(params)) as Box<dyn Scene>))
        .await
        .unwrap();
    assert!(eventually(|| orchestrator.decoder_started(id)).await);

    let engine = orchestrator.engine().clone();
    assert!(
        eventually(|| engine
            .session()
            .map_or(false, |session| session.snapshot().wr_ptr >= 320))
        .await
    );
    for _ in 0..10 {
        backend.tick(HwType::I2s);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let played = backend.take_played(HwType::I2s);
    assert_eq!(played.len(), 640);
    assert!(played.iter().all(|&s| s == 0));
    for _ in 0..5 {
        backend.tick(HwType::I2s);
    }
    let played = backend.take_played(HwType::I2s);
    assert!(played.iter().all(|&s| s == 100));

    let journal = journal();
    orchestrator
        .create(|_| Ok(RecordingScene::new("next", &journal).boxed()))
        .await
        .unwrap();
    assert!(!orchestrator.decoder_started(id));
    assert!(!backend.tick(HwType::I2s));
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_stream_sink_starts_after_buffering_and_takes_tone() {
    let (orchestrator, _backend) = orchestrator(64);
    let params = StreamSinkParams {
        audio_type: AudioType::Pcm,
        decoder: DecoderConfig::new(RATE, Channels::Mono),
        hw: output_hw(),
    };
    let sink = orchestrator
        .create(|_| Ok(Box::new(StreamSinkScene::new(params)) as Box<dyn Scene>))
        .await
        .unwrap();

    for _ in 0..SINK_START_FRAMES - 1 {
        orchestrator.recv_encoded_data(sink, true, pcm_bytes(160, 50));
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!orchestrator.decoder_started(sink));

    // a lost frame still counts toward the start threshold
    orchestrator.recv_encoded_data(sink, false, Vec::new());
    assert!(eventually(|| orchestrator.decoder_started(sink)).await);

    let t = orchestrator.tone_play(tone(50, None)).await.unwrap();
    assert!(t.is_some());
    assert!(orchestrator.tone_play(tone(50, None)).await.unwrap().is_none());

    orchestrator.tone_stop(true).await.unwrap();
    assert!(eventually(|| orchestrator.tone_scene().is_none()).await);
    assert_eq!(orchestrator.main_scene(), Some(sink));
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_loopback_replays_capture_half_a_ring_late() {
    let backend = SimulatedBackend::manual(64)
        .with_capture_signal(Arc::new(|frame: u64, _: usize| (frame % 100) as i16));
    let (orchestrator, backend) = orchestrator_with(backend);

    let params = LoopbackParams {
        input: HwConfig::input(HwType::Pdm, RATE, Channels::Mono),
        output: output_hw(),
    };
    orchestrator
        .create(|_| Ok(Box::new(LoopbackScene::new(params)) as Box<dyn Scene>))
        .await
        .unwrap();
    // the first successful tick is capture period one of eight
    assert!(eventually(|| backend.tick(HwType::Pdm)).await);

    for _ in 0..7 {
        backend.tick(HwType::Pdm);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    for _ in 0..16 {
        backend.tick(HwType::I2s);
    }
    let played = backend.take_played(HwType::I2s);
    assert_eq!(played.len(), 1024);
    assert!(played[..512].iter().all(|&s| s == 0));
    let expected: Vec<i16> = (0..512).map(|f| (f % 100) as i16).collect();
    assert_eq!(&played[512..], &expected[..]);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_destroys_current_scene_and_refuses_more() {
    let (orchestrator, _backend) = orchestrator(64);
    let journal = journal();
    orchestrator
        .create(|_| Ok(RecordingScene::new("a", &journal).with_session().boxed()))
        .await
        .unwrap();

    orchestrator.shutdown().await;
    assert!(has(&journal, "destroy:a decoders=0"));
    assert!(!orchestrator.engine().is_initialized());

    let err = orchestrator
        .create(|_| Ok(RecordingScene::new("b", &journal).boxed()))
        .await
        .err()
        .unwrap();
    assert_eq!(err.code(), -4);
}
