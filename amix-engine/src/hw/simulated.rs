//! In-process hardware backend
//!
//! Each binding is driven by a timer thread that moves one FIFO half-depth
//! per period, the way a DMA half-transfer interrupt would. A manual backend
//! spawns no threads; tests step it with [`SimulatedBackend::tick`].
//!
//! Everything an output binding plays is copied into a bounded `ringbuf`
//! tap so tests (and the demo binary) can inspect the result.

use super::{CaptureRing, HardwareBackend, HardwareBinding, HwConfig, HwType, RequestCallback};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Capture waveform: `(frame index, channel) -> sample`
pub type CaptureSignal = Arc<dyn Fn(u64, usize) -> i16 + Send + Sync>;

/// Capture ring size in FIFO halves
const CAPTURE_HALVES: u32 = 8;

/// Played-sample tap size in FIFO halves
const TAP_HALVES: usize = 64;

type Tap = Arc<Mutex<HeapRb<i16>>>;

struct Stream {
    config: HwConfig,
    request: Option<RequestCallback>,
    capture: Option<Arc<CaptureRing>>,
    tap: Option<Tap>,
    signal: CaptureSignal,
    half_depth: usize,
    frames_captured: u64,
    scratch: Vec<i16>,
}

impl Stream {
    /// One FIFO half: capture first, then play
    fn run_period(&mut self) {
        let ch = self.config.channels.count();

        if let Some(capture) = &self.capture {
            self.scratch.clear();
            for i in 0..self.half_depth as u64 {
                for c in 0..ch {
                    self.scratch.push((self.signal)(self.frames_captured + i, c));
                }
            }
            self.frames_captured += self.half_depth as u64;
            capture.push(&self.scratch);
        }

        if let Some(request) = self.request.as_mut() {
            self.scratch.clear();
            self.scratch.resize(self.half_depth * ch, 0);
            request(&mut self.scratch[..], self.config.channels);
            if let Some(tap) = &self.tap {
                let mut tap = tap.lock();
                for &sample in &self.scratch {
                    tap.push_overwrite(sample);
                }
            }
        }
    }
}

pub struct SimulatedBackend {
    fifo_half_depth: u32,
    realtime: bool,
    signal: CaptureSignal,
    streams: Mutex<HashMap<HwType, Weak<Mutex<Stream>>>>,
    taps: Mutex<HashMap<HwType, Tap>>,
}

impl SimulatedBackend {
    /// Backend with timer threads running at the configured sample rate
    pub fn new(fifo_half_depth: u32) -> Self {
        Self::build(fifo_half_depth, true)
    }

    /// Backend without threads; call [`tick`](Self::tick) to advance
    pub fn manual(fifo_half_depth: u32) -> Self {
        Self::build(fifo_half_depth, false)
    }

    fn build(fifo_half_depth: u32, realtime: bool) -> Self {
        Self {
            fifo_half_depth: fifo_half_depth.max(1),
            realtime,
            signal: Arc::new(|frame: u64, _: usize| ((frame % 64) as i16 - 32) * 256),
            streams: Mutex::new(HashMap::new()),
            taps: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the waveform fed to input bindings
    pub fn with_capture_signal(mut self, signal: CaptureSignal) -> Self {
        self.signal = signal;
        self
    }

    pub fn fifo_half_depth(&self) -> u32 {
        self.fifo_half_depth
    }

    /// Run one period of the open binding for `hw_type`
    ///
    /// Returns false if nothing is bound to it.
    pub fn tick(&self, hw_type: HwType) -> bool {
        let stream = self.streams.lock().get(&hw_type).and_then(Weak::upgrade);
        match stream {
            Some(stream) => {
                stream.lock().run_period();
                true
            }
            None => false,
        }
    }

    /// Drain everything played on `hw_type` so far
    pub fn take_played(&self, hw_type: HwType) -> Vec<i16> {
        let tap = self.taps.lock().get(&hw_type).cloned();
        tap.map(|tap| tap.lock().pop_iter().collect()).unwrap_or_default()
    }

    /// Samples (interleaved values) waiting in the tap of `hw_type`
    pub fn played_len(&self, hw_type: HwType) -> usize {
        self.taps
            .lock()
            .get(&hw_type)
            .map_or(0, |tap| tap.lock().occupied_len())
    }
}

impl HardwareBackend for SimulatedBackend {
    fn open(&self, config: &HwConfig, request: Option<RequestCallback>) -> Result<Box<dyn HardwareBinding>> {
        if config.sample_rate == 0 {
            return Err(Error::Config(format!("{} needs a non-zero sample rate", config.hw_type)));
        }
        if config.direction.is_output() && request.is_none() {
            return Err(Error::Hardware(format!(
                "{} output binding needs a request callback",
                config.hw_type
            )));
        }

        let half_depth = self.fifo_half_depth as usize;
        let capture = config
            .direction
            .is_input()
            .then(|| Arc::new(CaptureRing::new(self.fifo_half_depth * CAPTURE_HALVES, config.channels)));

        let tap = if config.direction.is_output() {
            let tap: Tap = Arc::new(Mutex::new(HeapRb::new(
                half_depth * config.channels.count() * TAP_HALVES,
            )));
            self.taps.lock().insert(config.hw_type, Arc::clone(&tap));
            Some(tap)
        } else {
            None
        };

        let stream = Arc::new(Mutex::new(Stream {
            config: *config,
            request,
            capture: capture.clone(),
            tap,
            signal: Arc::clone(&self.signal),
            half_depth,
            frames_captured: 0,
            scratch: Vec::with_capacity(half_depth * config.channels.count()),
        }));
        self.streams
            .lock()
            .insert(config.hw_type, Arc::downgrade(&stream));

        let running = Arc::new(AtomicBool::new(true));
        let thread = if self.realtime {
            let period = Duration::from_micros(half_depth as u64 * 1_000_000 / config.sample_rate as u64);
            let stream = Arc::clone(&stream);
            let running = Arc::clone(&running);
            let handle = std::thread::Builder::new()
                .name(format!("amix-hw-{}", config.hw_type))
                .spawn(move || {
                    let mut next = Instant::now();
                    while running.load(Ordering::Acquire) {
                        stream.lock().run_period();
                        next += period;
                        match next.checked_duration_since(Instant::now()) {
                            Some(wait) => std::thread::sleep(wait),
                            None => next = Instant::now(),
                        }
                    }
                })
                .map_err(|e| Error::Hardware(format!("failed to spawn timer thread: {}", e)))?;
            Some(handle)
        } else {
            None
        };

        debug!(
            "Simulated {} binding: half depth {} samples, realtime {}",
            config.hw_type, half_depth, self.realtime
        );

        Ok(Box::new(SimulatedBinding {
            config: *config,
            stream,
            capture,
            running,
            thread,
        }))
    }
}

struct SimulatedBinding {
    config: HwConfig,
    stream: Arc<Mutex<Stream>>,
    capture: Option<Arc<CaptureRing>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl HardwareBinding for SimulatedBinding {
    fn config(&self) -> &HwConfig {
        &self.config
    }

    fn capture(&self) -> Option<Arc<CaptureRing>> {
        self.capture.clone()
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Timer thread for {} panicked", self.config.hw_type);
            }
        }
        // releases whatever the callback captured (mix session handles)
        self.stream.lock().request = None;
    }
}

impl Drop for SimulatedBinding {
    fn drop(&mut self) {
        self.stop();
    }
}
