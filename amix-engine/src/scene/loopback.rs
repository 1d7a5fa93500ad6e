//! Capture-to-playback loopback
//!
//! Captured PCM is copied into a small local delay ring on the orchestrator
//! task; the output interrupt plays from the same ring half a ring behind
//! the capture cursor. The mix engine is not involved.

use super::{Scene, SceneContext, SceneEvent};
use crate::error::{Error, Result};
use crate::hw::{CaptureOutputId, CaptureRing, HwConfig, HwDirection, HwHandle, RequestCallback};
use crate::mix::Ring;
use amix_common::Channels;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};

/// Local ring size in samples
const LOOP_RING_SAMPLES: u32 = 1024;

pub struct LoopbackParams {
    pub input: HwConfig,
    pub output: HwConfig,
}

/// Delay line shared between the task and the output interrupt
struct DelayRing {
    ring: Ring,
    channels: Channels,
    pcm: Vec<i16>,
    wr_ptr: u32,
    rd_ptr: u32,
}

impl DelayRing {
    fn new(channels: Channels) -> Self {
        let ring = Ring::new(LOOP_RING_SAMPLES);
        Self {
            ring,
            channels,
            pcm: vec![0; LOOP_RING_SAMPLES as usize * channels.count()],
            wr_ptr: 0,
            rd_ptr: ring.retreat(0, LOOP_RING_SAMPLES / 2),
        }
    }

    fn write(&mut self, samples: &[i16]) {
        let ch = self.channels.count();
        let frames = (samples.len() / ch) as u32;
        // only the newest ring's worth survives
        let skip = frames.saturating_sub(self.ring.capacity());
        self.wr_ptr = self.ring.advance(self.wr_ptr, skip);
        let frames = frames - skip;
        let mut src = &samples[skip as usize * ch..];
        for (pos, len) in self.ring.segments(self.wr_ptr, frames) {
            let (head, rest) = src.split_at(len * ch);
            self.pcm[pos * ch..(pos + len) * ch].copy_from_slice(head);
            src = rest;
        }
        self.wr_ptr = self.ring.advance(self.wr_ptr, frames);
    }

    fn play(&mut self, dst: &mut [i16], channels: Channels) {
        let ch = self.channels.count();
        let out_ch = channels.count();
        let frames = (dst.len() / out_ch) as u32;
        let mut out = &mut dst[..];
        for (pos, len) in self.ring.segments(self.rd_ptr, frames) {
            let (head, rest) = out.split_at_mut(len * out_ch);
            let src = &self.pcm[pos * ch..(pos + len) * ch];
            for (frame_out, frame_in) in head.chunks_exact_mut(out_ch).zip(src.chunks_exact(ch)) {
                for (i, sample) in frame_out.iter_mut().enumerate() {
                    *sample = frame_in[i.min(ch - 1)];
                }
            }
            out = rest;
        }
        // a request longer than the ring gets silence for the rest
        out.fill(0);
        self.rd_ptr = self.ring.advance(self.rd_ptr, frames);
    }
}

pub struct LoopbackScene {
    params: LoopbackParams,
    delay: Arc<Mutex<DelayRing>>,
    bindings: Vec<HwHandle>,
    capture: Option<(Arc<CaptureRing>, CaptureOutputId)>,
    scratch: Vec<i16>,
}

impl LoopbackScene {
    pub fn new(params: LoopbackParams) -> Self {
        let delay = DelayRing::new(params.input.channels);
        Self {
            params,
            delay: Arc::new(Mutex::new(delay)),
            bindings: Vec::new(),
            capture: None,
            scratch: Vec::new(),
        }
    }
}

impl Scene for LoopbackScene {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn init(&mut self, ctx: &SceneContext) -> Result<()> {
        let input = self.params.input;
        let output = self.params.output;

        let delay = Arc::clone(&self.delay);
        let request: RequestCallback = Box::new(move |buf: &mut [i16], channels: Channels| {
            delay.lock().play(buf, channels);
        });

        let capture = if input.hw_type == output.hw_type {
            debug!("Loopback on one {} binding", input.hw_type);
            let handle = ctx
                .hardware()
                .open(input.with_direction(HwDirection::InOut), Some(request))?;
            let capture = handle.capture();
            self.bindings.push(handle);
            capture
        } else {
            let handle = ctx.hardware().open(input.with_direction(HwDirection::In), None)?;
            let capture = handle.capture();
            self.bindings.push(handle);
            self.bindings.push(
                ctx.hardware()
                    .open(output.with_direction(HwDirection::Out), Some(request))?,
            );
            capture
        };

        let capture = capture.ok_or_else(|| Error::Hardware("input binding has no capture ring".to_string()))?;
        let events = ctx.events().clone();
        let scene = ctx.id();
        let reader = capture.capture_output_add(Some(Arc::new(move |samples: u32| {
            events.send_event(scene, SceneEvent::HwInNewSamples(samples));
        })));
        self.capture = Some((capture, reader));
        Ok(())
    }

    fn destroy(&mut self, _ctx: &SceneContext) {
        if let Some((capture, reader)) = self.capture.take() {
            capture.capture_output_remove(reader);
        }
        self.bindings.clear();
    }

    fn handle_event(&mut self, _ctx: &SceneContext, event: SceneEvent) -> Result<()> {
        let SceneEvent::HwInNewSamples(samples) = event else {
            return Ok(());
        };
        let Some((capture, reader)) = &self.capture else {
            return Ok(());
        };

        let ch = self.params.input.channels;
        self.scratch.resize(samples as usize * ch.count(), 0);
        let read = capture.read_pcm(*reader, &mut self.scratch, ch);
        self.delay.lock().write(&self.scratch[..read * ch.count()]);
        trace!("Loopback moved {} of {} samples", read, samples);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_lags_capture_by_half_a_ring() {
        let mut delay = DelayRing::new(Channels::Mono);
        delay.write(&[7; 512]);
        let mut dst = vec![1i16; 1024];
        delay.play(&mut dst, Channels::Mono);
        assert!(dst[..512].iter().all(|&s| s == 0));
        assert!(dst[512..].iter().all(|&s| s == 7));
    }

    #[test]
    fn test_request_longer_than_ring_is_zero_padded() {
        let mut delay = DelayRing::new(Channels::Mono);
        delay.write(&[3; 1024]);
        let mut dst = vec![-1i16; 1500];
        delay.play(&mut dst, Channels::Mono);
        assert!(dst[1024..].iter().all(|&s| s == 0));
        assert!(!dst.contains(&-1));
    }

    #[test]
    fn test_oversized_write_keeps_newest_frames() {
        let mut delay = DelayRing::new(Channels::Mono);
        let samples: Vec<i16> = (0..1200).collect();
        delay.write(&samples);
        assert_eq!(delay.wr_ptr, 1200 % 1024);

        let mut dst = vec![0i16; 1024];
        delay.play(&mut dst, Channels::Mono);
        // the oldest 176 frames were dropped
        assert_eq!(dst.iter().min(), Some(&176));
        assert_eq!(dst.iter().max(), Some(&1199));
    }

    #[test]
    fn test_mono_ring_feeds_stereo_output() {
        let mut delay = DelayRing::new(Channels::Mono);
        delay.write(&[5; 600]);
        let mut dst = vec![0i16; 1200];
        delay.play(&mut dst, Channels::Stereo);
        assert!(dst[1024..].iter().all(|&s| s == 5));
    }
}
