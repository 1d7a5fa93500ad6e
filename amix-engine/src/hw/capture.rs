//! Per-hardware capture ring
//!
//! One writer (the input interrupt) and any number of readers, each with its
//! own cursor. A reader that falls more than a ring behind loses its oldest
//! samples rather than blocking the writer.

use super::NotifyCallback;
use crate::mix::Ring;
use amix_common::Channels;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI16, AtomicU32, Ordering};
use tracing::{debug, trace};

/// Reader handle on a [`CaptureRing`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CaptureOutputId(u32);

struct Reader {
    rd_ptr: u32,
    notify: Option<NotifyCallback>,
}

struct Cursors {
    wr_ptr: u32,
    readers: BTreeMap<CaptureOutputId, Reader>,
}

pub struct CaptureRing {
    ring: Ring,
    channels: Channels,
    pcm: Box<[AtomicI16]>,
    cursors: Mutex<Cursors>,
    next_id: AtomicU32,
}

impl CaptureRing {
    pub fn new(capacity: u32, channels: Channels) -> Self {
        let ring = Ring::new(capacity.max(2));
        let cells = ring.capacity() as usize * channels.count();
        Self {
            ring,
            channels,
            pcm: (0..cells).map(|_| AtomicI16::new(0)).collect(),
            cursors: Mutex::new(Cursors {
                wr_ptr: 0,
                readers: BTreeMap::new(),
            }),
            next_id: AtomicU32::new(1),
        }
    }

    pub fn channels(&self) -> Channels {
        self.channels
    }

    pub fn capacity(&self) -> u32 {
        self.ring.capacity()
    }

    /// Register a reader positioned at the current write cursor
    pub fn capture_output_add(&self, notify: Option<NotifyCallback>) -> CaptureOutputId {
        let id = CaptureOutputId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut cursors = self.cursors.lock();
        let rd_ptr = cursors.wr_ptr;
        cursors.readers.insert(id, Reader { rd_ptr, notify });
        debug!("Capture reader {:?} added at {}", id, rd_ptr);
        id
    }

    pub fn capture_output_remove(&self, output: CaptureOutputId) {
        self.cursors.lock().readers.remove(&output);
    }

    /// Samples waiting for `output`
    pub fn available(&self, output: CaptureOutputId) -> u32 {
        let cursors = self.cursors.lock();
        cursors
            .readers
            .get(&output)
            .map_or(0, |reader| self.ring.distance(reader.rd_ptr, cursors.wr_ptr))
    }

    /// Append interleaved frames from the input interrupt
    ///
    /// Readers are notified after the cursors are published.
    pub fn push(&self, samples: &[i16]) {
        let ch = self.channels.count();
        let max_frames = self.ring.capacity() - 1;
        let mut frames = (samples.len() / ch) as u32;
        let mut samples = &samples[..frames as usize * ch];
        if frames > max_frames {
            samples = &samples[(frames - max_frames) as usize * ch..];
            frames = max_frames;
        }
        if frames == 0 {
            return;
        }

        let start = self.cursors.lock().wr_ptr;
        let mut src = samples;
        for (pos, len) in self.ring.segments(start, frames) {
            let (head, rest) = src.split_at(len * ch);
            for (cell, &sample) in self.pcm[pos * ch..(pos + len) * ch].iter().zip(head) {
                cell.store(sample, Ordering::Relaxed);
            }
            src = rest;
        }

        let notify: Vec<NotifyCallback> = {
            let mut cursors = self.cursors.lock();
            let wr = cursors.wr_ptr;
            cursors.wr_ptr = self.ring.advance(wr, frames);
            for reader in cursors.readers.values_mut() {
                let space = self.ring.available_space(wr, reader.rd_ptr);
                if frames > space {
                    trace!("Capture reader overrun, dropping {} samples", frames - space);
                    reader.rd_ptr = self.ring.advance(reader.rd_ptr, frames - space);
                }
            }
            cursors
                .readers
                .values()
                .filter_map(|reader| reader.notify.clone())
                .collect()
        };

        for callback in notify {
            callback(frames);
        }
    }

    /// Read up to `dst.len() / channels` samples for `output`
    ///
    /// Returns the samples actually read; the rest of `dst` is untouched.
    pub fn read_pcm(&self, output: CaptureOutputId, dst: &mut [i16], channels: Channels) -> usize {
        let out_ch = channels.count();
        let requested = (dst.len() / out_ch) as u32;

        let (start, frames) = {
            let cursors = self.cursors.lock();
            match cursors.readers.get(&output) {
                Some(reader) => (
                    reader.rd_ptr,
                    requested.min(self.ring.distance(reader.rd_ptr, cursors.wr_ptr)),
                ),
                None => return 0,
            }
        };
        if frames == 0 {
            return 0;
        }

        let ch = self.channels.count();
        let mut dst = &mut dst[..frames as usize * out_ch];
        for (pos, len) in self.ring.segments(start, frames) {
            let (head, rest) = dst.split_at_mut(len * out_ch);
            let cells = &self.pcm[pos * ch..(pos + len) * ch];
            for (frame_out, frame_in) in head.chunks_exact_mut(out_ch).zip(cells.chunks_exact(ch)) {
                match (self.channels, channels) {
                    (Channels::Mono, Channels::Stereo) => {
                        let sample = frame_in[0].load(Ordering::Relaxed);
                        frame_out[0] = sample;
                        frame_out[1] = sample;
                    }
                    _ => {
                        for (out, cell) in frame_out.iter_mut().zip(frame_in) {
                            *out = cell.load(Ordering::Relaxed);
                        }
                    }
                }
            }
            dst = rest;
        }

        if let Some(reader) = self.cursors.lock().readers.get_mut(&output) {
            reader.rd_ptr = self.ring.advance(reader.rd_ptr, frames);
        }
        frames as usize
    }
}

impl fmt::Debug for CaptureRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cursors = self.cursors.lock();
        f.debug_struct("CaptureRing")
            .field("capacity", &self.ring.capacity())
            .field("channels", &self.channels)
            .field("wr_ptr", &cursors.wr_ptr)
            .field("readers", &cursors.readers.len())
            .finish()
    }
}
