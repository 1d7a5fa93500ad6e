//! Mixing session: the shared PCM buffer and its cursor reconciliation
//!
//! **Responsibilities:**
//! - Own the circular PCM buffer for one (channels, sample rate) format
//! - Track every decoder's write cursor and every output's read cursor
//! - Keep the engine-wide frontiers at the slowest producer / consumer
//! - Sum overlapping decoder output into the buffer
//!
//! **Concurrency:**
//! Cursor bookkeeping lives behind one short-lived `parking_lot::Mutex`
//! (the `cursors` critical section). Sample data is never copied while it is
//! held. The PCM cells are atomics accessed with relaxed ordering; the mutex
//! hand-off of the cursors orders them, and the cursor discipline keeps
//! readers and writers on disjoint regions:
//!
//! ```text
//!        rd_ptr (slowest output)            wr_ptr (slowest decoder)
//!          |                                   |
//!   ...----[ readable by outputs              )[ decoders write up to rd_ptr - 1 )----...
//! ```
//!
//! A second mutex, the mixing gate, serializes buffer writes (mixing and the
//! vacuum fill). Task context waits for it; the output path only tries it.

use super::decoder::{DecoderId, DecoderList, DecoderSlot, DecoderState, PendingQueue};
use super::output::{OutputId, OutputSlot};
use super::ring::Ring;
use crate::codec::CodecRegistry;
use crate::error::{AudioStatus, Error, Result};
use amix_common::{Channels, MixParams, MixThresholds};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI16, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Cursor state guarded by the session's critical section
pub(super) struct Cursors {
    pub wr_ptr: u32,
    pub rd_ptr: u32,
    pub decoders: BTreeMap<DecoderId, DecoderSlot>,
    pub outputs: BTreeMap<OutputId, OutputSlot>,
}

impl Cursors {
    fn active(&self) -> impl Iterator<Item = &DecoderSlot> {
        self.decoders.values().filter(|d| d.list == DecoderList::Active)
    }

    /// Most advanced active decoder cursor, or the engine frontier if none
    pub fn fastest_wr(&self, ring: &Ring) -> u32 {
        let base = self.wr_ptr;
        self.active()
            .map(|d| d.wr_ptr)
            .max_by_key(|&wr| ring.distance(base, wr))
            .unwrap_or(base)
    }

    /// Advance the write frontier to the slowest active decoder
    pub fn update_wr_ptr(&mut self, ring: &Ring) {
        let base = self.wr_ptr;
        if let Some(step) = self.active().map(|d| ring.distance(base, d.wr_ptr)).min() {
            self.wr_ptr = ring.advance(base, step);
        }
    }

    /// Advance the read frontier to the slowest output
    ///
    /// Returns how far it moved. Quarantined decoders count down the samples
    /// still standing between the frontier and their last write.
    pub fn update_rd_ptr(&mut self, ring: &Ring) -> u32 {
        let base = self.rd_ptr;
        let step = match self.outputs.values().map(|o| ring.distance(base, o.rd_ptr)).min() {
            Some(step) => step,
            None => return 0,
        };
        if step == 0 {
            return 0;
        }
        self.rd_ptr = ring.advance(base, step);
        for slot in self.decoders.values_mut() {
            if slot.list == DecoderList::AwaitingConsume {
                slot.unconsumed = slot.unconsumed.saturating_sub(step);
            }
        }
        step
    }

    /// True while any decoder still contributes audio to the buffer
    pub fn has_live_decoders(&self) -> bool {
        self.decoders.values().any(|d| {
            matches!(d.list, DecoderList::Active | DecoderList::AwaitingConsume)
        })
    }
}

/// Point-in-time copy of every cursor, for diagnostics and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorSnapshot {
    pub capacity: u32,
    pub wr_ptr: u32,
    pub rd_ptr: u32,
    pub decoders: Vec<(DecoderId, u32, DecoderState)>,
    pub outputs: Vec<(OutputId, u32, u32)>,
}

/// One mixing session: fixed format, fixed capacity
pub struct MixSession {
    pub(super) ring: Ring,
    pub(super) channels: Channels,
    pub(super) sample_rate: u32,
    pub(super) thresholds: MixThresholds,
    pcm: Box<[AtomicI16]>,
    pub(super) cursors: Mutex<Cursors>,
    pub(super) mixing: Mutex<()>,
    pub(super) codecs: Arc<CodecRegistry>,
    next_id: AtomicU32,
    pub(super) closed: AtomicBool,
}

impl MixSession {
    /// Allocate a session for `channels` at `sample_rate`
    ///
    /// The read frontier starts `reserve` samples behind the write frontier so
    /// the first decoder has headroom before outputs catch up with it.
    pub fn new(
        params: &MixParams,
        channels: Channels,
        sample_rate: u32,
        codecs: Arc<CodecRegistry>,
    ) -> Result<Self> {
        let thresholds = params.thresholds(sample_rate)?;
        let ring = Ring::new(thresholds.capacity);

        let cells = thresholds.capacity as usize * channels.count();
        let pcm: Box<[AtomicI16]> = (0..cells).map(|_| AtomicI16::new(0)).collect();

        let cursors = Cursors {
            wr_ptr: 0,
            rd_ptr: ring.retreat(0, thresholds.reserve),
            decoders: BTreeMap::new(),
            outputs: BTreeMap::new(),
        };

        info!(
            "Mix session created: {} {} Hz, capacity {} samples, reserve {}",
            channels, sample_rate, thresholds.capacity, thresholds.reserve
        );

        Ok(Self {
            ring,
            channels,
            sample_rate,
            thresholds,
            pcm,
            cursors: Mutex::new(cursors),
            mixing: Mutex::new(()),
            codecs,
            next_id: AtomicU32::new(1),
            closed: AtomicBool::new(false),
        })
    }

    pub fn channels(&self) -> Channels {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn thresholds(&self) -> MixThresholds {
        self.thresholds
    }

    pub fn ring(&self) -> Ring {
        self.ring
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the session closed; later adds fail and reads return silence
    pub(super) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut cursors = self.cursors.lock();
        let decoders = cursors.decoders.len();
        let outputs = cursors.outputs.len();
        cursors.decoders.clear();
        cursors.outputs.clear();
        info!(
            "Mix session closed ({} decoders, {} outputs released)",
            decoders, outputs
        );
    }

    pub(super) fn ensure_open(&self, what: &str) -> Result<()> {
        if self.is_closed() {
            return Err(Error::NotAllowed(format!("{} on a destroyed mix session", what)));
        }
        Ok(())
    }

    pub(super) fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Copy every cursor
    pub fn snapshot(&self) -> CursorSnapshot {
        let cursors = self.cursors.lock();
        CursorSnapshot {
            capacity: self.ring.capacity(),
            wr_ptr: cursors.wr_ptr,
            rd_ptr: cursors.rd_ptr,
            decoders: cursors
                .decoders
                .iter()
                .map(|(id, d)| (*id, d.wr_ptr, d.state))
                .collect(),
            outputs: cursors
                .outputs
                .iter()
                .map(|(id, o)| (*id, o.rd_ptr, o.missed))
                .collect(),
        }
    }

    /// Flow-control verdict for a write cursor at `wr`
    pub(super) fn status_at(&self, wr: u32, rd: u32) -> AudioStatus {
        let space = self.ring.available_space(wr, rd);
        if space >= self.thresholds.request_data {
            AudioStatus::NeedMore
        } else if space < self.thresholds.almost_full {
            AudioStatus::OutputAlmostFull
        } else {
            AudioStatus::Ok
        }
    }

    /// Flow-control verdict at a decoder's cursor
    ///
    /// Unknown decoders report `OUTPUT_ALMOST_FULL` so callers stop feeding.
    pub fn pcm_buffer_status(&self, id: DecoderId) -> AudioStatus {
        let cursors = self.cursors.lock();
        match cursors.decoders.get(&id) {
            Some(slot) => self.status_at(slot.wr_ptr, cursors.rd_ptr),
            None => AudioStatus::OutputAlmostFull,
        }
    }

    // ---------------------------------------------------------------------
    // Decoder lifecycle
    // ---------------------------------------------------------------------

    /// Move a waiting decoder onto the active list
    ///
    /// The decoder joins at the most advanced active cursor. If that leaves
    /// less than `reserve` samples ahead of the read frontier, the gap is
    /// zero-filled and the decoder starts past it.
    pub fn decoder_start(&self, id: DecoderId) {
        let _gate = self.mixing.lock();

        let (join_at, vacuum) = {
            let cursors = self.cursors.lock();
            match cursors.decoders.get(&id) {
                Some(slot) if slot.list == DecoderList::Waiting => {}
                _ => return,
            }
            let fastest = cursors.fastest_wr(&self.ring);
            let headroom = self.ring.distance(cursors.rd_ptr, fastest);
            if headroom < self.thresholds.reserve {
                let target = self.ring.advance(cursors.rd_ptr, self.thresholds.reserve);
                (target, Some((fastest, self.ring.distance(fastest, target))))
            } else {
                (fastest, None)
            }
        };

        if let Some((from, len)) = vacuum {
            self.fill_zero(from, len);
            debug!("Decoder {} vacuum: zero-filled {} samples at {}", id, len, from);
        }

        let mut cursors = self.cursors.lock();
        if let Some(slot) = cursors.decoders.get_mut(&id) {
            if slot.list != DecoderList::Waiting {
                return;
            }
            slot.wr_ptr = join_at;
            slot.list = DecoderList::Active;
            slot.state = DecoderState::Decoding;
        }
        cursors.update_wr_ptr(&self.ring);
        debug!(
            "Decoder {} started at {} (engine wr {}, rd {})",
            id, join_at, cursors.wr_ptr, cursors.rd_ptr
        );
    }

    /// Take an active decoder off the active list
    ///
    /// Safe to call from the output path: only cursors are touched.
    pub fn decoder_stop(&self, id: DecoderId) {
        let mut cursors = self.cursors.lock();
        let stopped = match cursors.decoders.get_mut(&id) {
            Some(slot) if slot.list == DecoderList::Active => {
                slot.list = DecoderList::Waiting;
                slot.state = DecoderState::Idle;
                true
            }
            _ => false,
        };
        if stopped {
            cursors.update_wr_ptr(&self.ring);
            debug!("Decoder {} stopped (engine wr {})", id, cursors.wr_ptr);
        }
    }

    pub fn decoder_is_started(&self, id: DecoderId) -> bool {
        self.cursors
            .lock()
            .decoders
            .get(&id)
            .map_or(false, |slot| slot.list == DecoderList::Active)
    }

    pub fn decoder_state(&self, id: DecoderId) -> Option<DecoderState> {
        self.cursors.lock().decoders.get(&id).map(|slot| slot.state)
    }

    // ---------------------------------------------------------------------
    // Mixing
    // ---------------------------------------------------------------------

    /// Drain a decoder's pending chunks into the buffer (waits for the gate)
    pub(super) fn mix(&self, id: DecoderId, pending: &Mutex<PendingQueue>) {
        let _gate = self.mixing.lock();
        let mut queue = pending.lock();
        self.mix_locked(id, &mut queue);
    }

    /// Mix with the gate already held
    ///
    /// Samples between the decoder's cursor and the fastest active cursor were
    /// already written by someone else and are summed; samples beyond it are
    /// copied, up to one slot behind the read frontier.
    pub(super) fn mix_locked(&self, id: DecoderId, queue: &mut PendingQueue) {
        let ch = self.channels.count();

        let (mut wr, mut fastest, limit, base) = {
            let cursors = self.cursors.lock();
            let slot = match cursors.decoders.get(&id) {
                Some(slot) if slot.list == DecoderList::Active => slot,
                _ => return,
            };
            (
                slot.wr_ptr,
                cursors.fastest_wr(&self.ring),
                self.ring.write_limit(cursors.rd_ptr),
                cursors.wr_ptr,
            )
        };

        while let Some(chunk) = queue.front_mut() {
            let remaining = chunk.remaining(ch);
            let add = self.ring.distance(wr, fastest).min(remaining);
            let copy = (remaining - add).min(self.ring.distance(fastest, limit));
            let data = chunk.unread(ch);

            if add > 0 {
                self.write_frames(wr, &data[..add as usize * ch], true);
            }
            if copy > 0 {
                let span = add as usize * ch..(add + copy) as usize * ch;
                self.write_frames(fastest, &data[span], false);
            }

            let dealt = add + copy;
            chunk.consume(dealt);
            wr = self.ring.advance(wr, dealt);
            if self.ring.distance(base, wr) > self.ring.distance(base, fastest) {
                fastest = wr;
            }

            if let Some(slot) = self.cursors.lock().decoders.get_mut(&id) {
                slot.wr_ptr = wr;
            }

            if chunk.remaining(ch) == 0 {
                queue.pop_front();
            } else {
                trace!("Decoder {} blocked at {} (limit {})", id, wr, limit);
                break;
            }
        }

        let mut cursors = self.cursors.lock();
        cursors.update_wr_ptr(&self.ring);

        if queue.is_empty() {
            let rd = cursors.rd_ptr;
            let quarantined = match cursors.decoders.get_mut(&id) {
                Some(slot)
                    if slot.list == DecoderList::Active
                        && slot.state == DecoderState::InputOver =>
                {
                    slot.list = DecoderList::AwaitingConsume;
                    slot.state = DecoderState::PcmAllMixed;
                    slot.unconsumed = self.ring.distance(rd, slot.wr_ptr);
                    Some(slot.unconsumed)
                }
                _ => None,
            };
            if let Some(unconsumed) = quarantined {
                cursors.update_wr_ptr(&self.ring);
                debug!(
                    "Decoder {} all mixed, {} samples left to consume",
                    id, unconsumed
                );
            }
        }
    }

    // ---------------------------------------------------------------------
    // Sample access (never under the cursor lock)
    // ---------------------------------------------------------------------

    /// Write interleaved frames starting at `start`, summing or overwriting
    fn write_frames(&self, start: u32, data: &[i16], sum: bool) {
        let ch = self.channels.count();
        let frames = (data.len() / ch) as u32;
        let mut src = data;
        for (pos, len) in self.ring.segments(start, frames) {
            let (head, rest) = src.split_at(len * ch);
            let cells = &self.pcm[pos * ch..(pos + len) * ch];
            for (cell, &sample) in cells.iter().zip(head) {
                if sum {
                    let current = cell.load(Ordering::Relaxed);
                    cell.store(current.saturating_add(sample), Ordering::Relaxed);
                } else {
                    cell.store(sample, Ordering::Relaxed);
                }
            }
            src = rest;
        }
    }

    fn fill_zero(&self, start: u32, frames: u32) {
        let ch = self.channels.count();
        for (pos, len) in self.ring.segments(start, frames) {
            for cell in &self.pcm[pos * ch..(pos + len) * ch] {
                cell.store(0, Ordering::Relaxed);
            }
        }
    }

    /// Read `frames` frames from `start` into `dst` laid out as `out`
    pub(super) fn read_frames(&self, start: u32, frames: u32, dst: &mut [i16], out: Channels) {
        let ch = self.channels.count();
        let out_ch = out.count();
        let mut dst = dst;
        for (pos, len) in self.ring.segments(start, frames) {
            let (head, rest) = dst.split_at_mut(len * out_ch);
            let cells = &self.pcm[pos * ch..(pos + len) * ch];
            match (self.channels, out) {
                (Channels::Mono, Channels::Stereo) => {
                    for (pair, cell) in head.chunks_exact_mut(2).zip(cells) {
                        let sample = cell.load(Ordering::Relaxed);
                        pair[0] = sample;
                        pair[1] = sample;
                    }
                }
                (Channels::Stereo, Channels::Mono) => {
                    for (sample, frame) in head.iter_mut().zip(cells.chunks_exact(2)) {
                        *sample = frame[0].load(Ordering::Relaxed);
                    }
                }
                _ => {
                    for (sample, cell) in head.iter_mut().zip(cells) {
                        *sample = cell.load(Ordering::Relaxed);
                    }
                }
            }
            dst = rest;
        }
    }
}

impl fmt::Debug for MixSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cursors = self.cursors.lock();
        f.debug_struct("MixSession")
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("capacity", &self.ring.capacity())
            .field("wr_ptr", &cursors.wr_ptr)
            .field("rd_ptr", &cursors.rd_ptr)
            .field("decoders", &cursors.decoders.len())
            .field("outputs", &cursors.outputs.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
