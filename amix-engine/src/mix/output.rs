//! Output readers and the PCM pull path
//!
//! `get_pcm` is called from hardware callbacks, so it never waits on the
//! mixing gate and never calls back into user code while the cursor lock is
//! held. Work is split into three short critical sections with the sample
//! copy and all callbacks in between.

use super::decoder::{DecoderEvent, DecoderEventHandler, DecoderId, DecoderList, DecoderState, PendingQueue};
use super::session::MixSession;
use crate::error::{AudioStatus, Result};
use amix_common::Channels;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Stable handle of an output reader within its session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(pub(super) u32);

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "out#{}", self.0)
    }
}

/// Session-side state of one reader
#[derive(Debug, Clone)]
pub(super) struct OutputSlot {
    pub rd_ptr: u32,
    /// Zero-fill on underrun instead of returning short
    pub immediate: bool,
    /// Samples zero-filled and not yet skipped over
    pub missed: u32,
    pub channels: Channels,
}

enum ReadPlan {
    Silence,
    UnknownOutput,
    Read { start: u32, valid: u32, immediate: bool },
}

impl MixSession {
    /// Register a reader starting at the engine read frontier
    pub fn output_add(&self, immediate: bool, channels: Channels) -> Result<OutputId> {
        self.ensure_open("output_add")?;
        let id = OutputId(self.next_id());
        let mut cursors = self.cursors.lock();
        let slot = OutputSlot {
            rd_ptr: cursors.rd_ptr,
            immediate,
            missed: 0,
            channels,
        };
        cursors.outputs.insert(id, slot);
        debug!(
            "Output {} added at {} ({}, immediate: {})",
            id, cursors.rd_ptr, channels, immediate
        );
        Ok(id)
    }

    /// Unregister a reader; the frontier may jump forward
    pub fn output_remove(&self, output: OutputId) {
        let removed = {
            let mut cursors = self.cursors.lock();
            let removed = cursors.outputs.remove(&output).is_some();
            if removed {
                cursors.update_rd_ptr(&self.ring);
            }
            removed
        };
        if removed {
            debug!("Output {} removed", output);
            self.service_decoders(true);
        }
    }

    /// Pull mixed PCM for `output` into `dst`, laid out as `channels`
    ///
    /// Returns the number of samples (frames) produced. Immediate outputs
    /// always get the full request, padded with silence that is skipped
    /// later; other outputs get only what is available, with the rest of
    /// `dst` zeroed.
    pub fn get_pcm(&self, output: OutputId, dst: &mut [i16], channels: Channels) -> usize {
        let out_ch = channels.count();
        let requested = (dst.len() / out_ch) as u32;
        if requested == 0 {
            return 0;
        }
        let dst = &mut dst[..requested as usize * out_ch];

        if self.is_closed() {
            dst.fill(0);
            return requested as usize;
        }

        let plan = {
            let mut cursors = self.cursors.lock();
            if !cursors.has_live_decoders() {
                ReadPlan::Silence
            } else {
                let wr = cursors.wr_ptr;
                match cursors.outputs.get_mut(&output) {
                    None => ReadPlan::UnknownOutput,
                    Some(out) => {
                        let mut available = self.ring.distance(out.rd_ptr, wr);
                        let skip = out.missed.min(available);
                        if skip > 0 {
                            out.rd_ptr = self.ring.advance(out.rd_ptr, skip);
                            out.missed -= skip;
                            available -= skip;
                        }
                        ReadPlan::Read {
                            start: out.rd_ptr,
                            valid: requested.min(available),
                            immediate: out.immediate,
                        }
                    }
                }
            }
        };

        let (start, valid, immediate) = match plan {
            ReadPlan::Silence => {
                dst.fill(0);
                return requested as usize;
            }
            ReadPlan::UnknownOutput => {
                trace!("get_pcm on unknown output {}", output);
                dst.fill(0);
                return requested as usize;
            }
            ReadPlan::Read {
                start,
                valid,
                immediate,
            } => (start, valid, immediate),
        };

        let (head, tail) = dst.split_at_mut(valid as usize * out_ch);
        self.read_frames(start, valid, head, channels);
        tail.fill(0);
        let shortfall = requested - valid;

        let advanced = {
            let mut cursors = self.cursors.lock();
            if let Some(out) = cursors.outputs.get_mut(&output) {
                out.rd_ptr = self.ring.advance(out.rd_ptr, valid);
                if immediate {
                    out.missed = out.missed.saturating_add(shortfall);
                }
            }
            cursors.update_rd_ptr(&self.ring)
        };

        if shortfall > 0 {
            trace!("Output {} short by {} samples", output, shortfall);
        }
        self.service_decoders(advanced > 0 || shortfall > 0);

        if immediate {
            requested as usize
        } else {
            valid as usize
        }
    }

    /// Request data, finish draining decoders, release consumed ones
    ///
    /// Runs in the caller's context with no lock held on entry; callbacks are
    /// invoked with no lock held either.
    fn service_decoders(&self, recheck: bool) {
        let mut requests: Vec<(DecoderId, DecoderEventHandler)> = Vec::new();
        let mut finishing: Vec<(DecoderId, Arc<Mutex<PendingQueue>>)> = Vec::new();

        if recheck {
            let cursors = self.cursors.lock();
            let rd = cursors.rd_ptr;
            for (id, slot) in &cursors.decoders {
                if slot.list != DecoderList::Active {
                    continue;
                }
                match slot.state {
                    DecoderState::Decoding
                        if self.status_at(slot.wr_ptr, rd) == AudioStatus::NeedMore =>
                    {
                        requests.push((*id, Arc::clone(&slot.on_event)));
                    }
                    DecoderState::InputOver => finishing.push((*id, Arc::clone(&slot.pending))),
                    _ => {}
                }
            }
        }

        for (id, on_event) in requests {
            on_event(id, DecoderEvent::ReqRawData);
        }

        for (id, pending) in finishing {
            let Some(_gate) = self.mixing.try_lock() else {
                trace!("Mixing busy, decoder {} drains later", id);
                continue;
            };
            if let Some(mut queue) = pending.try_lock() {
                self.mix_locked(id, &mut queue);
            }
        }

        let consumed: Vec<(DecoderId, DecoderEventHandler)> = {
            let mut cursors = self.cursors.lock();
            cursors
                .decoders
                .iter_mut()
                .filter(|(_, slot)| slot.list == DecoderList::AwaitingConsume && slot.unconsumed == 0)
                .map(|(id, slot)| {
                    slot.list = DecoderList::AwaitingRemoval;
                    slot.state = DecoderState::Idle;
                    (*id, Arc::clone(&slot.on_event))
                })
                .collect()
        };

        for (id, on_event) in consumed {
            trace!("Decoder {} fully consumed", id);
            on_event(id, DecoderEvent::PcmConsumed);
        }
    }

    /// Samples zero-filled for `output` and not yet skipped
    pub fn missed_samples(&self, output: OutputId) -> u32 {
        self.cursors
            .lock()
            .outputs
            .get(&output)
            .map_or(0, |out| out.missed)
    }

    pub fn clear_missed_samples(&self, output: OutputId) {
        if let Some(out) = self.cursors.lock().outputs.get_mut(&output) {
            out.missed = 0;
        }
    }

    /// Drop up to `samples` from the missed backlog
    pub fn forgive_missed_samples(&self, output: OutputId, samples: u32) {
        if let Some(out) = self.cursors.lock().outputs.get_mut(&output) {
            out.missed = out.missed.saturating_sub(samples);
        }
    }

    /// Channel layout an output was registered with
    pub fn output_channels(&self, output: OutputId) -> Option<Channels> {
        self.cursors.lock().outputs.get(&output).map(|out| out.channels)
    }
}
