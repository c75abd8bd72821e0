//! Handlers run by the render worker for each wake reason

use super::RenderLoop;
use crate::backend::BackendResult;
use crate::channels::ChannelSlots;
use crate::control::VolumeRequest;
use crate::streaming::RenderOutcome;
use crate::timing::ClockSample;
use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, info, trace, warn};

impl RenderLoop {
    /// One render cycle
    ///
    /// Buffers are acquired before the queue lock is taken and the bracket is
    /// closed after it is released. Statistics are recorded before the
    /// bracket closes so they are current once the backend sees the update.
    pub(super) fn stream(&mut self) {
        let quota = match self.session.begin_update() {
            Ok(quota) => quota,
            Err(err) => {
                trace!(error = %err, "begin update failed, cycle skipped");
                self.shared.stats.lock().failed_updates += 1;
                return;
            }
        };

        let (mut buffers, skipped) = self.slots.acquire();
        let outcome = self
            .shared
            .queue
            .render(quota.frames, &mut buffers, &self.table);
        drop(buffers);

        match outcome {
            RenderOutcome::Delivered { .. } => {}
            RenderOutcome::Underrun { queued, requested } => {
                trace!(queued, requested, "underrun, rendering silence");
            }
            RenderOutcome::Partial {
                delivered,
                requested,
            } => {
                warn!(delivered, requested, "queued blocks ran out mid-cycle");
            }
        }
        if skipped > 0 {
            trace!(skipped, "channel buffers skipped this cycle");
        }

        self.shared.stats.lock().record(outcome, skipped);

        if let Err(err) = self.session.end_update() {
            debug!(error = %err, "end update failed");
        }
    }

    /// Sample the device clock
    pub(super) fn position(&self) -> BackendResult<ClockSample> {
        let raw = self.session.clock_position()?;
        Ok(ClockSample::new(
            raw.position,
            self.clock_frequency,
            raw.host_counter,
        ))
    }

    /// Stop or restart the session; failures are not surfaced
    pub(super) fn pause(&mut self, paused: bool) {
        let result = if paused {
            self.session.stop()
        } else {
            self.session.start()
        };
        if let Err(err) = result {
            debug!(paused, error = %err, "pause request failed");
        }
    }

    /// Hard flush: drop queued audio, reset the session and rebind the slots
    ///
    /// A rebinding failure leaves the session running without slots and is
    /// returned. A restart failure is returned when rebinding succeeded.
    pub(super) fn flush(&mut self) -> BackendResult<()> {
        self.shared.queue.flush();
        self.drain(self.settings.flush_wait);

        if let Err(err) = self.session.stop() {
            debug!(error = %err, "stop before flush reset failed");
        }
        if let Err(err) = self.session.reset() {
            debug!(error = %err, "flush reset failed");
        }

        self.slots.release();
        let rebind = match ChannelSlots::bind(&mut *self.session, self.format.channels()) {
            Ok(slots) => {
                self.slots = slots;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "rebinding channel objects after flush failed");
                Err(err)
            }
        };

        let restart = self.session.start();
        if let Err(err) = &restart {
            debug!(error = %err, "restart after flush failed");
        }

        info!(slots = self.slots.len(), "stream flushed");
        rebind.and(restart)
    }

    /// Apply volume to every stream channel, stopping at the first failure
    pub(super) fn volume(&mut self, request: VolumeRequest) -> BackendResult<()> {
        let volume = request.effective();
        let channels = self.session.channel_count()?;
        for channel in 0..channels {
            self.session.set_channel_volume(channel, volume)?;
        }
        debug!(volume, channels, "stream volume applied");
        Ok(())
    }

    /// Run `loops` acquire/release cycles without writing
    ///
    /// A loop that times out without render-ready opens no bracket.
    pub(super) fn drain(&mut self, loops: u32) {
        for _ in 0..loops {
            match self.ready.recv_timeout(self.settings.wait_timeout) {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }

            match self.session.begin_update() {
                Ok(_) => {
                    let _ = self.slots.acquire();
                    if let Err(err) = self.session.end_update() {
                        trace!(error = %err, "drain end update failed");
                    }
                }
                Err(err) => trace!(error = %err, "drain begin update failed"),
            }
        }
    }

    /// Drain, stop and reset the session, then release everything
    pub(super) fn shutdown(mut self) {
        self.drain(self.settings.stop_wait);

        if let Err(err) = self.session.stop() {
            debug!(error = %err, "session stop failed");
        }
        if let Err(err) = self.session.reset() {
            debug!(error = %err, "session reset failed");
        }

        self.slots.release();
        let counters = self.shared.queue.counters();
        info!(
            frames_written = counters.frames_written,
            queued_frames = counters.queued_frames,
            "render stream stopped"
        );
    }
}
