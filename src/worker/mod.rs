//! Render Worker
//!
//! The dedicated thread that owns the backend session and its channel
//! objects for their whole life.
//!
//! Phases: `Uninitialized -> Initializing -> Running -> Draining -> Terminated`.
//! Initialization opens the session, reads the device clock frequency, binds
//! the channel slots and starts the session; any failure ends the thread
//! straight away and is reported to the spawning producer. While running the
//! worker sleeps in one biased wait over render-ready and the control
//! channels. Stop (or loss of the render-ready source) drains a few cycles,
//! stops and resets the session and releases everything.

mod handlers;

use crate::backend::{RenderBackend, RenderSession, SessionParams};
use crate::channels::{ChannelSlots, ReorderTable, SpeakerPosition};
use crate::control::{ProducerEnd, WakeReason, WorkerEnd};
use crate::format::NegotiatedFormat;
use crate::streaming::{FrameQueue, RenderStats};
use crate::{Result, SpatialError};
use crossbeam_channel::{bounded, Receiver, Sender};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};

/// Lifecycle phase of the render worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum Phase {
    /// Not spawned yet
    Uninitialized = 0,
    /// Opening and binding the session
    Initializing = 1,
    /// Rendering and answering control requests
    Running = 2,
    /// Stop requested, releasing the session
    Draining = 3,
    /// Thread finished
    Terminated = 4,
}

/// Phase shared between the worker and its observers
#[derive(Debug, Clone, Default)]
pub struct PhaseCell(Arc<AtomicU8>);

impl PhaseCell {
    /// Cell in the `Uninitialized` phase
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase
    pub fn get(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire)).unwrap_or(Phase::Terminated)
    }

    fn set(&self, phase: Phase) {
        debug!(?phase, "render worker phase");
        self.0.store(phase as u8, Ordering::Release);
    }
}

/// Timing knobs of one worker
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Resolved device identifier
    pub device_id: String,
    /// Negotiated stream format
    pub format: NegotiatedFormat,
    /// Upper bound of every wait
    pub wait_timeout: Duration,
    /// Drain cycles run by a hard flush
    pub flush_wait: u32,
    /// Drain cycles run at stop
    pub stop_wait: u32,
}

/// State the worker shares with the producer
#[derive(Debug, Clone, Default)]
pub struct WorkerShared {
    /// Queued audio and its counters
    pub queue: Arc<FrameQueue>,
    /// Cycle statistics
    pub stats: Arc<Mutex<RenderStats>>,
    /// Worker phase
    pub phase: PhaseCell,
}

/// What a successful initialization produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Bound speaker positions in slot order
    pub positions: Vec<SpeakerPosition>,
    /// Device clock ticks per second
    pub clock_frequency: u64,
}

/// Handle to a running render worker
#[derive(Debug)]
pub struct RenderWorker {
    control: ProducerEnd,
    join: Option<JoinHandle<()>>,
    info: StreamInfo,
}

impl RenderWorker {
    /// Spawn the worker and wait for its initialization outcome
    pub fn spawn(
        backend: Arc<dyn RenderBackend>,
        settings: WorkerSettings,
        shared: WorkerShared,
    ) -> Result<Self> {
        let (control, worker_end) = crate::control::control_channels();
        let (init_tx, init_rx) = bounded(1);

        let phase = shared.phase.clone();
        phase.set(Phase::Initializing);
        let join = match std::thread::Builder::new()
            .name("spatial-render".to_string())
            .spawn(move || run(backend, settings, shared, worker_end, init_tx))
        {
            Ok(join) => join,
            Err(err) => {
                phase.set(Phase::Terminated);
                return Err(err.into());
            }
        };

        match init_rx.recv() {
            Ok(Ok(info)) => Ok(RenderWorker {
                control,
                join: Some(join),
                info,
            }),
            Ok(Err(err)) => {
                let _ = join.join();
                Err(err)
            }
            Err(_) => {
                let _ = join.join();
                Err(SpatialError::WorkerGone)
            }
        }
    }

    /// Control channels of the worker
    pub fn control(&self) -> &ProducerEnd {
        &self.control
    }

    /// Initialization outcome
    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Request stop and join the thread
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        self.control.request_stop();
        join.join().map_err(|_| SpatialError::WorkerGone)
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Worker-local state of a running stream
struct RenderLoop {
    session: Box<dyn RenderSession>,
    slots: ChannelSlots,
    table: ReorderTable,
    format: NegotiatedFormat,
    clock_frequency: u64,
    ready: Receiver<()>,
    settings: WorkerSettings,
    shared: WorkerShared,
    control: WorkerEnd,
}

fn run(
    backend: Arc<dyn RenderBackend>,
    settings: WorkerSettings,
    shared: WorkerShared,
    control: WorkerEnd,
    init_tx: Sender<Result<StreamInfo>>,
) {
    let phase = shared.phase.clone();

    let mut render = match RenderLoop::initialize(backend.as_ref(), settings, shared, control) {
        Ok(render) => render,
        Err(err) => {
            error!(error = %err, "render worker initialization failed");
            phase.set(Phase::Terminated);
            let _ = init_tx.send(Err(err));
            return;
        }
    };

    let info = StreamInfo {
        positions: render.slots.positions(),
        clock_frequency: render.clock_frequency,
    };
    info!(
        device = %render.settings.device_id,
        channels = info.positions.len(),
        sample_rate = render.format.input.sample_rate,
        "render stream started"
    );

    phase.set(Phase::Running);
    let _ = init_tx.send(Ok(info));

    render.run();

    phase.set(Phase::Draining);
    render.shutdown();
    phase.set(Phase::Terminated);
}

impl RenderLoop {
    fn initialize(
        backend: &dyn RenderBackend,
        settings: WorkerSettings,
        shared: WorkerShared,
        control: WorkerEnd,
    ) -> Result<Self> {
        let format = settings.format;
        let init_failed = |what: &str, err: crate::backend::BackendError| {
            SpatialError::InitializationFailed(format!("{what}: {err}"))
        };

        let params = SessionParams::static_only(format.output);
        let mut session = backend
            .open_session(&settings.device_id, &params)
            .map_err(|err| init_failed("open session", err))?;

        let clock_frequency = session
            .clock_frequency()
            .map_err(|err| init_failed("clock frequency", err))?;

        let slots = ChannelSlots::bind(&mut *session, format.channels())
            .map_err(|err| init_failed("bind channel objects", err))?;

        session
            .start()
            .map_err(|err| init_failed("start session", err))?;

        let ready = session.ready();
        Ok(RenderLoop {
            session,
            slots,
            table: ReorderTable::new(format.channels()),
            format,
            clock_frequency,
            ready,
            settings,
            shared,
            control,
        })
    }

    fn run(&mut self) {
        loop {
            match self.control.wait(&self.ready, self.settings.wait_timeout) {
                WakeReason::RenderReady => self.stream(),
                WakeReason::Stop => {
                    debug!("stop requested");
                    break;
                }
                WakeReason::Position => {
                    let result = self.position();
                    self.control.position.complete(result);
                }
                WakeReason::Pause(paused) => {
                    self.pause(paused);
                    self.control.pause.complete(());
                }
                WakeReason::Flush => {
                    let result = self.flush();
                    self.control.flush.complete(result);
                }
                WakeReason::Volume(request) => {
                    let result = self.volume(request);
                    self.control.volume.complete(result);
                }
                WakeReason::Idle => {}
                WakeReason::BackendLost => {
                    error!("render-ready source lost, stopping stream");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_cell() {
        let cell = PhaseCell::new();
        assert_eq!(cell.get(), Phase::Uninitialized);
        let observer = cell.clone();
        cell.set(Phase::Running);
        assert_eq!(observer.get(), Phase::Running);
    }

    #[test]
    fn test_phase_round_trip() {
        for phase in [
            Phase::Uninitialized,
            Phase::Initializing,
            Phase::Running,
            Phase::Draining,
            Phase::Terminated,
        ] {
            assert_eq!(Phase::from_u8(phase as u8), Some(phase));
        }
        assert_eq!(Phase::from_u8(9), None);
    }
}
