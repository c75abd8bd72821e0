//! Simulated Rendering Backend
//!
//! In-process backend used by the integration tests and the demo binary.
//!
//! Features:
//! - Configurable device list, object formats and per-cycle quota
//! - Render-ready signals driven by [`SimulatedBackend::tick`]; ticks that are
//!   not consumed coalesce like an auto-reset event
//! - Capture of everything written to each speaker object
//! - A device clock that advances by the quota for every closed bracket while
//!   the session is started
//! - Failure injection for open, activation, buffer, clock and volume calls
//!
//! Object data is captured when its buffer is handed out for the next
//! bracket or when the object is released, so captures are complete once the
//! stream has been stopped.

use super::{
    BackendError, BackendResult, DeviceInfo, RawClock, RenderBackend, RenderObject,
    RenderSession, SessionParams, UpdateQuota,
};
use crate::channels::SpeakerPosition;
use crate::format::BackendFormat;
use crate::timing::{HostCounter, MonotonicCounter};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Device clock rate of the simulated endpoint
pub const SIM_CLOCK_FREQUENCY: u64 = 10_000_000;

/// Simulated device setup
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Listed output devices; the first one is the default
    pub devices: Vec<DeviceInfo>,
    /// Object formats, in preference order
    pub formats: Vec<BackendFormat>,
    /// Frames requested per render cycle
    pub quota_frames: usize,
    /// Stream volume channels
    pub volume_channels: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            devices: vec![DeviceInfo {
                id: "sim-0".to_string(),
                name: "Simulated Spatial Output".to_string(),
            }],
            formats: vec![BackendFormat::float_mono(48_000)],
            quota_frames: 480,
            volume_channels: 2,
        }
    }
}

/// Counters describing what the simulated device went through
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimStats {
    /// Sessions opened so far
    pub sessions_opened: u32,
    /// Successful start calls
    pub starts: u32,
    /// Successful stop calls
    pub stops: u32,
    /// Successful reset calls
    pub resets: u32,
    /// Closed update brackets
    pub updates: u64,
    /// Objects currently activated
    pub live_objects: usize,
    /// Session currently rendering
    pub started: bool,
    /// Frames consumed by the device clock since the last reset
    pub frames_played: u64,
    /// Last volume set on each stream channel
    pub volumes: Vec<f32>,
}

#[derive(Debug, Default)]
struct Failures {
    open: bool,
    activation: Option<SpeakerPosition>,
    buffer: HashMap<SpeakerPosition, u32>,
    clock: bool,
    volume_channel: Option<u32>,
}

#[derive(Debug)]
struct SimState {
    config: SimConfig,
    failures: Failures,
    stats: SimStats,
    sample_rate: u32,
    ready_tx: Option<Sender<()>>,
    session_live: bool,
    active: HashSet<SpeakerPosition>,
    captured: HashMap<SpeakerPosition, Vec<f32>>,
    generation: u64,
    bracket: u64,
    closed_bracket: u64,
    in_update: bool,
}

#[derive(Debug)]
struct SimShared {
    state: Mutex<SimState>,
    updated: Condvar,
}

/// In-process spatial rendering backend
#[derive(Clone)]
pub struct SimulatedBackend {
    shared: Arc<SimShared>,
    counter: Arc<dyn HostCounter>,
}

impl SimulatedBackend {
    /// Backend with one default device rendering 48 kHz float objects
    pub fn new() -> Self {
        Self::with_config(SimConfig::default())
    }

    /// Backend with a custom device setup
    pub fn with_config(config: SimConfig) -> Self {
        let volumes = vec![1.0; config.volume_channels as usize];
        let state = SimState {
            config,
            failures: Failures::default(),
            stats: SimStats {
                volumes,
                ..SimStats::default()
            },
            sample_rate: 0,
            ready_tx: None,
            session_live: false,
            active: HashSet::new(),
            captured: HashMap::new(),
            generation: 0,
            bracket: 0,
            closed_bracket: 0,
            in_update: false,
        };

        SimulatedBackend {
            shared: Arc::new(SimShared {
                state: Mutex::new(state),
                updated: Condvar::new(),
            }),
            counter: Arc::new(MonotonicCounter::new()),
        }
    }

    /// Replace the host counter
    pub fn with_counter(mut self, counter: Arc<dyn HostCounter>) -> Self {
        self.counter = counter;
        self
    }

    /// Signal render-ready once; coalesces with an unconsumed signal
    ///
    /// A stopped session is not signalled.
    pub fn tick(&self) {
        let state = self.shared.state.lock();
        if !state.stats.started {
            return;
        }
        if let Some(tx) = &state.ready_tx {
            let _ = tx.try_send(());
        }
    }

    /// Drop the render-ready source as if the device disappeared
    pub fn disconnect(&self) {
        self.shared.state.lock().ready_tx = None;
    }

    /// Block until at least `count` brackets have been closed
    ///
    /// Returns false when `timeout` passes first.
    pub fn wait_for_updates(&self, count: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.stats.updates < count {
            if self
                .shared
                .updated
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.stats.updates >= count;
            }
        }
        true
    }

    /// Tick and wait for the resulting bracket to close
    pub fn step(&self, timeout: Duration) -> bool {
        let target = self.stats().updates + 1;
        self.tick();
        self.wait_for_updates(target, timeout)
    }

    /// Current device counters
    pub fn stats(&self) -> SimStats {
        self.shared.state.lock().stats.clone()
    }

    /// Samples captured for a speaker position
    pub fn captured(&self, position: SpeakerPosition) -> Vec<f32> {
        self.shared
            .state
            .lock()
            .captured
            .get(&position)
            .cloned()
            .unwrap_or_default()
    }

    /// Forget every captured sample
    pub fn clear_captures(&self) {
        self.shared.state.lock().captured.clear();
    }

    /// Make `open_session` fail
    pub fn fail_open(&self, fail: bool) {
        self.shared.state.lock().failures.open = fail;
    }

    /// Make activation of one position fail
    pub fn fail_activation(&self, position: Option<SpeakerPosition>) {
        self.shared.state.lock().failures.activation = position;
    }

    /// Make the next `times` buffer acquisitions of a position fail
    pub fn fail_buffer(&self, position: SpeakerPosition, times: u32) {
        self.shared
            .state
            .lock()
            .failures
            .buffer
            .insert(position, times);
    }

    /// Make clock position queries fail
    pub fn fail_clock(&self, fail: bool) {
        self.shared.state.lock().failures.clock = fail;
    }

    /// Make setting the volume of one channel fail
    pub fn fail_volume_channel(&self, channel: Option<u32>) {
        self.shared.state.lock().failures.volume_channel = channel;
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimulatedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedBackend")
            .field("stats", &self.stats())
            .finish()
    }
}

impl RenderBackend for SimulatedBackend {
    fn devices(&self) -> Vec<DeviceInfo> {
        self.shared.state.lock().config.devices.clone()
    }

    fn default_device(&self) -> Option<String> {
        self.shared
            .state
            .lock()
            .config
            .devices
            .first()
            .map(|device| device.id.clone())
    }

    fn supported_formats(&self, device_id: &str) -> BackendResult<Vec<BackendFormat>> {
        let state = self.shared.state.lock();
        if !state.config.devices.iter().any(|d| d.id == device_id) {
            return Err(BackendError::new(
                BackendError::NOT_FOUND,
                format!("unknown device {device_id}"),
            ));
        }
        Ok(state.config.formats.clone())
    }

    fn open_session(
        &self,
        device_id: &str,
        params: &SessionParams,
    ) -> BackendResult<Box<dyn RenderSession>> {
        let mut state = self.shared.state.lock();

        if state.failures.open {
            return Err(BackendError::fail("session activation refused"));
        }
        if !state.config.devices.iter().any(|d| d.id == device_id) {
            return Err(BackendError::new(
                BackendError::NOT_FOUND,
                format!("unknown device {device_id}"),
            ));
        }
        if state.session_live {
            return Err(BackendError::fail("device already has an active session"));
        }

        let (ready_tx, ready_rx) = bounded(1);
        state.ready_tx = Some(ready_tx);
        state.session_live = true;
        state.sample_rate = params.format.sample_rate;
        state.stats.sessions_opened += 1;
        state.stats.frames_played = 0;
        state.generation += 1;

        Ok(Box::new(SimSession {
            shared: Arc::clone(&self.shared),
            counter: Arc::clone(&self.counter),
            ready: ready_rx,
            allowed: params.static_positions.iter().copied().collect(),
        }))
    }

    fn host_counter(&self) -> &dyn HostCounter {
        self.counter.as_ref()
    }
}

struct SimSession {
    shared: Arc<SimShared>,
    counter: Arc<dyn HostCounter>,
    ready: Receiver<()>,
    allowed: HashSet<SpeakerPosition>,
}

impl RenderSession for SimSession {
    fn ready(&self) -> Receiver<()> {
        self.ready.clone()
    }

    fn start(&mut self) -> BackendResult<()> {
        let mut state = self.shared.state.lock();
        if state.stats.started {
            return Err(BackendError::fail("stream already started"));
        }
        state.stats.started = true;
        state.stats.starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> BackendResult<()> {
        let mut state = self.shared.state.lock();
        state.stats.started = false;
        state.stats.stops += 1;
        Ok(())
    }

    fn reset(&mut self) -> BackendResult<()> {
        let mut state = self.shared.state.lock();
        if state.stats.started {
            return Err(BackendError::fail("reset while started"));
        }
        state.generation += 1;
        state.stats.frames_played = 0;
        state.stats.resets += 1;
        Ok(())
    }

    fn begin_update(&mut self) -> BackendResult<UpdateQuota> {
        let mut state = self.shared.state.lock();
        if state.in_update {
            return Err(BackendError::fail("update bracket already open"));
        }
        state.in_update = true;
        state.bracket += 1;
        Ok(UpdateQuota {
            frames: state.config.quota_frames,
            dynamic_objects: 0,
        })
    }

    fn end_update(&mut self) -> BackendResult<()> {
        let mut state = self.shared.state.lock();
        if !state.in_update {
            return Err(BackendError::fail("no update bracket open"));
        }
        state.in_update = false;
        state.closed_bracket = state.bracket;
        state.stats.updates += 1;
        if state.stats.started {
            state.stats.frames_played += state.config.quota_frames as u64;
        }
        drop(state);
        self.shared.updated.notify_all();
        Ok(())
    }

    fn activate_object(
        &mut self,
        position: SpeakerPosition,
    ) -> BackendResult<Box<dyn RenderObject>> {
        let mut state = self.shared.state.lock();

        if state.failures.activation == Some(position) {
            return Err(BackendError::fail(format!(
                "activation of {} refused",
                position.label()
            )));
        }
        if !self.allowed.contains(&position) {
            return Err(BackendError::fail(format!(
                "{} is not a static position of this session",
                position.label()
            )));
        }
        if !state.active.insert(position) {
            return Err(BackendError::fail(format!(
                "{} already active",
                position.label()
            )));
        }
        state.stats.live_objects = state.active.len();

        Ok(Box::new(SimObject {
            shared: Arc::clone(&self.shared),
            position,
            generation: state.generation,
            buffer: Vec::new(),
            pending: None,
        }))
    }

    fn clock_frequency(&self) -> BackendResult<u64> {
        Ok(SIM_CLOCK_FREQUENCY)
    }

    fn clock_position(&self) -> BackendResult<RawClock> {
        let state = self.shared.state.lock();
        if state.failures.clock {
            return Err(BackendError::fail("clock unavailable"));
        }
        let position = if state.sample_rate == 0 {
            0
        } else {
            (state.stats.frames_played as u128 * SIM_CLOCK_FREQUENCY as u128
                / state.sample_rate as u128) as u64
        };
        Ok(RawClock {
            position,
            host_counter: self.counter.now(),
        })
    }

    fn channel_count(&self) -> BackendResult<u32> {
        Ok(self.shared.state.lock().config.volume_channels)
    }

    fn set_channel_volume(&mut self, channel: u32, volume: f32) -> BackendResult<()> {
        let mut state = self.shared.state.lock();
        if state.failures.volume_channel == Some(channel) {
            return Err(BackendError::fail(format!("volume of channel {channel} refused")));
        }
        match state.stats.volumes.get_mut(channel as usize) {
            Some(slot) => {
                *slot = volume;
                Ok(())
            }
            None => Err(BackendError::fail(format!("no channel {channel}"))),
        }
    }
}

impl Drop for SimSession {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.session_live = false;
        state.ready_tx = None;
        state.in_update = false;
        state.stats.started = false;
    }
}

struct SimObject {
    shared: Arc<SimShared>,
    position: SpeakerPosition,
    generation: u64,
    buffer: Vec<f32>,
    pending: Option<u64>,
}

impl SimObject {
    /// Move the previous bracket's data into the capture once it was submitted
    fn commit(&mut self, state: &mut SimState) {
        if let Some(bracket) = self.pending {
            if bracket <= state.closed_bracket {
                state
                    .captured
                    .entry(self.position)
                    .or_default()
                    .extend_from_slice(&self.buffer);
                self.pending = None;
            }
        }
    }
}

impl RenderObject for SimObject {
    fn position(&self) -> SpeakerPosition {
        self.position
    }

    fn buffer(&mut self) -> BackendResult<&mut [f32]> {
        let shared = Arc::clone(&self.shared);
        let mut state = shared.state.lock();

        if state.generation != self.generation {
            return Err(BackendError::new(
                BackendError::INVALID_HANDLE,
                "object invalidated by reset",
            ));
        }
        if !state.in_update {
            return Err(BackendError::fail("no update bracket open"));
        }
        if let Some(remaining) = state.failures.buffer.get_mut(&self.position) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BackendError::fail("buffer temporarily unavailable"));
            }
        }

        let bracket = state.bracket;
        if self.pending != Some(bracket) {
            self.commit(&mut state);
            self.buffer.clear();
            self.buffer.resize(state.config.quota_frames, 0.0);
            self.pending = Some(bracket);
        }
        drop(state);

        Ok(self.buffer.as_mut_slice())
    }
}

impl Drop for SimObject {
    fn drop(&mut self) {
        let shared = Arc::clone(&self.shared);
        let mut state = shared.state.lock();
        self.commit(&mut state);
        state.active.remove(&self.position);
        state.stats.live_objects = state.active.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(sim: &SimulatedBackend) -> Box<dyn RenderSession> {
        let params = SessionParams::static_only(BackendFormat::float_mono(48_000));
        sim.open_session("sim-0", &params).unwrap()
    }

    #[test]
    fn test_ticks_coalesce() {
        let sim = SimulatedBackend::new();
        let mut session = open(&sim);
        let ready = session.ready();
        session.start().unwrap();
        sim.tick();
        sim.tick();
        assert!(ready.try_recv().is_ok());
        assert!(ready.try_recv().is_err());
    }

    #[test]
    fn test_stopped_session_not_signalled() {
        let sim = SimulatedBackend::new();
        let mut session = open(&sim);
        let ready = session.ready();

        sim.tick();
        assert!(ready.try_recv().is_err());

        session.start().unwrap();
        session.stop().unwrap();
        sim.tick();
        assert!(ready.try_recv().is_err());
    }

    #[test]
    fn test_capture_after_release() {
        let sim = SimulatedBackend::new();
        let mut session = open(&sim);
        let mut object = session.activate_object(SpeakerPosition::FrontLeft).unwrap();
        session.start().unwrap();

        session.begin_update().unwrap();
        object.buffer().unwrap()[0] = 0.5;
        session.end_update().unwrap();

        assert!(sim.captured(SpeakerPosition::FrontLeft).is_empty());
        drop(object);
        let captured = sim.captured(SpeakerPosition::FrontLeft);
        assert_eq!(captured.len(), 480);
        assert_eq!(captured[0], 0.5);
        assert_eq!(sim.stats().frames_played, 480);
        assert_eq!(sim.stats().live_objects, 0);
    }

    #[test]
    fn test_reset_invalidates_objects() {
        let sim = SimulatedBackend::new();
        let mut session = open(&sim);
        let mut object = session.activate_object(SpeakerPosition::FrontRight).unwrap();

        assert!(session.reset().is_ok());
        session.begin_update().unwrap();
        let err = object.buffer().unwrap_err();
        assert_eq!(err.code, BackendError::INVALID_HANDLE);
    }

    #[test]
    fn test_buffer_outside_bracket_fails() {
        let sim = SimulatedBackend::new();
        let mut session = open(&sim);
        let mut object = session.activate_object(SpeakerPosition::FrontCenter).unwrap();
        assert!(object.buffer().is_err());
    }

    #[test]
    fn test_duplicate_activation_rejected() {
        let sim = SimulatedBackend::new();
        let mut session = open(&sim);
        let _first = session.activate_object(SpeakerPosition::SideLeft).unwrap();
        assert!(session.activate_object(SpeakerPosition::SideLeft).is_err());
    }

    #[test]
    fn test_reset_requires_stop() {
        let sim = SimulatedBackend::new();
        let mut session = open(&sim);
        session.start().unwrap();
        assert!(session.reset().is_err());
        session.stop().unwrap();
        assert!(session.reset().is_ok());
    }

    #[test]
    fn test_clock_follows_played_frames() {
        let sim = SimulatedBackend::new();
        let mut session = open(&sim);
        session.start().unwrap();
        for _ in 0..100 {
            session.begin_update().unwrap();
            session.end_update().unwrap();
        }
        let clock = session.clock_position().unwrap();
        // 48 000 frames at 48 kHz is one second of device clock
        assert_eq!(clock.position, SIM_CLOCK_FREQUENCY);
    }

    #[test]
    fn test_single_session_per_device() {
        let sim = SimulatedBackend::new();
        let session = open(&sim);
        let params = SessionParams::static_only(BackendFormat::float_mono(48_000));
        assert!(sim.open_session("sim-0", &params).is_err());
        drop(session);
        assert!(sim.open_session("sim-0", &params).is_ok());
    }
}
