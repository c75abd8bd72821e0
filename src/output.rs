//! Spatial Output
//!
//! The producer-facing surface: format negotiation, stream start and stop,
//! block submission and the synchronous control operations.
//!
//! Control operations are single-flight. Each one sends its request and
//! blocks until the render worker has run the handler and sent the
//! completion.

use crate::backend::{DeviceInfo, RenderBackend};
use crate::channels::SpeakerPosition;
use crate::config::OutputConfig;
use crate::control::VolumeRequest;
use crate::format::{negotiate, AudioFormat, NegotiatedFormat, SampleFormat};
use crate::streaming::{AudioBlock, QueueCounters, RenderStats};
use crate::timing::estimate_delay;
use crate::worker::{Phase, RenderWorker, WorkerSettings, WorkerShared};
use crate::{Result, SpatialError};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Notifications for the host pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    /// An output device is available
    DeviceAdded(DeviceInfo),
    /// Stored volume changed
    VolumeChanged(f32),
    /// Mute flag changed
    MuteChanged(bool),
    /// Selected device changed (empty = backend default)
    DeviceChanged(String),
    /// The stream must be restarted for a change to take effect
    RestartRequested,
}

/// Spatial audio output driving one render worker at a time
pub struct SpatialOutput {
    backend: Arc<dyn RenderBackend>,
    config: OutputConfig,
    config_path: Option<PathBuf>,
    shared: WorkerShared,
    worker: Option<RenderWorker>,
    format: Option<NegotiatedFormat>,
    control_lock: Mutex<()>,
    events_tx: Sender<OutputEvent>,
    events_rx: Receiver<OutputEvent>,
}

impl SpatialOutput {
    /// Create an output over `backend`
    ///
    /// Reports the available devices and the initial volume, mute and device
    /// selection on the event channel.
    pub fn open(backend: Arc<dyn RenderBackend>, config: OutputConfig) -> Result<Self> {
        config.validate()?;
        let (events_tx, events_rx) = unbounded();

        let output = SpatialOutput {
            backend,
            config,
            config_path: None,
            shared: WorkerShared::default(),
            worker: None,
            format: None,
            control_lock: Mutex::new(()),
            events_tx,
            events_rx,
        };

        let devices = output.backend.devices();
        info!(devices = devices.len(), "spatial output opened");
        for device in devices {
            output.emit(OutputEvent::DeviceAdded(device));
        }
        output.emit(OutputEvent::VolumeChanged(output.config.volume));
        output.emit(OutputEvent::MuteChanged(output.config.mute));
        output.emit(OutputEvent::DeviceChanged(output.config.device_id.clone()));

        Ok(output)
    }

    /// Create an output from a JSON config file
    ///
    /// With `volume_save` set, volume and mute changes are written back to
    /// the same file.
    pub fn open_with_config_file(
        backend: Arc<dyn RenderBackend>,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let config = OutputConfig::load(path)?;
        let mut output = Self::open(backend, config)?;
        output.config_path = Some(path.to_path_buf());
        Ok(output)
    }

    /// Negotiate `format`, spawn the render worker and start rendering
    ///
    /// Returns the format the pipeline must deliver. The stored volume and
    /// mute are applied once the worker runs; a failure there is logged only.
    pub fn start(&mut self, format: AudioFormat) -> Result<AudioFormat> {
        if self.worker.is_some() {
            if self.shared.phase.get() != Phase::Terminated {
                return Err(SpatialError::AlreadyRunning);
            }
            // the previous stream ended on its own; collect it first
            self.stop()?;
        }

        if format.sample_format != SampleFormat::F32 {
            return Err(SpatialError::FormatRejected(format!(
                "{:?} input cannot be queued, blocks carry f32 samples",
                format.sample_format
            )));
        }

        let device_id = self.resolve_device()?;
        let supported = self.backend.supported_formats(&device_id).map_err(|err| {
            SpatialError::InitializationFailed(format!("query device formats: {err}"))
        })?;
        let negotiated = negotiate(&format, &supported)?;

        self.shared.queue.flush();
        *self.shared.stats.lock() = RenderStats::default();

        let settings = WorkerSettings {
            device_id: device_id.clone(),
            format: negotiated,
            wait_timeout: self.config.wait_timeout(),
            flush_wait: self.config.flush_wait,
            stop_wait: self.config.stop_wait,
        };
        let worker = RenderWorker::spawn(Arc::clone(&self.backend), settings, self.shared.clone())?;

        self.worker = Some(worker);
        self.format = Some(negotiated);
        info!(
            device = %device_id,
            sample_rate = negotiated.input.sample_rate,
            channels = negotiated.input.channel_count(),
            "spatial output started"
        );

        if let Err(err) = self.apply_volume() {
            warn!(error = %err, "initial volume could not be applied");
        }

        Ok(negotiated.input)
    }

    /// Stop the worker, join it and discard whatever is still queued
    pub fn stop(&mut self) -> Result<()> {
        let worker = self.worker.take().ok_or(SpatialError::NotRunning)?;
        self.format = None;

        let joined = worker.stop();
        let dropped = self.shared.queue.discard();
        info!(dropped_frames = dropped, "spatial output stopped");
        joined
    }

    /// Queue one block; never waits on the worker
    pub fn play(&self, block: AudioBlock) -> Result<()> {
        let format = self.format.ok_or(SpatialError::NotRunning)?;
        if self.shared.phase.get() == Phase::Terminated {
            return Err(SpatialError::WorkerGone);
        }
        if block.channels() != format.input.channel_count() {
            return Err(SpatialError::InvalidBlock(format!(
                "block has {} channels, stream has {}",
                block.channels(),
                format.input.channel_count()
            )));
        }
        self.shared.queue.push(block);
        Ok(())
    }

    /// Output delay in microseconds
    ///
    /// Time of everything handed over, minus what the device has consumed,
    /// minus the host time since the device clock was sampled. Negative when
    /// the device ran ahead.
    pub fn time_get(&self) -> Result<i64> {
        let format = self.format.ok_or(SpatialError::NotRunning)?;
        let worker = self.worker.as_ref().ok_or(SpatialError::NotRunning)?;

        let sample = {
            let _guard = self.control_lock.lock();
            worker.control().position.call(())??
        };

        let counters = self.shared.queue.counters();
        let counter = self.backend.host_counter();
        Ok(estimate_delay(
            counters.total_frames(),
            format.input.sample_rate,
            &sample,
            counter.now(),
            counter.frequency(),
        ))
    }

    /// Pause (`true`) or resume (`false`) rendering
    pub fn pause(&self, paused: bool) -> Result<()> {
        let worker = self.worker.as_ref().ok_or(SpatialError::NotRunning)?;
        let _guard = self.control_lock.lock();
        worker.control().pause.call(paused)?;
        debug!(paused, "pause applied");
        Ok(())
    }

    /// Flush the stream
    ///
    /// With `wait` the call sleeps for the current output delay and leaves the
    /// stream alone; it never fails, an unknown delay means no sleep. Without
    /// it queued audio is dropped, the session is reset and the channel
    /// objects are bound again.
    pub fn flush(&self, wait: bool) -> Result<()> {
        if wait {
            let delay = match self.time_get() {
                Ok(delay) => delay,
                Err(err) => {
                    debug!(error = %err, "delay unknown, flush returns at once");
                    0
                }
            };
            if delay > 0 {
                debug!(delay_us = delay, "waiting for queued audio to play out");
                std::thread::sleep(Duration::from_micros(delay as u64));
            }
            return Ok(());
        }

        let worker = self.worker.as_ref().ok_or(SpatialError::NotRunning)?;
        let _guard = self.control_lock.lock();
        worker.control().flush.call(())??;
        Ok(())
    }

    /// Store and apply a volume, clamped to 0.0..=1.0
    ///
    /// The value is kept and reported even when no stream runs; the call then
    /// returns [`SpatialError::NotRunning`].
    pub fn volume_set(&mut self, volume: f32) -> Result<()> {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        self.config.volume = volume;
        self.emit(OutputEvent::VolumeChanged(volume));
        self.persist_volume();
        self.apply_volume()
    }

    /// Store and apply the mute flag
    ///
    /// Like [`SpatialOutput::volume_set`] the flag is kept when no stream runs.
    pub fn mute_set(&mut self, mute: bool) -> Result<()> {
        self.config.mute = mute;
        self.emit(OutputEvent::MuteChanged(mute));
        self.persist_volume();
        self.apply_volume()
    }

    /// Select the output device used by the next start
    pub fn device_select(&mut self, device_id: impl Into<String>) -> Result<()> {
        let device_id = device_id.into();
        if !device_id.is_empty() && !self.backend.devices().iter().any(|d| d.id == device_id) {
            return Err(SpatialError::ConfigError(format!("unknown device {device_id}")));
        }

        info!(device = %device_id, "output device selected");
        self.config.device_id = device_id.clone();
        self.emit(OutputEvent::DeviceChanged(device_id));
        self.emit(OutputEvent::RestartRequested);
        Ok(())
    }

    /// Devices the backend currently lists
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.backend.devices()
    }

    /// Receiver of output events
    pub fn events(&self) -> Receiver<OutputEvent> {
        self.events_rx.clone()
    }

    /// Render statistics of the current (or last) stream
    pub fn stats(&self) -> RenderStats {
        *self.shared.stats.lock()
    }

    /// Queue counters
    pub fn counters(&self) -> QueueCounters {
        self.shared.queue.counters()
    }

    /// Render worker phase
    pub fn phase(&self) -> Phase {
        self.shared.phase.get()
    }

    /// Format the pipeline delivers while a stream runs
    pub fn format(&self) -> Option<AudioFormat> {
        self.format.map(|format| format.input)
    }

    /// Speaker positions bound by the running stream, in slot order
    pub fn positions(&self) -> Vec<SpeakerPosition> {
        self.worker
            .as_ref()
            .map(|worker| worker.info().positions.clone())
            .unwrap_or_default()
    }

    /// Stored volume
    pub fn volume(&self) -> f32 {
        self.config.volume
    }

    /// Stored mute flag
    pub fn is_muted(&self) -> bool {
        self.config.mute
    }

    /// Selected device (empty = backend default)
    pub fn device_id(&self) -> &str {
        &self.config.device_id
    }

    /// Current settings
    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// True while the worker renders
    pub fn is_running(&self) -> bool {
        self.worker.is_some() && self.shared.phase.get() == Phase::Running
    }

    fn resolve_device(&self) -> Result<String> {
        if !self.config.device_id.is_empty() {
            return Ok(self.config.device_id.clone());
        }
        self.backend
            .default_device()
            .ok_or_else(|| SpatialError::InitializationFailed("no output device".into()))
    }

    fn apply_volume(&self) -> Result<()> {
        let worker = self.worker.as_ref().ok_or(SpatialError::NotRunning)?;
        let request = VolumeRequest {
            volume: self.config.volume,
            mute: self.config.mute,
        };
        let _guard = self.control_lock.lock();
        worker.control().volume.call(request)??;
        Ok(())
    }

    fn persist_volume(&self) {
        if !self.config.volume_save {
            return;
        }
        if let Some(path) = &self.config_path {
            if let Err(err) = self.config.save(path) {
                warn!(error = %err, path = %path.display(), "volume could not be saved");
            }
        }
    }

    fn emit(&self, event: OutputEvent) {
        let _ = self.events_tx.send(event);
    }
}

impl Drop for SpatialOutput {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.stop();
        }
    }
}

impl std::fmt::Debug for SpatialOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialOutput")
            .field("config", &self.config)
            .field("phase", &self.phase())
            .field("format", &self.format)
            .finish()
    }
}
