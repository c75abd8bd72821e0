//! Control Channel
//!
//! Synchronous control requests from the producer to the render worker.
//!
//! Every operation has its own request channel and completion channel, both
//! with capacity one. The producer sends a request and blocks on the matching
//! completion; the worker observes the request in its multiplexed wait, runs
//! the handler and sends the completion before it waits again.
//!
//! Features:
//! - Typed request/completion pairs ([`Requester`] / [`Responder`])
//! - One biased wait over render-ready, stop and every control request
//! - A disconnected worker surfaces as [`SpatialError::WorkerGone`]

use crate::backend::BackendResult;
use crate::timing::ClockSample;
use crate::{Result, SpatialError};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::time::Duration;

/// Producer side of one control operation
#[derive(Debug)]
pub struct Requester<Q, R> {
    tx: Sender<Q>,
    done: Receiver<R>,
}

impl<Q, R> Requester<Q, R> {
    /// Send a request and block until its completion arrives
    pub fn call(&self, request: Q) -> Result<R> {
        self.tx.send(request).map_err(|_| SpatialError::WorkerGone)?;
        self.done.recv().map_err(|_| SpatialError::WorkerGone)
    }
}

/// Worker side of one control operation
#[derive(Debug)]
pub struct Responder<Q, R> {
    rx: Receiver<Q>,
    done: Sender<R>,
}

impl<Q, R> Responder<Q, R> {
    /// Send the completion for the request being handled
    ///
    /// A producer that went away is not an error for the worker.
    pub fn complete(&self, result: R) {
        let _ = self.done.send(result);
    }
}

/// Capacity-one request/completion pair
pub fn request_pair<Q, R>() -> (Requester<Q, R>, Responder<Q, R>) {
    let (tx, rx) = bounded(1);
    let (done_tx, done_rx) = bounded(1);
    (
        Requester { tx, done: done_rx },
        Responder { rx, done: done_tx },
    )
}

/// Volume request payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeRequest {
    /// Stored volume (0.0 to 1.0)
    pub volume: f32,
    /// Mute flag; when set the effective volume is zero
    pub mute: bool,
}

impl VolumeRequest {
    /// Volume actually applied to the backend channels
    pub fn effective(&self) -> f32 {
        if self.mute {
            0.0
        } else {
            self.volume
        }
    }
}

/// Why the worker woke up
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WakeReason {
    /// The backend asked for the next cycle
    RenderReady,
    /// Stop requested (or the producer is gone)
    Stop,
    /// Position query pending
    Position,
    /// Pause or resume pending
    Pause(bool),
    /// Flush pending
    Flush,
    /// Volume change pending
    Volume(VolumeRequest),
    /// Nothing happened within the wait timeout
    Idle,
    /// The render-ready source disconnected
    BackendLost,
}

/// Producer half of every control channel
#[derive(Debug)]
pub struct ProducerEnd {
    /// Device clock query
    pub position: Requester<(), BackendResult<ClockSample>>,
    /// Pause (`true`) or resume (`false`)
    pub pause: Requester<bool, ()>,
    /// Hard flush and rebind
    pub flush: Requester<(), BackendResult<()>>,
    /// Apply volume and mute
    pub volume: Requester<VolumeRequest, BackendResult<()>>,
    stop: Sender<()>,
}

impl ProducerEnd {
    /// Ask the worker to drain and terminate
    ///
    /// Stop has no completion; the caller joins the worker thread instead.
    pub fn request_stop(&self) {
        let _ = self.stop.try_send(());
    }
}

/// Worker half of every control channel
#[derive(Debug)]
pub struct WorkerEnd {
    /// Device clock query
    pub position: Responder<(), BackendResult<ClockSample>>,
    /// Pause or resume
    pub pause: Responder<bool, ()>,
    /// Hard flush and rebind
    pub flush: Responder<(), BackendResult<()>>,
    /// Apply volume and mute
    pub volume: Responder<VolumeRequest, BackendResult<()>>,
    stop: Receiver<()>,
}

/// Create every control channel of one worker
pub fn control_channels() -> (ProducerEnd, WorkerEnd) {
    let (position_req, position_resp) = request_pair();
    let (pause_req, pause_resp) = request_pair();
    let (flush_req, flush_resp) = request_pair();
    let (volume_req, volume_resp) = request_pair();
    let (stop_tx, stop_rx) = bounded(1);

    (
        ProducerEnd {
            position: position_req,
            pause: pause_req,
            flush: flush_req,
            volume: volume_req,
            stop: stop_tx,
        },
        WorkerEnd {
            position: position_resp,
            pause: pause_resp,
            flush: flush_resp,
            volume: volume_resp,
            stop: stop_rx,
        },
    )
}

impl WorkerEnd {
    /// Wait for the next wake condition
    ///
    /// Conditions are checked in a fixed priority: render-ready, stop,
    /// position, pause, flush, volume. A disconnected producer reads as stop.
    pub fn wait(&self, ready: &Receiver<()>, timeout: Duration) -> WakeReason {
        crossbeam_channel::select_biased! {
            recv(ready) -> msg => match msg {
                Ok(()) => WakeReason::RenderReady,
                Err(_) => WakeReason::BackendLost,
            },
            recv(self.stop) -> _ => WakeReason::Stop,
            recv(self.position.rx) -> msg => match msg {
                Ok(()) => WakeReason::Position,
                Err(_) => WakeReason::Stop,
            },
            recv(self.pause.rx) -> msg => match msg {
                Ok(paused) => WakeReason::Pause(paused),
                Err(_) => WakeReason::Stop,
            },
            recv(self.flush.rx) -> msg => match msg {
                Ok(()) => WakeReason::Flush,
                Err(_) => WakeReason::Stop,
            },
            recv(self.volume.rx) -> msg => match msg {
                Ok(request) => WakeReason::Volume(request),
                Err(_) => WakeReason::Stop,
            },
            default(timeout) => WakeReason::Idle,
        }
    }
}
