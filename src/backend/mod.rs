//! Rendering Backend Interface
//!
//! The spatial rendering backend is an external collaborator. Only its
//! capabilities are described here:
//!
//! - [`RenderBackend`]: device level entry point, shared across threads
//! - [`RenderSession`]: one activated object render stream, owned by the
//!   render worker for its whole life
//! - [`RenderObject`]: one static speaker object bound to a session
//!
//! Handles are plain owned values. Dropping an object releases it; dropping a
//! session tears it down.

#[cfg(feature = "sim")]
pub mod sim;

use crate::channels::SpeakerPosition;
use crate::format::BackendFormat;
use crate::timing::HostCounter;
use crossbeam_channel::Receiver;

/// Failure reported by a backend call
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (code {code:#010x})")]
pub struct BackendError {
    /// Raw backend status code
    pub code: i32,
    /// What failed
    pub message: String,
}

impl BackendError {
    /// Generic failure code
    pub const FAIL: i32 = 0x8000_4005_u32 as i32;
    /// Object or session no longer valid
    pub const INVALID_HANDLE: i32 = 0x8007_0006_u32 as i32;
    /// Device or endpoint not found
    pub const NOT_FOUND: i32 = 0x8889_0004_u32 as i32;

    /// Create a backend error
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        BackendError {
            code,
            message: message.into(),
        }
    }

    /// Generic failure with a message
    pub fn fail(message: impl Into<String>) -> Self {
        Self::new(Self::FAIL, message)
    }
}

/// Result of a backend call
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Output device as listed by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Stable device identifier
    pub id: String,
    /// Human readable name
    pub name: String,
}

/// Parameters used to activate a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    /// Object format of every static object
    pub format: BackendFormat,
    /// Static speaker positions the session may activate
    pub static_positions: Vec<SpeakerPosition>,
    /// Dynamic objects are not used by this output
    pub max_dynamic_objects: u32,
}

impl SessionParams {
    /// Static-only session over every speaker position
    pub fn static_only(format: BackendFormat) -> Self {
        SessionParams {
            format,
            static_positions: SpeakerPosition::ALL.to_vec(),
            max_dynamic_objects: 0,
        }
    }
}

/// Result of opening an update bracket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateQuota {
    /// Frames every object buffer holds this cycle
    pub frames: usize,
    /// Newly available dynamic objects (ignored)
    pub dynamic_objects: u32,
}

/// Device clock position sampled together with the host counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawClock {
    /// Device position in clock ticks
    pub position: u64,
    /// Host counter value at the moment of sampling
    pub host_counter: u64,
}

/// Device level backend entry point
pub trait RenderBackend: Send + Sync {
    /// Active output devices
    fn devices(&self) -> Vec<DeviceInfo>;

    /// Identifier of the default output device
    fn default_device(&self) -> Option<String>;

    /// Object formats the device accepts, in preference order
    fn supported_formats(&self, device_id: &str) -> BackendResult<Vec<BackendFormat>>;

    /// Activate an object render session on a device
    fn open_session(
        &self,
        device_id: &str,
        params: &SessionParams,
    ) -> BackendResult<Box<dyn RenderSession>>;

    /// Host monotonic counter the session clock samples are expressed in
    fn host_counter(&self) -> &dyn HostCounter;
}

/// Activated object render stream
///
/// Every method is called from the render worker thread only.
pub trait RenderSession {
    /// Render-ready notifications
    ///
    /// One message per buffer period. Readiness that is not consumed before
    /// the next period may coalesce.
    fn ready(&self) -> Receiver<()>;

    /// Start rendering
    fn start(&mut self) -> BackendResult<()>;

    /// Stop rendering (keeps bound objects)
    fn stop(&mut self) -> BackendResult<()>;

    /// Discard pending data; invalidates every activated object
    fn reset(&mut self) -> BackendResult<()>;

    /// Open an update bracket
    fn begin_update(&mut self) -> BackendResult<UpdateQuota>;

    /// Close the current update bracket and submit the buffers
    fn end_update(&mut self) -> BackendResult<()>;

    /// Activate a static object for a speaker position
    fn activate_object(&mut self, position: SpeakerPosition)
        -> BackendResult<Box<dyn RenderObject>>;

    /// Device clock frequency in ticks per second
    fn clock_frequency(&self) -> BackendResult<u64>;

    /// Device clock position and host counter, sampled together
    fn clock_position(&self) -> BackendResult<RawClock>;

    /// Number of volume channels of the stream
    fn channel_count(&self) -> BackendResult<u32>;

    /// Set the volume of one stream channel
    fn set_channel_volume(&mut self, channel: u32, volume: f32) -> BackendResult<()>;
}

/// Static speaker object
pub trait RenderObject {
    /// Speaker position the object is bound to
    fn position(&self) -> SpeakerPosition;

    /// Write buffer for the current update bracket, zero filled
    fn buffer(&mut self) -> BackendResult<&mut [f32]>;
}
