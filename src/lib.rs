//! Spatial Audio Output
//!
//! Streams multichannel audio from a media pipeline into a spatial rendering
//! backend that takes one mono object buffer per speaker position instead of
//! one interleaved buffer.
//!
//! # Features
//! - Dedicated render worker owning the backend session and its objects
//! - Per-cycle copy from queued interleaved blocks into per-speaker buffers
//!   with channel reordering
//! - Synchronous control operations (position, pause, flush, volume) over
//!   per-operation request/completion channels
//! - Integer delay estimation from device and host clocks
//! - Format negotiation against the device's object formats
//! - JSON configuration with optional volume persistence
//!
//! # Crate feature flags
//! - `sim` (default): In-process simulated backend (`backend::sim`)
//!
//! # Quick start
//! ```no_run
//! # #[cfg(feature = "sim")]
//! # {
//! use std::sync::Arc;
//! use spatial_sink::backend::sim::SimulatedBackend;
//! use spatial_sink::{AudioBlock, AudioFormat, ChannelMask, OutputConfig, SpatialOutput};
//!
//! let backend = SimulatedBackend::new();
//! let config = OutputConfig::default();
//! let mut output = SpatialOutput::open(Arc::new(backend.clone()), config).unwrap();
//! let format = output.start(AudioFormat::float(48_000, ChannelMask::STEREO)).unwrap();
//! let block = AudioBlock::silence(480, format.channel_count()).unwrap();
//! output.play(block).unwrap();
//! backend.tick();
//! output.stop().unwrap();
//! # }
//! ```

#![warn(missing_docs)]

pub mod backend; // Rendering Backend Interface
pub mod channels; // Channel Binding
pub mod config; // Output Configuration
pub mod control; // Control Channel
pub mod format; // Stream Formats
pub mod output; // Producer API
pub mod streaming; // Audio Blocks & Frame Queue
pub mod timing; // Delay Estimation
pub mod worker; // Render Worker

use backend::BackendError;

/// Error types for spatial output operations
#[derive(thiserror::Error, Debug)]
pub enum SpatialError {
    /// The render worker could not open, bind or start the session
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// A backend call behind a control operation failed
    #[error("Control operation failed: {0}")]
    ControlFailed(#[from] BackendError),

    /// The requested stream format cannot be rendered as is
    #[error("Format rejected: {0}")]
    FormatRejected(String),

    /// Malformed or mismatched audio block
    #[error("Invalid audio block: {0}")]
    InvalidBlock(String),

    /// No stream is running
    #[error("No stream is running")]
    NotRunning,

    /// A stream is already running
    #[error("A stream is already running")]
    AlreadyRunning,

    /// The render worker exited without answering
    #[error("Render worker is gone")]
    WorkerGone,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// IO error from filesystem or thread creation
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for spatial output operations
pub type Result<T> = std::result::Result<T, SpatialError>;

// Public API exports
pub use backend::{RenderBackend, RenderObject, RenderSession};
pub use channels::{ReorderTable, SpeakerPosition};
pub use config::OutputConfig;
pub use format::{AudioFormat, ChannelMask, SampleFormat};
pub use output::{OutputEvent, SpatialOutput};
pub use streaming::{AudioBlock, RenderStats};
pub use worker::Phase;
