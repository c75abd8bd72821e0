//! Format negotiation between the pipeline and a rendering device

use super::{AudioFormat, BackendFormat, ChannelMask};
use crate::{Result, SpatialError};

/// Outcome of a successful negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    /// Format the pipeline must deliver (rate and channel set rewritten)
    pub input: AudioFormat,
    /// Object format the session is opened with
    pub output: BackendFormat,
}

/// Pick the device format and rewrite the input format to match it
///
/// The first device format with a recognised encoding wins. When its sample
/// encoding differs from the input the negotiation fails so that the host can
/// insert a converter and try again. The sample rate is taken from the device
/// and the channel set is limited to the renderable positions.
pub fn negotiate(input: &AudioFormat, supported: &[BackendFormat]) -> Result<NegotiatedFormat> {
    let (output, sample_format) = supported
        .iter()
        .find_map(|format| format.sample_format().map(|sf| (*format, sf)))
        .ok_or_else(|| {
            SpatialError::FormatRejected("device reports no usable object format".into())
        })?;

    if sample_format != input.sample_format {
        return Err(SpatialError::FormatRejected(format!(
            "input encoding {:?} differs from device encoding {:?}",
            input.sample_format, sample_format
        )));
    }

    let channels = input.channels.renderable();
    if channels.is_empty() {
        return Err(SpatialError::FormatRejected(format!(
            "no renderable channel in mask {:#06x}",
            input.channels.bits()
        )));
    }

    Ok(NegotiatedFormat {
        input: AudioFormat {
            sample_format,
            sample_rate: output.sample_rate,
            channels,
        },
        output,
    })
}

impl NegotiatedFormat {
    /// Renderable channel set of the stream
    pub fn channels(&self) -> ChannelMask {
        self.input.channels
    }
}
