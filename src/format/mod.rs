//! Stream Formats
//!
//! Channel masks, sample encodings and the negotiation between the media
//! pipeline's input format and the formats a rendering device accepts.
//!
//! Features:
//! - Physical channel mask (`ChannelMask`) with the eight renderable positions
//! - Backend wave format description and its mapping to sample formats
//! - Format negotiation that rewrites the input rate and channel set

pub mod negotiate;

pub use negotiate::{negotiate, NegotiatedFormat};

use bitflags::bitflags;

bitflags! {
    /// Physical channel positions present in an input stream
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChannelMask: u16 {
        /// Front left
        const LEFT = 0x0001;
        /// Front right
        const RIGHT = 0x0002;
        /// Front center
        const CENTER = 0x0004;
        /// Low frequency effects
        const LFE = 0x0008;
        /// Rear (back) left
        const REAR_LEFT = 0x0010;
        /// Rear (back) right
        const REAR_RIGHT = 0x0020;
        /// Side (middle) left
        const SIDE_LEFT = 0x0040;
        /// Side (middle) right
        const SIDE_RIGHT = 0x0080;
        /// Rear center (not renderable as a static object)
        const REAR_CENTER = 0x0100;

        /// 1.0
        const MONO = Self::CENTER.bits();
        /// 2.0
        const STEREO = Self::LEFT.bits() | Self::RIGHT.bits();
        /// 5.1 with rear surrounds
        const SURROUND_5_1 = Self::STEREO.bits()
            | Self::CENTER.bits()
            | Self::LFE.bits()
            | Self::REAR_LEFT.bits()
            | Self::REAR_RIGHT.bits();
        /// 7.1, every renderable position
        const SURROUND_7_1 = Self::SURROUND_5_1.bits()
            | Self::SIDE_LEFT.bits()
            | Self::SIDE_RIGHT.bits();
    }
}

impl ChannelMask {
    /// Number of channels in the mask
    pub fn channel_count(&self) -> usize {
        self.bits().count_ones() as usize
    }

    /// The subset that can be bound to static render objects
    pub fn renderable(&self) -> Self {
        *self & ChannelMask::SURROUND_7_1
    }

    /// Parse a layout name such as `stereo`, `5.1` or `7.1`
    pub fn from_layout_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "mono" | "1.0" => Some(ChannelMask::MONO),
            "stereo" | "2.0" => Some(ChannelMask::STEREO),
            "5.1" => Some(ChannelMask::SURROUND_5_1),
            "7.1" => Some(ChannelMask::SURROUND_7_1),
            _ => None,
        }
    }
}

/// Sample encodings understood by the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// 32-bit IEEE float
    F32,
    /// 16-bit signed integer, native endian
    S16,
    /// 24-bit signed integer, native endian
    S24,
    /// 32-bit signed integer, native endian
    S32,
}

impl SampleFormat {
    /// Size of one sample in bytes
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::F32 | SampleFormat::S32 => 4,
            SampleFormat::S24 => 3,
            SampleFormat::S16 => 2,
        }
    }
}

/// Wave format tag reported by a rendering device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatTag {
    /// Integer PCM
    Pcm,
    /// IEEE floating point
    IeeeFloat,
    /// Any other tag value, carried through verbatim
    Other(u16),
}

/// Object format accepted by a rendering device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendFormat {
    /// Encoding family
    pub tag: FormatTag,
    /// Bits per sample
    pub bits_per_sample: u16,
    /// Frames per second
    pub sample_rate: u32,
    /// Channels per object (1 for static speaker objects)
    pub channels: u16,
}

impl BackendFormat {
    /// Mono 32-bit float object format, the common spatial object format
    pub fn float_mono(sample_rate: u32) -> Self {
        BackendFormat {
            tag: FormatTag::IeeeFloat,
            bits_per_sample: 32,
            sample_rate,
            channels: 1,
        }
    }

    /// Map the device format onto a pipeline sample format
    ///
    /// Returns `None` for encodings the pipeline cannot deliver.
    pub fn sample_format(&self) -> Option<SampleFormat> {
        match (self.tag, self.bits_per_sample) {
            (FormatTag::IeeeFloat, _) => Some(SampleFormat::F32),
            (FormatTag::Pcm, 16) => Some(SampleFormat::S16),
            (FormatTag::Pcm, 24) => Some(SampleFormat::S24),
            (FormatTag::Pcm, 32) => Some(SampleFormat::S32),
            _ => None,
        }
    }
}

/// Format of the stream delivered by the media pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample encoding
    pub sample_format: SampleFormat,
    /// Frames per second
    pub sample_rate: u32,
    /// Physical channels, interleaved in pipeline order
    pub channels: ChannelMask,
}

impl AudioFormat {
    /// Float stream with the given rate and layout
    pub fn float(sample_rate: u32, channels: ChannelMask) -> Self {
        AudioFormat {
            sample_format: SampleFormat::F32,
            sample_rate,
            channels,
        }
    }

    /// Number of interleaved channels
    pub fn channel_count(&self) -> usize {
        self.channels.channel_count()
    }

    /// Size of one interleaved frame in bytes
    pub fn bytes_per_frame(&self) -> usize {
        self.sample_format.bytes_per_sample() * self.channel_count()
    }
}
