//! Channel Binding
//!
//! Maps the input stream's physical channels onto backend speaker positions.
//!
//! Two orderings are involved:
//! - Slot order: positions sorted by the backend's object type value. Slot `i`
//!   always carries the same speaker regardless of how the input interleaves.
//! - Input order: the order in which the media pipeline interleaves channels
//!   inside a block ([`PIPELINE_ORDER`]).
//!
//! The [`ReorderTable`] bridges the two.

pub mod slots;

pub use slots::{ChannelSlots, SlotBuffers};

use crate::format::ChannelMask;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// Maximum number of static channel objects
pub const MAX_SLOTS: usize = 8;

/// Interleave order of channels inside pipeline blocks
pub const PIPELINE_ORDER: [ChannelMask; MAX_SLOTS] = [
    ChannelMask::LEFT,
    ChannelMask::RIGHT,
    ChannelMask::SIDE_LEFT,
    ChannelMask::SIDE_RIGHT,
    ChannelMask::REAR_LEFT,
    ChannelMask::REAR_RIGHT,
    ChannelMask::CENTER,
    ChannelMask::LFE,
];

/// Static speaker position of a backend render object
///
/// Discriminants are the backend's object type values; their numeric order is
/// the slot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive)]
#[repr(u32)]
pub enum SpeakerPosition {
    /// Front left
    FrontLeft = 0x0002,
    /// Front right
    FrontRight = 0x0004,
    /// Front center
    FrontCenter = 0x0008,
    /// Low frequency
    LowFrequency = 0x0010,
    /// Side left
    SideLeft = 0x0020,
    /// Side right
    SideRight = 0x0040,
    /// Back left
    BackLeft = 0x0080,
    /// Back right
    BackRight = 0x0100,
}

/// Channel bit to speaker position, in canonical channel order
const CHANNEL_POSITIONS: [(ChannelMask, SpeakerPosition); MAX_SLOTS] = [
    (ChannelMask::LEFT, SpeakerPosition::FrontLeft),
    (ChannelMask::RIGHT, SpeakerPosition::FrontRight),
    (ChannelMask::CENTER, SpeakerPosition::FrontCenter),
    (ChannelMask::LFE, SpeakerPosition::LowFrequency),
    (ChannelMask::REAR_LEFT, SpeakerPosition::BackLeft),
    (ChannelMask::REAR_RIGHT, SpeakerPosition::BackRight),
    (ChannelMask::SIDE_LEFT, SpeakerPosition::SideLeft),
    (ChannelMask::SIDE_RIGHT, SpeakerPosition::SideRight),
];

impl SpeakerPosition {
    /// Every static position, in slot order
    pub const ALL: [SpeakerPosition; MAX_SLOTS] = [
        SpeakerPosition::FrontLeft,
        SpeakerPosition::FrontRight,
        SpeakerPosition::FrontCenter,
        SpeakerPosition::LowFrequency,
        SpeakerPosition::SideLeft,
        SpeakerPosition::SideRight,
        SpeakerPosition::BackLeft,
        SpeakerPosition::BackRight,
    ];

    /// Backend object type value
    pub fn object_type(self) -> u32 {
        self as u32
    }

    /// Look up a position by backend object type value
    pub fn from_object_type(value: u32) -> Option<Self> {
        Self::from_u32(value)
    }

    /// Input channel bit carried by this position
    pub fn channel(self) -> ChannelMask {
        CHANNEL_POSITIONS
            .iter()
            .find(|(_, position)| *position == self)
            .map(|(channel, _)| *channel)
            .unwrap_or(ChannelMask::empty())
    }

    /// Short label used in logs and the demo output
    pub fn label(self) -> &'static str {
        match self {
            SpeakerPosition::FrontLeft => "FL",
            SpeakerPosition::FrontRight => "FR",
            SpeakerPosition::FrontCenter => "FC",
            SpeakerPosition::LowFrequency => "LFE",
            SpeakerPosition::SideLeft => "SL",
            SpeakerPosition::SideRight => "SR",
            SpeakerPosition::BackLeft => "BL",
            SpeakerPosition::BackRight => "BR",
        }
    }
}

/// Speaker positions for a channel mask, sorted into slot order
pub fn positions_for(mask: ChannelMask) -> Vec<SpeakerPosition> {
    let mut positions: Vec<SpeakerPosition> = CHANNEL_POSITIONS
        .iter()
        .filter(|(channel, _)| mask.contains(*channel))
        .map(|(_, position)| *position)
        .collect();
    positions.sort();
    positions.truncate(MAX_SLOTS);
    positions
}

/// Output slot to input channel index mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReorderTable {
    table: [u8; MAX_SLOTS],
    len: usize,
}

impl ReorderTable {
    /// Build the table for an input channel mask
    ///
    /// `table[slot]` is the interleave index, within a pipeline frame, of the
    /// channel that slot `slot` renders.
    pub fn new(mask: ChannelMask) -> Self {
        let mut table = [0u8; MAX_SLOTS];
        let positions = positions_for(mask);

        for (slot, position) in positions.iter().enumerate() {
            let channel = position.channel();
            let index = PIPELINE_ORDER
                .iter()
                .take_while(|candidate| **candidate != channel)
                .filter(|candidate| mask.contains(**candidate))
                .count();
            table[slot] = index as u8;
        }

        ReorderTable {
            table,
            len: positions.len(),
        }
    }

    /// Number of mapped slots
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no slot is mapped
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Input channel index for a slot
    #[inline]
    pub fn source(&self, slot: usize) -> Option<usize> {
        if slot < self.len {
            Some(self.table[slot] as usize)
        } else {
            None
        }
    }

    /// Mapped entries
    pub fn as_slice(&self) -> &[u8] {
        &self.table[..self.len]
    }

    /// True when slot order and input order coincide
    pub fn is_identity(&self) -> bool {
        self.as_slice()
            .iter()
            .enumerate()
            .all(|(slot, source)| slot == *source as usize)
    }
}
