//! Zone types, conditions and attributes.
//!
//! Wire values follow the ZBC zone descriptor encoding; the Zone Domains
//! additions (SOBR zones, the Inactive condition, gap zones) use the values
//! from the command-set family drafts.

pub mod list;
pub mod ops;

use serde::{Deserialize, Serialize};

/// Write-pointer sentinel for zones without a valid write pointer.
///
/// Never compare this arithmetically; test for equality only.
pub const NO_WP: u64 = u64::MAX;

/// Zone type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ZoneType {
    Conventional = 1,
    SeqWriteRequired = 2,
    SeqWritePreferred = 3,
    SeqOrBeforeRequired = 4,
    Gap = 5,
}

/// Capacity flavor of a zone type: CMR types live in the gain-scaled
/// conventional space, SMR types in the physical sequential space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Cmr,
    Smr,
}

impl ZoneType {
    pub fn wire(self) -> u8 {
        self as u8
    }

    pub fn from_wire(val: u8) -> Option<Self> {
        match val {
            1 => Some(Self::Conventional),
            2 => Some(Self::SeqWriteRequired),
            3 => Some(Self::SeqWritePreferred),
            4 => Some(Self::SeqOrBeforeRequired),
            5 => Some(Self::Gap),
            _ => None,
        }
    }

    /// Sequential-write types (not SOBR, not conventional).
    pub fn is_seq(self) -> bool {
        matches!(self, Self::SeqWriteRequired | Self::SeqWritePreferred)
    }

    /// Types that track a write pointer.
    pub fn has_wp(self) -> bool {
        matches!(
            self,
            Self::SeqWriteRequired | Self::SeqWritePreferred | Self::SeqOrBeforeRequired
        )
    }

    pub fn flavor(self) -> Option<Flavor> {
        match self {
            Self::Conventional | Self::SeqOrBeforeRequired => Some(Flavor::Cmr),
            Self::SeqWriteRequired | Self::SeqWritePreferred => Some(Flavor::Smr),
            Self::Gap => None,
        }
    }

    /// Bit in the realm `can-activate` flags and the supported-types byte.
    pub fn activation_bit(self) -> u8 {
        1 << (self.wire() - 1)
    }
}

/// Zone condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ZoneCond {
    NotWp = 0x0,
    Empty = 0x1,
    ImpOpen = 0x2,
    ExpOpen = 0x3,
    Closed = 0x4,
    Inactive = 0x5,
    ReadOnly = 0xD,
    Full = 0xE,
    Offline = 0xF,
}

impl ZoneCond {
    pub fn wire(self) -> u8 {
        self as u8
    }

    pub fn from_wire(val: u8) -> Option<Self> {
        match val {
            0x0 => Some(Self::NotWp),
            0x1 => Some(Self::Empty),
            0x2 => Some(Self::ImpOpen),
            0x3 => Some(Self::ExpOpen),
            0x4 => Some(Self::Closed),
            0x5 => Some(Self::Inactive),
            0xD => Some(Self::ReadOnly),
            0xE => Some(Self::Full),
            0xF => Some(Self::Offline),
            _ => None,
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, Self::ImpOpen | Self::ExpOpen)
    }

    /// Conditions that never sit in any zone list.
    pub fn is_unlisted(self) -> bool {
        matches!(
            self,
            Self::NotWp | Self::Inactive | Self::ReadOnly | Self::Offline
        )
    }

    /// Zones the data path may write to once (implicitly) opened.
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            Self::Empty | Self::ImpOpen | Self::ExpOpen | Self::Closed
        )
    }
}

/// Zone attribute flag bits stored in the zone record.
pub mod zflags {
    /// Zone has been written non-sequentially (seq-preferred only).
    pub const NON_SEQ: u8 = 0x01;
    /// A reset is recommended for this zone.
    pub const RESET: u8 = 0x02;
}
