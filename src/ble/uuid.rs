//! Bluetooth UUIDs.
//!
//! 16-bit UUIDs are aliases into the Bluetooth base UUID, so `0x2902` and
//! `00002902-0000-1000-8000-00805f9b34fb` compare equal.

use core::fmt;

/// Bluetooth base UUID `00000000-0000-1000-8000-00805F9B34FB`.
const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// A 16-bit SIG-assigned or 128-bit vendor UUID.
#[derive(Clone, Copy, Debug, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Uuid {
    Uuid16(u16),
    /// Little-endian (on-air) byte order.
    Uuid128([u8; 16]),
}

impl Uuid {
    pub const fn from_u16(v: u16) -> Self {
        Uuid::Uuid16(v)
    }

    /// Build from the big-endian textual value, e.g.
    /// `Uuid::from_u128(0x6BE9B8B7_BAA5_415D_A763_ABF7C595B4F0)`.
    pub const fn from_u128(v: u128) -> Self {
        Uuid::Uuid128(v.to_le_bytes())
    }

    /// Build from little-endian bytes as they appear in AD structures.
    pub const fn from_le_bytes(bytes: [u8; 16]) -> Self {
        Uuid::Uuid128(bytes)
    }

    /// Full 128-bit value.
    pub const fn as_u128(&self) -> u128 {
        match *self {
            Uuid::Uuid16(v) => BASE_UUID | ((v as u128) << 96),
            Uuid::Uuid128(bytes) => u128::from_le_bytes(bytes),
        }
    }

    /// Full 128-bit value in little-endian byte order.
    pub const fn to_le_bytes(&self) -> [u8; 16] {
        self.as_u128().to_le_bytes()
    }

    /// The 16-bit alias, if this UUID lives in the base range.
    pub const fn as_u16(&self) -> Option<u16> {
        match *self {
            Uuid::Uuid16(v) => Some(v),
            Uuid::Uuid128(bytes) => {
                let v = u128::from_le_bytes(bytes);
                let mask: u128 = !(0xFFFF_FFFFu128 << 96);
                if v & mask == BASE_UUID && (v >> 112) == 0 {
                    Some((v >> 96) as u16)
                } else {
                    None
                }
            }
        }
    }

    pub const fn is_16bit(&self) -> bool {
        matches!(self, Uuid::Uuid16(_))
    }
}

impl PartialEq for Uuid {
    fn eq(&self, other: &Self) -> bool {
        self.as_u128() == other.as_u128()
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uuid::Uuid16(v) => write!(f, "0x{:04x}", v),
            Uuid::Uuid128(_) => {
                let v = self.as_u128();
                write!(
                    f,
                    "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
                    (v >> 96) as u32,
                    (v >> 80) as u16,
                    (v >> 64) as u16,
                    (v >> 48) as u16,
                    v & 0xFFFF_FFFF_FFFF
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixteen_bit_matches_its_base_expansion() {
        let short = Uuid::from_u16(0x2902);
        let long = Uuid::from_u128(0x0000_2902_0000_1000_8000_0080_5F9B_34FB);
        assert_eq!(short, long);
        assert_eq!(long.as_u16(), Some(0x2902));
    }

    #[test]
    fn vendor_uuids_compare_by_value() {
        let a = Uuid::from_u128(0x6BE9B8B7_BAA5_415D_A763_ABF7C595B4F0);
        let b = Uuid::from_le_bytes(a.to_le_bytes());
        let c = Uuid::from_u128(0x5151CA1F_111F_491A_A476_983139F82848);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_u16(), None);
    }

    #[test]
    fn le_bytes_are_reversed_textual_order() {
        let uuid = Uuid::from_u128(0x6BE9B8B7_BAA5_415D_A763_ABF7C595B4F0);
        let bytes = uuid.to_le_bytes();
        assert_eq!(bytes[0], 0xF0);
        assert_eq!(bytes[15], 0x6B);
    }

    #[test]
    fn display_is_canonical() {
        let uuid = Uuid::from_u128(0x6BE9B8B7_BAA5_415D_A763_ABF7C595B4F0);
        assert_eq!(
            std::format!("{}", uuid),
            "6be9b8b7-baa5-415d-a763-abf7c595b4f0"
        );
        assert_eq!(std::format!("{}", Uuid::from_u16(0x180a)), "0x180a");
    }
}
