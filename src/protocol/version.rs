//! Protocol version numbers and feature gates

use std::fmt;

/// Client protocol version, keyed by the number sent in the handshake.
///
/// Discriminants are the wire version numbers, which increase monotonically
/// with release order, so derived ordering is release ordering. Every feature
/// gate in the codec is a comparison against one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum ProtocolVersion {
    V1_7_2 = 4,
    V1_7_6 = 5,
    V1_8 = 47,
    V1_9 = 107,
    V1_9_1 = 108,
    V1_9_2 = 109,
    V1_9_4 = 110,
    V1_10 = 210,
    V1_11 = 315,
    V1_11_1 = 316,
    V1_12 = 335,
    V1_12_1 = 338,
    V1_12_2 = 340,
    V1_13 = 393,
    V1_13_1 = 401,
    V1_13_2 = 404,
    V1_14 = 477,
    V1_14_1 = 480,
    V1_14_2 = 485,
    V1_14_3 = 490,
    V1_14_4 = 498,
    V1_15 = 573,
    V1_15_1 = 575,
    V1_15_2 = 578,
    V1_16 = 735,
    V1_16_1 = 736,
    V1_16_2 = 751,
    V1_16_3 = 753,
    /// Also 1.16.5.
    V1_16_4 = 754,
    V1_17 = 755,
    V1_17_1 = 756,
    /// Also 1.18.1.
    V1_18 = 757,
    V1_18_2 = 758,
    V1_19 = 759,
    /// Also 1.19.2.
    V1_19_1 = 760,
    V1_19_3 = 761,
    V1_19_4 = 762,
    /// Also 1.20.1.
    V1_20 = 763,
    V1_20_2 = 764,
}

/// Oldest supported version (1.7.2).
pub const MIN_SUPPORTED: ProtocolVersion = ProtocolVersion::V1_7_2;

/// Newest supported version (1.20.2).
pub const MAX_SUPPORTED: ProtocolVersion = ProtocolVersion::V1_20_2;

impl ProtocolVersion {
    /// Resolve a handshake version number. Unknown or unsupported numbers
    /// return None and the connection is rejected before login.
    pub fn from_id(id: i32) -> Option<Self> {
        use ProtocolVersion::*;
        Some(match id {
            4 => V1_7_2,
            5 => V1_7_6,
            47 => V1_8,
            107 => V1_9,
            108 => V1_9_1,
            109 => V1_9_2,
            110 => V1_9_4,
            210 => V1_10,
            315 => V1_11,
            316 => V1_11_1,
            335 => V1_12,
            338 => V1_12_1,
            340 => V1_12_2,
            393 => V1_13,
            401 => V1_13_1,
            404 => V1_13_2,
            477 => V1_14,
            480 => V1_14_1,
            485 => V1_14_2,
            490 => V1_14_3,
            498 => V1_14_4,
            573 => V1_15,
            575 => V1_15_1,
            578 => V1_15_2,
            735 => V1_16,
            736 => V1_16_1,
            751 => V1_16_2,
            753 => V1_16_3,
            754 => V1_16_4,
            755 => V1_17,
            756 => V1_17_1,
            757 => V1_18,
            758 => V1_18_2,
            759 => V1_19,
            760 => V1_19_1,
            761 => V1_19_3,
            762 => V1_19_4,
            763 => V1_20,
            764 => V1_20_2,
            _ => return None,
        })
    }

    /// Wire version number.
    #[inline]
    pub fn id(self) -> i32 {
        self as i32
    }

    /// SetCompression exists from 1.8 onward.
    #[inline]
    pub fn has_compression(self) -> bool {
        self >= ProtocolVersion::V1_8
    }

    /// The Configuration phase exists from 1.20.2 onward.
    #[inline]
    pub fn has_config_phase(self) -> bool {
        self >= ProtocolVersion::V1_20_2
    }

    /// Block positions switched from X|Y|Z to X|Z|Y packing in 1.14.
    #[inline]
    pub fn modern_position(self) -> bool {
        self >= ProtocolVersion::V1_14
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolVersion::V1_7_2 => "1.7.2",
            ProtocolVersion::V1_7_6 => "1.7.6",
            ProtocolVersion::V1_8 => "1.8",
            ProtocolVersion::V1_9 => "1.9",
            ProtocolVersion::V1_9_1 => "1.9.1",
            ProtocolVersion::V1_9_2 => "1.9.2",
            ProtocolVersion::V1_9_4 => "1.9.4",
            ProtocolVersion::V1_10 => "1.10",
            ProtocolVersion::V1_11 => "1.11",
            ProtocolVersion::V1_11_1 => "1.11.1",
            ProtocolVersion::V1_12 => "1.12",
            ProtocolVersion::V1_12_1 => "1.12.1",
            ProtocolVersion::V1_12_2 => "1.12.2",
            ProtocolVersion::V1_13 => "1.13",
            ProtocolVersion::V1_13_1 => "1.13.1",
            ProtocolVersion::V1_13_2 => "1.13.2",
            ProtocolVersion::V1_14 => "1.14",
            ProtocolVersion::V1_14_1 => "1.14.1",
            ProtocolVersion::V1_14_2 => "1.14.2",
            ProtocolVersion::V1_14_3 => "1.14.3",
            ProtocolVersion::V1_14_4 => "1.14.4",
            ProtocolVersion::V1_15 => "1.15",
            ProtocolVersion::V1_15_1 => "1.15.1",
            ProtocolVersion::V1_15_2 => "1.15.2",
            ProtocolVersion::V1_16 => "1.16",
            ProtocolVersion::V1_16_1 => "1.16.1",
            ProtocolVersion::V1_16_2 => "1.16.2",
            ProtocolVersion::V1_16_3 => "1.16.3",
            ProtocolVersion::V1_16_4 => "1.16.4",
            ProtocolVersion::V1_17 => "1.17",
            ProtocolVersion::V1_17_1 => "1.17.1",
            ProtocolVersion::V1_18 => "1.18",
            ProtocolVersion::V1_18_2 => "1.18.2",
            ProtocolVersion::V1_19 => "1.19",
            ProtocolVersion::V1_19_1 => "1.19.1",
            ProtocolVersion::V1_19_3 => "1.19.3",
            ProtocolVersion::V1_19_4 => "1.19.4",
            ProtocolVersion::V1_20 => "1.20",
            ProtocolVersion::V1_20_2 => "1.20.2",
        };
        write!(f, "{} ({})", name, self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_matches_release_order() {
        assert!(ProtocolVersion::V1_7_2 < ProtocolVersion::V1_8);
        assert!(ProtocolVersion::V1_16_2 > ProtocolVersion::V1_16);
        assert!(ProtocolVersion::V1_20_2 > ProtocolVersion::V1_19_4);
    }

    #[test]
    fn test_from_id_bounds() {
        assert_eq!(ProtocolVersion::from_id(4), Some(ProtocolVersion::V1_7_2));
        assert_eq!(ProtocolVersion::from_id(764), Some(ProtocolVersion::V1_20_2));
        // Just outside the supported set
        assert_eq!(ProtocolVersion::from_id(3), None);
        assert_eq!(ProtocolVersion::from_id(9999), None);
        // A gap inside the range (1.12.2 is 340, 1.13 is 393)
        assert_eq!(ProtocolVersion::from_id(341), None);
    }

    #[test]
    fn test_feature_gates() {
        assert!(!ProtocolVersion::V1_7_6.has_compression());
        assert!(ProtocolVersion::V1_8.has_compression());
        assert!(!ProtocolVersion::V1_20.has_config_phase());
        assert!(ProtocolVersion::V1_20_2.has_config_phase());
        assert!(!ProtocolVersion::V1_13_2.modern_position());
        assert!(ProtocolVersion::V1_14.modern_position());
    }
}
