/// Packed reference to a page inside one slice file.
///
/// ```text
///  63                              16 15           1   0
/// ┌──────────────────────────────────┬──────────────┬────┐
/// │ file offset of the page CRC (48) │ size (15)    │leaf│
/// └──────────────────────────────────┴──────────────┴────┘
/// ```
///
/// `size` is the compressed page length, not counting the 4-byte CRC in
/// front of it. The low 16 bits on their own form the "size marker" that
/// the writer stores in front of every page but the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location(u64);

/// Largest compressed page a location can describe.
pub const MAX_SIZE: u32 = 0x7FFF;

/// Largest file offset a location can describe.
pub const MAX_OFFSET: u64 = (1 << 48) - 1;

/// Marker written where the next page's size would be, meaning "no more
/// pages of this run". Also the value of an unset location.
pub const INVALID_SIZE: u64 = u64::MAX;

impl Location {
    pub const INVALID: Location = Location(u64::MAX);

    pub fn new(offset: u64, size: u32, is_leaf: bool) -> Self {
        debug_assert!(offset <= MAX_OFFSET);
        debug_assert!(size <= MAX_SIZE);
        Location(offset << 16 | size_marker(size, is_leaf))
    }

    /// Rebuild a location from a size marker found at `marker_offset`.
    /// The page itself starts right after the 8-byte marker.
    pub fn after_marker(marker_offset: u64, marker: u64) -> Self {
        let (size, is_leaf) = split_marker(marker);
        Location::new(marker_offset + 8, size, is_leaf)
    }

    pub fn from_raw(raw: u64) -> Self {
        Location(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn offset(self) -> u64 {
        self.0 >> 16
    }

    pub fn size(self) -> u32 {
        ((self.0 >> 1) & MAX_SIZE as u64) as u32
    }

    pub fn is_leaf(self) -> bool {
        self.0 & 1 == 1
    }

    pub fn is_valid(self) -> bool {
        self != Location::INVALID
    }

    /// Offset of the first byte after this page (CRC + compressed bytes).
    pub fn end(self) -> u64 {
        self.offset() + 4 + self.size() as u64
    }
}

/// Size/leaf pair as stored in front of a page and in the header.
pub fn size_marker(size: u32, is_leaf: bool) -> u64 {
    (size as u64) << 1 | is_leaf as u64
}

pub fn split_marker(marker: u64) -> (u32, bool) {
    (((marker >> 1) & MAX_SIZE as u64) as u32, marker & 1 == 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_survive_packing() {
        let loc = Location::new(123_456_789, 16_000, true);
        assert_eq!(loc.offset(), 123_456_789);
        assert_eq!(loc.size(), 16_000);
        assert!(loc.is_leaf());

        let loc = Location::new(MAX_OFFSET, MAX_SIZE, false);
        assert_eq!(loc.offset(), MAX_OFFSET);
        assert_eq!(loc.size(), MAX_SIZE);
        assert!(!loc.is_leaf());
        assert!(loc.is_valid());
    }

    #[test]
    fn distinct_inputs_give_distinct_locations() {
        let a = Location::new(0, 10, true);
        let b = Location::new(0, 10, false);
        let c = Location::new(1, 10, true);
        let d = Location::new(0, 11, true);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn marker_roundtrip() {
        let marker = size_marker(4321, false);
        assert!(marker < u16::MAX as u64);
        assert_eq!(split_marker(marker), (4321, false));

        let loc = Location::after_marker(100, marker);
        assert_eq!(loc.offset(), 108);
        assert_eq!(loc.size(), 4321);
        assert_eq!(loc.end(), 108 + 4 + 4321);
    }

    #[test]
    fn invalid_location() {
        assert!(!Location::INVALID.is_valid());
        assert_eq!(Location::from_raw(INVALID_SIZE), Location::INVALID);
    }
}
