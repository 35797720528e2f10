use crate::error::{Error, Result};
use crate::slice::location::Location;

/// Signature identifying slice files ("tyrdb001" read as little endian).
pub const SLICE_SIGNATURE: u64 = 0x3130306264727974;

/// Aggregate statistics stored in the slice header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Logical records (tombstones included).
    pub key_count: u64,
    /// Bytes of compressed page data, CRCs and markers excluded.
    pub compressed_size: u64,
    /// Page budget times page count.
    pub uncompressed_size: u64,
    pub total_nodes: u64,
    pub leaf_nodes: u64,
}

/// The header is the last record in a slice file.
///
/// ```text
/// ┌──────────────────────────────────────┐
/// │ Signature (8B)                       │
/// │ Root location (8B)                   │
/// │ First page size marker (2B)          │
/// │ Key count (8B)                       │
/// │ Compressed size (8B)                 │
/// │ Uncompressed size (8B)               │
/// │ Total nodes (8B)                     │
/// │ Leaf nodes (8B)                      │
/// └──────────────────────────────────────┘
/// ```
///
/// The first page has no size marker in front of it, so its marker lives
/// here instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub signature: u64,
    pub root: Location,
    pub first_page_size: u16,
    pub stats: Stats,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            signature: SLICE_SIGNATURE,
            root: Location::INVALID,
            first_page_size: u16::MAX,
            stats: Stats::default(),
        }
    }
}

impl Header {
    /// Size of the header in bytes (fixed, packed).
    pub const SIZE: usize = 8 + 8 + 2 + 8 * 5; // 58 bytes

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.signature.to_le_bytes());
        buf.extend_from_slice(&self.root.raw().to_le_bytes());
        buf.extend_from_slice(&self.first_page_size.to_le_bytes());
        buf.extend_from_slice(&self.stats.key_count.to_le_bytes());
        buf.extend_from_slice(&self.stats.compressed_size.to_le_bytes());
        buf.extend_from_slice(&self.stats.uncompressed_size.to_le_bytes());
        buf.extend_from_slice(&self.stats.total_nodes.to_le_bytes());
        buf.extend_from_slice(&self.stats.leaf_nodes.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Corruption("slice header too short".into()));
        }

        let u64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&data[at..at + 8]);
            u64::from_le_bytes(raw)
        };

        let signature = u64_at(0);
        if signature != SLICE_SIGNATURE {
            return Err(Error::Corruption(format!(
                "invalid slice signature: expected {:#x}, got {:#x}",
                SLICE_SIGNATURE, signature
            )));
        }

        let root = Location::from_raw(u64_at(8));
        let first_page_size = u16::from_le_bytes([data[16], data[17]]);

        Ok(Header {
            signature,
            root,
            first_page_size,
            stats: Stats {
                key_count: u64_at(18),
                compressed_size: u64_at(26),
                uncompressed_size: u64_at(34),
                total_nodes: u64_at(42),
                leaf_nodes: u64_at(50),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Header {
        Header {
            signature: SLICE_SIGNATURE,
            root: Location::new(8192, 300, false),
            first_page_size: 2 * 1200 + 1,
            stats: Stats {
                key_count: 10,
                compressed_size: 1500,
                uncompressed_size: 32768,
                total_nodes: 2,
                leaf_nodes: 1,
            },
        }
    }

    #[test]
    fn header_roundtrip() {
        let encoded = sample().encode();
        assert_eq!(encoded.len(), Header::SIZE);
        assert_eq!(Header::decode(&encoded).unwrap(), sample());
    }

    #[test]
    fn header_bad_signature() {
        let mut encoded = sample().encode();
        encoded[0] ^= 0xFF;
        assert!(Header::decode(&encoded).unwrap_err().is_corruption());
    }

    #[test]
    fn header_too_short() {
        assert!(Header::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn signature_spells_format_name() {
        assert_eq!(&SLICE_SIGNATURE.to_le_bytes(), b"tyrdb001");
    }
}
