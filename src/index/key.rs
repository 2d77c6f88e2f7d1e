//! Index keys and the collation that orders them.

use std::cmp::Ordering;
use std::fmt;

/// Ordering rule for key payloads.
///
/// Key bytes are opaque to the storage kernel; a collation is the only
/// thing that interprets them.
pub trait Collation: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Plain lexicographic byte order.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCollation;

impl Collation for BinaryCollation {
    #[inline]
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Key stored in an index node.
///
/// `MinValue` and `MaxValue` sort before and after every payload; they are
/// reserved for the head and tail sentinels.
///
/// # Encoding
/// ```text
/// byte 0    tag (0 = MinValue, 1 = Value, 2 = MaxValue)
/// byte 1    payload length
/// 2..       payload
/// ```
#[derive(Clone, PartialEq, Eq)]
pub enum IndexKey {
    MinValue,
    Value(Vec<u8>),
    MaxValue,
}

const TAG_MIN: u8 = 0;
const TAG_VALUE: u8 = 1;
const TAG_MAX: u8 = 2;

impl IndexKey {
    pub fn value(bytes: impl Into<Vec<u8>>) -> Self {
        IndexKey::Value(bytes.into())
    }

    #[inline]
    pub fn is_sentinel(&self) -> bool {
        !matches!(self, IndexKey::Value(_))
    }

    /// Payload bytes, `None` for sentinels.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            IndexKey::Value(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Payload length (0 for sentinels).
    pub fn len(&self) -> usize {
        self.as_bytes().map_or(0, <[u8]>::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes taken on a page.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        2 + self.len()
    }

    pub fn compare(&self, other: &IndexKey, collation: &dyn Collation) -> Ordering {
        match (self, other) {
            (IndexKey::Value(a), IndexKey::Value(b)) => collation.compare(a, b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            IndexKey::MinValue => TAG_MIN,
            IndexKey::Value(_) => TAG_VALUE,
            IndexKey::MaxValue => TAG_MAX,
        }
    }

    /// # Panics
    /// Panics if `buf` is shorter than [`encoded_len`](Self::encoded_len).
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0] = self.rank();
        buf[1] = self.len() as u8;
        if let IndexKey::Value(bytes) = self {
            buf[2..2 + bytes.len()].copy_from_slice(bytes);
        }
    }

    /// # Panics
    /// Panics on an unknown tag or a truncated payload.
    pub fn from_bytes(buf: &[u8]) -> Self {
        match buf[0] {
            TAG_MIN => IndexKey::MinValue,
            TAG_MAX => IndexKey::MaxValue,
            TAG_VALUE => {
                let len = buf[1] as usize;
                IndexKey::Value(buf[2..2 + len].to_vec())
            }
            tag => panic!("unknown index key tag {}", tag),
        }
    }
}

impl fmt::Debug for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKey::MinValue => write!(f, "MinValue"),
            IndexKey::MaxValue => write!(f, "MaxValue"),
            IndexKey::Value(bytes) => write!(f, "Value({:02x?})", bytes),
        }
    }
}

impl From<&[u8]> for IndexKey {
    fn from(bytes: &[u8]) -> Self {
        IndexKey::Value(bytes.to_vec())
    }
}
