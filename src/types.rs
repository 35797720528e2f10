/// Raw key bytes.
pub type Key = Vec<u8>;

/// Raw value bytes.
pub type Value = Vec<u8>;

/// Transaction id. Assigned at commit, strictly increasing.
///
/// Doubles as the recency tie-break during merges: for equal keys the
/// higher tid wins. Zero means "not assigned yet".
pub type Tid = u64;

/// One logical record, with its value fragments already reassembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Key,
    pub value: Value,
    pub tid: Tid,
    pub deleted: bool,
}

impl Record {
    /// A live key/value pair.
    pub fn put(key: impl Into<Key>, value: impl Into<Value>, tid: Tid) -> Self {
        Record {
            key: key.into(),
            value: value.into(),
            tid,
            deleted: false,
        }
    }

    /// A tombstone. Always empty-valued.
    pub fn delete(key: impl Into<Key>, tid: Tid) -> Self {
        Record {
            key: key.into(),
            value: Vec::new(),
            tid,
            deleted: true,
        }
    }
}
