#[allow(unused)]
use std::io::prelude::*;

use std::fmt::Display;

use indexmap::map::{Iter, Keys};
use indexmap::IndexMap;

/// The identifier of one spectrum or chromatogram inside an mzML document.
///
/// Keys are heterogeneous: most converters number spectra with integer scan
/// ids, some emit structured or opaque native id strings, and the total ion
/// chromatogram is addressed by the reserved label `TIC`. Ids are stored
/// exactly as given, without coercion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EntryId {
    /// An integer scan number
    Scan(u64),
    /// An arbitrary native id string
    Native(Box<str>),
    /// The total ion chromatogram
    Tic,
}

impl EntryId {
    /// Wrap a native id string, canonicalizing the reserved `TIC` label.
    pub fn from_native(id: &str) -> EntryId {
        if id.eq_ignore_ascii_case("TIC") {
            EntryId::Tic
        } else {
            EntryId::Native(id.into())
        }
    }

    /// The integer scan number, when this id carries one.
    pub fn scan(&self) -> Option<u64> {
        match self {
            EntryId::Scan(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<u64> for EntryId {
    fn from(value: u64) -> Self {
        EntryId::Scan(value)
    }
}

impl From<usize> for EntryId {
    fn from(value: usize) -> Self {
        EntryId::Scan(value as u64)
    }
}

impl From<&str> for EntryId {
    fn from(value: &str) -> Self {
        EntryId::from_native(value)
    }
}

impl From<String> for EntryId {
    fn from(value: String) -> Self {
        EntryId::from_native(&value)
    }
}

impl Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryId::Scan(n) => write!(f, "{}", n),
            EntryId::Native(s) => f.write_str(s),
            EntryId::Tic => f.write_str("TIC"),
        }
    }
}

/// The byte extent of one indexed entity.
///
/// `start` is the offset of the `<` beginning the opening tag. `end`, when
/// known, is the offset one past the closing tag. Both lie strictly inside
/// the file and `start < end` whenever `end` is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ByteSpan {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteSpan {
    pub fn new(start: u64) -> ByteSpan {
        ByteSpan { start, end: None }
    }

    pub fn with_end(start: u64, end: u64) -> ByteSpan {
        ByteSpan {
            start,
            end: Some(end),
        }
    }

    /// The number of bytes spanned, when the end is known.
    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| end - self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len().map(|n| n == 0).unwrap_or(false)
    }
}

/**
An ordered mapping from entry ID to the byte extent it occupies in the
source file.

A wrapper around [`indexmap::IndexMap`]. Entries are inserted by the trailer
reader or the full document scan, and opportunistically while searching;
they are never evicted.
*/
#[derive(Default, Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OffsetIndex {
    /// The name of the index. There may potentially be more than one
    /// index per file
    pub name: String,

    /// The mapping from ID to byte extent, ordered by occurrence
    #[cfg_attr(feature = "serde", serde(with = "indexmap::map::serde_seq"))]
    pub offsets: IndexMap<EntryId, ByteSpan>,

    /// Whether the index has been initalized explicitly or not, as
    /// it may be initially empty or read as empty.
    pub init: bool,
}

impl OffsetIndex {
    pub fn new(name: String) -> OffsetIndex {
        OffsetIndex {
            name,
            ..Default::default()
        }
    }

    /// Get the byte extent of the specified key
    #[inline]
    pub fn get(&self, key: &EntryId) -> Option<ByteSpan> {
        self.offsets.get(key).copied()
    }

    /// Get the byte extent recorded for an integer scan number
    #[inline]
    pub fn get_scan(&self, scan: u64) -> Option<ByteSpan> {
        self.get(&EntryId::Scan(scan))
    }

    /// Get the associated key and extent for the specified index position
    #[inline]
    pub fn get_index(&self, index: usize) -> Option<(&EntryId, ByteSpan)> {
        self.offsets
            .get_index(index)
            .map(|(key, span)| (key, *span))
    }

    /// Insert `key` into the index with its byte extent
    #[inline]
    pub fn insert<T: Into<EntryId>>(&mut self, key: T, span: ByteSpan) -> Option<ByteSpan> {
        self.offsets.insert(key.into(), span)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn keys(&self) -> Keys<'_, EntryId, ByteSpan> {
        self.offsets.keys()
    }

    /// Iterate over the keys and extents
    pub fn iter(&self) -> Iter<'_, EntryId, ByteSpan> {
        self.offsets.iter()
    }

    /// Check if the key is in the index
    #[inline]
    pub fn contains_key(&self, key: &EntryId) -> bool {
        self.offsets.contains_key(key)
    }

    /// Check if an integer scan number is in the index
    #[inline]
    pub fn contains_scan(&self, scan: u64) -> bool {
        self.contains_key(&EntryId::Scan(scan))
    }

    /// All integer scan keys, in ascending order
    pub fn scan_keys(&self) -> Vec<u64> {
        let mut keys: Vec<u64> = self.offsets.keys().filter_map(|key| key.scan()).collect();
        keys.sort_unstable();
        keys
    }

    #[cfg(feature = "serde")]
    /// Write the index out in JSON format to `writer`
    pub fn to_writer<W: Write>(&self, writer: W) -> serde_json::Result<()> {
        serde_json::to_writer(writer, self)
    }

    #[cfg(feature = "serde")]
    /// Read an index in JSON format from `reader`
    pub fn from_reader<R: Read>(reader: R) -> serde_json::Result<Self> {
        serde_json::from_reader(reader)
    }
}

/// The ordered `(scan, offset)` endpoints that drive jump-based searching.
///
/// Seeded with the first and last spectrum of the file and grown with every
/// spectrum the jump search happens to land on. Kept sorted and free of
/// duplicate scan numbers at all times.
#[derive(Default, Debug, Clone)]
pub struct SeekList {
    entries: Vec<(u64, u64)>,
}

impl SeekList {
    pub fn new() -> SeekList {
        Default::default()
    }

    /// Insert an entry, keeping the list sorted. Returns whether the scan
    /// number was new.
    pub fn insert(&mut self, scan: u64, offset: u64) -> bool {
        match self.entries.binary_search_by_key(&scan, |e| e.0) {
            Ok(_) => false,
            Err(position) => {
                self.entries.insert(position, (scan, offset));
                true
            }
        }
    }

    pub fn first(&self) -> Option<(u64, u64)> {
        self.entries.first().copied()
    }

    pub fn last(&self) -> Option<(u64, u64)> {
        self.entries.last().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn as_slice(&self) -> &[(u64, u64)] {
        &self.entries
    }

    /// The entries bracketing `target`: the one strictly before its insertion
    /// point and the one at or after it. `None` when `target` falls outside
    /// the list or the list has fewer than two entries.
    pub fn bracket(&self, target: u64) -> Option<((u64, u64), (u64, u64))> {
        let position = self.entries.partition_point(|e| e.0 < target);
        if position == 0 || position >= self.entries.len() {
            return None;
        }
        Some((self.entries[position - 1], self.entries[position]))
    }
}
