//! The buffer index: one entry per stored buffer, serialized as a
//! self-describing CBOR sequence of maps between the payload region and the
//! trailer.
//!
//! The encoding is deterministic for identical inputs: struct fields
//! serialize in declaration order and free-form maps are `BTreeMap`s with
//! sorted keys, so writing the same buffers twice produces byte-identical
//! files.

use std::collections::BTreeMap;

use ciborium::Value;
use serde::{Deserialize, Serialize};

use crate::codecs::CodecSpec;
use crate::digest::Digest256;
use crate::error::{BinPickleError, BinPickleResult};
use crate::format::HEADER_SIZE;

/// Index entry for one stored buffer.
///
/// Entries are immutable once written and appear in the index in the order
/// their buffers were written. Unknown optional keys from future-minor files
/// are preserved verbatim in `extra` so the entry round-trips unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Absolute byte position where the stored (possibly encoded) bytes
    /// begin.
    pub offset: u64,
    /// Number of stored bytes.
    pub enc_length: u64,
    /// Decoded size after the codec chain is reversed; equals `enc_length`
    /// for raw buffers.
    pub dec_length: u64,
    /// SHA-256 of the stored bytes.
    pub hash: Digest256,
    /// Codec chain applied at write time, in encode order. Empty means raw.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codecs: Vec<CodecSpec>,
    /// Free-form descriptive metadata, round-tripped verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<BTreeMap<String, Value>>,
    /// Optional keys this version does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl IndexEntry {
    /// Whether the stored bytes are the decoded bytes (no codec applied).
    pub fn is_raw(&self) -> bool {
        self.codecs.is_empty()
    }

    /// End of the stored span, exclusive.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.enc_length)
    }
}

/// Serialize the index as a CBOR array of entry maps.
pub fn encode_index(entries: &[IndexEntry]) -> BinPickleResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(&entries, &mut buf).map_err(BinPickleError::serialization)?;
    Ok(buf)
}

/// Deserialize an index blob. The blob's digest must already have been
/// verified against the trailer.
pub fn decode_index(blob: &[u8]) -> BinPickleResult<Vec<IndexEntry>> {
    ciborium::from_reader(blob).map_err(BinPickleError::corrupt_index)
}

/// Check the decoded entries against the format invariants: every span lives
/// inside the payload region, spans never overlap, and offsets strictly
/// increase in index order.
pub fn validate_entries(entries: &[IndexEntry], index_offset: u64) -> BinPickleResult<()> {
    let mut cursor = HEADER_SIZE as u64;
    for (i, entry) in entries.iter().enumerate() {
        if entry.offset < cursor {
            return Err(BinPickleError::corrupt_index(format!(
                "entry {i}: offset {} before expected start {cursor}",
                entry.offset
            )));
        }
        let end = entry.end().ok_or_else(|| {
            BinPickleError::corrupt_index(format!("entry {i}: stored span overflows"))
        })?;
        if end > index_offset {
            return Err(BinPickleError::corrupt_index(format!(
                "entry {i}: stored span ends at {end}, past the index at {index_offset}"
            )));
        }
        if entry.is_raw() && entry.enc_length != entry.dec_length {
            return Err(BinPickleError::corrupt_index(format!(
                "entry {i}: raw buffer declares encoded length {} but decoded length {}",
                entry.enc_length, entry.dec_length
            )));
        }
        cursor = end;
    }
    Ok(())
}
