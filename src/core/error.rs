//! Core capability errors (parsing, validation, decode).
//!
//! These are bounded and stable: core errors represent data-quality states,
//! not library implementation details. A decode failure on a single
//! historical value is recoverable (the value is skipped); these types exist
//! so the skip reason is precise.

use thiserror::Error;

use crate::error::Transience;

/// Invalid change sequence number text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CsnParseError {
    #[error("csn `{raw}` has length {len}, expected 32 hex digits")]
    Length { raw: String, len: usize },
    #[error("csn `{raw}` contains non-hex characters")]
    InvalidHex { raw: String },
}

/// Invalid attribute type name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("attribute name `{raw}` is invalid: {reason}")]
pub struct InvalidAttrName {
    pub raw: String,
    pub reason: &'static str,
}

/// A single historical attribute value that could not be decoded.
///
/// Loads never abort on these: the malformed value is skipped and the rest
/// of the entry's history is used.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("historical value `{raw}` has too few fields")]
    TooFewFields { raw: String },
    #[error("historical value `{raw}` carries an invalid csn: {source}")]
    BadCsn {
        raw: String,
        #[source]
        source: CsnParseError,
    },
    #[error("historical value `{raw}` names an invalid attribute: {source}")]
    BadAttrName {
        raw: String,
        #[source]
        source: InvalidAttrName,
    },
    #[error("historical value `{raw}` has unknown modification key `{key}`")]
    UnknownKey { raw: String, key: String },
    #[error("entry marker `{raw}` has unknown operation `{op}`")]
    UnknownEntryOp { raw: String, op: String },
}

/// Canonical error enum for the core capability.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    Csn(#[from] CsnParseError),
    #[error(transparent)]
    AttrName(#[from] InvalidAttrName),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl CoreError {
    pub fn transience(&self) -> Transience {
        // Core errors are pure domain/input failures.
        Transience::Permanent
    }
}
