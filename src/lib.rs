#![forbid(unsafe_code)]

//! Conflict-resolution core for a multi-master replicated directory store.
//!
//! Each stored entry carries a multi-valued historical attribute recording,
//! per attribute value, when it was last added and when it was last deleted.
//! Replaying a replicated modification against that history resolves
//! concurrent conflicting updates deterministically, so every replica
//! converges to the same state regardless of delivery order.

pub mod config;
pub mod core;
pub mod error;

pub use error::{Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience
pub use crate::core::{
    apply_modification, generate_fake_operations, historical_attr_key, AttrHistorical,
    AttrHistoricalMultiple, AttrHistoricalSingle, AttrHistoricalWithOptions, AttrKey, AttrName,
    AttrOptions, AttrTypeDescriptor, AttrValueHistorical, CoreError, Csn, CsnGenerator,
    CsnParseError, DecodeError, DecodeReport, Entry, EntryHistorical, FakeAdd, FakeModify, FakeOp,
    FakeRename, HistKey, HistoricalValue, InvalidAttrName, ModType, Modification, ModifyOp,
    ReplicaId, Schema, ServerState, WallClock, HISTORICAL_ATTR,
};
