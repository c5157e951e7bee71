//! Core conflict-resolution types (Layers 0-8)
//!
//! Module hierarchy follows type dependency order:
//! - csn: change sequence numbers (Layer 0)
//! - schema: attribute naming, options, registry (Layer 1)
//! - entry: directory record surface (Layer 2)
//! - modify: modification and operation shapes (Layer 3)
//! - value_hist: per-value history (Layer 4)
//! - wire: historical attribute grammar (Layer 5)
//! - attr_hist: per-attribute resolution (Layer 6)
//! - entry_hist: per-entry orchestration (Layer 7)
//! - fake: synthetic operation reconstruction (Layer 8)

pub mod attr_hist;
pub mod csn;
pub mod entry;
pub mod entry_hist;
pub mod error;
pub mod fake;
pub mod modify;
pub mod schema;
pub mod value_hist;
pub mod wire;

pub use attr_hist::{
    AttrHistorical, AttrHistoricalMultiple, AttrHistoricalSingle, AttrHistoricalWithOptions,
    ReplayVerdict, ValueHistView,
};
pub use csn::{Csn, CsnGenerator, ReplicaId, ServerState, WallClock};
pub use entry::{Entry, ENTRYUUID_ATTR};
pub use entry_hist::{
    historical_attr_key, is_historical_attr, DecodeReport, EntryHistorical, HISTORICAL_ATTR,
};
pub use error::{CoreError, CsnParseError, DecodeError, InvalidAttrName};
pub use fake::{generate_fake_operations, FakeAdd, FakeModify, FakeOp, FakeRename};
pub use modify::{apply_modification, ModType, Modification, ModifyOp};
pub use schema::{AttrKey, AttrName, AttrOptions, AttrTypeDescriptor, Schema};
pub use value_hist::AttrValueHistorical;
pub use wire::{HistKey, HistoricalValue};
