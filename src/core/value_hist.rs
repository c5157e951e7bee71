//! Layer 4: per-value history.

use serde::{Deserialize, Serialize};

use super::csn::Csn;

/// Update/delete history of one attribute value.
///
/// Exactly one side is set at a time: recording an update or a delete
/// replaces the whole record. A value whose latest recorded time is a
/// delete is absent from the entry, otherwise present.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrValueHistorical {
    pub update_time: Option<Csn>,
    pub delete_time: Option<Csn>,
}

impl AttrValueHistorical {
    pub fn updated(csn: Csn) -> Self {
        Self {
            update_time: Some(csn),
            delete_time: None,
        }
    }

    pub fn deleted(csn: Csn) -> Self {
        Self {
            update_time: None,
            delete_time: Some(csn),
        }
    }

    pub fn is_update(&self) -> bool {
        self.update_time.is_some()
    }

    /// The CSN governing this record's retention.
    pub fn governing_time(&self) -> Option<&Csn> {
        self.delete_time.as_ref().or(self.update_time.as_ref())
    }
}
