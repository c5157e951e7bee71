//! Layer 3: modification and operation shapes handed in by the protocol
//! layer.
//!
//! The protocol layer decodes requests into these; conflict resolution
//! rewrites the modification list in place before the storage layer applies
//! it.

use serde::{Deserialize, Serialize};

use super::csn::Csn;
use super::entry::Entry;
use super::schema::AttrKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModType {
    Add,
    Delete,
    Replace,
}

/// One requested change to one attribute.
///
/// An empty value list means the whole attribute for `Delete` and a removal
/// for `Replace`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Modification {
    pub attr: AttrKey,
    pub mod_type: ModType,
    pub values: Vec<String>,
}

impl Modification {
    pub fn new(attr: AttrKey, mod_type: ModType, values: Vec<String>) -> Self {
        Self {
            attr,
            mod_type,
            values,
        }
    }
}

/// A modify operation as seen by conflict resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModifyOp {
    pub dn: String,
    pub csn: Csn,
    pub entry_uuid: Option<String>,
    /// True when replayed from another replica; local changes always win at
    /// their origin and skip conflict checks.
    pub replicated: bool,
    pub mods: Vec<Modification>,
}

impl ModifyOp {
    pub fn local(dn: impl Into<String>, csn: Csn, mods: Vec<Modification>) -> Self {
        Self {
            dn: dn.into(),
            csn,
            entry_uuid: None,
            replicated: false,
            mods,
        }
    }

    pub fn replicated(dn: impl Into<String>, csn: Csn, mods: Vec<Modification>) -> Self {
        Self {
            dn: dn.into(),
            csn,
            entry_uuid: None,
            replicated: true,
            mods,
        }
    }

    pub fn with_entry_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.entry_uuid = Some(uuid.into());
        self
    }
}

/// Apply one resolved modification to an entry, with the storage layer's
/// semantics: adds skip values already present, deleting the last value
/// drops the attribute.
pub fn apply_modification(entry: &mut Entry, m: &Modification) {
    match m.mod_type {
        ModType::Add => {
            let mut values = entry.remove(&m.attr).unwrap_or_default();
            for v in &m.values {
                if !values.contains(v) {
                    values.push(v.clone());
                }
            }
            entry.set(m.attr.clone(), values);
        }
        ModType::Delete => {
            if m.values.is_empty() {
                entry.remove(&m.attr);
            } else if let Some(mut values) = entry.remove(&m.attr) {
                values.retain(|v| !m.values.contains(v));
                entry.set(m.attr.clone(), values);
            }
        }
        ModType::Replace => {
            let mut values = Vec::with_capacity(m.values.len());
            for v in &m.values {
                if !values.contains(v) {
                    values.push(v.clone());
                }
            }
            entry.set(m.attr.clone(), values);
        }
    }
}
