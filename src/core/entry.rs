//! Layer 2: the directory record surface consumed by conflict resolution.
//!
//! Persistence and per-entry locking belong to the storage layer; this is
//! the in-memory view the resolution paths read and rewrite.

use std::collections::BTreeMap;

use uuid::Uuid;

use super::schema::{AttrKey, AttrName};

/// Name of the operational attribute carrying the entry's unique id.
pub const ENTRYUUID_ATTR: &str = "entryuuid";

pub(crate) fn entryuuid_key() -> AttrKey {
    AttrKey::plain(AttrName::parse(ENTRYUUID_ATTR).expect("entryuuid is a valid attribute name"))
}

/// One stored directory record: a DN plus attribute values keyed by
/// attribute type and options.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Entry {
    dn: String,
    attrs: BTreeMap<AttrKey, Vec<String>>,
}

impl Entry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn dn(&self) -> &str {
        &self.dn
    }

    pub fn get(&self, key: &AttrKey) -> Option<&[String]> {
        self.attrs.get(key).map(Vec::as_slice)
    }

    pub fn set(&mut self, key: AttrKey, values: Vec<String>) {
        if values.is_empty() {
            self.attrs.remove(&key);
        } else {
            self.attrs.insert(key, values);
        }
    }

    pub fn remove(&mut self, key: &AttrKey) -> Option<Vec<String>> {
        self.attrs.remove(key)
    }

    pub fn has_attribute(&self, key: &AttrKey) -> bool {
        self.attrs.contains_key(key)
    }

    pub fn has_value(&self, key: &AttrKey, value: &str) -> bool {
        self.attrs
            .get(key)
            .is_some_and(|values| values.iter().any(|v| v == value))
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&AttrKey, &[String])> {
        self.attrs.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// The entry's unique id, deriving a stable substitute from the DN when
    /// the operational attribute is missing.
    ///
    /// Replication needs an id for every entry; the substitute keeps the
    /// rare pathological entry usable instead of failing the whole path.
    pub fn uuid(&self) -> String {
        if let Some(values) = self.attrs.get(&entryuuid_key()) {
            if let Some(first) = values.first() {
                return first.clone();
            }
        }
        tracing::debug!(
            dn = %self.dn,
            "entry has no entryuuid attribute, deriving one from its name"
        );
        Uuid::new_v5(&Uuid::NAMESPACE_X500, self.dn.as_bytes()).to_string()
    }
}
