//! Layer 1: attribute naming and the schema registry.
//!
//! The registry is an explicit object handed to the resolution paths, not a
//! process-wide singleton, so tests can build independent schemas.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::InvalidAttrName;

/// Normalized primary name of an attribute type.
///
/// Lowercased on parse; the wire grammar reserves `:` and `;`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttrName(String);

impl AttrName {
    pub fn parse(s: &str) -> Result<Self, InvalidAttrName> {
        if s.is_empty() {
            return Err(InvalidAttrName {
                raw: s.to_string(),
                reason: "empty",
            });
        }
        if s.chars()
            .any(|c| c == ':' || c == ';' || c.is_whitespace())
        {
            return Err(InvalidAttrName {
                raw: s.to_string(),
                reason: "contains a reserved separator",
            });
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AttrName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttrName({:?})", self.0)
    }
}

impl fmt::Display for AttrName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Attribute option tags (e.g. language tags). Unique, order-insensitive.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttrOptions(BTreeSet<String>);

impl AttrOptions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, option: &str) -> bool {
        self.0.contains(option)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// The `;opt1;opt2` suffix appended to the attribute name on the wire.
    pub fn wire_suffix(&self) -> String {
        let mut out = String::new();
        for option in &self.0 {
            out.push(';');
            out.push_str(option);
        }
        out
    }
}

impl FromIterator<String> for AttrOptions {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Attribute type plus options: the unit that carries independent history.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttrKey {
    pub name: AttrName,
    pub options: AttrOptions,
}

impl AttrKey {
    pub fn new(name: AttrName, options: AttrOptions) -> Self {
        Self { name, options }
    }

    pub fn plain(name: AttrName) -> Self {
        Self {
            name,
            options: AttrOptions::none(),
        }
    }
}

/// What conflict resolution needs to know about an attribute type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrTypeDescriptor {
    pub single_valued: bool,
}

impl AttrTypeDescriptor {
    pub fn multi_valued() -> Self {
        Self {
            single_valued: false,
        }
    }

    pub fn single_valued() -> Self {
        Self {
            single_valued: true,
        }
    }
}

/// Attribute type registry.
///
/// Unknown names resolve to a default multi-valued descriptor so that
/// historical markers referencing types no longer in the schema still
/// decode; the caller may log them for the repair tool.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    types: BTreeMap<AttrName, AttrTypeDescriptor>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: AttrName, descriptor: AttrTypeDescriptor) {
        self.types.insert(name, descriptor);
    }

    pub fn is_known(&self, name: &AttrName) -> bool {
        self.types.contains_key(name)
    }

    pub fn descriptor(&self, name: &AttrName) -> AttrTypeDescriptor {
        self.types
            .get(name)
            .copied()
            .unwrap_or_else(AttrTypeDescriptor::multi_valued)
    }
}
