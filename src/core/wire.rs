//! Layer 5: textual grammar of the historical attribute.
//!
//! Each value of the historical attribute is one marker:
//!
//! ```text
//! description:00000108b3a655410000001f00000001:add:added_value
//! description:00000108b3a6cbb80000002000000001:del:deleted_value
//! description;fr:00000108b3a6cbb80000002000000001:repl:new_value
//! description:00000108b3a6cbb80000002000000001:attrDel
//! dn:00000108b3a655410000001f00000001:add      (entry created)
//! dn:00000108b3a655410000001f00000001:moddn    (entry renamed)
//! ```
//!
//! Ordering of markers within the attribute is not significant; decode
//! tolerates arbitrary order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::csn::Csn;
use super::error::DecodeError;
use super::modify::{ModType, Modification};
use super::schema::{AttrKey, AttrName, AttrOptions};

/// Kind of change recorded by an attribute marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistKey {
    /// A value was added.
    Add,
    /// A value was deleted.
    Del,
    /// The attribute was replaced with a value.
    Repl,
    /// The whole attribute was deleted.
    AttrDel,
}

impl HistKey {
    pub fn as_str(self) -> &'static str {
        match self {
            HistKey::Add => "add",
            HistKey::Del => "del",
            HistKey::Repl => "repl",
            HistKey::AttrDel => "attrDel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "add" => Some(HistKey::Add),
            "del" => Some(HistKey::Del),
            "repl" => Some(HistKey::Repl),
            "attrDel" => Some(HistKey::AttrDel),
            _ => None,
        }
    }
}

impl fmt::Display for HistKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded value of the historical attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HistoricalValue {
    /// `dn:<csn>:add`: when the entry was created.
    EntryAdd { csn: Csn },
    /// `dn:<csn>:moddn`: when the entry was last renamed.
    EntryRename { csn: Csn },
    /// `<attr>[;option]*:<csn>:<key>[:<value>]`: one change to one
    /// attribute value (or to the whole attribute for `attrDel`).
    AttrValue {
        attr: AttrName,
        options: AttrOptions,
        csn: Csn,
        key: HistKey,
        value: Option<String>,
    },
}

impl HistoricalValue {
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let mut fields = raw.splitn(4, ':');
        let head = fields.next().unwrap_or_default();
        let csn_text = fields.next().ok_or_else(|| DecodeError::TooFewFields {
            raw: raw.to_string(),
        })?;
        let key_text = fields.next().ok_or_else(|| DecodeError::TooFewFields {
            raw: raw.to_string(),
        })?;
        let tail = fields.next();

        let csn = Csn::from_str(csn_text).map_err(|source| DecodeError::BadCsn {
            raw: raw.to_string(),
            source,
        })?;

        if head == "dn" {
            return match key_text {
                "add" => Ok(HistoricalValue::EntryAdd { csn }),
                "moddn" => Ok(HistoricalValue::EntryRename { csn }),
                other => Err(DecodeError::UnknownEntryOp {
                    raw: raw.to_string(),
                    op: other.to_string(),
                }),
            };
        }

        let mut segments = head.split(';');
        let name_text = segments.next().unwrap_or_default();
        let attr = AttrName::parse(name_text).map_err(|source| DecodeError::BadAttrName {
            raw: raw.to_string(),
            source,
        })?;
        let options: AttrOptions = segments
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        let key = HistKey::parse(key_text).ok_or_else(|| DecodeError::UnknownKey {
            raw: raw.to_string(),
            key: key_text.to_string(),
        })?;
        let value = match key {
            HistKey::AttrDel => None,
            _ => tail.map(String::from),
        };

        Ok(HistoricalValue::AttrValue {
            attr,
            options,
            csn,
            key,
            value,
        })
    }

    pub fn csn(&self) -> &Csn {
        match self {
            HistoricalValue::EntryAdd { csn }
            | HistoricalValue::EntryRename { csn }
            | HistoricalValue::AttrValue { csn, .. } => csn,
        }
    }

    /// The modification equivalent to this marker, used when replaying
    /// history as synthetic operations. Entry markers have no modification
    /// form.
    pub fn to_modification(&self) -> Option<Modification> {
        let HistoricalValue::AttrValue {
            attr,
            options,
            key,
            value,
            ..
        } = self
        else {
            return None;
        };
        let attr_key = AttrKey::new(attr.clone(), options.clone());
        let values: Vec<String> = value.iter().cloned().collect();
        let mod_type = match key {
            HistKey::Add => ModType::Add,
            HistKey::Del | HistKey::AttrDel => ModType::Delete,
            HistKey::Repl => ModType::Replace,
        };
        Some(Modification::new(attr_key, mod_type, values))
    }
}

impl fmt::Display for HistoricalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoricalValue::EntryAdd { csn } => write!(f, "dn:{csn}:add"),
            HistoricalValue::EntryRename { csn } => write!(f, "dn:{csn}:moddn"),
            HistoricalValue::AttrValue {
                attr,
                options,
                csn,
                key,
                value,
            } => {
                write!(f, "{attr}{}:{csn}:{key}", options.wire_suffix())?;
                if let Some(value) = value {
                    write!(f, ":{value}")?;
                }
                Ok(())
            }
        }
    }
}
