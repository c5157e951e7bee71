//! Layer 8: synthetic operations reconstructed from historical state.
//!
//! When a replica cannot find a peer holding all of its changes (after a
//! crash, typically), it rebuilds equivalent operations from the historical
//! attribute of its entries and replays those instead of the original wire
//! messages. Replaying the returned sequence in order reproduces the
//! entry's current state from an empty starting point.

use std::collections::BTreeMap;

use super::csn::Csn;
use super::entry::Entry;
use super::entry_hist::historical_attr_key;
use super::modify::Modification;
use super::wire::HistoricalValue;

/// The entry was created at `csn`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FakeAdd {
    pub csn: Csn,
    pub dn: String,
    pub entry_uuid: String,
}

/// The entry was renamed at `csn`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FakeRename {
    pub csn: Csn,
    pub dn: String,
}

/// All attribute changes the entry recorded at `csn`, merged into one
/// modify.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FakeModify {
    pub csn: Csn,
    pub dn: String,
    pub entry_uuid: String,
    pub mods: Vec<Modification>,
}

/// One reconstructed operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FakeOp {
    Add(FakeAdd),
    Rename(FakeRename),
    Modify(FakeModify),
}

impl FakeOp {
    pub fn csn(&self) -> &Csn {
        match self {
            FakeOp::Add(op) => &op.csn,
            FakeOp::Rename(op) => &op.csn,
            FakeOp::Modify(op) => &op.csn,
        }
    }
}

/// Rebuild the operations that produced this entry's recorded history,
/// sorted ascending by CSN. Attribute markers sharing a CSN merge into a
/// single modify; malformed markers are logged and skipped.
pub fn generate_fake_operations(entry: &Entry) -> Vec<FakeOp> {
    let mut ops: BTreeMap<Csn, FakeOp> = BTreeMap::new();
    let Some(values) = entry.get(&historical_attr_key()) else {
        return Vec::new();
    };
    for raw in values {
        let decoded = match HistoricalValue::decode(raw) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::warn!(
                    dn = %entry.dn(),
                    value = %raw,
                    error = %err,
                    "skipping malformed historical value"
                );
                continue;
            }
        };
        match decoded {
            HistoricalValue::EntryAdd { csn } => {
                ops.insert(
                    csn,
                    FakeOp::Add(FakeAdd {
                        csn,
                        dn: entry.dn().to_string(),
                        entry_uuid: entry.uuid(),
                    }),
                );
            }
            HistoricalValue::EntryRename { csn } => {
                ops.insert(
                    csn,
                    FakeOp::Rename(FakeRename {
                        csn,
                        dn: entry.dn().to_string(),
                    }),
                );
            }
            attr_value @ HistoricalValue::AttrValue { .. } => {
                let csn = *attr_value.csn();
                let Some(modification) = attr_value.to_modification() else {
                    continue;
                };
                match ops.get_mut(&csn) {
                    Some(FakeOp::Modify(existing)) => existing.mods.push(modification),
                    _ => {
                        ops.insert(
                            csn,
                            FakeOp::Modify(FakeModify {
                                csn,
                                dn: entry.dn().to_string(),
                                entry_uuid: entry.uuid(),
                                mods: vec![modification],
                            }),
                        );
                    }
                }
            }
        }
    }
    ops.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::csn::ReplicaId;
    use crate::core::entry::ENTRYUUID_ATTR;
    use crate::core::modify::ModType;
    use crate::core::schema::{AttrKey, AttrName};

    fn csn(time: u64, seq: u32, replica: u32) -> Csn {
        Csn::new(time, seq, ReplicaId(replica))
    }

    fn key(name: &str) -> AttrKey {
        AttrKey::plain(AttrName::parse(name).expect("valid name"))
    }

    #[test]
    fn add_then_merged_modify_in_csn_order() {
        let add_stamp = csn(100, 1, 1);
        let mod_stamp = csn(200, 1, 2);
        let mut entry = Entry::new("uid=jdoe,dc=example,dc=com");
        entry.set(
            key(ENTRYUUID_ATTR),
            vec!["8cbd4d1e-9f6b-44f2-a580-2b5ed8a1ab4c".into()],
        );
        // markers deliberately out of order: decode must not care
        entry.set(
            historical_attr_key(),
            vec![
                format!("mail:{mod_stamp}:add:a@b.com"),
                format!("dn:{add_stamp}:add"),
                format!("description:{mod_stamp}:repl:hello"),
            ],
        );

        let ops = generate_fake_operations(&entry);
        assert_eq!(ops.len(), 2);
        match &ops[0] {
            FakeOp::Add(add) => {
                assert_eq!(add.csn, add_stamp);
                assert_eq!(add.entry_uuid, "8cbd4d1e-9f6b-44f2-a580-2b5ed8a1ab4c");
            }
            other => panic!("expected add first, got {other:?}"),
        }
        match &ops[1] {
            FakeOp::Modify(modify) => {
                assert_eq!(modify.csn, mod_stamp);
                assert_eq!(modify.mods.len(), 2);
                let types: Vec<ModType> = modify.mods.iter().map(|m| m.mod_type).collect();
                assert!(types.contains(&ModType::Add));
                assert!(types.contains(&ModType::Replace));
            }
            other => panic!("expected merged modify second, got {other:?}"),
        }
    }

    #[test]
    fn rename_marker_becomes_fake_rename() {
        let stamp = csn(100, 1, 1);
        let mut entry = Entry::new("uid=jdoe,dc=example,dc=com");
        entry.set(historical_attr_key(), vec![format!("dn:{stamp}:moddn")]);
        let ops = generate_fake_operations(&entry);
        assert_eq!(
            ops,
            vec![FakeOp::Rename(FakeRename {
                csn: stamp,
                dn: "uid=jdoe,dc=example,dc=com".to_string(),
            })]
        );
    }

    #[test]
    fn missing_entryuuid_derives_a_stable_substitute() {
        let stamp = csn(100, 1, 1);
        let mut entry = Entry::new("uid=jdoe,dc=example,dc=com");
        entry.set(historical_attr_key(), vec![format!("dn:{stamp}:add")]);

        let first = generate_fake_operations(&entry);
        let second = generate_fake_operations(&entry);
        let FakeOp::Add(a) = &first[0] else {
            panic!("expected add");
        };
        let FakeOp::Add(b) = &second[0] else {
            panic!("expected add");
        };
        assert_eq!(a.entry_uuid, b.entry_uuid);
        assert!(!a.entry_uuid.is_empty());
    }

    #[test]
    fn malformed_markers_are_skipped() {
        let stamp = csn(100, 1, 1);
        let mut entry = Entry::new("uid=jdoe,dc=example,dc=com");
        entry.set(
            historical_attr_key(),
            vec!["not-a-marker".to_string(), format!("dn:{stamp}:add")],
        );
        let ops = generate_fake_operations(&entry);
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn entry_without_history_yields_nothing() {
        let entry = Entry::new("uid=jdoe,dc=example,dc=com");
        assert!(generate_fake_operations(&entry).is_empty());
    }
}
