//! Layer 7: per-entry historical information and conflict-resolution
//! orchestration.
//!
//! One [`EntryHistorical`] is decoded from an entry's historical attribute
//! at the start of a commit, mutated as the commit's operations are
//! resolved, re-encoded (with purge applied) and written back before the
//! commit lands. Unloaded -> loaded -> mutated -> encoded, no interleaving:
//! the storage layer serializes commits per entry, this type does no
//! locking of its own.

use std::collections::BTreeMap;
use std::time::Duration;

use super::attr_hist::AttrHistoricalWithOptions;
use super::csn::{Csn, WallClock};
use super::entry::Entry;
use super::error::DecodeError;
use super::modify::{ModType, Modification, ModifyOp};
use super::schema::{AttrKey, AttrName, Schema};
use super::wire::{HistKey, HistoricalValue};

/// Name of the operational attribute storing historical information.
pub const HISTORICAL_ATTR: &str = "ds-sync-hist";

pub fn historical_attr_key() -> AttrKey {
    AttrKey::plain(
        AttrName::parse(HISTORICAL_ATTR).expect("historical attribute name is valid"),
    )
}

pub fn is_historical_attr(name: &AttrName) -> bool {
    name.as_str() == HISTORICAL_ATTR
}

/// Outcome of a best-effort decode of an entry's historical attribute.
///
/// Malformed values never abort a load; they are collected here so the
/// caller can surface them for the repair tool.
#[derive(Clone, Debug, Default)]
pub struct DecodeReport {
    pub decoded: usize,
    pub skipped: Vec<(String, DecodeError)>,
}

impl DecodeReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Historical information of one entry: when it was created and last
/// renamed, plus per-attribute change history.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryHistorical {
    purge_delay: Option<Duration>,
    entry_add: Option<Csn>,
    entry_rename: Option<Csn>,
    attrs: BTreeMap<AttrName, AttrHistoricalWithOptions>,
    oldest_csn: Option<Csn>,
    last_purged_count: usize,
}

impl EntryHistorical {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retention for historical information; `None` never purges.
    pub fn set_purge_delay(&mut self, purge_delay: Option<Duration>) {
        self.purge_delay = purge_delay;
    }

    /// Decode the historical attribute of `entry`. Returns an empty object
    /// when the attribute is absent; malformed values are logged and
    /// skipped.
    pub fn load(entry: &Entry, schema: &Schema) -> Self {
        Self::load_with_report(entry, schema).0
    }

    pub fn load_with_report(entry: &Entry, schema: &Schema) -> (Self, DecodeReport) {
        let mut hist = Self::new();
        let mut report = DecodeReport::default();
        let Some(values) = entry.get(&historical_attr_key()) else {
            return (hist, report);
        };
        for raw in values {
            match HistoricalValue::decode(raw) {
                Err(err) => {
                    tracing::warn!(
                        dn = %entry.dn(),
                        value = %raw,
                        error = %err,
                        "skipping malformed historical value"
                    );
                    report.skipped.push((raw.clone(), err));
                }
                Ok(decoded) => {
                    hist.update_oldest(decoded.csn());
                    report.decoded += 1;
                    match decoded {
                        HistoricalValue::EntryAdd { csn } => hist.entry_add = Some(csn),
                        HistoricalValue::EntryRename { csn } => hist.entry_rename = Some(csn),
                        HistoricalValue::AttrValue {
                            attr,
                            options,
                            csn,
                            key,
                            value,
                        } => {
                            if !schema.is_known(&attr) {
                                tracing::debug!(
                                    dn = %entry.dn(),
                                    attr = %attr,
                                    "historical marker references an attribute type \
                                     missing from the schema"
                                );
                            }
                            let descriptor = schema.descriptor(&attr);
                            hist.attrs
                                .entry(attr)
                                .or_default()
                                .get_or_create(options, descriptor)
                                .assign(key, value.as_deref(), &csn);
                        }
                    }
                }
            }
        }
        (hist, report)
    }

    /// Resolve a replicated modify operation against recorded history.
    ///
    /// The operation's modification list is rewritten in place: changes
    /// that lost are removed or adjusted. Returns true when any requested
    /// change lost to newer recorded history.
    pub fn replay_modify(&mut self, op: &mut ModifyOp, entry: &Entry, schema: &Schema) -> bool {
        let csn = op.csn;
        let mut conflict = false;
        op.mods.retain_mut(|m| {
            if is_historical_attr(&m.attr.name) {
                // never track history of the historical attribute itself
                return true;
            }
            let descriptor = schema.descriptor(&m.attr.name);
            let verdict = self
                .attrs
                .entry(m.attr.name.clone())
                .or_default()
                .get_or_create(m.attr.options.clone(), descriptor)
                .replay(m, &csn, entry);
            conflict |= verdict.conflict;
            verdict.keep
        });
        self.update_oldest(&csn);
        conflict
    }

    /// Record a local (or already-resolved) modify unconditionally: local
    /// changes always win at their point of origin.
    pub fn record_modify(&mut self, op: &ModifyOp, schema: &Schema) {
        for m in &op.mods {
            if is_historical_attr(&m.attr.name) {
                continue;
            }
            let descriptor = schema.descriptor(&m.attr.name);
            self.attrs
                .entry(m.attr.name.clone())
                .or_default()
                .get_or_create(m.attr.options.clone(), descriptor)
                .process_local(&op.csn, m);
        }
        self.update_oldest(&op.csn);
    }

    pub fn record_rename(&mut self, csn: Csn) {
        self.entry_rename = Some(csn);
        self.update_oldest(&csn);
    }

    /// Fold the updated historical state back into a modify operation and
    /// the entry: local changes are recorded first, then the re-encoded
    /// attribute is appended as a replace and written through.
    pub fn attach_to_modify(
        &mut self,
        op: &mut ModifyOp,
        entry: &mut Entry,
        schema: &Schema,
        now: WallClock,
    ) {
        if !op.replicated {
            self.record_modify(op, schema);
        }
        let values = self.encode_and_purge(now);
        op.mods.push(Modification::new(
            historical_attr_key(),
            ModType::Replace,
            values.clone(),
        ));
        entry.set(historical_attr_key(), values);
    }

    /// Same as [`EntryHistorical::attach_to_modify`] for a rename: records
    /// the rename time and writes the re-encoded attribute through.
    pub fn attach_to_rename(
        &mut self,
        csn: Csn,
        mods: &mut Vec<Modification>,
        entry: &mut Entry,
        now: WallClock,
    ) {
        self.record_rename(csn);
        let values = self.encode_and_purge(now);
        mods.push(Modification::new(
            historical_attr_key(),
            ModType::Replace,
            values.clone(),
        ));
        entry.set(historical_attr_key(), values);
    }

    /// Stamp a newly added entry with its creation marker. The marker is
    /// all the history an add needs; it seeds fake-operation replay.
    pub fn attach_to_add(csn: &Csn, entry: &mut Entry) {
        let marker = HistoricalValue::EntryAdd { csn: *csn }.to_string();
        entry.set(historical_attr_key(), vec![marker]);
    }

    /// Serialize into the historical attribute's values, purging anything
    /// whose CSN timestamp is strictly older than `now` minus the purge
    /// delay.
    ///
    /// Purged items are removed from the in-memory structure, so calling
    /// this again with no intervening mutation purges nothing. Call once
    /// per commit, after all of the commit's modifications were applied.
    pub fn encode_and_purge(&mut self, now: WallClock) -> Vec<String> {
        let mut purged = 0;
        if let Some(delay) = self.purge_delay {
            let horizon = now.0.saturating_sub(delay.as_millis() as u64);
            if self.entry_add.is_some_and(|c| c.time_ms() < horizon) {
                self.entry_add = None;
                purged += 1;
            }
            if self.entry_rename.is_some_and(|c| c.time_ms() < horizon) {
                self.entry_rename = None;
                purged += 1;
            }
            for with_options in self.attrs.values_mut() {
                for (_, hist) in with_options.iter_mut() {
                    purged += hist.purge_older_than(horizon);
                }
                with_options.prune_empty();
            }
            self.attrs.retain(|_, with_options| !with_options.is_empty());
        }
        self.last_purged_count = purged;

        let mut out = Vec::new();
        for (name, with_options) in &self.attrs {
            for (options, hist) in with_options.iter() {
                // An attribute-level delete folds into a single repl marker
                // when a value's update carries the same CSN; otherwise it
                // is encoded as its own attrDel marker.
                let mut attr_del = hist.delete_time().copied();
                for view in hist.value_entries() {
                    if let Some(delete_time) = view.delete_time {
                        out.push(
                            HistoricalValue::AttrValue {
                                attr: name.clone(),
                                options: options.clone(),
                                csn: *delete_time,
                                key: HistKey::Del,
                                value: view.value.map(str::to_string),
                            }
                            .to_string(),
                        );
                    } else if let Some(update_time) = view.update_time {
                        let key = if attr_del == Some(*update_time) && view.value.is_some() {
                            attr_del = None;
                            HistKey::Repl
                        } else {
                            HistKey::Add
                        };
                        out.push(
                            HistoricalValue::AttrValue {
                                attr: name.clone(),
                                options: options.clone(),
                                csn: *update_time,
                                key,
                                value: view.value.map(str::to_string),
                            }
                            .to_string(),
                        );
                    }
                }
                if let Some(delete_time) = attr_del {
                    out.push(
                        HistoricalValue::AttrValue {
                            attr: name.clone(),
                            options: options.clone(),
                            csn: delete_time,
                            key: HistKey::AttrDel,
                            value: None,
                        }
                        .to_string(),
                    );
                }
            }
        }
        if let Some(csn) = self.entry_add {
            out.push(HistoricalValue::EntryAdd { csn }.to_string());
        }
        if let Some(csn) = self.entry_rename {
            out.push(HistoricalValue::EntryRename { csn }.to_string());
        }
        out
    }

    /// True when the entry was added or renamed strictly after `csn`: an
    /// operation that old references a position this entry no longer holds.
    pub fn added_or_renamed_after(&self, csn: &Csn) -> bool {
        csn.is_older_than(self.entry_add.as_ref()) || csn.is_older_than(self.entry_rename.as_ref())
    }

    /// The last time the entry's DN changed: the newer of add and rename
    /// time.
    pub fn dn_date(&self) -> Option<&Csn> {
        match (self.entry_add.as_ref(), self.entry_rename.as_ref()) {
            (Some(add), Some(rename)) => Some(if rename > add { rename } else { add }),
            (add, rename) => add.or(rename),
        }
    }

    pub fn entry_add_time(&self) -> Option<&Csn> {
        self.entry_add.as_ref()
    }

    pub fn entry_rename_time(&self) -> Option<&Csn> {
        self.entry_rename.as_ref()
    }

    /// The earliest change still represented here. `None` for an entry
    /// without history and after everything was purged.
    ///
    /// The replication layer aggregates this across entries to compute a
    /// safe replay horizon.
    pub fn oldest_csn(&self) -> Option<&Csn> {
        self.oldest_csn.as_ref()
    }

    /// How many historical items the last [`EntryHistorical::encode_and_purge`]
    /// call dropped, for monitoring.
    pub fn last_purged_count(&self) -> usize {
        self.last_purged_count
    }

    pub fn attribute_history(&self, name: &AttrName) -> Option<&AttrHistoricalWithOptions> {
        self.attrs.get(name)
    }

    fn update_oldest(&mut self, csn: &Csn) {
        if self.oldest_csn.map_or(true, |oldest| *csn < oldest) {
            self.oldest_csn = Some(*csn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::csn::ReplicaId;
    use crate::core::schema::AttrTypeDescriptor;

    fn csn(time: u64, seq: u32, replica: u32) -> Csn {
        Csn::new(time, seq, ReplicaId(replica))
    }

    fn schema() -> Schema {
        let mut schema = Schema::new();
        schema.define(
            AttrName::parse("description").expect("valid"),
            AttrTypeDescriptor::multi_valued(),
        );
        schema.define(
            AttrName::parse("mail").expect("valid"),
            AttrTypeDescriptor::multi_valued(),
        );
        schema.define(
            AttrName::parse("cn").expect("valid"),
            AttrTypeDescriptor::single_valued(),
        );
        schema
    }

    fn entry_with_history(values: Vec<String>) -> Entry {
        let mut entry = Entry::new("uid=jdoe,dc=example,dc=com");
        entry.set(historical_attr_key(), values);
        entry
    }

    #[test]
    fn load_of_entry_without_history_is_empty() {
        let entry = Entry::new("uid=jdoe,dc=example,dc=com");
        let (hist, report) = EntryHistorical::load_with_report(&entry, &schema());
        assert_eq!(hist, EntryHistorical::new());
        assert!(report.is_clean());
        assert_eq!(report.decoded, 0);
        assert!(hist.oldest_csn().is_none());
    }

    #[test]
    fn load_skips_malformed_values_and_keeps_the_rest() {
        let good = csn(100, 1, 1);
        let entry = entry_with_history(vec![
            format!("dn:{good}:add"),
            "garbage-without-fields".to_string(),
            format!("description:{good}:add:kept"),
        ]);
        let (hist, report) = EntryHistorical::load_with_report(&entry, &schema());
        assert_eq!(report.decoded, 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(hist.entry_add_time(), Some(&good));
        assert!(hist
            .attribute_history(&AttrName::parse("description").expect("valid"))
            .is_some());
    }

    #[test]
    fn encode_decode_roundtrip_preserves_state() {
        let schema = schema();
        let mut entry = Entry::new("uid=jdoe,dc=example,dc=com");
        let mut hist = EntryHistorical::new();

        let mut op = ModifyOp::local(
            entry.dn().to_string(),
            csn(100, 1, 1),
            vec![
                Modification::new(
                    AttrKey::plain(AttrName::parse("mail").expect("valid")),
                    ModType::Add,
                    vec!["a@b.com".into(), "c@d.com".into()],
                ),
                Modification::new(
                    AttrKey::plain(AttrName::parse("description").expect("valid")),
                    ModType::Replace,
                    vec!["hello".into()],
                ),
            ],
        );
        hist.record_rename(csn(90, 1, 1));
        hist.attach_to_modify(&mut op, &mut entry, &schema, WallClock(1_000));

        let reloaded = EntryHistorical::load(&entry, &schema);
        assert_eq!(reloaded.entry_rename_time(), hist.entry_rename_time());
        assert_eq!(reloaded.oldest_csn(), hist.oldest_csn());
        assert_eq!(
            reloaded.attribute_history(&AttrName::parse("mail").expect("valid")),
            hist.attribute_history(&AttrName::parse("mail").expect("valid"))
        );
        assert_eq!(
            reloaded.attribute_history(&AttrName::parse("description").expect("valid")),
            hist.attribute_history(&AttrName::parse("description").expect("valid"))
        );
    }

    #[test]
    fn replace_folds_into_a_single_repl_marker() {
        // a replace stamps the attribute delete and the new value's update
        // with the same CSN; the encoder must collapse the pair into one
        // repl marker and not emit a separate attrDel
        let schema = schema();
        let mut entry = Entry::new("uid=jdoe,dc=example,dc=com");
        let mut hist = EntryHistorical::new();
        let stamp = csn(100, 1, 1);

        let mut op = ModifyOp::local(
            entry.dn().to_string(),
            stamp,
            vec![Modification::new(
                AttrKey::plain(AttrName::parse("description").expect("valid")),
                ModType::Replace,
                vec!["hello".into()],
            )],
        );
        hist.attach_to_modify(&mut op, &mut entry, &schema, WallClock(1_000));

        let values = entry
            .get(&historical_attr_key())
            .expect("history present")
            .to_vec();
        assert_eq!(values, vec![format!("description:{stamp}:repl:hello")]);
    }

    #[test]
    fn purge_drops_only_items_older_than_the_horizon() {
        let schema = schema();
        let old = csn(1_000, 1, 1);
        let boundary = csn(5_000, 1, 1);
        let fresh = csn(9_000, 1, 1);
        let entry = entry_with_history(vec![
            format!("description:{old}:add:ancient"),
            format!("description:{boundary}:add:boundary"),
            format!("mail:{fresh}:add:a@b.com"),
            format!("dn:{old}:add"),
        ]);
        let mut hist = EntryHistorical::load(&entry, &schema);
        hist.set_purge_delay(Some(Duration::from_millis(5_000)));

        // horizon = 10_000 - 5_000 = 5_000; `old` is purged, the boundary
        // CSN (timestamp == horizon) and `fresh` stay
        let values = hist.encode_and_purge(WallClock(10_000));
        assert_eq!(hist.last_purged_count(), 2);
        assert!(values.iter().any(|v| v.contains("boundary")));
        assert!(values.iter().any(|v| v.contains("a@b.com")));
        assert!(!values.iter().any(|v| v.contains("ancient")));
        assert!(!values.iter().any(|v| v.starts_with("dn:")));

        // nothing left to purge on the second call
        let again = hist.encode_and_purge(WallClock(10_000));
        assert_eq!(hist.last_purged_count(), 0);
        assert_eq!(again.len(), values.len());
    }

    #[test]
    fn zero_purge_delay_never_purges() {
        let schema = schema();
        let old = csn(1, 1, 1);
        let entry = entry_with_history(vec![format!("description:{old}:add:kept")]);
        let mut hist = EntryHistorical::load(&entry, &schema);
        hist.set_purge_delay(None);
        let values = hist.encode_and_purge(WallClock(u64::MAX));
        assert_eq!(hist.last_purged_count(), 0);
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn added_or_renamed_after_compares_both_markers() {
        let schema = schema();
        let entry = entry_with_history(vec![
            format!("dn:{}:add", csn(100, 1, 1)),
            format!("dn:{}:moddn", csn(300, 1, 1)),
        ]);
        let hist = EntryHistorical::load(&entry, &schema);

        assert!(hist.added_or_renamed_after(&csn(50, 1, 1)));
        assert!(hist.added_or_renamed_after(&csn(200, 1, 1)));
        assert!(!hist.added_or_renamed_after(&csn(400, 1, 1)));
        assert_eq!(hist.dn_date(), Some(&csn(300, 1, 1)));
    }

    #[test]
    fn conflict_scenario_delete_loses_to_newer_update() {
        let schema = schema();
        let update = csn(100, 1, 1);
        let mut entry = entry_with_history(vec![format!("description:{update}:add:X")]);
        entry.set(
            AttrKey::plain(AttrName::parse("description").expect("valid")),
            vec!["X".into()],
        );
        let mut hist = EntryHistorical::load(&entry, &schema);

        let mut op = ModifyOp::replicated(
            entry.dn().to_string(),
            csn(50, 1, 2),
            vec![Modification::new(
                AttrKey::plain(AttrName::parse("description").expect("valid")),
                ModType::Delete,
                vec!["X".into()],
            )],
        );
        let conflict = hist.replay_modify(&mut op, &entry, &schema);

        assert!(conflict);
        assert!(op.mods.is_empty());
        assert!(entry.has_value(
            &AttrKey::plain(AttrName::parse("description").expect("valid")),
            "X"
        ));
    }

    #[test]
    fn oldest_csn_tracks_the_minimum_across_mutations() {
        let schema = schema();
        let mut hist = EntryHistorical::new();
        let op_new = ModifyOp::replicated(
            "uid=jdoe,dc=example,dc=com",
            csn(200, 1, 1),
            vec![Modification::new(
                AttrKey::plain(AttrName::parse("mail").expect("valid")),
                ModType::Add,
                vec!["a@b.com".into()],
            )],
        );
        hist.record_modify(&op_new, &schema);
        assert_eq!(hist.oldest_csn(), Some(&csn(200, 1, 1)));

        // an older replicated change arriving late still lowers the bound
        let mut op_old = ModifyOp::replicated(
            "uid=jdoe,dc=example,dc=com",
            csn(100, 1, 2),
            vec![Modification::new(
                AttrKey::plain(AttrName::parse("mail").expect("valid")),
                ModType::Add,
                vec!["c@d.com".into()],
            )],
        );
        let entry = Entry::new("uid=jdoe,dc=example,dc=com");
        hist.replay_modify(&mut op_old, &entry, &schema);
        assert_eq!(hist.oldest_csn(), Some(&csn(100, 1, 2)));
    }
}
