//! Layer 6: per-attribute history and the conflict-resolution algorithm.
//!
//! One [`AttrHistorical`] exists per (attribute type, option set) touched on
//! an entry. It decides, value by value, whether an incoming change wins
//! against recorded history: a change loses when the recorded time for the
//! value it touches is not older than the change's CSN. Resolution is a pure
//! function of (stored CSN, incoming CSN) pairs under a total order, which
//! is what makes replicas converge regardless of delivery order.
//!
//! The common case is no conflict, so the paths are ordered for it:
//! detecting a potential conflict first, fast recording of non-conflicting
//! changes second, conflict repair last.

use std::collections::BTreeMap;

use super::csn::Csn;
use super::entry::Entry;
use super::modify::{ModType, Modification};
use super::schema::{AttrOptions, AttrTypeDescriptor};
use super::value_hist::AttrValueHistorical;
use super::wire::HistKey;

/// Result of replaying one modification against recorded history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplayVerdict {
    /// At least one requested change lost to newer recorded history.
    pub conflict: bool,
    /// The modification still carries an effect and stays in the operation.
    pub keep: bool,
}

impl ReplayVerdict {
    fn kept(conflict: bool) -> Self {
        Self {
            conflict,
            keep: true,
        }
    }

    fn dropped(conflict: bool) -> Self {
        Self {
            conflict,
            keep: false,
        }
    }
}

/// Borrowed view of one value's history, used when encoding.
#[derive(Clone, Copy, Debug)]
pub struct ValueHistView<'a> {
    pub value: Option<&'a str>,
    pub update_time: Option<&'a Csn>,
    pub delete_time: Option<&'a Csn>,
}

/// History of one attribute within one option set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttrHistorical {
    Single(AttrHistoricalSingle),
    Multiple(AttrHistoricalMultiple),
}

impl AttrHistorical {
    pub fn for_descriptor(descriptor: AttrTypeDescriptor) -> Self {
        if descriptor.single_valued {
            AttrHistorical::Single(AttrHistoricalSingle::default())
        } else {
            AttrHistorical::Multiple(AttrHistoricalMultiple::default())
        }
    }

    /// Last time the whole attribute was deleted.
    pub fn delete_time(&self) -> Option<&Csn> {
        match self {
            AttrHistorical::Single(h) => h.delete_time.as_ref(),
            AttrHistorical::Multiple(h) => h.delete_time.as_ref(),
        }
    }

    /// Resolve a replicated modification against this history, rewriting it
    /// in place.
    pub fn replay(&mut self, m: &mut Modification, csn: &Csn, entry: &Entry) -> ReplayVerdict {
        match self {
            AttrHistorical::Single(h) => h.replay(m, csn),
            AttrHistorical::Multiple(h) => h.replay(m, csn, entry),
        }
    }

    /// Record a local or already-resolved modification. No conflict checks:
    /// the caller guarantees the change wins.
    pub fn process_local(&mut self, csn: &Csn, m: &Modification) {
        match self {
            AttrHistorical::Single(h) => h.process_local(csn, m),
            AttrHistorical::Multiple(h) => h.process_local(csn, m),
        }
    }

    /// Feed one decoded historical marker back into the in-memory form.
    pub fn assign(&mut self, key: HistKey, value: Option<&str>, csn: &Csn) {
        match self {
            AttrHistorical::Single(h) => h.assign(key, value, csn),
            AttrHistorical::Multiple(h) => h.assign(key, value, csn),
        }
    }

    pub fn value_entries(&self) -> Vec<ValueHistView<'_>> {
        match self {
            AttrHistorical::Single(h) => h.value_entries(),
            AttrHistorical::Multiple(h) => h.value_entries(),
        }
    }

    /// Drop recorded times whose CSN timestamp is strictly older than the
    /// horizon. Returns how many were purged.
    pub(crate) fn purge_older_than(&mut self, horizon_ms: u64) -> usize {
        match self {
            AttrHistorical::Single(h) => h.purge_older_than(horizon_ms),
            AttrHistorical::Multiple(h) => h.purge_older_than(horizon_ms),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            AttrHistorical::Single(h) => h.is_empty(),
            AttrHistorical::Multiple(h) => h.is_empty(),
        }
    }
}

/// History of a multi-valued attribute: attribute-level delete time plus one
/// [`AttrValueHistorical`] per touched value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttrHistoricalMultiple {
    delete_time: Option<Csn>,
    last_update_time: Option<Csn>,
    values: BTreeMap<String, AttrValueHistorical>,
}

impl AttrHistoricalMultiple {
    pub fn value_history(&self, value: &str) -> Option<&AttrValueHistorical> {
        self.values.get(value)
    }

    fn replay(&mut self, m: &mut Modification, csn: &Csn, entry: &Entry) -> ReplayVerdict {
        // Common fast path: a replace at least as recent as everything
        // recorded here cannot conflict.
        if m.mod_type == ModType::Replace && !csn.is_older_than(self.last_update_time.as_ref()) {
            self.process_local(csn, m);
            return ReplayVerdict::kept(false);
        }
        match m.mod_type {
            ModType::Delete => self.replay_delete(m, csn, entry),
            ModType::Add => self.replay_add(m, csn),
            ModType::Replace => self.replay_replace(m, csn),
        }
    }

    fn replay_delete(&mut self, m: &mut Modification, csn: &Csn, entry: &Entry) -> ReplayVerdict {
        if csn.is_older_than(self.delete_time.as_ref()) {
            // obsoleted by a more recent delete of the whole attribute
            return ReplayVerdict::dropped(true);
        }
        if m.values.is_empty() {
            // Rewrite the attribute delete into a replace keeping every
            // value updated after the delete time.
            let kept = self.delete_keeping_newer(csn);
            let conflict = !kept.is_empty();
            m.mod_type = ModType::Replace;
            m.values = kept;
            ReplayVerdict::kept(conflict)
        } else {
            self.replay_delete_values(m, csn, entry)
        }
    }

    fn replay_delete_values(
        &mut self,
        m: &mut Modification,
        csn: &Csn,
        entry: &Entry,
    ) -> ReplayVerdict {
        let mut conflict = false;
        let mut remaining = Vec::with_capacity(m.values.len());
        for value in m.values.drain(..) {
            let mut delete_it = true;
            let mut added_in_op = false;
            match self.values.get(&value) {
                Some(old) => {
                    added_in_op = old.update_time.as_ref() == Some(csn);
                    let newer_update = csn.is_older_than(old.update_time.as_ref());
                    let newer_delete = csn.is_older_than(old.delete_time.as_ref());
                    if !newer_update && !newer_delete {
                        self.values
                            .insert(value.clone(), AttrValueHistorical::deleted(*csn));
                    } else if newer_update && old.is_update() {
                        // an add newer than this delete wins
                        delete_it = false;
                        conflict = true;
                    } else if newer_delete {
                        // already deleted by a more recent change
                        conflict = true;
                    }
                }
                None => {
                    self.values
                        .insert(value.clone(), AttrValueHistorical::deleted(*csn));
                }
            }
            // Values that must not or cannot be deleted are suppressed so
            // the remaining delete succeeds at the storage layer.
            if delete_it && (entry.has_value(&m.attr, &value) || added_in_op) {
                remaining.push(value);
            }
        }
        m.values = remaining;
        self.touch_update_time(csn);
        if m.values.is_empty() {
            ReplayVerdict::dropped(conflict)
        } else {
            ReplayVerdict::kept(conflict)
        }
    }

    fn replay_add(&mut self, m: &mut Modification, csn: &Csn) -> ReplayVerdict {
        if csn.is_older_than(self.delete_time.as_ref()) {
            // the whole attribute was deleted more recently; the add loses
            return ReplayVerdict::dropped(true);
        }
        let values = std::mem::take(&mut m.values);
        let (remaining, conflict) = self.add_values(values, csn);
        m.values = remaining;
        if m.values.is_empty() {
            ReplayVerdict::dropped(conflict)
        } else {
            ReplayVerdict::kept(conflict)
        }
    }

    fn replay_replace(&mut self, m: &mut Modification, csn: &Csn) -> ReplayVerdict {
        if csn.is_older_than(self.delete_time.as_ref()) {
            // obsoleted by a more recent delete of the whole attribute
            return ReplayVerdict::dropped(true);
        }
        // Run the delete half first: values updated after this change
        // survive the replace. Then run the add half over the requested
        // values and fold both lists back into one replace.
        let added = std::mem::take(&mut m.values);
        let mut kept = self.delete_keeping_newer(csn);
        let (applied, _) = self.add_values(added, csn);
        kept.extend(applied);
        m.mod_type = ModType::Replace;
        m.values = kept;
        ReplayVerdict::kept(true)
    }

    /// Delete the attribute at `csn`, returning the values whose update is
    /// newer than the delete (they survive it).
    fn delete_keeping_newer(&mut self, csn: &Csn) -> Vec<String> {
        let mut kept = Vec::new();
        self.values.retain(|value, hist| {
            if csn.is_older_than(hist.update_time.as_ref()) {
                kept.push(value.clone());
                true
            } else {
                // swallowed by this delete unless a newer per-value delete
                // is already recorded
                !csn.is_newer_or_equal(hist.delete_time.as_ref())
            }
        });
        if csn.is_newer_than(self.delete_time.as_ref()) {
            self.delete_time = Some(*csn);
        }
        self.touch_update_time(csn);
        kept
    }

    /// Record adds for `values`, returning the values that must stay in the
    /// modification and whether any lost to recorded history.
    fn add_values(&mut self, values: Vec<String>, csn: &Csn) -> (Vec<String>, bool) {
        let mut conflict = false;
        let mut remaining = Vec::with_capacity(values.len());
        for value in values {
            match self.values.get(&value) {
                None => {
                    self.values
                        .insert(value.clone(), AttrValueHistorical::updated(*csn));
                    remaining.push(value);
                }
                Some(old) => {
                    if let Some(update_time) = old.update_time {
                        // value already present in the entry; suppress the
                        // add either way
                        match csn.cmp(&update_time) {
                            std::cmp::Ordering::Greater => {
                                self.values
                                    .insert(value.clone(), AttrValueHistorical::updated(*csn));
                            }
                            std::cmp::Ordering::Equal => {
                                // redelivery of the recorded add
                            }
                            std::cmp::Ordering::Less => {
                                conflict = true;
                            }
                        }
                    } else if csn.is_newer_or_equal(old.delete_time.as_ref()) {
                        self.values
                            .insert(value.clone(), AttrValueHistorical::updated(*csn));
                        remaining.push(value);
                    } else {
                        // the recorded delete is more recent and wins
                        conflict = true;
                    }
                }
            }
        }
        self.touch_update_time(csn);
        (remaining, conflict)
    }

    fn process_local(&mut self, csn: &Csn, m: &Modification) {
        match m.mod_type {
            ModType::Delete => {
                if m.values.is_empty() {
                    self.delete_attr(csn);
                } else {
                    for value in &m.values {
                        self.delete_value(value, csn);
                    }
                }
            }
            ModType::Add => {
                for value in &m.values {
                    self.add_value(value, csn);
                }
            }
            ModType::Replace => {
                self.delete_attr(csn);
                for value in &m.values {
                    self.add_value(value, csn);
                }
            }
        }
    }

    fn assign(&mut self, key: HistKey, value: Option<&str>, csn: &Csn) {
        match key {
            HistKey::Add => {
                if let Some(value) = value {
                    self.add_value(value, csn);
                }
            }
            HistKey::Del => {
                if let Some(value) = value {
                    self.delete_value(value, csn);
                }
            }
            HistKey::Repl => {
                self.delete_attr(csn);
                if let Some(value) = value {
                    self.add_value(value, csn);
                }
            }
            HistKey::AttrDel => self.delete_attr(csn),
        }
    }

    fn delete_attr(&mut self, csn: &Csn) {
        // suppress every value history not added or deleted after this
        self.values.retain(|_, hist| {
            !(csn.is_newer_or_equal(hist.update_time.as_ref())
                && csn.is_newer_or_equal(hist.delete_time.as_ref()))
        });
        if csn.is_newer_than(self.delete_time.as_ref()) {
            self.delete_time = Some(*csn);
        }
        self.touch_update_time(csn);
    }

    fn delete_value(&mut self, value: &str, csn: &Csn) {
        self.values
            .insert(value.to_string(), AttrValueHistorical::deleted(*csn));
        self.touch_update_time(csn);
    }

    fn add_value(&mut self, value: &str, csn: &Csn) {
        self.values
            .insert(value.to_string(), AttrValueHistorical::updated(*csn));
        self.touch_update_time(csn);
    }

    fn touch_update_time(&mut self, csn: &Csn) {
        if csn.is_newer_than(self.last_update_time.as_ref()) {
            self.last_update_time = Some(*csn);
        }
    }

    fn value_entries(&self) -> Vec<ValueHistView<'_>> {
        self.values
            .iter()
            .map(|(value, hist)| ValueHistView {
                value: Some(value.as_str()),
                update_time: hist.update_time.as_ref(),
                delete_time: hist.delete_time.as_ref(),
            })
            .collect()
    }

    fn purge_older_than(&mut self, horizon_ms: u64) -> usize {
        let mut purged = 0;
        self.values.retain(|_, hist| {
            let stale = hist
                .governing_time()
                .is_some_and(|csn| csn.time_ms() < horizon_ms);
            if stale {
                purged += 1;
            }
            !stale
        });
        if self
            .delete_time
            .is_some_and(|csn| csn.time_ms() < horizon_ms)
        {
            self.delete_time = None;
            purged += 1;
        }
        purged
    }

    fn is_empty(&self) -> bool {
        self.values.is_empty() && self.delete_time.is_none()
    }
}

/// History of a single-valued attribute: one value slot, the time it was
/// set, and the time the attribute was deleted.
///
/// Adds and replaces both overwrite the slot; a newer add over an existing
/// value is rewritten into a replace so the storage layer overwrites.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttrHistoricalSingle {
    add_time: Option<Csn>,
    delete_time: Option<Csn>,
    value: Option<String>,
}

impl AttrHistoricalSingle {
    pub fn current_value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    fn replay(&mut self, m: &mut Modification, csn: &Csn) -> ReplayVerdict {
        debug_assert!(
            m.values.len() <= 1,
            "single-valued modification carries at most one value"
        );
        if csn.is_older_than(self.add_time.as_ref()) || csn.is_older_than(self.delete_time.as_ref())
        {
            // a newer set or delete of this attribute already wins
            return ReplayVerdict::dropped(true);
        }
        match m.mod_type {
            ModType::Delete => {
                if self.delete_time.as_ref() == Some(csn) {
                    // redelivery of the recorded delete
                    return ReplayVerdict::dropped(false);
                }
                if !m.values.is_empty()
                    && self.value.is_some()
                    && m.values.first() != self.value.as_ref()
                {
                    // targets a value this attribute no longer holds
                    return ReplayVerdict::dropped(false);
                }
                self.delete_time = Some(*csn);
                self.add_time = None;
                self.value = None;
                ReplayVerdict::kept(false)
            }
            ModType::Add => {
                if self.add_time.as_ref() == Some(csn) {
                    // redelivery of the recorded add
                    return ReplayVerdict::dropped(false);
                }
                let replacing = self.value.is_some();
                if replacing {
                    self.delete_time = Some(*csn);
                    m.mod_type = ModType::Replace;
                }
                self.add_time = Some(*csn);
                self.value = m.values.first().cloned();
                ReplayVerdict::kept(false)
            }
            ModType::Replace => {
                if self.add_time.as_ref() == Some(csn) {
                    return ReplayVerdict::dropped(false);
                }
                self.delete_time = Some(*csn);
                if m.values.is_empty() {
                    self.add_time = None;
                    self.value = None;
                } else {
                    self.add_time = Some(*csn);
                    self.value = m.values.first().cloned();
                }
                ReplayVerdict::kept(false)
            }
        }
    }

    fn process_local(&mut self, csn: &Csn, m: &Modification) {
        match m.mod_type {
            ModType::Delete => {
                self.delete_time = Some(*csn);
                self.add_time = None;
                self.value = None;
            }
            ModType::Add => {
                if self.value.is_some() {
                    // setting over an existing value doubles as its delete
                    self.delete_time = Some(*csn);
                }
                self.add_time = Some(*csn);
                self.value = m.values.first().cloned();
            }
            ModType::Replace => {
                self.delete_time = Some(*csn);
                if m.values.is_empty() {
                    self.add_time = None;
                    self.value = None;
                } else {
                    self.add_time = Some(*csn);
                    self.value = m.values.first().cloned();
                }
            }
        }
    }

    fn assign(&mut self, key: HistKey, value: Option<&str>, csn: &Csn) {
        match key {
            HistKey::Add | HistKey::Repl => {
                if key == HistKey::Repl && csn.is_newer_than(self.delete_time.as_ref()) {
                    self.delete_time = Some(*csn);
                }
                if value.is_some() && csn.is_newer_or_equal(self.add_time.as_ref()) {
                    self.add_time = Some(*csn);
                    self.value = value.map(str::to_string);
                }
            }
            HistKey::Del | HistKey::AttrDel => {
                if csn.is_newer_than(self.delete_time.as_ref()) {
                    self.delete_time = Some(*csn);
                }
                if csn.is_newer_or_equal(self.add_time.as_ref()) {
                    self.add_time = None;
                    self.value = None;
                }
            }
        }
    }

    fn value_entries(&self) -> Vec<ValueHistView<'_>> {
        match (self.value.as_deref(), self.add_time.as_ref()) {
            (Some(value), Some(add_time)) => vec![ValueHistView {
                value: Some(value),
                update_time: Some(add_time),
                delete_time: None,
            }],
            _ => Vec::new(),
        }
    }

    fn purge_older_than(&mut self, horizon_ms: u64) -> usize {
        let mut purged = 0;
        if self.add_time.is_some_and(|csn| csn.time_ms() < horizon_ms) {
            self.add_time = None;
            self.value = None;
            purged += 1;
        }
        if self
            .delete_time
            .is_some_and(|csn| csn.time_ms() < horizon_ms)
        {
            self.delete_time = None;
            purged += 1;
        }
        purged
    }

    fn is_empty(&self) -> bool {
        self.add_time.is_none() && self.delete_time.is_none() && self.value.is_none()
    }
}

/// Independent history per option set for one attribute type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttrHistoricalWithOptions {
    by_options: BTreeMap<AttrOptions, AttrHistorical>,
}

impl AttrHistoricalWithOptions {
    pub fn get(&self, options: &AttrOptions) -> Option<&AttrHistorical> {
        self.by_options.get(options)
    }

    pub fn get_or_create(
        &mut self,
        options: AttrOptions,
        descriptor: AttrTypeDescriptor,
    ) -> &mut AttrHistorical {
        self.by_options
            .entry(options)
            .or_insert_with(|| AttrHistorical::for_descriptor(descriptor))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AttrOptions, &AttrHistorical)> {
        self.by_options.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&AttrOptions, &mut AttrHistorical)> {
        self.by_options.iter_mut()
    }

    pub(crate) fn prune_empty(&mut self) {
        self.by_options.retain(|_, hist| !hist.is_empty());
    }

    pub fn is_empty(&self) -> bool {
        self.by_options.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::csn::ReplicaId;
    use crate::core::schema::{AttrKey, AttrName};

    fn csn(time: u64, seq: u32, replica: u32) -> Csn {
        Csn::new(time, seq, ReplicaId(replica))
    }

    fn key(name: &str) -> AttrKey {
        AttrKey::plain(AttrName::parse(name).expect("valid name"))
    }

    fn modification(name: &str, mod_type: ModType, values: &[&str]) -> Modification {
        Modification::new(
            key(name),
            mod_type,
            values.iter().map(|v| v.to_string()).collect(),
        )
    }

    fn entry_with(name: &str, values: &[&str]) -> Entry {
        let mut entry = Entry::new("cn=test,dc=example,dc=com");
        entry.set(key(name), values.iter().map(|v| v.to_string()).collect());
        entry
    }

    #[test]
    fn delete_older_than_recorded_update_is_suppressed() {
        let mut hist = AttrHistoricalMultiple::default();
        hist.add_value("X", &csn(10, 1, 1));

        let entry = entry_with("description", &["X"]);
        let mut m = modification("description", ModType::Delete, &["X"]);
        let verdict = AttrHistorical::Multiple(hist).replay(&mut m, &csn(5, 1, 2), &entry);

        assert!(verdict.conflict);
        assert!(!verdict.keep);
        assert!(m.values.is_empty());
    }

    #[test]
    fn add_on_untouched_value_is_clean() {
        let mut hist = AttrHistorical::for_descriptor(AttrTypeDescriptor::multi_valued());
        let entry = Entry::new("cn=test");
        let mut m = modification("mail", ModType::Add, &["a@b.com"]);
        let stamp = csn(5, 1, 1);
        let verdict = hist.replay(&mut m, &stamp, &entry);

        assert!(!verdict.conflict);
        assert!(verdict.keep);
        let AttrHistorical::Multiple(inner) = &hist else {
            panic!("expected multi-valued history");
        };
        assert_eq!(
            inner.value_history("a@b.com"),
            Some(&AttrValueHistorical::updated(stamp))
        );
    }

    #[test]
    fn add_older_than_attribute_delete_is_suppressed() {
        let mut inner = AttrHistoricalMultiple::default();
        inner.delete_attr(&csn(30, 1, 1));
        let mut hist = AttrHistorical::Multiple(inner);

        let entry = Entry::new("cn=test");
        let mut m = modification("description", ModType::Add, &["Y"]);
        let verdict = hist.replay(&mut m, &csn(20, 1, 2), &entry);

        assert!(verdict.conflict);
        assert!(!verdict.keep);
    }

    #[test]
    fn add_newer_than_attribute_delete_wins() {
        let mut inner = AttrHistoricalMultiple::default();
        inner.delete_attr(&csn(30, 1, 1));
        let mut hist = AttrHistorical::Multiple(inner);

        let entry = Entry::new("cn=test");
        let mut m = modification("description", ModType::Add, &["Y"]);
        let verdict = hist.replay(&mut m, &csn(40, 1, 2), &entry);

        assert!(!verdict.conflict);
        assert!(verdict.keep);
        assert_eq!(m.values, vec!["Y".to_string()]);
    }

    #[test]
    fn replaying_the_same_add_twice_is_idempotent() {
        let mut hist = AttrHistorical::for_descriptor(AttrTypeDescriptor::multi_valued());
        let entry = Entry::new("cn=test");
        let stamp = csn(5, 1, 1);

        let mut first = modification("mail", ModType::Add, &["a@b.com"]);
        let v1 = hist.replay(&mut first, &stamp, &entry);
        assert!(!v1.conflict && v1.keep);
        let snapshot = hist.clone();

        let mut second = modification("mail", ModType::Add, &["a@b.com"]);
        let v2 = hist.replay(&mut second, &stamp, &entry);
        assert!(!v2.conflict);
        assert!(!v2.keep);
        assert_eq!(hist, snapshot);
    }

    #[test]
    fn replaying_the_same_delete_twice_is_idempotent() {
        let mut inner = AttrHistoricalMultiple::default();
        inner.add_value("X", &csn(10, 1, 1));
        let mut hist = AttrHistorical::Multiple(inner);
        let stamp = csn(20, 1, 2);

        let entry = entry_with("description", &["X"]);
        let mut first = modification("description", ModType::Delete, &["X"]);
        let v1 = hist.replay(&mut first, &stamp, &entry);
        assert!(!v1.conflict && v1.keep);
        let snapshot = hist.clone();

        // after the first application the value is gone from the entry
        let entry = Entry::new("cn=test,dc=example,dc=com");
        let mut second = modification("description", ModType::Delete, &["X"]);
        let v2 = hist.replay(&mut second, &stamp, &entry);
        assert!(!v2.conflict);
        assert!(!v2.keep);
        assert_eq!(hist, snapshot);
    }

    #[test]
    fn attribute_delete_keeps_values_updated_after_it() {
        let mut inner = AttrHistoricalMultiple::default();
        inner.add_value("old", &csn(10, 1, 1));
        inner.add_value("new", &csn(30, 1, 1));
        let mut hist = AttrHistorical::Multiple(inner);

        let entry = entry_with("description", &["old", "new"]);
        let mut m = modification("description", ModType::Delete, &[]);
        let verdict = hist.replay(&mut m, &csn(20, 1, 2), &entry);

        assert!(verdict.conflict);
        assert!(verdict.keep);
        assert_eq!(m.mod_type, ModType::Replace);
        assert_eq!(m.values, vec!["new".to_string()]);
    }

    #[test]
    fn conflicting_replace_preserves_newer_values() {
        let mut inner = AttrHistoricalMultiple::default();
        inner.add_value("newer", &csn(50, 1, 1));
        inner.add_value("older", &csn(5, 1, 1));
        let mut hist = AttrHistorical::Multiple(inner);

        let entry = entry_with("description", &["newer", "older"]);
        let mut m = modification("description", ModType::Replace, &["mine"]);
        let verdict = hist.replay(&mut m, &csn(20, 1, 2), &entry);

        assert!(verdict.conflict);
        assert!(verdict.keep);
        assert_eq!(m.mod_type, ModType::Replace);
        let mut values = m.values.clone();
        values.sort();
        assert_eq!(values, vec!["mine".to_string(), "newer".to_string()]);
    }

    #[test]
    fn in_order_replace_takes_the_fast_path() {
        let mut inner = AttrHistoricalMultiple::default();
        inner.add_value("old", &csn(10, 1, 1));
        let mut hist = AttrHistorical::Multiple(inner);

        let entry = entry_with("description", &["old"]);
        let mut m = modification("description", ModType::Replace, &["new"]);
        let verdict = hist.replay(&mut m, &csn(20, 1, 2), &entry);

        assert!(!verdict.conflict);
        assert!(verdict.keep);
        assert_eq!(m.values, vec!["new".to_string()]);
        assert_eq!(hist.delete_time(), Some(&csn(20, 1, 2)));
    }

    #[test]
    fn single_valued_add_over_existing_becomes_replace() {
        let mut hist = AttrHistorical::for_descriptor(AttrTypeDescriptor::single_valued());
        let entry = Entry::new("cn=test");

        let mut first = modification("cn", ModType::Add, &["alice"]);
        let v1 = hist.replay(&mut first, &csn(10, 1, 1), &entry);
        assert!(!v1.conflict && v1.keep);
        assert_eq!(first.mod_type, ModType::Add);

        let mut second = modification("cn", ModType::Add, &["bob"]);
        let v2 = hist.replay(&mut second, &csn(20, 1, 2), &entry);
        assert!(!v2.conflict && v2.keep);
        assert_eq!(second.mod_type, ModType::Replace);

        let AttrHistorical::Single(inner) = &hist else {
            panic!("expected single-valued history");
        };
        assert_eq!(inner.current_value(), Some("bob"));
    }

    #[test]
    fn single_valued_older_set_is_suppressed() {
        let mut hist = AttrHistorical::for_descriptor(AttrTypeDescriptor::single_valued());
        let entry = Entry::new("cn=test");

        let mut newer = modification("cn", ModType::Replace, &["carol"]);
        hist.replay(&mut newer, &csn(30, 1, 1), &entry);

        let mut older = modification("cn", ModType::Replace, &["mallory"]);
        let verdict = hist.replay(&mut older, &csn(10, 1, 2), &entry);
        assert!(verdict.conflict);
        assert!(!verdict.keep);

        let AttrHistorical::Single(inner) = &hist else {
            panic!("expected single-valued history");
        };
        assert_eq!(inner.current_value(), Some("carol"));
    }

    #[test]
    fn option_sets_track_independent_history() {
        let mut with_options = AttrHistoricalWithOptions::default();
        let plain = AttrOptions::none();
        let fr: AttrOptions = ["fr".to_string()].into_iter().collect();

        with_options
            .get_or_create(plain.clone(), AttrTypeDescriptor::multi_valued())
            .assign(HistKey::Add, Some("base"), &csn(10, 1, 1));
        with_options
            .get_or_create(fr.clone(), AttrTypeDescriptor::multi_valued())
            .assign(HistKey::AttrDel, None, &csn(20, 1, 1));

        assert_eq!(with_options.get(&plain).and_then(|h| h.delete_time()), None);
        assert_eq!(
            with_options.get(&fr).and_then(|h| h.delete_time()),
            Some(&csn(20, 1, 1))
        );
    }
}
