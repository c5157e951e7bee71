//! Layer 0: change sequence numbers.
//!
//! A [`Csn`] identifies one originating change in the replication topology.
//! (time_ms, seq, replica) compared lexicographically forms a total order:
//! no two CSNs from distinct operations compare equal, so conflict
//! resolution never needs an arbitrary tiebreak.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::error::CsnParseError;

/// Replica identifier inside a replication topology.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(pub u32);

impl ReplicaId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Debug for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplicaId({})", self.0)
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wall clock in milliseconds since the epoch.
///
/// Not an ordering primitive: only the purge-horizon input and the seed for
/// CSN generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WallClock(pub u64);

impl WallClock {
    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self(ms)
    }
}

/// Change sequence number.
///
/// Field order matters: the derived `Ord` compares (time_ms, seq, replica),
/// and the textual encoding preserves that order lexicographically.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Csn {
    time_ms: u64,
    seq: u32,
    replica: ReplicaId,
}

impl Csn {
    pub fn new(time_ms: u64, seq: u32, replica: ReplicaId) -> Self {
        Self {
            time_ms,
            seq,
            replica,
        }
    }

    pub fn time_ms(&self) -> u64 {
        self.time_ms
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn replica(&self) -> ReplicaId {
        self.replica
    }

    /// True when `self` is strictly older than a recorded time.
    ///
    /// An absent time never wins: comparing against `None` is false here
    /// and true in [`Csn::is_newer_than`].
    pub fn is_older_than(&self, other: Option<&Csn>) -> bool {
        other.is_some_and(|o| self < o)
    }

    pub fn is_older_or_equal(&self, other: Option<&Csn>) -> bool {
        other.is_some_and(|o| self <= o)
    }

    pub fn is_newer_than(&self, other: Option<&Csn>) -> bool {
        other.map_or(true, |o| self > o)
    }

    pub fn is_newer_or_equal(&self, other: Option<&Csn>) -> bool {
        other.map_or(true, |o| self >= o)
    }
}

impl fmt::Display for Csn {
    /// Fixed-width hex encoding: 16 digits of time, 8 of sequence, 8 of
    /// replica id. Sorting the strings sorts the CSNs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016x}{:08x}{:08x}",
            self.time_ms, self.seq, self.replica.0
        )
    }
}

impl fmt::Debug for Csn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Csn({self})")
    }
}

impl FromStr for Csn {
    type Err = CsnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 || !s.is_ascii() {
            return Err(CsnParseError::Length {
                raw: s.to_string(),
                len: s.len(),
            });
        }
        let invalid = || CsnParseError::InvalidHex { raw: s.to_string() };
        let time_ms = u64::from_str_radix(&s[..16], 16).map_err(|_| invalid())?;
        let seq = u32::from_str_radix(&s[16..24], 16).map_err(|_| invalid())?;
        let replica = u32::from_str_radix(&s[24..32], 16).map_err(|_| invalid())?;
        Ok(Csn::new(time_ms, seq, ReplicaId(replica)))
    }
}

/// Newest CSN seen from each replica. Updates are monotonic.
///
/// The replication layer keeps one of these per domain to know how far each
/// peer has been observed, and to seed a [`CsnGenerator`] after restart.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerState {
    newest: BTreeMap<ReplicaId, Csn>,
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a seen CSN. Returns false when it was not newer than the
    /// recorded maximum for its replica.
    pub fn update(&mut self, csn: Csn) -> bool {
        match self.newest.get(&csn.replica()) {
            Some(cur) if *cur >= csn => false,
            _ => {
                self.newest.insert(csn.replica(), csn);
                true
            }
        }
    }

    pub fn newest_for(&self, replica: ReplicaId) -> Option<&Csn> {
        self.newest.get(&replica)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Csn> {
        self.newest.values()
    }

    /// True when a change with this CSN has already been observed.
    pub fn covers(&self, csn: &Csn) -> bool {
        self.newest_for(csn.replica()).is_some_and(|max| max >= csn)
    }
}

struct GenState {
    last_time_ms: u64,
    seq: u32,
}

/// Issues CSNs guaranteed newer than every CSN previously issued or fed to
/// [`CsnGenerator::adjust`].
///
/// The only lock in this crate: issuing is shared across worker threads,
/// everything else is single-writer per entry.
pub struct CsnGenerator {
    replica: ReplicaId,
    state: Mutex<GenState>,
}

impl CsnGenerator {
    pub fn new(replica: ReplicaId, start: WallClock) -> Self {
        Self {
            replica,
            state: Mutex::new(GenState {
                last_time_ms: start.0,
                seq: 0,
            }),
        }
    }

    /// Seed a generator so everything it issues is newer than all CSNs in
    /// `state`.
    pub fn from_state(replica: ReplicaId, state: &ServerState, now: WallClock) -> Self {
        let gen = Self::new(replica, now);
        gen.adjust_with(state);
        gen
    }

    pub fn next(&self) -> Csn {
        self.next_at(WallClock::now())
    }

    pub fn next_at(&self, now: WallClock) -> Csn {
        let mut st = self.lock();
        if now.0 > st.last_time_ms {
            st.last_time_ms = now.0;
        }
        if st.seq == u32::MAX {
            st.seq = 0;
            st.last_time_ms += 1;
        } else {
            st.seq += 1;
        }
        Csn::new(st.last_time_ms, st.seq, self.replica)
    }

    /// Account for a CSN received from another replica, so subsequently
    /// issued CSNs sort after it.
    pub fn adjust(&self, seen: &Csn) {
        let mut st = self.lock();
        if st.last_time_ms <= seen.time_ms() {
            st.last_time_ms = seen.time_ms() + 1;
        }
        if self.replica == seen.replica() && st.seq < seen.seq() {
            st.seq = seen.seq();
        }
    }

    pub fn adjust_with(&self, state: &ServerState) {
        for csn in state.iter() {
            self.adjust(csn);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
