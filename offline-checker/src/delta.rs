//! Works out what changed since the previous check.
//!
//! Controllers and devices go through exactly the same set algebra; only the staleness rule differs, and that lives
//! in their [`Tracked`] implementations.

use std::{collections::BTreeSet, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};

use crate::ident::{DeviceKey, MacAddress};
use crate::model::{Controller, Device, DeviceKind, DeviceStatus};

pub trait Tracked {
    type Key: Ord + Clone;

    fn key(&self) -> Self::Key;

    /// Whether this entity should currently be considered offline.
    fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool;
}

/// `true` if `timestamp` is missing or earlier than `now - timeout`.
///
/// A timeout too large to subtract from `now` can never be exceeded, so only a missing timestamp is stale then.
pub fn older_than(timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>, timeout: Duration) -> bool {
    let Some(timestamp) = timestamp else {
        return true;
    };

    match TimeDelta::from_std(timeout)
        .ok()
        .and_then(|timeout| now.checked_sub_signed(timeout))
    {
        Some(threshold) => timestamp < threshold,
        None => false,
    }
}

impl Tracked for Controller {
    type Key = MacAddress;

    fn key(&self) -> MacAddress {
        self.mac
    }

    fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        older_than(self.last_connected, now, timeout)
    }
}

impl Tracked for Device {
    type Key = DeviceKey;

    fn key(&self) -> DeviceKey {
        self.key
    }

    // Meters report offline whenever they have nothing to say, so their status is not worth alerting on.
    fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.status == DeviceStatus::Offline
            && self.kind != DeviceKind::Meter
            && older_than(self.status_changed, now, timeout)
    }
}

/// The outcome of one check for one class of entity.
///
/// `newly_offline`, `still_offline` and `recovered` are pairwise disjoint. `offline` is what gets persisted as the
/// previous offline set for the next check, and `ignored` is carried through unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delta<K: Ord> {
    pub newly_offline: BTreeSet<K>,
    pub still_offline: BTreeSet<K>,
    pub recovered: BTreeSet<K>,
    pub offline: BTreeSet<K>,
    pub ignored: BTreeSet<K>,
}

impl<K: Ord> Default for Delta<K> {
    fn default() -> Self {
        Self {
            newly_offline: BTreeSet::new(),
            still_offline: BTreeSet::new(),
            recovered: BTreeSet::new(),
            offline: BTreeSet::new(),
            ignored: BTreeSet::new(),
        }
    }
}

impl<K: Ord + Clone> Delta<K> {
    /// Partition `stale` entities against the previous offline set.
    pub fn compute<I>(stale: I, previous: &BTreeSet<K>, ignored: &BTreeSet<K>) -> Self
    where
        I: IntoIterator<Item = K>,
    {
        let offline: BTreeSet<K> = stale
            .into_iter()
            .filter(|key| !ignored.contains(key))
            .collect();

        let newly_offline = offline.difference(previous).cloned().collect();
        let still_offline = previous.intersection(&offline).cloned().collect();
        // An entity which was ignored after being recorded offline has not recovered, it has just stopped being
        // tracked.
        let recovered = previous
            .iter()
            .filter(|key| !offline.contains(*key) && !ignored.contains(*key))
            .cloned()
            .collect();

        Self {
            newly_offline,
            still_offline,
            recovered,
            offline,
            ignored: ignored.clone(),
        }
    }

    /// Apply the staleness rule to `candidates` and [`compute`](Self::compute) the result.
    pub fn evaluate<'a, T, I>(
        candidates: I,
        now: DateTime<Utc>,
        timeout: Duration,
        previous: &BTreeSet<K>,
        ignored: &BTreeSet<K>,
    ) -> Self
    where
        T: Tracked<Key = K> + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let stale = candidates
            .into_iter()
            .filter(|candidate| candidate.is_stale(now, timeout))
            .map(|candidate| candidate.key());
        Self::compute(stale, previous, ignored)
    }

    /// Something went offline or came back.
    pub fn has_changes(&self) -> bool {
        !self.newly_offline.is_empty() || !self.recovered.is_empty()
    }
}
