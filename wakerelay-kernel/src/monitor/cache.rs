use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use time::OffsetDateTime;

use crate::models::MonitorEntry;

/// In-flight monitoring entries keyed by target name.
#[derive(Default)]
pub struct MonitorCache {
    entries: DashMap<String, MonitorEntry>,
}

impl MonitorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_or_update(&self, key: &str, value: MonitorEntry) {
        self.entries.insert(key.to_string(), value);
    }

    /// Atomically creates the entry with `create` or mutates it with `update`,
    /// returning a copy of the stored value. The shard stays locked for the
    /// whole read-modify-write, so concurrent updates are never lost.
    pub fn add_or_update_with<C, U>(&self, key: &str, create: C, update: U) -> MonitorEntry
    where
        C: FnOnce() -> MonitorEntry,
        U: FnOnce(&mut MonitorEntry),
    {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                update(occupied.get_mut());
                occupied.get().clone()
            }
            Entry::Vacant(vacant) => vacant.insert(create()).clone(),
        }
    }

    /// Mutates an existing entry in place; `None` when it is gone.
    pub fn update_existing<U>(&self, key: &str, update: U) -> Option<MonitorEntry>
    where
        U: FnOnce(&mut MonitorEntry),
    {
        self.entries.get_mut(key).map(|mut e| {
            update(&mut e);
            e.clone()
        })
    }

    pub fn get(&self, key: &str) -> Option<MonitorEntry> {
        self.entries.get(key).map(|e| e.clone())
    }

    /// Snapshot ordered by key.
    pub fn get_all(&self) -> Vec<MonitorEntry> {
        let mut all: Vec<(String, MonitorEntry)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all.into_iter().map(|(_, e)| e).collect()
    }

    pub fn pending(&self) -> Vec<MonitorEntry> {
        self.get_all().into_iter().filter(|e| !e.complete).collect()
    }

    pub fn remove(&self, key: &str) -> Option<MonitorEntry> {
        self.entries.remove(key).map(|(_, e)| e)
    }

    /// Removes the entry only if it is still the registration made at
    /// `wol_sent_at`.
    pub fn remove_registration(&self, key: &str, wol_sent_at: OffsetDateTime) -> bool {
        self.entries
            .remove_if(key, |_, e| e.wol_sent_at == wol_sent_at)
            .is_some()
    }

    /// Drops completed entries whose deadline is before `cutoff`.
    pub fn prune_completed(&self, cutoff: OffsetDateTime) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !(e.complete && e.deadline < cutoff));
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
