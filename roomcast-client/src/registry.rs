//! Keyed slot map with in-flight reservations
//!
//! A key is either vacant, `Pending` (an operation is building its value),
//! or `Ready`. Reserving is atomic per key, so two concurrent operations can
//! never both build a value for the same key. A reservation that is dropped
//! without committing frees its key again.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug)]
enum Slot<V> {
    Pending(u64),
    Ready(V),
}

#[derive(Debug)]
pub(crate) struct Registry<K: Eq + Hash, V> {
    slots: DashMap<K, Slot<V>>,
    next_ticket: AtomicU64,
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            slots: DashMap::new(),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Claim `key` for an in-flight operation. `None` if it is pending or taken.
    pub(crate) fn reserve(&self, key: K) -> Option<Reservation<'_, K, V>> {
        match self.slots.entry(key.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                vacant.insert(Slot::Pending(ticket));
                Some(Reservation {
                    registry: self,
                    key: Some(key),
                    ticket,
                })
            }
        }
    }

    pub(crate) fn get(&self, key: &K) -> Option<V> {
        self.slots.get(key).and_then(|slot| match slot.value() {
            Slot::Ready(value) => Some(value.clone()),
            Slot::Pending(_) => None,
        })
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Remove a committed value
    pub(crate) fn remove(&self, key: &K) -> Option<V> {
        self.slots
            .remove_if(key, |_, slot| matches!(slot, Slot::Ready(_)))
            .and_then(|(_, slot)| match slot {
                Slot::Ready(value) => Some(value),
                Slot::Pending(_) => None,
            })
    }

    /// Remove and return every committed value matching `predicate`
    pub(crate) fn remove_where(&self, mut predicate: impl FnMut(&K, &V) -> bool) -> Vec<V> {
        let keys: Vec<K> = self
            .slots
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Ready(value) if predicate(entry.key(), value) => Some(entry.key().clone()),
                _ => None,
            })
            .collect();
        keys.iter().filter_map(|key| self.remove(key)).collect()
    }

    /// Empty the registry, pending reservations included. Returns the
    /// committed values.
    pub(crate) fn drain(&self) -> Vec<V> {
        let keys: Vec<K> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        keys.iter()
            .filter_map(|key| self.slots.remove(key))
            .filter_map(|(_, slot)| match slot {
                Slot::Ready(value) => Some(value),
                Slot::Pending(_) => None,
            })
            .collect()
    }

    /// Committed values
    pub(crate) fn values(&self) -> Vec<V> {
        self.slots
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Ready(value) => Some(value.clone()),
                Slot::Pending(_) => None,
            })
            .collect()
    }

    /// Number of committed values
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Ready(_)))
            .count()
    }
}

/// Exclusive claim on one registry key
#[derive(Debug)]
pub(crate) struct Reservation<'a, K: Eq + Hash + Clone, V> {
    registry: &'a Registry<K, V>,
    key: Option<K>,
    ticket: u64,
}

impl<K: Eq + Hash + Clone, V> Reservation<'_, K, V> {
    /// Publish `value` under the reserved key. Hands the value back if the
    /// reservation was revoked (the registry was drained) in the meantime.
    pub(crate) fn commit(mut self, value: V) -> Result<(), V> {
        let Some(key) = self.key.take() else {
            return Err(value);
        };
        match self.registry.slots.get_mut(&key) {
            Some(mut slot) if matches!(*slot, Slot::Pending(t) if t == self.ticket) => {
                *slot = Slot::Ready(value);
                Ok(())
            }
            _ => Err(value),
        }
    }
}

impl<K: Eq + Hash + Clone, V> Drop for Reservation<'_, K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let ticket = self.ticket;
            self.registry
                .slots
                .remove_if(&key, |_, slot| matches!(slot, Slot::Pending(t) if *t == ticket));
        }
    }
}
