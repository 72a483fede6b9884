//! Delivery tracker: pending pushes keyed by destination server and filename.
//!
//! The tracker is plain bookkeeping with no I/O. Enqueuing a key that is
//! already pending replaces its payload (the file changed again before it
//! was delivered) but keeps its place in the queue, so iteration is always
//! oldest-pending-first.
//!
//! Every enqueue stamps the entry with a fresh revision. Outcomes reported
//! for an older revision are ignored, so an acknowledgment for a superseded
//! payload never clears the newer one.

use crate::types::{DeliveryKey, Payload};
use std::collections::{btree_map, BTreeMap, HashMap};
use std::time::Instant;

/// A pending delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelivery {
    /// Content to deliver.
    pub payload: Payload,
    /// When the current payload was enqueued.
    pub enqueued_at: Instant,
    /// Number of timed-out attempts for the current payload.
    pub attempt: u32,
    /// Revision of the current payload.
    pub revision: u64,
}

/// A snapshot of one pending delivery, handed to a drain pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryItem {
    /// Delivery key.
    pub key: DeliveryKey,
    /// Revision at snapshot time.
    pub revision: u64,
    /// Content to deliver.
    pub payload: Payload,
    /// Attempts so far.
    pub attempt: u32,
}

#[derive(Debug)]
struct Slot {
    position: u64,
    delivery: PendingDelivery,
}

/// Pending deliveries in insertion order.
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    slots: HashMap<DeliveryKey, Slot>,
    order: BTreeMap<u64, DeliveryKey>,
    next_position: u64,
    next_revision: u64,
}

impl DeliveryTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or supersedes the pending delivery at `key`.
    ///
    /// Resets the attempt count and enqueue time. Returns the new revision.
    pub fn enqueue(&mut self, key: DeliveryKey, payload: Payload) -> u64 {
        self.next_revision += 1;
        let revision = self.next_revision;
        let delivery = PendingDelivery {
            payload,
            enqueued_at: Instant::now(),
            attempt: 0,
            revision,
        };

        if let Some(slot) = self.slots.get_mut(&key) {
            slot.delivery = delivery;
            return revision;
        }

        let position = self.next_position;
        self.next_position += 1;
        self.order.insert(position, key.clone());
        self.slots.insert(key, Slot { position, delivery });
        revision
    }

    /// Removes the entry at `key`, whatever its revision.
    pub fn remove(&mut self, key: &DeliveryKey) -> Option<PendingDelivery> {
        let slot = self.slots.remove(key)?;
        self.order.remove(&slot.position);
        Some(slot.delivery)
    }

    /// Removes the entry at `key` only if it still holds `revision`.
    pub fn remove_revision(&mut self, key: &DeliveryKey, revision: u64) -> Option<PendingDelivery> {
        let current = self
            .slots
            .get(key)
            .is_some_and(|slot| slot.delivery.revision == revision);
        if current {
            self.remove(key)
        } else {
            None
        }
    }

    /// Records a timed-out attempt for `key` at `revision`.
    ///
    /// Returns the new attempt count, or `None` if the entry is gone or was
    /// superseded.
    pub fn record_timeout(&mut self, key: &DeliveryKey, revision: u64) -> Option<u32> {
        let slot = self.slots.get_mut(key)?;
        if slot.delivery.revision != revision {
            return None;
        }
        slot.delivery.attempt += 1;
        Some(slot.delivery.attempt)
    }

    /// Returns the pending delivery at `key`.
    pub fn get(&self, key: &DeliveryKey) -> Option<&PendingDelivery> {
        self.slots.get(key).map(|slot| &slot.delivery)
    }

    /// Returns true if `key` is pending.
    pub fn contains(&self, key: &DeliveryKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Returns the number of pending deliveries.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterates pending deliveries, oldest first, without mutating the tracker.
    ///
    /// The iterator is `Clone`, so a partially consumed sequence can be
    /// restarted from the same point.
    pub fn entries(&self) -> Entries<'_> {
        Entries {
            order: self.order.values(),
            slots: &self.slots,
        }
    }

    /// Copies every pending delivery, oldest first.
    pub fn snapshot(&self) -> Vec<DeliveryItem> {
        self.entries()
            .map(|(key, delivery)| DeliveryItem {
                key: key.clone(),
                revision: delivery.revision,
                payload: delivery.payload.clone(),
                attempt: delivery.attempt,
            })
            .collect()
    }
}

/// Iterator over pending deliveries in insertion order.
#[derive(Clone)]
pub struct Entries<'a> {
    order: btree_map::Values<'a, u64, DeliveryKey>,
    slots: &'a HashMap<DeliveryKey, Slot>,
}

impl<'a> Iterator for Entries<'a> {
    type Item = (&'a DeliveryKey, &'a PendingDelivery);

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.order.next()?;
        self.slots.get(key).map(|slot| (key, &slot.delivery))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.order.size_hint()
    }
}
