//! Ring of recently accepted request ids.
//!
//! The head cursor is where the next accepted rid is written; the tail
//! cursor walks behind it handing out rids for `ack` attributes. Entries stay
//! in their slot after being acknowledged so retransmissions are still
//! recognized until the slot is reused.

use crate::fingerprint::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RidEntry {
    pub rid: i64,
    pub fingerprint: Fingerprint,
}

/// How an incoming rid relates to what the window has already accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RidStatus {
    New,
    /// Same rid, same payload.
    Retransmission,
    /// Same rid, different payload.
    Conflict,
}

#[derive(Debug)]
pub struct RidWindow {
    slots: Vec<Option<RidEntry>>,
    head: usize,
    tail: usize,
    unacked: usize,
    previous_received_rid: Option<i64>,
}

impl RidWindow {
    /// Window sized for a session allowing `concurrent_requests` requests.
    pub fn new(concurrent_requests: u32) -> Self {
        Self::with_capacity((concurrent_requests as usize + 1) * 5)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            head: 0,
            tail: 0,
            unacked: 0,
            previous_received_rid: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Accepts `rid`, overwriting the oldest slot once the ring is full.
    pub fn record(&mut self, rid: i64, fingerprint: Fingerprint) {
        if let Some(previous) = self.previous_received_rid {
            if previous.checked_add(1) != Some(rid) {
                log::info!(
                    "rid: incorrect packet order, last_rid={previous}, current_rid={rid}"
                );
            }
        }

        let capacity = self.capacity();
        if self.unacked == capacity {
            // oldest unacknowledged rid is about to be overwritten
            self.tail = (self.tail + 1) % capacity;
            self.unacked -= 1;
        }

        self.slots[self.head] = Some(RidEntry { rid, fingerprint });
        self.head = (self.head + 1) % capacity;
        self.unacked += 1;
        let newest = self.previous_received_rid.map_or(rid, |p| p.max(rid));
        self.previous_received_rid = Some(newest);
    }

    /// Same rid already seen with a different payload: another client is
    /// reusing this session.
    pub fn is_duplicate_rid(&self, rid: i64, fingerprint: Fingerprint) -> bool {
        self.find(rid)
            .is_some_and(|entry| entry.fingerprint != fingerprint)
    }

    /// Same rid and payload already accepted: a plain retransmission. Two
    /// empty payloads match each other but never a non-empty one.
    pub fn is_duplicate_message(&self, rid: i64, fingerprint: Fingerprint) -> bool {
        self.find(rid)
            .is_some_and(|entry| entry.fingerprint == fingerprint)
    }

    pub fn classify(&self, rid: i64, fingerprint: Fingerprint) -> RidStatus {
        if self.is_duplicate_rid(rid, fingerprint) {
            RidStatus::Conflict
        } else if self.is_duplicate_message(rid, fingerprint) {
            RidStatus::Retransmission
        } else {
            RidStatus::New
        }
    }

    pub fn oldest_unacked(&self) -> Option<i64> {
        if self.unacked == 0 {
            return None;
        }
        self.slots[self.tail].map(|entry| entry.rid)
    }

    /// Hands out the oldest unacknowledged rid and moves past it.
    pub fn take_unacked(&mut self) -> Option<i64> {
        let rid = self.oldest_unacked()?;
        self.tail = (self.tail + 1) % self.capacity();
        self.unacked -= 1;
        Some(rid)
    }

    pub fn unacked(&self) -> usize {
        self.unacked
    }

    pub fn previous_received_rid(&self) -> Option<i64> {
        self.previous_received_rid
    }

    // newest first, so the latest payload for a rid wins
    fn find(&self, rid: i64) -> Option<&RidEntry> {
        let capacity = self.capacity();
        (1..=capacity)
            .map(|back| (self.head + capacity - back) % capacity)
            .filter_map(|idx| self.slots[idx].as_ref())
            .find(|entry| entry.rid == rid)
    }
}
