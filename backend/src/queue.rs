//! # queue
//!
//! Expiring priority queue for camera shot requests, plus a facade that
//! lets well-known shots be addressed by name instead of id.
//!
//! Semantics everything downstream leans on:
//! - Lower priority value = more urgent; the head is the next shot.
//! - Equal priorities keep insertion order (stable sort).
//! - `expires_at == 0` entries are pinned and survive every purge.
//! - Expiry is lazy: every public operation purges dead entries first, so
//!   an expired shot is never observable from outside.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::clock::Clock;

pub type ShotId = u64;

// ── Entries ───────────────────────────────────────────────────────────────────

/// One queued shot request.
#[derive(Debug, Clone)]
pub struct ShotEntry<T> {
    pub id: ShotId,
    pub data: T,
    /// Coerced priority; lower = more urgent
    pub priority: i64,
    /// Absolute wall-clock ms; 0 = never expires
    pub expires_at: u64,
}

impl<T> ShotEntry<T> {
    pub fn is_pinned(&self) -> bool {
        self.expires_at == 0
    }
}

/// Truncating coercion into the comparable priority domain. Non-finite
/// input would poison the sort, so it is clamped to the urgency extremes
/// instead of propagating.
fn coerce_priority(raw: f64) -> i64 {
    if raw.is_nan() {
        warn!("shot priority is NaN — clamping to least urgent");
        return i64::MAX;
    }
    if raw.is_infinite() {
        warn!("shot priority is infinite — clamping");
        return if raw > 0.0 { i64::MAX } else { i64::MIN };
    }
    raw as i64
}

// ── Expiring priority queue ───────────────────────────────────────────────────

pub struct ShotQueue<T> {
    entries: Vec<ShotEntry<T>>,
    next_id: ShotId,
    clock: Arc<dyn Clock>,
}

impl<T> ShotQueue<T> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { entries: Vec::new(), next_id: 0, clock }
    }

    /// Insert a shot request and return its id. `ttl_secs <= 0` pins the
    /// entry until it is explicitly removed.
    pub fn push(&mut self, data: T, priority: f64, ttl_secs: f64) -> ShotId {
        self.purge();
        let id = self.next_id;
        self.next_id += 1;
        let expires_at = if ttl_secs <= 0.0 {
            0
        } else {
            self.clock.now_ms() + (ttl_secs * 1000.0) as u64
        };
        self.entries.push(ShotEntry {
            id,
            data,
            priority: coerce_priority(priority),
            expires_at,
        });
        // Stable sort: ties keep insertion order
        self.entries.sort_by_key(|e| e.priority);
        id
    }

    /// Remove and return the least urgent entry (tail of the sorted order).
    pub fn pop(&mut self) -> Option<T> {
        self.purge();
        self.entries.pop().map(|e| e.data)
    }

    /// Remove and return the entry with this id, wherever it sits.
    pub fn remove(&mut self, id: ShotId) -> Option<T> {
        self.purge();
        let idx = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(idx).data)
    }

    /// Most urgent payload, if any.
    pub fn top(&mut self) -> Option<&T> {
        self.purge();
        self.entries.first().map(|e| &e.data)
    }

    /// Least urgent payload, if any.
    pub fn bottom(&mut self) -> Option<&T> {
        self.purge();
        self.entries.last().map(|e| &e.data)
    }

    /// All payloads, most urgent first.
    pub fn all(&mut self) -> Vec<&T> {
        self.purge();
        self.entries.iter().map(|e| &e.data).collect()
    }

    /// The live entries themselves, most urgent first.
    pub fn entries(&mut self) -> &[ShotEntry<T>] {
        self.purge();
        &self.entries
    }

    pub fn len(&mut self) -> usize {
        self.purge();
        self.entries.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    /// Drop everything and restart id assignment from 0.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.next_id = 0;
    }

    fn purge(&mut self) {
        let now = self.clock.now_ms();
        self.entries.retain(|e| e.is_pinned() || e.expires_at > now);
    }
}

// ── Named facade ──────────────────────────────────────────────────────────────

/// Queue wrapper that can address well-known entries by name. The alias
/// table maps names to ids; an entry can still expire or be removed
/// underneath its alias, in which case the alias resolves to nothing.
pub struct NamedShotQueue<T> {
    queue: ShotQueue<T>,
    named: HashMap<String, ShotId>,
}

impl<T> NamedShotQueue<T> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { queue: ShotQueue::new(clock), named: HashMap::new() }
    }

    pub fn push(&mut self, data: T, priority: f64, ttl_secs: f64) -> ShotId {
        self.queue.push(data, priority, ttl_secs)
    }

    /// Push and remember the entry under `name`. Re-using a name repoints
    /// the alias; the previous entry stays queued under its id alone.
    pub fn push_named(&mut self, name: &str, data: T, priority: f64, ttl_secs: f64) -> ShotId {
        let id = self.queue.push(data, priority, ttl_secs);
        self.named.insert(name.to_string(), id);
        id
    }

    /// Pop by name: removes the entry and its alias together. A dangling
    /// alias yields `None` and is dropped.
    pub fn pop_named(&mut self, name: &str) -> Option<T> {
        let id = self.named.remove(name)?;
        self.queue.remove(id)
    }

    /// Pop by id; any alias pointing at the entry is dropped with it.
    pub fn pop_id(&mut self, id: ShotId) -> Option<T> {
        self.named.retain(|_, aliased| *aliased != id);
        self.queue.remove(id)
    }

    /// Alias-table membership. The underlying entry may already be gone.
    pub fn has_named(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    pub fn top(&mut self) -> Option<&T> {
        self.queue.top()
    }

    pub fn bottom(&mut self) -> Option<&T> {
        self.queue.bottom()
    }

    /// Most urgent live entry with its metadata.
    pub fn front(&mut self) -> Option<&ShotEntry<T>> {
        self.queue.entries().first()
    }

    pub fn entries(&mut self) -> &[ShotEntry<T>] {
        self.queue.entries()
    }

    pub fn len(&mut self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.queue.is_empty()
    }

    pub fn reset(&mut self) {
        self.named.clear();
        self.queue.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::ManualClock;

    fn queue_at(start_ms: u64) -> (Arc<ManualClock>, ShotQueue<u32>) {
        let clock = Arc::new(ManualClock::new(start_ms));
        let queue = ShotQueue::new(clock.clone());
        (clock, queue)
    }

    fn named_at(start_ms: u64) -> (Arc<ManualClock>, NamedShotQueue<u32>) {
        let clock = Arc::new(ManualClock::new(start_ms));
        let queue = NamedShotQueue::new(clock.clone());
        (clock, queue)
    }

    #[test]
    fn test_lower_priority_value_wins() {
        let (_clock, mut q) = queue_at(0);
        q.push(1, 5.0, 0.0);
        q.push(2, 1.0, 0.0);
        assert_eq!(q.top(), Some(&2));
        assert_eq!(q.bottom(), Some(&1));
    }

    #[test]
    fn test_equal_priorities_keep_insertion_order() {
        let (_clock, mut q) = queue_at(0);
        q.push(1, 5.0, 0.0);
        q.push(2, 5.0, 0.0);
        q.push(3, 5.0, 0.0);
        assert_eq!(q.all(), vec![&1, &2, &3]);
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let (clock, mut q) = queue_at(10_000);
        q.push(7, 10.0, 1.0);
        clock.advance(1_100);
        assert!(q.all().is_empty());
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn test_entry_dead_at_exact_expiry_instant() {
        let (clock, mut q) = queue_at(10_000);
        q.push(7, 10.0, 1.0);
        clock.advance(999);
        assert_eq!(q.len(), 1);
        clock.advance(1);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let (clock, mut q) = queue_at(0);
        q.push(9, 10.0, 0.0);
        clock.advance(100_000_000);
        assert_eq!(q.top(), Some(&9));
    }

    #[test]
    fn test_ids_unique_monotonic_and_reset() {
        let (_clock, mut q) = queue_at(0);
        let a = q.push(1, 1.0, 0.0);
        let b = q.push(2, 1.0, 0.0);
        let c = q.push(3, 1.0, 0.0);
        assert_eq!((a, b, c), (0, 1, 2));
        q.reset();
        assert_eq!(q.push(4, 1.0, 0.0), 0);
    }

    #[test]
    fn test_pop_takes_least_urgent() {
        let (_clock, mut q) = queue_at(0);
        q.push(10, 5.0, 0.0);
        q.push(20, 1.0, 0.0);
        q.push(30, 9.0, 0.0);
        assert_eq!(q.pop(), Some(30));
        assert_eq!(q.all(), vec![&20, &10]);
    }

    #[test]
    fn test_remove_by_id_from_the_middle() {
        let (_clock, mut q) = queue_at(0);
        q.push(10, 1.0, 0.0);
        let mid = q.push(20, 2.0, 0.0);
        q.push(30, 3.0, 0.0);
        assert_eq!(q.remove(mid), Some(20));
        assert_eq!(q.remove(mid), None);
        assert_eq!(q.all(), vec![&10, &30]);
    }

    #[test]
    fn test_nan_priority_clamped_least_urgent() {
        let (_clock, mut q) = queue_at(0);
        q.push(1, f64::NAN, 0.0);
        q.push(2, 3.0, 0.0);
        assert_eq!(q.top(), Some(&2));
        assert_eq!(q.bottom(), Some(&1));
        assert_eq!(q.entries().last().unwrap().priority, i64::MAX);
    }

    #[test]
    fn test_priority_truncates_toward_zero() {
        let (_clock, mut q) = queue_at(0);
        q.push(1, 2.9, 0.0);
        q.push(2, -2.9, 0.0);
        assert_eq!(q.entries()[0].priority, -2);
        assert_eq!(q.entries()[1].priority, 2);
    }

    #[test]
    fn test_expired_entries_invisible_to_every_accessor() {
        let (clock, mut q) = queue_at(0);
        q.push(1, 1.0, 1.0);
        q.push(2, 2.0, 0.0);
        clock.advance(2_000);
        assert_eq!(q.top(), Some(&2));
        assert_eq!(q.bottom(), Some(&2));
        assert_eq!(q.all(), vec![&2]);
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_named_pop_removes_exactly_once() {
        let (_clock, mut q) = named_at(0);
        q.push_named("startmode", 42, -9999.0, 0.0);
        assert!(q.has_named("startmode"));
        assert_eq!(q.pop_named("startmode"), Some(42));
        assert_eq!(q.pop_named("startmode"), None);
        assert!(!q.has_named("startmode"));
        assert!(q.is_empty());
    }

    #[test]
    fn test_dangling_alias_resolves_to_none() {
        let (clock, mut q) = named_at(0);
        q.push_named("flash", 7, 1.0, 1.0);
        clock.advance(2_000);
        assert!(q.has_named("flash"));
        assert_eq!(q.pop_named("flash"), None);
        assert!(!q.has_named("flash"));
    }

    #[test]
    fn test_pop_id_drops_the_alias_too() {
        let (_clock, mut q) = named_at(0);
        let id = q.push_named("pin", 1, 1.0, 0.0);
        assert_eq!(q.pop_id(id), Some(1));
        assert!(!q.has_named("pin"));
    }

    #[test]
    fn test_reused_name_orphans_the_old_entry() {
        let (_clock, mut q) = named_at(0);
        q.push_named("pin", 1, 1.0, 0.0);
        q.push_named("pin", 2, 2.0, 0.0);
        assert_eq!(q.pop_named("pin"), Some(2));
        assert_eq!(q.len(), 1);
        assert_eq!(q.top(), Some(&1));
    }

    #[test]
    fn test_facade_reset_clears_aliases() {
        let (_clock, mut q) = named_at(0);
        q.push_named("pin", 1, 1.0, 0.0);
        q.reset();
        assert!(!q.has_named("pin"));
        assert!(q.is_empty());
        // id counter restarted
        assert_eq!(q.push(5, 1.0, 0.0), 0);
    }
}
