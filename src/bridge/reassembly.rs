//! Reassembly of concatenated (multi-part) SMS.
//!
//! Parts of one message share a carrier-assigned reference and may arrive in any
//! order, interleaved with other messages. References are small counters that get
//! reused, so a pending entry only lives for `max_age`: the periodic [`sweep`] drops
//! abandoned entries, and a fragment for a reference whose entry has outlived the
//! horizon starts over instead of merging into the stale parts.
//!
//! An entry completes only when its distinct part count equals the announced total.
//! Entries that overshoot (a shrinking total) or can never complete (total 0) wait for
//! the sweep.
//!
//! [`sweep`]: ReassemblyTable::sweep

use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct PendingConcatenation {
    total_parts: u8,
    parts: BTreeMap<u8, String>,
    created: Instant,
}

impl PendingConcatenation {
    fn new(total_parts: u8, created: Instant) -> Self {
        Self {
            total_parts,
            parts: BTreeMap::new(),
            created,
        }
    }

    fn is_complete(&self) -> bool {
        self.parts.len() == self.total_parts as usize
    }

    fn into_text(self) -> String {
        // BTreeMap iterates in ascending part order
        self.parts.into_values().collect()
    }
}

#[derive(Debug)]
pub struct ReassemblyTable {
    pending: HashMap<u16, PendingConcatenation>,
    max_age: Duration,
}

impl ReassemblyTable {
    pub fn new(max_age: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            max_age,
        }
    }

    /// Record one fragment. Returns the full text once every part of `reference` is in.
    pub fn add_fragment(
        &mut self,
        reference: u16,
        part_index: u8,
        total_parts: u8,
        text: &str,
    ) -> Option<String> {
        self.add_fragment_at(reference, part_index, total_parts, text, Instant::now())
    }

    pub fn add_fragment_at(
        &mut self,
        reference: u16,
        part_index: u8,
        total_parts: u8,
        text: &str,
        now: Instant,
    ) -> Option<String> {
        if self
            .pending
            .get(&reference)
            .is_some_and(|entry| now.saturating_duration_since(entry.created) > self.max_age)
        {
            debug!("Reference {} reused after expiry, discarding stale parts", reference);
            self.pending.remove(&reference);
        }

        let entry = self
            .pending
            .entry(reference)
            .or_insert_with(|| PendingConcatenation::new(total_parts, now));
        // carrier metadata is trusted; the latest total wins
        entry.total_parts = total_parts;
        entry.parts.insert(part_index, text.to_string());

        if entry.is_complete() {
            return self.pending.remove(&reference).map(PendingConcatenation::into_text);
        }
        None
    }

    /// Drop entries older than the horizon. Returns how many were evicted.
    pub fn sweep(&mut self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&mut self, now: Instant) -> usize {
        let before = self.pending.len();
        let max_age = self.max_age;
        self.pending
            .retain(|_, entry| now.saturating_duration_since(entry.created) <= max_age);
        before - self.pending.len()
    }

    pub fn contains(&self, reference: u16) -> bool {
        self.pending.contains_key(&reference)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_out_of_order_parts_join_by_index() {
        let mut table = ReassemblyTable::new(HOUR);
        assert_eq!(table.add_fragment(7, 2, 2, "World"), None);
        assert_eq!(table.add_fragment(7, 1, 2, "Hello "), Some("Hello World".to_string()));
    }

    #[test]
    fn test_entry_lifecycle_leaves_no_residue() {
        let mut table = ReassemblyTable::new(HOUR);
        assert!(!table.contains(9));
        table.add_fragment(9, 1, 3, "a");
        assert!(table.contains(9));
        table.add_fragment(9, 3, 3, "c");
        assert_eq!(table.add_fragment(9, 2, 3, "b"), Some("abc".to_string()));
        assert!(!table.contains(9));
        assert!(table.is_empty());
    }

    #[test]
    fn test_every_arrival_order_gives_same_text() {
        let parts = ["one ", "two ", "three ", "four"];
        let orders = [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1], [1, 3, 0, 2]];
        for order in orders {
            let mut table = ReassemblyTable::new(HOUR);
            let mut result = None;
            for &i in &order {
                result = table.add_fragment(1, i as u8 + 1, 4, parts[i]);
            }
            assert_eq!(result.as_deref(), Some("one two three four"), "order {:?}", order);
        }
    }

    #[test]
    fn test_references_do_not_interfere() {
        let mut table = ReassemblyTable::new(HOUR);
        assert_eq!(table.add_fragment(1, 1, 2, "A1"), None);
        assert_eq!(table.add_fragment(2, 2, 2, "B2"), None);
        assert_eq!(table.add_fragment(2, 1, 2, "B1"), Some("B1B2".to_string()));
        assert!(table.contains(1));
        assert_eq!(table.add_fragment(1, 2, 2, "A2"), Some("A1A2".to_string()));
    }

    #[test]
    fn test_duplicate_part_overwrites_without_completing() {
        let mut table = ReassemblyTable::new(HOUR);
        assert_eq!(table.add_fragment(3, 1, 2, "old"), None);
        assert_eq!(table.add_fragment(3, 1, 2, "new"), None);
        assert_eq!(table.len(), 1);
        assert_eq!(table.add_fragment(3, 2, 2, "!"), Some("new!".to_string()));
    }

    #[test]
    fn test_sweep_evicts_only_expired_entries() {
        let start = Instant::now();
        let mut table = ReassemblyTable::new(Duration::from_secs(60));
        table.add_fragment_at(1, 1, 2, "old", start);
        table.add_fragment_at(2, 1, 2, "fresh", start + Duration::from_secs(50));
        assert_eq!(table.sweep_at(start + Duration::from_secs(61)), 1);
        assert!(!table.contains(1));
        assert!(table.contains(2));
    }

    #[test]
    fn test_reused_reference_after_expiry_starts_fresh() {
        let start = Instant::now();
        let mut table = ReassemblyTable::new(Duration::from_secs(60));
        // part 1 of an old message whose part 2 was lost
        table.add_fragment_at(5, 1, 2, "stale ", start);
        let later = start + Duration::from_secs(120);
        assert_eq!(table.add_fragment_at(5, 2, 2, "new tail", later), None);
        assert_eq!(
            table.add_fragment_at(5, 1, 2, "new head ", later),
            Some("new head new tail".to_string())
        );
    }

    #[test]
    fn test_shrunk_total_never_publishes_extra_parts() {
        let start = Instant::now();
        let mut table = ReassemblyTable::new(Duration::from_secs(60));
        assert_eq!(table.add_fragment_at(1, 1, 4, "a", start), None);
        assert_eq!(table.add_fragment_at(1, 2, 4, "b", start), None);
        assert_eq!(table.add_fragment_at(1, 3, 4, "c", start), None);
        assert_eq!(table.add_fragment_at(1, 4, 2, "d", start), None);
        assert!(table.contains(1));
        assert_eq!(table.sweep_at(start + Duration::from_secs(61)), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_zero_total_waits_for_sweep() {
        let start = Instant::now();
        let mut table = ReassemblyTable::new(Duration::from_secs(60));
        assert_eq!(table.add_fragment_at(2, 1, 0, "z", start), None);
        assert!(table.contains(2));
        assert_eq!(table.sweep_at(start + Duration::from_secs(61)), 1);
    }

    #[test]
    fn test_single_part_with_metadata_completes_immediately() {
        let mut table = ReassemblyTable::new(HOUR);
        assert_eq!(table.add_fragment(4, 1, 1, "solo"), Some("solo".to_string()));
        assert!(table.is_empty());
    }
}
