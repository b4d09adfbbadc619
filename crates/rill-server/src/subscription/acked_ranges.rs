//! Sparse set of acknowledged record ids kept as disjoint, non-adjacent
//! inclusive ranges.
//!
//! The set only tracks ids at or above the delivery window's lower bound;
//! acks below it and duplicates are ignored, so folding acks is idempotent
//! regardless of arrival order.

use std::collections::BTreeMap;
use tracing::trace;

use rill_common::{Lsn, RecordId};

/// Number of records per batch, keyed by the batch LSN. Populated as
/// batches are read; pruning is optional and correctness never depends on
/// an entry below the window lower bound.
pub type BatchNumMap = BTreeMap<Lsn, u32>;

/// The id delivered immediately after `id` in stream order.
///
/// Within a known batch this advances the index. Past the last record of a
/// batch, or when the batch is unknown (gap endpoints are the one
/// legitimate source of unknown batches), it advances to `(batch + 1, 0)`.
/// The storage layer reports every LSN hole as a gap, and gaps are folded
/// into the ack set, so stepping into the next LSN can never strand the
/// window in front of a hole.
pub fn successor(id: RecordId, batches: &BatchNumMap) -> RecordId {
    match batches.get(&id.batch_id) {
        Some(&count) if (id.batch_index as u64 + 1) < count as u64 => {
            RecordId::new(id.batch_id, id.batch_index + 1)
        }
        _ => RecordId::new(id.batch_id + 1, 0),
    }
}

/// Inclusive range of record ids, `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordIdRange {
    pub start: RecordId,
    pub end: RecordId,
}

impl RecordIdRange {
    pub fn new(start: RecordId, end: RecordId) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }
}

/// Outcome of folding one ack into the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckInsert {
    Inserted,
    /// The id was already covered by a range.
    Duplicate,
    /// The id sits below the window lower bound; already checkpointed.
    BelowWindow,
}

/// Ordered set of acked ranges. Keys are range starts; ranges are pairwise
/// disjoint and non-adjacent (adjacent inserts merge on entry).
#[derive(Debug, Clone, Default)]
pub struct AckedRanges {
    ranges: BTreeMap<RecordId, RecordIdRange>,
}

impl AckedRanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Whether `id` is covered by some range.
    pub fn covers(&self, id: RecordId) -> bool {
        self.ranges
            .range(..=id)
            .next_back()
            .map_or(false, |(_, range)| id <= range.end)
    }

    /// Fold one ack into the set, merging with neighbours when the id is
    /// adjacent to them under `successor`.
    pub fn insert_ack(
        &mut self,
        id: RecordId,
        lower_bound: RecordId,
        batches: &BatchNumMap,
    ) -> AckInsert {
        if id < lower_bound {
            return AckInsert::BelowWindow;
        }
        let pred = self
            .ranges
            .range(..=id)
            .next_back()
            .map(|(&start, &range)| (start, range));
        if let Some((_, range)) = pred {
            if id <= range.end {
                return AckInsert::Duplicate;
            }
        }

        // Absorb a range that begins right after the new id.
        let next_id = successor(id, batches);
        let end = match self.ranges.remove(&next_id) {
            Some(range) => range.end,
            None => id,
        };

        match pred {
            Some((start, range)) if successor(range.end, batches) == id => {
                self.ranges.insert(start, RecordIdRange::new(start, end));
            }
            _ => {
                self.ranges.insert(id, RecordIdRange::new(id, end));
            }
        }
        trace!(%id, ranges = self.ranges.len(), "ack folded");
        AckInsert::Inserted
    }

    /// Record a storage gap `[lo, hi]` as a synthetic fully-acked range
    /// covering every possible index of the gapped LSNs.
    pub fn insert_gap(&mut self, lo: Lsn, hi: Lsn, batches: &BatchNumMap) {
        let mut start = RecordId::new(lo, 0);
        let mut end = RecordId::new(hi, u32::MAX);

        // Merge a predecessor that overlaps or touches the gap.
        if let Some((&pred_start, &pred)) = self.ranges.range(..=start).next_back() {
            if pred.end >= start || successor(pred.end, batches) >= start {
                self.ranges.remove(&pred_start);
                start = pred_start;
                end = end.max(pred.end);
            }
        }
        // Absorb every range starting inside the gap or right after it.
        let absorb_until = successor(end, batches);
        let absorbed: Vec<RecordId> = self
            .ranges
            .range(start..=absorb_until)
            .map(|(&s, _)| s)
            .collect();
        for key in absorbed {
            if let Some(range) = self.ranges.remove(&key) {
                end = end.max(range.end);
            }
        }
        self.ranges.insert(start, RecordIdRange::new(start, end));
    }

    /// Remove the minimum range when it covers the window lower bound. On
    /// success the lower bound moves one past the removed range's end and
    /// that end is returned as the checkpoint record id.
    ///
    /// A range can begin strictly below the lower bound only through a
    /// storage gap reported over already-checkpointed ground (a window
    /// that started mid-batch); such coverage still advances, and a range
    /// lying entirely below the window is discarded without a commit.
    pub fn advance_window(
        &mut self,
        lower_bound: &mut RecordId,
        batches: &BatchNumMap,
    ) -> Option<RecordId> {
        loop {
            let (start, range) = {
                let (&start, &range) = self.ranges.first_key_value()?;
                (start, range)
            };
            if start > *lower_bound {
                return None;
            }
            self.ranges.remove(&start);
            if range.end < *lower_bound {
                continue;
            }
            *lower_bound = successor(range.end, batches);
            return Some(range.end);
        }
    }

    /// Iterate ranges in order.
    pub fn iter(&self) -> impl Iterator<Item = &RecordIdRange> {
        self.ranges.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(batch: Lsn, index: u32) -> RecordId {
        RecordId::new(batch, index)
    }

    fn batches(entries: &[(Lsn, u32)]) -> BatchNumMap {
        entries.iter().copied().collect()
    }

    /// Canonicity: ranges are pairwise disjoint and non-adjacent.
    fn assert_canonical(set: &AckedRanges, map: &BatchNumMap) {
        let ranges: Vec<_> = set.iter().copied().collect();
        for range in &ranges {
            assert!(range.start <= range.end);
        }
        for pair in ranges.windows(2) {
            assert!(pair[0].end < pair[1].start, "overlap: {pair:?}");
            assert!(
                successor(pair[0].end, map) < pair[1].start,
                "adjacent ranges left unmerged: {pair:?}"
            );
        }
    }

    #[test]
    fn successor_walks_within_and_across_batches() {
        let map = batches(&[(10, 2), (11, 1)]);
        assert_eq!(successor(id(10, 0), &map), id(10, 1));
        assert_eq!(successor(id(10, 1), &map), id(11, 0));
        // Last record of the last known batch: documented policy.
        assert_eq!(successor(id(11, 0), &map), id(12, 0));
        // Unknown batch (a gap endpoint) steps to the next LSN.
        assert_eq!(successor(id(20, u32::MAX), &map), id(21, 0));
    }

    #[test]
    fn out_of_order_acks_merge_to_one_range() {
        let map = batches(&[(10, 2), (11, 1)]);
        let mut set = AckedRanges::new();
        let lower = id(10, 0);

        assert_eq!(set.insert_ack(id(11, 0), lower, &map), AckInsert::Inserted);
        assert_eq!(set.len(), 1);

        // (10,1) is the last record of batch 10, adjacent to (11,0).
        assert_eq!(set.insert_ack(id(10, 1), lower, &map), AckInsert::Inserted);
        assert_eq!(set.len(), 1);
        assert_canonical(&set, &map);

        assert_eq!(set.insert_ack(id(10, 0), lower, &map), AckInsert::Inserted);
        assert_eq!(set.len(), 1);
        let only = set.iter().next().unwrap();
        assert_eq!(*only, RecordIdRange::new(id(10, 0), id(11, 0)));
        assert_canonical(&set, &map);
    }

    #[test]
    fn duplicate_and_below_window_acks_are_ignored() {
        let map = batches(&[(10, 2)]);
        let mut set = AckedRanges::new();
        let lower = id(10, 0);

        assert_eq!(set.insert_ack(id(10, 1), lower, &map), AckInsert::Inserted);
        assert_eq!(set.insert_ack(id(10, 1), lower, &map), AckInsert::Duplicate);
        assert_eq!(set.len(), 1);

        assert_eq!(
            set.insert_ack(id(9, 0), lower, &map),
            AckInsert::BelowWindow
        );
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn insert_is_canonical_for_any_arrival_order() {
        let map = batches(&[(1, 3), (2, 1), (3, 2)]);
        let all = [id(1, 0), id(1, 1), id(1, 2), id(2, 0), id(3, 0), id(3, 1)];
        // A handful of deliberately adversarial permutations.
        let orders: [[usize; 6]; 4] = [
            [0, 1, 2, 3, 4, 5],
            [5, 4, 3, 2, 1, 0],
            [2, 0, 4, 1, 5, 3],
            [3, 5, 0, 2, 4, 1],
        ];
        for order in orders {
            let mut set = AckedRanges::new();
            for &i in &order {
                set.insert_ack(all[i], id(1, 0), &map);
                assert_canonical(&set, &map);
            }
            assert_eq!(set.len(), 1, "order {order:?} did not fully merge");
            let only = set.iter().next().unwrap();
            assert_eq!(*only, RecordIdRange::new(id(1, 0), id(3, 1)));
        }
    }

    #[test]
    fn advance_requires_min_range_at_lower_bound() {
        let map = batches(&[(10, 2), (11, 1)]);
        let mut set = AckedRanges::new();
        let mut lower = id(10, 0);

        set.insert_ack(id(11, 0), lower, &map);
        assert_eq!(set.advance_window(&mut lower, &map), None);
        assert_eq!(lower, id(10, 0));

        set.insert_ack(id(10, 0), lower, &map);
        set.insert_ack(id(10, 1), lower, &map);
        assert_eq!(set.advance_window(&mut lower, &map), Some(id(11, 0)));
        assert_eq!(lower, id(12, 0));
        assert_eq!(set.advance_window(&mut lower, &map), None);
        assert!(set.is_empty());
    }

    #[test]
    fn advance_drains_consecutive_ranges_one_at_a_time() {
        let map = batches(&[(10, 1), (11, 1)]);
        let mut set = AckedRanges::new();
        let mut lower = id(10, 0);

        // Two ranges that are consecutive but not adjacent in the map
        // (batch 12 unknown when 11 was acked).
        set.insert_ack(id(10, 0), lower, &map);
        assert_eq!(set.advance_window(&mut lower, &map), Some(id(10, 0)));
        assert_eq!(lower, id(11, 0));
        set.insert_ack(id(11, 0), lower, &map);
        assert_eq!(set.advance_window(&mut lower, &map), Some(id(11, 0)));
        assert_eq!(lower, id(12, 0));
    }

    #[test]
    fn advance_tolerates_gap_starting_below_the_window() {
        // Window opened mid-batch, then the whole batch was trimmed.
        let map = batches(&[(6, 1)]);
        let mut set = AckedRanges::new();
        let mut lower = id(5, 2);
        set.insert_gap(5, 5, &map);
        assert_eq!(set.advance_window(&mut lower, &map), Some(id(5, u32::MAX)));
        assert_eq!(lower, id(6, 0));
    }

    #[test]
    fn advance_discards_ranges_entirely_below_the_window() {
        let map = batches(&[(10, 1)]);
        let mut set = AckedRanges::new();
        let mut lower = id(10, 0);
        set.insert_gap(3, 4, &map);
        set.insert_ack(id(10, 0), lower, &map);
        assert_eq!(set.advance_window(&mut lower, &map), Some(id(10, 0)));
        assert_eq!(lower, id(11, 0));
        assert!(set.is_empty());
    }

    #[test]
    fn gap_range_covers_unacked_lsns() {
        let map = BatchNumMap::new();
        let mut set = AckedRanges::new();
        set.insert_gap(100, 110, &map);
        assert!(set.covers(id(100, 0)));
        assert!(set.covers(id(105, 7)));
        assert!(set.covers(id(110, u32::MAX)));
        assert!(!set.covers(id(111, 0)));
    }

    #[test]
    fn ack_after_gap_merges_and_advances_through_it() {
        // Gap [100, 110], then a one-record batch at 111.
        let mut map = BatchNumMap::new();
        let mut set = AckedRanges::new();
        let mut lower = id(100, 0);

        set.insert_gap(100, 110, &map);
        map.insert(111, 1);
        set.insert_ack(id(111, 0), lower, &map);
        // (111,0) is adjacent to the gap end (110,MAX): one range.
        assert_eq!(set.len(), 1);

        assert_eq!(set.advance_window(&mut lower, &map), Some(id(111, 0)));
        assert_eq!(lower, id(112, 0));
        assert!(set.is_empty());
    }

    #[test]
    fn gap_absorbs_overlapping_and_adjacent_ranges() {
        let map = batches(&[(99, 1), (111, 1)]);
        let mut set = AckedRanges::new();
        let lower = id(99, 0);

        set.insert_ack(id(99, 0), lower, &map);
        set.insert_ack(id(111, 0), lower, &map);
        set.insert_gap(100, 110, &map);

        assert_eq!(set.len(), 1);
        let only = set.iter().next().unwrap();
        assert_eq!(*only, RecordIdRange::new(id(99, 0), id(111, 0)));
        assert_canonical(&set, &map);
    }
}
