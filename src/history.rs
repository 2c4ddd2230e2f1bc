//! Bounded session history.
//!
//! Both histories evict oldest-first once full:
//! - `AttentivenessSeries`: one percentage per processed frame
//! - `ThumbnailStore`: cropped student images keyed by capture second

use std::collections::VecDeque;

use serde::Serialize;

use crate::detect::ObjectClass;

pub const DEFAULT_THUMBNAIL_CAPACITY: usize = 200;
pub const DEFAULT_SERIES_CAPACITY: usize = 3_600;

/// Append-only ring buffer that remembers how many items were ever pushed.
#[derive(Clone, Debug)]
pub struct BoundedHistory<T> {
    items: VecDeque<T>,
    capacity: usize,
    total_pushed: u64,
}

impl<T> BoundedHistory<T> {
    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(4_096)),
            capacity,
            total_pushed: 0,
        }
    }

    /// Append an item, returning the evicted oldest item when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        self.total_pushed += 1;
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }

    /// Absolute position (0-based) of the oldest retained item.
    pub fn first_position(&self) -> u64 {
        self.total_pushed - self.items.len() as u64
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }
}

/// Attentiveness percentages, one per processed frame.
#[derive(Clone, Debug)]
pub struct AttentivenessSeries {
    points: BoundedHistory<u8>,
}

impl AttentivenessSeries {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: BoundedHistory::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, percentage: u8) {
        self.points.push(percentage.min(100));
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn total_points(&self) -> u64 {
        self.points.total_pushed()
    }

    pub fn latest(&self) -> Option<u8> {
        self.points.latest().copied()
    }

    pub fn values(&self) -> Vec<u8> {
        self.points.iter().copied().collect()
    }

    /// `(label, value)` pairs. Labels are 1-based frame numbers and stay absolute
    /// after eviction.
    pub fn labeled(&self) -> Vec<(u64, u8)> {
        let first = self.points.first_position();
        self.points
            .iter()
            .enumerate()
            .map(|(i, v)| (first + i as u64 + 1, *v))
            .collect()
    }
}

impl Default for AttentivenessSeries {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SERIES_CAPACITY)
    }
}

/// Stored crop of a detected student.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ThumbnailRecord {
    /// Capture time, `%H:%M:%S` local.
    pub timestamp: String,
    /// `data:image/jpeg;base64,...`
    pub image_data_url: String,
    pub status: ObjectClass,
}

/// Thumbnails keyed by capture second.
///
/// Records captured within the same second share a key: the later write replaces
/// the earlier one in place. New keys evict the oldest key once full.
#[derive(Clone, Debug)]
pub struct ThumbnailStore {
    records: VecDeque<ThumbnailRecord>,
    capacity: usize,
    overwrites: u64,
}

impl ThumbnailStore {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(1_024)),
            capacity,
            overwrites: 0,
        }
    }

    /// Insert or replace by timestamp. Returns the evicted record, if any.
    pub fn insert(&mut self, record: ThumbnailRecord) -> Option<ThumbnailRecord> {
        if let Some(existing) = self
            .records
            .iter_mut()
            .find(|r| r.timestamp == record.timestamp)
        {
            *existing = record;
            self.overwrites += 1;
            return None;
        }
        let evicted = if self.records.len() >= self.capacity {
            self.records.pop_front()
        } else {
            None
        };
        self.records.push_back(record);
        evicted
    }

    pub fn get(&self, timestamp: &str) -> Option<&ThumbnailRecord> {
        self.records.iter().find(|r| r.timestamp == timestamp)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// How many inserts replaced a record with the same timestamp.
    pub fn overwrites(&self) -> u64 {
        self.overwrites
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &ThumbnailRecord> {
        self.records.iter()
    }
}

impl Default for ThumbnailStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_THUMBNAIL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(timestamp: &str, status: ObjectClass) -> ThumbnailRecord {
        ThumbnailRecord {
            timestamp: timestamp.to_string(),
            image_data_url: format!("data:image/jpeg;base64,{}", timestamp),
            status,
        }
    }

    #[test]
    fn bounded_history_evicts_oldest_first() {
        let mut history = BoundedHistory::with_capacity(3);
        for i in 0..3 {
            assert_eq!(history.push(i), None);
        }
        assert_eq!(history.push(3), Some(0));
        assert_eq!(history.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(history.total_pushed(), 4);
        assert_eq!(history.first_position(), 1);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut history = BoundedHistory::with_capacity(0);
        history.push('a');
        history.push('b');
        assert_eq!(history.len(), 1);
        assert_eq!(history.latest(), Some(&'b'));
    }

    #[test]
    fn series_labels_stay_absolute_after_eviction() {
        let mut series = AttentivenessSeries::with_capacity(2);
        series.push(10);
        series.push(20);
        series.push(30);
        assert_eq!(series.labeled(), vec![(2, 20), (3, 30)]);
        assert_eq!(series.total_points(), 3);
    }

    #[test]
    fn series_clamps_to_percentage_range() {
        let mut series = AttentivenessSeries::default();
        series.push(250);
        assert_eq!(series.latest(), Some(100));
    }

    #[test]
    fn same_second_thumbnails_collapse_to_one() {
        let mut store = ThumbnailStore::default();
        store.insert(record("10:00:01", ObjectClass::Attentive));
        store.insert(record("10:00:01", ObjectClass::Unattentive));

        assert_eq!(store.len(), 1);
        assert_eq!(store.overwrites(), 1);
        assert_eq!(
            store.get("10:00:01").unwrap().status,
            ObjectClass::Unattentive
        );
    }

    #[test]
    fn overwrite_keeps_original_position() {
        let mut store = ThumbnailStore::default();
        store.insert(record("10:00:01", ObjectClass::Attentive));
        store.insert(record("10:00:02", ObjectClass::Attentive));
        store.insert(record("10:00:01", ObjectClass::Unattentive));

        let order: Vec<&str> = store.iter().map(|r| r.timestamp.as_str()).collect();
        assert_eq!(order, vec!["10:00:01", "10:00:02"]);
    }

    #[test]
    fn thumbnail_store_evicts_oldest_key() {
        let mut store = ThumbnailStore::with_capacity(2);
        store.insert(record("10:00:01", ObjectClass::Attentive));
        store.insert(record("10:00:02", ObjectClass::Attentive));
        let evicted = store.insert(record("10:00:03", ObjectClass::Attentive));

        assert_eq!(evicted.unwrap().timestamp, "10:00:01");
        assert!(store.get("10:00:01").is_none());
        assert_eq!(store.len(), 2);
    }
}
