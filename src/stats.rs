//! Process-wide detection statistics.
//!
//! `Aggregator` owns the only mutable state shared between requests. Writers
//! (`record`, `reset`) take the write lock for the whole three-field update, so a
//! reader never observes a half-applied pass.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::detect::Detection;
use crate::CLASSES;

/// Default capacity of the recent-detections window.
pub const DEFAULT_MAX_RECENT: usize = 50;

/// One completed detection pass. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub timestamp: DateTime<Local>,
    pub detections: Vec<Detection>,
    pub total: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub total_detections: u64,
    pub class_counts: BTreeMap<String, u64>,
    /// Oldest first; newest appended at the end.
    pub recent_detections: Vec<DetectionRecord>,
}

impl Stats {
    /// Zeroed statistics with every known class pre-seeded.
    pub fn empty() -> Self {
        Self {
            total_detections: 0,
            class_counts: CLASSES.iter().map(|class| (class.to_string(), 0)).collect(),
            recent_detections: Vec::new(),
        }
    }

    pub fn class_count(&self, class: &str) -> u64 {
        self.class_counts.get(class).copied().unwrap_or(0)
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::empty()
    }
}

pub struct Aggregator {
    capacity: usize,
    inner: RwLock<Stats>,
}

impl Aggregator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(Stats::empty()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fold one completed pass into the counters and history window.
    pub fn record(&self, detections: &[Detection]) {
        let record = DetectionRecord {
            timestamp: Local::now(),
            detections: detections.to_vec(),
            total: detections.len(),
        };

        let mut stats = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        stats.total_detections += detections.len() as u64;
        for detection in detections {
            if let Some(count) = stats.class_counts.get_mut(&detection.class) {
                *count += 1;
            }
        }
        stats.recent_detections.push(record);
        let len = stats.recent_detections.len();
        if len > self.capacity {
            stats.recent_detections.drain(..len - self.capacity);
        }
    }

    /// Consistent copy of the current statistics.
    pub fn snapshot(&self) -> Stats {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Restore all fields to their initial values in one step.
    pub fn reset(&self) {
        let mut stats = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *stats = Stats::empty();
        log::info!("detection statistics reset");
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn det(class: &str) -> Detection {
        Detection {
            bbox: [0, 0, 10, 10],
            confidence: 0.9,
            class: class.to_string(),
        }
    }

    #[test]
    fn record_updates_totals_and_known_classes() {
        let agg = Aggregator::default();
        agg.record(&[det("no helmet"), det("safe"), det("safe"), det("forklift")]);

        let stats = agg.snapshot();
        assert_eq!(stats.total_detections, 4);
        assert_eq!(stats.class_count("no helmet"), 1);
        assert_eq!(stats.class_count("safe"), 2);
        assert_eq!(stats.class_count("unsafe"), 0);
        assert!(!stats.class_counts.contains_key("forklift"));
        assert_eq!(stats.recent_detections.len(), 1);
        assert_eq!(stats.recent_detections[0].total, 4);
    }

    #[test]
    fn empty_pass_still_appends_a_record() {
        let agg = Aggregator::default();
        agg.record(&[]);
        let stats = agg.snapshot();
        assert_eq!(stats.total_detections, 0);
        assert_eq!(stats.recent_detections.len(), 1);
    }

    #[test]
    fn history_keeps_newest_records_in_order() {
        let agg = Aggregator::new(3);
        for n in 0..7 {
            let batch: Vec<_> = (0..n).map(|_| det("safe")).collect();
            agg.record(&batch);
            assert!(agg.snapshot().recent_detections.len() <= 3);
        }
        let totals: Vec<_> = agg
            .snapshot()
            .recent_detections
            .iter()
            .map(|r| r.total)
            .collect();
        assert_eq!(totals, vec![4, 5, 6]);
    }

    #[test]
    fn reset_clears_everything() {
        let agg = Aggregator::new(5);
        for _ in 0..20 {
            agg.record(&[det("unsafe")]);
        }
        agg.reset();
        let stats = agg.snapshot();
        assert_eq!(stats, Stats::empty());
        assert!(stats.class_counts.values().all(|count| *count == 0));
        assert_eq!(stats.class_counts.len(), CLASSES.len());
    }

    #[test]
    fn concurrent_records_are_never_torn() {
        let agg = Arc::new(Aggregator::new(1000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let agg = agg.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        agg.record(&[det("safe"), det("no jacket")]);
                        let snap = agg.snapshot();
                        let class_sum: u64 = snap.class_counts.values().sum();
                        assert_eq!(class_sum, snap.total_detections);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let stats = agg.snapshot();
        assert_eq!(stats.total_detections, 800);
        assert_eq!(stats.class_count("safe"), 400);
    }

    #[test]
    fn reset_racing_record_leaves_consistent_snapshots() {
        let agg = Arc::new(Aggregator::new(5));
        let check = |snap: &Stats| {
            let class_sum: u64 = snap.class_counts.values().sum();
            assert_eq!(class_sum, snap.total_detections);
            assert!(snap.recent_detections.len() <= 5);
            // every windowed pass was counted after the last reset
            let windowed: u64 = snap.recent_detections.iter().map(|r| r.total as u64).sum();
            assert!(windowed <= snap.total_detections);
            assert_eq!(snap.class_counts.len(), CLASSES.len());
        };

        let mut handles = Vec::new();
        for _ in 0..4 {
            let agg = agg.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..200 {
                    agg.record(&[det("safe"), det("no jacket")]);
                }
            }));
        }
        for _ in 0..2 {
            let agg = agg.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    agg.reset();
                    std::thread::yield_now();
                }
            }));
        }
        for _ in 0..2 {
            let agg = agg.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..500 {
                    check(&agg.snapshot());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        check(&agg.snapshot());
        agg.reset();
        assert_eq!(agg.snapshot(), Stats::empty());
    }

    #[test]
    fn snapshot_serializes_to_dashboard_json() {
        let agg = Aggregator::default();
        agg.record(&[det("safe")]);
        let json = serde_json::to_value(agg.snapshot()).unwrap();
        assert_eq!(json["total_detections"], 1);
        assert_eq!(json["class_counts"]["safe"], 1);
        assert_eq!(json["recent_detections"][0]["detections"][0]["class"], "safe");
    }
}
