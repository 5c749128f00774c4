//! Definition and admission order for the initial pass.
//!
//! # Ordering
//!
//! | Key | Rule                                                                 |
//! |-----|----------------------------------------------------------------------|
//! | 1   | priority tier: `high`, then `normal`, then `low` (if scheduled)      |
//! | 2   | ids containing the pinned keyword before ids without it              |
//! | 3   | among pinned ids: first position of the keyword, ascending           |
//! | 4   | lexicographic id                                                     |
//!
//! This fixes request order only. Render completion order is up to the
//! backend, and re-evaluation after outcome events ignores it.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::slot::{Priority, Slot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Ids containing this keyword are scheduled first within a tier. Empty disables pinning.
    pub pinned_keyword: String,
    /// Whether `low` slots take part in the initial pass.
    pub schedule_low: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pinned_keyword: "billboard".to_string(),
            schedule_low: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PriorityScheduler {
    config: SchedulerConfig,
}

impl PriorityScheduler {
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn pin_position(&self, id: &str) -> Option<usize> {
        if self.config.pinned_keyword.is_empty() {
            return None;
        }
        id.find(self.config.pinned_keyword.as_str())
    }

    /// Tie-break between two ids of the same tier.
    #[must_use]
    pub fn compare_ids(&self, a: &str, b: &str) -> Ordering {
        match (self.pin_position(a), self.pin_position(b)) {
            (Some(pa), Some(pb)) => pa.cmp(&pb).then_with(|| a.cmp(b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.cmp(b),
        }
    }

    /// Sort ids of one tier in place.
    pub fn sort_ids<S: AsRef<str>>(&self, ids: &mut [S]) {
        ids.sort_by(|a, b| self.compare_ids(a.as_ref(), b.as_ref()));
    }

    #[must_use]
    pub fn is_scheduled(&self, priority: Priority) -> bool {
        priority != Priority::Low || self.config.schedule_low
    }

    /// Order `(id, priority)` pairs, dropping unscheduled tiers.
    #[must_use]
    pub fn order_ids<'a>(&self, entries: &[(&'a str, Priority)]) -> Vec<&'a str> {
        let mut kept: Vec<(&'a str, Priority)> = entries
            .iter()
            .copied()
            .filter(|(_, p)| self.is_scheduled(*p))
            .collect();
        kept.sort_by(|(a, pa), (b, pb)| pa.cmp(pb).then_with(|| self.compare_ids(a, b)));
        kept.into_iter().map(|(id, _)| id).collect()
    }

    /// Order slots for the initial pass.
    #[must_use]
    pub fn order<'s, I>(&self, slots: I) -> Vec<&'s Slot>
    where
        I: IntoIterator<Item = &'s Slot>,
    {
        let mut kept: Vec<&Slot> = slots
            .into_iter()
            .filter(|s| self.is_scheduled(s.priority()))
            .collect();
        kept.sort_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| self.compare_ids(a.id(), b.id()))
        });
        kept
    }
}
