//! Conflict resolution between slots whose outcomes gate one another.
//!
//! A blocking edge `A -> B` means B may not be admitted until A has
//! produced a render outcome. Predecessors combine with AND semantics:
//!
//! | Predecessor state    | Effect on successor              |
//! |----------------------|----------------------------------|
//! | no outcome yet       | blocked (pending)                |
//! | resolved `Empty`     | released                         |
//! | resolved `Sized(..)` | blocked for the page lifetime    |
//!
//! A sized outcome is terminal; later outcomes for the same slot are
//! ignored. The resolver is the only writer of the deferred set: members
//! are added with [`ConflictResolver::defer`] and leave exactly once, via
//! [`ConflictResolver::drain_releasable`].

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::slot::RenderOutcome;

/// Blocking state of a single slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Clear,
    /// At least one predecessor has not resolved.
    Pending,
    /// A predecessor rendered content.
    Permanent,
}

#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    predecessors: BTreeMap<String, BTreeSet<String>>,
    successors: BTreeMap<String, BTreeSet<String>>,
    outcomes: BTreeMap<String, RenderOutcome>,
    deferred: BTreeSet<String>,
}

impl ConflictResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a resolver from `(slot, blocked_by)` declarations.
    ///
    /// Slots naming an unknown blocker, slots on a blocking cycle, and slots
    /// whose blocker was itself rejected are dropped with one error each.
    /// The edges of accepted slots are loaded.
    pub fn from_declarations<I>(declarations: I) -> (Self, Vec<ConfigError>)
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let mut accepted: BTreeMap<String, BTreeSet<String>> = declarations
            .into_iter()
            .map(|(id, blockers)| (id, blockers.into_iter().collect()))
            .collect();
        let mut errors = Vec::new();

        reject_dangling(&mut accepted, &mut errors);

        let graph = Self::with_edges(&accepted);
        let cycles: Vec<Vec<String>> = accepted
            .keys()
            .filter_map(|id| graph.cycle_through(id))
            .collect();
        for cycle in cycles {
            if let Some(first) = cycle.first() {
                accepted.remove(first);
            }
            errors.push(ConfigError::BlockingCycle { slots: cycle });
        }
        reject_dangling(&mut accepted, &mut errors);

        (Self::with_edges(&accepted), errors)
    }

    fn with_edges(declarations: &BTreeMap<String, BTreeSet<String>>) -> Self {
        let mut resolver = Self::new();
        for (id, blockers) in declarations {
            for blocker in blockers {
                resolver.add_edge(blocker, id);
            }
        }
        resolver
    }

    /// Register `blocker -> blocked`.
    pub fn add_edge(&mut self, blocker: &str, blocked: &str) {
        self.predecessors
            .entry(blocked.to_string())
            .or_default()
            .insert(blocker.to_string());
        self.successors
            .entry(blocker.to_string())
            .or_default()
            .insert(blocked.to_string());
    }

    /// Direct predecessors of `id`.
    pub fn predecessors(&self, id: &str) -> impl Iterator<Item = &str> {
        self.predecessors
            .get(id)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Direct successors of `id`.
    #[must_use]
    pub fn blocked_slot_ids(&self, id: &str) -> Vec<String> {
        self.successors
            .get(id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn outcome(&self, id: &str) -> Option<RenderOutcome> {
        self.outcomes.get(id).copied()
    }

    #[must_use]
    pub fn status(&self, id: &str) -> BlockStatus {
        let mut status = BlockStatus::Clear;
        for pred in self.predecessors(id) {
            match self.outcomes.get(pred) {
                Some(RenderOutcome::Sized(_)) => return BlockStatus::Permanent,
                Some(RenderOutcome::Empty) => {}
                None => status = BlockStatus::Pending,
            }
        }
        status
    }

    #[must_use]
    pub fn is_blocked(&self, id: &str) -> bool {
        self.status(id) != BlockStatus::Clear
    }

    #[must_use]
    pub fn is_permanently_blocked(&self, id: &str) -> bool {
        self.status(id) == BlockStatus::Permanent
    }

    /// Whether `id` still holds back at least one deferred successor.
    #[must_use]
    pub fn is_blocking(&self, id: &str) -> bool {
        self.successors
            .get(id)
            .is_some_and(|s| s.iter().any(|succ| self.deferred.contains(succ)))
    }

    /// Add `id` to the deferred set. Returns false when already deferred.
    pub fn defer(&mut self, id: &str) -> bool {
        self.deferred.insert(id.to_string())
    }

    #[must_use]
    pub fn is_deferred(&self, id: &str) -> bool {
        self.deferred.contains(id)
    }

    pub fn deferred(&self) -> impl Iterator<Item = &str> {
        self.deferred.iter().map(String::as_str)
    }

    /// Record an outcome for `id`.
    ///
    /// Returns the successors that became eligible for re-evaluation: every
    /// direct successor on an empty outcome, none on a sized one. A slot that
    /// already resolved sized keeps that outcome.
    pub fn register_outcome(&mut self, id: &str, outcome: RenderOutcome) -> Vec<String> {
        if let Some(RenderOutcome::Sized(size)) = self.outcomes.get(id) {
            debug!(slot_id = id, size = %size, "Ignoring outcome after terminal sized outcome");
            return Vec::new();
        }
        self.outcomes.insert(id.to_string(), outcome);
        match outcome {
            RenderOutcome::Empty => self.blocked_slot_ids(id),
            RenderOutcome::Sized(_) => Vec::new(),
        }
    }

    /// Remove and return every deferred slot that is no longer blocked.
    pub fn drain_releasable(&mut self) -> Vec<String> {
        let released: Vec<String> = self
            .deferred
            .iter()
            .filter(|id| !self.is_blocked(id))
            .cloned()
            .collect();
        for id in &released {
            self.deferred.remove(id);
        }
        released
    }

    /// Shortest blocking cycle that returns to `start`, as `start -> .. -> start`.
    #[must_use]
    pub fn cycle_through(&self, start: &str) -> Option<Vec<String>> {
        let mut parent: BTreeMap<&str, &str> = BTreeMap::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(start);

        while let Some(node) = queue.pop_front() {
            for next in self.successors.get(node).into_iter().flatten() {
                let next = next.as_str();
                if next == start {
                    let mut path = vec![start.to_string()];
                    let mut cur = node;
                    while cur != start {
                        path.push(cur.to_string());
                        cur = parent.get(cur).copied().unwrap_or(start);
                    }
                    path[1..].reverse();
                    path.push(start.to_string());
                    return Some(path);
                }
                if !parent.contains_key(next) {
                    parent.insert(next, node);
                    queue.push_back(next);
                }
            }
        }
        None
    }
}

/// Drop slots whose blockers are not (or no longer) accepted, to a fixpoint.
fn reject_dangling(
    accepted: &mut BTreeMap<String, BTreeSet<String>>,
    errors: &mut Vec<ConfigError>,
) {
    loop {
        let dangling: Vec<(String, String)> = accepted
            .iter()
            .filter_map(|(id, blockers)| {
                blockers
                    .iter()
                    .find(|b| !accepted.contains_key(*b))
                    .map(|b| (id.clone(), b.clone()))
            })
            .collect();
        if dangling.is_empty() {
            return;
        }
        for (slot, blocker) in dangling {
            accepted.remove(&slot);
            errors.push(ConfigError::UnknownBlocker { slot, blocker });
        }
    }
}
