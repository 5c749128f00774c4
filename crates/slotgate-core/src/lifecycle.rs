//! Slot lifecycle controller: registry, passes, and outcome propagation.
//!
//! The controller owns the slot registry and every collaborator. It is
//! driven by two kinds of input:
//!
//! - **Passes**: [`LifecycleController::run_initial_pass`] evaluates slots in
//!   scheduler order and requests the admitted ones.
//! - **Events**: [`SlotEvent`]s queued with [`LifecycleController::enqueue`]
//!   and consumed in FIFO order by [`LifecycleController::process_events`].
//!
//! # Outcome handling
//!
//! ```text
//! outcome(id) ─► slot.record_outcome ─► conflicts.register_outcome
//!                                           │
//!                  drain_releasable ◄───────┘
//!                        │
//!        for each released id (isolated): gate ─► request | log
//! ```
//!
//! Each released slot is evaluated once per event. A failure on one slot is
//! logged and never stops the others. Throttle writes queued during a pass
//! or event are flushed at its end.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{RenderBackend, SlotHandle};
use crate::breakpoint::{Breakpoint, BreakpointResolver};
use crate::config::Config;
use crate::conflict::{BlockStatus, ConflictResolver};
use crate::error::{ConfigError, EvaluationError, Result};
use crate::gate::{AdmissionDecision, AdmissionGate, DenyReason, GateInputs};
use crate::host::{PageContext, PageHost};
use crate::scheduler::PriorityScheduler;
use crate::slot::{Priority, RenderOutcome, RenderState, Slot, SlotConfig, SlotKind};
use crate::storage::KeyValueStore;
use crate::throttle::{FlushReport, ThrottleClass, ThrottleEngine, epoch_ms};

// =============================================================================
// Events & reports
// =============================================================================

/// External input consumed by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum SlotEvent {
    /// The backend finished rendering `id`.
    Outcome { id: String, outcome: RenderOutcome },
    /// The viewport width changed.
    BreakpointChanged { width: u32 },
}

/// Result of [`LifecycleController::register_slots`].
#[derive(Debug, Default)]
pub struct RegistrationReport {
    /// Accepted ids, in scheduler order.
    pub registered: Vec<String>,
    pub rejected: Vec<ConfigError>,
    /// Accepted ids that start out deferred.
    pub deferred: Vec<String>,
}

/// Result of one evaluation pass or event batch.
#[derive(Debug, Default)]
pub struct PassReport {
    pub admitted: Vec<String>,
    pub denied: Vec<(String, DenyReason)>,
    pub errored: Vec<(String, String)>,
    /// Rendered slots hidden after a breakpoint change.
    pub hidden: Vec<String>,
    pub flush: FlushReport,
}

impl PassReport {
    fn absorb(&mut self, other: Self) {
        self.admitted.extend(other.admitted);
        self.denied.extend(other.denied);
        self.errored.extend(other.errored);
        self.hidden.extend(other.hidden);
        self.flush.applied += other.flush.applied;
        self.flush.failed += other.flush.failed;
    }
}

/// Running totals over the controller's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub admitted: u64,
    pub denied: u64,
    pub errored: u64,
    pub released: u64,
    pub hidden: u64,
    pub outcomes_ignored: u64,
    pub backend_failures: u64,
}

/// Per-slot view in a [`ControllerSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub id: String,
    pub kind: SlotKind,
    pub priority: Priority,
    pub state: RenderState,
    pub hidden: bool,
    pub defined: bool,
    pub deferred: bool,
    pub blocked: BlockStatus,
    pub rendered_at: Option<String>,
}

/// Serializable controller state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub breakpoint: String,
    pub viewport_width: u32,
    pub slots: Vec<SlotSnapshot>,
    pub deferred: Vec<String>,
    pub pending_events: usize,
    pub counters: Counters,
}

/// External collaborators handed to the controller.
pub struct Collaborators<B> {
    pub host: Box<dyn PageHost>,
    pub backend: B,
    /// Device-scoped store for throttle records and funnel state.
    pub durable: Box<dyn KeyValueStore>,
    /// Session-scoped store for per-session flags.
    pub session: Box<dyn KeyValueStore>,
}

// =============================================================================
// Controller
// =============================================================================

pub struct LifecycleController<B: RenderBackend> {
    breakpoints: BreakpointResolver,
    gate: AdmissionGate,
    scheduler: PriorityScheduler,
    throttle: ThrottleEngine,
    conflicts: ConflictResolver,

    slots: BTreeMap<String, Slot>,
    handles: BTreeMap<String, SlotHandle>,
    events: VecDeque<SlotEvent>,

    context: PageContext,
    breakpoint: Breakpoint,
    host: Box<dyn PageHost>,
    backend: B,

    fixed_now: Option<i64>,
    counters: Counters,
}

impl<B: RenderBackend> std::fmt::Debug for LifecycleController<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("breakpoint", &self.breakpoint.name)
            .field("slots", &self.slots.len())
            .field("deferred", &self.conflicts.deferred().count())
            .field("pending_events", &self.events.len())
            .finish()
    }
}

impl<B: RenderBackend> LifecycleController<B> {
    /// Build a controller for one page. Slots in `config` are not registered yet.
    pub fn new(
        config: &Config,
        context: PageContext,
        collaborators: Collaborators<B>,
    ) -> std::result::Result<Self, ConfigError> {
        let breakpoints = BreakpointResolver::new(&config.breakpoints)?;
        let breakpoint = breakpoints.resolve(context.viewport_width);
        let throttle = ThrottleEngine::new(
            config.throttle.clone(),
            collaborators.durable,
            collaborators.session,
        )?;
        Ok(Self {
            gate: AdmissionGate::new(config.gate.clone())?,
            scheduler: PriorityScheduler::new(config.scheduler.clone()),
            breakpoints,
            throttle,
            conflicts: ConflictResolver::new(),
            slots: BTreeMap::new(),
            handles: BTreeMap::new(),
            events: VecDeque::new(),
            context,
            breakpoint,
            host: collaborators.host,
            backend: collaborators.backend,
            fixed_now: None,
            counters: Counters::default(),
        })
    }

    /// Pin the clock used for throttle decisions.
    pub fn set_now(&mut self, now_ms: i64) {
        self.fixed_now = Some(now_ms);
    }

    fn now(&self) -> i64 {
        self.fixed_now.unwrap_or_else(epoch_ms)
    }

    #[must_use]
    pub fn slot(&self, id: &str) -> Option<&Slot> {
        self.slots.get(id)
    }

    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.values()
    }

    #[must_use]
    pub fn breakpoint(&self) -> &Breakpoint {
        &self.breakpoint
    }

    #[must_use]
    pub fn breakpoints(&self) -> &BreakpointResolver {
        &self.breakpoints
    }

    #[must_use]
    pub fn context(&self) -> &PageContext {
        &self.context
    }

    /// Page signals may change between passes (readiness, referrer, identity).
    pub fn context_mut(&mut self) -> &mut PageContext {
        &mut self.context
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn throttle(&self) -> &ThrottleEngine {
        &self.throttle
    }

    #[must_use]
    pub fn conflicts(&self) -> &ConflictResolver {
        &self.conflicts
    }

    #[must_use]
    pub fn counters(&self) -> Counters {
        self.counters
    }

    #[must_use]
    pub fn is_deferred(&self, id: &str) -> bool {
        self.conflicts.is_deferred(id)
    }

    /// Slots in initial-pass order.
    #[must_use]
    pub fn scheduled_ids(&self) -> Vec<String> {
        self.scheduler
            .order(self.slots.values())
            .into_iter()
            .map(|s| s.id().to_string())
            .collect()
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Validate and register slot declarations.
    ///
    /// Invalid declarations are rejected one by one; the rest proceed.
    /// Accepted slots with unresolved blockers join the deferred set, and
    /// scheduled slots that don't use deferred definition are defined now.
    pub fn register_slots<I>(&mut self, configs: I) -> RegistrationReport
    where
        I: IntoIterator<Item = SlotConfig>,
    {
        let mut report = RegistrationReport::default();
        let mut accepted: BTreeMap<String, Slot> = BTreeMap::new();
        let mut new_ids: Vec<String> = Vec::new();

        for config in configs {
            match Slot::from_config(config, &self.breakpoints) {
                Ok(slot) if self.slots.contains_key(slot.id()) || accepted.contains_key(slot.id()) => {
                    report
                        .rejected
                        .push(ConfigError::DuplicateSlot(slot.id().to_string()));
                }
                Ok(slot) => {
                    accepted.insert(slot.id().to_string(), slot);
                }
                Err(err) => report.rejected.push(err),
            }
        }

        let declarations = self
            .slots
            .keys()
            .map(|id| (id.clone(), Vec::new()))
            .chain(
                accepted
                    .values()
                    .map(|s| (s.id().to_string(), s.blocked_by().to_vec())),
            );
        let (_, graph_errors) = ConflictResolver::from_declarations(declarations);
        for err in graph_errors {
            if let Some(id) = err.slot_id() {
                accepted.remove(id);
            }
            report.rejected.push(err);
        }

        for err in &report.rejected {
            warn!(slot_id = err.slot_id().unwrap_or("-"), error = %err, "Slot rejected");
        }

        for slot in accepted.values() {
            for blocker in slot.blocked_by() {
                self.conflicts.add_edge(blocker, slot.id());
            }
        }
        for (id, slot) in accepted {
            new_ids.push(id.clone());
            if self.conflicts.is_blocked(&id) {
                self.conflicts.defer(&id);
                report.deferred.push(id.clone());
                debug!(slot_id = %id, reason = "blocked", "Slot deferred at registration");
            }
            self.slots.insert(id, slot);
        }

        let mut ordered = self.scheduled_ids();
        for id in &ordered {
            let eager = self
                .slots
                .get(id)
                .is_some_and(|s| !s.is_deferred() && !s.is_defined());
            if eager {
                if let Err(err) = self.ensure_defined(id) {
                    self.counters.backend_failures += 1;
                    warn!(slot_id = %id, error = %err, "Slot definition failed");
                }
            }
        }
        ordered.retain(|id| new_ids.contains(id));
        for id in new_ids {
            if !ordered.contains(&id) {
                ordered.push(id);
            }
        }
        report.registered = ordered;
        report
    }

    // -------------------------------------------------------------------------
    // Admission
    // -------------------------------------------------------------------------

    /// Evaluate the gate for `id` without side effects on the slot.
    pub fn admit(&self, id: &str) -> AdmissionDecision {
        let Some(slot) = self.slots.get(id) else {
            return AdmissionDecision::Errored(EvaluationError::UnknownSlot(id.to_string()));
        };
        let inputs = GateInputs {
            context: &self.context,
            host: self.host.as_ref(),
            breakpoints: &self.breakpoints,
            breakpoint: &self.breakpoint,
            conflicts: &self.conflicts,
            throttle: &self.throttle,
            now_ms: self.now(),
        };
        self.gate.evaluate(slot, &inputs)
    }

    /// Evaluate every scheduled, unrequested slot and request the admitted ones.
    pub fn run_initial_pass(&mut self) -> PassReport {
        let mut report = PassReport::default();
        for id in self.scheduled_ids() {
            let unrequested = self
                .slots
                .get(&id)
                .is_some_and(|s| s.render_state() == RenderState::Unrequested);
            if unrequested {
                self.evaluate_and_apply(&id, &mut report);
            }
        }
        report.flush = self.throttle.flush_writes();
        report
    }

    /// Gate `id`, then act on the decision. Never propagates a failure.
    fn evaluate_and_apply(&mut self, id: &str, report: &mut PassReport) -> bool {
        let breakpoint = self.breakpoint.name.clone();
        let span = crate::slot_span!("admit", slot_id = id, breakpoint = breakpoint.as_str());
        let _guard = span.enter();

        let decision = self.admit(id);
        let kind = self.slots.get(id).map(Slot::kind);

        match decision {
            AdmissionDecision::Admitted => match self.request(id) {
                Ok(()) => {
                    self.counters.admitted += 1;
                    info!(
                        slot_id = id,
                        slot_kind = ?kind,
                        breakpoint = %breakpoint,
                        "Slot admitted"
                    );
                    report.admitted.push(id.to_string());
                    true
                }
                Err(err) => {
                    self.counters.backend_failures += 1;
                    warn!(slot_id = id, error = %err, "Slot request failed");
                    report.errored.push((id.to_string(), err.to_string()));
                    false
                }
            },
            AdmissionDecision::Denied(reason) => {
                self.counters.denied += 1;
                match reason {
                    DenyReason::Blocked { .. } => {
                        self.conflicts.defer(id);
                    }
                    DenyReason::Throttled { denial } => {
                        let class = kind.and_then(ThrottleClass::for_kind);
                        if let Some(class) = class {
                            let now_ms = self.now();
                            self.throttle.record_warm_up(class, denial, now_ms);
                        }
                    }
                    _ => {}
                }
                debug!(
                    slot_id = id,
                    slot_kind = ?kind,
                    breakpoint = %breakpoint,
                    reason = reason.label(),
                    "Slot denied"
                );
                report.denied.push((id.to_string(), reason));
                false
            }
            AdmissionDecision::Errored(err) => {
                self.counters.errored += 1;
                warn!(slot_id = id, error = %err, "Slot evaluation failed");
                report.errored.push((id.to_string(), err.to_string()));
                false
            }
        }
    }

    /// Define `id` with the backend if it isn't yet.
    fn ensure_defined(&mut self, id: &str) -> Result<SlotHandle> {
        if let Some(handle) = self.handles.get(id) {
            return Ok(*handle);
        }
        let slot = self
            .slots
            .get_mut(id)
            .ok_or_else(|| EvaluationError::UnknownSlot(id.to_string()))?;
        let handle = self.backend.define_slot(
            slot.path(),
            slot.sizes_at(&self.breakpoint.name),
            slot.id(),
        )?;
        slot.mark_defined();
        self.handles.insert(id.to_string(), handle);
        Ok(handle)
    }

    /// Request content for an admitted slot: display on first request,
    /// refresh when re-armed.
    fn request(&mut self, id: &str) -> Result<()> {
        let handle = self.ensure_defined(id)?;
        let now_ms = self.now();
        let breakpoint = self.breakpoint.name.clone();
        let slot = self
            .slots
            .get_mut(id)
            .ok_or_else(|| EvaluationError::UnknownSlot(id.to_string()))?;

        if slot.render_state().is_rendered() {
            slot.rearm(&breakpoint)?;
            self.backend.refresh(&[handle])?;
        } else {
            slot.mark_requested(&breakpoint)?;
            self.backend.display(handle)?;
        }
        if let Some(class) = ThrottleClass::for_kind(slot.kind()) {
            self.throttle.record_presentation(class, now_ms);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    pub fn enqueue(&mut self, event: SlotEvent) {
        self.events.push_back(event);
    }

    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Consume queued events in order, flushing throttle writes after each.
    pub fn process_events(&mut self) -> PassReport {
        let mut report = PassReport::default();
        while let Some(event) = self.events.pop_front() {
            let mut step = match event {
                SlotEvent::Outcome { id, outcome } => self.handle_outcome(&id, outcome),
                SlotEvent::BreakpointChanged { width } => self.handle_breakpoint_change(width),
            };
            step.flush = self.throttle.flush_writes();
            if step.flush.failed > 0 {
                warn!(failed = step.flush.failed, "Throttle writes dropped");
            }
            report.absorb(step);
        }
        report
    }

    /// Record a backend outcome and re-evaluate released slots.
    pub fn on_outcome(&mut self, id: &str, outcome: RenderOutcome) -> PassReport {
        self.enqueue(SlotEvent::Outcome {
            id: id.to_string(),
            outcome,
        });
        self.process_events()
    }

    /// Apply a new viewport width. Returns how many slots were re-armed,
    /// hidden or newly requested.
    pub fn on_breakpoint_changed(&mut self, width: u32) -> usize {
        self.enqueue(SlotEvent::BreakpointChanged { width });
        let report = self.process_events();
        report.admitted.len() + report.hidden.len()
    }

    fn handle_outcome(&mut self, id: &str, outcome: RenderOutcome) -> PassReport {
        let mut report = PassReport::default();
        let Some(slot) = self.slots.get_mut(id) else {
            self.counters.outcomes_ignored += 1;
            warn!(slot_id = id, "Outcome for unknown slot ignored");
            return report;
        };
        if let Err(err) = slot.record_outcome(outcome) {
            self.counters.outcomes_ignored += 1;
            warn!(slot_id = id, error = %err, "Outcome ignored");
            return report;
        }
        debug!(slot_id = id, outcome = ?outcome, "Outcome recorded");

        self.conflicts.register_outcome(id, outcome);
        let released = self.conflicts.drain_releasable();
        self.counters.released += released.len() as u64;
        for released_id in released {
            debug!(slot_id = %released_id, blocker = id, "Slot released");
            self.evaluate_and_apply(&released_id, &mut report);
        }
        report
    }

    fn handle_breakpoint_change(&mut self, width: u32) -> PassReport {
        let mut report = PassReport::default();
        self.context.viewport_width = width;
        let next = self.breakpoints.resolve(width);
        if next == self.breakpoint {
            return report;
        }
        info!(breakpoint = %next, previous = %self.breakpoint, width, "Breakpoint changed");
        self.breakpoint = next;

        for id in self.scheduled_ids() {
            let Some(slot) = self.slots.get(&id) else {
                continue;
            };
            let state = slot.render_state();
            if state.is_rendered() {
                let current = slot.rendered_at() == Some(self.breakpoint.name.as_str());
                if !slot.is_responsive() || (current && !slot.is_hidden()) {
                    continue;
                }
                if !self.evaluate_and_apply(&id, &mut report) {
                    if let Some(slot) = self.slots.get_mut(&id).filter(|s| !s.is_hidden()) {
                        slot.hide();
                        self.counters.hidden += 1;
                        debug!(slot_id = %id, breakpoint = %self.breakpoint, "Slot hidden");
                        report.hidden.push(id);
                    }
                }
            } else if state == RenderState::Unrequested && !self.conflicts.is_deferred(&id) {
                self.evaluate_and_apply(&id, &mut report);
            }
        }
        report
    }

    // -------------------------------------------------------------------------
    // Snapshot
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            breakpoint: self.breakpoint.name.clone(),
            viewport_width: self.context.viewport_width,
            slots: self
                .slots
                .values()
                .map(|s| SlotSnapshot {
                    id: s.id().to_string(),
                    kind: s.kind(),
                    priority: s.priority(),
                    state: s.render_state(),
                    hidden: s.is_hidden(),
                    defined: s.is_defined(),
                    deferred: self.conflicts.is_deferred(s.id()),
                    blocked: self.conflicts.status(s.id()),
                    rendered_at: s.rendered_at().map(str::to_string),
                })
                .collect(),
            deferred: self.conflicts.deferred().map(str::to_string).collect(),
            pending_events: self.events.len(),
            counters: self.counters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use crate::host::StaticHost;
    use crate::storage::MemoryStore;

    fn controller(host: StaticHost) -> LifecycleController<RecordingBackend> {
        let context = PageContext {
            ready: true,
            viewport_width: 1300,
            ..PageContext::default()
        };
        let mut ctl = LifecycleController::new(
            &Config::default(),
            context,
            Collaborators {
                host: Box::new(host),
                backend: RecordingBackend::new(),
                durable: Box::new(MemoryStore::new()),
                session: Box::new(MemoryStore::new()),
            },
        )
        .unwrap();
        ctl.set_now(1_700_000_000_000);
        ctl
    }

    fn blocked(id: &str, by: &str) -> SlotConfig {
        let mut cfg = SlotConfig::new(id, SlotKind::Standard);
        cfg.blocked_by = vec![by.to_string()];
        cfg
    }

    #[test]
    fn registration_rejects_invalid_and_keeps_siblings() {
        let mut ctl = controller(StaticHost::new());
        let report = ctl.register_slots([
            SlotConfig::new("a", SlotKind::Standard),
            SlotConfig::new("", SlotKind::Standard),
            blocked("b", "ghost"),
            SlotConfig::new("a", SlotKind::Talkback),
            blocked("c", "a"),
        ]);

        assert_eq!(report.registered, vec!["a", "c"]);
        assert_eq!(report.deferred, vec!["c"]);
        assert_eq!(report.rejected.len(), 3);
        assert!(report.rejected.contains(&ConfigError::DuplicateSlot("a".into())));
        assert!(ctl.slot("b").is_none());
        assert!(ctl.is_deferred("c"));
        assert_eq!(ctl.backend().defined(), vec!["a", "c"]);
    }

    #[test]
    fn deferred_definition_waits_for_admission() {
        let mut ctl = controller(StaticHost::new().with_element("lazy"));
        let mut cfg = SlotConfig::new("lazy", SlotKind::Standard);
        cfg.deferred = true;
        ctl.register_slots([cfg]);
        assert!(ctl.backend().defined().is_empty());
        assert!(!ctl.slot("lazy").unwrap().is_defined());

        let report = ctl.run_initial_pass();
        assert_eq!(report.admitted, vec!["lazy"]);
        assert_eq!(ctl.backend().defined(), vec!["lazy"]);
        assert_eq!(ctl.backend().displayed(), vec!["lazy"]);
    }

    #[test]
    fn admit_has_no_side_effects_on_slot() {
        let mut ctl = controller(StaticHost::new().with_element("a"));
        ctl.register_slots([SlotConfig::new("a", SlotKind::Standard)]);
        assert!(ctl.admit("a").is_admitted());
        assert!(ctl.admit("a").is_admitted());
        assert_eq!(ctl.slot("a").unwrap().render_state(), RenderState::Unrequested);
        assert!(ctl.admit("missing").is_errored());
    }

    #[test]
    fn outcome_for_unrequested_slot_is_ignored() {
        let mut ctl = controller(StaticHost::new());
        ctl.register_slots([SlotConfig::new("a", SlotKind::Standard), blocked("b", "a")]);
        ctl.on_outcome("a", RenderOutcome::Empty);
        ctl.on_outcome("nobody", RenderOutcome::Empty);
        assert_eq!(ctl.counters().outcomes_ignored, 2);
        assert!(ctl.is_deferred("b"), "ignored outcome must not release");
    }

    #[test]
    fn snapshot_is_serializable() {
        let mut ctl = controller(StaticHost::new().with_element("a"));
        ctl.register_slots([SlotConfig::new("a", SlotKind::Standard), blocked("b", "a")]);
        ctl.run_initial_pass();

        let snapshot = ctl.snapshot();
        assert_eq!(snapshot.breakpoint, "xl");
        assert_eq!(snapshot.deferred, vec!["b"]);
        assert_eq!(snapshot.counters.admitted, 1);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["slots"][0]["state"]["state"], "requested");
        assert_eq!(json["slots"][1]["blocked"], "pending");
    }
}
