//! Admission gate: one decision per slot from eleven ordered predicates.
//!
//! Predicates run in a fixed order and the first failure wins; later
//! predicates are never evaluated. A predicate that fails to evaluate
//! (host query error, configuration gap) yields
//! [`AdmissionDecision::Errored`], which callers must not mistake for a
//! normal denial.
//!
//! | Step | Predicate                                                     | Denial                |
//! |------|---------------------------------------------------------------|-----------------------|
//! | 1    | page ready                                                    | `NotReady`            |
//! | 2    | DOM target exists, or interstitial-class outside a web-view   | `NoTarget`            |
//! | 3    | throttle policy allows                                        | `Throttled`           |
//! | 4    | no blocking predecessor pending or sized                      | `Blocked`             |
//! | 5    | referrer matches allow-list (empty list passes)               | `ReferrerNotAllowed`  |
//! | 6    | referrer matches no deny-list entry                           | `ReferrerDenied`      |
//! | 7    | slot id not suppressed inside a web-view                      | `WebviewSuppressed`   |
//! | 8    | out-of-page slot not hidden mid purchase funnel               | `FunnelSuppressed`    |
//! | 9    | responsive slot has an ad at the current breakpoint           | `NoAdAtBreakpoint`    |
//! | 10   | installed-app session valid                                   | `InvalidAppSession`   |
//! | 11   | audience matches the user (or bypass identity)                | `TargetMismatch`      |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::breakpoint::{Breakpoint, BreakpointResolver};
use crate::conflict::{BlockStatus, ConflictResolver};
use crate::error::{ConfigError, EvaluationError};
use crate::host::{AUDIENCE_ATTRIBUTE, FunnelState, PageContext, PageHost};
use crate::matcher::SubstringSet;
use crate::slot::{Slot, SlotKind, TargetTier};
use crate::throttle::{ThrottleContext, ThrottleDenial, ThrottleEngine, ThrottleVerdict};

// =============================================================================
// Configuration
// =============================================================================

/// Purchase-funnel suppression of out-of-page slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunnelConfig {
    pub enabled: bool,
    /// Funnel count at which out-of-page slots show again.
    pub threshold: u32,
    /// Durable store key holding `{"count", "inFunnel"}`.
    pub key: String,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 3,
            key: "slotgate.funnel".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Slot-id substrings suppressed when running inside a web-view.
    pub webview_suppressed_ids: Vec<String>,
    pub funnel: FunnelConfig,
    /// User id that skips audience targeting. Off unless configured.
    pub targeting_bypass_user: Option<String>,
}

// =============================================================================
// Decisions
// =============================================================================

/// Why the gate refused a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum DenyReason {
    NotReady,
    NoTarget,
    Throttled { denial: ThrottleDenial },
    Blocked { permanent: bool },
    ReferrerNotAllowed,
    ReferrerDenied,
    WebviewSuppressed,
    FunnelSuppressed,
    NoAdAtBreakpoint,
    InvalidAppSession,
    TargetMismatch,
}

impl DenyReason {
    /// Position of the failing predicate, 1-based.
    #[must_use]
    pub const fn step(self) -> u8 {
        match self {
            Self::NotReady => 1,
            Self::NoTarget => 2,
            Self::Throttled { .. } => 3,
            Self::Blocked { .. } => 4,
            Self::ReferrerNotAllowed => 5,
            Self::ReferrerDenied => 6,
            Self::WebviewSuppressed => 7,
            Self::FunnelSuppressed => 8,
            Self::NoAdAtBreakpoint => 9,
            Self::InvalidAppSession => 10,
            Self::TargetMismatch => 11,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::NotReady => "not_ready",
            Self::NoTarget => "no_target",
            Self::Throttled { .. } => "throttled",
            Self::Blocked { .. } => "blocked",
            Self::ReferrerNotAllowed => "referrer_not_allowed",
            Self::ReferrerDenied => "referrer_denied",
            Self::WebviewSuppressed => "webview_suppressed",
            Self::FunnelSuppressed => "funnel_suppressed",
            Self::NoAdAtBreakpoint => "no_ad_at_breakpoint",
            Self::InvalidAppSession => "invalid_app_session",
            Self::TargetMismatch => "target_mismatch",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Gate result. `Errored` is fail-closed and distinct from `Denied`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admitted,
    Denied(DenyReason),
    Errored(EvaluationError),
}

impl AdmissionDecision {
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }

    #[must_use]
    pub const fn is_errored(&self) -> bool {
        matches!(self, Self::Errored(_))
    }

    #[must_use]
    pub const fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Self::Denied(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Everything a gate evaluation reads, borrowed from the controller.
pub struct GateInputs<'a> {
    pub context: &'a PageContext,
    pub host: &'a dyn PageHost,
    pub breakpoints: &'a BreakpointResolver,
    pub breakpoint: &'a Breakpoint,
    pub conflicts: &'a ConflictResolver,
    pub throttle: &'a ThrottleEngine,
    pub now_ms: i64,
}

// =============================================================================
// Gate
// =============================================================================

#[derive(Debug, Clone)]
pub struct AdmissionGate {
    config: GateConfig,
    webview_ids: SubstringSet,
}

impl AdmissionGate {
    pub fn new(config: GateConfig) -> Result<Self, ConfigError> {
        let webview_ids = SubstringSet::new(config.webview_suppressed_ids.iter().cloned())
            .map_err(|e| ConfigError::ParseFailed(format!("gate.webview_suppressed_ids: {e}")))?;
        Ok(Self {
            config,
            webview_ids,
        })
    }

    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Evaluate every predicate in order for `slot`.
    pub fn evaluate(&self, slot: &Slot, inputs: &GateInputs<'_>) -> AdmissionDecision {
        match self.first_denial(slot, inputs) {
            Ok(None) => AdmissionDecision::Admitted,
            Ok(Some(reason)) => AdmissionDecision::Denied(reason),
            Err(err) => AdmissionDecision::Errored(err),
        }
    }

    fn first_denial(
        &self,
        slot: &Slot,
        inputs: &GateInputs<'_>,
    ) -> Result<Option<DenyReason>, EvaluationError> {
        let ctx = inputs.context;
        let id = slot.id();

        if !ctx.ready {
            return Ok(Some(DenyReason::NotReady));
        }

        let floating = slot.kind().is_interstitial_class() && !ctx.in_webview;
        if !floating && !inputs.host.element_exists(id)? {
            return Ok(Some(DenyReason::NoTarget));
        }

        let throttle_ctx = ThrottleContext {
            user: ctx.user.user_type,
            referrer: &ctx.referrer,
            ready_to_render: ctx.interstitial_ready,
        };
        if let ThrottleVerdict::Deny(denial) =
            inputs.throttle.check_kind(slot.kind(), &throttle_ctx, inputs.now_ms)
        {
            return Ok(Some(DenyReason::Throttled { denial }));
        }

        match inputs.conflicts.status(id) {
            BlockStatus::Clear => {}
            status => {
                return Ok(Some(DenyReason::Blocked {
                    permanent: status == BlockStatus::Permanent,
                }));
            }
        }

        let allow = slot.referrer_allow();
        if !allow.is_empty() && !allow.matches(&ctx.referrer) {
            return Ok(Some(DenyReason::ReferrerNotAllowed));
        }
        if slot.referrer_deny().matches(&ctx.referrer) {
            return Ok(Some(DenyReason::ReferrerDenied));
        }

        if ctx.in_webview && self.webview_ids.matches(id) {
            return Ok(Some(DenyReason::WebviewSuppressed));
        }

        if slot.kind() == SlotKind::OutOfPage && self.funnel_suppresses(ctx, inputs.throttle) {
            return Ok(Some(DenyReason::FunnelSuppressed));
        }

        if slot.is_responsive() && !inputs.breakpoints.has_ad_at(slot, inputs.breakpoint)? {
            return Ok(Some(DenyReason::NoAdAtBreakpoint));
        }

        if ctx.in_app && !ctx.app_session_valid {
            return Ok(Some(DenyReason::InvalidAppSession));
        }

        if self.bypasses_targeting(ctx) {
            return Ok(None);
        }
        let target = self.effective_target(slot, inputs.host)?;
        if !target.admits(ctx.user.user_type) {
            return Ok(Some(DenyReason::TargetMismatch));
        }

        Ok(None)
    }

    /// Mid-funnel users below the threshold don't see out-of-page slots.
    fn funnel_suppresses(&self, ctx: &PageContext, throttle: &ThrottleEngine) -> bool {
        let funnel = &self.config.funnel;
        if !funnel.enabled {
            return false;
        }
        let state = ctx
            .funnel
            .or_else(|| FunnelState::load(throttle.durable_store(), &funnel.key));
        state.is_some_and(|s| s.in_funnel && s.count < funnel.threshold)
    }

    fn bypasses_targeting(&self, ctx: &PageContext) -> bool {
        match (&self.config.targeting_bypass_user, &ctx.user.id) {
            (Some(bypass), Some(user)) => bypass == user,
            _ => false,
        }
    }

    /// Configured audience, unless markup overrides it.
    fn effective_target(
        &self,
        slot: &Slot,
        host: &dyn PageHost,
    ) -> Result<TargetTier, EvaluationError> {
        let attributes = host.element_attributes(slot.id())?;
        let Some(raw) = attributes.get(AUDIENCE_ATTRIBUTE) else {
            return Ok(slot.target());
        };
        match TargetTier::from_str(raw) {
            Ok(tier) => Ok(tier),
            Err(reason) => {
                warn!(slot_id = slot.id(), %reason, "Ignoring audience override");
                Ok(slot.target())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::BTreeMap;

    use super::*;
    use crate::breakpoint::BreakpointConfig;
    use crate::host::{StaticHost, UserProfile};
    use crate::slot::{AdSize, SlotConfig, UserType};
    use crate::storage::MemoryStore;
    use crate::throttle::ThrottleConfig;

    struct Fixture {
        gate: AdmissionGate,
        context: PageContext,
        host: StaticHost,
        breakpoints: BreakpointResolver,
        conflicts: ConflictResolver,
        throttle: ThrottleEngine,
    }

    impl Fixture {
        fn new() -> Self {
            let breakpoints =
                BreakpointResolver::new(&BreakpointConfig::from_pairs(&[("s", 0), ("l", 1000)]))
                    .unwrap();
            let throttle = ThrottleEngine::new(
                ThrottleConfig::default(),
                Box::new(MemoryStore::new()),
                Box::new(MemoryStore::new()),
            )
            .unwrap();
            Self {
                gate: AdmissionGate::new(GateConfig::default()).unwrap(),
                context: PageContext {
                    ready: true,
                    viewport_width: 1200,
                    ..PageContext::default()
                },
                host: StaticHost::new().with_element("top").with_element("side"),
                breakpoints,
                conflicts: ConflictResolver::new(),
                throttle,
            }
        }

        fn slot(&self, cfg: SlotConfig) -> Slot {
            Slot::from_config(cfg, &self.breakpoints).unwrap()
        }

        fn eval_with(&mut self, slot: &Slot, host: &dyn PageHost) -> AdmissionDecision {
            let breakpoint = self.breakpoints.resolve(self.context.viewport_width);
            let inputs = GateInputs {
                context: &self.context,
                host,
                breakpoints: &self.breakpoints,
                breakpoint: &breakpoint,
                conflicts: &self.conflicts,
                throttle: &self.throttle,
                now_ms: 1_000,
            };
            self.gate.evaluate(slot, &inputs)
        }

        fn eval(&mut self, slot: &Slot) -> AdmissionDecision {
            let host = self.host.clone();
            self.eval_with(slot, &host)
        }
    }

    /// Host that panics on any query.
    struct PanickingHost;

    impl PageHost for PanickingHost {
        fn element_exists(&self, id: &str) -> Result<bool, EvaluationError> {
            panic!("element_exists({id}) must not be evaluated");
        }
        fn element_attributes(&self, id: &str) -> Result<BTreeMap<String, String>, EvaluationError> {
            panic!("element_attributes({id}) must not be evaluated");
        }
    }

    /// Host whose queries fail.
    struct FailingHost {
        calls: Cell<u32>,
    }

    impl PageHost for FailingHost {
        fn element_exists(&self, _id: &str) -> Result<bool, EvaluationError> {
            self.calls.set(self.calls.get() + 1);
            Err(EvaluationError::Host("dom unavailable".into()))
        }
        fn element_attributes(&self, _id: &str) -> Result<BTreeMap<String, String>, EvaluationError> {
            Err(EvaluationError::Host("dom unavailable".into()))
        }
    }

    fn standard(id: &str) -> SlotConfig {
        SlotConfig::new(id, SlotKind::Standard)
    }

    #[test]
    fn admits_plain_slot() {
        let mut fx = Fixture::new();
        let slot = fx.slot(standard("top"));
        assert_eq!(fx.eval(&slot), AdmissionDecision::Admitted);
    }

    #[test]
    fn not_ready_short_circuits_everything() {
        let mut fx = Fixture::new();
        fx.context.ready = false;
        let slot = fx.slot(standard("top"));
        assert_eq!(
            fx.eval_with(&slot, &PanickingHost),
            AdmissionDecision::Denied(DenyReason::NotReady)
        );
    }

    #[test]
    fn host_failure_is_errored_not_denied() {
        let mut fx = Fixture::new();
        let slot = fx.slot(standard("top"));
        let host = FailingHost { calls: Cell::new(0) };
        let decision = fx.eval_with(&slot, &host);
        assert!(decision.is_errored());
        assert_eq!(decision.deny_reason(), None);
        assert_eq!(host.calls.get(), 1);
    }

    #[test]
    fn missing_target_denied() {
        let mut fx = Fixture::new();
        let slot = fx.slot(standard("ghost"));
        assert_eq!(fx.eval(&slot), AdmissionDecision::Denied(DenyReason::NoTarget));
    }

    #[test]
    fn interstitial_needs_no_target_outside_webview() {
        let mut fx = Fixture::new();
        let slot = fx.slot(SlotConfig::new("overlay", SlotKind::Popunder));
        assert!(fx.eval(&slot).is_admitted());

        fx.context.in_webview = true;
        assert_eq!(fx.eval(&slot), AdmissionDecision::Denied(DenyReason::NoTarget));
    }

    #[test]
    fn throttle_runs_before_conflicts() {
        let mut fx = Fixture::new();
        fx.conflicts.add_edge("top", "overlay");
        let slot = fx.slot(SlotConfig::new("overlay", SlotKind::InterstitialFull));
        assert_eq!(
            fx.eval(&slot),
            AdmissionDecision::Denied(DenyReason::Throttled {
                denial: ThrottleDenial::NotAffiliate
            })
        );
    }

    #[test]
    fn blocked_slot_denied_with_permanence() {
        let mut fx = Fixture::new();
        fx.conflicts.add_edge("top", "side");
        let slot = fx.slot(standard("side"));
        assert_eq!(
            fx.eval(&slot),
            AdmissionDecision::Denied(DenyReason::Blocked { permanent: false })
        );
        fx.conflicts
            .register_outcome("top", crate::slot::RenderOutcome::Sized(AdSize::new(970, 250)));
        assert_eq!(
            fx.eval(&slot),
            AdmissionDecision::Denied(DenyReason::Blocked { permanent: true })
        );
    }

    #[test]
    fn referrer_lists() {
        let mut fx = Fixture::new();
        let mut cfg = standard("top");
        cfg.referrer_allow = vec!["news.example".into()];
        cfg.referrer_deny = vec!["spam".into()];
        let slot = fx.slot(cfg);

        fx.context.referrer = "https://other.example".into();
        assert_eq!(fx.eval(&slot), AdmissionDecision::Denied(DenyReason::ReferrerNotAllowed));

        fx.context.referrer = "https://news.example/spam".into();
        assert_eq!(fx.eval(&slot), AdmissionDecision::Denied(DenyReason::ReferrerDenied));

        fx.context.referrer = "https://news.example/today".into();
        assert!(fx.eval(&slot).is_admitted());
    }

    #[test]
    fn webview_suppression() {
        let mut fx = Fixture::new();
        fx.gate = AdmissionGate::new(GateConfig {
            webview_suppressed_ids: vec!["side".into()],
            ..GateConfig::default()
        })
        .unwrap();
        let slot = fx.slot(standard("side"));
        assert!(fx.eval(&slot).is_admitted());
        fx.context.in_webview = true;
        assert_eq!(fx.eval(&slot), AdmissionDecision::Denied(DenyReason::WebviewSuppressed));
    }

    #[test]
    fn funnel_suppresses_out_of_page_mid_funnel() {
        let mut fx = Fixture::new();
        fx.gate = AdmissionGate::new(GateConfig {
            funnel: FunnelConfig {
                enabled: true,
                threshold: 3,
                ..FunnelConfig::default()
            },
            ..GateConfig::default()
        })
        .unwrap();
        let slot = fx.slot(SlotConfig::new("top", SlotKind::OutOfPage));

        assert!(fx.eval(&slot).is_admitted(), "no funnel state");
        fx.context.funnel = Some(FunnelState {
            count: 1,
            in_funnel: true,
        });
        assert_eq!(fx.eval(&slot), AdmissionDecision::Denied(DenyReason::FunnelSuppressed));
        fx.context.funnel = Some(FunnelState {
            count: 3,
            in_funnel: true,
        });
        assert!(fx.eval(&slot).is_admitted());
        fx.context.funnel = Some(FunnelState {
            count: 0,
            in_funnel: false,
        });
        assert!(fx.eval(&slot).is_admitted());

        let standard_slot = fx.slot(standard("side"));
        fx.context.funnel = Some(FunnelState {
            count: 0,
            in_funnel: true,
        });
        assert!(fx.eval(&standard_slot).is_admitted());
    }

    #[test]
    fn breakpoint_containment() {
        let mut fx = Fixture::new();
        let mut cfg = standard("top");
        cfg.responsive = true;
        cfg.size_mapping.insert("s".into(), vec![AdSize::ZERO]);
        cfg.size_mapping.insert("l".into(), vec![AdSize::new(970, 250)]);
        let slot = fx.slot(cfg);

        assert!(fx.eval(&slot).is_admitted());
        fx.context.viewport_width = 400;
        assert_eq!(fx.eval(&slot), AdmissionDecision::Denied(DenyReason::NoAdAtBreakpoint));
    }

    #[test]
    fn app_session_only_checked_in_app() {
        let mut fx = Fixture::new();
        let slot = fx.slot(standard("top"));
        fx.context.app_session_valid = false;
        assert!(fx.eval(&slot).is_admitted());
        fx.context.in_app = true;
        assert_eq!(fx.eval(&slot), AdmissionDecision::Denied(DenyReason::InvalidAppSession));
    }

    #[test]
    fn targeting_and_markup_override() {
        let mut fx = Fixture::new();
        let mut cfg = standard("top");
        cfg.target = TargetTier::Paying;
        let slot = fx.slot(cfg);
        assert_eq!(fx.eval(&slot), AdmissionDecision::Denied(DenyReason::TargetMismatch));

        fx.host = StaticHost::new().with_attribute("top", AUDIENCE_ATTRIBUTE, "nonPaying");
        assert!(fx.eval(&slot).is_admitted());

        fx.host = StaticHost::new().with_attribute("top", AUDIENCE_ATTRIBUTE, "vip");
        assert_eq!(fx.eval(&slot), AdmissionDecision::Denied(DenyReason::TargetMismatch));
    }

    #[test]
    fn bypass_identity_skips_targeting() {
        let mut fx = Fixture::new();
        fx.gate = AdmissionGate::new(GateConfig {
            targeting_bypass_user: Some("qa-1".into()),
            ..GateConfig::default()
        })
        .unwrap();
        let mut cfg = standard("top");
        cfg.target = TargetTier::Registered;
        let slot = fx.slot(cfg);
        assert!(!fx.eval(&slot).is_admitted());

        fx.context.user = UserProfile {
            user_type: UserType::Anonymous,
            id: Some("qa-1".into()),
            ..UserProfile::default()
        };
        assert!(fx.eval(&slot).is_admitted());
    }

    #[test]
    fn evaluation_is_idempotent() {
        let mut fx = Fixture::new();
        fx.conflicts.add_edge("top", "side");
        for cfg in [standard("top"), standard("side"), standard("ghost")] {
            let slot = fx.slot(cfg);
            let first = fx.eval(&slot);
            assert_eq!(first, fx.eval(&slot));
        }
    }

    #[test]
    fn throttled_evaluation_is_idempotent_for_paying_users() {
        let mut fx = Fixture::new();
        fx.context.user.user_type = UserType::Paying;
        let slot = fx.slot(SlotConfig::new("overlay", SlotKind::InterstitialSmall));
        for _ in 0..3 {
            assert_eq!(fx.eval(&slot), AdmissionDecision::Admitted);
        }
    }

    #[test]
    fn deny_reason_steps_are_ordered() {
        assert_eq!(DenyReason::NotReady.step(), 1);
        assert_eq!(DenyReason::TargetMismatch.step(), 11);
        assert_eq!(DenyReason::Blocked { permanent: true }.to_string(), "blocked");
    }
}
