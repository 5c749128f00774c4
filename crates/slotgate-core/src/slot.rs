//! Slot model: declared configuration, validated slots, and render state.
//!
//! A [`SlotConfig`] is the raw record read from page configuration, with
//! every recognized field enumerated and defaulted. [`Slot::from_config`]
//! validates it against the configured breakpoint tiers and produces a
//! [`Slot`], which also carries the mutable render state driven by the
//! lifecycle controller.
//!
//! # Render state machine
//!
//! ```text
//! Unrequested ──admit──► Requested ──outcome: empty──► RenderedEmpty
//!                            │
//!                            └──outcome: sized──► Rendered(size)
//!
//! Rendered* ──breakpoint change + admit──► Requested
//! ```
//!
//! `hidden` is an orthogonal flag: settable from any state, cleared only by
//! re-admission.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::breakpoint::BreakpointResolver;
use crate::error::ConfigError;
use crate::matcher::SubstringSet;

// =============================================================================
// Sizes
// =============================================================================

/// A creative size in CSS pixels. Serialized as `[width, height]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "[u32; 2]", into = "[u32; 2]")]
pub struct AdSize {
    pub width: u32,
    pub height: u32,
}

impl AdSize {
    /// The `0x0` sentinel meaning "intentionally no ad at this tier".
    pub const ZERO: Self = Self::new(0, 0);

    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl From<[u32; 2]> for AdSize {
    fn from([width, height]: [u32; 2]) -> Self {
        Self { width, height }
    }
}

impl From<AdSize> for [u32; 2] {
    fn from(size: AdSize) -> Self {
        [size.width, size.height]
    }
}

impl fmt::Display for AdSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// True when a size list is the "no ad here" sentinel (a single `0x0`).
#[must_use]
pub fn is_zero_sentinel(sizes: &[AdSize]) -> bool {
    matches!(sizes, [only] if *only == AdSize::ZERO)
}

// =============================================================================
// Enumerations
// =============================================================================

/// Declared slot kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Standard,
    /// Out-of-page passback slot.
    #[serde(alias = "passback")]
    OutOfPage,
    InterstitialSmall,
    InterstitialFull,
    Popunder,
    Talkback,
}

impl SlotKind {
    /// Kinds that render outside the page flow and need no DOM target.
    #[must_use]
    pub const fn is_interstitial_class(self) -> bool {
        matches!(
            self,
            Self::InterstitialSmall | Self::InterstitialFull | Self::Popunder
        )
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::OutOfPage => "out_of_page",
            Self::InterstitialSmall => "interstitial_small",
            Self::InterstitialFull => "interstitial_full",
            Self::Popunder => "popunder",
            Self::Talkback => "talkback",
        }
    }
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Declared priority tier. Ordered so that `High` sorts first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

/// Current user's classification, as reported by the identity provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    #[default]
    Anonymous,
    Registered,
    Paying,
}

impl UserType {
    #[must_use]
    pub const fn is_paying(self) -> bool {
        matches!(self, Self::Paying)
    }
}

/// Audience a slot is declared for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetTier {
    #[default]
    All,
    NonPaying,
    Anonymous,
    Registered,
    Paying,
    DigitalOnly,
    DigitalAndPrint,
}

impl TargetTier {
    /// Whether a user of `user` type belongs to this audience.
    #[must_use]
    pub const fn admits(self, user: UserType) -> bool {
        match self {
            Self::All => true,
            Self::NonPaying => matches!(user, UserType::Anonymous | UserType::Registered),
            Self::Anonymous => matches!(user, UserType::Anonymous),
            Self::Registered => matches!(user, UserType::Registered),
            Self::Paying | Self::DigitalOnly | Self::DigitalAndPrint => {
                matches!(user, UserType::Paying)
            }
        }
    }
}

impl FromStr for TargetTier {
    type Err = String;

    /// Accepts both `snake_case` and the `camelCase` spelling used in markup.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all" => Ok(Self::All),
            "non_paying" | "nonPaying" => Ok(Self::NonPaying),
            "anonymous" => Ok(Self::Anonymous),
            "registered" => Ok(Self::Registered),
            "paying" => Ok(Self::Paying),
            "digital_only" | "digitalOnly" => Ok(Self::DigitalOnly),
            "digital_and_print" | "digitalAndPrint" => Ok(Self::DigitalAndPrint),
            other => Err(format!("unknown audience `{other}`")),
        }
    }
}

// =============================================================================
// Render state
// =============================================================================

/// Backend-reported result of a content request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "size")]
pub enum RenderOutcome {
    Empty,
    Sized(AdSize),
}

impl RenderOutcome {
    #[must_use]
    pub const fn is_empty(self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Render lifecycle of a slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "size")]
pub enum RenderState {
    #[default]
    Unrequested,
    Requested,
    Rendered(AdSize),
    RenderedEmpty,
}

impl RenderState {
    #[must_use]
    pub const fn is_rendered(self) -> bool {
        matches!(self, Self::Rendered(_) | Self::RenderedEmpty)
    }

    fn label(self) -> &'static str {
        match self {
            Self::Unrequested => "unrequested",
            Self::Requested => "requested",
            Self::Rendered(_) => "rendered",
            Self::RenderedEmpty => "rendered_empty",
        }
    }
}

/// Rejected render-state transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("slot `{slot}` cannot move from {from} to {to}")]
pub struct TransitionError {
    pub slot: String,
    pub from: &'static str,
    pub to: &'static str,
}

// =============================================================================
// Configuration record
// =============================================================================

/// Raw slot configuration, as written in `[[slots]]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotConfig {
    pub id: String,
    /// Ad unit path handed to the rendering backend.
    pub path: String,
    pub kind: Option<SlotKind>,
    pub priority: Priority,
    pub target: TargetTier,
    pub responsive: bool,
    /// Fixed sizes for non-responsive slots.
    pub sizes: Vec<AdSize>,
    /// Per-breakpoint sizes for responsive slots.
    pub size_mapping: BTreeMap<String, Vec<AdSize>>,
    pub referrer_allow: Vec<String>,
    pub referrer_deny: Vec<String>,
    /// Define the backend slot only when it is first admitted.
    pub deferred: bool,
    /// Slots whose render outcome this slot waits for.
    pub blocked_by: Vec<String>,
}

impl SlotConfig {
    /// Convenience constructor used by tests and the CLI.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: SlotKind) -> Self {
        let id = id.into();
        Self {
            path: format!("/slotgate/{id}"),
            id,
            kind: Some(kind),
            ..Self::default()
        }
    }
}

// =============================================================================
// Validated slot
// =============================================================================

/// A validated slot plus its mutable lifecycle state.
#[derive(Debug, Clone)]
pub struct Slot {
    id: String,
    path: String,
    kind: SlotKind,
    priority: Priority,
    target: TargetTier,
    responsive: bool,
    sizes: Vec<AdSize>,
    size_mapping: BTreeMap<String, Vec<AdSize>>,
    referrer_allow: SubstringSet,
    referrer_deny: SubstringSet,
    deferred: bool,
    blocked_by: Vec<String>,

    render: RenderState,
    hidden: bool,
    defined: bool,
    requested_at: Option<String>,
    rendered_at: Option<String>,
}

impl Slot {
    /// Validate a configuration record against the breakpoint tiers.
    pub fn from_config(
        config: SlotConfig,
        breakpoints: &BreakpointResolver,
    ) -> Result<Self, ConfigError> {
        let id = config.id.trim().to_string();
        if id.is_empty() {
            return Err(ConfigError::MissingId);
        }
        let kind = config
            .kind
            .ok_or_else(|| ConfigError::MissingKind { slot: id.clone() })?;

        if config.responsive {
            for name in config.size_mapping.keys() {
                if !breakpoints.contains(name) {
                    return Err(ConfigError::UnknownBreakpoint {
                        slot: id,
                        breakpoint: name.clone(),
                    });
                }
            }
            for tier in breakpoints.tiers() {
                if !config.size_mapping.contains_key(&tier.name) {
                    return Err(ConfigError::MissingBreakpointMapping {
                        slot: id,
                        breakpoint: tier.name.clone(),
                    });
                }
            }
        }

        let referrer_allow =
            SubstringSet::new(config.referrer_allow).map_err(|e| ConfigError::InvalidPattern {
                slot: id.clone(),
                reason: e.to_string(),
            })?;
        let referrer_deny =
            SubstringSet::new(config.referrer_deny).map_err(|e| ConfigError::InvalidPattern {
                slot: id.clone(),
                reason: e.to_string(),
            })?;

        let path = if config.path.is_empty() {
            format!("/slotgate/{id}")
        } else {
            config.path
        };

        Ok(Self {
            id,
            path,
            kind,
            priority: config.priority,
            target: config.target,
            responsive: config.responsive,
            sizes: config.sizes,
            size_mapping: config.size_mapping,
            referrer_allow,
            referrer_deny,
            deferred: config.deferred,
            blocked_by: config.blocked_by,
            render: RenderState::Unrequested,
            hidden: false,
            defined: false,
            requested_at: None,
            rendered_at: None,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    #[must_use]
    pub fn target(&self) -> TargetTier {
        self.target
    }

    #[must_use]
    pub fn is_responsive(&self) -> bool {
        self.responsive
    }

    #[must_use]
    pub fn size_mapping(&self) -> &BTreeMap<String, Vec<AdSize>> {
        &self.size_mapping
    }

    #[must_use]
    pub fn referrer_allow(&self) -> &SubstringSet {
        &self.referrer_allow
    }

    #[must_use]
    pub fn referrer_deny(&self) -> &SubstringSet {
        &self.referrer_deny
    }

    #[must_use]
    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    #[must_use]
    pub fn blocked_by(&self) -> &[String] {
        &self.blocked_by
    }

    #[must_use]
    pub fn render_state(&self) -> RenderState {
        self.render
    }

    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    #[must_use]
    pub fn is_defined(&self) -> bool {
        self.defined
    }

    /// Breakpoint the last completed render happened at.
    #[must_use]
    pub fn rendered_at(&self) -> Option<&str> {
        self.rendered_at.as_deref()
    }

    /// Sizes to request at `breakpoint`: the tier mapping for responsive
    /// slots, the fixed list otherwise.
    #[must_use]
    pub fn sizes_at(&self, breakpoint: &str) -> &[AdSize] {
        if self.responsive {
            self.size_mapping
                .get(breakpoint)
                .map_or(&[][..], Vec::as_slice)
        } else {
            &self.sizes
        }
    }

    pub(crate) fn mark_defined(&mut self) {
        self.defined = true;
    }

    /// `Unrequested -> Requested`. Clears `hidden`.
    pub fn mark_requested(&mut self, breakpoint: &str) -> Result<(), TransitionError> {
        if self.render != RenderState::Unrequested {
            return Err(self.transition_error("requested"));
        }
        self.enter_requested(breakpoint);
        Ok(())
    }

    /// `Rendered* -> Requested` after a breakpoint change. Clears `hidden`.
    pub fn rearm(&mut self, breakpoint: &str) -> Result<(), TransitionError> {
        if !self.render.is_rendered() {
            return Err(self.transition_error("requested"));
        }
        self.enter_requested(breakpoint);
        Ok(())
    }

    /// `Requested -> Rendered(size) | RenderedEmpty`.
    pub fn record_outcome(&mut self, outcome: RenderOutcome) -> Result<(), TransitionError> {
        let next = match outcome {
            RenderOutcome::Empty => RenderState::RenderedEmpty,
            RenderOutcome::Sized(size) => RenderState::Rendered(size),
        };
        if self.render != RenderState::Requested {
            return Err(self.transition_error(next.label()));
        }
        self.render = next;
        self.rendered_at = self.requested_at.clone();
        Ok(())
    }

    pub fn hide(&mut self) {
        self.hidden = true;
    }

    fn enter_requested(&mut self, breakpoint: &str) {
        self.render = RenderState::Requested;
        self.hidden = false;
        self.requested_at = Some(breakpoint.to_string());
    }

    fn transition_error(&self, to: &'static str) -> TransitionError {
        TransitionError {
            slot: self.id.clone(),
            from: self.render.label(),
            to,
        }
    }
}
