//! Error types for slotgate-core

use std::fmt::Write;
use thiserror::Error;

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            alternatives: Vec::new(),
        }
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for slotgate-core
#[derive(Error, Debug)]
pub enum Error {
    /// Slot or page configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// A gate predicate failed while evaluating a slot
    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    /// Durable store errors
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Rendering backend errors
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Render-state transition rejected
    #[error("Lifecycle error: {0}")]
    Transition(#[from] crate::slot::TransitionError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Config(err) => Some(err.remediation()),
            Self::Evaluation(_) => Some(
                Remediation::new("Check the host integration that answers DOM and identity queries.")
                    .alternative("Re-run with RUST_LOG=slotgate_core=debug to see the failing predicate."),
            ),
            Self::Persistence(_) => Some(
                Remediation::new("Inspect the durable store file; malformed records are ignored.")
                    .alternative("Delete the store file to reset throttle state."),
            ),
            Self::Backend(_) => Some(Remediation::new(
                "Verify the rendering backend accepted the slot definition.",
            )),
            Self::Transition(_) => Some(Remediation::new(
                "Outcomes are only accepted for requested slots; check the event order.",
            )),
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .alternative("Verify the store directory exists and is writable."),
            ),
            Self::Json(_) => Some(
                Remediation::new("Validate the JSON input and retry.")
                    .alternative("Check for trailing commas or invalid UTF-8."),
            ),
        }
    }
}

/// Configuration errors. Fatal for the offending slot only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("slot is missing an id")]
    MissingId,

    #[error("slot `{slot}` is missing a kind")]
    MissingKind { slot: String },

    #[error("duplicate slot id `{0}`")]
    DuplicateSlot(String),

    #[error("responsive slot `{slot}` has no size mapping for breakpoint `{breakpoint}`")]
    MissingBreakpointMapping { slot: String, breakpoint: String },

    #[error("slot `{slot}` maps sizes for unknown breakpoint `{breakpoint}`")]
    UnknownBreakpoint { slot: String, breakpoint: String },

    #[error("invalid breakpoint tiers: {0}")]
    InvalidBreakpoints(String),

    #[error("slot `{slot}` is blocked by unknown or rejected slot `{blocker}`")]
    UnknownBlocker { slot: String, blocker: String },

    #[error("blocking cycle between slots: {}", slots.join(" -> "))]
    BlockingCycle { slots: Vec<String> },

    #[error("slot `{slot}` has an invalid substring list: {reason}")]
    InvalidPattern { slot: String, reason: String },

    #[error("failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("failed to parse config: {0}")]
    ParseFailed(String),
}

impl ConfigError {
    /// Slot id the error is attributed to, when there is one.
    #[must_use]
    pub fn slot_id(&self) -> Option<&str> {
        match self {
            Self::MissingKind { slot }
            | Self::MissingBreakpointMapping { slot, .. }
            | Self::UnknownBreakpoint { slot, .. }
            | Self::UnknownBlocker { slot, .. }
            | Self::InvalidPattern { slot, .. } => Some(slot),
            Self::DuplicateSlot(id) => Some(id),
            Self::BlockingCycle { slots } => slots.first().map(String::as_str),
            _ => None,
        }
    }

    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::MissingId | Self::MissingKind { .. } => {
                Remediation::new("Give every [[slots]] entry an `id` and a `kind`.")
            }
            Self::DuplicateSlot(_) => Remediation::new("Slot ids must be unique per page."),
            Self::MissingBreakpointMapping { .. } => Remediation::new(
                "Add a size_mapping entry for every breakpoint tier of a responsive slot.",
            )
            .alternative("Use [[0, 0]] to state that the slot has no ad at a tier."),
            Self::UnknownBreakpoint { .. } | Self::InvalidBreakpoints(_) => Remediation::new(
                "Breakpoint names must match [breakpoints] tiers, listed by ascending min_width.",
            ),
            Self::UnknownBlocker { .. } | Self::BlockingCycle { .. } => Remediation::new(
                "Every blocked_by entry must name another configured slot without forming a cycle.",
            ),
            Self::InvalidPattern { .. } => {
                Remediation::new("Check referrer allow/deny entries for invalid substrings.")
            }
            Self::ReadFailed(..) | Self::ParseFailed(_) => Remediation::new(
                "Check that the config file exists and is valid TOML.",
            )
            .alternative("Run `slotgate check --config <file>` to validate it."),
        }
    }
}

/// Failure raised inside a gate predicate. The gate fails closed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    #[error("host query failed: {0}")]
    Host(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("unknown slot `{0}`")]
    UnknownSlot(String),
}

/// Durable store errors. Never fatal for admission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("malformed record at `{key}`: {reason}")]
    MalformedRecord { key: String, reason: String },

    #[error("store failure: {0}")]
    Store(String),
}

/// Rendering backend errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend rejected slot `{slot}`: {reason}")]
    Rejected { slot: String, reason: String },

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}
