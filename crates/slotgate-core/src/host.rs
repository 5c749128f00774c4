//! Page environment seen by the admission gate.
//!
//! [`PageHost`] is the DOM boundary (element presence and attributes).
//! [`PageContext`] carries the synchronous lookups the gate needs from
//! other collaborators: readiness flags, referrer, identity, viewport
//! width and purchase-funnel state.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::EvaluationError;
use crate::slot::UserType;
use crate::storage::{KeyValueStore, read_json};

/// Markup attribute carrying a per-slot audience override.
pub const AUDIENCE_ATTRIBUTE: &str = "data-audience";

/// DOM queries. Failures surface as [`EvaluationError::Host`].
pub trait PageHost {
    fn element_exists(&self, id: &str) -> Result<bool, EvaluationError>;
    fn element_attributes(&self, id: &str) -> Result<BTreeMap<String, String>, EvaluationError>;
}

/// In-memory host: a fixed set of elements and their attributes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticHost {
    pub elements: BTreeSet<String>,
    pub attributes: BTreeMap<String, BTreeMap<String, String>>,
}

impl StaticHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_element(mut self, id: impl Into<String>) -> Self {
        self.elements.insert(id.into());
        self
    }

    /// Add an element carrying one attribute.
    #[must_use]
    pub fn with_attribute(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let id = id.into();
        self.elements.insert(id.clone());
        self.attributes
            .entry(id)
            .or_default()
            .insert(name.into(), value.into());
        self
    }
}

impl PageHost for StaticHost {
    fn element_exists(&self, id: &str) -> Result<bool, EvaluationError> {
        Ok(self.elements.contains(id))
    }

    fn element_attributes(&self, id: &str) -> Result<BTreeMap<String, String>, EvaluationError> {
        Ok(self.attributes.get(id).cloned().unwrap_or_default())
    }
}

/// Identity provider lookup result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub user_type: UserType,
    /// Stable identity, compared against the configured targeting bypass.
    pub id: Option<String>,
    pub age: Option<u32>,
    pub gender: Option<String>,
}

/// Locally stored purchase-funnel progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FunnelState {
    pub count: u32,
    pub in_funnel: bool,
}

impl FunnelState {
    /// Read funnel state from the durable store. Absent or malformed reads as `None`.
    pub fn load(store: &dyn KeyValueStore, key: &str) -> Option<Self> {
        match read_json(store, key) {
            Ok(state) => state,
            Err(err) => {
                warn!(key, error = %err, "Ignoring unreadable funnel state");
                None
            }
        }
    }
}

/// Snapshot of external page signals for one evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PageContext {
    /// Global "ready to render any ad" flag.
    pub ready: bool,
    /// Full-interstitial "ready to render" flag.
    pub interstitial_ready: bool,
    pub in_webview: bool,
    /// Running inside the installed app.
    pub in_app: bool,
    /// Session validity, only consulted when `in_app`.
    pub app_session_valid: bool,
    pub referrer: String,
    pub user: UserProfile,
    pub viewport_width: u32,
    /// Purchase-funnel state, when the caller already knows it.
    pub funnel: Option<FunnelState>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn static_host_reports_elements_and_attributes() {
        let host = StaticHost::new()
            .with_element("top")
            .with_attribute("side", AUDIENCE_ATTRIBUTE, "paying");
        assert_eq!(host.element_exists("top"), Ok(true));
        assert_eq!(host.element_exists("side"), Ok(true));
        assert_eq!(host.element_exists("nope"), Ok(false));
        assert!(host.element_attributes("top").unwrap().is_empty());
        assert_eq!(
            host.element_attributes("side").unwrap().get(AUDIENCE_ATTRIBUTE).map(String::as_str),
            Some("paying")
        );
    }

    #[test]
    fn funnel_state_json_shape() {
        let store = MemoryStore::new().with_entry("funnel", "{\"count\":4,\"inFunnel\":true}");
        assert_eq!(
            FunnelState::load(&store, "funnel"),
            Some(FunnelState {
                count: 4,
                in_funnel: true
            })
        );
    }

    #[test]
    fn malformed_funnel_reads_as_absent() {
        let store = MemoryStore::new().with_entry("funnel", "nope");
        assert_eq!(FunnelState::load(&store, "funnel"), None);
        assert_eq!(FunnelState::load(&store, "missing"), None);
    }

    #[test]
    fn page_context_parses_partial_json() {
        let ctx: PageContext =
            serde_json::from_str(r#"{"ready":true,"user":{"user_type":"paying"},"viewport_width":800}"#)
                .unwrap();
        assert!(ctx.ready);
        assert!(ctx.user.user_type.is_paying());
        assert!(ctx.funnel.is_none());
    }
}
