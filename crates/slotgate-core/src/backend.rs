//! Rendering backend boundary.
//!
//! The backend fetches and paints creatives; this crate only tells it which
//! slots to define, display and refresh. Render outcomes come back later as
//! [`SlotEvent::Outcome`](crate::lifecycle::SlotEvent::Outcome) events.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::slot::AdSize;

/// Opaque backend handle for a defined slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotHandle(pub u64);

pub trait RenderBackend {
    fn define_slot(&mut self, path: &str, sizes: &[AdSize], id: &str)
    -> Result<SlotHandle, BackendError>;
    fn display(&mut self, handle: SlotHandle) -> Result<(), BackendError>;
    fn refresh(&mut self, handles: &[SlotHandle]) -> Result<(), BackendError>;
}

/// One call observed by [`RecordingBackend`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "call")]
pub enum BackendCall {
    Define {
        id: String,
        path: String,
        sizes: Vec<AdSize>,
    },
    Display {
        id: String,
    },
    Refresh {
        ids: Vec<String>,
    },
}

/// Backend that records calls instead of rendering. Used by tests and
/// `slotgate simulate`.
#[derive(Debug, Clone, Default)]
pub struct RecordingBackend {
    calls: Vec<BackendCall>,
    ids: BTreeMap<SlotHandle, String>,
    next_handle: u64,
    reject: BTreeSet<String>,
}

impl RecordingBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `define_slot` fail for `id`.
    #[must_use]
    pub fn rejecting(mut self, id: impl Into<String>) -> Self {
        self.reject.insert(id.into());
        self
    }

    #[must_use]
    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    /// Ids passed to `display`, in call order.
    #[must_use]
    pub fn displayed(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                BackendCall::Display { id } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Ids passed to `define_slot`, in call order.
    #[must_use]
    pub fn defined(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                BackendCall::Define { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    fn id_for(&self, handle: SlotHandle) -> Result<String, BackendError> {
        self.ids
            .get(&handle)
            .cloned()
            .ok_or_else(|| BackendError::Unavailable(format!("unknown handle {}", handle.0)))
    }
}

impl RenderBackend for RecordingBackend {
    fn define_slot(
        &mut self,
        path: &str,
        sizes: &[AdSize],
        id: &str,
    ) -> Result<SlotHandle, BackendError> {
        if self.reject.contains(id) {
            return Err(BackendError::Rejected {
                slot: id.to_string(),
                reason: "rejected by recording backend".into(),
            });
        }
        let handle = SlotHandle(self.next_handle);
        self.next_handle += 1;
        self.ids.insert(handle, id.to_string());
        self.calls.push(BackendCall::Define {
            id: id.to_string(),
            path: path.to_string(),
            sizes: sizes.to_vec(),
        });
        Ok(handle)
    }

    fn display(&mut self, handle: SlotHandle) -> Result<(), BackendError> {
        let id = self.id_for(handle)?;
        self.calls.push(BackendCall::Display { id });
        Ok(())
    }

    fn refresh(&mut self, handles: &[SlotHandle]) -> Result<(), BackendError> {
        let ids = handles
            .iter()
            .map(|h| self.id_for(*h))
            .collect::<Result<Vec<_>, _>>()?;
        self.calls.push(BackendCall::Refresh { ids });
        Ok(())
    }
}
