//! slotgate-core: admission and conflict resolution for ad slots
//!
//! Decides, for a page carrying many independently declared ad slots,
//! whether and when each slot may request content, and propagates render
//! outcomes between slots that gate one another.
//!
//! # Architecture
//!
//! ```text
//! Config ─► LifecycleController::register_slots
//!                  │  (scheduler order)
//!                  ▼
//!           AdmissionGate ◄── Breakpoint / Throttle / Conflict state
//!                  │ admitted
//!                  ▼
//!           RenderBackend ──► SlotEvent::Outcome ──► ConflictResolver
//!                  ▲                                     │ released
//!                  └──────────── re-evaluate ◄───────────┘
//! ```
//!
//! # Modules
//!
//! - `breakpoint`: Viewport width to named tier, per-tier size lookup
//! - `throttle`: Persisted frequency caps for interstitial-class slots
//! - `conflict`: Blocking relation and deferred-slot working set
//! - `gate`: Eleven-step admission decision
//! - `scheduler`: Priority and tie-break ordering
//! - `lifecycle`: Registry, passes, and event-driven outcome handling
//! - `slot`: Slot configuration record, validation, render state
//! - `host`: DOM queries and page signals
//! - `backend`: Rendering backend boundary and a recording backend
//! - `storage`: Durable key-value stores
//! - `matcher`: Compiled substring sets
//! - `config`: TOML configuration
//! - `logging`: Structured logging setup
//! - `error`: Error types with remediation guidance
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod backend;
pub mod breakpoint;
pub mod config;
pub mod conflict;
pub mod error;
pub mod gate;
pub mod host;
pub mod lifecycle;
pub mod logging;
pub mod matcher;
pub mod scheduler;
pub mod slot;
pub mod storage;
pub mod throttle;

pub use error::{Error, Result};
