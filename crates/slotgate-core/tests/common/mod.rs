//! Shared test infrastructure for slotgate-core integration tests.
//!
//! Import from integration test files with:
//! ```ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use slotgate_core::backend::RecordingBackend;
use slotgate_core::config::Config;
use slotgate_core::host::{PageContext, StaticHost};
use slotgate_core::lifecycle::{Collaborators, LifecycleController};
use slotgate_core::slot::{AdSize, SlotConfig, SlotKind};
use slotgate_core::storage::{KeyValueStore, MemoryStore};

/// Fixed clock for deterministic throttle decisions.
pub const NOW: i64 = 1_700_000_000_000;
pub const MINUTE: i64 = 60 * 1000;

/// A ready page at `width` pixels.
pub fn ready_context(width: u32) -> PageContext {
    PageContext {
        ready: true,
        viewport_width: width,
        ..PageContext::default()
    }
}

/// Host with one element per id.
pub fn host_with(ids: &[&str]) -> StaticHost {
    ids.iter().fold(StaticHost::new(), |host, id| host.with_element(*id))
}

pub fn slot(id: &str, kind: SlotKind) -> SlotConfig {
    SlotConfig::new(id, kind)
}

pub fn blocked(id: &str, by: &[&str]) -> SlotConfig {
    let mut cfg = SlotConfig::new(id, SlotKind::Standard);
    cfg.blocked_by = by.iter().map(|b| (*b).to_string()).collect();
    cfg
}

/// Responsive slot over the default tiers: no ad below `m`, a leaderboard from `m` up.
pub fn responsive_leaderboard(id: &str) -> SlotConfig {
    let mut cfg = SlotConfig::new(id, SlotKind::Standard);
    cfg.responsive = true;
    for tier in ["xxs", "xs", "s"] {
        cfg.size_mapping.insert(tier.to_string(), vec![AdSize::ZERO]);
    }
    for tier in ["m", "l", "xl", "xxl"] {
        cfg.size_mapping
            .insert(tier.to_string(), vec![AdSize::new(728, 90)]);
    }
    cfg
}

pub struct PageBuilder {
    pub config: Config,
    pub context: PageContext,
    pub host: StaticHost,
    pub backend: RecordingBackend,
    pub durable: Box<dyn KeyValueStore>,
    pub now: i64,
}

impl PageBuilder {
    pub fn new(width: u32) -> Self {
        Self {
            config: Config::default(),
            context: ready_context(width),
            host: StaticHost::new(),
            backend: RecordingBackend::new(),
            durable: Box::new(MemoryStore::new()),
            now: NOW,
        }
    }

    pub fn host(mut self, host: StaticHost) -> Self {
        self.host = host;
        self
    }

    pub fn backend(mut self, backend: RecordingBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn durable(mut self, durable: Box<dyn KeyValueStore>) -> Self {
        self.durable = durable;
        self
    }

    pub fn context(mut self, f: impl FnOnce(&mut PageContext)) -> Self {
        f(&mut self.context);
        self
    }

    pub fn config(mut self, f: impl FnOnce(&mut Config)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn at(mut self, now: i64) -> Self {
        self.now = now;
        self
    }

    pub fn build(self) -> LifecycleController<RecordingBackend> {
        let mut ctl = LifecycleController::new(
            &self.config,
            self.context,
            Collaborators {
                host: Box::new(self.host),
                backend: self.backend,
                durable: self.durable,
                session: Box::new(MemoryStore::new()),
            },
        )
        .expect("valid test config");
        ctl.set_now(self.now);
        ctl
    }
}
