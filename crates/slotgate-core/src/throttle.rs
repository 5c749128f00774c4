//! Frequency capping for high-intrusion slot kinds.
//!
//! Each throttled class keeps one durable [`ThrottleRecord`] (attempt count
//! and last presentation time) in the durable store, plus a session-scoped
//! flag for the paying-user small-interstitial cap. Checks only read state;
//! the flag is set when a small interstitial is actually presented.
//!
//! # Policies
//!
//! | Class               | Allows when                                                        |
//! |---------------------|--------------------------------------------------------------------|
//! | `InterstitialSmall` | paying: first time this session; others: unless direct referrer and attempts >= 2 |
//! | `InterstitialFull`  | affiliate referrer, non-paying, ready, attempts >= 3, cooldown < elapsed < window |
//! | `Generic`           | no record, no timestamp, or cooldown < elapsed < window            |
//!
//! # Writes
//!
//! Record updates never block a decision. They are queued as
//! [`PendingWrite`]s and applied in order by [`ThrottleEngine::flush_writes`],
//! so several presentations in one pass each land their increment. Reads
//! between a presentation and the next flush see the previous record.
//! Warm-up attempts are queued at most once per class per page.

use std::collections::{HashSet, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ConfigError, PersistenceError};
use crate::matcher::SubstringSet;
use crate::slot::{SlotKind, UserType};
use crate::storage::{KeyValueStore, read_json, write_json};

// =============================================================================
// Record & configuration
// =============================================================================

/// Durable per-class presentation record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleRecord {
    pub attempt_count: u32,
    #[serde(default)]
    pub last_shown_at: Option<i64>,
}

/// Throttle policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Elapsed time must exceed this debounce (ms). Default: 10_800.
    pub min_cooldown_ms: i64,
    /// Elapsed time must stay below this window (ms). Default: 63 minutes.
    pub max_window_ms: i64,
    /// Attempts recorded before a full interstitial may show. Default: 3.
    pub full_min_attempts: u32,
    /// Attempt count at which direct-referrer users stop seeing small interstitials. Default: 2.
    pub small_direct_max_attempts: u32,
    /// Durable key prefix for throttle records.
    pub key_prefix: String,
    /// Session key prefix for per-session flags.
    pub session_key_prefix: String,
    /// Referrer substrings that identify an affiliate referrer.
    pub affiliate_referrers: Vec<String>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_cooldown_ms: 10_800,
            max_window_ms: 63 * 60 * 1000,
            full_min_attempts: 3,
            small_direct_max_attempts: 2,
            key_prefix: "slotgate.throttle.".to_string(),
            session_key_prefix: "slotgate.session.".to_string(),
            affiliate_referrers: Vec::new(),
        }
    }
}

// =============================================================================
// Classes, verdicts
// =============================================================================

/// Which policy a slot kind is throttled under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleClass {
    InterstitialSmall,
    InterstitialFull,
    Generic,
}

impl ThrottleClass {
    /// `None` for kinds that are never throttled.
    #[must_use]
    pub const fn for_kind(kind: SlotKind) -> Option<Self> {
        match kind {
            SlotKind::InterstitialSmall => Some(Self::InterstitialSmall),
            SlotKind::InterstitialFull => Some(Self::InterstitialFull),
            SlotKind::Popunder => Some(Self::Generic),
            SlotKind::Standard | SlotKind::OutOfPage | SlotKind::Talkback => None,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::InterstitialSmall => "interstitial_small",
            Self::InterstitialFull => "interstitial_full",
            Self::Generic => "generic",
        }
    }

    /// Stamp used when a presentation of this class is recorded.
    ///
    /// Small interstitials only count attempts and leave `lastShownAt` alone.
    #[must_use]
    pub const fn presentation_stamp(self, now_ms: i64) -> Stamp {
        match self {
            Self::InterstitialSmall => Stamp::AttemptOnly,
            Self::InterstitialFull | Self::Generic => Stamp::At(now_ms),
        }
    }
}

/// External signals a throttle decision depends on.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleContext<'a> {
    pub user: UserType,
    pub referrer: &'a str,
    /// External "ready to render" flag for full interstitials.
    pub ready_to_render: bool,
}

/// Why a throttled presentation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "denial")]
pub enum ThrottleDenial {
    SessionCapReached,
    DirectReferrerCapReached { attempts: u32 },
    NotAffiliate,
    PayingUser,
    NotReady,
    NoRecord,
    WarmingUp { attempts: u32 },
    NoTimestamp,
    TooSoon { elapsed_ms: i64 },
    WindowExpired { elapsed_ms: i64 },
}

impl ThrottleDenial {
    /// Denials during which the full interstitial is still accumulating attempts.
    #[must_use]
    pub const fn is_warm_up(self) -> bool {
        matches!(self, Self::NoRecord | Self::WarmingUp { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleVerdict {
    Allow,
    Deny(ThrottleDenial),
}

impl ThrottleVerdict {
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// How a queued write updates `lastShownAt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    /// Increment the attempt count and set `lastShownAt`.
    At(i64),
    /// Increment the attempt count only.
    AttemptOnly,
}

/// A record update waiting for [`ThrottleEngine::flush_writes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub class: ThrottleClass,
    pub stamp: Stamp,
}

/// Result of applying queued writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    pub applied: usize,
    pub failed: usize,
}

// =============================================================================
// Engine
// =============================================================================

/// Sole reader and writer of throttle state.
#[derive(Debug)]
pub struct ThrottleEngine {
    config: ThrottleConfig,
    affiliates: SubstringSet,
    durable: Box<dyn KeyValueStore>,
    session: Box<dyn KeyValueStore>,
    pending: VecDeque<PendingWrite>,
    warmed: HashSet<ThrottleClass>,
}

impl ThrottleEngine {
    pub fn new(
        config: ThrottleConfig,
        durable: Box<dyn KeyValueStore>,
        session: Box<dyn KeyValueStore>,
    ) -> Result<Self, ConfigError> {
        let affiliates = SubstringSet::new(config.affiliate_referrers.iter().cloned())
            .map_err(|e| ConfigError::ParseFailed(format!("throttle.affiliate_referrers: {e}")))?;
        Ok(Self {
            config,
            affiliates,
            durable,
            session,
            pending: VecDeque::new(),
            warmed: HashSet::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Whether the referrer belongs to an affiliate.
    #[must_use]
    pub fn is_affiliate(&self, referrer: &str) -> bool {
        self.affiliates.matches(referrer)
    }

    /// Durable store, for collaborators that keep their own keys there.
    #[must_use]
    pub fn durable_store(&self) -> &dyn KeyValueStore {
        self.durable.as_ref()
    }

    #[must_use]
    pub fn record_key(&self, class: ThrottleClass) -> String {
        format!("{}{}", self.config.key_prefix, class.label())
    }

    fn session_key(&self, class: ThrottleClass) -> String {
        format!("{}{}", self.config.session_key_prefix, class.label())
    }

    /// Current durable record. Malformed records read as absent.
    pub fn record(&self, class: ThrottleClass) -> Option<ThrottleRecord> {
        let key = self.record_key(class);
        match read_json::<ThrottleRecord>(self.durable.as_ref(), &key) {
            Ok(record) => record,
            Err(err) => {
                warn!(throttle_key = %key, error = %err, "Ignoring unreadable throttle record");
                None
            }
        }
    }

    /// Decide for a slot kind; unthrottled kinds always pass.
    pub fn check_kind(
        &self,
        kind: SlotKind,
        ctx: &ThrottleContext<'_>,
        now_ms: i64,
    ) -> ThrottleVerdict {
        match ThrottleClass::for_kind(kind) {
            Some(class) => self.check(class, ctx, now_ms),
            None => ThrottleVerdict::Allow,
        }
    }

    /// Decide whether a presentation of `class` is allowed at `now_ms`.
    pub fn check(
        &self,
        class: ThrottleClass,
        ctx: &ThrottleContext<'_>,
        now_ms: i64,
    ) -> ThrottleVerdict {
        let verdict = match class {
            ThrottleClass::InterstitialSmall => self.check_small(ctx),
            ThrottleClass::InterstitialFull => self.check_full(ctx, now_ms),
            ThrottleClass::Generic => self.check_generic(now_ms),
        };
        if let ThrottleVerdict::Deny(denial) = verdict {
            debug!(throttle_class = class.label(), ?denial, "Throttle denied presentation");
        }
        verdict
    }

    fn check_small(&self, ctx: &ThrottleContext<'_>) -> ThrottleVerdict {
        if ctx.user.is_paying() {
            let key = self.session_key(ThrottleClass::InterstitialSmall);
            return match self.session.get(&key) {
                Ok(Some(_)) => ThrottleVerdict::Deny(ThrottleDenial::SessionCapReached),
                Ok(None) => ThrottleVerdict::Allow,
                Err(err) => {
                    warn!(session_key = %key, error = %err, "Session flag unreadable");
                    ThrottleVerdict::Allow
                }
            };
        }

        if self.is_affiliate(ctx.referrer) {
            return ThrottleVerdict::Allow;
        }
        match self.record(ThrottleClass::InterstitialSmall) {
            Some(record) if record.attempt_count >= self.config.small_direct_max_attempts => {
                ThrottleVerdict::Deny(ThrottleDenial::DirectReferrerCapReached {
                    attempts: record.attempt_count,
                })
            }
            _ => ThrottleVerdict::Allow,
        }
    }

    fn check_full(&self, ctx: &ThrottleContext<'_>, now_ms: i64) -> ThrottleVerdict {
        if !self.is_affiliate(ctx.referrer) {
            return ThrottleVerdict::Deny(ThrottleDenial::NotAffiliate);
        }
        if ctx.user.is_paying() {
            return ThrottleVerdict::Deny(ThrottleDenial::PayingUser);
        }
        if !ctx.ready_to_render {
            return ThrottleVerdict::Deny(ThrottleDenial::NotReady);
        }
        let Some(record) = self.record(ThrottleClass::InterstitialFull) else {
            return ThrottleVerdict::Deny(ThrottleDenial::NoRecord);
        };
        if record.attempt_count < self.config.full_min_attempts {
            return ThrottleVerdict::Deny(ThrottleDenial::WarmingUp {
                attempts: record.attempt_count,
            });
        }
        match record.last_shown_at {
            Some(last) => self.window_verdict(now_ms - last),
            None => ThrottleVerdict::Deny(ThrottleDenial::NoTimestamp),
        }
    }

    fn check_generic(&self, now_ms: i64) -> ThrottleVerdict {
        match self
            .record(ThrottleClass::Generic)
            .and_then(|r| r.last_shown_at)
        {
            Some(last) => self.window_verdict(now_ms - last),
            None => ThrottleVerdict::Allow,
        }
    }

    /// `min_cooldown < elapsed < max_window`, both bounds exclusive.
    fn window_verdict(&self, elapsed_ms: i64) -> ThrottleVerdict {
        if elapsed_ms <= self.config.min_cooldown_ms {
            ThrottleVerdict::Deny(ThrottleDenial::TooSoon { elapsed_ms })
        } else if elapsed_ms >= self.config.max_window_ms {
            ThrottleVerdict::Deny(ThrottleDenial::WindowExpired { elapsed_ms })
        } else {
            ThrottleVerdict::Allow
        }
    }

    /// Queue the record update for a successful presentation.
    ///
    /// A small interstitial also sets its session flag right away, so later
    /// checks in the same pass see the cap.
    pub fn record_presentation(&mut self, class: ThrottleClass, now_ms: i64) {
        if class == ThrottleClass::InterstitialSmall {
            let key = self.session_key(class);
            if let Err(err) = self.session.set(&key, "1".to_string()) {
                warn!(session_key = %key, error = %err, "Failed to set session flag");
            }
        }
        self.enqueue(class, class.presentation_stamp(now_ms));
    }

    /// Queue a warm-up attempt after a full-interstitial warm-up denial.
    ///
    /// Only the first warm-up denial of the page counts; re-evaluations after
    /// resizes or releases queue nothing. Returns whether a write was queued.
    pub fn record_warm_up(&mut self, class: ThrottleClass, denial: ThrottleDenial, now_ms: i64) -> bool {
        if class != ThrottleClass::InterstitialFull || !denial.is_warm_up() {
            return false;
        }
        if !self.warmed.insert(class) {
            return false;
        }
        self.enqueue(class, Stamp::At(now_ms));
        true
    }

    /// Queue an explicit update.
    pub fn enqueue(&mut self, class: ThrottleClass, stamp: Stamp) {
        self.pending.push_back(PendingWrite { class, stamp });
    }

    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Apply queued writes in order. A failing write is logged and dropped.
    pub fn flush_writes(&mut self) -> FlushReport {
        let mut report = FlushReport::default();
        while let Some(write) = self.pending.pop_front() {
            match self.apply(&write) {
                Ok(record) => {
                    report.applied += 1;
                    debug!(
                        throttle_class = write.class.label(),
                        attempt_count = record.attempt_count,
                        last_shown_at = ?record.last_shown_at,
                        "Throttle record updated"
                    );
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        throttle_class = write.class.label(),
                        error = %err,
                        "Failed to persist throttle record"
                    );
                }
            }
        }
        report
    }

    fn apply(&mut self, write: &PendingWrite) -> Result<ThrottleRecord, PersistenceError> {
        let mut record = self.record(write.class).unwrap_or_default();
        record.attempt_count = record.attempt_count.saturating_add(1);
        if let Stamp::At(ts) = write.stamp {
            record.last_shown_at = Some(ts);
        }
        let key = self.record_key(write.class);
        write_json(self.durable.as_mut(), &key, &record)?;
        Ok(record)
    }
}

/// Current time as epoch milliseconds.
#[must_use]
pub fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| i64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    const T: i64 = 1_700_000_000_000;
    const MIN: i64 = 60 * 1000;

    fn engine_with(record: Option<&str>) -> ThrottleEngine {
        let mut durable = MemoryStore::new();
        if let Some(raw) = record {
            durable = durable
                .with_entry("slotgate.throttle.interstitial_full", raw)
                .with_entry("slotgate.throttle.interstitial_small", raw)
                .with_entry("slotgate.throttle.generic", raw);
        }
        let config = ThrottleConfig {
            affiliate_referrers: vec!["partner.example".into()],
            ..ThrottleConfig::default()
        };
        ThrottleEngine::new(config, Box::new(durable), Box::new(MemoryStore::new())).unwrap()
    }

    fn ctx(user: UserType, referrer: &str) -> ThrottleContext<'_> {
        ThrottleContext {
            user,
            referrer,
            ready_to_render: true,
        }
    }

    fn affiliate() -> ThrottleContext<'static> {
        ctx(UserType::Anonymous, "https://partner.example/x")
    }

    #[test]
    fn record_json_shape() {
        let record = ThrottleRecord {
            attempt_count: 3,
            last_shown_at: Some(T),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, format!("{{\"attemptCount\":3,\"lastShownAt\":{T}}}"));
        let partial: ThrottleRecord = serde_json::from_str("{\"attemptCount\":1}").unwrap();
        assert_eq!(partial.last_shown_at, None);
    }

    #[test]
    fn unthrottled_kinds_pass() {
        let engine = engine_with(None);
        for kind in [SlotKind::Standard, SlotKind::OutOfPage, SlotKind::Talkback] {
            assert!(engine.check_kind(kind, &affiliate(), T).is_allowed());
        }
    }

    #[test]
    fn full_warming_up_below_three_attempts() {
        let engine = engine_with(Some(&format!("{{\"attemptCount\":2,\"lastShownAt\":{T}}}")));
        assert_eq!(
            engine.check(ThrottleClass::InterstitialFull, &affiliate(), T + 30 * MIN),
            ThrottleVerdict::Deny(ThrottleDenial::WarmingUp { attempts: 2 })
        );
    }

    #[test]
    fn full_window_bounds() {
        let engine = engine_with(Some(&format!("{{\"attemptCount\":3,\"lastShownAt\":{T}}}")));
        let class = ThrottleClass::InterstitialFull;
        assert!(engine.check(class, &affiliate(), T + 30 * MIN).is_allowed());
        assert!(matches!(
            engine.check(class, &affiliate(), T + 70 * MIN),
            ThrottleVerdict::Deny(ThrottleDenial::WindowExpired { .. })
        ));
        assert!(matches!(
            engine.check(class, &affiliate(), T + 10_800),
            ThrottleVerdict::Deny(ThrottleDenial::TooSoon { elapsed_ms: 10_800 })
        ));
        assert!(engine.check(class, &affiliate(), T + 10_801).is_allowed());
        assert!(!engine.check(class, &affiliate(), T + 63 * MIN).is_allowed());
    }

    #[test]
    fn full_requires_affiliate_non_paying_ready_and_record() {
        let engine = engine_with(None);
        let class = ThrottleClass::InterstitialFull;
        assert_eq!(
            engine.check(class, &ctx(UserType::Anonymous, "https://direct"), T),
            ThrottleVerdict::Deny(ThrottleDenial::NotAffiliate)
        );
        assert_eq!(
            engine.check(class, &ctx(UserType::Paying, "partner.example"), T),
            ThrottleVerdict::Deny(ThrottleDenial::PayingUser)
        );
        let not_ready = ThrottleContext {
            ready_to_render: false,
            ..affiliate()
        };
        assert_eq!(
            engine.check(class, &not_ready, T),
            ThrottleVerdict::Deny(ThrottleDenial::NotReady)
        );
        assert_eq!(
            engine.check(class, &affiliate(), T),
            ThrottleVerdict::Deny(ThrottleDenial::NoRecord)
        );
    }

    #[test]
    fn full_without_timestamp_is_denied() {
        let engine = engine_with(Some("{\"attemptCount\":5}"));
        assert_eq!(
            engine.check(ThrottleClass::InterstitialFull, &affiliate(), T),
            ThrottleVerdict::Deny(ThrottleDenial::NoTimestamp)
        );
    }

    #[test]
    fn malformed_record_reads_as_absent() {
        let engine = engine_with(Some("{oops"));
        assert!(engine.record(ThrottleClass::Generic).is_none());
        // Most permissive branch for generic: no record, allow.
        assert!(engine.check(ThrottleClass::Generic, &affiliate(), T).is_allowed());
        // Small interstitial for a direct visitor: no record, allow.
        let direct = ctx(UserType::Anonymous, "");
        assert!(engine.check(ThrottleClass::InterstitialSmall, &direct, T).is_allowed());
    }

    #[test]
    fn small_paying_once_per_session() {
        let mut engine = engine_with(None);
        let paying = ctx(UserType::Paying, "");
        let class = ThrottleClass::InterstitialSmall;
        assert!(engine.check(class, &paying, T).is_allowed());
        assert!(engine.check(class, &paying, T).is_allowed(), "checking alone uses no cap");

        engine.record_presentation(class, T);
        assert_eq!(
            engine.check(class, &paying, T),
            ThrottleVerdict::Deny(ThrottleDenial::SessionCapReached),
            "session flag is visible before the flush"
        );
    }

    #[test]
    fn small_direct_referrer_cap() {
        let engine = engine_with(Some("{\"attemptCount\":2}"));
        let class = ThrottleClass::InterstitialSmall;
        assert_eq!(
            engine.check(class, &ctx(UserType::Registered, "https://direct.example"), T),
            ThrottleVerdict::Deny(ThrottleDenial::DirectReferrerCapReached { attempts: 2 })
        );
        assert!(engine.check(class, &affiliate(), T).is_allowed());

        let fresh = engine_with(Some("{\"attemptCount\":1}"));
        assert!(fresh.check(class, &ctx(UserType::Anonymous, ""), T).is_allowed());
    }

    #[test]
    fn generic_window_ignores_attempt_count() {
        let engine = engine_with(Some(&format!("{{\"attemptCount\":0,\"lastShownAt\":{T}}}")));
        assert!(engine.check(ThrottleClass::Generic, &affiliate(), T + 5 * MIN).is_allowed());
        assert!(!engine.check(ThrottleClass::Generic, &affiliate(), T + 1000).is_allowed());
    }

    #[test]
    fn writes_are_queued_until_flush() {
        let mut engine = engine_with(None);
        engine.record_presentation(ThrottleClass::Generic, T);
        assert_eq!(engine.pending_writes(), 1);
        assert!(engine.record(ThrottleClass::Generic).is_none(), "stale until flushed");

        let report = engine.flush_writes();
        assert_eq!(report, FlushReport { applied: 1, failed: 0 });
        assert_eq!(
            engine.record(ThrottleClass::Generic),
            Some(ThrottleRecord {
                attempt_count: 1,
                last_shown_at: Some(T)
            })
        );
    }

    #[test]
    fn burst_of_writes_keeps_every_increment() {
        let mut engine = engine_with(None);
        for i in 0..4 {
            engine.record_presentation(ThrottleClass::InterstitialFull, T + i);
        }
        engine.flush_writes();
        let record = engine.record(ThrottleClass::InterstitialFull).unwrap();
        assert_eq!(record.attempt_count, 4);
        assert_eq!(record.last_shown_at, Some(T + 3));
    }

    #[test]
    fn small_presentation_records_attempt_only() {
        let mut engine = engine_with(Some(&format!("{{\"attemptCount\":1,\"lastShownAt\":{T}}}")));
        engine.record_presentation(ThrottleClass::InterstitialSmall, T + 99 * MIN);
        engine.flush_writes();
        let record = engine.record(ThrottleClass::InterstitialSmall).unwrap();
        assert_eq!(record.attempt_count, 2);
        assert_eq!(record.last_shown_at, Some(T), "timestamp untouched");
    }

    #[test]
    fn malformed_record_is_replaced_on_write() {
        let mut engine = engine_with(Some("garbage"));
        engine.record_presentation(ThrottleClass::Generic, T);
        engine.flush_writes();
        assert_eq!(engine.record(ThrottleClass::Generic).unwrap().attempt_count, 1);
    }

    #[test]
    fn warm_up_only_for_full_warm_up_denials() {
        let mut engine = engine_with(None);
        assert!(!engine.record_warm_up(ThrottleClass::InterstitialFull, ThrottleDenial::NotReady, T));
        assert!(!engine.record_warm_up(ThrottleClass::Generic, ThrottleDenial::NoRecord, T));
        assert!(engine.record_warm_up(ThrottleClass::InterstitialFull, ThrottleDenial::NoRecord, T));
        assert_eq!(engine.pending_writes(), 1);
    }

    #[test]
    fn warm_up_counts_once_per_page() {
        let mut engine = engine_with(None);
        let class = ThrottleClass::InterstitialFull;
        assert!(engine.record_warm_up(class, ThrottleDenial::NoRecord, T));
        engine.flush_writes();
        assert!(!engine.record_warm_up(class, ThrottleDenial::WarmingUp { attempts: 1 }, T + 1));
        assert_eq!(engine.pending_writes(), 0);
        assert_eq!(engine.record(class).unwrap().attempt_count, 1);
    }

    /// A fresh engine over the previous page's durable record.
    fn next_page(previous: &ThrottleEngine, class: ThrottleClass) -> ThrottleEngine {
        let key = previous.record_key(class);
        let raw = previous.durable_store().get(&key).unwrap();
        let durable = raw.map_or_else(MemoryStore::new, |raw| MemoryStore::new().with_entry(key, raw));
        ThrottleEngine::new(
            previous.config().clone(),
            Box::new(durable),
            Box::new(MemoryStore::new()),
        )
        .unwrap()
    }

    #[test]
    fn full_interstitial_warms_up_over_visits() {
        let class = ThrottleClass::InterstitialFull;
        let mut engine = engine_with(None);
        let mut now = T;
        for _ in 0..3 {
            let ThrottleVerdict::Deny(denial) = engine.check(class, &affiliate(), now) else {
                panic!("should still be warming up");
            };
            assert!(engine.record_warm_up(class, denial, now));
            engine.flush_writes();
            engine = next_page(&engine, class);
            now += 5 * MIN;
        }
        assert!(engine.check(class, &affiliate(), now).is_allowed());
    }
}
