//! Breakpoint resolution: viewport width to named tier.
//!
//! Tiers are configured as an ordered list of `(name, min_width)` pairs with
//! strictly ascending `min_width`. The first tier's lower bound is ignored:
//! every width below the second tier's threshold resolves to the first tier,
//! and every width at or above the last threshold resolves to the last tier.
//! Resolution is therefore total over `u32`.
//!
//! | Width        | Tier (defaults) |
//! |--------------|-----------------|
//! | < 480        | xxs             |
//! | 480..600     | xs              |
//! | 600..768     | s               |
//! | 768..1024    | m               |
//! | 1024..1280   | l               |
//! | 1280..1600   | xl              |
//! | >= 1600      | xxl             |

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::slot::{Slot, is_zero_sentinel};

// =============================================================================
// Configuration
// =============================================================================

/// One named tier and the width at which it begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointTier {
    pub name: String,
    pub min_width: u32,
}

/// Ordered breakpoint tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakpointConfig {
    pub tiers: Vec<BreakpointTier>,
}

impl Default for BreakpointConfig {
    fn default() -> Self {
        Self::from_pairs(&[
            ("xxs", 0),
            ("xs", 480),
            ("s", 600),
            ("m", 768),
            ("l", 1024),
            ("xl", 1280),
            ("xxl", 1600),
        ])
    }
}

impl BreakpointConfig {
    #[must_use]
    pub fn from_pairs(pairs: &[(&str, u32)]) -> Self {
        Self {
            tiers: pairs
                .iter()
                .map(|(name, min_width)| BreakpointTier {
                    name: (*name).to_string(),
                    min_width: *min_width,
                })
                .collect(),
        }
    }
}

// =============================================================================
// Breakpoint
// =============================================================================

/// A resolved tier. Ordered by width: a larger index is a wider tier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Breakpoint {
    pub index: usize,
    pub name: String,
}

impl fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Maps viewport widths to tiers and answers per-tier size questions.
#[derive(Debug, Clone)]
pub struct BreakpointResolver {
    tiers: Vec<BreakpointTier>,
}

impl BreakpointResolver {
    /// Validate the tier list: non-empty, unique names, ascending thresholds.
    pub fn new(config: &BreakpointConfig) -> Result<Self, ConfigError> {
        if config.tiers.is_empty() {
            return Err(ConfigError::InvalidBreakpoints(
                "at least one tier is required".into(),
            ));
        }
        let mut seen = HashSet::new();
        for tier in &config.tiers {
            if tier.name.is_empty() {
                return Err(ConfigError::InvalidBreakpoints("empty tier name".into()));
            }
            if !seen.insert(tier.name.as_str()) {
                return Err(ConfigError::InvalidBreakpoints(format!(
                    "duplicate tier `{}`",
                    tier.name
                )));
            }
        }
        for pair in config.tiers.windows(2) {
            if pair[1].min_width <= pair[0].min_width {
                return Err(ConfigError::InvalidBreakpoints(format!(
                    "tier `{}` must start above `{}` ({} <= {})",
                    pair[1].name, pair[0].name, pair[1].min_width, pair[0].min_width
                )));
            }
        }
        Ok(Self {
            tiers: config.tiers.clone(),
        })
    }

    #[must_use]
    pub fn tiers(&self) -> &[BreakpointTier] {
        &self.tiers
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tiers.iter().any(|t| t.name == name)
    }

    /// Look up a tier by name.
    #[must_use]
    pub fn tier(&self, name: &str) -> Option<Breakpoint> {
        self.tiers
            .iter()
            .position(|t| t.name == name)
            .map(|index| self.at(index))
    }

    /// Resolve a viewport width to exactly one tier.
    #[must_use]
    pub fn resolve(&self, width: u32) -> Breakpoint {
        let index = self.tiers[1..].partition_point(|t| t.min_width <= width);
        self.at(index)
    }

    /// Whether `slot` has a real ad at `breakpoint`.
    ///
    /// `Ok(false)` for an explicitly empty entry or the `0x0` sentinel; a
    /// missing entry is a configuration error, not an absent ad.
    pub fn has_ad_at(&self, slot: &Slot, breakpoint: &Breakpoint) -> Result<bool, ConfigError> {
        let sizes = slot.size_mapping().get(&breakpoint.name).ok_or_else(|| {
            ConfigError::MissingBreakpointMapping {
                slot: slot.id().to_string(),
                breakpoint: breakpoint.name.clone(),
            }
        })?;
        Ok(!sizes.is_empty() && !is_zero_sentinel(sizes))
    }

    fn at(&self, index: usize) -> Breakpoint {
        Breakpoint {
            index,
            name: self.tiers[index].name.clone(),
        }
    }
}
