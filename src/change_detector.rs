//! # Change Detector
//! Decides whether a freshly scraped candidate is new, unchanged, or a
//! meaningful revision of an item already in the store.
//!
//! Checks run strongest-signal first: the engine's own bookkeeping, then the
//! source-reported modified time, then content length, summary similarity,
//! title, and finally the opaque profile payload. Sites edit articles without
//! touching their own metadata, so the text-based checks catch silent edits.
//!
//! Re-checking an existing item is not free (a changed modified time forces a
//! full re-extraction), so each pass carries a budget: once
//! `max_checks_per_run` checks have been spent, remaining duplicates are
//! reported as unchanged and picked up by a later run.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strsim::normalized_levenshtein;

use crate::ingest::types::{ParsedCandidate, StoredItem};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub enable_update_checks: bool,
    /// When false, a newer source modified time triggers a basic update only.
    pub enable_content_refresh: bool,
    /// Items published longer ago than this are never re-checked.
    pub max_age_days: i64,
    pub default_check_frequency_hours: i64,
    /// Per-source floor between checks, keyed by normalized source name.
    pub check_frequency_hours: BTreeMap<String, i64>,
    pub max_checks_per_run: usize,
    /// Summaries less similar than this count as changed.
    pub similarity_threshold: f64,
    /// Relative content length delta above which content counts as changed.
    pub content_delta_ratio: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let mut check_frequency_hours = BTreeMap::new();
        check_frequency_hours.insert("adevarul".to_string(), 24);
        check_frequency_hours.insert("biziday".to_string(), 24);
        Self {
            enable_update_checks: true,
            enable_content_refresh: true,
            max_age_days: 7,
            default_check_frequency_hours: 72,
            check_frequency_hours,
            max_checks_per_run: 50,
            similarity_threshold: 0.8,
            content_delta_ratio: 0.05,
        }
    }
}

impl DetectorConfig {
    pub fn check_floor_for(&self, source: &str) -> Duration {
        let hours = self
            .check_frequency_hours
            .get(source)
            .copied()
            .unwrap_or(self.default_check_frequency_hours);
        // out-of-range floors never come due
        Duration::try_hours(hours.max(0)).unwrap_or(Duration::MAX)
    }

    /// `None` when the configured age is too large to represent: no limit.
    pub fn max_age(&self) -> Option<Duration> {
        Duration::try_days(self.max_age_days.max(0))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    New,
    Unchanged(Unchanged),
    Changed {
        needs_reextract: bool,
        reason: ChangeReason,
    },
}

impl Classification {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Classification::Unchanged(_))
    }

    pub fn needs_reextract(&self) -> bool {
        matches!(
            self,
            Classification::Changed {
                needs_reextract: true,
                ..
            }
        )
    }
}

/// Why a known item was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unchanged {
    ChecksDisabled,
    TooOld,
    CheckedRecently,
    BudgetExhausted,
    NoDifference,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeReason {
    /// Stored item never had an engine-managed modified time.
    FirstEnrichment,
    SourceModified {
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },
    /// Candidate reports a modified time; the stored item had none.
    SourceModifiedFirstSeen(DateTime<Utc>),
    ContentLength { previous: usize, current: usize },
    Summary { similarity: f64 },
    Title,
    Extra,
}

#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    cfg: DetectorConfig,
}

impl ChangeDetector {
    pub fn new(cfg: DetectorConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.cfg
    }

    /// Start a per-run pass with a fresh check budget.
    pub fn pass(&self) -> DetectorPass<'_> {
        DetectorPass {
            cfg: &self.cfg,
            checks: 0,
        }
    }
}

/// Classification state for one ingestion run.
#[derive(Debug)]
pub struct DetectorPass<'a> {
    cfg: &'a DetectorConfig,
    checks: usize,
}

impl DetectorPass<'_> {
    /// Checks spent so far in this pass.
    pub fn checks(&self) -> usize {
        self.checks
    }

    pub fn classify(
        &mut self,
        existing: Option<&StoredItem>,
        candidate: &ParsedCandidate,
        now: DateTime<Utc>,
    ) -> Classification {
        let Some(existing) = existing else {
            return Classification::New;
        };
        if !self.cfg.enable_update_checks {
            return Classification::Unchanged(Unchanged::ChecksDisabled);
        }

        let Some(last_modified) = existing.last_modified else {
            return self.spend(|_| Classification::Changed {
                needs_reextract: false,
                reason: ChangeReason::FirstEnrichment,
            });
        };

        if let (Some(published), Some(max_age)) = (existing.published_at, self.cfg.max_age()) {
            if now - published > max_age {
                return Classification::Unchanged(Unchanged::TooOld);
            }
        }
        if now - last_modified < self.cfg.check_floor_for(&existing.source) {
            return Classification::Unchanged(Unchanged::CheckedRecently);
        }

        self.spend(|cfg| compare(cfg, existing, candidate))
    }

    fn spend(&mut self, f: impl FnOnce(&DetectorConfig) -> Classification) -> Classification {
        if self.checks >= self.cfg.max_checks_per_run {
            return Classification::Unchanged(Unchanged::BudgetExhausted);
        }
        self.checks += 1;
        f(self.cfg)
    }
}

fn compare(
    cfg: &DetectorConfig,
    existing: &StoredItem,
    candidate: &ParsedCandidate,
) -> Classification {
    let changed = |needs_reextract: bool, reason: ChangeReason| Classification::Changed {
        needs_reextract,
        reason,
    };

    match (existing.source_updated_at, candidate.updated_at) {
        (Some(previous), Some(current)) if current > previous => {
            return changed(
                cfg.enable_content_refresh,
                ChangeReason::SourceModified { previous, current },
            );
        }
        (None, Some(current)) => {
            return changed(false, ChangeReason::SourceModifiedFirstSeen(current));
        }
        _ => {}
    }

    let raw = &candidate.raw;

    if let (Some(old), Some(new)) = (non_blank(existing.content.as_deref()), non_blank(raw.content.as_deref())) {
        let previous = old.chars().count();
        let current = new.chars().count();
        if previous > 0 {
            let delta = previous.abs_diff(current) as f64 / previous as f64;
            if delta > cfg.content_delta_ratio {
                return changed(false, ChangeReason::ContentLength { previous, current });
            }
        }
    }

    if let Some(new) = non_blank(raw.summary.as_deref()) {
        let old = existing.summary.trim();
        if !old.is_empty() && old != new {
            let similarity = summary_similarity(old, new);
            if similarity < cfg.similarity_threshold {
                return changed(false, ChangeReason::Summary { similarity });
            }
        }
    }

    if let Some(title) = non_blank(Some(raw.title.as_str())) {
        if title != existing.title.trim() {
            return changed(false, ChangeReason::Title);
        }
    }

    if raw.extra.is_some() && raw.extra != existing.extra {
        return changed(false, ChangeReason::Extra);
    }

    Classification::Unchanged(Unchanged::NoDifference)
}

/// Case-insensitive similarity ratio in `0.0..=1.0`.
pub fn summary_similarity(a: &str, b: &str) -> f64 {
    normalized_levenshtein(&a.trim().to_lowercase(), &b.trim().to_lowercase())
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|t| !t.is_empty())
}
