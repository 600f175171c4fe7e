// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What kind of items a source yields. Profile items are keyed by a
/// normalized profile URL and need a caller-supplied target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    News,
    Profile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Stable, unique identifier (normalized: lowercase ascii).
    pub name: String,
    /// Human-facing label, e.g. "Adevărul".
    pub display_name: String,
    pub base_url: String,
    pub enabled: bool,
    pub interval: Duration,
    /// Excluded from automatic scheduling; reachable only through `run_now`.
    pub manual_only: bool,
    pub kind: SourceKind,
}

impl SourceDescriptor {
    pub fn is_auto_scheduled(&self) -> bool {
        self.enabled && !self.manual_only
    }
}

/// One raw record as an adapter reports it. Timestamps stay textual until
/// the coordinator parses them; a malformed one only sinks this candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub title: String,
    pub summary: Option<String>,
    pub content: Option<String>,
    /// Natural key: article link or normalized profile URL.
    pub link: String,
    pub published_at: Option<String>,
    /// Source-reported last-modified time.
    pub updated_at: Option<String>,
    /// Opaque payload owned by the profile extraction side (work history etc).
    pub extra: Option<serde_json::Value>,
}

/// A candidate whose timestamps have been normalized to UTC.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCandidate {
    pub raw: Candidate,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ParsedCandidate {
    /// Title and summary come out in stored form, so the detector and the
    /// patch builders compare like with like.
    pub fn parse(mut raw: Candidate, tz: chrono_tz::Tz) -> Result<Self> {
        use crate::extract::summary::normalize_text;
        use crate::ingest::timestamps::parse_optional;
        use anyhow::Context;

        raw.title = normalize_text(&raw.title);
        raw.summary = raw.summary.as_deref().map(normalize_text);

        let published_at = parse_optional(raw.published_at.as_deref(), tz)
            .with_context(|| format!("published_at of {}", raw.link))?;
        let updated_at = parse_optional(raw.updated_at.as_deref(), tz)
            .with_context(|| format!("updated_at of {}", raw.link))?;
        Ok(Self {
            raw,
            published_at,
            updated_at,
        })
    }

    pub fn key(&self) -> &str {
        self.raw.link.trim()
    }
}

/// Durable, deduplicated record. `link` is unique across the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredItem {
    pub link: String,
    pub source: String,
    pub title: String,
    /// Never empty; derived from content or title when the source had none.
    pub summary: String,
    pub content: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    /// Source-reported last-modified time.
    pub source_updated_at: Option<DateTime<Utc>>,
    pub extra: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    /// Engine-managed; set on insert and on every applied change.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Field updates for an existing item. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemPatch {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub source_updated_at: Option<DateTime<Utc>>,
    pub extra: Option<serde_json::Value>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl ItemPatch {
    pub fn apply_to(&self, item: &mut StoredItem) {
        if let Some(t) = &self.title {
            item.title = t.clone();
        }
        if let Some(s) = &self.summary {
            item.summary = s.clone();
        }
        if let Some(c) = &self.content {
            item.content = Some(c.clone());
        }
        if let Some(ts) = self.source_updated_at {
            item.source_updated_at = Some(ts);
        }
        if let Some(x) = &self.extra {
            item.extra = Some(x.clone());
        }
        if let Some(ts) = self.last_modified {
            item.last_modified = Some(ts);
        }
    }
}

/// Caller parameters for a run (e.g. which profile to fetch).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInput {
    pub target: Option<String>,
}

impl RunInput {
    pub fn target(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
        }
    }
}

/// Per-source scraper. Must return `Ok(vec![])` when there is nothing new and
/// `Err` only when the source could not be reached or read.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch_candidates(&self, input: &RunInput) -> Result<Vec<Candidate>>;
    fn name(&self) -> &str;
}
