//! history.rs: bounded in-memory log of finished runs for the status surface.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::ingest::{FailureStage, RunError, RunReport};

/// What asked for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Scheduled,
    Warmup,
    Manual,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub source: String,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<RunReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<FailureStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    pub fn from_result(
        source: &str,
        trigger: Trigger,
        started_at: DateTime<Utc>,
        result: &Result<RunReport, RunError>,
    ) -> Self {
        let (report, stage, error) = match result {
            Ok(r) => (Some(r.clone()), None, None),
            Err(e) => (None, Some(e.stage()), Some(e.to_string())),
        };
        Self {
            source: source.to_string(),
            trigger,
            started_at,
            finished_at: Utc::now(),
            success: result.is_ok(),
            report,
            stage,
            error,
        }
    }
}

#[derive(Debug)]
pub struct RunHistory {
    inner: Mutex<VecDeque<RunRecord>>,
    cap: usize,
}

impl RunHistory {
    pub const DEFAULT_CAPACITY: usize = 200;

    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 10_000);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(cap)),
            cap,
        }
    }

    pub fn push(&self, rec: RunRecord) {
        let mut v = self.inner.lock();
        v.push_back(rec);
        while v.len() > self.cap {
            v.pop_front();
        }
    }

    /// Newest last.
    pub fn snapshot_last_n(&self, n: usize) -> Vec<RunRecord> {
        let v = self.inner.lock();
        let start = v.len().saturating_sub(n);
        v.iter().skip(start).cloned().collect()
    }

    pub fn last_for(&self, source: &str) -> Option<RunRecord> {
        self.inner
            .lock()
            .iter()
            .rev()
            .find(|r| r.source == source)
            .cloned()
    }
}

impl Default for RunHistory {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}
