// src/ingest/guard.rs
//! Per-source run exclusivity.
//!
//! Each source owns one `AtomicBool`; `try_begin` is a compare-and-set from
//! idle to running. There is no queue: a rejected request is dropped and the
//! next tick tries again. The flag lives in process memory only, so a crash
//! leaves every source idle on the next start.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
}

#[derive(Debug, Default)]
pub struct RunGuard {
    flags: RwLock<HashMap<String, Arc<AtomicBool>>>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-register sources so `status()` lists them before their first run.
    pub fn with_sources<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let flags = sources
            .into_iter()
            .map(|s| (s.into(), Arc::new(AtomicBool::new(false))))
            .collect();
        Self {
            flags: RwLock::new(flags),
        }
    }

    /// Marks `source` running and returns true iff it was idle.
    pub fn try_begin(&self, source: &str) -> bool {
        self.flag(source)
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Back to idle. Safe to call when already idle.
    pub fn end(&self, source: &str) {
        if let Some(flag) = self.flags.read().get(source) {
            flag.store(false, Ordering::Release);
        }
    }

    /// RAII form of `try_begin`/`end`: the permit releases on drop, including
    /// on early return and panic unwinding.
    pub fn acquire(self: &Arc<Self>, source: &str) -> Option<RunPermit> {
        self.try_begin(source).then(|| RunPermit {
            guard: Arc::clone(self),
            source: source.to_string(),
        })
    }

    pub fn state(&self, source: &str) -> RunState {
        match self.flags.read().get(source) {
            Some(flag) if flag.load(Ordering::Acquire) => RunState::Running,
            _ => RunState::Idle,
        }
    }

    /// Snapshot of every known source. Holds the read lock only long enough to
    /// copy the flags, so concurrent `try_begin` calls are not held up.
    pub fn status(&self) -> BTreeMap<String, RunState> {
        self.flags
            .read()
            .iter()
            .map(|(name, flag)| {
                let state = if flag.load(Ordering::Acquire) {
                    RunState::Running
                } else {
                    RunState::Idle
                };
                (name.clone(), state)
            })
            .collect()
    }

    pub fn running(&self) -> Vec<String> {
        self.status()
            .into_iter()
            .filter(|(_, s)| *s == RunState::Running)
            .map(|(n, _)| n)
            .collect()
    }

    fn flag(&self, source: &str) -> Arc<AtomicBool> {
        if let Some(flag) = self.flags.read().get(source) {
            return Arc::clone(flag);
        }
        let mut flags = self.flags.write();
        Arc::clone(
            flags
                .entry(source.to_string())
                .or_insert_with(|| Arc::new(AtomicBool::new(false))),
        )
    }
}

/// Held for the duration of one run.
#[derive(Debug)]
pub struct RunPermit {
    guard: Arc<RunGuard>,
    source: String,
}

impl RunPermit {
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.guard.end(&self.source);
    }
}
