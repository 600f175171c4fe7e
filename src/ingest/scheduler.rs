// src/ingest/scheduler.rs
//! Periodic timers per auto-scheduled source, plus one-off warm-up runs.
//!
//! Every tick spawns its own run task and returns to waiting, so a slow run
//! never delays the timer; the run guard drops the overlapping tick instead.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::engine::IngestEngine;
use crate::history::Trigger;
use crate::ingest::types::RunInput;
use crate::ingest::RunError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub warmup_delay_secs: u64,
    pub warmup_stagger_secs: u64,
    /// How many auto sources get a warm-up run; `None` means all of them.
    pub warmup_runs: Option<usize>,
    pub testing_mode: bool,
    pub testing_interval_minutes: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            warmup_delay_secs: 30,
            warmup_stagger_secs: 10,
            warmup_runs: None,
            testing_mode: false,
            testing_interval_minutes: 2,
        }
    }
}

impl SchedulerConfig {
    fn warmup_delay(&self, position: usize) -> Duration {
        Duration::from_secs(self.warmup_delay_secs + self.warmup_stagger_secs * position as u64)
    }
}

pub struct SchedulerHandle {
    registered: Vec<String>,
    warmups: Vec<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Sources that got a periodic timer.
    pub fn registered_sources(&self) -> &[String] {
        &self.registered
    }

    pub fn warmup_sources(&self) -> &[String] {
        &self.warmups
    }

    /// Stop timers and pending warm-ups. Runs already spawned finish on
    /// their own.
    pub fn shutdown(self) {
        for t in &self.tasks {
            t.abort();
        }
        tracing::info!(target: "ingest", timers = self.registered.len(), "scheduler stopped");
    }
}

/// Register a timer for every enabled, non-manual source and schedule the
/// staggered warm-up runs. Must be called inside a tokio runtime.
pub fn spawn_scheduler(engine: IngestEngine, cfg: &SchedulerConfig) -> SchedulerHandle {
    let auto: Vec<(String, Duration)> = engine
        .descriptors()
        .filter(|d| d.is_auto_scheduled())
        .map(|d| (d.name.clone(), d.interval))
        .collect();

    for d in engine.descriptors().filter(|d| !d.is_auto_scheduled()) {
        tracing::info!(
            target: "ingest",
            source = %d.name,
            enabled = d.enabled,
            manual_only = d.manual_only,
            "no timer registered"
        );
    }

    let mut tasks = Vec::new();
    let mut registered = Vec::new();
    for (name, interval) in &auto {
        tasks.push(spawn_timer(engine.clone(), name.clone(), *interval));
        registered.push(name.clone());
        tracing::info!(
            target: "ingest",
            source = %name,
            interval_secs = interval.as_secs(),
            testing_mode = cfg.testing_mode,
            "timer registered"
        );
    }

    let limit = cfg.warmup_runs.unwrap_or(auto.len());
    let mut warmups = Vec::new();
    for (pos, (name, _)) in auto.iter().take(limit).enumerate() {
        let delay = cfg.warmup_delay(pos);
        let engine = engine.clone();
        let source = name.clone();
        tasks.push(tokio::spawn(async move {
            time::sleep(delay).await;
            run_and_log(&engine, &source, Trigger::Warmup).await;
        }));
        warmups.push(name.clone());
        tracing::debug!(target: "ingest", source = %name, delay_secs = delay.as_secs(), "warm-up scheduled");
    }

    SchedulerHandle {
        registered,
        warmups,
        tasks,
    }
}

fn spawn_timer(engine: IngestEngine, source: String, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let engine = engine.clone();
            let source = source.clone();
            tokio::spawn(async move {
                run_and_log(&engine, &source, Trigger::Scheduled).await;
            });
        }
    })
}

async fn run_and_log(engine: &IngestEngine, source: &str, trigger: Trigger) {
    match engine.execute(source, RunInput::default(), trigger).await {
        Ok(report) => {
            tracing::info!(
                target: "ingest",
                source,
                ?trigger,
                inserted = report.inserted,
                updated = report.updated,
                unchanged = report.unchanged,
                "scheduled run finished"
            );
        }
        Err(RunError::Rejected(_)) => {
            tracing::debug!(target: "ingest", source, ?trigger, "tick skipped, run in progress");
            return;
        }
        Err(e) => {
            tracing::warn!(target: "ingest", source, ?trigger, error = %e, "scheduled run failed");
        }
    }
    let running = engine.guard().running();
    tracing::info!(target: "ingest", ?running, "guard status");
}
