//! Deadline-bounded content re-extraction.
//!
//! The fetch-and-parse call runs on a detached worker task and reports back
//! over a oneshot channel. The caller waits on that channel, a deadline timer
//! and a progress ticker at once, so it returns on time even when the worker
//! hangs inside I/O that ignores its own timeouts (DNS stalls, half-finished
//! TLS handshakes).
//!
//! A worker that misses the deadline is abandoned, not cancelled: nothing is
//! sent into it, it is never joined, and if it eventually produces a result
//! the send fails and the result is discarded.

pub mod http;
pub mod summary;

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Hard upper bound for any configured extraction deadline.
pub const MAX_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub progress_log_secs: u64,
    /// Content shorter than this (in chars) counts as empty.
    pub min_content_chars: usize,
    pub summary_max_chars: usize,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            poll_interval_ms: 500,
            progress_log_secs: 5,
            min_content_chars: 100,
            summary_max_chars: 200,
            connect_timeout_secs: 5,
            read_timeout_secs: 8,
            user_agent: concat!("content-ingest/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ExtractorConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.timeout_secs).min(MAX_DEADLINE)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

/// Metadata the re-extractor found on the page, as raw text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractMetadata {
    pub published_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub content: Option<String>,
    pub metadata: ExtractMetadata,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// Transient: connect failure, DNS, transport timeout.
    #[error("network error: {0}")]
    Network(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Fetches one page and pulls its main text out.
#[async_trait::async_trait]
pub trait ContentReextractor: Send + Sync + 'static {
    async fn fetch_and_parse(&self, url: &str, source_hint: &str)
        -> Result<Extracted, ExtractError>;
}

/// Every way an extraction can end. Callers branch on it; nothing is raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Content {
        content: String,
        metadata: ExtractMetadata,
    },
    /// Page fetched, but nothing usable (below the minimum length).
    Empty {
        chars: usize,
        metadata: ExtractMetadata,
    },
    Timeout {
        after: Duration,
    },
    Network(String),
    Failed(String),
}

impl ExtractionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ExtractionOutcome::Content { .. } => "content",
            ExtractionOutcome::Empty { .. } => "empty",
            ExtractionOutcome::Timeout { .. } => "timeout",
            ExtractionOutcome::Network(_) => "network",
            ExtractionOutcome::Failed(_) => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExtractionOutcome::Content { .. })
    }

    /// Metadata is usable from both successful shapes.
    pub fn metadata(&self) -> Option<&ExtractMetadata> {
        match self {
            ExtractionOutcome::Content { metadata, .. }
            | ExtractionOutcome::Empty { metadata, .. } => Some(metadata),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct BoundedExtractor {
    reextractor: Arc<dyn ContentReextractor>,
    cfg: ExtractorConfig,
}

impl BoundedExtractor {
    pub fn new(reextractor: Arc<dyn ContentReextractor>, cfg: ExtractorConfig) -> Self {
        Self { reextractor, cfg }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.cfg
    }

    /// `extract` with the configured deadline.
    pub async fn extract_default(&self, url: &str, source_hint: &str) -> ExtractionOutcome {
        self.extract(url, source_hint, self.cfg.deadline()).await
    }

    pub async fn extract(
        &self,
        url: &str,
        source_hint: &str,
        deadline: Duration,
    ) -> ExtractionOutcome {
        let started = Instant::now();
        let (tx, mut rx) = oneshot::channel();

        let worker = Arc::clone(&self.reextractor);
        let (w_url, w_hint) = (url.to_string(), source_hint.to_string());
        // Detached: the JoinHandle is dropped on purpose.
        tokio::spawn(async move {
            let res = worker.fetch_and_parse(&w_url, &w_hint).await;
            if tx.send(res).is_err() {
                tracing::debug!(url = %w_url, "late extraction result discarded");
            }
        });

        let expires = time::sleep(deadline);
        tokio::pin!(expires);
        let mut poll = time::interval_at(started + self.cfg.poll_interval(), self.cfg.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let progress_every = Duration::from_secs(self.cfg.progress_log_secs.max(1));
        let mut last_progress = started;

        let outcome = loop {
            tokio::select! {
                biased;
                res = &mut rx => {
                    break match res {
                        Ok(res) => self.classify(res),
                        Err(_) => ExtractionOutcome::Failed("extraction worker exited without a result".into()),
                    };
                }
                _ = &mut expires => {
                    break ExtractionOutcome::Timeout { after: started.elapsed() };
                }
                _ = poll.tick() => {
                    if last_progress.elapsed() >= progress_every {
                        last_progress = Instant::now();
                        tracing::debug!(
                            url,
                            elapsed_s = started.elapsed().as_secs(),
                            limit_s = deadline.as_secs(),
                            "still extracting"
                        );
                    }
                }
            }
        };

        let ms = started.elapsed().as_secs_f64() * 1_000.0;
        histogram!("extract_duration_ms").record(ms);
        counter!("extract_outcomes_total", "outcome" => outcome.label()).increment(1);
        match &outcome {
            ExtractionOutcome::Content { content, .. } => {
                tracing::debug!(url, chars = content.chars().count(), ms, "extraction finished")
            }
            other => tracing::warn!(url, outcome = other.label(), ms, "extraction did not yield content"),
        }
        outcome
    }

    fn classify(&self, res: Result<Extracted, ExtractError>) -> ExtractionOutcome {
        match res {
            Ok(Extracted { content, metadata }) => {
                let content = content.map(|c| c.trim().to_string()).unwrap_or_default();
                let chars = content.chars().count();
                if chars < self.cfg.min_content_chars {
                    ExtractionOutcome::Empty { chars, metadata }
                } else {
                    ExtractionOutcome::Content { content, metadata }
                }
            }
            Err(ExtractError::Network(e)) => ExtractionOutcome::Network(e),
            Err(ExtractError::Parse(e)) => ExtractionOutcome::Failed(e),
        }
    }
}

/// Adapts a synchronous fetch-and-parse function; each call runs on tokio's
/// blocking pool so a stuck call never pins an async worker thread.
pub struct BlockingReextractor<F> {
    f: Arc<F>,
}

impl<F> BlockingReextractor<F>
where
    F: Fn(&str, &str) -> Result<Extracted, ExtractError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

#[async_trait::async_trait]
impl<F> ContentReextractor for BlockingReextractor<F>
where
    F: Fn(&str, &str) -> Result<Extracted, ExtractError> + Send + Sync + 'static,
{
    async fn fetch_and_parse(
        &self,
        url: &str,
        source_hint: &str,
    ) -> Result<Extracted, ExtractError> {
        let f = Arc::clone(&self.f);
        let (url, hint) = (url.to_string(), source_hint.to_string());
        tokio::task::spawn_blocking(move || f(&url, &hint))
            .await
            .map_err(|e| ExtractError::Parse(format!("blocking extractor died: {e}")))?
    }
}
