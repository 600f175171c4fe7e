// src/ingest/config.rs
use anyhow::{anyhow, bail, Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::change_detector::DetectorConfig;
use crate::extract::{ExtractorConfig, MAX_DEADLINE};
use crate::ingest::scheduler::SchedulerConfig;
use crate::ingest::types::{SourceDescriptor, SourceKind};

const ENV_PATH: &str = "INGEST_CONFIG_PATH";
const ENV_TESTING: &str = "INGEST_TESTING_MODE";
const ENV_BIND: &str = "INGEST_BIND";
const ENV_STORE: &str = "INGEST_STORE_PATH";

pub const DEFAULT_TIMEZONE: &str = "Europe/Bucharest";
/// Ten years; anything longer means "no age limit" anyway.
const MAX_AGE_DAYS: i64 = 3650;
const MAX_CHECK_HOURS: i64 = MAX_AGE_DAYS * 24;
const MAX_INTERVAL_MINUTES: u64 = 366 * 24 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub timezone: String,
    pub sources: Vec<SourceConfig>,
    pub detector: DetectorConfig,
    pub extractor: ExtractorConfig,
    pub scheduler: SchedulerConfig,
    pub server: ServerConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub name: String,
    pub display_name: String,
    pub base_url: String,
    pub enabled: bool,
    pub interval_minutes: u64,
    pub manual_only: bool,
    pub kind: SourceKind,
    /// RSS feed backing a news source. Sources without one need an adapter
    /// registered in code.
    pub feed_url: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            display_name: String::new(),
            base_url: String::new(),
            enabled: true,
            interval_minutes: 120,
            manual_only: false,
            kind: SourceKind::News,
            feed_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/items.json"),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE.into(),
            sources: default_sources(),
            detector: DetectorConfig::default(),
            extractor: ExtractorConfig::default(),
            scheduler: SchedulerConfig::default(),
            server: ServerConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig {
            name: "biziday".into(),
            display_name: "Biziday".into(),
            base_url: "https://www.biziday.ro".into(),
            feed_url: Some("https://www.biziday.ro/feed/".into()),
            ..Default::default()
        },
        SourceConfig {
            name: "adevarul".into(),
            display_name: "Adevărul".into(),
            base_url: "https://adevarul.ro".into(),
            feed_url: Some("https://adevarul.ro/rss/index".into()),
            ..Default::default()
        },
        SourceConfig {
            name: "facebook".into(),
            display_name: "Facebook".into(),
            base_url: "https://www.facebook.com".into(),
            interval_minutes: 180,
            manual_only: true,
            kind: SourceKind::Profile,
            ..Default::default()
        },
    ]
}

impl IngestConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("invalid timezone {:?}: {e}", self.timezone))
    }

    /// Runtime view of every configured source. Testing mode replaces the
    /// interval of every source.
    pub fn descriptors(&self) -> Vec<SourceDescriptor> {
        self.sources
            .iter()
            .map(|s| {
                let minutes = if self.scheduler.testing_mode {
                    self.scheduler.testing_interval_minutes
                } else {
                    s.interval_minutes
                };
                SourceDescriptor {
                    name: s.name.clone(),
                    display_name: s.display_name.clone(),
                    base_url: s.base_url.clone(),
                    enabled: s.enabled,
                    interval: Duration::from_secs(minutes.max(1).saturating_mul(60)),
                    manual_only: s.manual_only,
                    kind: s.kind,
                }
            })
            .collect()
    }

    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Normalize names, clamp thresholds, reject what cannot run.
    pub fn sanitize(mut self) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for s in &mut self.sources {
            s.name = normalize_source_name(&s.name);
            if s.name.is_empty() {
                bail!("source with empty name");
            }
            if s.display_name.trim().is_empty() {
                s.display_name = s.name.clone();
            }
            if s.interval_minutes == 0 || s.interval_minutes > MAX_INTERVAL_MINUTES {
                bail!(
                    "source {}: interval_minutes must be in 1..={MAX_INTERVAL_MINUTES}",
                    s.name
                );
            }
            if !seen.insert(s.name.clone()) {
                bail!("duplicate source name {}", s.name);
            }
        }

        let d = &mut self.detector;
        d.similarity_threshold = d.similarity_threshold.clamp(0.0, 1.0);
        d.content_delta_ratio = d.content_delta_ratio.clamp(0.0, 1.0);
        d.max_age_days = d.max_age_days.clamp(0, MAX_AGE_DAYS);
        d.default_check_frequency_hours = d.default_check_frequency_hours.clamp(0, MAX_CHECK_HOURS);
        d.check_frequency_hours = std::mem::take(&mut d.check_frequency_hours)
            .into_iter()
            .map(|(k, v)| (normalize_source_name(&k), v.clamp(0, MAX_CHECK_HOURS)))
            .collect();

        let cap = MAX_DEADLINE.as_secs();
        if self.extractor.timeout_secs > cap {
            tracing::warn!(
                configured = self.extractor.timeout_secs,
                cap,
                "extractor timeout capped"
            );
            self.extractor.timeout_secs = cap;
        }
        if !(1..=MAX_INTERVAL_MINUTES).contains(&self.scheduler.testing_interval_minutes) {
            bail!("scheduler.testing_interval_minutes must be in 1..={MAX_INTERVAL_MINUTES}");
        }

        self.tz()?;
        Ok(self)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var(ENV_TESTING) {
            self.scheduler.testing_mode = matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Ok(v) = std::env::var(ENV_BIND) {
            if !v.trim().is_empty() {
                self.server.bind = v.trim().to_string();
            }
        }
        if let Ok(v) = std::env::var(ENV_STORE) {
            if !v.trim().is_empty() {
                self.store.path = PathBuf::from(v.trim());
            }
        }
    }
}

/// Trim, lowercase, strip Romanian diacritics: "Adevărul " → "adevarul".
pub fn normalize_source_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'ă' | 'â' => 'a',
            'î' => 'i',
            'ș' | 'ş' => 's',
            'ț' | 'ţ' => 't',
            other => other,
        })
        .collect()
}

/// Parse a TOML config and sanitize it. No env overrides.
pub fn parse_config(s: &str) -> Result<IngestConfig> {
    let cfg: IngestConfig = toml::from_str(s).context("parsing ingest config")?;
    cfg.sanitize()
}

pub fn load_config_from(path: &Path) -> Result<IngestConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading ingest config from {}", path.display()))?;
    parse_config(&content).with_context(|| format!("in {}", path.display()))
}

/// Load config using env var + fallbacks:
/// 1) $INGEST_CONFIG_PATH
/// 2) config/ingest.toml
/// 3) built-in defaults
///
/// Env overrides apply on top of whichever was found.
pub fn load_config_default() -> Result<IngestConfig> {
    let mut cfg = if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("INGEST_CONFIG_PATH points to non-existent path"));
        }
        load_config_from(&pb)?
    } else {
        let toml_p = PathBuf::from("config/ingest.toml");
        if toml_p.exists() {
            load_config_from(&toml_p)?
        } else {
            IngestConfig::default().sanitize()?
        }
    };
    cfg.apply_env_overrides();
    Ok(cfg)
}
