// src/ingest/providers/rss.rs
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::{OffsetDateTime, UtcOffset};

use crate::extract::summary::normalize_text;
use crate::ingest::types::{Candidate, RunInput, SourceAdapter};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "content:encoded")]
    content_encoded: Option<String>,
}

/// RFC 2822 → RFC 3339 in UTC. Anything unparseable is passed through so the
/// coordinator can reject that one item.
fn normalize_pub_date(ts: &str) -> String {
    let ts = ts.trim();
    OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .and_then(|dt| dt.to_offset(UtcOffset::UTC).format(&Rfc3339).ok())
        .unwrap_or_else(|| ts.to_string())
}

/// News source adapter over an RSS 2.0 feed.
pub struct RssAdapter {
    name: String,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl RssAdapter {
    /// Serve a fixed document; used by tests and offline runs.
    pub fn from_fixture(name: impl Into<String>, xml: &str) -> Self {
        Self {
            name: name.into(),
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn from_url(name: impl Into<String>, url: impl Into<String>, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .context("building rss http client")?;
        Ok(Self {
            name: name.into(),
            mode: Mode::Http {
                url: url.into(),
                client,
            },
        })
    }

    fn parse_items_from_str(&self, s: &str) -> Result<Vec<Candidate>> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss =
            from_str(&xml_clean).with_context(|| format!("parsing {} rss xml", self.name))?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        let mut dropped = 0usize;
        for it in rss.channel.item {
            let Some(link) = it.link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty())
            else {
                dropped += 1;
                continue;
            };
            let summary = it
                .description
                .as_deref()
                .map(normalize_text)
                .filter(|s| !s.is_empty());
            let content = it
                .content_encoded
                .as_deref()
                .map(normalize_text)
                .filter(|s| !s.is_empty());

            out.push(Candidate {
                title: it.title.as_deref().map(normalize_text).unwrap_or_default(),
                summary,
                content,
                link,
                published_at: it.pub_date.as_deref().map(normalize_pub_date),
                updated_at: None,
                extra: None,
            });
        }
        if dropped > 0 {
            tracing::debug!(adapter = %self.name, dropped, "rss items without link dropped");
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("ingest_parse_ms").record(ms);
        Ok(out)
    }
}

#[async_trait]
impl SourceAdapter for RssAdapter {
    async fn fetch_candidates(&self, _input: &RunInput) -> Result<Vec<Candidate>> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_items_from_str(s),
            Mode::Http { url, client } => {
                let resp = match client.get(url).send().await {
                    Ok(resp) => resp,
                    Err(e) => {
                        tracing::warn!(error = ?e, adapter = %self.name, "feed http error");
                        counter!("ingest_provider_errors_total").increment(1);
                        return Err(e).with_context(|| format!("GET {url}"));
                    }
                };
                let body = resp
                    .error_for_status()
                    .with_context(|| format!("GET {url}"))?
                    .text()
                    .await
                    .context("reading feed body")?;
                self.parse_items_from_str(&body)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&icirc;", "î")
        .replace("&acirc;", "â")
}
