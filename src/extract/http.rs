// src/extract/http.rs
//! Generic page re-extractor over `reqwest`.
//!
//! No per-site selectors: drop boilerplate blocks, prefer the `<article>`
//! element, otherwise join the substantial paragraphs. Publication metadata
//! comes from the standard `article:*_time` meta tags.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;

use super::summary::normalize_text;
use super::{ContentReextractor, ExtractError, ExtractMetadata, Extracted, ExtractorConfig};

const MIN_PARAGRAPH_CHARS: usize = 20;
const MIN_BLOCK_CHARS: usize = 200;

pub struct HttpReextractor {
    http: reqwest::Client,
}

impl HttpReextractor {
    pub fn new(cfg: &ExtractorConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.as_str())
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .read_timeout(Duration::from_secs(cfg.read_timeout_secs))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ContentReextractor for HttpReextractor {
    async fn fetch_and_parse(
        &self,
        url: &str,
        source_hint: &str,
    ) -> Result<Extracted, ExtractError> {
        let resp = self.http.get(url).send().await.map_err(classify_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ExtractError::Parse(format!("{url} answered {status}")));
        }
        let body = resp.text().await.map_err(classify_reqwest)?;
        tracing::debug!(url, source = source_hint, bytes = body.len(), "page fetched");
        Ok(parse_page(&body))
    }
}

fn classify_reqwest(e: reqwest::Error) -> ExtractError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        ExtractError::Network(e.to_string())
    } else {
        ExtractError::Parse(e.to_string())
    }
}

/// Pull main text + metadata out of an HTML document.
pub fn parse_page(html: &str) -> Extracted {
    Extracted {
        content: main_text(html),
        metadata: ExtractMetadata {
            published_at: meta_content(html, "article:published_time"),
            updated_at: meta_content(html, "article:modified_time"),
        },
    }
}

fn main_text(html: &str) -> Option<String> {
    static RE_NOISE: OnceCell<Regex> = OnceCell::new();
    static RE_ARTICLE: OnceCell<Regex> = OnceCell::new();
    static RE_PARA: OnceCell<Regex> = OnceCell::new();

    let re_noise = RE_NOISE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|nav|header|footer|aside|noscript)\b[^>]*>.*?</(script|style|nav|header|footer|aside|noscript)>")
            .expect("noise regex")
    });
    let cleaned = re_noise.replace_all(html, " ");

    let re_article = RE_ARTICLE
        .get_or_init(|| Regex::new(r"(?is)<article\b[^>]*>(.*?)</article>").expect("article regex"));
    if let Some(m) = re_article.captures(&cleaned).and_then(|c| c.get(1)) {
        let text = normalize_text(m.as_str());
        if text.chars().count() > MIN_BLOCK_CHARS {
            return Some(text);
        }
    }

    let re_para =
        RE_PARA.get_or_init(|| Regex::new(r"(?is)<p\b[^>]*>(.*?)</p>").expect("paragraph regex"));
    let parts: Vec<String> = re_para
        .captures_iter(&cleaned)
        .filter_map(|c| c.get(1))
        .map(|m| normalize_text(m.as_str()))
        .filter(|t| t.chars().count() > MIN_PARAGRAPH_CHARS)
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("\n\n"))
}

fn meta_content(html: &str, property: &str) -> Option<String> {
    static RE_META: OnceCell<Regex> = OnceCell::new();
    let re = RE_META.get_or_init(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("meta regex"));
    static RE_ATTR: OnceCell<Regex> = OnceCell::new();
    let re_attr = RE_ATTR.get_or_init(|| {
        Regex::new(r#"(?is)\b(property|name|content)\s*=\s*["']([^"']*)["']"#).expect("attr regex")
    });

    for tag in re.find_iter(html) {
        let mut key = None;
        let mut value = None;
        for cap in re_attr.captures_iter(tag.as_str()) {
            match cap[1].to_ascii_lowercase().as_str() {
                "content" => value = Some(cap[2].trim().to_string()),
                _ => key = Some(cap[2].trim().to_string()),
            }
        }
        if key.as_deref().is_some_and(|k| k.eq_ignore_ascii_case(property)) {
            return value.filter(|v| !v.is_empty());
        }
    }
    None
}
