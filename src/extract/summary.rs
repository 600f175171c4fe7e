// src/extract/summary.rs
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::ingest::types::Candidate;

pub const DEFAULT_SUMMARY_CHARS: usize = 200;

/// Normalize scraped text: decode entities, strip tags, straighten quotes,
/// collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » „ to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{201E}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("ws regex"));
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// Leading excerpt of `content`, cut at a sentence end when one falls late
/// enough, otherwise at a word boundary, otherwise hard.
pub fn summary_from_content(content: &str, max_chars: usize) -> String {
    let clean = normalize_text(content);
    if clean.chars().count() <= max_chars {
        return clean;
    }
    let truncated: String = clean.chars().take(max_chars).collect();

    if let Some(idx) = truncated.rfind(". ") {
        if truncated[..idx].chars().count() as f64 > max_chars as f64 * 0.7 {
            return truncated[..=idx].to_string();
        }
    }
    if let Some(idx) = truncated.rfind(' ') {
        if truncated[..idx].chars().count() as f64 > max_chars as f64 * 0.8 {
            return format!("{}...", &truncated[..idx]);
        }
    }
    format!("{truncated}...")
}

/// Summary to store for a candidate. Never empty: source summary, else an
/// excerpt of the content, else the title.
pub fn derive_summary(candidate: &Candidate, max_chars: usize) -> String {
    if let Some(s) = candidate.summary.as_deref() {
        let s = normalize_text(s);
        if !s.is_empty() {
            return s;
        }
    }
    if let Some(c) = candidate.content.as_deref() {
        let s = summary_from_content(c, max_chars);
        if !s.is_empty() {
            return s;
        }
    }
    let title = normalize_text(&candidate.title);
    if title.is_empty() {
        candidate.link.trim().to_string()
    } else {
        title
    }
}
