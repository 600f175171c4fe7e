// src/profile.rs
//! Turn what an operator types into the canonical profile URL that keys the
//! stored profile item.

/// Full URLs pass through; a numeric id becomes `profile.php?id=`; a handle
/// (with or without `@`) becomes `{base}/{handle}`. Blank input → `None`.
pub fn normalize_profile_url(base_url: &str, input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if input.starts_with("http://") || input.starts_with("https://") {
        return Some(input.trim_end_matches('/').to_string());
    }

    let base = base_url.trim().trim_end_matches('/');
    if input.chars().all(|c| c.is_ascii_digit()) {
        return Some(format!("{base}/profile.php?id={input}"));
    }

    let handle = input.trim_start_matches('@').trim_matches('/');
    if handle.is_empty() {
        return None;
    }
    Some(format!("{base}/{handle}"))
}
