//! Text utilities shared across crates.
//!
//! These are pure functions with no I/O, used for prompt assembly,
//! deduplication keys and display previews.

/// Truncate text to a maximum character count, adding ellipsis if needed.
///
/// Uses Unicode-aware character counting to handle multi-byte characters correctly.
/// Trims whitespace from input and from truncated output before adding ellipsis.
///
/// # Examples
///
/// ```
/// use delver_core::truncate;
///
/// assert_eq!(truncate("hello world", 8), "hello...");
/// assert_eq!(truncate("short", 10), "short");
/// ```
pub fn truncate(s: &str, max_chars: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", truncated.trim_end())
    }
}

/// Truncate text with total character count appended.
///
/// # Examples
///
/// ```
/// use delver_core::truncate_with_count;
///
/// let long_text = "a".repeat(500);
/// let result = truncate_with_count(&long_text, 50);
/// assert!(result.ends_with("(500 chars total)"));
/// ```
pub fn truncate_with_count(s: &str, max_chars: usize) -> String {
    let s = s.trim();
    let char_count = s.chars().count();
    if char_count <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{}... ({} chars total)", truncated.trim_end(), char_count)
    }
}

/// Normalize free text into a comparison key.
///
/// Trims, collapses runs of whitespace to a single space and lowercases.
/// Two strings with equal keys are treated as the same query or learning.
///
/// ```
/// use delver_core::normalize_text;
///
/// assert_eq!(normalize_text("  Rust   Async\tRuntimes "), "rust async runtimes");
/// ```
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalize a URL into a source identifier.
///
/// Drops the fragment and a trailing slash, lowercases scheme and host.
/// Path and query are kept as-is since they are case-sensitive on most servers.
///
/// ```
/// use delver_core::normalize_url;
///
/// assert_eq!(
///     normalize_url("HTTPS://Example.COM/Docs/#intro"),
///     "https://example.com/Docs"
/// );
/// ```
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let url = match url.find('#') {
        Some(pos) => &url[..pos],
        None => url,
    };

    let normalized = match url.find("://") {
        Some(scheme_end) => {
            let rest = &url[scheme_end + 3..];
            let host_end = rest.find(['/', '?']).unwrap_or(rest.len());
            format!(
                "{}://{}{}",
                url[..scheme_end].to_lowercase(),
                rest[..host_end].to_lowercase(),
                &rest[host_end..]
            )
        }
        None => url.to_string(),
    };

    normalized.trim_end_matches('/').to_string()
}

/// Strip a markdown code fence wrapping a JSON payload, if present.
///
/// Models frequently answer structured requests with ```` ```json ... ``` ````.
pub fn strip_code_fence(s: &str) -> &str {
    let trimmed = s.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
