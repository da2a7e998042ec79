//! URL canonicalization shared by every stage of the audit.
//!
//! Canonical form: `https` scheme, lowercased host, collapsed slashes, a trailing slash on
//! every non-root path whose last segment has no file extension, query kept, fragment dropped.
//! Malformed input never errors; it canonicalizes to the empty string.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use url::Url;

static REPEATED_SLASHES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/{2,}").unwrap()
});

/// True for blank cells and the textual null markers spreadsheet exports emit
pub fn is_nan_like(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "" | "nan" | "none" | "null"
    )
}

/// Strip quotes and all whitespace; turn schemeless `//host` into `https://host`
pub fn clean_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if is_nan_like(trimmed) {
        return String::new();
    }
    let unquoted = trimmed.trim_matches(|c| c == '"' || c == '\'');
    let compact: String = unquoted.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.starts_with("//") {
        format!("https:{}", compact)
    } else {
        compact
    }
}

/// Normalize with the default trailing-slash policy
pub fn normalize_url(raw: &str) -> String {
    normalize_url_with(raw, true)
}

pub fn normalize_url_with(raw: &str, add_trailing_slash: bool) -> String {
    let cleaned = clean_url(raw);
    if cleaned.is_empty() || cleaned.starts_with('/') {
        return String::new();
    }

    let lower = cleaned.to_lowercase();
    let candidate = if lower.starts_with("https://") || lower.starts_with("http://") {
        cleaned
    } else if lower.contains("://") || has_opaque_scheme(&lower) {
        return String::new();
    } else {
        format!("https://{}", cleaned)
    };

    let parsed = match Url::parse(&candidate) {
        Ok(u) => u,
        Err(_) => return String::new(),
    };
    let host = match parsed.host_str() {
        Some(h) if !h.is_empty() => h.to_lowercase(),
        _ => return String::new(),
    };
    let netloc = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    };

    let mut path = REPEATED_SLASHES.replace_all(parsed.path(), "/").into_owned();
    if path.is_empty() {
        path.push('/');
    }
    if add_trailing_slash && path != "/" && !path.ends_with('/') && !last_segment_has_extension(&path) {
        path.push('/');
    }

    match parsed.query() {
        Some(q) => format!("https://{}{}?{}", netloc, path, q),
        None => format!("https://{}{}", netloc, path),
    }
}

fn has_opaque_scheme(lower: &str) -> bool {
    ["mailto:", "tel:", "javascript:", "data:", "sms:"]
        .iter()
        .any(|s| lower.starts_with(s))
}

fn last_segment_has_extension(path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or("");
    match last.rfind('.') {
        Some(idx) => idx > 0 && idx + 1 < last.len(),
        None => false,
    }
}

pub fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Split a canonical URL into (netloc, remainder) without re-parsing
fn split_netloc(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://"))?;
    let end = rest.find(|c| c == '/' || c == '?').unwrap_or(rest.len());
    Some((&rest[..end], &rest[end..]))
}

/// Host (with port) of a URL, lowercased
pub fn netloc_of(url: &str) -> String {
    split_netloc(url)
        .map(|(netloc, _)| netloc.to_lowercase())
        .unwrap_or_default()
}

/// Reduce a configured domain (bare host, URL, or host/path) to its netloc
pub fn domain_netloc(domain: &str) -> String {
    let cleaned = clean_url(domain);
    if cleaned.is_empty() {
        return String::new();
    }
    let normalized = normalize_url(&cleaned);
    netloc_of(&normalized)
}

/// Rewrite the netloc to the internal one when hosts differ only by `www.`
pub fn canonicalize_internal_netloc(url: &str, internal_domain: &str) -> String {
    let internal = domain_netloc(internal_domain);
    if url.is_empty() || internal.is_empty() {
        return url.to_string();
    }
    match split_netloc(url) {
        Some((netloc, rest)) => {
            let netloc = netloc.to_lowercase();
            if netloc != internal && strip_www(&netloc) == strip_www(&internal) {
                format!("https://{}{}", internal, rest)
            } else {
                url.to_string()
            }
        }
        None => url.to_string(),
    }
}

pub fn url_path(url: &str) -> String {
    match split_netloc(url) {
        Some((_, rest)) => {
            let path = rest.split('?').next().unwrap_or("");
            if path.is_empty() { "/".to_string() } else { path.to_string() }
        }
        None => String::new(),
    }
}

/// Lowercased first non-empty path segment, or empty
pub fn first_path_segment(url: &str) -> String {
    url_path(url)
        .split('/')
        .find(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .unwrap_or_default()
}

/// Lowercased last non-empty path segment, or empty
pub fn last_path_segment(url: &str) -> String {
    url_path(url)
        .split('/')
        .filter(|s| !s.is_empty())
        .last()
        .map(|s| s.to_lowercase())
        .unwrap_or_default()
}

/// Host comparison under `www.` stripping; everything is internal when no domain is configured
pub fn is_internal(url: &str, internal_domain: &str) -> bool {
    let internal = domain_netloc(internal_domain);
    if internal.is_empty() {
        return true;
    }
    let netloc = netloc_of(url);
    !netloc.is_empty() && strip_www(&netloc) == strip_www(&internal)
}

/// Force a path prefix into `/segment/` form
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    format!("/{}/", trimmed.to_lowercase())
}

/// Most common netloc among the given URLs, ties broken alphabetically
pub fn infer_internal_domain<'a>(urls: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for url in urls {
        let netloc = netloc_of(url);
        if !netloc.is_empty() {
            *counts.entry(netloc).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(netloc, _)| netloc)
}

/// Canonicalization bound to one internal domain
#[derive(Debug, Clone, Default)]
pub struct Canonicalizer {
    internal_netloc: String,
}

impl Canonicalizer {
    pub fn new(internal_domain: &str) -> Self {
        Self {
            internal_netloc: domain_netloc(internal_domain),
        }
    }

    pub fn internal_netloc(&self) -> &str {
        &self.internal_netloc
    }

    /// Normalize, absolutize site-relative paths, and canonicalize the internal netloc
    pub fn canonical(&self, raw: &str) -> String {
        let cleaned = clean_url(raw);
        let absolute = if cleaned.starts_with('/') && !cleaned.starts_with("//") {
            if self.internal_netloc.is_empty() {
                return String::new();
            }
            format!("https://{}{}", self.internal_netloc, cleaned)
        } else {
            cleaned
        };
        canonicalize_internal_netloc(&normalize_url(&absolute), &self.internal_netloc)
    }

    pub fn is_internal(&self, url: &str) -> bool {
        is_internal(url, &self.internal_netloc)
    }

    /// Absolute internal URL for a site path
    pub fn absolute(&self, path: &str) -> String {
        if self.internal_netloc.is_empty() {
            return String::new();
        }
        normalize_url(&format!("https://{}{}", self.internal_netloc, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_forces_https_and_trailing_slash() {
        assert_eq!(normalize_url("http://x/b"), "https://x/b/");
        assert_eq!(normalize_url("HTTPS://WWW.Example.COM/Path"), "https://www.example.com/Path/");
        assert_eq!(normalize_url("example.com"), "https://example.com/");
        assert_eq!(normalize_url("//cdn.example.com/a"), "https://cdn.example.com/a/");
    }

    #[test]
    fn test_normalize_keeps_file_extensions() {
        assert_eq!(normalize_url("https://x/files/guide.pdf"), "https://x/files/guide.pdf");
        // A leading dot is a hidden name, not an extension
        assert_eq!(normalize_url("https://x/.well-known"), "https://x/.well-known/");
    }

    #[test]
    fn test_normalize_collapses_slashes_and_drops_fragment() {
        assert_eq!(normalize_url("https://x//a///b#top"), "https://x/a/b/");
        assert_eq!(normalize_url("https://x/a?page=2#c"), "https://x/a/?page=2");
    }

    #[test]
    fn test_normalize_blank_and_malformed_inputs() {
        assert_eq!(normalize_url(""), "");
        assert_eq!(normalize_url("  nan "), "");
        assert_eq!(normalize_url("None"), "");
        assert_eq!(normalize_url("mailto:someone@example.com"), "");
        assert_eq!(normalize_url("ftp://x/file"), "");
        assert_eq!(normalize_url("https://"), "");
        assert_eq!(normalize_url("/relative/path"), "");
    }

    #[test]
    fn test_normalize_removes_embedded_whitespace() {
        assert_eq!(normalize_url(" \"https://x/a b/c\" "), "https://x/ab/c/");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "http://x/b",
            "https://www.example.com//a//b?q=1#frag",
            "example.com/blog/post.html",
            "https://x/blog/p/%5BACTUAL%20ATTORNEY%20URL%5D",
            "https://x:8443/a",
            "https://x/a/../b",
            "https://x/caf\u{e9}",
        ];
        for input in inputs {
            let once = normalize_url(input);
            assert_eq!(normalize_url(&once), once, "not idempotent for {}", input);
        }
    }

    #[test]
    fn test_canonicalize_internal_netloc() {
        assert_eq!(
            canonicalize_internal_netloc("https://example.com/a/", "www.example.com"),
            "https://www.example.com/a/"
        );
        assert_eq!(
            canonicalize_internal_netloc("https://other.com/a/", "www.example.com"),
            "https://other.com/a/"
        );
        assert_eq!(
            canonicalize_internal_netloc("https://example.com/a/", ""),
            "https://example.com/a/"
        );
    }

    #[test]
    fn test_path_segments() {
        assert_eq!(first_path_segment("https://x/Wisconsin/divorce/"), "wisconsin");
        assert_eq!(first_path_segment("https://x/"), "");
        assert_eq!(last_path_segment("https://x/wisconsin/blog/my-post/"), "my-post");
        assert_eq!(url_path("https://x/a/?q=1"), "/a/");
        assert_eq!(url_path("https://x"), "/");
    }

    #[test]
    fn test_is_internal_strips_www() {
        assert!(is_internal("https://example.com/a/", "www.example.com"));
        assert!(is_internal("https://www.example.com/a/", "https://example.com/"));
        assert!(!is_internal("https://elsewhere.com/a/", "example.com"));
        assert!(is_internal("https://elsewhere.com/a/", ""));
    }

    #[test]
    fn test_canonicalizer_absolutizes_relative_links() {
        let canon = Canonicalizer::new("https://www.example.com/");
        assert_eq!(canon.internal_netloc(), "www.example.com");
        assert_eq!(canon.canonical("/wisconsin/divorce"), "https://www.example.com/wisconsin/divorce/");
        assert_eq!(canon.canonical("http://example.com/a"), "https://www.example.com/a/");
        assert_eq!(canon.absolute("/wisconsin/attorneys/"), "https://www.example.com/wisconsin/attorneys/");
        assert_eq!(Canonicalizer::default().canonical("/a/"), "");
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("wisconsin"), "/wisconsin/");
        assert_eq!(normalize_prefix("/Illinois"), "/illinois/");
        assert_eq!(normalize_prefix(""), "/");
    }

    #[test]
    fn test_infer_internal_domain_prefers_most_common() {
        let urls = ["https://a.com/x/", "https://b.com/y/", "https://b.com/z/"];
        assert_eq!(infer_internal_domain(urls.iter().copied()), Some("b.com".to_string()));
        let tied = ["https://b.com/x/", "https://a.com/y/"];
        assert_eq!(infer_internal_domain(tied.iter().copied()), Some("a.com".to_string()));
    }
}
