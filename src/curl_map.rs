//! HTTP probe results produced outside the audit.
//!
//! The map is a headerless TSV of `URL, FINAL_STATUS, EFFECTIVE_URL`. Keys and effective
//! URLs are canonicalized on load. A probe that landed on a 200 also vouches for its
//! effective URL, so that URL is registered as a 200 self-entry unless it was probed itself.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

use crate::ingest::read_headerless_rows;
use crate::url_utils::Canonicalizer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurlEntry {
    pub final_status: u16,
    pub effective_url: String,
}

impl CurlEntry {
    pub fn is_ok(&self) -> bool {
        self.final_status == 200
    }
}

/// Canonical URL -> probe result
#[derive(Debug, Clone, Default)]
pub struct CurlMap {
    entries: BTreeMap<String, CurlEntry>,
}

/// Unparseable statuses read as 0
pub fn parse_status(raw: &str) -> u16 {
    let trimmed = raw.trim();
    if let Ok(code) = trimmed.parse::<u16>() {
        return code;
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() && (0.0..=999.0).contains(&v) => v as u16,
        _ => 0,
    }
}

impl CurlMap {
    pub fn load(path: &Path, canon: &Canonicalizer) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open curl map: {}", path.display()))?;
        Self::from_reader(&path.display().to_string(), file, canon)
    }

    pub fn from_reader<R: Read>(name: &str, reader: R, canon: &Canonicalizer) -> Result<Self> {
        let rows = read_headerless_rows(name, reader, b'\t')?;
        let map = Self::from_rows(&rows, canon);
        debug!("Loaded {} curl map entries from {}", map.len(), name);
        Ok(map)
    }

    pub fn from_rows(rows: &[Vec<String>], canon: &Canonicalizer) -> Self {
        let mut map = Self::default();
        for row in rows {
            let url = canon.canonical(row.first().map(String::as_str).unwrap_or(""));
            if url.is_empty() {
                continue;
            }
            let status = parse_status(row.get(1).map(String::as_str).unwrap_or(""));
            let effective = canon.canonical(row.get(2).map(String::as_str).unwrap_or(""));
            map.insert(url, status, effective);
        }
        map
    }

    /// Record a probe; a 200 with an effective URL also registers that URL as 200 if unseen
    pub fn insert(&mut self, url: String, final_status: u16, effective_url: String) {
        if final_status == 200 && !effective_url.is_empty() {
            self.entries
                .entry(effective_url.clone())
                .or_insert_with(|| CurlEntry {
                    final_status: 200,
                    effective_url: effective_url.clone(),
                });
        }
        self.entries.insert(url, CurlEntry { final_status, effective_url });
    }

    pub fn get(&self, url: &str) -> Option<&CurlEntry> {
        self.entries.get(url)
    }

    pub fn status(&self, url: &str) -> Option<u16> {
        self.entries.get(url).map(|e| e.final_status)
    }

    /// Effective URL when the probe ended on a 200
    pub fn ok_effective(&self, url: &str) -> Option<&str> {
        self.entries
            .get(url)
            .filter(|e| e.is_ok() && !e.effective_url.is_empty())
            .map(|e| e.effective_url.as_str())
    }

    pub fn resolves_ok(&self, url: &str) -> bool {
        self.entries.get(url).map(|e| e.is_ok()).unwrap_or(false)
    }

    pub fn is_not_found(&self, url: &str) -> bool {
        self.status(url) == Some(404)
    }

    /// 200 probes whose effective URL differs from the probed URL
    pub fn redirect_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .filter(|(url, e)| e.is_ok() && !e.effective_url.is_empty() && e.effective_url != **url)
            .map(|(url, e)| (url.as_str(), e.effective_url.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(text: &str) -> CurlMap {
        CurlMap::from_reader("curl.tsv", text.as_bytes(), &Canonicalizer::new("x")).unwrap()
    }

    #[test]
    fn test_keys_and_targets_are_canonical() {
        let map = load("http://x/b\t200\thttps://x/b-final/\n");
        let entry = map.get("https://x/b/").expect("canonical key");
        assert_eq!(entry.final_status, 200);
        assert_eq!(entry.effective_url, "https://x/b-final/");
    }

    #[test]
    fn test_ok_probe_registers_effective_url() {
        let map = load("https://x/b\t200\thttps://x/b-final/\n");
        assert!(map.resolves_ok("https://x/b-final/"));
        assert_eq!(map.ok_effective("https://x/b-final/"), Some("https://x/b-final/"));
    }

    #[test]
    fn test_explicit_probe_overrides_self_entry() {
        let map = load("https://x/a\t200\thttps://x/c/\nhttps://x/c/\t404\thttps://x/c/\n");
        assert_eq!(map.status("https://x/c/"), Some(404));
        // ...but a later self-entry never overwrites an explicit probe
        let map = load("https://x/c/\t404\t\nhttps://x/a\t200\thttps://x/c/\n");
        assert_eq!(map.status("https://x/c/"), Some(404));
    }

    #[test]
    fn test_unparseable_status_is_zero() {
        let map = load("https://x/a\tTIMEOUT\t\nhttps://x/b\t301.0\thttps://x/c/\n");
        assert_eq!(map.status("https://x/a/"), Some(0));
        assert_eq!(map.status("https://x/b/"), Some(301));
        assert_eq!(parse_status(""), 0);
    }

    #[test]
    fn test_redirect_pairs_only_ok_and_changed() {
        let map = load(
            "https://x/a\t200\thttps://x/a2/\n\
             https://x/same/\t200\thttps://x/same/\n\
             https://x/gone\t404\thttps://x/gone/\n",
        );
        let pairs: Vec<(&str, &str)> = map.redirect_pairs().collect();
        assert_eq!(pairs, vec![("https://x/a/", "https://x/a2/")]);
    }

    #[test]
    fn test_not_found_lookup() {
        let map = load("https://x/blog/old\t404\t\n");
        assert!(map.is_not_found("https://x/blog/old/"));
        assert!(!map.is_not_found("https://x/blog/new/"));
    }
}
