//! Canonical link edges built from crawl export rows.

use std::fmt;

use crate::ingest::{Record, Table};
use crate::redirects::RedirectMap;
use crate::url_utils::{url_path, Canonicalizer};

/// Where on the source page the link sits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LinkPosition {
    Content,
    Template,
    Unknown,
}

impl LinkPosition {
    /// Content iff the label equals `Content` case-insensitively; blank is Unknown
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        if label.is_empty() {
            LinkPosition::Unknown
        } else if label.eq_ignore_ascii_case("content") {
            LinkPosition::Content
        } else {
            LinkPosition::Template
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkPosition::Content => "Content",
            LinkPosition::Template => "Template",
            LinkPosition::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for LinkPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First character of an HTTP status code, if any
pub fn status_class(code: &str) -> Option<char> {
    code.trim().chars().next().filter(|c| c.is_ascii_digit())
}

pub fn is_redirect_status(code: &str) -> bool {
    status_class(code) == Some('3')
}

pub fn is_client_error_status(code: &str) -> bool {
    status_class(code) == Some('4')
}

/// Trim and collapse internal whitespace runs
pub fn clean_anchor(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub from_url: String,
    pub to_url_raw: String,
    pub to_url: String,
    pub canonical_target: String,
    pub anchor: String,
    pub position_label: String,
    pub position: LinkPosition,
    pub status_code: String,
    pub is_internal: bool,
    pub in_scope: bool,
    pub source_file: String,
    /// Cluster id of the per-cluster export this edge came from, if any
    pub group: String,
}

impl Edge {
    pub fn is_content(&self) -> bool {
        self.position == LinkPosition::Content
    }

    pub fn is_redirect(&self) -> bool {
        is_redirect_status(&self.status_code)
    }

    pub fn is_ok(&self) -> bool {
        self.status_code.trim() == "200"
    }
}

/// Turns raw export rows into canonical edges
pub struct EdgeNormalizer<'a> {
    canon: &'a Canonicalizer,
    redirects: &'a RedirectMap,
    scope_prefix: String,
}

impl<'a> EdgeNormalizer<'a> {
    pub fn new(canon: &'a Canonicalizer, redirects: &'a RedirectMap, scope_prefix: &str) -> Self {
        Self {
            canon,
            redirects,
            scope_prefix: scope_prefix.to_lowercase(),
        }
    }

    pub fn normalize_record(&self, record: &Record, source_file: &str, group: &str) -> Edge {
        let to_url_raw = record.get_trimmed("To").to_string();
        let to_url = self.canon.canonical(&to_url_raw);
        let canonical_target = self.canon.canonical(self.redirects.resolve(&to_url));
        let position_label = record.get_trimmed("Link Position").to_string();
        let in_scope = !to_url.is_empty()
            && url_path(&to_url).to_lowercase().starts_with(&self.scope_prefix);

        Edge {
            from_url: self.canon.canonical(record.get("From")),
            is_internal: !to_url.is_empty() && self.canon.is_internal(&to_url),
            to_url_raw,
            to_url,
            canonical_target,
            anchor: clean_anchor(record.get("Anchor Text")),
            position: LinkPosition::from_label(&position_label),
            position_label,
            status_code: record.get_trimmed("Status Code").to_string(),
            in_scope,
            source_file: source_file.to_string(),
            group: group.to_string(),
        }
    }

    /// Normalize every `Hyperlink` row of an edge table
    pub fn normalize_hyperlinks(&self, table: &Table, group: &str) -> Vec<Edge> {
        table
            .records()
            .filter(|r| r.get_trimmed("Type").eq_ignore_ascii_case("hyperlink"))
            .map(|r| self.normalize_record(&r, &table.name, group))
            .filter(|e| !e.from_url.is_empty())
            .collect()
    }
}
