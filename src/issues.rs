//! Link issue detection over canonical edges and the redirect register.
//!
//! A single edge may raise several issues (a placeholder URL that also 404s, for example).
//! Issues are row-level findings; they never abort a run.

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::fmt;

use crate::config::AppConfig;
use crate::curl_map::CurlMap;
use crate::edges::{is_client_error_status, is_redirect_status, Edge};
use crate::redirects::{RedirectInstance, RedirectMap};
use crate::taxonomy::{infer_cluster_from_slug, ContentPage, Taxonomy};
use crate::url_utils::{url_path, Canonicalizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IssueType {
    InternalRedirectTarget,
    Internal4xxTarget,
    Non200Target,
    CrossScopeLink,
    PlaceholderUrl,
    MalformedUrl,
    RedirectToHub,
    BlogSource404,
    BlogSourceMissingFromExport,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::InternalRedirectTarget => "INTERNAL_REDIRECT_TARGET",
            IssueType::Internal4xxTarget => "INTERNAL_4XX_TARGET",
            IssueType::Non200Target => "NON_200_TARGET",
            IssueType::CrossScopeLink => "CROSS_SCOPE_LINK",
            IssueType::PlaceholderUrl => "PLACEHOLDER_URL",
            IssueType::MalformedUrl => "MALFORMED_URL",
            IssueType::RedirectToHub => "REDIRECT_TO_HUB",
            IssueType::BlogSource404 => "BLOG_SOURCE_404",
            IssueType::BlogSourceMissingFromExport => "BLOG_SOURCE_MISSING_FROM_EXPORT",
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub issue_type: IssueType,
    /// Which evidence set raised it: content outlinks, core outlinks, redirect register, ...
    pub source_type: String,
    pub source_url: String,
    pub target_raw: String,
    pub current_target: String,
    pub suggested_target: String,
    pub anchor: String,
    pub link_position: String,
    pub status_code: String,
    pub notes: String,
}

impl Issue {
    pub const HEADERS: [&'static str; 10] = [
        "Issue Type",
        "Source Type",
        "Source URL",
        "Target URL (Raw)",
        "Current Target URL",
        "Suggested Target URL",
        "Status Code",
        "Link Position",
        "Anchor Text",
        "Notes",
    ];

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.issue_type.as_str().to_string(),
            self.source_type.clone(),
            self.source_url.clone(),
            self.target_raw.clone(),
            self.current_target.clone(),
            self.suggested_target.clone(),
            self.status_code.clone(),
            self.link_position.clone(),
            self.anchor.clone(),
            self.notes.clone(),
        ]
    }

    fn from_edge(issue_type: IssueType, edge: &Edge, source_type: &str, suggested: String, notes: &str) -> Self {
        Self {
            issue_type,
            source_type: source_type.to_string(),
            source_url: edge.from_url.clone(),
            target_raw: edge.to_url_raw.clone(),
            current_target: edge.to_url.clone(),
            suggested_target: suggested,
            anchor: edge.anchor.clone(),
            link_position: edge.position_label.clone(),
            status_code: edge.status_code.clone(),
            notes: notes.to_string(),
        }
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .with_context(|| format!("Invalid issue pattern: {}", p))
        })
        .collect()
}

/// Detects issues and derives the replacement suggestions attached to them
pub struct IssueDetector<'a> {
    config: &'a AppConfig,
    canon: &'a Canonicalizer,
    taxonomy: &'a Taxonomy,
    redirects: &'a RedirectMap,
    curl: &'a CurlMap,
    placeholder: Vec<Regex>,
    malformed: Vec<Regex>,
}

impl<'a> IssueDetector<'a> {
    pub fn new(
        config: &'a AppConfig,
        canon: &'a Canonicalizer,
        taxonomy: &'a Taxonomy,
        redirects: &'a RedirectMap,
        curl: &'a CurlMap,
    ) -> Result<Self> {
        Ok(Self {
            config,
            canon,
            taxonomy,
            redirects,
            curl,
            placeholder: compile_all(&config.issues.placeholder_patterns)?,
            malformed: compile_all(&config.issues.malformed_patterns)?,
        })
    }

    fn scope_prefix(&self) -> String {
        self.config.site.scope_prefix.to_lowercase()
    }

    fn attorneys_marker(&self) -> String {
        format!(
            "{}{}/",
            self.scope_prefix(),
            self.config.site.attorneys_segment.to_lowercase()
        )
    }

    /// In-scope attorneys directory, e.g. `https://host/wisconsin/attorneys/`
    pub fn attorneys_directory(&self) -> String {
        self.canon.absolute(&self.attorneys_marker())
    }

    /// Target path starts with a cross-scope prefix and not the in-scope prefix
    pub fn is_cross_scope(&self, url: &str) -> bool {
        if url.is_empty() {
            return false;
        }
        let path = url_path(url).to_lowercase();
        let scope = self.scope_prefix();
        if !scope.is_empty() && path.starts_with(&scope) {
            return false;
        }
        self.config
            .site
            .cross_scope_prefixes
            .iter()
            .any(|p| !p.is_empty() && path.starts_with(&p.to_lowercase()))
    }

    /// Same path with the cross-scope prefix swapped for the in-scope prefix
    pub fn cross_scope_candidate(&self, url: &str) -> String {
        let path = url_path(url);
        let lower = path.to_lowercase();
        let scope = self.config.site.scope_prefix.trim_end_matches('/');
        for prefix in &self.config.site.cross_scope_prefixes {
            let p = prefix.to_lowercase();
            if !p.is_empty() && lower.starts_with(&p) {
                let tail = &path[p.trim_end_matches('/').len()..];
                return self.canon.canonical(&format!("{}{}", scope, tail));
            }
        }
        String::new()
    }

    /// In-scope equivalent when it resolves 200, else the attorneys directory for attorney
    /// paths, else the matching cluster's Tier-1, else the first in-scope core page
    pub fn suggest_cross_scope(&self, url: &str) -> String {
        let candidate = self.cross_scope_candidate(url);
        if !candidate.is_empty() && self.curl.resolves_ok(&candidate) {
            return self
                .curl
                .ok_effective(&candidate)
                .map(|eff| self.canon.canonical(eff))
                .unwrap_or(candidate);
        }
        let attorneys = format!("/{}/", self.config.site.attorneys_segment.to_lowercase());
        if url_path(url).to_lowercase().contains(&attorneys) {
            let dir = self.attorneys_directory();
            if !dir.is_empty() {
                return dir;
            }
        }
        infer_cluster_from_slug(url, &self.config.taxonomy.slug_cluster_keywords)
            .and_then(|cid| self.taxonomy.tier1_for_cluster(&cid).map(|t| t.url.clone()))
            .or_else(|| self.taxonomy.core_pages().next().map(|t| t.url.clone()))
            .unwrap_or_default()
    }

    /// A 4xx target with the in-scope attorneys path glued onto another path
    pub fn malformed_rewrite(&self, url: &str) -> String {
        let path = url_path(url);
        match path.to_lowercase().find(&self.attorneys_marker()) {
            Some(idx) if idx > 0 => self.canon.absolute(&path[idx..]),
            _ => String::new(),
        }
    }

    /// Curl 200 destination for a non-200 target; retired attorney profiles go to the directory
    pub fn resolve_non200(&self, url: &str) -> String {
        let Some(eff) = self.curl.ok_effective(url) else {
            return String::new();
        };
        let eff_path = url_path(eff).to_lowercase();
        let was_attorney = url_path(url).to_lowercase().contains(&self.attorneys_marker());
        if was_attorney && (eff_path == "/" || eff_path == self.scope_prefix()) {
            return self.attorneys_directory();
        }
        self.canon.canonical(eff)
    }

    fn is_placeholder(&self, edge: &Edge) -> bool {
        let raw = edge.to_url_raw.to_lowercase();
        let norm = edge.to_url.to_lowercase();
        self.placeholder.iter().any(|re| re.is_match(&raw) || re.is_match(&norm))
    }

    fn is_malformed(&self, edge: &Edge) -> bool {
        let norm = edge.to_url.to_lowercase();
        self.malformed.iter().any(|re| re.is_match(&norm))
    }

    /// Issues for one internal hyperlink; 3xx edges are left to the redirect register
    pub fn edge_issues(&self, edge: &Edge, source_type: &str) -> Vec<Issue> {
        let mut out = Vec::new();
        if !edge.is_internal || edge.to_url.is_empty() {
            return out;
        }

        if self.is_placeholder(edge) {
            out.push(Issue::from_edge(
                IssueType::PlaceholderUrl,
                edge,
                source_type,
                String::new(),
                "Placeholder URL detected; replace with the real destination URL.",
            ));
        } else if self.is_malformed(edge) {
            out.push(Issue::from_edge(
                IssueType::MalformedUrl,
                edge,
                source_type,
                String::new(),
                "Encoded-whitespace URL appears malformed; replace with intended destination.",
            ));
        }

        let status = edge.status_code.trim();
        if is_client_error_status(status) {
            out.push(Issue::from_edge(
                IssueType::Internal4xxTarget,
                edge,
                source_type,
                self.malformed_rewrite(&edge.to_url),
                "Internal link returns 4xx; replace or remove.",
            ));
        } else if !status.is_empty() && status != "200" && !is_redirect_status(status) {
            out.push(Issue::from_edge(
                IssueType::Non200Target,
                edge,
                source_type,
                self.resolve_non200(&edge.to_url),
                "Internal link is non-200; update to final 200 destination.",
            ));
        }

        if self.is_cross_scope(&edge.canonical_target) {
            out.push(Issue::from_edge(
                IssueType::CrossScopeLink,
                edge,
                source_type,
                self.suggest_cross_scope(&edge.canonical_target),
                "Cross-scope internal link; replace with in-scope equivalent when possible.",
            ));
        }
        out
    }

    /// One INTERNAL_REDIRECT_TARGET per register row
    pub fn redirect_issues(&self, register: &[RedirectInstance]) -> Vec<Issue> {
        register
            .iter()
            .filter(|r| !r.from_url.is_empty() && !r.to_url.is_empty())
            .map(|r| Issue {
                issue_type: IssueType::InternalRedirectTarget,
                source_type: r.evidence.clone(),
                source_url: r.from_url.clone(),
                target_raw: r.to_url.clone(),
                current_target: r.to_url.clone(),
                suggested_target: r.final_url.clone(),
                anchor: r.anchor.clone(),
                link_position: r.link_position.clone(),
                status_code: r.status_code.clone(),
                notes: format!("Update internal link to final destination ({}).", r.evidence),
            })
            .collect()
    }

    /// Content outlinks of a core page that resolve back onto the core page itself
    pub fn hub_issues(&self, core_url: &str, edges: &[&Edge]) -> Vec<Issue> {
        edges
            .iter()
            .filter(|e| e.from_url == core_url && e.is_content() && e.to_url != core_url)
            .filter_map(|e| {
                let resolved = match self.redirects.get(&e.to_url) {
                    Some(final_url) => final_url.to_string(),
                    None => self.curl.get(&e.to_url).map(|c| c.effective_url.clone())?,
                };
                (self.canon.canonical(&resolved) == core_url).then(|| {
                    Issue::from_edge(
                        IssueType::RedirectToHub,
                        e,
                        "Core outlink",
                        String::new(),
                        "Target redirects back into this core page; replace with a distinct relevant 200 page or remove.",
                    )
                })
            })
            .collect()
    }

    /// Content pages with no rows in the outlinks export
    pub fn content_source_issues(&self, pages: &[ContentPage], sources_in_export: &HashSet<String>) -> Vec<Issue> {
        pages
            .iter()
            .filter(|p| !sources_in_export.contains(&p.url))
            .map(|p| {
                let gone = self.curl.is_not_found(&p.url);
                Issue {
                    issue_type: if gone {
                        IssueType::BlogSource404
                    } else {
                        IssueType::BlogSourceMissingFromExport
                    },
                    source_type: "Content page".to_string(),
                    source_url: p.url.clone(),
                    target_raw: String::new(),
                    current_target: String::new(),
                    suggested_target: String::new(),
                    anchor: String::new(),
                    link_position: String::new(),
                    status_code: if gone { "404".to_string() } else { String::new() },
                    notes: if gone {
                        "Source page returns 404; remove from implementation list.".to_string()
                    } else {
                        "Page not present in the outlinks export; verify crawl coverage.".to_string()
                    },
                }
            })
            .collect()
    }
}

/// Keep the first issue per (type, source type, source, target, anchor, position, status)
pub fn dedup_issues(issues: Vec<Issue>) -> Vec<Issue> {
    let mut seen = HashSet::new();
    issues
        .into_iter()
        .filter(|i| {
            seen.insert((
                i.issue_type,
                i.source_type.clone(),
                i.source_url.clone(),
                i.current_target.clone(),
                i.anchor.clone(),
                i.link_position.clone(),
                i.status_code.clone(),
            ))
        })
        .collect()
}
