//! Redirect resolution and the 3xx register.
//!
//! The redirect map is built once per run from the explicit redirecting-links export and
//! the curl map. The register lists every observed redirecting link instance with the
//! evidence that produced it.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::curl_map::CurlMap;
use crate::edges::{clean_anchor, is_redirect_status, Edge};
use crate::ingest::{IngestError, Table};
use crate::url_utils::Canonicalizer;

/// Lowercased header names accepted for the final-URL column
pub const FINAL_URL_ALIASES: [&str; 5] = [
    "final url",
    "final address",
    "redirect url",
    "redirect to",
    "redirect (core/subservice page)",
];

pub const EVIDENCE_EXPORT: &str = "3xx export";
pub const EVIDENCE_OUTLINKS: &str = "outlinks export";

/// Locate the final-URL column of a redirect export
pub fn find_final_url_column(table: &Table) -> Result<usize, IngestError> {
    let lowered: Vec<String> = table.headers().iter().map(|h| h.trim().to_lowercase()).collect();

    for alias in FINAL_URL_ALIASES {
        if let Some(idx) = lowered.iter().position(|h| h == alias) {
            return Ok(idx);
        }
    }
    // Looser match: a "redirect" column that also names a url, address or page
    if let Some(idx) = lowered.iter().position(|h| {
        h.contains("redirect") && (h.contains("url") || h.contains("address") || h.contains("page"))
    }) {
        return Ok(idx);
    }

    Err(IngestError::NoFinalUrlColumn {
        source_name: table.name.clone(),
        columns: table.headers().to_vec(),
    })
}

#[derive(Debug, Clone, Default)]
pub struct RedirectMap {
    map: BTreeMap<String, String>,
}

impl RedirectMap {
    pub fn insert(&mut self, from: &str, to: &str) {
        if from.is_empty() || to.is_empty() || from == to {
            return;
        }
        self.map.insert(from.to_string(), to.to_string());
    }

    pub fn get(&self, url: &str) -> Option<&str> {
        self.map.get(url).map(String::as_str)
    }

    /// Final URL for `url`, or `url` itself when it does not redirect
    pub fn resolve<'a>(&'a self, url: &'a str) -> &'a str {
        self.get(url).unwrap_or(url)
    }

    /// Merge curl 200 probes whose effective URL differs; live probes override the export
    pub fn merge_curl(&mut self, curl: &CurlMap) {
        for (from, to) in curl.redirect_pairs() {
            self.insert(from, to);
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// One redirecting link instance
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RedirectInstance {
    pub from_url: String,
    pub to_url: String,
    pub final_url: String,
    pub status_code: String,
    pub anchor: String,
    pub link_position: String,
    pub evidence: String,
}

/// Parse a redirect export into instances and the To -> most common Final map
pub fn load_redirect_export(
    table: &Table,
    canon: &Canonicalizer,
) -> Result<(RedirectMap, Vec<RedirectInstance>), IngestError> {
    table.require_columns(&["From", "To"])?;
    let final_idx = find_final_url_column(table)?;

    let mut instances = Vec::new();
    let mut finals: HashMap<String, BTreeMap<String, usize>> = HashMap::new();
    for record in table.records() {
        let to_url = canon.canonical(record.get("To"));
        if to_url.is_empty() {
            continue;
        }
        let final_url = canon.canonical(record.at(final_idx));
        if !final_url.is_empty() {
            *finals
                .entry(to_url.clone())
                .or_default()
                .entry(final_url.clone())
                .or_insert(0) += 1;
        }
        instances.push(RedirectInstance {
            from_url: canon.canonical(record.get("From")),
            to_url,
            final_url,
            status_code: record.get_trimmed("Status Code").to_string(),
            anchor: clean_anchor(record.get("Anchor Text")),
            link_position: record.get_trimmed("Link Position").to_string(),
            evidence: EVIDENCE_EXPORT.to_string(),
        });
    }

    let mut map = RedirectMap::default();
    for (to_url, counts) in finals {
        // BTreeMap iteration is sorted, so the first maximum is the alphabetical tie-break
        let mut best: Option<(&String, usize)> = None;
        for (final_url, count) in &counts {
            if best.map(|(_, c)| *count > c).unwrap_or(true) {
                best = Some((final_url, *count));
            }
        }
        if let Some((final_url, _)) = best {
            map.insert(&to_url, final_url);
        }
    }
    Ok((map, instances))
}

/// Final destination for a redirecting target: redirect map first, then a curl 200 probe
pub fn resolve_final(to_url: &str, redirects: &RedirectMap, curl: &CurlMap) -> String {
    if let Some(final_url) = redirects.get(to_url) {
        return final_url.to_string();
    }
    match curl.ok_effective(to_url) {
        Some(eff) if eff != to_url => eff.to_string(),
        _ => String::new(),
    }
}

/// Export instances plus 3xx edges from outlink exports, resolved and deduplicated
pub fn build_register(
    exported: &[RedirectInstance],
    outlink_edges: &[&Edge],
    redirects: &RedirectMap,
    curl: &CurlMap,
) -> Vec<RedirectInstance> {
    let mut rows: BTreeSet<RedirectInstance> = BTreeSet::new();
    let mut seen: BTreeSet<(String, String, String, String, String, String)> = BTreeSet::new();

    let exported_rows = exported.iter().cloned().map(|mut r| {
        if r.final_url.is_empty() {
            r.final_url = resolve_final(&r.to_url, redirects, curl);
        }
        r
    });
    let backfill_rows = outlink_edges
        .iter()
        .filter(|e| e.is_internal && is_redirect_status(&e.status_code))
        .map(|e| RedirectInstance {
            from_url: e.from_url.clone(),
            to_url: e.to_url.clone(),
            final_url: resolve_final(&e.to_url, redirects, curl),
            status_code: e.status_code.clone(),
            anchor: e.anchor.clone(),
            link_position: e.position_label.clone(),
            evidence: EVIDENCE_OUTLINKS.to_string(),
        });

    for row in exported_rows.chain(backfill_rows) {
        let key = (
            row.from_url.clone(),
            row.to_url.clone(),
            row.final_url.clone(),
            row.status_code.clone(),
            row.anchor.clone(),
            row.link_position.clone(),
        );
        if seen.insert(key) {
            rows.insert(row);
        }
    }
    rows.into_iter().collect()
}
