//! Target taxonomy: core pages (Tier-1), sub-services (Tier-2), and supporting pages
//! discovered from hub outlinks (Tier-3), plus the content page list that feeds ADDs.

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use tracing::{debug, warn};

use crate::config::{AppConfig, ClusterKeywords};
use crate::edges::Edge;
use crate::ingest::{IngestError, Table, CONTENT_PAGE_ALIASES, CORE_PAGE_ALIASES};
use crate::url_utils::{url_path, Canonicalizer};

const IN_SCOPE_VALUES: [&str; 5] = ["y", "yes", "true", "1", "in scope"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    Tier1,
    Tier2,
    Tier3,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Tier1 => "Tier-1",
            Tier::Tier2 => "Tier-2",
            Tier::Tier3 => "Tier-3",
        }
    }

    /// Accepts `Tier-1`, `Tier 1`, `tier1` or a bare digit
    pub fn from_label(label: &str) -> Option<Tier> {
        let digits: String = label.chars().filter(|c| c.is_ascii_digit()).collect();
        match digits.as_str() {
            "1" => Some(Tier::Tier1),
            "2" => Some(Tier::Tier2),
            "3" => Some(Tier::Tier3),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub url: String,
    pub tier: Tier,
    pub cluster_id: String,
    /// Tier-1: its own cluster. Tier-2: derived from URL prefix membership.
    pub parent_cluster_id: String,
    pub name: String,
    pub practice_area: String,
    pub h1: String,
    pub primary_keyword: String,
    pub in_scope: bool,
}

/// A Tier-3 page surfaced by hub content outlinks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier3Candidate {
    pub url: String,
    pub occurrences: usize,
    pub hub_count: usize,
    /// Sorted, distinct hub cluster ids
    pub source_hubs: Vec<String>,
}

impl Tier3Candidate {
    pub fn source_hubs_label(&self) -> String {
        self.source_hubs.join(", ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    targets: Vec<Target>,
    tier3: Vec<Tier3Candidate>,
}

fn is_truthy_scope(value: &str) -> bool {
    IN_SCOPE_VALUES.contains(&value.trim().to_lowercase().as_str())
}

impl Taxonomy {
    pub fn from_targets(targets: Vec<Target>) -> Self {
        Self {
            targets,
            tier3: Vec::new(),
        }
    }

    /// Load the core pages + sub-services list.
    ///
    /// Tier comes from a `Tier` column, else `Type == core` marks Tier-1 and everything else
    /// is Tier-2. When no row carries an in-scope flag, every Tier-1 page is in scope.
    pub fn load(mut table: Table, canon: &Canonicalizer, config: &AppConfig) -> Result<Self> {
        table.rename_columns(CORE_PAGE_ALIASES);
        table.require_columns(&["URL"])?;
        if !table.has_column("Tier") && !table.has_column("Type") {
            return Err(IngestError::MissingColumns {
                source_name: table.name.clone(),
                missing: vec!["Tier or Type".to_string()],
            }
            .into());
        }

        let has_name_column = table.has_column("Core Page Name");
        let any_scope_flag = table
            .records()
            .any(|r| !r.get_trimmed("In Scope").is_empty());

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for record in table.records() {
            let url = canon.canonical(record.get("URL"));
            if url.is_empty() || !seen.insert(url.clone()) {
                continue;
            }

            let tier = match Tier::from_label(record.get_trimmed("Tier")) {
                Some(tier) => tier,
                None if record.get_trimmed("Type").eq_ignore_ascii_case("core") => Tier::Tier1,
                None if table.has_column("Type") => Tier::Tier2,
                None => {
                    warn!("{}: no tier for {}, skipping", table.name, url);
                    continue;
                }
            };

            let cluster_id = record.get_trimmed("Cluster ID").to_string();
            let in_scope = if any_scope_flag {
                is_truthy_scope(record.get("In Scope"))
            } else {
                true
            };

            targets.push(Target {
                url,
                tier,
                cluster_id,
                parent_cluster_id: String::new(),
                name: record.get_trimmed("Core Page Name").to_string(),
                practice_area: record.get_trimmed("Practice Area").to_string(),
                h1: record.get_trimmed("H1").to_string(),
                primary_keyword: record.get_trimmed("Primary Keyword").to_string(),
                in_scope,
            });
        }

        // Tier-2 scope follows its flag only when flags exist; Tier-1 defaults to in scope
        if !any_scope_flag {
            for t in targets.iter_mut().filter(|t| t.tier != Tier::Tier1) {
                t.in_scope = true;
            }
        }

        assign_parents(&mut targets, config);
        for target in targets.iter_mut() {
            fill_names(target, config, has_name_column);
        }

        debug!(
            "Loaded {} Tier-1 and {} Tier-2 targets from {}",
            targets.iter().filter(|t| t.tier == Tier::Tier1).count(),
            targets.iter().filter(|t| t.tier == Tier::Tier2).count(),
            table.name
        );
        Ok(Self::from_targets(targets))
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn tier1(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().filter(|t| t.tier == Tier::Tier1)
    }

    pub fn tier2(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().filter(|t| t.tier == Tier::Tier2)
    }

    /// In-scope Tier-1 pages in input order
    pub fn core_pages(&self) -> impl Iterator<Item = &Target> {
        self.tier1().filter(|t| t.in_scope)
    }

    pub fn tier1_for_cluster(&self, cluster_id: &str) -> Option<&Target> {
        if cluster_id.is_empty() {
            return None;
        }
        self.tier1().find(|t| t.cluster_id == cluster_id)
    }

    pub fn tier2_for_parent<'a>(&'a self, parent: &'a str) -> impl Iterator<Item = &'a Target> + 'a {
        self.tier2().filter(move |t| t.parent_cluster_id == parent)
    }

    pub fn get(&self, url: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.url == url)
    }

    pub fn tier_of(&self, url: &str) -> Option<Tier> {
        self.get(url)
            .map(|t| t.tier)
            .or_else(|| self.tier3.iter().any(|c| c.url == url).then_some(Tier::Tier3))
    }

    pub fn urls(&self) -> HashSet<String> {
        self.targets.iter().map(|t| t.url.clone()).collect()
    }

    pub fn tier3(&self) -> &[Tier3Candidate] {
        &self.tier3
    }

    pub fn set_tier3(&mut self, tier3: Vec<Tier3Candidate>) {
        self.tier3 = tier3;
    }
}

/// Parent cluster: Tier-1 owns its cluster; Tier-2 takes the configured prefix binding,
/// then the Tier-1 whose path prefixes it, then its own cluster id.
fn assign_parents(targets: &mut [Target], config: &AppConfig) {
    let tier1_paths: Vec<(String, String)> = targets
        .iter()
        .filter(|t| t.tier == Tier::Tier1 && !t.cluster_id.is_empty())
        .map(|t| (url_path(&t.url).to_lowercase(), t.cluster_id.clone()))
        .collect();

    for target in targets.iter_mut() {
        if target.tier == Tier::Tier1 {
            target.parent_cluster_id = target.cluster_id.clone();
            continue;
        }
        let path = url_path(&target.url).to_lowercase();
        let configured = config
            .taxonomy
            .parent_prefixes
            .iter()
            .find(|b| path.contains(&b.prefix.to_lowercase()))
            .map(|b| b.cluster.clone());
        let by_tier1 = || {
            tier1_paths
                .iter()
                .filter(|(p, _)| p != "/" && path.starts_with(p.as_str()) && path != *p)
                .max_by_key(|(p, _)| p.len())
                .map(|(_, c)| c.clone())
        };
        target.parent_cluster_id = configured
            .or_else(by_tier1)
            .unwrap_or_else(|| target.cluster_id.clone());
    }
}

fn fill_names(target: &mut Target, config: &AppConfig, has_name_column: bool) {
    let parent = target.parent_cluster_id.clone();
    if target.practice_area.is_empty() && config.taxonomy.cluster_names.contains_key(&parent) {
        target.practice_area = config.cluster_name(&parent);
    }
    if !target.name.is_empty() {
        return;
    }
    let cluster_default = config.taxonomy.cluster_names.get(&target.cluster_id).cloned();
    target.name = match target.tier {
        Tier::Tier1 if !has_name_column => cluster_default,
        _ => None,
    }
    .or_else(|| (!target.h1.is_empty() && target.tier != Tier::Tier1).then(|| target.h1.clone()))
    .or_else(|| (!target.practice_area.is_empty()).then(|| target.practice_area.clone()))
    .or_else(|| (!target.h1.is_empty()).then(|| target.h1.clone()))
    .or_else(|| (!target.cluster_id.is_empty()).then(|| target.cluster_id.clone()))
    .unwrap_or_else(|| target.url.clone());
}

/// One content page (blog post or similar) eligible for an ADD
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentPage {
    pub url: String,
    pub cluster_id: String,
    pub intent_tag: String,
}

/// Load the content page list; a single-column file is read as a bare URL list
pub fn load_content_pages(mut table: Table, canon: &Canonicalizer) -> Result<Vec<ContentPage>> {
    if table.headers().len() == 1 {
        table.rename_column_at(0, "Content URL");
    }
    table.rename_columns(CONTENT_PAGE_ALIASES);
    table.require_columns(&["Content URL"])?;

    let mut seen = HashSet::new();
    let pages: Vec<ContentPage> = table
        .records()
        .filter_map(|r| {
            let url = canon.canonical(r.get("Content URL"));
            if url.is_empty() || !seen.insert(url.clone()) {
                return None;
            }
            Some(ContentPage {
                url,
                cluster_id: r.get_trimmed("Cluster ID").to_string(),
                intent_tag: r.get_trimmed("Intent Tag").to_lowercase(),
            })
        })
        .collect();
    debug!("Loaded {} content pages from {}", pages.len(), table.name);
    Ok(pages)
}

/// First configured cluster with a keyword contained in the URL path
pub fn infer_cluster_from_slug(url: &str, keywords: &[ClusterKeywords]) -> Option<String> {
    let path = url_path(url).to_lowercase();
    keywords
        .iter()
        .find(|ck| ck.keywords.iter().any(|k| path.contains(&k.to_lowercase())))
        .map(|ck| ck.cluster.clone())
}

/// `/wisconsin/` -> `Wisconsin`, `/new-york/` -> `New York`
pub fn region_name(scope_prefix: &str) -> String {
    let segment = scope_prefix.trim_matches('/').split('/').next().unwrap_or("").trim();
    segment
        .split('-')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Derive Tier-3 pages from hub content outlinks.
///
/// Each edge's `group` names the hub it came from. Targets outside the scope prefix,
/// Tier-1/Tier-2 pages, blog posts, and attorney or location directories are excluded.
pub fn synthesize_tier3(hub_edges: &[&Edge], taxonomy: &Taxonomy, config: &AppConfig) -> Vec<Tier3Candidate> {
    let scope = config.site.scope_prefix.to_lowercase();
    let blog_marker = config.site.blog_path_marker.to_lowercase();
    let attorneys = format!("/{}/", config.site.attorneys_segment.to_lowercase());
    let locations = format!("/{}/", config.site.locations_segment.to_lowercase());
    let known = taxonomy.urls();

    let mut occurrences: BTreeMap<&str, usize> = BTreeMap::new();
    let mut hubs: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for edge in hub_edges.iter().filter(|e| e.is_content() && e.is_internal) {
        let path = url_path(&edge.to_url).to_lowercase();
        let excluded = !path.starts_with(&scope)
            || known.contains(&edge.to_url)
            || (!blog_marker.is_empty() && path.contains(&blog_marker))
            || path.contains(&attorneys)
            || path.contains(&locations);
        if excluded {
            continue;
        }
        *occurrences.entry(edge.to_url.as_str()).or_insert(0) += 1;
        hubs.entry(edge.to_url.as_str()).or_default().insert(edge.group.as_str());
    }

    let mut candidates: Vec<Tier3Candidate> = occurrences
        .into_iter()
        .map(|(url, occurrences)| {
            let source_hubs: Vec<String> = hubs
                .get(url)
                .map(|set| set.iter().filter(|h| !h.is_empty()).map(|h| h.to_string()).collect())
                .unwrap_or_default();
            Tier3Candidate {
                url: url.to_string(),
                occurrences,
                hub_count: source_hubs.len(),
                source_hubs,
            }
        })
        .filter(|c| c.occurrences >= 2 || c.hub_count >= 2)
        .collect();

    candidates.sort_by(|a, b| {
        b.hub_count
            .cmp(&a.hub_count)
            .then(b.occurrences.cmp(&a.occurrences))
            .then_with(|| a.url.cmp(&b.url))
    });
    debug!("Synthesized {} Tier-3 targets", candidates.len());
    candidates
}
