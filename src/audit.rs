//! Inlink/outlink aggregation per core page and the dashboard summary tables.
//!
//! Everything here is a grouped reduction over canonical edges. Groupings use `BTreeMap`
//! and explicit sort keys so identical inputs render identical rows.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::config::AppConfig;
use crate::edges::{is_client_error_status, Edge, LinkPosition};
use crate::issues::IssueDetector;
use crate::recommend::{Action, Recommendation};
use crate::redirects::RedirectInstance;
use crate::report::{percent_1dp, Cell};
use crate::taxonomy::{Target, Taxonomy, Tier};
use crate::url_utils::url_path;

pub const EMPTY_ANCHOR: &str = "(empty)";

pub const KPI_ADDS: &str = "Add-link recommendations (1 per blog)";
pub const KPI_FIXES: &str = "Fix-existing recommendations";
pub const KPI_DASHBOARD_ADDS: &str = "Add-link recommendations (missing-only)";

pub fn anchor_label(anchor: &str) -> String {
    let trimmed = anchor.trim();
    if trimmed.is_empty() {
        EMPTY_ANCHOR.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Most common label and its share of the total. Ties go to the alphabetically first label.
pub fn top_share<'a>(labels: impl IntoIterator<Item = &'a str>) -> (String, f64) {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut total = 0usize;
    for label in labels {
        *counts.entry(label).or_insert(0) += 1;
        total += 1;
    }
    let mut best: Option<(&str, usize)> = None;
    for (label, count) in counts {
        if best.map(|(_, c)| count > c).unwrap_or(true) {
            best = Some((label, count));
        }
    }
    match best {
        Some((label, count)) => (label.to_string(), count as f64 / total as f64),
        None => (String::new(), 0.0),
    }
}

fn top_anchor(edges: &[&Edge]) -> (String, f64) {
    let labels: Vec<String> = edges.iter().map(|e| anchor_label(&e.anchor)).collect();
    top_share(labels.iter().map(String::as_str))
}

/// Decides whether a linking page is a blog/content page
#[derive(Debug, Clone, Default)]
pub struct BlogMatcher {
    content_urls: HashSet<String>,
    marker: String,
}

impl BlogMatcher {
    pub fn new(content_urls: impl IntoIterator<Item = String>, marker: &str) -> Self {
        Self {
            content_urls: content_urls.into_iter().collect(),
            marker: marker.to_lowercase(),
        }
    }

    pub fn is_blog(&self, url: &str) -> bool {
        self.content_urls.contains(url)
            || (!self.marker.is_empty() && url_path(url).to_lowercase().contains(&self.marker))
    }
}

// ---------------------------------------------------------------------------
// Inlink audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct InlinkRow {
    pub target: Target,
    pub instances: usize,
    pub unique_linking_pages: usize,
    pub blog_inlinks: usize,
    pub blog_linking_pages: usize,
    pub blog_content_inlinks: usize,
    pub content_inlinks: usize,
    pub template_inlinks: usize,
    pub top_anchor: String,
    pub top_anchor_share: f64,
    pub top_content_anchor: String,
    pub top_content_anchor_share: f64,
    /// Raw link-position label -> instances
    pub positions: BTreeMap<String, usize>,
}

impl InlinkRow {
    pub const HEADERS: [&'static str; 16] = [
        "Target URL",
        "Tier",
        "Parent Cluster ID",
        "Practice Area",
        "H1",
        "Inlink Instances",
        "Unique Linking Pages",
        "Blog Inlinks (All)",
        "Blog Linking Pages (Unique)",
        "Blog Inlinks (Content)",
        "Inlinks (Content)",
        "Inlinks (Template)",
        "Top Anchor (All)",
        "Top Anchor Share (All)",
        "Top Anchor (Content)",
        "Top Anchor Share (Content)",
    ];

    pub fn to_cells(&self, position_labels: &[String]) -> Vec<Cell> {
        let mut cells = vec![
            Cell::from(&self.target.url),
            Cell::from(self.target.tier.as_str()),
            Cell::from(&self.target.parent_cluster_id),
            Cell::from(&self.target.practice_area),
            Cell::from(&self.target.h1),
            Cell::from(self.instances),
            Cell::from(self.unique_linking_pages),
            Cell::from(self.blog_inlinks),
            Cell::from(self.blog_linking_pages),
            Cell::from(self.blog_content_inlinks),
            Cell::from(self.content_inlinks),
            Cell::from(self.template_inlinks),
            Cell::from(&self.top_anchor),
            Cell::from(self.top_anchor_share),
            Cell::from(&self.top_content_anchor),
            Cell::from(self.top_content_anchor_share),
        ];
        for label in position_labels {
            cells.push(Cell::from(self.positions.get(label).copied().unwrap_or(0)));
        }
        cells
    }
}

/// Inlink audit over Tier-1/Tier-2 targets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InlinkAudit {
    /// Distinct position labels, rendered as `LP: <label>` columns
    pub position_labels: Vec<String>,
    pub rows: Vec<InlinkRow>,
}

impl InlinkAudit {
    pub fn headers(&self) -> Vec<String> {
        InlinkRow::HEADERS
            .iter()
            .map(|h| h.to_string())
            .chain(self.position_labels.iter().map(|l| format!("LP: {}", l)))
            .collect()
    }
}

pub fn inlink_audit(edges: &[&Edge], taxonomy: &Taxonomy, blogs: &BlogMatcher) -> InlinkAudit {
    let mut by_target: BTreeMap<&str, Vec<&Edge>> = BTreeMap::new();
    let mut labels: BTreeSet<String> = BTreeSet::new();
    for edge in edges.iter().filter(|e| e.is_internal) {
        if taxonomy.get(&edge.canonical_target).is_none() {
            continue;
        }
        labels.insert(position_column_label(edge));
        by_target.entry(edge.canonical_target.as_str()).or_default().push(*edge);
    }

    let mut rows: Vec<InlinkRow> = taxonomy
        .targets()
        .iter()
        .map(|target| {
            let inbound = by_target.get(target.url.as_str()).cloned().unwrap_or_default();
            inlink_row(target, &inbound, blogs)
        })
        .collect();
    rows.sort_by(|a, b| {
        (a.target.tier, &a.target.parent_cluster_id, &a.target.url)
            .cmp(&(b.target.tier, &b.target.parent_cluster_id, &b.target.url))
    });

    InlinkAudit {
        position_labels: labels.into_iter().collect(),
        rows,
    }
}

fn position_column_label(edge: &Edge) -> String {
    if edge.position_label.is_empty() {
        LinkPosition::Unknown.as_str().to_string()
    } else {
        edge.position_label.clone()
    }
}

fn inlink_row(target: &Target, inbound: &[&Edge], blogs: &BlogMatcher) -> InlinkRow {
    let content: Vec<&Edge> = inbound.iter().copied().filter(|e| e.is_content()).collect();
    let blog: Vec<&Edge> = inbound.iter().copied().filter(|e| blogs.is_blog(&e.from_url)).collect();
    let unique = |edges: &[&Edge]| edges.iter().map(|e| e.from_url.as_str()).collect::<BTreeSet<_>>().len();

    let mut positions = BTreeMap::new();
    for edge in inbound {
        *positions.entry(position_column_label(edge)).or_insert(0) += 1;
    }
    let (top_all, top_all_share) = top_anchor(inbound);
    let (top_content, top_content_share) = top_anchor(&content);

    InlinkRow {
        target: target.clone(),
        instances: inbound.len(),
        unique_linking_pages: unique(inbound),
        blog_inlinks: blog.len(),
        blog_linking_pages: unique(&blog),
        blog_content_inlinks: blog.iter().filter(|e| e.is_content()).count(),
        content_inlinks: content.len(),
        template_inlinks: inbound.iter().filter(|e| !e.is_content()).count(),
        top_anchor: top_all,
        top_anchor_share: top_all_share,
        top_content_anchor: top_content,
        top_content_anchor_share: top_content_share,
        positions,
    }
}

// ---------------------------------------------------------------------------
// Core page outlinks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreOutlinkRow {
    pub hub: String,
    pub hub_url: String,
    pub target_raw: String,
    pub target: String,
    pub anchor: String,
    pub link_position: String,
    pub status_code: String,
    pub target_tier: String,
    pub issue: String,
}

impl CoreOutlinkRow {
    pub const HEADERS: [&'static str; 9] = [
        "Hub",
        "Hub URL",
        "Target URL (Raw)",
        "Target URL (Normalized)",
        "Anchor Text",
        "Link Position",
        "Status Code",
        "Target Tier",
        "Issue",
    ];

    pub fn to_cells(&self) -> Vec<Cell> {
        [
            &self.hub,
            &self.hub_url,
            &self.target_raw,
            &self.target,
            &self.anchor,
            &self.link_position,
            &self.status_code,
            &self.target_tier,
            &self.issue,
        ]
        .into_iter()
        .map(Cell::from)
        .collect()
    }
}

pub fn target_tier_label(url: &str, taxonomy: &Taxonomy, scope_prefix: &str) -> String {
    match taxonomy.tier_of(url) {
        Some(tier) => tier.as_str().to_string(),
        None if !scope_prefix.is_empty() && url_path(url).to_lowercase().contains(&scope_prefix.to_lowercase()) => {
            "Internal (scope) Other".to_string()
        }
        None => "Internal (Other)".to_string(),
    }
}

/// Content outlinks from each core page with their target tier and hygiene flags
pub fn core_outlinks_audit(
    hub_edges: &[&Edge],
    taxonomy: &Taxonomy,
    detector: &IssueDetector,
    scope_prefix: &str,
) -> Vec<CoreOutlinkRow> {
    let mut rows: Vec<CoreOutlinkRow> = hub_edges
        .iter()
        .filter(|e| e.is_internal && e.is_content())
        .map(|e| {
            let hub = taxonomy
                .get(&e.from_url)
                .map(|t| t.cluster_id.clone())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| e.group.clone());
            let mut flags = String::new();
            if e.status_code != "200" {
                flags.push_str("Non-200; ");
            }
            if detector.is_cross_scope(&e.canonical_target) {
                flags.push_str("Cross-scope; ");
            }
            if e.to_url_raw.chars().any(char::is_whitespace) {
                flags.push_str("Malformed whitespace; ");
            }
            CoreOutlinkRow {
                hub,
                hub_url: e.from_url.clone(),
                target_raw: e.to_url_raw.clone(),
                target: e.canonical_target.clone(),
                anchor: e.anchor.clone(),
                link_position: e.position_label.clone(),
                status_code: e.status_code.clone(),
                target_tier: target_tier_label(&e.canonical_target, taxonomy, scope_prefix),
                issue: flags.trim_end_matches(&[';', ' '][..]).to_string(),
            }
        })
        .collect();
    rows.sort_by(|a, b| (&a.hub, &a.target_tier, &a.target).cmp(&(&b.hub, &b.target_tier, &b.target)));
    rows
}

// ---------------------------------------------------------------------------
// Content outlinks (current)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentOutlinkRow {
    pub source_url: String,
    pub target_raw: String,
    pub target: String,
    pub anchor: String,
    pub link_position: String,
    pub status_code: String,
    pub status: String,
}

impl ContentOutlinkRow {
    pub const HEADERS: [&'static str; 7] = [
        "Blog URL (Content URL)",
        "Target URL (Raw)",
        "Target URL (Normalized)",
        "Anchor Text",
        "Link Position",
        "Status Code",
        "Status",
    ];

    pub fn to_cells(&self) -> Vec<Cell> {
        [
            &self.source_url,
            &self.target_raw,
            &self.target,
            &self.anchor,
            &self.link_position,
            &self.status_code,
            &self.status,
        ]
        .into_iter()
        .map(Cell::from)
        .collect()
    }
}

pub fn status_label(code: &str) -> &'static str {
    match code.trim().chars().next() {
        Some('2') => "OK",
        Some('3') => "Redirect",
        Some('4') => "Client Error",
        Some('5') => "Server Error",
        _ => "",
    }
}

/// In-body links currently present on the content pages
pub fn content_outlinks_current(content_edges: &[&Edge], content_urls: &HashSet<String>) -> Vec<ContentOutlinkRow> {
    let mut rows: Vec<ContentOutlinkRow> = content_edges
        .iter()
        .filter(|e| e.is_content() && content_urls.contains(&e.from_url))
        .map(|e| ContentOutlinkRow {
            source_url: e.from_url.clone(),
            target_raw: e.to_url_raw.clone(),
            target: e.canonical_target.clone(),
            anchor: e.anchor.clone(),
            link_position: e.position_label.clone(),
            status_code: e.status_code.clone(),
            status: status_label(&e.status_code).to_string(),
        })
        .collect();
    rows.sort_by(|a, b| (&a.source_url, &a.target).cmp(&(&b.source_url, &b.target)));
    rows
}

// ---------------------------------------------------------------------------
// Dashboard tables
// ---------------------------------------------------------------------------

/// Inputs shared by the dashboard tables
pub struct DashboardData<'a> {
    pub taxonomy: &'a Taxonomy,
    /// Internal hyperlinks into core pages (per-core inlink exports, else content outlinks)
    pub inlinks: &'a [&'a Edge],
    /// Internal hyperlinks leaving core pages
    pub outlinks: &'a [&'a Edge],
    pub register: &'a [RedirectInstance],
    pub recommendations: &'a [Recommendation],
    pub blogs: &'a BlogMatcher,
    pub detector: &'a IssueDetector<'a>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorePageSummary {
    pub name: String,
    pub url: String,
    pub instances: usize,
    pub unique_linking_pages: usize,
    pub content_inlinks: usize,
    pub template_inlinks: usize,
    pub blog_content_inlinks: usize,
    pub redirecting_content_inlinks: usize,
    pub top_content_anchor: String,
    pub top_content_anchor_pct: f64,
    pub outbound_tier2: usize,
    pub outbound_other: usize,
    pub redirecting_outlinks: usize,
    pub client_error_outlinks: usize,
    pub cross_scope_outlinks: usize,
    pub fix_actions: usize,
    pub add_actions: usize,
}

impl CorePageSummary {
    pub const HEADERS: [&'static str; 17] = [
        "Core Page Name",
        "Canonical Core Page URL",
        "Inlink Instances",
        "Unique Linking Pages",
        "Inlinks (Link Position=Content)",
        "Inlinks (Template Position)",
        "Blog Inlinks (Link Position=Content)",
        "Redirecting Inlinks (Content)",
        "Top Anchor (Content)",
        "Top Anchor Share % (Content)",
        "Outbound Content Links → Tier-2",
        "Outbound Content Links → Supporting/Other",
        "Redirecting Outlinks (3xx) (All Positions)",
        "4xx Outlinks (All Positions)",
        "Cross-Scope Outlinks (All Positions)",
        "Fix Actions (Count)",
        "Add Actions (Count)",
    ];

    pub fn to_cells(&self) -> Vec<Cell> {
        vec![
            Cell::from(&self.name),
            Cell::from(&self.url),
            Cell::from(self.instances),
            Cell::from(self.unique_linking_pages),
            Cell::from(self.content_inlinks),
            Cell::from(self.template_inlinks),
            Cell::from(self.blog_content_inlinks),
            Cell::from(self.redirecting_content_inlinks),
            Cell::from(&self.top_content_anchor),
            Cell::from(self.top_content_anchor_pct),
            Cell::from(self.outbound_tier2),
            Cell::from(self.outbound_other),
            Cell::from(self.redirecting_outlinks),
            Cell::from(self.client_error_outlinks),
            Cell::from(self.cross_scope_outlinks),
            Cell::from(self.fix_actions),
            Cell::from(self.add_actions),
        ]
    }
}

pub fn core_page_summaries(data: &DashboardData) -> Vec<CorePageSummary> {
    let tier2: HashSet<&str> = data.taxonomy.tier2().map(|t| t.url.as_str()).collect();
    data.taxonomy
        .core_pages()
        .map(|core| {
            let inbound: Vec<&Edge> = data
                .inlinks
                .iter()
                .copied()
                .filter(|e| e.is_internal && e.canonical_target == core.url)
                .collect();
            let content: Vec<&Edge> = inbound.iter().copied().filter(|e| e.is_content()).collect();
            let outbound: Vec<&Edge> = data
                .outlinks
                .iter()
                .copied()
                .filter(|e| e.is_internal && e.from_url == core.url)
                .collect();
            let outbound_content: Vec<&Edge> = outbound.iter().copied().filter(|e| e.is_content()).collect();
            let to_tier2 = outbound_content
                .iter()
                .filter(|e| tier2.contains(e.canonical_target.as_str()))
                .count();
            let (top_content_anchor, share) = top_anchor(&content);

            CorePageSummary {
                name: core.name.clone(),
                url: core.url.clone(),
                instances: inbound.len(),
                unique_linking_pages: inbound.iter().map(|e| e.from_url.as_str()).collect::<BTreeSet<_>>().len(),
                content_inlinks: content.len(),
                template_inlinks: inbound.iter().filter(|e| !e.is_content()).count(),
                blog_content_inlinks: content.iter().filter(|e| data.blogs.is_blog(&e.from_url)).count(),
                redirecting_content_inlinks: data
                    .register
                    .iter()
                    .filter(|r| r.final_url == core.url && LinkPosition::from_label(&r.link_position) == LinkPosition::Content)
                    .count(),
                top_content_anchor,
                top_content_anchor_pct: percent_1dp(share),
                outbound_tier2: to_tier2,
                outbound_other: outbound_content.len() - to_tier2,
                redirecting_outlinks: data.register.iter().filter(|r| r.from_url == core.url).count(),
                client_error_outlinks: outbound.iter().filter(|e| is_client_error_status(&e.status_code)).count(),
                cross_scope_outlinks: outbound
                    .iter()
                    .filter(|e| data.detector.is_cross_scope(&e.canonical_target))
                    .count(),
                fix_actions: data
                    .recommendations
                    .iter()
                    .filter(|r| r.action.is_fix() && r.source_url == core.url)
                    .count(),
                add_actions: data
                    .recommendations
                    .iter()
                    .filter(|r| r.action == Action::AddContextual && r.suggested_target == core.url)
                    .count(),
            }
        })
        .collect()
}

/// One row of the inbound/outbound example tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkExample {
    pub core_name: String,
    pub core_url: String,
    pub other_url: String,
    pub anchor: String,
    pub count: usize,
    pub link_position: String,
}

impl LinkExample {
    pub const INBOUND_HEADERS: [&'static str; 6] = [
        "Core Page",
        "Core Page URL",
        "Linking Page",
        "Example Anchor Text",
        "Count",
        "Link Position",
    ];
    pub const OUTBOUND_HEADERS: [&'static str; 6] = [
        "Core Page",
        "Core Page URL",
        "Linked-To Page",
        "Example Anchor Text",
        "Count",
        "Link Position",
    ];

    pub fn to_cells(&self) -> Vec<Cell> {
        vec![
            Cell::from(&self.core_name),
            Cell::from(&self.core_url),
            Cell::from(&self.other_url),
            Cell::from(&self.anchor),
            Cell::from(self.count),
            Cell::from(&self.link_position),
        ]
    }
}

const EXAMPLES_PER_CORE: usize = 3;

/// Top groups by count, ties broken by key
fn top_groups<'e>(groups: BTreeMap<&'e str, Vec<&'e Edge>>) -> Vec<(&'e str, Vec<&'e Edge>)> {
    let mut ranked: Vec<(&str, Vec<&Edge>)> = groups.into_iter().collect();
    ranked.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(EXAMPLES_PER_CORE);
    ranked
}

/// Top content linking pages for every core page
pub fn inbound_examples(data: &DashboardData) -> Vec<LinkExample> {
    let mut out = Vec::new();
    for core in data.taxonomy.core_pages() {
        let mut groups: BTreeMap<&str, Vec<&Edge>> = BTreeMap::new();
        for edge in data
            .inlinks
            .iter()
            .filter(|e| e.is_internal && e.is_content() && e.canonical_target == core.url)
        {
            groups.entry(edge.from_url.as_str()).or_default().push(*edge);
        }
        for (from, edges) in top_groups(groups) {
            out.push(LinkExample {
                core_name: core.name.clone(),
                core_url: core.url.clone(),
                other_url: from.to_string(),
                anchor: top_anchor(&edges).0,
                count: edges.len(),
                link_position: LinkPosition::Content.as_str().to_string(),
            });
        }
    }
    out
}

/// Most linked-to pages from every core page
pub fn outbound_examples(data: &DashboardData) -> Vec<LinkExample> {
    let mut out = Vec::new();
    for core in data.taxonomy.core_pages() {
        let mut groups: BTreeMap<&str, Vec<&Edge>> = BTreeMap::new();
        for edge in data.outlinks.iter().filter(|e| e.is_internal && e.from_url == core.url) {
            groups.entry(edge.canonical_target.as_str()).or_default().push(*edge);
        }
        for (target, edges) in top_groups(groups) {
            let positions: Vec<String> = edges.iter().map(|e| position_column_label(e)).collect();
            out.push(LinkExample {
                core_name: core.name.clone(),
                core_url: core.url.clone(),
                other_url: target.to_string(),
                anchor: top_anchor(&edges).0,
                count: edges.len(),
                link_position: top_share(positions.iter().map(String::as_str)).0,
            });
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectSpotlight {
    pub to_url: String,
    pub final_url: String,
    pub instances: usize,
}

impl RedirectSpotlight {
    pub const HEADERS: [&'static str; 3] = ["Redirecting Target (To)", "Final URL", "Instances"];
    pub const LIMIT: usize = 15;

    pub fn to_cells(&self) -> Vec<Cell> {
        vec![Cell::from(&self.to_url), Cell::from(&self.final_url), Cell::from(self.instances)]
    }
}

/// Most frequent redirecting targets in the register
pub fn redirect_spotlight(register: &[RedirectInstance]) -> Vec<RedirectSpotlight> {
    let mut counts: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    for row in register {
        *counts.entry((row.to_url.as_str(), row.final_url.as_str())).or_insert(0) += 1;
    }
    let mut rows: Vec<RedirectSpotlight> = counts
        .into_iter()
        .map(|((to_url, final_url), instances)| RedirectSpotlight {
            to_url: to_url.to_string(),
            final_url: final_url.to_string(),
            instances,
        })
        .collect();
    rows.sort_by(|a, b| b.instances.cmp(&a.instances).then_with(|| (&a.to_url, &a.final_url).cmp(&(&b.to_url, &b.final_url))));
    rows.truncate(RedirectSpotlight::LIMIT);
    rows
}

// ---------------------------------------------------------------------------
// Setting / metric tables
// ---------------------------------------------------------------------------

pub const SETTING_HEADERS: [&str; 2] = ["Setting", "Value"];
pub const METRIC_HEADERS: [&str; 2] = ["Metric", "Value"];

pub fn scope_rows(config: &AppConfig, internal_domain: &str) -> Vec<Vec<Cell>> {
    let site = &config.site;
    let scope = if site.scope_prefix.is_empty() {
        "(not set)".to_string()
    } else {
        site.scope_prefix.clone()
    };
    let cross = if site.cross_scope_prefixes.is_empty() {
        "(none)".to_string()
    } else {
        site.cross_scope_prefixes.join(", ")
    };
    [
        ("Type counted", "Hyperlink".to_string()),
        ("Link Position buckets", "Content = Link Position 'Content'; Template = any other label".to_string()),
        ("URL used for reporting", "Canonical Target URL (redirects resolved)".to_string()),
        ("Internal domain", internal_domain.to_string()),
        ("In-scope prefix", scope),
        ("Cross-scope prefixes", cross),
    ]
    .into_iter()
    .map(|(k, v)| vec![Cell::from(k), Cell::from(v)])
    .collect()
}

pub fn executive_kpis(
    core_pages: usize,
    content_pages: usize,
    register: &[RedirectInstance],
    recommendations: &[Recommendation],
) -> Vec<Vec<Cell>> {
    let mut rows = vec![
        vec![Cell::from("Core Pages in scope"), Cell::from(core_pages)],
        vec![Cell::from("Content pages analyzed"), Cell::from(content_pages)],
        vec![Cell::from("Redirecting link instances (3xx)"), Cell::from(register.len())],
    ];
    let mut per_action: BTreeMap<Action, usize> = BTreeMap::new();
    for rec in recommendations.iter().filter(|r| r.action.is_fix()) {
        *per_action.entry(rec.action).or_insert(0) += 1;
    }
    for (action, count) in per_action {
        rows.push(vec![Cell::from(format!("Fix actions: {}", action)), Cell::from(count)]);
    }
    let adds = recommendations.iter().filter(|r| r.action == Action::AddContextual).count();
    rows.push(vec![Cell::from(KPI_DASHBOARD_ADDS), Cell::from(adds)]);
    rows
}

/// Headline counts for the audit workbook
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverviewMetrics {
    pub content_pages: usize,
    pub content_pages_in_export: usize,
    pub content_link_instances: usize,
    pub current_links_to_core: usize,
    pub adds: usize,
    pub fixes: usize,
}

impl OverviewMetrics {
    pub fn compute(
        content_urls: &HashSet<String>,
        content_edges: &[&Edge],
        taxonomy: &Taxonomy,
        recommendations: &[Recommendation],
    ) -> Self {
        let in_body: Vec<&Edge> = content_edges
            .iter()
            .copied()
            .filter(|e| e.is_content() && content_urls.contains(&e.from_url))
            .collect();
        let present: BTreeSet<&str> = content_edges
            .iter()
            .filter(|e| content_urls.contains(&e.from_url))
            .map(|e| e.from_url.as_str())
            .collect();
        Self {
            content_pages: content_urls.len(),
            content_pages_in_export: present.len(),
            content_link_instances: in_body.len(),
            current_links_to_core: in_body
                .iter()
                .filter(|e| matches!(taxonomy.tier_of(&e.canonical_target), Some(Tier::Tier1 | Tier::Tier2)))
                .count(),
            adds: recommendations.iter().filter(|r| r.action == Action::AddContextual).count(),
            fixes: recommendations.iter().filter(|r| r.action.is_fix()).count(),
        }
    }

    pub fn to_rows(&self) -> Vec<Vec<Cell>> {
        [
            ("Content pages (provided list)", self.content_pages),
            ("Content pages present in outlinks export", self.content_pages_in_export),
            ("Content-link instances on content pages", self.content_link_instances),
            ("Current content links to Tier-1/2", self.current_links_to_core),
            (KPI_ADDS, self.adds),
            (KPI_FIXES, self.fixes),
        ]
        .into_iter()
        .map(|(k, v)| vec![Cell::from(k), Cell::from(v)])
        .collect()
    }
}
