//! FIX and ADD recommendation generation.
//!
//! FIX rows come straight from issues. ADD rows follow a missing-only policy: each content
//! page gets at most one new in-body link, routed to a Tier-1/Tier-2 target, and only when
//! the page does not already (or will not, after FIXes) link there in its content area.

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::config::{AddRuleConfig, AppConfig};
use crate::curl_map::CurlMap;
use crate::edges::{Edge, LinkPosition};
use crate::ingest::Record;
use crate::issues::{Issue, IssueDetector, IssueType};
use crate::taxonomy::{infer_cluster_from_slug, ContentPage, Target, Taxonomy};
use crate::url_utils::url_path;

pub const ADD_REASON: &str = "Add 1 intentional in-body link (missing-only policy)";
pub const ADD_PLACEMENT_NOTE: &str =
    "Place in-body within the first ~25% of the main narrative; avoid nav/footer modules.";
pub const QA_DEST_404: &str = " [QA: final destination is 404]";
pub const QA_CROSS_SCOPE: &str = " [QA FAIL: Cross-scope target]";
pub const QA_RULE_MAPPING: &str = " [QA FAIL: Rule mapping]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    FixRedirect,
    ReplaceUrl,
    RemoveOrReplace,
    AddContextual,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::FixRedirect => "FIX_REDIRECT",
            Action::ReplaceUrl => "REPLACE_URL",
            Action::RemoveOrReplace => "REMOVE_OR_REPLACE",
            Action::AddContextual => "ADD_CONTEXTUAL",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_uppercase().as_str() {
            "FIX_REDIRECT" => Some(Action::FixRedirect),
            "REPLACE_URL" => Some(Action::ReplaceUrl),
            "REMOVE_OR_REPLACE" => Some(Action::RemoveOrReplace),
            "ADD_CONTEXTUAL" => Some(Action::AddContextual),
            _ => None,
        }
    }

    pub fn is_fix(&self) -> bool {
        *self != Action::AddContextual
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "high" => Priority::High,
            "medium" => Priority::Medium,
            _ => Priority::Low,
        }
    }
}

/// One row of the implementation list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recommendation {
    pub action: Action,
    pub source_url: String,
    pub current_target: String,
    pub suggested_target: String,
    pub anchor: String,
    pub link_position: String,
    pub priority: Priority,
    pub reason: String,
    /// QA annotations and placement guidance; workbook only
    pub notes: String,
    pub curl_status: String,
    pub curl_effective: String,
}

impl Recommendation {
    pub const CSV_HEADERS: [&'static str; 8] = [
        "Action",
        "Source URL",
        "Current Target URL",
        "Suggested Target URL",
        "Suggested Anchor Text",
        "Link Position",
        "Priority",
        "Reason",
    ];

    pub const SHEET_EXTRA_HEADERS: [&'static str; 3] = ["Notes", "Curl Final Status", "Curl Effective URL"];

    pub fn sheet_headers() -> Vec<String> {
        Self::CSV_HEADERS
            .iter()
            .chain(Self::SHEET_EXTRA_HEADERS.iter())
            .map(|h| h.to_string())
            .collect()
    }

    pub fn to_csv_row(&self) -> Vec<String> {
        vec![
            self.action.as_str().to_string(),
            self.source_url.clone(),
            self.current_target.clone(),
            self.suggested_target.clone(),
            self.anchor.clone(),
            self.link_position.clone(),
            self.priority.as_str().to_string(),
            self.reason.clone(),
        ]
    }

    pub fn to_sheet_row(&self) -> Vec<String> {
        let mut row = self.to_csv_row();
        row.extend([self.notes.clone(), self.curl_status.clone(), self.curl_effective.clone()]);
        row
    }

    /// Rebuild from a CSV or sheet record; `None` for unknown actions
    pub fn from_record(record: &Record) -> Option<Self> {
        let action = Action::from_label(record.get("Action"))?;
        Some(Self {
            action,
            source_url: record.get_trimmed("Source URL").to_string(),
            current_target: record.get_trimmed("Current Target URL").to_string(),
            suggested_target: record.get_trimmed("Suggested Target URL").to_string(),
            anchor: record.get_trimmed("Suggested Anchor Text").to_string(),
            link_position: record.get_trimmed("Link Position").to_string(),
            priority: Priority::from_label(record.get("Priority")),
            reason: record.get_trimmed("Reason").to_string(),
            notes: record.get("Notes").to_string(),
            curl_status: record.get_trimmed("Curl Final Status").to_string(),
            curl_effective: record.get_trimmed("Curl Effective URL").to_string(),
        })
    }

    pub fn position(&self) -> LinkPosition {
        LinkPosition::from_label(&self.link_position)
    }

    pub fn append_note(&mut self, note: &str) {
        if !self.notes.contains(note.trim()) {
            self.notes.push_str(note);
        }
    }

    /// Uniqueness key of the CSV
    pub fn csv_key(&self) -> (Action, String, String, String, String, String) {
        (
            self.action,
            self.source_url.clone(),
            self.current_target.clone(),
            self.suggested_target.clone(),
            self.link_position.clone(),
            self.reason.clone(),
        )
    }
}

pub fn fix_action_for(issue: &Issue) -> Option<Action> {
    let has_suggestion = !issue.suggested_target.is_empty();
    match issue.issue_type {
        IssueType::InternalRedirectTarget => Some(Action::FixRedirect),
        IssueType::Internal4xxTarget | IssueType::Non200Target => Some(if has_suggestion {
            Action::ReplaceUrl
        } else {
            Action::RemoveOrReplace
        }),
        IssueType::CrossScopeLink => Some(Action::ReplaceUrl),
        IssueType::PlaceholderUrl | IssueType::MalformedUrl => Some(Action::RemoveOrReplace),
        IssueType::RedirectToHub | IssueType::BlogSource404 | IssueType::BlogSourceMissingFromExport => None,
    }
}

pub fn priority_for(issue_type: IssueType, position: LinkPosition) -> Priority {
    let status_issue = matches!(
        issue_type,
        IssueType::InternalRedirectTarget | IssueType::Internal4xxTarget
    );
    if status_issue && position == LinkPosition::Content {
        Priority::High
    } else if issue_type == IssueType::CrossScopeLink || position == LinkPosition::Template {
        Priority::Medium
    } else {
        Priority::Low
    }
}

/// One FIX per distinct (source, current target, action, position); first issue wins
pub fn build_fix_recommendations(issues: &[Issue]) -> Vec<Recommendation> {
    let mut seen = HashSet::new();
    let mut fixes = Vec::new();
    for issue in issues {
        let Some(action) = fix_action_for(issue) else {
            continue;
        };
        let key = (
            issue.source_url.clone(),
            issue.current_target.clone(),
            action,
            issue.link_position.clone(),
        );
        if !seen.insert(key) {
            continue;
        }
        let position = LinkPosition::from_label(&issue.link_position);
        fixes.push(Recommendation {
            action,
            source_url: issue.source_url.clone(),
            current_target: issue.current_target.clone(),
            suggested_target: issue.suggested_target.clone(),
            anchor: issue.anchor.clone(),
            link_position: issue.link_position.clone(),
            priority: priority_for(issue.issue_type, position),
            reason: format!("{}: {}", issue.issue_type, issue.notes).trim().to_string(),
            notes: String::new(),
            curl_status: String::new(),
            curl_effective: String::new(),
        });
    }
    fixes
}

/// FIX_REDIRECT suggestions must land on a 200 when a curl map is available
pub fn validate_fixes(fixes: &mut [Recommendation], curl: &CurlMap) {
    if curl.is_empty() {
        return;
    }
    for fix in fixes.iter_mut().filter(|f| f.action == Action::FixRedirect) {
        if fix.suggested_target.is_empty() {
            continue;
        }
        match curl.status(&fix.suggested_target) {
            Some(200) => {}
            Some(status) if (400..500).contains(&status) => {
                fix.action = Action::RemoveOrReplace;
                fix.append_note(QA_DEST_404);
            }
            Some(status) => {
                fix.suggested_target.clear();
                fix.append_note(&format!(" [QA: final destination returned {}]", status));
            }
            None => {
                fix.suggested_target.clear();
                fix.append_note(" [QA: final destination not probed]");
            }
        }
    }
}

/// Why a content page was routed to its target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub target: String,
    pub basis: String,
}

struct CompiledRule {
    config: AddRuleConfig,
    pattern: Regex,
}

/// Deterministic content page -> target routing
pub struct AddRouter<'a> {
    config: &'a AppConfig,
    taxonomy: &'a Taxonomy,
    rules: Vec<CompiledRule>,
    fallback_cluster: String,
}

impl<'a> AddRouter<'a> {
    pub fn new(config: &'a AppConfig, taxonomy: &'a Taxonomy, pages: &[ContentPage]) -> Result<Self> {
        let rules = config
            .add_rules
            .iter()
            .map(|rule| {
                let pattern = RegexBuilder::new(&rule.pattern)
                    .case_insensitive(true)
                    .build()
                    .with_context(|| format!("Invalid add rule '{}'", rule.name))?;
                Ok(CompiledRule {
                    config: rule.clone(),
                    pattern,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let fallback_cluster = Self::pick_fallback_cluster(config, taxonomy, pages);
        Ok(Self {
            config,
            taxonomy,
            rules,
            fallback_cluster,
        })
    }

    /// Configured default cluster when it has a Tier-1, else the cluster most content pages infer to
    fn pick_fallback_cluster(config: &AppConfig, taxonomy: &Taxonomy, pages: &[ContentPage]) -> String {
        let default = &config.taxonomy.default_cluster;
        if taxonomy.tier1_for_cluster(default).is_some() {
            return default.clone();
        }
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for page in pages {
            if let Some(cid) = infer_cluster_from_slug(&page.url, &config.taxonomy.slug_cluster_keywords) {
                if taxonomy.tier1_for_cluster(&cid).is_some() {
                    *counts.entry(cid).or_insert(0) += 1;
                }
            }
        }
        let mut best: Option<(String, usize)> = None;
        for (cid, count) in counts {
            if best.as_ref().map(|(_, c)| count > *c).unwrap_or(true) {
                best = Some((cid, count));
            }
        }
        best.map(|(cid, _)| cid)
            .or_else(|| taxonomy.core_pages().next().map(|t| t.cluster_id.clone()))
            .unwrap_or_default()
    }

    pub fn fallback_cluster(&self) -> &str {
        &self.fallback_cluster
    }

    /// First rule whose pattern matches the lowercased source path
    pub fn matching_rule(&self, source_url: &str) -> Option<&AddRuleConfig> {
        let path = url_path(source_url).to_lowercase();
        self.rules
            .iter()
            .find(|r| r.pattern.is_match(&path))
            .map(|r| &r.config)
    }

    fn rule_tier2(&self, rule: &AddRuleConfig) -> Option<&'a Target> {
        self.taxonomy
            .tier2()
            .find(|t| t.parent_cluster_id == rule.cluster && satisfies_rule(rule, t))
    }

    /// Target URL satisfies the rule's Tier-2 constraints
    pub fn target_satisfies(&self, rule: &AddRuleConfig, target_url: &str) -> bool {
        self.taxonomy
            .get(target_url)
            .map(|t| t.parent_cluster_id == rule.cluster && satisfies_rule(rule, t))
            .unwrap_or(false)
    }

    fn tier1_url(&self, cluster_id: &str) -> Option<String> {
        self.taxonomy.tier1_for_cluster(cluster_id).map(|t| t.url.clone())
    }

    pub fn route(&self, page: &ContentPage) -> Option<Route> {
        if let Some(rule) = self.matching_rule(&page.url) {
            let target = self
                .rule_tier2(rule)
                .map(|t| t.url.clone())
                .or_else(|| self.tier1_url(&rule.cluster));
            if let Some(target) = target {
                return Some(Route {
                    target,
                    basis: format!("rule:{}", rule.name),
                });
            }
        }

        let slug_cluster = infer_cluster_from_slug(&page.url, &self.config.taxonomy.slug_cluster_keywords);
        let page_cluster = if page.cluster_id.is_empty() {
            slug_cluster.clone().unwrap_or_default()
        } else {
            page.cluster_id.clone()
        };

        if !page.intent_tag.is_empty() && !page_cluster.is_empty() {
            let tag = page.intent_tag.as_str();
            if let Some(t) = self
                .taxonomy
                .tier2_for_parent(&page_cluster)
                .find(|t| url_path(&t.url).to_lowercase().contains(tag))
            {
                return Some(Route {
                    target: t.url.clone(),
                    basis: format!("intent:{}", tag),
                });
            }
        }

        let candidates = [
            (page.cluster_id.clone(), "cluster"),
            (slug_cluster.unwrap_or_default(), "slug"),
            (self.fallback_cluster.clone(), "default"),
        ];
        candidates.iter().find_map(|(cid, basis)| {
            self.tier1_url(cid).map(|target| Route {
                target,
                basis: format!("{}:{}", basis, cid),
            })
        })
    }
}

fn satisfies_rule(rule: &AddRuleConfig, target: &Target) -> bool {
    let url_ok = rule.url_contains.is_empty()
        || contains_path_token(&url_path(&target.url).to_lowercase(), &rule.url_contains.to_lowercase());
    let h1_ok = rule.h1_contains.is_empty()
        || target.h1.to_lowercase().contains(&rule.h1_contains.to_lowercase());
    url_ok && h1_ok
}

fn is_path_separator(c: char) -> bool {
    matches!(c, '/' | '-' | '_')
}

/// `needle` occurs in `path` starting and ending on a `/`, `-` or `_` boundary, so
/// `contested-divorce` does not match inside `uncontested-divorce`.
pub fn contains_path_token(path: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    let open = needle.starts_with(is_path_separator);
    let close = needle.ends_with(is_path_separator);
    path.match_indices(needle).any(|(start, _)| {
        let end = start + needle.len();
        let left = open || path[..start].chars().next_back().map_or(true, is_path_separator);
        let right = close || path[end..].chars().next().map_or(true, is_path_separator);
        left && right
    })
}

/// Canonical targets each source currently links to from its content area
pub fn current_content_targets(edges: &[&Edge]) -> HashMap<String, HashSet<String>> {
    let mut map: HashMap<String, HashSet<String>> = HashMap::new();
    for edge in edges.iter().filter(|e| e.is_content() && !e.canonical_target.is_empty()) {
        map.entry(edge.from_url.clone())
            .or_default()
            .insert(edge.canonical_target.clone());
    }
    map
}

/// Current content targets plus Content-position FIX suggestions, per source
pub fn future_targets(
    content_edges: &[&Edge],
    fixes: &[Recommendation],
) -> HashMap<String, HashSet<String>> {
    let mut map = current_content_targets(content_edges);
    for fix in fixes
        .iter()
        .filter(|f| f.position() == LinkPosition::Content && !f.suggested_target.is_empty())
    {
        map.entry(fix.source_url.clone())
            .or_default()
            .insert(fix.suggested_target.clone());
    }
    map
}

/// At most one ADD per content page, never to a target the page already (or will) link to
pub fn build_add_recommendations(
    pages: &[ContentPage],
    router: &AddRouter,
    future: &HashMap<String, HashSet<String>>,
    curl: &CurlMap,
) -> Vec<Recommendation> {
    let empty = HashSet::new();
    pages
        .iter()
        .filter(|page| !curl.is_not_found(&page.url))
        .filter_map(|page| {
            let route = router.route(page)?;
            let existing = future.get(&page.url).unwrap_or(&empty);
            if route.target == page.url || existing.contains(&route.target) {
                return None;
            }
            Some(Recommendation {
                action: Action::AddContextual,
                source_url: page.url.clone(),
                current_target: String::new(),
                suggested_target: route.target,
                anchor: String::new(),
                link_position: LinkPosition::Content.as_str().to_string(),
                priority: Priority::High,
                reason: ADD_REASON.to_string(),
                notes: format!("{} Route: {}", ADD_PLACEMENT_NOTE, route.basis),
                curl_status: String::new(),
                curl_effective: String::new(),
            })
        })
        .collect()
}

/// Curl Final Status / Curl Effective URL for the suggested target, else the current target
pub fn attach_curl_columns(rec: &mut Recommendation, curl: &CurlMap) {
    let key = if rec.suggested_target.is_empty() {
        &rec.current_target
    } else {
        &rec.suggested_target
    };
    match curl.get(key) {
        Some(entry) => {
            rec.curl_status = entry.final_status.to_string();
            rec.curl_effective = entry.effective_url.clone();
        }
        None => {
            rec.curl_status.clear();
            rec.curl_effective.clear();
        }
    }
}

/// Guardrails over the combined implementation list
pub fn final_qa(recs: &mut Vec<Recommendation>, curl: &CurlMap, detector: &IssueDetector, router: &AddRouter) {
    recs.retain(|r| !(r.action == Action::AddContextual && curl.is_not_found(&r.source_url)));

    for rec in recs.iter_mut() {
        let routed_target = rec.suggested_target.clone();
        if !rec.suggested_target.is_empty() {
            if let Some(entry) = curl.get(&rec.suggested_target) {
                if matches!(entry.final_status, 301 | 302) && !entry.effective_url.is_empty() {
                    rec.suggested_target = entry.effective_url.clone();
                }
            }
        }
        if detector.is_cross_scope(&rec.suggested_target) {
            rec.append_note(QA_CROSS_SCOPE);
        }
        if rec.action == Action::AddContextual {
            if let Some(rule) = router.matching_rule(&rec.source_url) {
                // checked against the routed taxonomy URL, not its 301/302 destination
                if !router.target_satisfies(rule, &routed_target) {
                    rec.append_note(QA_RULE_MAPPING);
                }
            }
        }
        attach_curl_columns(rec, curl);
    }
}

/// Drop rows repeating an earlier row's CSV key
pub fn dedup_recommendations(recs: Vec<Recommendation>) -> Vec<Recommendation> {
    let mut seen = HashSet::new();
    recs.into_iter().filter(|r| seen.insert(r.csv_key())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edges::EdgeNormalizer;
    use crate::ingest::read_delimited_table;
    use crate::redirects::RedirectMap;
    use crate::url_utils::Canonicalizer;

    const CORE: &str = "URL,Cluster ID,Type,H1\n\
        https://x/wisconsin/divorce/,DIV,core,Wisconsin Divorce\n\
        https://x/wisconsin/divorce/contested-divorce/,DIV,subservice,Contested Divorce\n\
        https://x/wisconsin/divorce/uncontested-divorce/,DIV,subservice,Uncontested Divorce\n\
        https://x/wisconsin/child-custody/,CH-CUS,core,Wisconsin Child Custody\n\
        https://x/wisconsin/child-custody/visitation-rights/,CH-CUS,subservice,Visitation Rights\n";

    fn setup() -> (AppConfig, Canonicalizer, Taxonomy) {
        let config = AppConfig::embedded_default().unwrap();
        let canon = Canonicalizer::new("x");
        let table = read_delimited_table("core.csv", CORE.as_bytes(), b',').unwrap();
        let taxonomy = Taxonomy::load(table, &canon, &config).unwrap();
        (config, canon, taxonomy)
    }

    fn page(url: &str) -> ContentPage {
        ContentPage {
            url: url.to_string(),
            cluster_id: String::new(),
            intent_tag: String::new(),
        }
    }

    fn issue(issue_type: IssueType, suggested: &str, position: &str) -> Issue {
        Issue {
            issue_type,
            source_type: "Content outlink".into(),
            source_url: "https://x/a/".into(),
            target_raw: "https://x/b".into(),
            current_target: "https://x/b/".into(),
            suggested_target: suggested.into(),
            anchor: "b".into(),
            link_position: position.into(),
            status_code: "301".into(),
            notes: "n".into(),
        }
    }

    #[test]
    fn test_fix_actions_and_priorities() {
        let fixes = build_fix_recommendations(&[
            issue(IssueType::InternalRedirectTarget, "https://x/b-final/", "Content"),
            issue(IssueType::Internal4xxTarget, "", "Navigation"),
            issue(IssueType::CrossScopeLink, "https://x/wisconsin/", "Content"),
            issue(IssueType::RedirectToHub, "", "Content"),
        ]);
        let summary: Vec<(Action, Priority)> = fixes.iter().map(|f| (f.action, f.priority)).collect();
        assert_eq!(
            summary,
            vec![
                (Action::FixRedirect, Priority::High),
                (Action::RemoveOrReplace, Priority::Medium),
                (Action::ReplaceUrl, Priority::Medium),
            ]
        );
        assert!(fixes[0].reason.starts_with("INTERNAL_REDIRECT_TARGET"));
    }

    #[test]
    fn test_fix_dedup_on_source_target_action_position() {
        let fixes = build_fix_recommendations(&[
            issue(IssueType::PlaceholderUrl, "", "Content"),
            issue(IssueType::Internal4xxTarget, "", "Content"),
        ]);
        assert_eq!(fixes.len(), 1);
        assert!(fixes[0].reason.starts_with("PLACEHOLDER_URL"));
    }

    #[test]
    fn test_redirect_fix_to_404_is_reclassified() {
        let canon = Canonicalizer::new("x");
        let curl = CurlMap::from_rows(
            &[
                vec!["https://x/dead/".into(), "404".into(), "https://x/dead/".into()],
                vec!["https://x/ok/".into(), "200".into(), "https://x/ok/".into()],
            ],
            &canon,
        );
        let mut fixes = build_fix_recommendations(&[
            issue(IssueType::InternalRedirectTarget, "https://x/dead/", "Content"),
            Issue {
                source_url: "https://x/c/".into(),
                ..issue(IssueType::InternalRedirectTarget, "https://x/ok/", "Content")
            },
            Issue {
                source_url: "https://x/d/".into(),
                ..issue(IssueType::InternalRedirectTarget, "https://x/unprobed/", "Content")
            },
        ]);
        validate_fixes(&mut fixes, &curl);
        assert_eq!(fixes[0].action, Action::RemoveOrReplace);
        assert!(fixes[0].notes.contains("[QA: final destination is 404]"));
        assert_eq!(fixes[1].suggested_target, "https://x/ok/");
        assert_eq!(fixes[2].suggested_target, "");
    }

    #[test]
    fn test_router_rule_order_and_fallbacks() {
        let (config, _, taxonomy) = setup();
        let pages = vec![page("https://x/wisconsin/blog/uncontested-divorce-steps/")];
        let router = AddRouter::new(&config, &taxonomy, &pages).unwrap();

        let r = router.route(&pages[0]).unwrap();
        assert_eq!(r.target, "https://x/wisconsin/divorce/uncontested-divorce/");
        assert_eq!(r.basis, "rule:uncontested");

        let r = router.route(&page("https://x/wisconsin/blog/contested-hearing/")).unwrap();
        assert_eq!(r.target, "https://x/wisconsin/divorce/contested-divorce/");

        let r = router.route(&page("https://x/wisconsin/blog/supervised-visitation/")).unwrap();
        assert_eq!(r.target, "https://x/wisconsin/child-custody/visitation-rights/");

        let r = router.route(&page("https://x/wisconsin/blog/custody-basics/")).unwrap();
        assert_eq!(r.target, "https://x/wisconsin/child-custody/");
        assert_eq!(r.basis, "slug:CH-CUS");

        let r = router.route(&page("https://x/wisconsin/blog/court-fees/")).unwrap();
        assert_eq!(r.target, "https://x/wisconsin/divorce/");
        assert_eq!(r.basis, "default:DIV");
    }

    #[test]
    fn test_contested_rule_skips_uncontested_page_listed_first() {
        let config = AppConfig::embedded_default().unwrap();
        let canon = Canonicalizer::new("x");
        let core = "URL,Cluster ID,Type,H1\n\
            https://x/wisconsin/divorce/,DIV,core,Wisconsin Divorce\n\
            https://x/wisconsin/divorce/uncontested-divorce/,DIV,subservice,Uncontested Divorce\n\
            https://x/wisconsin/divorce/contested-divorce/,DIV,subservice,Contested Divorce\n";
        let table = read_delimited_table("core.csv", core.as_bytes(), b',').unwrap();
        let taxonomy = Taxonomy::load(table, &canon, &config).unwrap();
        let router = AddRouter::new(&config, &taxonomy, &[]).unwrap();

        let r = router.route(&page("https://x/wisconsin/blog/contested-hearing/")).unwrap();
        assert_eq!(r.target, "https://x/wisconsin/divorce/contested-divorce/");
        assert_eq!(r.basis, "rule:contested");

        let r = router.route(&page("https://x/wisconsin/blog/uncontested-divorce-steps/")).unwrap();
        assert_eq!(r.target, "https://x/wisconsin/divorce/uncontested-divorce/");

        let contested = router.matching_rule("https://x/wisconsin/blog/contested-hearing/").unwrap();
        assert!(!router.target_satisfies(contested, "https://x/wisconsin/divorce/uncontested-divorce/"));
    }

    #[test]
    fn test_path_token_boundaries() {
        assert!(contains_path_token("/wisconsin/divorce/contested-divorce/", "contested-divorce"));
        assert!(!contains_path_token("/wisconsin/divorce/uncontested-divorce/", "contested-divorce"));
        assert!(!contains_path_token("/wisconsin/divorce/uncontested-divorce/", "/contested-divorce/"));
        assert!(contains_path_token("/wisconsin/child-custody/modify-orders/", "/modify"));
        assert!(!contains_path_token("/wisconsin/child-custody/modifying/", "/modify"));
        assert!(contains_path_token("/a/", ""));
    }

    #[test]
    fn test_missing_only_add_policy() {
        let (config, canon, taxonomy) = setup();
        let redirects = RedirectMap::default();
        let links = read_delimited_table(
            "blog.csv",
            "Type,From,To,Anchor Text,Status Code,Link Position\n\
             Hyperlink,https://x/wisconsin/blog/court-fees/,https://x/wisconsin/divorce/,divorce,200,Content\n"
                .as_bytes(),
            b',',
        )
        .unwrap();
        let edges = EdgeNormalizer::new(&canon, &redirects, "/wisconsin/").normalize_hyperlinks(&links, "");
        let refs: Vec<&Edge> = edges.iter().collect();

        let pages = vec![
            page("https://x/wisconsin/blog/court-fees/"),
            page("https://x/wisconsin/blog/custody-basics/"),
        ];
        let router = AddRouter::new(&config, &taxonomy, &pages).unwrap();
        let future = future_targets(&refs, &[]);
        let adds = build_add_recommendations(&pages, &router, &future, &CurlMap::default());
        assert_eq!(adds.len(), 1);
        assert_eq!(adds[0].source_url, "https://x/wisconsin/blog/custody-basics/");
        assert_eq!(adds[0].reason, ADD_REASON);
        assert_eq!(adds[0].priority, Priority::High);
    }

    #[test]
    fn test_future_targets_include_content_fix_suggestions() {
        let fix = Recommendation {
            action: Action::FixRedirect,
            source_url: "https://x/s/".into(),
            current_target: "https://x/old/".into(),
            suggested_target: "https://x/new/".into(),
            anchor: String::new(),
            link_position: "Content".into(),
            priority: Priority::High,
            reason: String::new(),
            notes: String::new(),
            curl_status: String::new(),
            curl_effective: String::new(),
        };
        let future = future_targets(&[], &[fix]);
        assert!(future["https://x/s/"].contains("https://x/new/"));
    }

    #[test]
    fn test_final_qa_swaps_redirects_and_flags() {
        let (config, canon, taxonomy) = setup();
        let redirects = RedirectMap::default();
        let curl = CurlMap::from_rows(
            &[
                vec!["https://x/wisconsin/divorce/contested-divorce/".into(), "301".into(), "https://x/wisconsin/divorce/contested/".into()],
                vec!["https://x/wisconsin/blog/gone/".into(), "404".into(), String::new()],
            ],
            &canon,
        );
        let detector = IssueDetector::new(&config, &canon, &taxonomy, &redirects, &curl).unwrap();
        let pages: Vec<ContentPage> = Vec::new();
        let router = AddRouter::new(&config, &taxonomy, &pages).unwrap();

        let add = |source: &str, target: &str| Recommendation {
            action: Action::AddContextual,
            source_url: source.into(),
            current_target: String::new(),
            suggested_target: target.into(),
            anchor: String::new(),
            link_position: "Content".into(),
            priority: Priority::High,
            reason: ADD_REASON.into(),
            notes: String::new(),
            curl_status: String::new(),
            curl_effective: String::new(),
        };
        let mut recs = vec![
            add("https://x/wisconsin/blog/gone/", "https://x/wisconsin/divorce/"),
            add("https://x/wisconsin/blog/contested-a/", "https://x/wisconsin/divorce/contested-divorce/"),
            add("https://x/wisconsin/blog/uncontested-b/", "https://x/illinois/divorce/"),
        ];
        final_qa(&mut recs, &curl, &detector, &router);

        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].suggested_target, "https://x/wisconsin/divorce/contested/");
        assert_eq!(recs[0].curl_status, "");
        assert!(!recs[0].notes.contains("[QA FAIL: Rule mapping]"));
        assert!(recs[1].notes.contains("[QA FAIL: Cross-scope target]"));
        assert!(recs[1].notes.contains("[QA FAIL: Rule mapping]"));
    }
}
