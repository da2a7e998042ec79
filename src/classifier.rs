//! URL bucket classification.
//!
//! Precedence is user rules, then the metadata `Type` column, then built-in lexicon
//! heuristics. Anything left over is `Unclassified` and produces a warning record.

use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::ingest::Table;
use crate::url_utils::Canonicalizer;

pub const UNCLASSIFIED: &str = "Unclassified";
pub const LOCATION: &str = "Location";
pub const SERVICE: &str = "Service";
pub const SUPPORTING: &str = "Supporting";

pub const WARN_INVALID_RULE: &str = "invalid_custom_rule";
pub const WARN_TYPE_CONFLICT: &str = "type_conflict";
pub const WARN_MISSING_TYPE: &str = "missing_type_filled";
pub const WARN_UNCLASSIFIED: &str = "unclassified_url";

const LOCATION_TERMS: [&str; 14] = [
    "location", "locations", "branch", "office", "near me", "city", "county", "wi", "il", "ca",
    "fl", "ny", "tx", "loan office",
];

const SUPPORTING_TERMS: [&str; 14] = [
    "about", "resource", "resources", "careers", "history", "community", "charitable",
    "calculator", "calculators", "contact", "learn", "demo", "faq", "guides",
];

const SERVICE_TERMS: [&str; 14] = [
    "service", "services", "banking", "lending", "loan", "checking", "savings", "credit card",
    "mortgage", "cash management", "commercial", "business", "personal", "practice area",
];

/// Ten-field validation record shared by every classifier warning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub severity: String,
    pub issue_type: String,
    pub bucket: String,
    pub url: String,
    pub source_file: String,
    pub field: String,
    pub detected_value: String,
    pub expected_rule: String,
    pub message: String,
    pub suggested_fix: String,
}

impl ValidationIssue {
    pub const HEADERS: [&'static str; 10] = [
        "Severity",
        "Issue Type",
        "Bucket",
        "URL",
        "Source File",
        "Field",
        "Detected Value",
        "Expected Rule",
        "Message",
        "Suggested Fix",
    ];

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.severity.clone(),
            self.issue_type.clone(),
            self.bucket.clone(),
            self.url.clone(),
            self.source_file.clone(),
            self.field.clone(),
            self.detected_value.clone(),
            self.expected_rule.clone(),
            self.message.clone(),
            self.suggested_fix.clone(),
        ]
    }

    #[allow(clippy::too_many_arguments)]
    fn warning(
        issue_type: &str,
        bucket: &str,
        url: &str,
        source_file: &str,
        field: &str,
        detected_value: &str,
        expected_rule: &str,
        message: &str,
        suggested_fix: &str,
    ) -> Self {
        Self {
            severity: "warning".to_string(),
            issue_type: issue_type.to_string(),
            bucket: bucket.to_string(),
            url: url.to_string(),
            source_file: source_file.to_string(),
            field: field.to_string(),
            detected_value: detected_value.to_string(),
            expected_rule: expected_rule.to_string(),
            message: message.to_string(),
            suggested_fix: suggested_fix.to_string(),
        }
    }
}

/// One parsed `BucketName: key=value; ...` rule
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketRule {
    pub name: String,
    pub url_contains: Vec<String>,
    pub title_contains: Vec<String>,
    pub meta_contains: Vec<String>,
    pub h1_contains: Vec<String>,
    pub exclude: Vec<String>,
}

fn split_terms(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn clean_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Substring match, except one- and two-letter terms must stand alone as a token
fn contains_term(text: &str, term: &str) -> bool {
    if term.chars().count() <= 2 {
        text.split(|c: char| !c.is_alphanumeric()).any(|tok| tok == term)
    } else {
        text.contains(term)
    }
}

fn hits(text: &str, terms: &[impl AsRef<str>]) -> usize {
    terms.iter().filter(|t| contains_term(text, t.as_ref())).count()
}

impl BucketRule {
    /// Every non-empty condition list needs a hit, and no exclude term may appear anywhere
    pub fn matches(&self, page: &PageText) -> bool {
        let combined = [page.url.as_str(), &page.title, &page.meta, &page.h1].join(" | ");
        if self.exclude.iter().any(|ex| contains_term(&combined, ex)) {
            return false;
        }
        let checks = [
            (&self.url_contains, &page.url),
            (&self.title_contains, &page.title),
            (&self.meta_contains, &page.meta),
            (&self.h1_contains, &page.h1),
        ];
        let mut any_condition = false;
        for (terms, field) in checks {
            if terms.is_empty() {
                continue;
            }
            any_condition = true;
            if hits(field, terms) == 0 {
                return false;
            }
        }
        any_condition
    }
}

/// Parse the rule DSL. Blank lines and `#` comments are skipped; lines without `:`
/// become `invalid_custom_rule` warnings.
pub fn parse_rules(text: &str) -> (Vec<BucketRule>, Vec<ValidationIssue>) {
    let mut rules = Vec::new();
    let mut issues = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }
        let Some((bucket, body)) = stripped.split_once(':') else {
            issues.push(ValidationIssue::warning(
                WARN_INVALID_RULE,
                "",
                "",
                "custom_rules",
                &format!("line_{}", idx + 1),
                stripped,
                "BucketName: key=value; key=value",
                "Skipping malformed custom rule (missing ':').",
                "Use format: BucketName: url_contains=a,b; title_contains=c",
            ));
            continue;
        };

        let bucket = bucket.trim();
        if bucket.is_empty() {
            continue;
        }
        let mut rule = BucketRule {
            name: bucket.to_string(),
            ..Default::default()
        };
        for chunk in body.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            let Some((key, value)) = chunk.split_once('=') else {
                continue;
            };
            let terms = split_terms(value);
            match key.trim().to_lowercase().as_str() {
                "url_contains" => rule.url_contains = terms,
                "title_contains" => rule.title_contains = terms,
                "meta_contains" => rule.meta_contains = terms,
                "h1_contains" => rule.h1_contains = terms,
                "exclude" => rule.exclude = terms,
                _ => {}
            }
        }
        rules.push(rule);
    }
    (rules, issues)
}

pub fn load_rules(path: &Path) -> Result<(Vec<BucketRule>, Vec<ValidationIssue>)> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read bucket rules: {}", path.display()))?;
    Ok(parse_rules(&text))
}

/// Lowercased, whitespace-collapsed text fields of one page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageText {
    pub url: String,
    pub title: String,
    pub meta: String,
    pub h1: String,
}

impl PageText {
    pub fn new(url: &str, title: &str, meta: &str, h1: &str) -> Self {
        Self {
            url: clean_text(url),
            title: clean_text(title),
            meta: clean_text(meta),
            h1: clean_text(h1),
        }
    }
}

/// Page metadata from a crawl export
#[derive(Debug, Clone, Default)]
pub struct PageMeta {
    pub title: String,
    pub meta: String,
    pub h1: String,
    pub provided_type: String,
}

/// Read a metadata export keyed by canonical URL; the first row per URL wins
pub fn load_metadata(table: &Table, canon: &Canonicalizer) -> HashMap<String, PageMeta> {
    let url_col = table.find_column(&["URL", "Address", "URLs"]);
    let mut out = HashMap::new();
    let Some(url_col) = url_col else {
        return out;
    };
    for record in table.records() {
        let url = canon.canonical(record.at(url_col));
        if url.is_empty() || out.contains_key(&url) {
            continue;
        }
        out.insert(
            url,
            PageMeta {
                title: record.get_trimmed("Title 1").to_string(),
                meta: record.get_trimmed("Meta Description 1").to_string(),
                h1: record.get_trimmed("H1-1").to_string(),
                provided_type: record.get_trimmed("Type").to_string(),
            },
        );
    }
    out
}

/// Lexicon scoring with path bonuses; ties go Location, then Service, then Supporting
pub fn heuristic_bucket(page: &PageText) -> &'static str {
    let combined = [page.url.as_str(), &page.title, &page.meta, &page.h1].join(" | ");
    let mut location = hits(&combined, &LOCATION_TERMS);
    let mut supporting = hits(&combined, &SUPPORTING_TERMS);
    let service = hits(&combined, &SERVICE_TERMS);

    if page.url.contains("/locations/") || page.url.contains("/branch/") {
        location += 4;
    }
    if page.url.contains("/about-us/") || page.url.contains("/resources/") || page.url.contains("calculator") {
        supporting += 3;
    }

    let best = location.max(supporting).max(service);
    if best == 0 {
        UNCLASSIFIED
    } else if location == best {
        LOCATION
    } else if service == best {
        SERVICE
    } else {
        SUPPORTING
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Rule,
    Provided,
    Heuristic,
    None,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Rule => "custom rule",
            Method::Provided => "metadata Type",
            Method::Heuristic => "heuristic",
            Method::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub url: String,
    pub bucket: String,
    pub inferred: String,
    pub method: Method,
}

impl Classification {
    pub const HEADERS: [&'static str; 4] = ["URL", "Bucket", "Inferred Bucket", "Method"];

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.url.clone(),
            self.bucket.clone(),
            self.inferred.clone(),
            self.method.as_str().to_string(),
        ]
    }
}

#[derive(Debug, Clone, Default)]
pub struct Classifier {
    rules: Vec<BucketRule>,
}

impl Classifier {
    pub fn new(rules: Vec<BucketRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[BucketRule] {
        &self.rules
    }

    /// Assign one URL to exactly one bucket, appending any warnings
    pub fn classify(&self, url: &str, meta: Option<&PageMeta>, issues: &mut Vec<ValidationIssue>) -> Classification {
        let page = match meta {
            Some(m) => PageText::new(url, &m.title, &m.meta, &m.h1),
            None => PageText::new(url, "", "", ""),
        };

        if let Some(rule) = self.rules.iter().find(|r| r.matches(&page)) {
            return Classification {
                url: url.to_string(),
                bucket: rule.name.clone(),
                inferred: rule.name.clone(),
                method: Method::Rule,
            };
        }

        let inferred = heuristic_bucket(&page);
        let provided = meta.map(|m| m.provided_type.as_str()).unwrap_or("");

        let (bucket, method) = if !provided.is_empty() {
            if provided != inferred {
                issues.push(ValidationIssue::warning(
                    WARN_TYPE_CONFLICT,
                    provided,
                    url,
                    "metadata",
                    "Type",
                    provided,
                    &format!("Inferred type is '{}'", inferred),
                    "Provided Type kept; inferred type differs.",
                    "Review URL intent and update Type if desired.",
                ));
            }
            (provided.to_string(), Method::Provided)
        } else {
            if meta.is_some() {
                issues.push(ValidationIssue::warning(
                    WARN_MISSING_TYPE,
                    inferred,
                    url,
                    "metadata",
                    "Type",
                    "blank",
                    &format!("Filled from inference as '{}'", inferred),
                    "Type was blank and has been inferred deterministically.",
                    "Populate Type explicitly in metadata if needed.",
                ));
            }
            let method = if inferred == UNCLASSIFIED { Method::None } else { Method::Heuristic };
            (inferred.to_string(), method)
        };

        if bucket == UNCLASSIFIED {
            issues.push(ValidationIssue::warning(
                WARN_UNCLASSIFIED,
                UNCLASSIFIED,
                url,
                "metadata",
                "Type",
                "No strong rule match",
                "URL maps to known bucket",
                "URL fell through all custom and built-in rules.",
                "Add a custom bucket rule or adjust metadata Type.",
            ));
        }

        Classification {
            url: url.to_string(),
            bucket,
            inferred: inferred.to_string(),
            method,
        }
    }

    /// Classify a URL set in sorted order
    pub fn classify_all<'a>(
        &self,
        urls: impl IntoIterator<Item = &'a str>,
        metadata: &HashMap<String, PageMeta>,
    ) -> (Vec<Classification>, Vec<ValidationIssue>) {
        let sorted: BTreeSet<&str> = urls.into_iter().filter(|u| !u.is_empty()).collect();
        let mut issues = Vec::new();
        let results: Vec<Classification> = sorted
            .into_iter()
            .map(|url| self.classify(url, metadata.get(url), &mut issues))
            .collect();
        debug!(
            "Classified {} URLs ({} warnings)",
            results.len(),
            issues.len()
        );
        (results, issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(title: &str, h1: &str, provided: &str) -> PageMeta {
        PageMeta {
            title: title.to_string(),
            meta: String::new(),
            h1: h1.to_string(),
            provided_type: provided.to_string(),
        }
    }

    #[test]
    fn test_rule_dsl_parsing_and_invalid_lines() {
        let (rules, issues) = parse_rules(
            "# comment\n\
             Practice: url_contains=/divorce/, /custody/; exclude=blog\n\
             not a rule\n\
             Careers: title_contains=jobs; bogus=1\n",
        );
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].url_contains, vec!["/divorce/", "/custody/"]);
        assert_eq!(rules[0].exclude, vec!["blog"]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, WARN_INVALID_RULE);
        assert_eq!(issues[0].field, "line_3");
    }

    #[test]
    fn test_rule_needs_every_condition_and_no_exclusions() {
        let (rules, _) = parse_rules("Practice: url_contains=/divorce/; h1_contains=lawyer; exclude=blog\n");
        let rule = &rules[0];
        assert!(rule.matches(&PageText::new("https://x/divorce/", "", "", "Divorce Lawyer")));
        assert!(!rule.matches(&PageText::new("https://x/divorce/", "", "", "Divorce")));
        assert!(!rule.matches(&PageText::new("https://x/blog/divorce/", "", "", "Divorce Lawyer")));
        // A rule with no conditions never matches
        assert!(!BucketRule { name: "Empty".into(), ..Default::default() }.matches(&PageText::new("https://x/", "", "", "")));
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let (rules, _) = parse_rules("A: url_contains=divorce\nB: url_contains=divorce\n");
        let classifier = Classifier::new(rules);
        let mut issues = Vec::new();
        let c = classifier.classify("https://x/divorce/", None, &mut issues);
        assert_eq!(c.bucket, "A");
        assert_eq!(c.method, Method::Rule);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_heuristic_bonuses_and_tie_break() {
        assert_eq!(heuristic_bucket(&PageText::new("https://x/locations/madison/", "", "", "")), LOCATION);
        assert_eq!(heuristic_bucket(&PageText::new("https://x/about-us/", "", "", "")), SUPPORTING);
        assert_eq!(heuristic_bucket(&PageText::new("https://x/mortgage/", "", "", "")), SERVICE);
        // office (location) vs loan (service): tie goes to Location
        assert_eq!(heuristic_bucket(&PageText::new("https://x/office-loan/", "", "", "")), LOCATION);
        assert_eq!(heuristic_bucket(&PageText::new("https://x/zzz/", "", "", "")), UNCLASSIFIED);
    }

    #[test]
    fn test_short_terms_need_token_boundaries() {
        // "wi" inside "wisconsin" is not a location hit
        assert_eq!(heuristic_bucket(&PageText::new("https://x/wisconsin-hours/", "", "", "")), UNCLASSIFIED);
        assert_eq!(heuristic_bucket(&PageText::new("https://x/madison-wi/", "", "", "")), LOCATION);
    }

    #[test]
    fn test_provided_type_conflict_and_missing_type() {
        let classifier = Classifier::default();
        let mut issues = Vec::new();

        let c = classifier.classify("https://x/mortgage/", Some(&meta("", "", "Core")), &mut issues);
        assert_eq!(c.bucket, "Core");
        assert_eq!(c.inferred, SERVICE);
        assert_eq!(issues[0].issue_type, WARN_TYPE_CONFLICT);

        issues.clear();
        let c = classifier.classify("https://x/faq/", Some(&meta("", "", "")), &mut issues);
        assert_eq!(c.bucket, SUPPORTING);
        assert_eq!(issues[0].issue_type, WARN_MISSING_TYPE);
    }

    #[test]
    fn test_unclassified_emits_warning() {
        let classifier = Classifier::default();
        let (results, issues) = classifier.classify_all(["https://x/zzz/", "https://x/zzz/", ""], &HashMap::new());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].bucket, UNCLASSIFIED);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, WARN_UNCLASSIFIED);
        assert_eq!(issues[0].to_row().len(), ValidationIssue::HEADERS.len());
    }
}
