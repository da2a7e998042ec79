//! Anchor text banks and per-target anchor assignment.
//!
//! Every inbound recommendation for a target is placed in a deterministic order, given an
//! anchor category (an integer mix for core/conversion targets), and then handed the first
//! unused bank option for that category. Picks start at a stable hash of the source URL so
//! repeated runs over the same inputs choose the same anchors.

use anyhow::{Context, Result};
use md5::{Digest, Md5};
use regex::{Regex, RegexBuilder};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::config::{AnchorsConfig, AppConfig};
use crate::ingest::{IngestError, Table};
use crate::recommend::{Action, Recommendation};
use crate::taxonomy::{region_name, Tier, Taxonomy};

/// The five bank slots, in option order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BankSlot {
    Primary,
    Secondary,
    Variant,
    Informational,
    Additional,
}

impl BankSlot {
    pub const ALL: [BankSlot; 5] = [
        BankSlot::Primary,
        BankSlot::Secondary,
        BankSlot::Variant,
        BankSlot::Informational,
        BankSlot::Additional,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BankSlot::Primary => "Primary/HighIntent",
            BankSlot::Secondary => "Secondary/Partial",
            BankSlot::Variant => "Variant",
            BankSlot::Informational => "Informational",
            BankSlot::Additional => "Additional",
        }
    }

    /// Option number 1..=5
    pub fn option(&self) -> usize {
        match self {
            BankSlot::Primary => 1,
            BankSlot::Secondary => 2,
            BankSlot::Variant => 3,
            BankSlot::Informational => 4,
            BankSlot::Additional => 5,
        }
    }

    fn from_option(option: usize) -> BankSlot {
        BankSlot::ALL[(option.clamp(1, 5)) - 1]
    }

    /// Accepts `Primary / High intent`, `Option 2`, `Informational`, ...
    pub fn from_label(label: &str) -> Option<BankSlot> {
        let squashed: String = label
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        if let Some(n) = squashed.strip_prefix("option").and_then(|n| n.parse::<usize>().ok()) {
            return (1..=5).contains(&n).then(|| BankSlot::from_option(n));
        }
        if squashed.starts_with("primary") || squashed.starts_with("exact") {
            Some(BankSlot::Primary)
        } else if squashed.starts_with("secondary") || squashed.starts_with("partial") {
            Some(BankSlot::Secondary)
        } else if squashed.starts_with("variant") {
            Some(BankSlot::Variant)
        } else if squashed.starts_with("info") {
            Some(BankSlot::Informational)
        } else if squashed.starts_with("additional") || squashed.starts_with("brand") {
            Some(BankSlot::Additional)
        } else {
            None
        }
    }
}

impl fmt::Display for BankSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mix categories enforced for core/conversion targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnchorCategory {
    Exact,
    Partial,
    Informational,
    Branded,
}

/// Bank slot preference for a category; `alternate` flips partial between options 2 and 3
fn slot_preference(category: AnchorCategory, alternate: bool) -> [usize; 5] {
    match category {
        AnchorCategory::Exact => [1, 2, 3, 4, 5],
        AnchorCategory::Informational => [4, 2, 3, 5, 1],
        AnchorCategory::Branded => [5, 4, 2, 3, 1],
        AnchorCategory::Partial if alternate => [3, 2, 4, 5, 1],
        AnchorCategory::Partial => [2, 3, 4, 5, 1],
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorOption {
    pub core_page_name: String,
    pub slot: BankSlot,
    pub anchor: String,
    pub rationale: String,
}

pub const BANK_HEADERS: [&str; 4] = ["Core Page Name", "Anchor Category", "Anchor Text", "Anchor Rationale"];

/// Anchor options grouped by core page name, in insertion order
#[derive(Debug, Clone, Default)]
pub struct AnchorBank {
    by_name: BTreeMap<String, Vec<AnchorOption>>,
}

impl AnchorBank {
    pub fn from_options(options: impl IntoIterator<Item = AnchorOption>) -> Self {
        let mut bank = Self::default();
        for option in options {
            bank.push(option);
        }
        bank
    }

    /// Adds an option unless the same anchor already exists for that page
    pub fn push(&mut self, option: AnchorOption) {
        let entries = self.by_name.entry(option.core_page_name.clone()).or_default();
        if option.anchor.trim().is_empty()
            || entries.iter().any(|o| o.anchor.eq_ignore_ascii_case(&option.anchor))
        {
            return;
        }
        entries.push(option);
    }

    /// Read a curated bank table (`Anchor Bank` sheet or CSV)
    pub fn from_table(table: &Table) -> Result<Self, IngestError> {
        table.require_columns(&["Core Page Name", "Anchor Category", "Anchor Text"])?;
        Ok(Self::from_options(table.records().filter_map(|r| {
            let slot = BankSlot::from_label(r.get("Anchor Category"))?;
            Some(AnchorOption {
                core_page_name: r.get_trimmed("Core Page Name").to_string(),
                slot,
                anchor: r.get_trimmed("Anchor Text").to_string(),
                rationale: r.get_trimmed("Anchor Rationale").to_string(),
            })
        })))
    }

    pub fn options(&self, core_page_name: &str) -> &[AnchorOption] {
        self.by_name.get(core_page_name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn to_rows(&self) -> Vec<Vec<String>> {
        self.by_name
            .values()
            .flatten()
            .map(|o| {
                vec![
                    o.core_page_name.clone(),
                    o.slot.as_str().to_string(),
                    o.anchor.clone(),
                    o.rationale.clone(),
                ]
            })
            .collect()
    }

    /// Generated bank for every Tier-1/Tier-2 target
    pub fn generate(taxonomy: &Taxonomy, config: &AppConfig, policy: &AnchorPolicy) -> Self {
        let region = region_name(&config.site.scope_prefix);
        let brand = config.site.brand_name.trim();
        let mut bank = Self::default();
        for target in taxonomy.targets().iter().filter(|t| t.tier != Tier::Tier3) {
            // Words the policy rejects (ungated "services", banned modifiers) never enter the topic
            let topic = topic_phrase(&target.name, &region)
                .split_whitespace()
                .filter(|w| policy.allows(w, &target.primary_keyword))
                .collect::<Vec<_>>()
                .join(" ");
            if topic.is_empty() {
                continue;
            }
            let before = bank.options(&target.name).len();
            for (slot, anchor, rationale) in generated_candidates(&topic, &region, brand, &target.primary_keyword) {
                if policy.allows(&anchor, &target.primary_keyword) {
                    bank.push(AnchorOption {
                        core_page_name: target.name.clone(),
                        slot,
                        anchor,
                        rationale: rationale.to_string(),
                    });
                }
                if bank.options(&target.name).len() - before >= config.anchors.min_bank_size.max(GENERATED_BASE) {
                    break;
                }
            }
        }
        bank
    }
}

const GENERATED_BASE: usize = 14;

/// Lowercased topic with the region name removed: `Wisconsin Child Custody` -> `child custody`
fn topic_phrase(name: &str, region: &str) -> String {
    let region_lower = region.to_lowercase();
    let mut topic = name.trim().to_lowercase();
    if !region_lower.is_empty() {
        topic = topic.replace(&region_lower, " ");
    }
    topic
        .split_whitespace()
        .filter(|w| *w != "in")
        .collect::<Vec<_>>()
        .join(" ")
}

fn generated_candidates(topic: &str, region: &str, brand: &str, keyword: &str) -> Vec<(BankSlot, String, &'static str)> {
    const EXACT: &str = "High-intent service anchor to reinforce the target page.";
    const PARTIAL: &str = "Partial-match anchor that keeps the in-body link natural while signaling the topic.";
    const VARIANT: &str = "Short variant to diversify wording; surrounding copy carries geography.";
    const INFO: &str = "Informational anchor that fits editorial tone.";
    const BRAND: &str = "Branded anchor to round out the mix.";

    let mut out = Vec::new();
    let keyword = keyword.trim();
    if !keyword.is_empty() {
        out.push((BankSlot::Primary, keyword.to_string(), EXACT));
    }
    let with_region = |pattern: &str| pattern.replace("{t}", topic).replace("{r}", region).replace("{b}", brand);
    for f in ["{r} {t} lawyer", "{t} attorney in {r}"] {
        out.push((BankSlot::Primary, with_region(f), EXACT));
    }
    for f in ["{t} in {r}", "{r} {t}", "the {t} process in {r}"] {
        out.push((BankSlot::Secondary, with_region(f), PARTIAL));
    }
    for f in ["{t} lawyer", "{t} attorney", "{t} help"] {
        out.push((BankSlot::Variant, with_region(f), VARIANT));
    }
    for f in ["how {t} works in {r}", "what to know about {t}", "common {t} questions"] {
        out.push((BankSlot::Informational, with_region(f), INFO));
    }
    if !brand.is_empty() {
        for f in ["{b} {t} team", "{b} {t} attorneys"] {
            out.push((BankSlot::Additional, with_region(f), BRAND));
        }
    }
    // Padding so small or heavily filtered banks still reach the minimum size
    for f in ["{t} guidance in {r}", "{t} options", "learn about {t}", "{t} in {r} explained", "{r} {t} basics"] {
        out.push((BankSlot::Variant, with_region(f), VARIANT));
    }
    out.into_iter()
        .map(|(slot, anchor, why)| (slot, anchor.split_whitespace().collect::<Vec<_>>().join(" "), why))
        .collect()
}

/// Banned modifiers and keyword-gated terms
pub struct AnchorPolicy {
    banned: Vec<Regex>,
    gated: Vec<(String, Regex)>,
}

fn word_regex(term: &str) -> Result<Regex> {
    RegexBuilder::new(&format!(r"\b{}\b", regex::escape(term.trim())))
        .case_insensitive(true)
        .build()
        .with_context(|| format!("Invalid anchor term: {}", term))
}

impl AnchorPolicy {
    pub fn new(config: &AnchorsConfig) -> Result<Self> {
        let banned = config.banned_terms.iter().map(|t| word_regex(t)).collect::<Result<Vec<_>>>()?;
        let gated = config
            .gated_terms
            .iter()
            .map(|t| Ok((t.to_lowercase(), word_regex(t)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { banned, gated })
    }

    /// Banned terms never pass; gated terms pass only when the primary keyword carries them
    pub fn allows(&self, anchor: &str, primary_keyword: &str) -> bool {
        if self.banned.iter().any(|re| re.is_match(anchor)) {
            return false;
        }
        let keyword = primary_keyword.to_lowercase();
        self.gated
            .iter()
            .all(|(term, re)| !re.is_match(anchor) || keyword.contains(term.as_str()))
    }
}

/// First 8 hex chars of md5(key) as an integer
pub fn stable_hash(key: &str) -> u32 {
    let digest = Md5::digest(key.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Integer category counts `[exact, partial, info, branded]` for `n` links.
///
/// Each count stays within `floor(n*lo/100)..=ceil(n*hi/100)`; among combinations summing to
/// `n`, the one with the smallest squared error to the goal shares wins, ties broken by the
/// lexicographically smallest tuple.
pub fn allocate_mix(n: usize, config: &AnchorsConfig) -> [usize; 4] {
    if n == 0 {
        return [0; 4];
    }
    let ranges = [
        config.exact_range,
        config.partial_range,
        config.info_range,
        config.branded_range,
    ];
    let bounds: Vec<(usize, usize)> = ranges
        .iter()
        .map(|[lo, hi]| {
            let lo = (n * *lo as usize) / 100;
            let hi = (n * *hi as usize + 99) / 100;
            (lo, hi.min(n))
        })
        .collect();
    let error = |counts: [usize; 4]| -> i64 {
        counts
            .iter()
            .zip(config.mix_targets.iter())
            .map(|(k, t)| {
                let d = 100 * *k as i64 - *t as i64 * n as i64;
                d * d
            })
            .sum()
    };

    let mut best: Option<(i64, [usize; 4])> = None;
    for e in bounds[0].0..=bounds[0].1 {
        for p in bounds[1].0..=bounds[1].1 {
            for i in bounds[2].0..=bounds[2].1 {
                let used = e + p + i;
                if used > n {
                    continue;
                }
                let b = n - used;
                if b < bounds[3].0 || b > bounds[3].1 {
                    continue;
                }
                let candidate = (error([e, p, i, b]), [e, p, i, b]);
                if best.map(|current| candidate < current).unwrap_or(true) {
                    best = Some(candidate);
                }
            }
        }
    }
    match best {
        Some((_, counts)) => counts,
        None => {
            let exact = usize::from(n >= 5);
            let info = usize::from(n >= 4);
            let branded = usize::from(n >= 6);
            [exact, n - exact - info - branded, info, branded]
        }
    }
}

/// `count` positions spread over `0..n`, rotated by `offset` (a fraction of `n`), skipping
/// positions already taken
pub fn evenly_spaced_positions(n: usize, count: usize, offset: f64, taken: &mut [bool]) -> Vec<usize> {
    let mut positions = Vec::with_capacity(count);
    if n == 0 || count == 0 {
        return positions;
    }
    let step = n as f64 / count as f64;
    let start = step / 2.0 + offset * n as f64;
    for i in 0..count {
        let mut pos = (start + i as f64 * step).floor() as usize % n;
        let mut probes = 0;
        while taken[pos] && probes < n {
            pos = (pos + 1) % n;
            probes += 1;
        }
        if taken[pos] {
            break;
        }
        taken[pos] = true;
        positions.push(pos);
    }
    positions
}

/// Category per position for a core/conversion target with `n` inbound links
pub fn plan_core_categories(n: usize, config: &AnchorsConfig) -> Vec<AnchorCategory> {
    let [exact, _, info, branded] = allocate_mix(n, config);
    let mut plan = vec![AnchorCategory::Partial; n];
    let mut taken = vec![false; n];
    for (category, count, offset) in [
        (AnchorCategory::Exact, exact, 0.0),
        (AnchorCategory::Informational, info, 0.17),
        (AnchorCategory::Branded, branded, 0.34),
    ] {
        for pos in evenly_spaced_positions(n, count, offset, &mut taken) {
            plan[pos] = category;
        }
    }
    plan
}

/// Rotating plan for targets outside the core/conversion set
pub fn plan_rotating_categories(n: usize) -> Vec<AnchorCategory> {
    const CYCLE: [AnchorCategory; 4] = [
        AnchorCategory::Informational,
        AnchorCategory::Partial,
        AnchorCategory::Branded,
        AnchorCategory::Partial,
    ];
    (0..n).map(|i| CYCLE[i % CYCLE.len()]).collect()
}

/// One assigned anchor with its provenance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorRationale {
    pub source_url: String,
    pub target_url: String,
    pub core_page_name: String,
    pub anchor: String,
    pub category: String,
    pub rationale: String,
    pub priority: String,
    pub reason: String,
}

impl AnchorRationale {
    pub const HEADERS: [&'static str; 8] = [
        "Source URL",
        "Suggested Target URL",
        "Core Page Name",
        "Suggested Anchor Text",
        "Anchor Category",
        "Anchor Rationale",
        "Priority",
        "Reason",
    ];

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.source_url.clone(),
            self.target_url.clone(),
            self.core_page_name.clone(),
            self.anchor.clone(),
            self.category.clone(),
            self.rationale.clone(),
            self.priority.clone(),
            self.reason.clone(),
        ]
    }
}

const NO_BANK_RATIONALE: &str = "No anchor bank available for this target; retained existing suggestion.";

/// Per-target usage state while assigning
#[derive(Default)]
struct Usage {
    counts: HashMap<String, usize>,
}

impl Usage {
    fn count(&self, anchor: &str) -> usize {
        self.counts.get(anchor).copied().unwrap_or(0)
    }

    fn record(&mut self, anchor: &str) {
        *self.counts.entry(anchor.to_string()).or_insert(0) += 1;
    }
}

/// Least-used option, first in bank order on ties
fn least_used<'b>(options: &[&'b AnchorOption], usage: &Usage) -> Option<&'b AnchorOption> {
    let mut best: Option<&AnchorOption> = None;
    for option in options.iter().copied() {
        if best.map(|b| usage.count(&option.anchor) < usage.count(&b.anchor)).unwrap_or(true) {
            best = Some(option);
        }
    }
    best
}

/// Assigns anchors to recommendations from an anchor bank
pub struct AnchorSelector<'a> {
    bank: &'a AnchorBank,
    /// Target URL -> core page name
    names: HashMap<String, String>,
    /// Core page name -> primary keyword
    keywords: HashMap<String, String>,
    core: HashSet<String>,
    policy: Option<&'a AnchorPolicy>,
    config: &'a AnchorsConfig,
}

impl<'a> AnchorSelector<'a> {
    pub fn new(bank: &'a AnchorBank, names: HashMap<String, String>, core: HashSet<String>, config: &'a AnchorsConfig) -> Self {
        Self {
            bank,
            names,
            keywords: HashMap::new(),
            core,
            policy: None,
            config,
        }
    }

    pub fn from_taxonomy(bank: &'a AnchorBank, taxonomy: &Taxonomy, config: &'a AnchorsConfig) -> Self {
        let names = taxonomy.targets().iter().map(|t| (t.url.clone(), t.name.clone())).collect();
        let keywords = taxonomy
            .targets()
            .iter()
            .filter(|t| !t.primary_keyword.is_empty())
            .map(|t| (t.name.clone(), t.primary_keyword.clone()))
            .collect();
        let mut selector = Self::new(bank, names, taxonomy.urls(), config);
        selector.keywords = keywords;
        selector
    }

    pub fn with_policy(mut self, policy: &'a AnchorPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn core_page_name(&self, target: &str) -> Option<&str> {
        self.names.get(target).map(String::as_str)
    }

    fn usable_options(&self, name: &str) -> Vec<&'a AnchorOption> {
        let keyword = self.keywords.get(name).map(String::as_str).unwrap_or("");
        self.bank
            .options(name)
            .iter()
            .filter(|o| self.policy.map(|p| p.allows(&o.anchor, keyword)).unwrap_or(true))
            .collect()
    }

    /// Category-driven pick: preferred slots in order, hashed start, first unused; then least used
    fn pick_for_category(
        &self,
        options: &[&'a AnchorOption],
        category: AnchorCategory,
        alternate: bool,
        source_url: &str,
        usage: &Usage,
    ) -> Option<&'a AnchorOption> {
        let hash = stable_hash(source_url) as usize;
        for option_number in slot_preference(category, alternate) {
            let slot = BankSlot::from_option(option_number);
            let in_slot: Vec<&AnchorOption> = options.iter().copied().filter(|o| o.slot == slot).collect();
            if in_slot.is_empty() {
                continue;
            }
            let start = hash % in_slot.len();
            if let Some(found) = (0..in_slot.len())
                .map(|i| in_slot[(start + i) % in_slot.len()])
                .find(|o| usage.count(&o.anchor) == 0)
            {
                return Some(found);
            }
        }
        least_used(options, usage)
    }

    /// Assign anchors to every recommendation that points at a new or corrected target.
    ///
    /// Rows are grouped by suggested target and ordered by (source URL, action). Rows whose
    /// target has no bank keep their existing anchor.
    pub fn assign(&self, recs: &mut [Recommendation]) -> Vec<AnchorRationale> {
        let mut by_target: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, rec) in recs.iter().enumerate() {
            if receives_anchor(rec) {
                by_target.entry(rec.suggested_target.clone()).or_default().push(idx);
            }
        }

        let mut rationale = Vec::new();
        for (target, mut indices) in by_target {
            indices.sort_by(|a, b| {
                (recs[*a].source_url.as_str(), recs[*a].action).cmp(&(recs[*b].source_url.as_str(), recs[*b].action))
            });
            let name = self.names.get(&target).cloned().unwrap_or_default();
            let options = self.usable_options(&name);
            let plan = if self.core.contains(&target) {
                plan_core_categories(indices.len(), self.config)
            } else {
                plan_rotating_categories(indices.len())
            };

            let mut usage = Usage::default();
            let mut partial_seen = 0usize;
            for (pos, idx) in indices.into_iter().enumerate() {
                let category = plan[pos];
                let alternate = category == AnchorCategory::Partial && partial_seen % 2 == 1;
                if category == AnchorCategory::Partial {
                    partial_seen += 1;
                }
                let rec = &mut recs[idx];
                let chosen = if options.is_empty() {
                    None
                } else {
                    self.pick_for_category(&options, category, alternate, &rec.source_url, &usage)
                };
                match chosen {
                    Some(option) => {
                        usage.record(&option.anchor);
                        rec.anchor = option.anchor.clone();
                        rationale.push(rationale_row(rec, &name, option.slot.as_str(), &option.rationale));
                    }
                    None => rationale.push(rationale_row(rec, &name, "Unknown", NO_BANK_RATIONALE)),
                }
            }
        }
        rationale
    }

    /// Category-free rotation used when re-anchoring a reduced ADD set: hashed start over the
    /// whole bank, first unused, else least used. Rows are ordered by (target, source).
    pub fn assign_rotating(&self, recs: &mut [Recommendation]) -> Vec<AnchorRationale> {
        let mut order: Vec<usize> = (0..recs.len()).filter(|i| receives_anchor(&recs[*i])).collect();
        order.sort_by(|a, b| {
            (recs[*a].suggested_target.as_str(), recs[*a].source_url.as_str())
                .cmp(&(recs[*b].suggested_target.as_str(), recs[*b].source_url.as_str()))
        });

        let mut usage_by_name: HashMap<String, Usage> = HashMap::new();
        let mut rationale = Vec::new();
        for idx in order {
            let rec = &mut recs[idx];
            let name = self
                .names
                .get(&rec.suggested_target)
                .cloned()
                .unwrap_or_else(|| "Unknown".to_string());
            let options = self.usable_options(&name);
            if options.is_empty() {
                rationale.push(rationale_row(rec, &name, "Unknown", NO_BANK_RATIONALE));
                continue;
            }
            let usage = usage_by_name.entry(name.clone()).or_default();
            let start = stable_hash(&rec.source_url) as usize % options.len();
            let chosen = (0..options.len())
                .map(|i| options[(start + i) % options.len()])
                .find(|o| usage.count(&o.anchor) == 0)
                .or_else(|| least_used(&options, usage));
            if let Some(option) = chosen {
                usage.record(&option.anchor);
                rec.anchor = option.anchor.clone();
                rationale.push(rationale_row(rec, &name, option.slot.as_str(), &option.rationale));
            }
        }
        rationale
    }
}

fn receives_anchor(rec: &Recommendation) -> bool {
    !rec.suggested_target.is_empty()
        && matches!(rec.action, Action::AddContextual | Action::FixRedirect | Action::ReplaceUrl)
}

fn rationale_row(rec: &Recommendation, name: &str, category: &str, rationale: &str) -> AnchorRationale {
    AnchorRationale {
        source_url: rec.source_url.clone(),
        target_url: rec.suggested_target.clone(),
        core_page_name: name.to_string(),
        anchor: rec.anchor.clone(),
        category: category.to_string(),
        rationale: rationale.to_string(),
        priority: rec.priority.as_str().to_string(),
        reason: rec.reason.clone(),
    }
}

/// Targets whose most common anchor exceeds `max_share` among `min_links`+ inbound rows
pub fn diversity_violations(recs: &[Recommendation], min_links: usize, max_share: f64) -> Vec<(String, f64)> {
    let mut per_target: BTreeMap<&str, HashMap<&str, usize>> = BTreeMap::new();
    for rec in recs.iter().filter(|r| receives_anchor(r)) {
        *per_target
            .entry(rec.suggested_target.as_str())
            .or_default()
            .entry(rec.anchor.as_str())
            .or_insert(0) += 1;
    }
    per_target
        .into_iter()
        .filter_map(|(target, counts)| {
            let n: usize = counts.values().sum();
            let top = counts.values().copied().max().unwrap_or(0);
            let share = top as f64 / n as f64;
            (n >= min_links && share > max_share + f64::EPSILON).then(|| (target.to_string(), share))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::read_delimited_table;
    use crate::recommend::Priority;
    use crate::url_utils::Canonicalizer;

    fn add(source: &str, target: &str) -> Recommendation {
        Recommendation {
            action: Action::AddContextual,
            source_url: source.into(),
            current_target: String::new(),
            suggested_target: target.into(),
            anchor: String::new(),
            link_position: "Content".into(),
            priority: Priority::High,
            reason: "r".into(),
            notes: String::new(),
            curl_status: String::new(),
            curl_effective: String::new(),
        }
    }

    fn taxonomy(config: &AppConfig) -> Taxonomy {
        let table = read_delimited_table(
            "core.csv",
            "URL,Cluster ID,Type,Core Page Name,Primary Keyword\n\
             https://x/wisconsin/divorce/,DIV,core,Divorce,wisconsin divorce lawyer\n\
             https://x/wisconsin/mediation/,DIV,subservice,Mediation Services,divorce mediation\n"
                .as_bytes(),
            b',',
        )
        .unwrap();
        Taxonomy::load(table, &Canonicalizer::new("x"), config).unwrap()
    }

    #[test]
    fn test_mix_for_ten_links() {
        let config = AnchorsConfig::default();
        assert_eq!(allocate_mix(10, &config), [2, 4, 3, 1]);
        assert_eq!(allocate_mix(0, &config), [0, 0, 0, 0]);
        let total: usize = allocate_mix(7, &config).iter().sum();
        assert_eq!(total, 7);
    }

    #[test]
    fn test_evenly_spaced_positions_probe_forward() {
        let mut taken = vec![false; 10];
        assert_eq!(evenly_spaced_positions(10, 2, 0.0, &mut taken), vec![2, 7]);
        let info = evenly_spaced_positions(10, 3, 0.17, &mut taken);
        assert_eq!(info, vec![3, 6, 0]);
        assert_eq!(taken.iter().filter(|t| **t).count(), 5);
    }

    #[test]
    fn test_core_plan_counts_match_mix() {
        let config = AnchorsConfig::default();
        let plan = plan_core_categories(10, &config);
        let count = |c: AnchorCategory| plan.iter().filter(|p| **p == c).count();
        assert_eq!(count(AnchorCategory::Exact), 2);
        assert_eq!(count(AnchorCategory::Partial), 4);
        assert_eq!(count(AnchorCategory::Informational), 3);
        assert_eq!(count(AnchorCategory::Branded), 1);
    }

    #[test]
    fn test_stable_hash_is_md5_prefix() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(stable_hash(""), 0xd41d8cd9);
        assert_eq!(stable_hash("https://x/a/"), stable_hash("https://x/a/"));
    }

    #[test]
    fn test_policy_bans_and_gates() {
        let policy = AnchorPolicy::new(&AnchorsConfig::default()).unwrap();
        assert!(!policy.allows("best divorce lawyer", ""));
        assert!(policy.allows("bestow custody", ""));
        assert!(!policy.allows("mediation services", "divorce mediation"));
        assert!(policy.allows("mediation services", "mediation services wisconsin"));
    }

    #[test]
    fn test_generated_bank_is_padded_and_filtered() {
        let config = AppConfig::embedded_default().unwrap();
        let policy = AnchorPolicy::new(&config.anchors).unwrap();
        let bank = AnchorBank::generate(&taxonomy(&config), &config, &policy);
        let divorce = bank.options("Divorce");
        assert!(divorce.len() >= config.anchors.min_bank_size);
        assert!(divorce.iter().any(|o| o.slot == BankSlot::Additional));
        assert!(divorce.iter().any(|o| o.anchor == "divorce in Wisconsin"));
        let mediation = bank.options("Mediation Services");
        assert!(mediation.len() >= config.anchors.min_bank_size);
        assert!(mediation.iter().all(|o| !o.anchor.to_lowercase().contains("services")));
    }

    #[test]
    fn test_assignment_respects_diversity_ceiling() {
        let config = AppConfig::embedded_default().unwrap();
        let policy = AnchorPolicy::new(&config.anchors).unwrap();
        let tax = taxonomy(&config);
        let bank = AnchorBank::generate(&tax, &config, &policy);
        let selector = AnchorSelector::from_taxonomy(&bank, &tax, &config.anchors).with_policy(&policy);

        let mut recs: Vec<Recommendation> = (0..23)
            .map(|i| add(&format!("https://x/wisconsin/blog/post-{}/", i), "https://x/wisconsin/divorce/"))
            .collect();
        let rationale = selector.assign(&mut recs);
        assert_eq!(rationale.len(), 23);
        assert!(recs.iter().all(|r| !r.anchor.is_empty()));
        assert!(diversity_violations(&recs, 5, 0.2).is_empty());

        let mut again = recs.clone();
        for r in again.iter_mut() {
            r.anchor.clear();
        }
        selector.assign(&mut again);
        assert_eq!(recs, again);
    }

    #[test]
    fn test_unknown_target_keeps_existing_anchor() {
        let bank = AnchorBank::default();
        let config = AnchorsConfig::default();
        let selector = AnchorSelector::new(&bank, HashMap::new(), HashSet::new(), &config);
        let mut recs = vec![Recommendation {
            anchor: "old anchor".into(),
            ..add("https://x/a/", "https://x/elsewhere/")
        }];
        let rationale = selector.assign(&mut recs);
        assert_eq!(recs[0].anchor, "old anchor");
        assert_eq!(rationale[0].category, "Unknown");
    }

    #[test]
    fn test_bank_from_table_and_rotation() {
        let table = read_delimited_table(
            "bank.csv",
            "Core Page Name,Anchor Category,Anchor Text,Anchor Rationale\n\
             Divorce,Primary / High intent,Wisconsin divorce lawyer,r1\n\
             Divorce,Secondary / Partial,divorce in Wisconsin,r2\n\
             Divorce,Variant,divorce attorney,r3\n\
             Divorce,Nonsense,ignored,r4\n"
                .as_bytes(),
            b',',
        )
        .unwrap();
        let bank = AnchorBank::from_table(&table).unwrap();
        assert_eq!(bank.len(), 3);

        let config = AnchorsConfig::default();
        let names: HashMap<String, String> =
            [("https://x/wisconsin/divorce/".to_string(), "Divorce".to_string())].into_iter().collect();
        let selector = AnchorSelector::new(&bank, names, HashSet::new(), &config);
        let mut recs: Vec<Recommendation> = (0..3)
            .map(|i| add(&format!("https://x/b/{}/", i), "https://x/wisconsin/divorce/"))
            .collect();
        selector.assign_rotating(&mut recs);
        let distinct: HashSet<&str> = recs.iter().map(|r| r.anchor.as_str()).collect();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn test_slot_labels() {
        assert_eq!(BankSlot::from_label("Primary / High intent"), Some(BankSlot::Primary));
        assert_eq!(BankSlot::from_label("Option 4"), Some(BankSlot::Informational));
        assert_eq!(BankSlot::from_label("Additional"), Some(BankSlot::Additional));
        assert_eq!(BankSlot::from_label("Primary/HighIntent"), Some(BankSlot::Primary));
    }
}
