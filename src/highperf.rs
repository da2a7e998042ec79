//! High-performer pass.
//!
//! Narrows the ADD rows of a finished run to the content pages that already perform
//! (GA4 views, GSC impressions, live Ahrefs backlinks), re-rotates their anchors through
//! the anchor bank, and leaves every FIX row untouched. Any invariant breach is a hard
//! failure so a regressed list is never written.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::anchors::{diversity_violations, AnchorBank, AnchorPolicy, AnchorRationale, AnchorSelector, BANK_HEADERS};
use crate::audit::{KPI_ADDS, KPI_DASHBOARD_ADDS};
use crate::apply_curl::set_metric;
use crate::config::{AppConfig, HighPerfConfig};
use crate::export::{export_csv, export_rationale_csv, read_recommendations_csv};
use crate::ingest::{read_csv_table, read_delimited_table, Table, GSC_ALIASES};
use crate::logger::RunLogger;
use crate::pipeline::{SHEET_ADDS, SHEET_ANCHOR_BANK};
use crate::recommend::{Action, Recommendation};
use crate::report::{read_workbook, write_workbook, Cell, Sheet, WorkbookModel, DASHBOARD_SHEET, OVERVIEW_SHEET};
use crate::taxonomy::Taxonomy;
use crate::url_utils::{infer_internal_domain, Canonicalizer};

pub const SHEET_HIGHPERF: &str = "HighPerf (GA4+GSC+Ahrefs)";
pub const SHEET_AHREFS: &str = "Ahrefs Top Targets (Live)";

const GA4_PATH: &str = "Page path and screen class";
const AHREFS_COLUMNS: [&str; 6] = [
    "Referring page URL",
    "Target URL",
    "Nofollow",
    "Is spam",
    "Lost",
    "Redirect Chain URLs",
];

/// Invariant breaches that abort the pass
#[derive(Debug, Error)]
pub enum QaFailure {
    #[error("ADD_CONTEXTUAL rows have duplicate Source URLs after filtering: {}", .urls.join(", "))]
    DuplicateAddSources { urls: Vec<String> },

    #[error("Non-ADD actions changed; expected FIX actions to remain identical")]
    FixRowsChanged,

    #[error("Anchor diversity failure for target {target}: top anchor share {:.1}%", .share * 100.0)]
    AnchorDiversity { target: String, share: f64 },
}

#[derive(Debug, Clone, Default)]
pub struct HighPerfPaths {
    pub baseline_xlsx: PathBuf,
    pub baseline_csv: PathBuf,
    pub core_pages: PathBuf,
    pub ga4: PathBuf,
    pub gsc: PathBuf,
    pub ahrefs: PathBuf,
    pub extra_hp_urls: Option<PathBuf>,
    pub exclude_sources: Option<PathBuf>,
    pub anchor_bank: Option<PathBuf>,
    pub out_xlsx: PathBuf,
    pub out_csv: PathBuf,
    pub out_rationale_csv: PathBuf,
}

/// Counts are read leniently: thousands separators are dropped and junk reads as zero
fn parse_number(raw: &str) -> f64 {
    raw.trim().replace(',', "").parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(0.0)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ga4Page {
    pub url: String,
    pub views: f64,
    pub engaged_sessions: f64,
}

/// GA4 "Pages and screens" export; `#` lines are export preamble
pub fn read_ga4(path: &Path, canon: &Canonicalizer) -> Result<Vec<Ga4Page>> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read GA4 export: {}", path.display()))?;
    let body: String = text
        .lines()
        .filter(|l| !l.trim_start().starts_with('#') && !l.trim().is_empty())
        .map(|l| format!("{}\n", l))
        .collect();
    let table = read_delimited_table(&path.display().to_string(), body.as_bytes(), b',')?;
    table.require_columns(&[GA4_PATH, "Views"])?;

    let mut by_url: BTreeMap<String, Ga4Page> = BTreeMap::new();
    for record in table.records() {
        let url = canon.canonical(record.get_trimmed(GA4_PATH));
        if url.is_empty() {
            continue;
        }
        let page = by_url.entry(url.clone()).or_insert_with(|| Ga4Page { url, ..Ga4Page::default() });
        page.views += parse_number(record.get("Views"));
        page.engaged_sessions += parse_number(record.get("Engaged sessions"));
    }
    Ok(by_url.into_values().collect())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GscPage {
    pub url: String,
    pub impressions: f64,
    pub clicks: f64,
    /// Mean position over duplicate rows
    pub position: f64,
}

/// GSC "Pages" export
pub fn read_gsc(path: &Path, canon: &Canonicalizer) -> Result<Vec<GscPage>> {
    let mut table = read_csv_table(path)?;
    table.require_columns(&["Top pages", "Impressions"])?;
    table.rename_columns(GSC_ALIASES);

    let mut by_url: BTreeMap<String, (GscPage, usize)> = BTreeMap::new();
    for record in table.records() {
        let url = canon.canonical(record.get("Source URL"));
        if url.is_empty() {
            continue;
        }
        let (page, rows) = by_url
            .entry(url.clone())
            .or_insert_with(|| (GscPage { url, ..GscPage::default() }, 0));
        page.impressions += parse_number(record.get("Impressions"));
        page.clicks += parse_number(record.get("Clicks"));
        page.position += parse_number(record.get("Position"));
        *rows += 1;
    }
    Ok(by_url
        .into_values()
        .map(|(mut page, rows)| {
            page.position /= rows.max(1) as f64;
            page
        })
        .collect())
}

/// Backlink aggregate for one canonical target
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AhrefsTarget {
    pub url: String,
    pub live_backlinks: usize,
    pub referring_domains: usize,
    pub dofollow: usize,
    pub nofollow: usize,
    pub spam: usize,
    pub non_spam: usize,
    pub quality_weighted: f64,
}

impl AhrefsTarget {
    pub const HEADERS: [&'static str; 10] = [
        "Source URL",
        "Live backlinks",
        "Referring domains",
        "Dofollow backlinks",
        "Nofollow backlinks",
        "Spam-flagged backlinks",
        "Non-spam backlinks",
        "Quality-weighted backlinks",
        "Ahrefs Rank (Backlinks)",
        "In Audited Source Set",
    ];
}

/// Ahrefs exports are UTF-16 with a BOM; plain UTF-8 is accepted too
pub fn decode_export(bytes: &[u8]) -> String {
    let utf16 = |le: bool| {
        let chunks = bytes[2..].chunks_exact(2);
        let dangling = chunks.remainder().len();
        let units: Vec<u16> = chunks
            .map(|c| if le { u16::from_le_bytes([c[0], c[1]]) } else { u16::from_be_bytes([c[0], c[1]]) })
            .collect();
        let mut text = String::from_utf16_lossy(&units);
        if dangling > 0 {
            warn!("UTF-16 export ends with a dangling byte; replaced with U+FFFD");
            text.push(char::REPLACEMENT_CHARACTER);
        }
        text
    };
    match bytes {
        [0xFF, 0xFE, ..] => utf16(true),
        [0xFE, 0xFF, ..] => utf16(false),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Last hop of the redirect chain, else the target as exported
fn ahrefs_canonical_target<'r>(target: &'r str, chain: &'r str) -> &'r str {
    chain
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case("nan"))
        .last()
        .unwrap_or(target)
}

fn ranked(mut targets: Vec<AhrefsTarget>) -> Vec<AhrefsTarget> {
    targets.sort_by(|a, b| {
        b.referring_domains
            .cmp(&a.referring_domains)
            .then(b.quality_weighted.total_cmp(&a.quality_weighted))
            .then(b.dofollow.cmp(&a.dofollow))
            .then(b.live_backlinks.cmp(&a.live_backlinks))
            .then(a.url.cmp(&b.url))
    });
    targets
}

/// Live backlinks aggregated per internal canonical target, best first
pub fn aggregate_ahrefs(table: &Table, canon: &Canonicalizer) -> Result<Vec<AhrefsTarget>> {
    table.require_columns(&AHREFS_COLUMNS)?;
    let mut by_url: BTreeMap<String, (AhrefsTarget, BTreeSet<String>)> = BTreeMap::new();
    for record in table.records() {
        let lost = record.get_trimmed("Lost");
        if !lost.is_empty() && !lost.eq_ignore_ascii_case("nan") {
            continue;
        }
        let url = canon.canonical(ahrefs_canonical_target(
            record.get_trimmed("Target URL"),
            record.get_trimmed("Redirect Chain URLs"),
        ));
        if url.is_empty() || !canon.is_internal(&url) {
            continue;
        }
        let nofollow = flag(record.get("Nofollow"));
        let spam = flag(record.get("Is spam"));
        let weight = if nofollow == Some(false) { 1.0 } else { 0.5 } * if spam == Some(true) { 0.2 } else { 1.0 };
        let domain = Url::parse(record.get_trimmed("Referring page URL"))
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
            .unwrap_or_default();

        let (agg, domains) = by_url
            .entry(url.clone())
            .or_insert_with(|| (AhrefsTarget { url, ..AhrefsTarget::default() }, BTreeSet::new()));
        agg.live_backlinks += 1;
        agg.dofollow += usize::from(nofollow == Some(false));
        agg.nofollow += usize::from(nofollow == Some(true));
        agg.spam += usize::from(spam == Some(true));
        agg.non_spam += usize::from(spam == Some(false));
        agg.quality_weighted += weight;
        domains.insert(domain);
    }
    Ok(ranked(
        by_url
            .into_values()
            .map(|(mut agg, domains)| {
                agg.referring_domains = domains.len();
                agg
            })
            .collect(),
    ))
}

pub fn read_ahrefs(path: &Path, canon: &Canonicalizer) -> Result<Vec<AhrefsTarget>> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read Ahrefs export: {}", path.display()))?;
    let text = decode_export(&bytes);
    let table = read_delimited_table(&path.display().to_string(), text.as_bytes(), b'\t')?;
    aggregate_ahrefs(&table, canon)
}

/// Top `n` eligible URLs by a descending metric; URL order breaks ties
pub fn top_eligible<'a, I>(rows: I, eligible: &BTreeSet<String>, n: usize) -> Vec<String>
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    let mut rows: Vec<(&str, f64)> = rows.into_iter().filter(|(u, _)| eligible.contains(*u)).collect();
    rows.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(b.0)));
    rows.into_iter().take(n).map(|(u, _)| u.to_string()).collect()
}

/// One-column URL list (`URL` column, else the first column)
pub fn read_url_list(path: &Path, canon: &Canonicalizer) -> Result<BTreeSet<String>> {
    let table = read_csv_table(path)?;
    let col = table.column_index("URL").unwrap_or(0);
    Ok(table
        .records()
        .map(|r| canon.canonical(r.at(col)))
        .filter(|u| !u.is_empty())
        .collect())
}

/// Which list put a source into the high-performer set
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub audited: BTreeSet<String>,
    pub ga4_top: BTreeSet<String>,
    pub gsc_top: BTreeSet<String>,
    pub ahrefs_top: BTreeSet<String>,
    pub forced: BTreeSet<String>,
    pub excluded: BTreeSet<String>,
    pub high_performers: BTreeSet<String>,
}

impl Selection {
    pub fn build(
        audited: BTreeSet<String>,
        ga4: &[Ga4Page],
        gsc: &[GscPage],
        ahrefs: &[AhrefsTarget],
        extra: BTreeSet<String>,
        exclude: BTreeSet<String>,
        thresholds: &HighPerfConfig,
    ) -> Self {
        let ga4_top: BTreeSet<String> =
            top_eligible(ga4.iter().map(|p| (p.url.as_str(), p.views)), &audited, thresholds.ga4_top_n)
                .into_iter()
                .collect();
        let gsc_top: BTreeSet<String> =
            top_eligible(gsc.iter().map(|p| (p.url.as_str(), p.impressions)), &audited, thresholds.gsc_top_n)
                .into_iter()
                .collect();
        // already ranked; keep the order instead of a single metric
        let ahrefs_top: BTreeSet<String> = ahrefs
            .iter()
            .filter(|t| audited.contains(&t.url))
            .take(thresholds.ahrefs_top_n)
            .map(|t| t.url.clone())
            .collect();
        let forced: BTreeSet<String> = extra.intersection(&audited).cloned().collect();
        let excluded: BTreeSet<String> = exclude.intersection(&audited).cloned().collect();

        let mut high_performers: BTreeSet<String> =
            ga4_top.iter().chain(&gsc_top).chain(&ahrefs_top).chain(&forced).cloned().collect();
        high_performers.retain(|u| !excluded.contains(u));

        Self {
            audited,
            ga4_top,
            gsc_top,
            ahrefs_top,
            forced,
            excluded,
            high_performers,
        }
    }

    fn yes_no(set: &BTreeSet<String>, url: &str) -> Cell {
        Cell::from(if set.contains(url) { "TRUE" } else { "FALSE" })
    }

    /// Evidence sheet: one row per audited source
    pub fn evidence_sheet(&self, ga4: &[Ga4Page], gsc: &[GscPage], thresholds: &HighPerfConfig) -> Sheet {
        let mut headers = vec![
            "Source URL".to_string(),
            "GA4 Views".to_string(),
            "GA4 Engaged sessions".to_string(),
            "GSC Impressions".to_string(),
            "GSC Clicks".to_string(),
            "GSC Position".to_string(),
            format!("GA4 Top{} (Views)", thresholds.ga4_top_n),
            format!("GSC Top{} (Impressions)", thresholds.gsc_top_n),
            format!("Ahrefs Top{} (Live backlinks)", thresholds.ahrefs_top_n),
        ];
        if !self.forced.is_empty() {
            headers.push("Extra HP (Forced)".to_string());
        }
        if !self.excluded.is_empty() {
            headers.push("Excluded (QA)".to_string());
        }
        headers.push("Is High Performer (Union)".to_string());

        let ga4: HashMap<&str, &Ga4Page> = ga4.iter().map(|p| (p.url.as_str(), p)).collect();
        let gsc: HashMap<&str, &GscPage> = gsc.iter().map(|p| (p.url.as_str(), p)).collect();
        let mut sheet = Sheet::table(SHEET_HIGHPERF, &headers);
        for url in &self.audited {
            let g = ga4.get(url.as_str());
            let s = gsc.get(url.as_str());
            let mut row = vec![
                Cell::from(url),
                Cell::from(g.map(|p| p.views).unwrap_or(0.0)),
                Cell::from(g.map(|p| p.engaged_sessions).unwrap_or(0.0)),
                Cell::from(s.map(|p| p.impressions).unwrap_or(0.0)),
                Cell::from(s.map(|p| p.clicks).unwrap_or(0.0)),
                Cell::from(s.map(|p| (p.position * 100.0).round() / 100.0).unwrap_or(0.0)),
                Self::yes_no(&self.ga4_top, url),
                Self::yes_no(&self.gsc_top, url),
                Self::yes_no(&self.ahrefs_top, url),
            ];
            if !self.forced.is_empty() {
                row.push(Self::yes_no(&self.forced, url));
            }
            if !self.excluded.is_empty() {
                row.push(Self::yes_no(&self.excluded, url));
            }
            row.push(Self::yes_no(&self.high_performers, url));
            sheet.push(row);
        }
        sheet
    }
}

/// Top live-backlink targets across the site, flagged by audit membership
pub fn ahrefs_sheet(ahrefs: &[AhrefsTarget], audited: &BTreeSet<String>, top_n: usize) -> Sheet {
    let mut sheet = Sheet::table(SHEET_AHREFS, &AhrefsTarget::HEADERS);
    for (rank, t) in ahrefs.iter().take(top_n).enumerate() {
        sheet.push(vec![
            Cell::from(&t.url),
            Cell::from(t.live_backlinks),
            Cell::from(t.referring_domains),
            Cell::from(t.dofollow),
            Cell::from(t.nofollow),
            Cell::from(t.spam),
            Cell::from(t.non_spam),
            Cell::from(t.quality_weighted),
            Cell::from(rank + 1),
            Cell::from(if audited.contains(&t.url) { "TRUE" } else { "FALSE" }),
        ]);
    }
    sheet
}

/// Hard checks over the narrowed list
pub fn check_invariants(
    baseline_fixes: &[Recommendation],
    fixes: &[Recommendation],
    adds: &[Recommendation],
    max_share: f64,
    min_links: usize,
) -> Result<(), QaFailure> {
    let mut seen = HashSet::new();
    let dupes: BTreeSet<String> = adds
        .iter()
        .filter(|r| !seen.insert(r.source_url.as_str()))
        .map(|r| r.source_url.clone())
        .collect();
    if !dupes.is_empty() {
        return Err(QaFailure::DuplicateAddSources {
            urls: dupes.into_iter().collect(),
        });
    }

    let rows = |recs: &[Recommendation]| recs.iter().map(Recommendation::to_csv_row).collect::<Vec<_>>();
    if rows(baseline_fixes) != rows(fixes) {
        return Err(QaFailure::FixRowsChanged);
    }

    if let Some((target, share)) = diversity_violations(adds, min_links, max_share).into_iter().next() {
        return Err(QaFailure::AnchorDiversity { target, share });
    }
    Ok(())
}

/// Workbook-only columns of the baseline ADD sheet, keyed by (source, target)
fn workbook_extras(model: &WorkbookModel) -> HashMap<(String, String), (String, String, String)> {
    let Some(sheet) = model.get(SHEET_ADDS) else {
        return HashMap::new();
    };
    let table = sheet.to_table();
    table
        .records()
        .filter_map(|r| Recommendation::from_record(&r))
        .map(|r| ((r.source_url, r.suggested_target), (r.notes, r.curl_status, r.curl_effective)))
        .collect()
}

/// Rewrite the ADD count column of the Dashboard's Core Pages section
fn update_core_page_adds(sheet: &mut Sheet, adds: &[Recommendation]) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for rec in adds {
        *counts.entry(rec.suggested_target.as_str()).or_insert(0) += 1;
    }
    let Some(header_idx) = sheet.header_rows.iter().copied().find(|&idx| {
        sheet.rows[idx].iter().any(|c| c.text() == "Canonical Core Page URL")
    }) else {
        return;
    };
    let header: Vec<String> = sheet.rows[header_idx].iter().map(Cell::text).collect();
    let (Some(url_col), Some(add_col)) = (
        header.iter().position(|h| h == "Canonical Core Page URL"),
        header.iter().position(|h| h == "Add Actions (Count)"),
    ) else {
        return;
    };
    for row in sheet.rows.iter_mut().skip(header_idx + 1) {
        if row.iter().all(Cell::is_empty) {
            break;
        }
        let url = row.get(url_col).map(Cell::text).unwrap_or_default();
        if row.len() <= add_col {
            row.resize(add_col + 1, Cell::from(""));
        }
        row[add_col] = Cell::from(counts.get(url.as_str()).copied().unwrap_or(0));
    }
}

/// Outcome of a pass
#[derive(Debug, Clone, Default)]
pub struct HighPerfOutcome {
    pub selection: Selection,
    pub adds: Vec<Recommendation>,
    pub fixes: Vec<Recommendation>,
    pub rationale: Vec<AnchorRationale>,
}

/// Run the high-performer pass end to end
pub fn run_highperf(paths: &HighPerfPaths, config: &AppConfig, logger: &RunLogger) -> Result<HighPerfOutcome> {
    logger.log_stage("Reading baseline run");
    let baseline = read_recommendations_csv(&paths.baseline_csv)?;
    logger.log_input_loaded("baseline implementation list", &paths.baseline_csv, baseline.len());
    let mut model = read_workbook(&paths.baseline_xlsx)?;

    let core_table = read_csv_table(&paths.core_pages)?;
    let domain = if config.site.internal_domain.trim().is_empty() {
        infer_internal_domain(baseline.iter().map(|r| r.source_url.as_str()))
            .context("Cannot infer the internal domain from the baseline list; pass --internal_domain")?
    } else {
        config.site.internal_domain.trim().to_string()
    };
    let canon = Canonicalizer::new(&domain);
    let taxonomy = Taxonomy::load(core_table, &canon, config)?;

    let (baseline_adds, baseline_fixes): (Vec<Recommendation>, Vec<Recommendation>) =
        baseline.into_iter().partition(|r| r.action == Action::AddContextual);
    let audited: BTreeSet<String> = baseline_adds.iter().map(|r| canon.canonical(&r.source_url)).collect();

    logger.log_stage("Reading performance exports");
    let ga4 = read_ga4(&paths.ga4, &canon)?;
    logger.log_input_loaded("GA4 pages", &paths.ga4, ga4.len());
    let gsc = read_gsc(&paths.gsc, &canon)?;
    logger.log_input_loaded("GSC pages", &paths.gsc, gsc.len());
    let ahrefs = read_ahrefs(&paths.ahrefs, &canon)?;
    logger.log_input_loaded("Ahrefs live targets", &paths.ahrefs, ahrefs.len());
    let extra = match &paths.extra_hp_urls {
        Some(p) => read_url_list(p, &canon)?,
        None => BTreeSet::new(),
    };
    let exclude = match &paths.exclude_sources {
        Some(p) => read_url_list(p, &canon)?,
        None => BTreeSet::new(),
    };

    let selection = Selection::build(audited, &ga4, &gsc, &ahrefs, extra, exclude, &config.highperf);
    info!(
        "High performers: {} of {} audited sources (GA4 {}, GSC {}, Ahrefs {})",
        selection.high_performers.len(),
        selection.audited.len(),
        selection.ga4_top.len(),
        selection.gsc_top.len(),
        selection.ahrefs_top.len()
    );
    if selection.ahrefs_top.is_empty() && !ahrefs.is_empty() {
        warn!("No Ahrefs top target overlaps the audited ADD sources");
    }

    let extras = workbook_extras(&model);
    let mut adds: Vec<Recommendation> = baseline_adds
        .into_iter()
        .filter(|r| selection.high_performers.contains(&canon.canonical(&r.source_url)))
        .collect();
    for rec in adds.iter_mut() {
        if let Some((notes, status, effective)) = extras.get(&(rec.source_url.clone(), rec.suggested_target.clone())) {
            rec.notes = notes.clone();
            rec.curl_status = status.clone();
            rec.curl_effective = effective.clone();
        }
    }

    logger.log_stage("Reassigning anchors");
    let bank = match &paths.anchor_bank {
        Some(path) => AnchorBank::from_table(&read_csv_table(path)?)
            .with_context(|| format!("Invalid anchor bank: {}", path.display()))?,
        None => match model.get(SHEET_ANCHOR_BANK) {
            Some(sheet) => AnchorBank::from_table(&sheet.to_table()).context("Invalid Anchor Bank sheet in the baseline workbook")?,
            None => AnchorBank::default(),
        },
    };
    let policy = AnchorPolicy::new(&config.anchors)?;
    let bank = if bank.is_empty() {
        debug!("No curated anchor bank; generating one from the core pages");
        AnchorBank::generate(&taxonomy, config, &policy)
    } else {
        bank
    };
    let selector = AnchorSelector::from_taxonomy(&bank, &taxonomy, &config.anchors).with_policy(&policy);
    let rationale = selector.assign_rotating(&mut adds);

    let fixes = baseline_fixes.clone();
    check_invariants(
        &baseline_fixes,
        &fixes,
        &adds,
        config.anchors.max_top_share,
        config.anchors.diversity_min_links,
    )?;
    logger.record_actions(fixes.len(), adds.len());

    logger.log_stage("Writing outputs");
    let mut combined = adds.clone();
    combined.extend(fixes.iter().cloned());
    export_csv(&combined, &paths.out_csv)?;
    logger.log_export_success(&paths.out_csv);
    export_rationale_csv(&rationale, &paths.out_rationale_csv)?;
    logger.log_export_success(&paths.out_rationale_csv);

    let mut add_sheet = Sheet::table(SHEET_ADDS, &Recommendation::sheet_headers());
    for rec in &adds {
        add_sheet.push_text(rec.to_sheet_row());
    }
    model.replace(add_sheet);
    for name in [SHEET_HIGHPERF, SHEET_ANCHOR_BANK, SHEET_AHREFS] {
        model.remove(name);
    }
    model.push(selection.evidence_sheet(&ga4, &gsc, &config.highperf).hidden());
    let mut bank_sheet = Sheet::table(SHEET_ANCHOR_BANK, &BANK_HEADERS);
    for row in bank.to_rows() {
        bank_sheet.push_text(row);
    }
    model.push(bank_sheet.hidden());
    model.push(ahrefs_sheet(&ahrefs, &selection.audited, config.highperf.ahrefs_top_n).hidden());
    if let Some(sheet) = model.get_mut(DASHBOARD_SHEET) {
        set_metric(sheet, KPI_DASHBOARD_ADDS, adds.len());
        update_core_page_adds(sheet, &adds);
    }
    if let Some(sheet) = model.get_mut(OVERVIEW_SHEET) {
        set_metric(sheet, KPI_ADDS, adds.len());
    }
    write_workbook(&model, &paths.out_xlsx)?;
    logger.log_export_success(&paths.out_xlsx);

    Ok(HighPerfOutcome {
        selection,
        adds,
        fixes,
        rationale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recommend::Priority;
    use tempfile::TempDir;

    fn canon() -> Canonicalizer {
        Canonicalizer::new("www.x.com")
    }

    fn add(source: &str, target: &str, anchor: &str) -> Recommendation {
        Recommendation {
            action: Action::AddContextual,
            source_url: source.to_string(),
            current_target: String::new(),
            suggested_target: target.to_string(),
            anchor: anchor.to_string(),
            link_position: "Content".to_string(),
            priority: Priority::High,
            reason: "Add".to_string(),
            notes: String::new(),
            curl_status: String::new(),
            curl_effective: String::new(),
        }
    }

    #[test]
    fn test_ga4_skips_preamble_and_sums_duplicates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ga4.csv");
        fs::write(
            &path,
            "# Pages and screens\n# Start date: 20240101\nPage path and screen class,Views,Engaged sessions\n/blog/a,\"1,200\",40\n/blog/a/,300,10\n/blog/b/,50,\n",
        )
        .unwrap();
        let pages = read_ga4(&path, &canon()).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].url, "https://www.x.com/blog/a/");
        assert_eq!(pages[0].views, 1500.0);
        assert_eq!(pages[0].engaged_sessions, 50.0);
    }

    #[test]
    fn test_utf16_dangling_byte_is_replaced_not_dropped() {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in "ab".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        bytes.push(0x00);
        assert_eq!(decode_export(&bytes), "ab\u{FFFD}");
        assert_eq!(decode_export(&[0xFF, 0xFE, b'a', 0x00]), "a");
        assert_eq!(decode_export("plain,utf8".as_bytes()), "plain,utf8");
    }

    #[test]
    fn test_utf16_ahrefs_export_and_ranking() {
        let text = "Referring page URL\tTarget URL\tNofollow\tIs spam\tLost\tRedirect Chain URLs\n\
https://a.org/p\thttps://www.x.com/blog/old/\tfalse\tfalse\t\thttps://www.x.com/blog/old/, https://www.x.com/blog/new/\n\
https://b.org/p\thttps://www.x.com/blog/new/\ttrue\tfalse\t\t\n\
https://c.org/p\thttps://www.x.com/blog/other/\tfalse\ttrue\t\t\n\
https://d.org/p\thttps://www.x.com/blog/other/\tfalse\tfalse\t2024-01-01\t\n";
        let mut bytes = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let decoded = decode_export(&bytes);
        let table = read_delimited_table("ahrefs", decoded.as_bytes(), b'\t').unwrap();
        let targets = aggregate_ahrefs(&table, &canon()).unwrap();

        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].url, "https://www.x.com/blog/new/");
        assert_eq!(targets[0].referring_domains, 2);
        assert_eq!(targets[0].dofollow, 1);
        assert!((targets[0].quality_weighted - 1.5).abs() < 1e-9);
        // the lost row does not count
        assert_eq!(targets[1].live_backlinks, 1);
        assert!((targets[1].quality_weighted - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_selection_union_forced_and_excluded() {
        let audited: BTreeSet<String> = ["https://www.x.com/blog/a/", "https://www.x.com/blog/b/", "https://www.x.com/blog/c/"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let ga4 = vec![
            Ga4Page { url: "https://www.x.com/blog/a/".into(), views: 10.0, engaged_sessions: 0.0 },
            Ga4Page { url: "https://www.x.com/blog/z/".into(), views: 99.0, engaged_sessions: 0.0 },
        ];
        let thresholds = HighPerfConfig { ga4_top_n: 1, gsc_top_n: 1, ahrefs_top_n: 1 };
        let extra = ["https://www.x.com/blog/b/", "https://www.x.com/blog/outside/"].iter().map(|s| s.to_string()).collect();
        let exclude = ["https://www.x.com/blog/a/"].iter().map(|s| s.to_string()).collect();
        let sel = Selection::build(audited, &ga4, &[], &[], extra, exclude, &thresholds);

        // z is not an audited source, so a wins GA4 and is then excluded
        assert!(sel.ga4_top.contains("https://www.x.com/blog/a/"));
        assert_eq!(sel.forced.len(), 1);
        assert_eq!(
            sel.high_performers.iter().collect::<Vec<_>>(),
            vec!["https://www.x.com/blog/b/"]
        );
        let sheet = sel.evidence_sheet(&ga4, &[], &thresholds);
        assert!(sheet.column_index("Excluded (QA)").is_some());
        assert_eq!(sheet.data_len(), 3);
    }

    #[test]
    fn test_invariants() {
        let t = "https://www.x.com/wisconsin/divorce/";
        let fixes = vec![];
        let dup = vec![add("https://www.x.com/blog/a/", t, "x"), add("https://www.x.com/blog/a/", t, "y")];
        assert!(matches!(
            check_invariants(&fixes, &fixes, &dup, 0.2, 5),
            Err(QaFailure::DuplicateAddSources { .. })
        ));

        let changed = vec![add("https://www.x.com/blog/a/", t, "x")];
        assert!(matches!(
            check_invariants(&changed, &fixes, &[], 0.2, 5),
            Err(QaFailure::FixRowsChanged)
        ));

        let same_anchor: Vec<Recommendation> = (0..5)
            .map(|i| add(&format!("https://www.x.com/blog/{}/", i), t, "divorce lawyer"))
            .collect();
        let err = check_invariants(&fixes, &fixes, &same_anchor, 0.2, 5).unwrap_err();
        assert!(err.to_string().contains("100.0%"));
    }
}
