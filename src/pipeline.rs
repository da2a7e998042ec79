//! `audit` and `dashboard` orchestration.
//!
//! Both commands share one flow: load and canonicalize every input, build the redirect
//! map and register, detect issues, generate FIX and ADD rows, assign anchors, run the
//! final QA pass, then render a workbook and the flat implementation list. They differ
//! only in which inputs they take and how the workbook is laid out.

use anyhow::{bail, Context, Result};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::anchors::{diversity_violations, AnchorBank, AnchorPolicy, AnchorRationale, AnchorSelector, BANK_HEADERS};
use crate::audit::{
    content_outlinks_current, core_outlinks_audit, core_page_summaries, executive_kpis, inbound_examples,
    inlink_audit, outbound_examples, redirect_spotlight, scope_rows, BlogMatcher, ContentOutlinkRow,
    CoreOutlinkRow, CorePageSummary, DashboardData, LinkExample, OverviewMetrics, RedirectSpotlight,
    METRIC_HEADERS, SETTING_HEADERS,
};
use crate::classifier::{load_metadata, load_rules, Classification, Classifier, PageMeta, ValidationIssue};
use crate::config::AppConfig;
use crate::curl_map::CurlMap;
use crate::edges::{Edge, EdgeNormalizer, LinkPosition};
use crate::export::{export_csv, export_rationale_csv, export_summary_json, ActionSummary};
use crate::ingest::{read_csv_table, read_edge_table, stream_hyperlinks_from_sources};
use crate::issues::{dedup_issues, Issue, IssueDetector};
use crate::logger::RunLogger;
use crate::recommend::{
    build_add_recommendations, build_fix_recommendations, dedup_recommendations, final_qa, future_targets,
    validate_fixes, Action, AddRouter, Recommendation,
};
use crate::redirects::{build_register, load_redirect_export, RedirectInstance, RedirectMap};
use crate::report::{write_workbook, Cell, Sheet, WorkbookModel, DASHBOARD_SHEET, OVERVIEW_SHEET};
use crate::taxonomy::{load_content_pages, synthesize_tier3, ContentPage, Taxonomy};
use crate::url_utils::{infer_internal_domain, Canonicalizer};

pub const SHEET_INLINKS: &str = "Inlinks Audit";
pub const SHEET_CORE_OUTLINKS: &str = "Core Pages Outlinks Audit";
pub const SHEET_CONTENT_OUTLINKS: &str = "Content Outlinks (Current)";
pub const SHEET_REDIRECTS: &str = "Redirecting Links (3xx)";
pub const SHEET_QA_ISSUES: &str = "QA Issues";
pub const SHEET_FIXES: &str = "Recommendations (Fix Existing)";
pub const SHEET_ADDS: &str = "Recommendations (Add Links)";
pub const SHEET_ANCHOR_BANK: &str = "Anchor Bank";
pub const SHEET_ANCHOR_RATIONALE: &str = "Anchor Rationale";
pub const SHEET_TARGET_UNIVERSE: &str = "Target Universe";
pub const SHEET_URL_BUCKETS: &str = "URL Buckets";
pub const SHEET_CLASSIFIER_WARNINGS: &str = "Classifier Warnings";

pub const TARGET_UNIVERSE_HEADERS: [&str; 10] = [
    "Target URL",
    "Tier",
    "Cluster ID",
    "Parent Cluster ID",
    "Practice Area",
    "H1",
    "Source Hubs",
    "Occurrences",
    "Curl Final Status",
    "Curl Effective URL",
];

pub const REDIRECT_SHEET_HEADERS: [&str; 10] = [
    "Source URL",
    "Current Target URL",
    "Suggested Target URL",
    "Curl Final Status",
    "Curl Effective URL",
    "Status Code",
    "Anchor Text",
    "Link Position",
    "Bucket",
    "Evidence Source",
];

pub const QA_ANCHOR_DIVERSITY: &str = " [QA FAIL: Anchor diversity]";

/// A per-cluster edge export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterExport {
    pub cluster: String,
    pub path: PathBuf,
}

/// Every input a run may read
#[derive(Debug, Clone, Default)]
pub struct SourcePaths {
    pub core_pages: PathBuf,
    pub content_pages: PathBuf,
    pub content_outlinks: PathBuf,
    pub redirect_3xx: Option<PathBuf>,
    pub inlinks: Vec<ClusterExport>,
    pub outlinks: Vec<ClusterExport>,
    pub curl_map: Option<PathBuf>,
    pub metadata: Option<PathBuf>,
    pub bucket_rules: Option<PathBuf>,
    pub anchor_bank: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct OutputPaths {
    pub xlsx: PathBuf,
    pub csv: PathBuf,
    pub rationale_csv: Option<PathBuf>,
    pub summary_json: Option<PathBuf>,
}

/// Read a `Cluster ID, inlinks_path, outlinks_path` map; relative paths resolve against the map's directory
pub fn load_core_exports_map(path: &Path) -> Result<(Vec<ClusterExport>, Vec<ClusterExport>)> {
    let table = read_csv_table(path)?;
    table.require_columns(&["Cluster ID"])?;
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let resolve = |raw: &str| -> Option<PathBuf> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let p = PathBuf::from(raw);
        Some(if p.is_absolute() { p } else { base.join(p) })
    };

    let mut inlinks = Vec::new();
    let mut outlinks = Vec::new();
    for record in table.records() {
        let cluster = record.get_trimmed("Cluster ID").to_string();
        if cluster.is_empty() {
            continue;
        }
        if let Some(p) = resolve(record.get("inlinks_path")) {
            inlinks.push(ClusterExport { cluster: cluster.clone(), path: p });
        }
        if let Some(p) = resolve(record.get("outlinks_path")) {
            outlinks.push(ClusterExport { cluster, path: p });
        }
    }
    Ok((inlinks, outlinks))
}

/// Canonicalized inputs of one run
pub struct LoadedInputs {
    pub canon: Canonicalizer,
    pub taxonomy: Taxonomy,
    pub pages: Vec<ContentPage>,
    pub curl: CurlMap,
    pub redirects: RedirectMap,
    pub exported_redirects: Vec<RedirectInstance>,
    /// Hyperlinks whose source is a content page
    pub content_edges: Vec<Edge>,
    /// Per-cluster inlink exports
    pub inlink_edges: Vec<Edge>,
    /// Per-cluster core page outlink exports
    pub outlink_edges: Vec<Edge>,
    pub metadata: HashMap<String, PageMeta>,
    pub classifier: Classifier,
    pub rule_issues: Vec<ValidationIssue>,
    pub anchor_bank: Option<AnchorBank>,
}

impl LoadedInputs {
    pub fn content_urls(&self) -> HashSet<String> {
        self.pages.iter().map(|p| p.url.clone()).collect()
    }

    pub fn blog_matcher(&self, config: &AppConfig) -> BlogMatcher {
        BlogMatcher::new(self.content_urls(), &config.site.blog_path_marker)
    }

    /// Edges pointing into targets: the per-cluster inlink exports when given, else content outlinks
    pub fn inbound_edges(&self) -> Vec<&Edge> {
        if self.inlink_edges.is_empty() {
            self.content_edges.iter().collect()
        } else {
            self.inlink_edges.iter().collect()
        }
    }

    pub fn detector<'a>(&'a self, config: &'a AppConfig) -> Result<IssueDetector<'a>> {
        IssueDetector::new(config, &self.canon, &self.taxonomy, &self.redirects, &self.curl)
    }
}

fn resolve_internal_domain(config: &AppConfig, core_table: &crate::ingest::Table) -> Result<String> {
    if !config.site.internal_domain.trim().is_empty() {
        return Ok(config.site.internal_domain.trim().to_string());
    }
    let Some(col) = core_table.find_column(&["URL", "URLs"]) else {
        bail!("Core pages file {} has no URL column", core_table.name);
    };
    let urls: Vec<&str> = core_table.records().map(|r| r.at(col)).collect();
    infer_internal_domain(urls.iter().copied())
        .with_context(|| format!("Cannot infer the internal domain from {}; pass --internal_domain", core_table.name))
}

fn load_cluster_exports(
    exports: &[ClusterExport],
    normalizer: &EdgeNormalizer,
    logger: &RunLogger,
    what: &str,
) -> Result<Vec<Edge>> {
    let mut edges = Vec::new();
    for export in exports {
        let table = read_edge_table(&export.path)
            .with_context(|| format!("Failed to load {} export for cluster {}", what, export.cluster))?;
        logger.log_input_loaded(&format!("{} ({})", what, export.cluster), &export.path, table.len());
        edges.extend(normalizer.normalize_hyperlinks(&table, &export.cluster));
    }
    Ok(edges)
}

/// Load and canonicalize every input. Schema problems fail here, before any output exists.
pub fn load_inputs(paths: &SourcePaths, config: &AppConfig, logger: &RunLogger) -> Result<LoadedInputs> {
    logger.log_stage("Loading inputs");
    let core_table = read_csv_table(&paths.core_pages)?;
    logger.log_input_loaded("core pages", &paths.core_pages, core_table.len());
    let domain = resolve_internal_domain(config, &core_table)?;
    let canon = Canonicalizer::new(&domain);
    logger.debug(&format!("Internal netloc: {}", canon.internal_netloc()));

    let curl = match &paths.curl_map {
        Some(path) => {
            let curl = CurlMap::load(path, &canon)?;
            logger.log_input_loaded("curl map", path, curl.len());
            curl
        }
        None => CurlMap::default(),
    };

    let (mut redirects, exported_redirects) = match &paths.redirect_3xx {
        Some(path) => {
            let table = read_csv_table(path)?;
            logger.log_input_loaded("redirect export", path, table.len());
            load_redirect_export(&table, &canon)
                .with_context(|| format!("Invalid redirect export: {}", path.display()))?
        }
        None => (RedirectMap::default(), Vec::new()),
    };
    redirects.merge_curl(&curl);
    debug!("Redirect map holds {} entries", redirects.len());

    let taxonomy = Taxonomy::load(core_table, &canon, config)?;
    if taxonomy.core_pages().next().is_none() {
        bail!("No in-scope Tier-1 core pages found in {}", paths.core_pages.display());
    }
    let content_table = read_csv_table(&paths.content_pages)?;
    logger.log_input_loaded("content pages", &paths.content_pages, content_table.len());
    let pages = load_content_pages(content_table, &canon)?;

    let normalizer = EdgeNormalizer::new(&canon, &redirects, &config.site.scope_prefix);
    let sources: HashSet<String> = pages.iter().map(|p| p.url.clone()).collect();
    logger.start_spinner("Streaming content outlinks");
    let (table, stats) = stream_hyperlinks_from_sources(
        &paths.content_outlinks,
        &sources,
        &canon,
        config.ingest.chunk_rows,
        |stats| {
            logger.update_progress(&format!(
                "Content outlinks: {} rows read, {} kept ({} chunks)",
                stats.rows_read, stats.rows_kept, stats.chunks
            ))
        },
    )?;
    logger.finish_progress(&format!(
        "Content outlinks streamed: {} rows read, {} hyperlinks kept",
        stats.rows_read, stats.rows_kept
    ));
    logger.record_input_rows(stats.rows_read);
    let content_edges = normalizer.normalize_hyperlinks(&table, "");

    let inlink_edges = load_cluster_exports(&paths.inlinks, &normalizer, logger, "inlinks")?;
    let outlink_edges = load_cluster_exports(&paths.outlinks, &normalizer, logger, "outlinks")?;
    logger.record_edges_kept(content_edges.len() + inlink_edges.len() + outlink_edges.len());

    let metadata = match &paths.metadata {
        Some(path) => {
            let table = read_csv_table(path)?;
            logger.log_input_loaded("page metadata", path, table.len());
            load_metadata(&table, &canon)
        }
        None => HashMap::new(),
    };
    let (rules, rule_issues) = match &paths.bucket_rules {
        Some(path) => load_rules(path)?,
        None => (Vec::new(), Vec::new()),
    };
    let anchor_bank = match &paths.anchor_bank {
        Some(path) => {
            let table = read_csv_table(path)?;
            logger.log_input_loaded("anchor bank", path, table.len());
            Some(AnchorBank::from_table(&table).with_context(|| format!("Invalid anchor bank: {}", path.display()))?)
        }
        None => None,
    };

    Ok(LoadedInputs {
        canon,
        taxonomy,
        pages,
        curl,
        redirects,
        exported_redirects,
        content_edges,
        inlink_edges,
        outlink_edges,
        metadata,
        classifier: Classifier::new(rules),
        rule_issues,
        anchor_bank,
    })
}

/// Everything derived from the inputs
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub register: Vec<RedirectInstance>,
    pub issues: Vec<Issue>,
    /// ADD rows first, then FIX rows
    pub recommendations: Vec<Recommendation>,
    pub rationale: Vec<AnchorRationale>,
    pub bank: AnchorBank,
    pub classifications: Vec<Classification>,
    pub classifier_warnings: Vec<ValidationIssue>,
}

impl Analysis {
    pub fn fixes(&self) -> impl Iterator<Item = &Recommendation> {
        self.recommendations.iter().filter(|r| r.action.is_fix())
    }

    pub fn adds(&self) -> impl Iterator<Item = &Recommendation> {
        self.recommendations.iter().filter(|r| r.action == Action::AddContextual)
    }
}

fn classification_urls(inputs: &LoadedInputs) -> BTreeSet<String> {
    let mut urls: BTreeSet<String> = inputs.taxonomy.urls().into_iter().collect();
    urls.extend(inputs.pages.iter().map(|p| p.url.clone()));
    for edge in inputs
        .content_edges
        .iter()
        .chain(&inputs.inlink_edges)
        .chain(&inputs.outlink_edges)
        .filter(|e| e.is_internal)
    {
        urls.insert(edge.from_url.clone());
        if !edge.canonical_target.is_empty() {
            urls.insert(edge.canonical_target.clone());
        }
    }
    urls
}

/// Detect issues, build recommendations and anchors, and run the final QA pass
pub fn analyze(inputs: &mut LoadedInputs, config: &AppConfig, logger: &RunLogger) -> Result<Analysis> {
    let hub_edges: Vec<&Edge> = inputs.outlink_edges.iter().collect();
    let tier3 = synthesize_tier3(&hub_edges, &inputs.taxonomy, config);
    logger.debug(&format!("Tier-3 targets synthesized: {}", tier3.len()));
    inputs.taxonomy.set_tier3(tier3);
    let inputs: &LoadedInputs = inputs;

    logger.log_stage("Detecting issues");
    let backfill: Vec<&Edge> = inputs.content_edges.iter().chain(&inputs.outlink_edges).collect();
    let register = build_register(&inputs.exported_redirects, &backfill, &inputs.redirects, &inputs.curl);

    let detector = inputs.detector(config)?;
    let mut issues = Vec::new();
    for edge in &inputs.content_edges {
        issues.extend(detector.edge_issues(edge, "Content outlinks"));
    }
    for edge in &inputs.outlink_edges {
        issues.extend(detector.edge_issues(edge, "Core outlinks"));
    }
    issues.extend(detector.redirect_issues(&register));
    for core in inputs.taxonomy.core_pages() {
        issues.extend(detector.hub_issues(&core.url, &hub_edges));
    }
    let sources_in_export: HashSet<String> = inputs.content_edges.iter().map(|e| e.from_url.clone()).collect();
    issues.extend(detector.content_source_issues(&inputs.pages, &sources_in_export));
    let issues = dedup_issues(issues);
    logger.record_issues(issues.len());
    info!("Detected {} issues ({} redirect register rows)", issues.len(), register.len());

    logger.log_stage("Building recommendations");
    let mut fixes = build_fix_recommendations(&issues);
    validate_fixes(&mut fixes, &inputs.curl);

    let router = AddRouter::new(config, &inputs.taxonomy, &inputs.pages)?;
    let content_refs: Vec<&Edge> = inputs.content_edges.iter().collect();
    let future = future_targets(&content_refs, &fixes);
    let adds = build_add_recommendations(&inputs.pages, &router, &future, &inputs.curl);

    let mut recommendations = adds;
    recommendations.extend(fixes);

    let policy = AnchorPolicy::new(&config.anchors)?;
    let bank = match &inputs.anchor_bank {
        Some(bank) => bank.clone(),
        None => AnchorBank::generate(&inputs.taxonomy, config, &policy),
    };
    let selector = AnchorSelector::from_taxonomy(&bank, &inputs.taxonomy, &config.anchors).with_policy(&policy);
    let rationale = selector.assign(&mut recommendations);

    final_qa(&mut recommendations, &inputs.curl, &detector, &router);
    let mut recommendations = dedup_recommendations(recommendations);

    let violations = diversity_violations(
        &recommendations,
        config.anchors.diversity_min_links,
        config.anchors.max_top_share,
    );
    for (target, share) in &violations {
        warn!("Anchor diversity: top anchor share {:.0}% for {}", share * 100.0, target);
        logger.warn(&format!("Anchor diversity above limit for {} ({:.0}%)", target, share * 100.0));
        for rec in recommendations.iter_mut().filter(|r| &r.suggested_target == target) {
            rec.append_note(QA_ANCHOR_DIVERSITY);
        }
    }

    let (classifications, mut classifier_warnings) = inputs
        .classifier
        .classify_all(classification_urls(inputs).iter().map(String::as_str), &inputs.metadata);
    let mut warnings = inputs.rule_issues.clone();
    warnings.append(&mut classifier_warnings);

    let adds = recommendations.iter().filter(|r| r.action == Action::AddContextual).count();
    logger.record_actions(recommendations.len() - adds, adds);
    logger.record_qa_annotations(recommendations.iter().filter(|r| r.notes.contains("[QA")).count());

    Ok(Analysis {
        register,
        issues,
        recommendations,
        rationale,
        bank,
        classifications,
        classifier_warnings: warnings,
    })
}

// ---------------------------------------------------------------------------
// Sheets
// ---------------------------------------------------------------------------

fn recommendation_sheet<'r>(name: &str, recs: impl Iterator<Item = &'r Recommendation>) -> Sheet {
    let mut sheet = Sheet::table(name, &Recommendation::sheet_headers());
    for rec in recs {
        sheet.push_text(rec.to_sheet_row());
    }
    sheet
}

fn redirect_sheet(register: &[RedirectInstance], curl: &CurlMap) -> Sheet {
    let mut sheet = Sheet::table(SHEET_REDIRECTS, &REDIRECT_SHEET_HEADERS);
    for row in register {
        let probe = if row.final_url.is_empty() { &row.to_url } else { &row.final_url };
        let (status, effective) = curl
            .get(probe)
            .map(|c| (c.final_status.to_string(), c.effective_url.clone()))
            .unwrap_or_default();
        sheet.push_text(vec![
            row.from_url.clone(),
            row.to_url.clone(),
            row.final_url.clone(),
            status,
            effective,
            row.status_code.clone(),
            row.anchor.clone(),
            row.link_position.clone(),
            LinkPosition::from_label(&row.link_position).as_str().to_string(),
            row.evidence.clone(),
        ]);
    }
    sheet
}

fn target_universe_sheet(taxonomy: &Taxonomy, curl: &CurlMap) -> Sheet {
    let mut sheet = Sheet::table(SHEET_TARGET_UNIVERSE, &TARGET_UNIVERSE_HEADERS);
    let curl_cells = |url: &str| -> (String, String) {
        curl.get(url)
            .map(|c| (c.final_status.to_string(), c.effective_url.clone()))
            .unwrap_or_default()
    };
    for target in taxonomy.targets() {
        let (status, effective) = curl_cells(&target.url);
        sheet.push(vec![
            Cell::from(&target.url),
            Cell::from(target.tier.as_str()),
            Cell::from(&target.cluster_id),
            Cell::from(&target.parent_cluster_id),
            Cell::from(&target.practice_area),
            Cell::from(&target.h1),
            Cell::from(""),
            Cell::from(""),
            Cell::from(status),
            Cell::from(effective),
        ]);
    }
    for candidate in taxonomy.tier3() {
        let (status, effective) = curl_cells(&candidate.url);
        sheet.push(vec![
            Cell::from(&candidate.url),
            Cell::from("Tier-3"),
            Cell::from(""),
            Cell::from(""),
            Cell::from(""),
            Cell::from(""),
            Cell::from(candidate.source_hubs_label()),
            Cell::from(candidate.occurrences),
            Cell::from(status),
            Cell::from(effective),
        ]);
    }
    sheet
}

/// Detail sheets shared by both workbook layouts
pub fn appendix_sheets(inputs: &LoadedInputs, analysis: &Analysis, config: &AppConfig) -> Result<Vec<Sheet>> {
    let detector = inputs.detector(config)?;
    let blogs = inputs.blog_matcher(config);
    let mut sheets = Vec::new();

    let inlinks = inlink_audit(&inputs.inbound_edges(), &inputs.taxonomy, &blogs);
    let mut sheet = Sheet::table(SHEET_INLINKS, &inlinks.headers());
    for row in &inlinks.rows {
        sheet.push(row.to_cells(&inlinks.position_labels));
    }
    sheets.push(sheet);

    let hub_edges: Vec<&Edge> = inputs.outlink_edges.iter().collect();
    let mut sheet = Sheet::table(SHEET_CORE_OUTLINKS, &CoreOutlinkRow::HEADERS);
    for row in core_outlinks_audit(&hub_edges, &inputs.taxonomy, &detector, &config.site.scope_prefix) {
        sheet.push(row.to_cells());
    }
    sheets.push(sheet);

    let content_refs: Vec<&Edge> = inputs.content_edges.iter().collect();
    let mut sheet = Sheet::table(SHEET_CONTENT_OUTLINKS, &ContentOutlinkRow::HEADERS);
    for row in content_outlinks_current(&content_refs, &inputs.content_urls()) {
        sheet.push(row.to_cells());
    }
    sheets.push(sheet);

    sheets.push(redirect_sheet(&analysis.register, &inputs.curl));

    let mut sheet = Sheet::table(SHEET_QA_ISSUES, &Issue::HEADERS);
    for issue in &analysis.issues {
        sheet.push_text(issue.to_row());
    }
    sheets.push(sheet);

    sheets.push(recommendation_sheet(SHEET_FIXES, analysis.fixes()));
    sheets.push(recommendation_sheet(SHEET_ADDS, analysis.adds()));

    let mut sheet = Sheet::table(SHEET_ANCHOR_BANK, &BANK_HEADERS);
    for row in analysis.bank.to_rows() {
        sheet.push_text(row);
    }
    sheets.push(sheet);

    let mut sheet = Sheet::table(SHEET_ANCHOR_RATIONALE, &AnchorRationale::HEADERS);
    for row in &analysis.rationale {
        sheet.push_text(row.to_row());
    }
    sheets.push(sheet);

    sheets.push(target_universe_sheet(&inputs.taxonomy, &inputs.curl));

    let mut sheet = Sheet::table(SHEET_URL_BUCKETS, &Classification::HEADERS);
    for row in &analysis.classifications {
        sheet.push_text(row.to_row());
    }
    sheets.push(sheet);

    let mut sheet = Sheet::table(SHEET_CLASSIFIER_WARNINGS, &ValidationIssue::HEADERS);
    for row in &analysis.classifier_warnings {
        sheet.push_text(row.to_row());
    }
    sheets.push(sheet);

    Ok(sheets)
}

pub fn dashboard_sheet(inputs: &LoadedInputs, analysis: &Analysis, config: &AppConfig) -> Result<Sheet> {
    let detector = inputs.detector(config)?;
    let blogs = inputs.blog_matcher(config);
    let inbound = inputs.inbound_edges();
    let outbound: Vec<&Edge> = inputs.outlink_edges.iter().collect();
    let data = DashboardData {
        taxonomy: &inputs.taxonomy,
        inlinks: &inbound,
        outlinks: &outbound,
        register: &analysis.register,
        recommendations: &analysis.recommendations,
        blogs: &blogs,
        detector: &detector,
    };

    let mut sheet = Sheet::grid(DASHBOARD_SHEET);
    sheet.push_section("Scope & Rules", &SETTING_HEADERS, scope_rows(config, inputs.canon.internal_netloc()));
    sheet.push_section(
        "Executive KPIs",
        &METRIC_HEADERS,
        executive_kpis(
            inputs.taxonomy.core_pages().count(),
            inputs.pages.len(),
            &analysis.register,
            &analysis.recommendations,
        ),
    );
    sheet.push_section(
        "Core Pages",
        &CorePageSummary::HEADERS,
        core_page_summaries(&data).iter().map(CorePageSummary::to_cells).collect(),
    );
    sheet.push_section(
        "Top Inbound Examples (Content)",
        &LinkExample::INBOUND_HEADERS,
        inbound_examples(&data).iter().map(LinkExample::to_cells).collect(),
    );
    sheet.push_section(
        "Top Outbound Examples",
        &LinkExample::OUTBOUND_HEADERS,
        outbound_examples(&data).iter().map(LinkExample::to_cells).collect(),
    );
    sheet.push_section(
        "Redirect Hygiene Spotlight",
        &RedirectSpotlight::HEADERS,
        redirect_spotlight(&analysis.register).iter().map(RedirectSpotlight::to_cells).collect(),
    );
    Ok(sheet)
}

pub fn overview_sheet(inputs: &LoadedInputs, analysis: &Analysis) -> Sheet {
    let content_refs: Vec<&Edge> = inputs.content_edges.iter().collect();
    let metrics = OverviewMetrics::compute(
        &inputs.content_urls(),
        &content_refs,
        &inputs.taxonomy,
        &analysis.recommendations,
    );
    let mut sheet = Sheet::table(OVERVIEW_SHEET, &METRIC_HEADERS);
    for row in metrics.to_rows() {
        sheet.push(row);
    }
    sheet
}

fn write_outputs(
    model: &WorkbookModel,
    analysis: &Analysis,
    outputs: &OutputPaths,
    logger: &RunLogger,
) -> Result<()> {
    logger.log_stage("Writing outputs");
    write_workbook(model, &outputs.xlsx)?;
    logger.log_export_success(&outputs.xlsx);
    export_csv(&analysis.recommendations, &outputs.csv)?;
    logger.log_export_success(&outputs.csv);
    if let Some(path) = &outputs.rationale_csv {
        export_rationale_csv(&analysis.rationale, path)?;
        logger.log_export_success(path);
    }
    if let Some(path) = &outputs.summary_json {
        export_summary_json(&ActionSummary::from_recommendations(&analysis.recommendations), path)?;
        logger.log_export_success(path);
    }
    Ok(())
}

/// Dashboard layout: visible Dashboard sheet, appendices optionally hidden
pub fn run_dashboard(
    paths: &SourcePaths,
    outputs: &OutputPaths,
    hide_appendices: bool,
    config: &AppConfig,
    logger: &RunLogger,
) -> Result<Analysis> {
    let mut inputs = load_inputs(paths, config, logger)?;
    let analysis = analyze(&mut inputs, config, logger)?;

    let mut model = WorkbookModel::new();
    model.push(dashboard_sheet(&inputs, &analysis, config)?);
    for sheet in appendix_sheets(&inputs, &analysis, config)? {
        model.push(if hide_appendices { sheet.hidden() } else { sheet });
    }
    write_outputs(&model, &analysis, outputs, logger)?;
    Ok(analysis)
}

/// Audit layout: Overview metrics followed by every detail sheet
pub fn run_audit(paths: &SourcePaths, outputs: &OutputPaths, config: &AppConfig, logger: &RunLogger) -> Result<Analysis> {
    let mut inputs = load_inputs(paths, config, logger)?;
    let analysis = analyze(&mut inputs, config, logger)?;

    let mut model = WorkbookModel::new();
    model.push(overview_sheet(&inputs, &analysis));
    for sheet in appendix_sheets(&inputs, &analysis, config)? {
        model.push(sheet);
    }
    write_outputs(&model, &analysis, outputs, logger)?;
    Ok(analysis)
}

/// Rows for a standalone classifier run: (buckets, warnings)
pub fn run_classify(
    urls_path: &Path,
    metadata_path: Option<&Path>,
    rules_path: Option<&Path>,
    config: &AppConfig,
) -> Result<(Vec<Classification>, Vec<ValidationIssue>)> {
    let table = read_csv_table(urls_path)?;
    let Some(url_col) = table.find_column(&["URL", "Address", "URLs", "Content URL"]) else {
        bail!("{} has no URL column", urls_path.display());
    };
    let urls: Vec<&str> = table.records().map(|r| r.at(url_col)).collect();
    let domain = if config.site.internal_domain.trim().is_empty() {
        infer_internal_domain(urls.iter().copied()).unwrap_or_default()
    } else {
        config.site.internal_domain.clone()
    };
    let canon = Canonicalizer::new(&domain);
    let canonical: Vec<String> = urls.iter().map(|u| canon.canonical(u)).collect();

    let metadata = match metadata_path {
        Some(path) => load_metadata(&read_csv_table(path)?, &canon),
        None => HashMap::new(),
    };
    let (rules, mut warnings) = match rules_path {
        Some(path) => load_rules(path)?,
        None => (Vec::new(), Vec::new()),
    };
    let (classifications, mut issues) =
        Classifier::new(rules).classify_all(canonical.iter().map(String::as_str), &metadata);
    warnings.append(&mut issues);
    Ok((classifications, warnings))
}
