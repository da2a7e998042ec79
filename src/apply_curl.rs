//! `apply-curl-map` post-pass over a finished run.
//!
//! Re-reads the workbook and the implementation list, folds a curl map into both, and
//! writes them back. Applying the same map twice leaves the CSV unchanged.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::audit::{KPI_ADDS, KPI_DASHBOARD_ADDS, KPI_FIXES};
use crate::config::AppConfig;
use crate::curl_map::CurlMap;
use crate::export::{export_csv, read_recommendations_csv};
use crate::issues::IssueDetector;
use crate::logger::RunLogger;
use crate::pipeline::{SHEET_ADDS, SHEET_CORE_OUTLINKS, SHEET_FIXES, SHEET_REDIRECTS, SHEET_TARGET_UNIVERSE};
use crate::recommend::{attach_curl_columns, dedup_recommendations, Action, Recommendation, QA_DEST_404};
use crate::redirects::RedirectMap;
use crate::report::{read_workbook, write_workbook, Cell, Sheet, WorkbookModel, DASHBOARD_SHEET, OVERVIEW_SHEET};
use crate::taxonomy::Taxonomy;
use crate::url_utils::{infer_internal_domain, Canonicalizer};

#[derive(Debug, Clone)]
pub struct ApplyCurlPaths {
    pub xlsx_in: PathBuf,
    pub csv_in: PathBuf,
    pub curl_map: PathBuf,
    pub xlsx_out: PathBuf,
    pub csv_out: PathBuf,
}

/// What a pass changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub dropped_adds: usize,
    pub filled_suggestions: usize,
    pub normalized_suggestions: usize,
    pub relabeled_fixes: usize,
}

impl ApplyStats {
    fn absorb(&mut self, other: ApplyStats) {
        self.dropped_adds += other.dropped_adds;
        self.filled_suggestions += other.filled_suggestions;
        self.normalized_suggestions += other.normalized_suggestions;
        self.relabeled_fixes += other.relabeled_fixes;
    }
}

/// Fold the curl map into a list of recommendations
pub fn apply_to_recommendations(
    recs: Vec<Recommendation>,
    curl: &CurlMap,
    detector: &IssueDetector,
) -> (Vec<Recommendation>, ApplyStats) {
    let mut stats = ApplyStats::default();
    let before = recs.len();
    let mut recs: Vec<Recommendation> = recs
        .into_iter()
        .filter(|r| !(r.action == Action::AddContextual && curl.is_not_found(&r.source_url)))
        .collect();
    stats.dropped_adds = before - recs.len();

    for rec in recs.iter_mut() {
        if rec.action.is_fix() && rec.suggested_target.is_empty() && !rec.current_target.is_empty() {
            let replacement = match curl.ok_effective(&rec.current_target) {
                Some(eff) if eff != rec.current_target => eff.to_string(),
                _ => detector.malformed_rewrite(&rec.current_target),
            };
            if !replacement.is_empty() {
                rec.suggested_target = replacement;
                stats.filled_suggestions += 1;
            }
        }

        if let Some(eff) = curl.ok_effective(&rec.suggested_target) {
            if !rec.suggested_target.is_empty() && eff != rec.suggested_target {
                rec.suggested_target = eff.to_string();
                stats.normalized_suggestions += 1;
            }
        }

        attach_curl_columns(rec, curl);

        if rec.action == Action::FixRedirect && rec.curl_status.starts_with('4') {
            rec.action = Action::RemoveOrReplace;
            rec.append_note(QA_DEST_404);
            stats.relabeled_fixes += 1;
        }
    }
    (dedup_recommendations(recs), stats)
}

fn recommendation_rows(sheet: &Sheet) -> Vec<Recommendation> {
    let table = sheet.to_table();
    table.records().filter_map(|r| Recommendation::from_record(&r)).collect()
}

fn rebuild_recommendation_sheet(name: &str, recs: &[Recommendation]) -> Sheet {
    let mut sheet = Sheet::table(name, &Recommendation::sheet_headers());
    for rec in recs {
        sheet.push_text(rec.to_sheet_row());
    }
    sheet
}

/// Set the value of a `Metric, Value` row; returns false when the label is absent
pub fn set_metric(sheet: &mut Sheet, label: &str, value: usize) -> bool {
    for row in sheet.rows.iter_mut() {
        if row.first().map(Cell::text).as_deref() == Some(label) {
            if row.len() < 2 {
                row.resize(2, Cell::from(""));
            }
            row[1] = Cell::from(value);
            return true;
        }
    }
    false
}

/// Fill the curl columns of a tabular sheet from a probe column, falling back to a second one
fn fill_curl_columns(sheet: &mut Sheet, probes: &[&str], curl: &CurlMap) {
    let (Some(status_col), Some(eff_col)) = (
        sheet.column_index("Curl Final Status"),
        sheet.column_index("Curl Effective URL"),
    ) else {
        return;
    };
    let probe_cols: Vec<usize> = probes.iter().filter_map(|p| sheet.column_index(p)).collect();
    let width = status_col.max(eff_col) + 1;
    for row in sheet.rows.iter_mut().skip(1) {
        let key = probe_cols
            .iter()
            .filter_map(|&c| row.get(c).map(Cell::text))
            .find(|v| !v.is_empty())
            .unwrap_or_default();
        if row.len() < width {
            row.resize(width, Cell::from(""));
        }
        let (status, eff) = curl
            .get(&key)
            .map(|e| (e.final_status.to_string(), e.effective_url.clone()))
            .unwrap_or_default();
        row[status_col] = Cell::from(status);
        row[eff_col] = Cell::from(eff);
    }
}

/// Apply the curl map to every sheet the post-pass owns
pub fn apply_to_workbook(model: &mut WorkbookModel, curl: &CurlMap, detector: &IssueDetector) -> ApplyStats {
    let mut stats = ApplyStats::default();
    let mut counts = (0usize, 0usize);

    for (name, is_add) in [(SHEET_FIXES, false), (SHEET_ADDS, true)] {
        let Some(sheet) = model.get(name) else {
            continue;
        };
        let (recs, sheet_stats) = apply_to_recommendations(recommendation_rows(sheet), curl, detector);
        stats.absorb(sheet_stats);
        if is_add {
            counts.0 = recs.len();
        } else {
            counts.1 = recs.len();
        }
        model.replace(rebuild_recommendation_sheet(name, &recs));
    }

    if let Some(sheet) = model.get_mut(SHEET_REDIRECTS) {
        fill_curl_columns(sheet, &["Suggested Target URL", "Current Target URL"], curl);
    }
    if let Some(sheet) = model.get_mut(SHEET_TARGET_UNIVERSE) {
        sheet.rename_header("Source Hubs", "Source Core Pages");
        fill_curl_columns(sheet, &["Target URL"], curl);
    }
    if let Some(sheet) = model.get_mut(SHEET_CORE_OUTLINKS) {
        sheet.rename_header("Hub", "Core Page ID");
        sheet.rename_header("Hub URL", "Core Page URL");
    }
    if let Some(sheet) = model.get_mut(OVERVIEW_SHEET) {
        set_metric(sheet, KPI_ADDS, counts.0);
        set_metric(sheet, KPI_FIXES, counts.1);
    }
    if let Some(sheet) = model.get_mut(DASHBOARD_SHEET) {
        set_metric(sheet, KPI_DASHBOARD_ADDS, counts.0);
    }
    stats
}

/// Run the post-pass end to end
pub fn run_apply_curl(paths: &ApplyCurlPaths, config: &AppConfig, logger: &RunLogger) -> Result<ApplyStats> {
    logger.log_stage("Reading run outputs");
    let mut model = read_workbook(&paths.xlsx_in)?;
    let recs = read_recommendations_csv(&paths.csv_in)
        .with_context(|| format!("Failed to read implementation list: {}", paths.csv_in.display()))?;
    logger.log_input_loaded("implementation list", &paths.csv_in, recs.len());

    let domain = if config.site.internal_domain.trim().is_empty() {
        infer_internal_domain(recs.iter().map(|r| r.source_url.as_str())).unwrap_or_default()
    } else {
        config.site.internal_domain.trim().to_string()
    };
    debug!("Post-pass internal domain: {}", domain);
    let canon = Canonicalizer::new(&domain);
    let curl = CurlMap::load(&paths.curl_map, &canon)?;
    logger.log_input_loaded("curl map", &paths.curl_map, curl.len());

    let taxonomy = Taxonomy::default();
    let redirects = RedirectMap::default();
    let detector = IssueDetector::new(config, &canon, &taxonomy, &redirects, &curl)?;

    logger.log_stage("Applying curl map");
    let (recs, stats) = apply_to_recommendations(recs, &curl, &detector);
    apply_to_workbook(&mut model, &curl, &detector);
    info!(
        "Curl post-pass: {} ADDs dropped, {} suggestions filled, {} normalized, {} FIX rows relabeled",
        stats.dropped_adds, stats.filled_suggestions, stats.normalized_suggestions, stats.relabeled_fixes
    );
    let adds = recs.iter().filter(|r| r.action == Action::AddContextual).count();
    logger.record_actions(recs.len() - adds, adds);
    logger.record_qa_annotations(stats.relabeled_fixes);

    logger.log_stage("Writing outputs");
    write_workbook(&model, &paths.xlsx_out)?;
    logger.log_export_success(&paths.xlsx_out);
    export_csv(&recs, &paths.csv_out)?;
    logger.log_export_success(&paths.csv_out);
    Ok(stats)
}

/// Default output path next to an input: `run.xlsx` -> `run_curl.xlsx`
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    let ext = input.extension().and_then(|s| s.to_str()).unwrap_or("");
    let name = if ext.is_empty() {
        format!("{}_curl", stem)
    } else {
        format!("{}_curl.{}", stem, ext)
    };
    input.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recommend::Priority;

    const HOST: &str = "https://www.x.com";

    fn curl(rows: &[(&str, &str, &str)]) -> CurlMap {
        let canon = Canonicalizer::new("www.x.com");
        let rows: Vec<Vec<String>> = rows
            .iter()
            .map(|(u, s, e)| vec![u.to_string(), s.to_string(), e.to_string()])
            .collect();
        CurlMap::from_rows(&rows, &canon)
    }

    fn rec(action: Action, source: &str, current: &str, suggested: &str) -> Recommendation {
        Recommendation {
            action,
            source_url: format!("{}{}", HOST, source),
            current_target: if current.is_empty() { String::new() } else { format!("{}{}", HOST, current) },
            suggested_target: if suggested.is_empty() { String::new() } else { format!("{}{}", HOST, suggested) },
            anchor: String::new(),
            link_position: "Content".to_string(),
            priority: Priority::High,
            reason: "Reason".to_string(),
            notes: String::new(),
            curl_status: String::new(),
            curl_effective: String::new(),
        }
    }

    fn with_detector<T>(curl: &CurlMap, f: impl FnOnce(&IssueDetector) -> T) -> T {
        let config = AppConfig::embedded_default().unwrap();
        let canon = Canonicalizer::new("www.x.com");
        let taxonomy = Taxonomy::default();
        let redirects = RedirectMap::default();
        let detector = IssueDetector::new(&config, &canon, &taxonomy, &redirects, curl).unwrap();
        f(&detector)
    }

    #[test]
    fn test_404_destination_relabels_fix_redirect() {
        let curl = curl(&[("https://www.x.com/gone/", "404", "https://www.x.com/gone/")]);
        let recs = vec![rec(Action::FixRedirect, "/blog/a/", "/old/", "/gone/")];
        let (out, stats) = with_detector(&curl, |d| apply_to_recommendations(recs, &curl, d));
        assert_eq!(out[0].action, Action::RemoveOrReplace);
        assert!(out[0].notes.contains("[QA: final destination is 404]"));
        assert_eq!(out[0].curl_status, "404");
        assert_eq!(stats.relabeled_fixes, 1);
    }

    #[test]
    fn test_drops_adds_from_missing_sources_and_fills_suggestions() {
        let curl = curl(&[
            ("https://www.x.com/blog/dead/", "404", "https://www.x.com/blog/dead/"),
            ("https://www.x.com/old/", "200", "https://www.x.com/new/"),
        ]);
        let recs = vec![
            rec(Action::AddContextual, "/blog/dead/", "", "/wisconsin/divorce/"),
            rec(Action::FixRedirect, "/blog/a/", "/old/", ""),
        ];
        let (out, stats) = with_detector(&curl, |d| apply_to_recommendations(recs, &curl, d));
        assert_eq!(out.len(), 1);
        assert_eq!(stats.dropped_adds, 1);
        assert_eq!(out[0].suggested_target, "https://www.x.com/new/");
        assert_eq!(out[0].curl_status, "200");
    }

    #[test]
    fn test_second_application_is_a_no_op() {
        let curl = curl(&[
            ("https://www.x.com/b/", "301", "https://www.x.com/b-final/"),
            ("https://www.x.com/b-final/", "200", "https://www.x.com/b-final/"),
            ("https://www.x.com/gone/", "404", ""),
        ]);
        let recs = vec![
            rec(Action::FixRedirect, "/blog/a/", "/b/", "/b-final/"),
            rec(Action::FixRedirect, "/blog/c/", "/x/", "/gone/"),
        ];
        let (once, _) = with_detector(&curl, |d| apply_to_recommendations(recs, &curl, d));
        let (twice, stats) = with_detector(&curl, |d| apply_to_recommendations(once.clone(), &curl, d));
        let rows = |v: &[Recommendation]| v.iter().map(Recommendation::to_csv_row).collect::<Vec<_>>();
        assert_eq!(rows(&once), rows(&twice));
        assert_eq!(stats, ApplyStats::default());
    }

    #[test]
    fn test_workbook_renames_and_kpis() {
        let curl = curl(&[]);
        let mut model = WorkbookModel::new();
        let mut overview = Sheet::table(OVERVIEW_SHEET, &["Metric", "Value"]);
        overview.push(vec![Cell::from(KPI_ADDS), Cell::from(9usize)]);
        overview.push(vec![Cell::from(KPI_FIXES), Cell::from(9usize)]);
        model.push(overview);
        let mut adds = Sheet::table(SHEET_ADDS, &Recommendation::sheet_headers());
        adds.push_text(rec(Action::AddContextual, "/blog/a/", "", "/wisconsin/divorce/").to_sheet_row());
        model.push(adds);
        model.push(Sheet::table(SHEET_TARGET_UNIVERSE, &["Target URL", "Source Hubs", "Curl Final Status", "Curl Effective URL"]));
        model.push(Sheet::table(SHEET_CORE_OUTLINKS, &["Hub", "Hub URL"]));

        with_detector(&curl, |d| apply_to_workbook(&mut model, &curl, d));

        let overview = model.get(OVERVIEW_SHEET).unwrap();
        assert_eq!(overview.rows[1][1], Cell::Number(1.0));
        // no fix sheet in this workbook
        assert_eq!(overview.rows[2][1], Cell::Number(0.0));
        assert!(model.get(SHEET_TARGET_UNIVERSE).unwrap().column_index("Source Core Pages").is_some());
        assert_eq!(model.get(SHEET_CORE_OUTLINKS).unwrap().headers(), vec!["Core Page ID", "Core Page URL"]);
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(default_output_path(Path::new("out/run.xlsx")), PathBuf::from("out/run_curl.xlsx"));
    }
}
