//! High-performer pass over a baseline audit of the fixture site.

mod common;

use common::fixtures::{config, fixture_path, outputs_in, silent_logger, site_paths, url};
use linkaudit::config::AppConfig;
use linkaudit::export::read_recommendations_csv;
use linkaudit::highperf::{run_highperf, HighPerfPaths, SHEET_AHREFS, SHEET_HIGHPERF};
use linkaudit::pipeline::{run_audit, SHEET_ADDS};
use linkaudit::recommend::Action;
use linkaudit::report::read_workbook;
use std::collections::BTreeSet;
use std::path::Path;
use tempfile::TempDir;

fn paths(dir: &Path, exclude: bool) -> HighPerfPaths {
    HighPerfPaths {
        baseline_xlsx: dir.join("base.xlsx"),
        baseline_csv: dir.join("base.csv"),
        core_pages: fixture_path("site/core_pages.csv"),
        ga4: fixture_path("perf/ga4.csv"),
        gsc: fixture_path("perf/gsc.csv"),
        ahrefs: fixture_path("perf/ahrefs.tsv"),
        exclude_sources: exclude.then(|| fixture_path("perf/exclude_sources.csv")),
        out_xlsx: dir.join("hp.xlsx"),
        out_csv: dir.join("hp.csv"),
        out_rationale_csv: dir.join("hp_anchor_rationale.csv"),
        ..HighPerfPaths::default()
    }
}

fn thresholds(ga4: usize, gsc: usize, ahrefs: usize) -> AppConfig {
    let mut config = config();
    config.highperf.ga4_top_n = ga4;
    config.highperf.gsc_top_n = gsc;
    config.highperf.ahrefs_top_n = ahrefs;
    config
}

fn baseline(dir: &Path) {
    run_audit(&site_paths(false), &outputs_in(dir, "base"), &config(), &silent_logger()).unwrap();
}

#[test]
fn test_union_of_top_lists_minus_exclusions() {
    let dir = TempDir::new().unwrap();
    baseline(dir.path());

    let outcome = run_highperf(&paths(dir.path(), true), &thresholds(1, 2, 20), &silent_logger()).unwrap();

    let expected: BTreeSet<String> = [url("/blog/uncontested-divorce-guide/"), url("/blog/what-is-mediation/")]
        .into_iter()
        .collect();
    assert_eq!(outcome.selection.high_performers, expected);
    assert!(outcome.selection.excluded.contains(&url("/blog/custody-schedules/")));
    assert!(outcome.selection.ahrefs_top.contains(&url("/blog/what-is-mediation/")));

    let sources: BTreeSet<String> = outcome.adds.iter().map(|r| r.source_url.clone()).collect();
    assert_eq!(sources, expected);
    assert!(outcome.adds.iter().all(|r| !r.anchor.is_empty()));
}

#[test]
fn test_fix_rows_pass_through_unchanged() {
    let dir = TempDir::new().unwrap();
    baseline(dir.path());
    run_highperf(&paths(dir.path(), false), &thresholds(1, 0, 0), &silent_logger()).unwrap();

    let base = read_recommendations_csv(&dir.path().join("base.csv")).unwrap();
    let narrowed = read_recommendations_csv(&dir.path().join("hp.csv")).unwrap();
    let fixes = |recs: &[linkaudit::Recommendation]| {
        recs.iter()
            .filter(|r| r.action.is_fix())
            .map(|r| r.to_csv_row())
            .collect::<Vec<_>>()
    };
    assert_eq!(fixes(&base), fixes(&narrowed));

    let adds: Vec<_> = narrowed.iter().filter(|r| r.action == Action::AddContextual).collect();
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0].source_url, url("/blog/uncontested-divorce-guide/"));
}

#[test]
fn test_workbook_gets_evidence_sheets() {
    let dir = TempDir::new().unwrap();
    baseline(dir.path());
    let outcome = run_highperf(&paths(dir.path(), true), &thresholds(1, 2, 20), &silent_logger()).unwrap();

    let model = read_workbook(&dir.path().join("hp.xlsx")).unwrap();
    assert_eq!(model.get(SHEET_ADDS).unwrap().data_len(), outcome.adds.len());
    assert!(model.get(SHEET_HIGHPERF).map(|s| s.hidden).unwrap_or(false));
    let ahrefs = model.get(SHEET_AHREFS).expect("ahrefs sheet");
    // every live internal target is listed, audited or not
    assert_eq!(ahrefs.data_len(), 2);
    assert!(dir.path().join("hp_anchor_rationale.csv").exists());
}
