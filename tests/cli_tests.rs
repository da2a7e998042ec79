//! Binary-level checks: argument surface, exit codes and files written.

mod common;

use assert_cmd::cargo::cargo_bin_cmd;
use common::fixtures::{fixture_path, read_csv};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn linkaudit(cwd: &TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("linkaudit");
    cmd.current_dir(cwd.path()).env_remove("RUST_LOG");
    cmd
}

fn site(name: &str) -> String {
    fixture_path(&format!("site/{}", name)).display().to_string()
}

fn audit_cmd(cwd: &TempDir) -> assert_cmd::Command {
    let mut cmd = linkaudit(cwd);
    cmd.args(["audit", "--wi_blogs"])
        .arg(site("content_pages.csv"))
        .arg("--core_subserv")
        .arg(site("core_pages.csv"))
        .arg("--all_blog_outlinks")
        .arg(site("content_outlinks.csv"))
        .arg("--inlinks_divorce")
        .arg(site("inlinks_divorce.csv"))
        .arg(format!("--outlinks_divorce={}", site("outlinks_divorce.csv")))
        .args(["--out_xlsx", "out/audit.xlsx", "--out_csv", "out/audit.csv"]);
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let cwd = TempDir::new().unwrap();
    linkaudit(&cwd)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("audit"))
        .stdout(predicate::str::contains("dashboard"))
        .stdout(predicate::str::contains("apply-curl-map"))
        .stdout(predicate::str::contains("highperf"));
}

#[test]
fn test_audit_with_cluster_flags_writes_outputs() {
    let cwd = TempDir::new().unwrap();
    audit_cmd(&cwd)
        .assert()
        .success()
        .stdout(predicate::str::contains("RUN SUMMARY"))
        .stdout(predicate::str::contains("Recommendation Summary"));

    assert!(cwd.path().join("out/audit.xlsx").exists());
    let (headers, rows) = read_csv(&cwd.path().join("out/audit.csv"));
    assert_eq!(headers[0], "Action");
    assert!(rows.iter().any(|r| r[0] == "ADD_CONTEXTUAL"));
}

#[test]
fn test_quiet_prints_only_final_summary() {
    let cwd = TempDir::new().unwrap();
    audit_cmd(&cwd)
        .arg("--quiet")
        .assert()
        .success()
        .stdout(predicate::str::contains("RUN SUMMARY"))
        .stdout(predicate::str::contains("Recommendation Summary").not());
}

#[test]
fn test_log_file_is_written() {
    let cwd = TempDir::new().unwrap();
    audit_cmd(&cwd).args(["--log_file", "logs/run.log"]).assert().success();

    let log = fs::read_to_string(cwd.path().join("logs/run.log")).unwrap();
    assert!(log.contains("INFO"));
}

#[test]
fn test_missing_column_exits_non_zero_without_outputs() {
    let cwd = TempDir::new().unwrap();
    linkaudit(&cwd)
        .args(["audit", "--wi_blogs"])
        .arg(site("content_pages.csv"))
        .arg("--core_subserv")
        .arg(site("core_pages.csv"))
        .arg("--all_blog_outlinks")
        .arg(site("content_outlinks_bad_schema.csv"))
        .args(["--out_xlsx", "audit.xlsx", "--out_csv", "audit.csv"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing required columns"));

    assert!(!cwd.path().join("audit.xlsx").exists());
    assert!(!cwd.path().join("audit.csv").exists());
}

#[test]
fn test_dashboard_from_exports_map() {
    let cwd = TempDir::new().unwrap();
    linkaudit(&cwd)
        .arg("dashboard")
        .arg("--core_pages")
        .arg(site("core_pages.csv"))
        .arg("--content_pages")
        .arg(site("content_pages.csv"))
        .arg("--content_outlinks")
        .arg(site("content_outlinks.csv"))
        .arg("--core_exports_map")
        .arg(site("core_exports_map.csv"))
        .arg("--curl_map")
        .arg(site("curl_map.tsv"))
        .args(["--scope_prefix", "/wisconsin/", "--cross_scope_prefixes", "/illinois/,/iowa/"])
        .args(["--internal_domain", "www.example.com"])
        .args(["--out_xlsx", "dash.xlsx", "--out_csv", "dash.csv", "--hide_appendices"])
        .args(["--out_summary_json", "dash.json"])
        .assert()
        .success();

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(cwd.path().join("dash.json")).unwrap()).unwrap();
    assert_eq!(summary["adds"], 1);
}

#[test]
fn test_apply_curl_map_defaults_output_names() {
    let cwd = TempDir::new().unwrap();
    audit_cmd(&cwd).assert().success();

    linkaudit(&cwd)
        .args([
            "apply-curl-map",
            "--xlsx_in",
            "out/audit.xlsx",
            "--csv_in",
            "out/audit.csv",
            "--curl_map_tsv",
        ])
        .arg(site("curl_map.tsv"))
        .assert()
        .success();

    assert!(cwd.path().join("out/audit_curl.xlsx").exists());
    let (_, rows) = read_csv(&cwd.path().join("out/audit_curl.csv"));
    assert!(!rows.iter().any(|r| r[0] == "ADD_CONTEXTUAL" && r[1].ends_with("/blog/what-is-mediation/")));
}

#[test]
fn test_highperf_threshold_overrides() {
    let cwd = TempDir::new().unwrap();
    audit_cmd(&cwd).assert().success();

    linkaudit(&cwd)
        .args(["highperf", "--baseline_xlsx", "out/audit.xlsx", "--baseline_impl_csv", "out/audit.csv"])
        .arg("--core_pages")
        .arg(site("core_pages.csv"))
        .arg("--ga4_csv")
        .arg(fixture_path("perf/ga4.csv"))
        .arg("--gsc_csv")
        .arg(fixture_path("perf/gsc.csv"))
        .arg("--ahrefs_csv")
        .arg(fixture_path("perf/ahrefs.tsv"))
        .args(["--ga4_top_n", "1", "--gsc_top_n", "0", "--ahrefs_top_n", "0"])
        .args(["--out_xlsx", "hp.xlsx", "--out_impl_csv", "hp.csv", "--out_anchor_rationale_csv", "hp_anchors.csv"])
        .assert()
        .success();

    let (_, rows) = read_csv(&cwd.path().join("hp.csv"));
    let adds: Vec<_> = rows.iter().filter(|r| r[0] == "ADD_CONTEXTUAL").collect();
    assert_eq!(adds.len(), 1);
    assert!(adds[0][1].ends_with("/blog/uncontested-divorce-guide/"));
}

#[test]
fn test_classify_with_custom_rules() {
    let cwd = TempDir::new().unwrap();
    linkaudit(&cwd)
        .arg("classify")
        .arg("--urls")
        .arg(fixture_path("classify/urls.csv"))
        .arg("--bucket_rules")
        .arg(fixture_path("classify/bucket_rules.txt"))
        .args(["--out_csv", "buckets.csv", "--out_warnings_csv", "warnings.csv"])
        .assert()
        .success();

    let (headers, rows) = read_csv(&cwd.path().join("buckets.csv"));
    assert_eq!(headers, vec!["URL", "Bucket", "Inferred Bucket", "Method"]);
    assert_eq!(rows.len(), 3);
    let calculator = rows.iter().find(|r| r[0].contains("calculator")).unwrap();
    assert_eq!(calculator[1], "Calculators");
    assert_eq!(calculator[3], "custom rule");

    let warnings = fs::read_to_string(cwd.path().join("warnings.csv")).unwrap();
    assert!(warnings.contains("invalid_custom_rule"));
}

#[test]
fn test_init_refuses_to_overwrite_without_force() {
    let cwd = TempDir::new().unwrap();
    linkaudit(&cwd)
        .args(["init", "--path", "cfg/linkaudit.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created default configuration file"));
    assert!(cwd.path().join("cfg/linkaudit.toml").exists());

    linkaudit(&cwd)
        .args(["init", "--path", "cfg/linkaudit.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    linkaudit(&cwd)
        .args(["init", "--path", "cfg/linkaudit.toml", "--force"])
        .assert()
        .success();
}

#[test]
fn test_explicit_missing_config_fails() {
    let cwd = TempDir::new().unwrap();
    audit_cmd(&cwd)
        .args(["--config", "nope.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration file not found"));
}
