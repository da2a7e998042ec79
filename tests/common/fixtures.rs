use std::path::{Path, PathBuf};

use linkaudit::config::AppConfig;
use linkaudit::logger::{RunLogger, VerbosityLevel};
use linkaudit::pipeline::{ClusterExport, OutputPaths, SourcePaths};

pub const SITE: &str = "https://www.example.com";

pub fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(relative)
}

pub fn load_fixture(relative: &str) -> String {
    std::fs::read_to_string(fixture_path(relative))
        .unwrap_or_else(|_| panic!("Failed to load fixture: {}", relative))
}

/// Absolute URL on the fixture site
pub fn url(path: &str) -> String {
    format!("{}{}", SITE, path)
}

pub fn config() -> AppConfig {
    AppConfig::embedded_default().expect("embedded config parses")
}

pub fn silent_logger() -> RunLogger {
    RunLogger::new(VerbosityLevel::Silent)
}

/// Inputs of the fixture site, optionally with the curl map
pub fn site_paths(with_curl: bool) -> SourcePaths {
    SourcePaths {
        core_pages: fixture_path("site/core_pages.csv"),
        content_pages: fixture_path("site/content_pages.csv"),
        content_outlinks: fixture_path("site/content_outlinks.csv"),
        inlinks: vec![ClusterExport {
            cluster: "DIV".to_string(),
            path: fixture_path("site/inlinks_divorce.csv"),
        }],
        outlinks: vec![ClusterExport {
            cluster: "DIV".to_string(),
            path: fixture_path("site/outlinks_divorce.csv"),
        }],
        curl_map: with_curl.then(|| fixture_path("site/curl_map.tsv")),
        ..SourcePaths::default()
    }
}

pub fn outputs_in(dir: &Path, stem: &str) -> OutputPaths {
    OutputPaths {
        xlsx: dir.join(format!("{}.xlsx", stem)),
        csv: dir.join(format!("{}.csv", stem)),
        rationale_csv: Some(dir.join(format!("{}_anchor_rationale.csv", stem))),
        summary_json: None,
    }
}

/// Header and data rows of a CSV file
pub fn read_csv(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path)
        .unwrap_or_else(|e| panic!("Failed to open {}: {}", path.display(), e));
    let headers = reader.headers().unwrap().iter().map(String::from).collect();
    let rows = reader
        .records()
        .map(|r| r.unwrap().iter().map(String::from).collect())
        .collect();
    (headers, rows)
}
