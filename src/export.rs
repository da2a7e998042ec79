use crate::anchors::AnchorRationale;
use crate::ingest::read_csv_table;
use crate::recommend::{Action, Recommendation};
use anyhow::{Context, Result};
use csv::Writer;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

fn create_file(output_path: &Path) -> Result<File> {
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }
    File::create(output_path).with_context(|| format!("Failed to create {}", output_path.display()))
}

/// Write a header row plus data rows as CSV
pub fn write_rows<S: AsRef<str>>(output_path: &Path, headers: &[S], rows: &[Vec<String>]) -> Result<()> {
    let mut wtr = Writer::from_writer(create_file(output_path)?);
    wtr.write_record(headers.iter().map(|h| h.as_ref()))?;
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    debug!("Wrote {} rows to {}", rows.len(), output_path.display());
    Ok(())
}

/// The combined implementation list: exactly the eight public columns
pub fn export_csv(recommendations: &[Recommendation], output_path: &Path) -> Result<()> {
    let rows: Vec<Vec<String>> = recommendations.iter().map(Recommendation::to_csv_row).collect();
    write_rows(output_path, &Recommendation::CSV_HEADERS, &rows)?;
    info!(
        "Exported {} recommendations to CSV: {}",
        recommendations.len(),
        output_path.display()
    );
    Ok(())
}

/// Read an implementation list back; rows with an unknown action are skipped
pub fn read_recommendations_csv(path: &Path) -> Result<Vec<Recommendation>> {
    let table = read_csv_table(path)?;
    table.require_columns(&["Action", "Source URL", "Suggested Target URL"])?;
    let mut recs = Vec::with_capacity(table.len());
    for record in table.records() {
        match Recommendation::from_record(&record) {
            Some(rec) => recs.push(rec),
            None => warn!("Skipping row with unknown action '{}' in {}", record.get("Action"), path.display()),
        }
    }
    Ok(recs)
}

pub fn export_rationale_csv(rationale: &[AnchorRationale], output_path: &Path) -> Result<()> {
    let rows: Vec<Vec<String>> = rationale.iter().map(AnchorRationale::to_row).collect();
    write_rows(output_path, &AnchorRationale::HEADERS, &rows)?;
    info!("Exported {} anchor rationale rows to {}", rationale.len(), output_path.display());
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ActionSummary {
    pub total: usize,
    pub fixes: usize,
    pub adds: usize,
    pub by_action: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
    pub qa_flagged: usize,
}

impl ActionSummary {
    pub fn from_recommendations(recommendations: &[Recommendation]) -> Self {
        let mut summary = Self {
            total: recommendations.len(),
            ..Self::default()
        };
        for rec in recommendations {
            if rec.action == Action::AddContextual {
                summary.adds += 1;
            } else {
                summary.fixes += 1;
            }
            *summary.by_action.entry(rec.action.as_str().to_string()).or_insert(0) += 1;
            *summary.by_priority.entry(rec.priority.as_str().to_string()).or_insert(0) += 1;
            if rec.notes.contains("[QA") {
                summary.qa_flagged += 1;
            }
        }
        summary
    }
}

/// Machine-readable run summary next to the CSV
pub fn export_summary_json(summary: &ActionSummary, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    let mut file = create_file(output_path)?;
    file.write_all(json.as_bytes())?;
    info!("Wrote run summary JSON: {}", output_path.display());
    Ok(())
}

pub fn print_action_summary(recommendations: &[Recommendation]) {
    if recommendations.is_empty() {
        println!("No recommendations produced.");
        return;
    }
    let summary = ActionSummary::from_recommendations(recommendations);

    println!("\n=== Recommendation Summary ===");
    println!("Total recommendations: {}", summary.total);
    println!("FIX actions: {}", summary.fixes);
    for (action, count) in summary.by_action.iter().filter(|(a, _)| a.as_str() != Action::AddContextual.as_str()) {
        println!("  {}: {}", action, count);
    }
    println!("ADD actions: {}", summary.adds);
    for (priority, count) in &summary.by_priority {
        println!("  Priority {}: {}", priority, count);
    }
    if summary.qa_flagged > 0 {
        println!("Rows carrying QA annotations: {}", summary.qa_flagged);
    }
    println!("==============================\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recommend::Priority;
    use tempfile::TempDir;

    fn rec(action: Action, source: &str, notes: &str) -> Recommendation {
        Recommendation {
            action,
            source_url: source.to_string(),
            current_target: String::new(),
            suggested_target: "https://www.x.com/wisconsin/divorce/".to_string(),
            anchor: "divorce lawyer, Madison".to_string(),
            link_position: "Content".to_string(),
            priority: Priority::High,
            reason: "Reason".to_string(),
            notes: notes.to_string(),
            curl_status: "200".to_string(),
            curl_effective: String::new(),
        }
    }

    #[test]
    fn test_csv_has_exactly_public_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("recs.csv");
        export_csv(&[rec(Action::AddContextual, "https://www.x.com/a/", "note")], &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(
            header,
            "Action,Source URL,Current Target URL,Suggested Target URL,Suggested Anchor Text,Link Position,Priority,Reason"
        );
        assert!(text.contains("\"divorce lawyer, Madison\""));
        assert!(!text.contains("note"));
    }

    #[test]
    fn test_csv_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recs.csv");
        let recs = vec![
            rec(Action::FixRedirect, "https://www.x.com/a/", ""),
            rec(Action::AddContextual, "https://www.x.com/b/", ""),
        ];
        export_csv(&recs, &path).unwrap();
        let read = read_recommendations_csv(&path).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0].action, Action::FixRedirect);
        assert_eq!(read[1].anchor, "divorce lawyer, Madison");
        // workbook-only columns are not in the CSV
        assert_eq!(read[0].curl_status, "");
    }

    #[test]
    fn test_action_summary_counts() {
        let recs = vec![
            rec(Action::FixRedirect, "a", ""),
            rec(Action::RemoveOrReplace, "b", " [QA: final destination is 404]"),
            rec(Action::AddContextual, "c", ""),
        ];
        let summary = ActionSummary::from_recommendations(&recs);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.fixes, 2);
        assert_eq!(summary.adds, 1);
        assert_eq!(summary.qa_flagged, 1);
        assert_eq!(summary.by_action.get("FIX_REDIRECT"), Some(&1));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("summary.json");
        export_summary_json(&summary, &path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["adds"], 1);
    }
}
