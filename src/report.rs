//! Workbook model, XLSX writer and XLSX reader.
//!
//! Sheets are plain grids of text/number cells. Tabular sheets carry their header in row 0;
//! the dashboard stacks several titled tables on one sheet. Styling is limited to bold
//! titles, filled header rows, column widths and frozen header panes.

use anyhow::{bail, Context, Result};
use calamine::{open_workbook, Data, Reader, SheetVisible, Xlsx};
use rust_xlsxwriter::{Color, DocProperties, ExcelDateTime, Format, Workbook};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

use crate::ingest::Table;

pub const DASHBOARD_SHEET: &str = "Dashboard";
pub const OVERVIEW_SHEET: &str = "Overview";

const MIN_COLUMN_WIDTH: usize = 12;
const MAX_COLUMN_WIDTH: usize = 70;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
}

impl Cell {
    pub fn text(&self) -> String {
        self.to_string()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Text(s) if s.is_empty())
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Text(s) => f.write_str(s),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Cell::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<&String> for Cell {
    fn from(value: &String) -> Self {
        Cell::Text(value.clone())
    }
}

impl From<usize> for Cell {
    fn from(value: usize) -> Self {
        Cell::Number(value as f64)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

/// Percentage with one decimal, e.g. 0.4567 -> 45.7
pub fn percent_1dp(share: f64) -> f64 {
    (share * 1000.0).round() / 10.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
    pub hidden: bool,
    /// Rows rendered as section titles
    pub title_rows: BTreeSet<usize>,
    /// Rows rendered with the header fill
    pub header_rows: BTreeSet<usize>,
}

impl Sheet {
    /// Empty grid without a header
    pub fn grid(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rows: Vec::new(),
            hidden: false,
            title_rows: BTreeSet::new(),
            header_rows: BTreeSet::new(),
        }
    }

    /// Tabular sheet with `headers` in row 0
    pub fn table<S: AsRef<str>>(name: &str, headers: &[S]) -> Self {
        let mut sheet = Self::grid(name);
        sheet.header_rows.insert(0);
        sheet.rows.push(headers.iter().map(|h| Cell::Text(h.as_ref().to_string())).collect());
        sheet
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn is_tabular(&self) -> bool {
        self.title_rows.is_empty() && self.header_rows.len() == 1 && self.header_rows.contains(&0)
    }

    pub fn push(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }

    pub fn push_text(&mut self, row: Vec<String>) {
        self.rows.push(row.into_iter().map(Cell::Text).collect());
    }

    pub fn push_title(&mut self, text: &str) {
        self.title_rows.insert(self.rows.len());
        self.rows.push(vec![Cell::from(text)]);
    }

    /// Titled section: title row, header row, data rows and a blank spacer row
    pub fn push_section<S: AsRef<str>>(&mut self, title: &str, headers: &[S], rows: Vec<Vec<Cell>>) {
        self.push_title(title);
        self.header_rows.insert(self.rows.len());
        self.rows.push(headers.iter().map(|h| Cell::Text(h.as_ref().to_string())).collect());
        self.rows.extend(rows);
        self.rows.push(Vec::new());
    }

    pub fn headers(&self) -> Vec<String> {
        self.rows
            .first()
            .map(|r| r.iter().map(Cell::text).collect())
            .unwrap_or_default()
    }

    pub fn data_len(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }

    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.headers().iter().position(|h| h == header)
    }

    /// Rename a header cell of a tabular sheet
    pub fn rename_header(&mut self, from: &str, to: &str) -> bool {
        match (self.column_index(from), self.rows.first_mut()) {
            (Some(idx), Some(header)) => {
                header[idx] = Cell::from(to);
                true
            }
            _ => false,
        }
    }

    /// String view of a tabular sheet
    pub fn to_table(&self) -> Table {
        let mut table = Table::new(self.name.clone(), self.headers());
        for row in self.rows.iter().skip(1) {
            table.push_row(row.iter().map(Cell::text).collect());
        }
        table
    }

    pub fn from_table(name: &str, table: &Table) -> Self {
        let mut sheet = Self::table(name, table.headers());
        for record in table.records() {
            sheet.push_text(record.cells().to_vec());
        }
        sheet
    }

    /// Column widths from the longest text per column, titles excluded
    fn column_widths(&self) -> Vec<f64> {
        let mut widths: Vec<usize> = Vec::new();
        for (idx, row) in self.rows.iter().enumerate() {
            if self.title_rows.contains(&idx) {
                continue;
            }
            for (col, cell) in row.iter().enumerate() {
                let len = cell.text().chars().count();
                if widths.len() <= col {
                    widths.resize(col + 1, 0);
                }
                widths[col] = widths[col].max(len);
            }
        }
        widths
            .into_iter()
            .map(|w| (w + 2).clamp(MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH) as f64)
            .collect()
    }
}

/// Ordered collection of sheets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkbookModel {
    sheets: Vec<Sheet>,
}

impl WorkbookModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sheet: Sheet) {
        self.sheets.push(sheet);
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Sheet> {
        self.sheets.iter_mut().find(|s| s.name == name)
    }

    /// Replace a sheet in place, keeping its position and visibility; append when absent
    pub fn replace(&mut self, mut sheet: Sheet) {
        match self.sheets.iter().position(|s| s.name == sheet.name) {
            Some(idx) => {
                sheet.hidden = self.sheets[idx].hidden;
                self.sheets[idx] = sheet;
            }
            None => self.sheets.push(sheet),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Sheet> {
        let idx = self.sheets.iter().position(|s| s.name == name)?;
        Some(self.sheets.remove(idx))
    }
}

/// Write the workbook with a pinned creation date so identical inputs yield identical files
pub fn write_workbook(model: &WorkbookModel, path: &Path) -> Result<()> {
    if model.sheets.is_empty() {
        bail!("Refusing to write an empty workbook: {}", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }

    let mut workbook = Workbook::new();
    let created = ExcelDateTime::from_ymd(2000, 1, 1)?;
    workbook.set_properties(&DocProperties::new().set_creation_datetime(&created));

    let header_format = Format::new()
        .set_bold()
        .set_font_color(Color::White)
        .set_background_color(Color::RGB(0x2F5597));
    let section_header_format = Format::new().set_bold().set_background_color(Color::RGB(0xD9E1F2));
    let title_format = Format::new().set_bold().set_font_size(13);

    for sheet in &model.sheets {
        let worksheet = workbook.add_worksheet();
        worksheet
            .set_name(&sheet.name)
            .with_context(|| format!("Invalid sheet name: {}", sheet.name))?;

        for (r, row) in sheet.rows.iter().enumerate() {
            let row_idx = r as u32;
            let format = if sheet.title_rows.contains(&r) {
                Some(&title_format)
            } else if sheet.header_rows.contains(&r) {
                Some(if sheet.is_tabular() { &header_format } else { &section_header_format })
            } else {
                None
            };
            for (c, cell) in row.iter().enumerate() {
                let col_idx = c as u16;
                match (cell, format) {
                    (Cell::Text(s), _) if s.is_empty() => {}
                    (Cell::Text(s), Some(fmt)) => {
                        worksheet.write_string_with_format(row_idx, col_idx, s, fmt)?;
                    }
                    (Cell::Text(s), None) => {
                        worksheet.write_string(row_idx, col_idx, s)?;
                    }
                    (Cell::Number(n), Some(fmt)) => {
                        worksheet.write_number_with_format(row_idx, col_idx, *n, fmt)?;
                    }
                    (Cell::Number(n), None) => {
                        worksheet.write_number(row_idx, col_idx, *n)?;
                    }
                }
            }
        }

        for (c, width) in sheet.column_widths().into_iter().enumerate() {
            worksheet.set_column_width(c as u16, width)?;
        }
        if sheet.is_tabular() {
            worksheet.set_freeze_panes(1, 0)?;
        }
        if sheet.hidden {
            worksheet.set_hidden(true);
        }
    }

    workbook
        .save(path)
        .with_context(|| format!("Failed to write workbook: {}", path.display()))?;
    info!("Wrote workbook {} ({} sheets)", path.display(), model.sheets.len());
    Ok(())
}

fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Text(String::new()),
        Data::String(s) => Cell::Text(s.clone()),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Text(if *b { "TRUE" } else { "FALSE" }.to_string()),
        other => Cell::Text(other.to_string()),
    }
}

/// Dashboard layout: a row with only its first cell set is a title and the next row a header
fn infer_sections(sheet: &mut Sheet) {
    let mut title_rows = BTreeSet::new();
    let mut header_rows = BTreeSet::new();
    for (idx, row) in sheet.rows.iter().enumerate() {
        let filled = row.iter().filter(|c| !c.is_empty()).count();
        let first_filled = row.first().map(|c| !c.is_empty()).unwrap_or(false);
        let next_is_table = sheet
            .rows
            .get(idx + 1)
            .map(|r| r.iter().filter(|c| !c.is_empty()).count() > 1)
            .unwrap_or(false);
        if filled == 1 && first_filled && next_is_table && !header_rows.contains(&idx) {
            title_rows.insert(idx);
            header_rows.insert(idx + 1);
        }
    }
    sheet.title_rows = title_rows;
    sheet.header_rows = header_rows;
}

/// Read every sheet back as a grid of cells, preserving order and visibility
pub fn read_workbook(path: &Path) -> Result<WorkbookModel> {
    let mut workbook: Xlsx<_> =
        open_workbook(path).with_context(|| format!("Failed to open workbook: {}", path.display()))?;
    let hidden: BTreeSet<String> = workbook
        .sheets_metadata()
        .iter()
        .filter(|m| m.visible != SheetVisible::Visible)
        .map(|m| m.name.clone())
        .collect();

    let mut model = WorkbookModel::new();
    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .with_context(|| format!("Failed to read sheet '{}' from {}", name, path.display()))?;
        let (row_offset, col_offset) = range.start().map(|(r, c)| (r as usize, c as usize)).unwrap_or((0, 0));

        let mut sheet = Sheet::grid(&name);
        sheet.hidden = hidden.contains(&name);
        sheet.rows.resize(row_offset, Vec::new());
        for row in range.rows() {
            let mut cells = vec![Cell::Text(String::new()); col_offset];
            cells.extend(row.iter().map(cell_from_data));
            while cells.last().map(Cell::is_empty).unwrap_or(false) {
                cells.pop();
            }
            sheet.rows.push(cells);
        }
        if name == DASHBOARD_SHEET {
            infer_sections(&mut sheet);
        } else if !sheet.rows.is_empty() {
            sheet.header_rows.insert(0);
        }
        debug!("Read sheet '{}' ({} rows)", name, sheet.rows.len());
        model.push(sheet);
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> WorkbookModel {
        let mut model = WorkbookModel::new();
        let mut dash = Sheet::grid(DASHBOARD_SHEET);
        dash.push_section("Executive KPIs", &["Metric", "Value"], vec![vec![Cell::from("Core Pages in scope"), Cell::from(3usize)]]);
        model.push(dash);

        let mut recs = Sheet::table("Recommendations (Fix Existing)", &["Action", "Source URL", "Curl Final Status"]);
        recs.push_text(vec!["FIX_REDIRECT".into(), "https://x/a/".into(), "200".into()]);
        recs.push_text(vec!["REMOVE_OR_REPLACE".into(), "https://x/b/".into(), String::new()]);
        model.push(recs.hidden());
        model
    }

    #[test]
    fn test_cell_number_rendering() {
        assert_eq!(Cell::Number(404.0).text(), "404");
        assert_eq!(Cell::Number(45.7).text(), "45.7");
        assert_eq!(percent_1dp(0.4567), 45.7);
    }

    #[test]
    fn test_column_widths_are_clamped() {
        let mut sheet = Sheet::table("T", &["A", "B"]);
        sheet.push_text(vec!["x".repeat(100), "short".into()]);
        assert_eq!(sheet.column_widths(), vec![70.0, 12.0]);
    }

    #[test]
    fn test_workbook_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.xlsx");
        let model = sample();
        write_workbook(&model, &path).unwrap();

        let read = read_workbook(&path).unwrap();
        assert_eq!(read.sheet_names(), vec![DASHBOARD_SHEET, "Recommendations (Fix Existing)"]);

        let recs = read.get("Recommendations (Fix Existing)").unwrap();
        assert!(recs.hidden);
        let table = recs.to_table();
        assert_eq!(table.len(), 2);
        let rows: Vec<_> = table.records().map(|r| r.get("Curl Final Status").to_string()).collect();
        assert_eq!(rows, vec!["200", ""]);

        let dash = read.get(DASHBOARD_SHEET).unwrap();
        assert!(!dash.hidden);
        assert!(dash.title_rows.contains(&0));
        assert_eq!(dash.rows[2][1].text(), "3");
    }

    #[test]
    fn test_pinned_creation_date_gives_identical_bytes() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.xlsx");
        let b = dir.path().join("b.xlsx");
        write_workbook(&sample(), &a).unwrap();
        write_workbook(&sample(), &b).unwrap();
        assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
    }

    #[test]
    fn test_replace_keeps_position_and_visibility() {
        let mut model = sample();
        let fresh = Sheet::table("Recommendations (Fix Existing)", &["Action"]);
        model.replace(fresh);
        assert_eq!(model.sheets().len(), 2);
        assert!(model.get("Recommendations (Fix Existing)").unwrap().hidden);
        assert_eq!(model.get("Recommendations (Fix Existing)").unwrap().data_len(), 0);
    }
}
