//! Tabular ingest for crawl exports and page lists
//!
//! Every cell is read as a string and missing cells become empty strings, never nulls.
//! Column lookup is exact first, then case- and whitespace-insensitive, and known header
//! synonyms are folded onto one canonical name before any stage reads them.
//!
//! Sitewide outlink exports can be far larger than memory allows, so they are streamed
//! in fixed-size chunks and filtered (hyperlinks from allowed sources only) before rows
//! are retained.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::url_utils::Canonicalizer;

/// Full link-edge export layout
pub const EDGE_COLUMNS: [&str; 16] = [
    "Type",
    "From",
    "To",
    "Anchor Text",
    "Alt Text",
    "Follow",
    "Target",
    "Rel",
    "Status Code",
    "Status",
    "Path Type",
    "Link Path",
    "Link Position",
    "Link Origin",
    "Size",
    "Transferred",
];

/// Columns an edge export must carry
pub const EDGE_REQUIRED_COLUMNS: [&str; 6] = [
    "Type",
    "From",
    "To",
    "Anchor Text",
    "Status Code",
    "Link Position",
];

pub const CORE_PAGE_ALIASES: &[(&str, &str)] = &[
    ("URLs", "URL"),
    ("CLUSTER ID", "Cluster ID"),
    ("Cluster_ID", "Cluster ID"),
    ("Practice Area Type", "Type"),
    ("Primary Target Keyword", "Primary Keyword"),
];

pub const CONTENT_PAGE_ALIASES: &[(&str, &str)] = &[
    ("Blog URL", "Content URL"),
    ("WI Blogs", "Content URL"),
    ("URL", "Content URL"),
    ("URLs", "Content URL"),
    ("CLUSTER ID", "Cluster ID"),
];

pub const GSC_ALIASES: &[(&str, &str)] = &[("Top pages", "Source URL")];

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("{source_name} is missing required columns: {}", missing.join(", "))]
    MissingColumns {
        source_name: String,
        missing: Vec<String>,
    },

    #[error("{source_name}: could not identify a final-URL column (columns: {})", columns.join(", "))]
    NoFinalUrlColumn {
        source_name: String,
        columns: Vec<String>,
    },

    #[error("{source_name} has no header row")]
    EmptyFile { source_name: String },
}

/// String-typed table with a header row
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub name: String,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(name: impl Into<String>, headers: Vec<String>) -> Self {
        Self {
            name: name.into(),
            headers,
            rows: Vec::new(),
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row, padding or truncating it to the header width
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        if let Some(idx) = self.headers.iter().position(|h| h == name) {
            return Some(idx);
        }
        let wanted = name.trim();
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(wanted))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// First column matching any of the given names
    pub fn find_column(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|n| self.column_index(n))
    }

    /// Fold `(alias, canonical)` pairs onto canonical names; an existing canonical column wins
    pub fn rename_columns(&mut self, aliases: &[(&str, &str)]) {
        for (alias, canonical) in aliases {
            if self.has_column(canonical) {
                continue;
            }
            if let Some(idx) = self.column_index(alias) {
                self.headers[idx] = canonical.to_string();
            }
        }
    }

    pub fn rename_column_at(&mut self, idx: usize, name: &str) {
        if let Some(h) = self.headers.get_mut(idx) {
            *h = name.to_string();
        }
    }

    pub fn require_columns(&self, required: &[&str]) -> Result<(), IngestError> {
        let missing: Vec<String> = required
            .iter()
            .filter(|c| !self.has_column(c))
            .map(|c| c.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(IngestError::MissingColumns {
                source_name: self.name.clone(),
                missing,
            })
        }
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.rows.iter().map(move |cells| Record { table: self, cells })
    }

    pub fn record_from<'a>(&'a self, cells: &'a [String]) -> Record<'a> {
        Record { table: self, cells }
    }
}

/// One row viewed through its table's header
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    table: &'a Table,
    cells: &'a [String],
}

impl<'a> Record<'a> {
    /// Cell value by column name; empty when the column or cell is absent
    pub fn get(&self, column: &str) -> &'a str {
        self.table
            .column_index(column)
            .and_then(|idx| self.cells.get(idx))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn get_trimmed(&self, column: &str) -> &'a str {
        self.get(column).trim()
    }

    pub fn at(&self, idx: usize) -> &'a str {
        self.cells.get(idx).map(String::as_str).unwrap_or("")
    }

    pub fn cells(&self) -> &'a [String] {
        self.cells
    }
}

fn clean_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}').trim().to_string()
}

fn delimited_reader<R: Read>(reader: R, delimiter: u8, has_headers: bool) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(has_headers)
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(reader)
}

fn decode_record(record: &csv::ByteRecord) -> Vec<String> {
    record
        .iter()
        .map(|field| String::from_utf8_lossy(field).into_owned())
        .collect()
}

/// Read a headed, delimited table from any reader
pub fn read_delimited_table<R: Read>(name: &str, reader: R, delimiter: u8) -> Result<Table> {
    let mut rdr = delimited_reader(reader, delimiter, true);
    let headers: Vec<String> = rdr
        .byte_headers()
        .with_context(|| format!("Failed to read header row of {}", name))?
        .iter()
        .map(|h| clean_header(&String::from_utf8_lossy(h)))
        .collect();
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(IngestError::EmptyFile {
            source_name: name.to_string(),
        }
        .into());
    }

    let mut table = Table::new(name, headers);
    for (line, record) in rdr.byte_records().enumerate() {
        let record = record.with_context(|| format!("Malformed row {} in {}", line + 2, name))?;
        let cells = decode_record(&record);
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        table.push_row(cells);
    }
    debug!("Read {} rows from {}", table.len(), name);
    Ok(table)
}

/// Read a headerless, delimited file into raw rows
pub fn read_headerless_rows<R: Read>(name: &str, reader: R, delimiter: u8) -> Result<Vec<Vec<String>>> {
    let mut rdr = delimited_reader(reader, delimiter, false);
    let mut rows = Vec::new();
    for (line, record) in rdr.byte_records().enumerate() {
        let record = record.with_context(|| format!("Malformed row {} in {}", line + 1, name))?;
        let mut cells = decode_record(&record);
        if let Some(first) = cells.first_mut() {
            *first = first.trim_start_matches('\u{feff}').to_string();
        }
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        rows.push(cells);
    }
    Ok(rows)
}

/// Read a CSV file with every cell as a string
pub fn read_csv_table(path: &Path) -> Result<Table> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open input file: {}", path.display()))?;
    read_delimited_table(&path.display().to_string(), file, b',')
}

/// Read an edge export and check it carries the required edge columns
pub fn read_edge_table(path: &Path) -> Result<Table> {
    let table = read_csv_table(path)?;
    table.require_columns(&EDGE_REQUIRED_COLUMNS)?;
    Ok(table)
}

/// Progress of a chunked read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkStats {
    pub chunks: usize,
    pub rows_read: usize,
    pub rows_kept: usize,
}

/// Stream a CSV in chunks of `chunk_rows`, keeping only rows accepted by `keep`.
///
/// `on_chunk` is called after every chunk with the running totals.
pub fn stream_filtered_table<R, K, P>(
    name: &str,
    reader: R,
    chunk_rows: usize,
    required: &[&str],
    mut keep: K,
    mut on_chunk: P,
) -> Result<(Table, ChunkStats)>
where
    R: Read,
    K: FnMut(&Record) -> bool,
    P: FnMut(&ChunkStats),
{
    let mut rdr = delimited_reader(reader, b',', true);
    let headers: Vec<String> = rdr
        .byte_headers()
        .with_context(|| format!("Failed to read header row of {}", name))?
        .iter()
        .map(|h| clean_header(&String::from_utf8_lossy(h)))
        .collect();

    let shape = Table::new(name, headers.clone());
    shape.require_columns(required)?;

    let mut kept = Table::new(name, headers);
    let mut stats = ChunkStats::default();
    let mut chunk: Vec<Vec<String>> = Vec::with_capacity(chunk_rows.min(65_536));

    let mut flush = |chunk: &mut Vec<Vec<String>>, kept: &mut Table, stats: &mut ChunkStats| {
        for cells in chunk.drain(..) {
            if keep(&shape.record_from(&cells)) {
                kept.push_row(cells);
                stats.rows_kept += 1;
            }
        }
        stats.chunks += 1;
    };

    for (line, record) in rdr.byte_records().enumerate() {
        let record = record.with_context(|| format!("Malformed row {} in {}", line + 2, name))?;
        let mut cells = decode_record(&record);
        cells.resize(shape.headers().len(), String::new());
        chunk.push(cells);
        stats.rows_read += 1;
        if chunk.len() >= chunk_rows {
            flush(&mut chunk, &mut kept, &mut stats);
            debug!("{}: chunk {} processed ({} rows kept so far)", name, stats.chunks, stats.rows_kept);
            on_chunk(&stats);
        }
    }
    if !chunk.is_empty() {
        flush(&mut chunk, &mut kept, &mut stats);
        on_chunk(&stats);
    }

    Ok((kept, stats))
}

/// Stream a sitewide edge export keeping hyperlinks whose source is in `sources`
pub fn stream_hyperlinks_from_sources<P>(
    path: &Path,
    sources: &HashSet<String>,
    canon: &Canonicalizer,
    chunk_rows: usize,
    on_chunk: P,
) -> Result<(Table, ChunkStats)>
where
    P: FnMut(&ChunkStats),
{
    let file = File::open(path)
        .with_context(|| format!("Failed to open edge export: {}", path.display()))?;
    stream_filtered_table(
        &path.display().to_string(),
        file,
        chunk_rows,
        &EDGE_REQUIRED_COLUMNS,
        |record| {
            record.get_trimmed("Type").eq_ignore_ascii_case("hyperlink")
                && sources.contains(&canon.canonical(record.get("From")))
        },
        on_chunk,
    )
}
