use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerbosityLevel {
    Silent = 0,   // Final summary only
    Summary = 1,  // Stage progress (default)
    Detailed = 2, // Per-input counts and warnings
    Debug = 3,    // Everything
}

impl VerbosityLevel {
    pub fn from_verbose_count(count: u8) -> Self {
        match count {
            0 => VerbosityLevel::Summary,
            1 => VerbosityLevel::Detailed,
            2.. => VerbosityLevel::Debug,
        }
    }

    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        if quiet {
            VerbosityLevel::Silent
        } else {
            Self::from_verbose_count(verbose)
        }
    }
}

#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct RunMetadata {
    pub command: String,
    pub input_rows: usize,
    pub edges_kept: usize,
    pub issues: usize,
    pub fix_actions: usize,
    pub add_actions: usize,
    pub qa_annotations: usize,
    pub outputs: Vec<String>,
}

/// User-facing run log: timestamped lines on stderr, an optional chunk progress bar,
/// and a summary block at the end of the run.
#[derive(Clone)]
pub struct RunLogger {
    verbosity: VerbosityLevel,
    progress_bar: Arc<Mutex<Option<ProgressBar>>>,
    metadata: Arc<Mutex<RunMetadata>>,
    started: Instant,
    log_buffer: Arc<Mutex<Vec<String>>>,
    log_file_path: Option<PathBuf>,
}

impl RunLogger {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            progress_bar: Arc::new(Mutex::new(None)),
            metadata: Arc::new(Mutex::new(RunMetadata::default())),
            started: Instant::now(),
            log_buffer: Arc::new(Mutex::new(Vec::new())),
            log_file_path: None,
        }
    }

    pub fn with_log_file(verbosity: VerbosityLevel, log_file_path: PathBuf) -> Self {
        Self {
            log_file_path: Some(log_file_path),
            ..Self::new(verbosity)
        }
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        self.verbosity
    }

    pub fn info(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Summary {
            self.print_message("INFO", message);
        } else {
            self.buffer_only("INFO", message);
        }
    }

    pub fn warn(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Detailed {
            self.print_message("WARN", message);
        } else {
            self.buffer_only("WARN", message);
        }
    }

    /// Always shown
    pub fn error(&self, message: &str) {
        self.print_message("ERROR", message);
    }

    pub fn debug(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Debug {
            self.print_message("DEBUG", message);
        }
    }

    fn format_line(level: &str, message: &str) -> String {
        format!("[{}] {}: {}", Local::now().format("%H:%M:%S%.3f"), level, message)
    }

    fn buffer_only(&self, level: &str, message: &str) {
        if self.log_file_path.is_some() {
            if let Ok(mut buffer) = self.log_buffer.lock() {
                buffer.push(Self::format_line(level, message));
            }
        }
    }

    fn print_message(&self, level: &str, message: &str) {
        let msg = Self::format_line(level, message);
        if self.log_file_path.is_some() {
            if let Ok(mut buffer) = self.log_buffer.lock() {
                buffer.push(msg.clone());
            }
        }
        // Route through the bar so it is not torn
        if let Ok(guard) = self.progress_bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.println(msg);
                return;
            }
        }
        eprintln!("{}", msg);
    }

    /// Spinner for streamed reads where the row count is unknown up front
    pub fn start_spinner(&self, message: &str) {
        if self.verbosity == VerbosityLevel::Silent {
            return;
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("[{elapsed_precise}] {spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        if let Ok(mut guard) = self.progress_bar.lock() {
            *guard = Some(pb);
        }
    }

    pub fn update_progress(&self, message: &str) {
        if let Ok(guard) = self.progress_bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.set_message(message.to_string());
                pb.tick();
            }
        }
    }

    pub fn finish_progress(&self, final_message: &str) {
        if let Ok(mut guard) = self.progress_bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
        self.info(final_message);
    }

    fn with_metadata(&self, f: impl FnOnce(&mut RunMetadata)) {
        if let Ok(mut metadata) = self.metadata.lock() {
            f(&mut metadata);
        }
    }

    pub fn record_command(&self, command: &str) {
        self.with_metadata(|m| m.command = command.to_string());
    }

    pub fn record_input_rows(&self, rows: usize) {
        self.with_metadata(|m| m.input_rows += rows);
    }

    pub fn record_edges_kept(&self, edges: usize) {
        self.with_metadata(|m| m.edges_kept += edges);
    }

    pub fn record_issues(&self, issues: usize) {
        self.with_metadata(|m| m.issues = issues);
    }

    pub fn record_actions(&self, fixes: usize, adds: usize) {
        self.with_metadata(|m| {
            m.fix_actions = fixes;
            m.add_actions = adds;
        });
    }

    pub fn record_qa_annotations(&self, rows: usize) {
        self.with_metadata(|m| m.qa_annotations = rows);
    }

    pub fn record_output_file(&self, path: &Path) {
        self.with_metadata(|m| m.outputs.push(path.display().to_string()));
    }

    pub fn metadata(&self) -> RunMetadata {
        self.metadata.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn log_input_loaded(&self, what: &str, path: &Path, rows: usize) {
        self.record_input_rows(rows);
        self.debug(&format!("Loaded {} ({} rows) from {}", what, rows, path.display()));
    }

    pub fn log_stage(&self, stage: &str) {
        self.info(stage);
    }

    pub fn log_export_success(&self, path: &Path) {
        self.record_output_file(path);
        self.info(&format!("Export completed: {}", path.display()));
    }

    pub fn print_final_summary(&self) {
        let metadata = self.metadata();
        print!("\x1b[2K\r");
        let _ = io::stdout().flush();

        println!("\n=== RUN SUMMARY ===");
        if !metadata.command.is_empty() {
            println!("Command: {}", metadata.command);
        }
        println!("Duration: {:.2}s", self.started.elapsed().as_secs_f64());
        println!("Input rows read: {}", metadata.input_rows);
        println!("Edges kept: {}", metadata.edges_kept);
        println!("QA issues: {}", metadata.issues);
        println!("FIX actions: {}", metadata.fix_actions);
        println!("ADD actions: {}", metadata.add_actions);
        if metadata.qa_annotations > 0 {
            println!("Rows with QA annotations: {}", metadata.qa_annotations);
        }
        for output in &metadata.outputs {
            println!("Output: {}", output);
        }
        println!("===================\n");
    }

    /// Write the buffered log lines to the `--log_file` path
    pub fn export_logs(&self) -> io::Result<()> {
        let Some(ref log_file_path) = self.log_file_path else {
            return Ok(());
        };
        if let Some(parent) = log_file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(log_file_path)?;
        if let Ok(buffer) = self.log_buffer.lock() {
            for line in buffer.iter() {
                writeln!(file, "{}", line)?;
            }
        }
        file.flush()
    }

    pub fn get_log_count(&self) -> usize {
        self.log_buffer.lock().map(|b| b.len()).unwrap_or(0)
    }
}
