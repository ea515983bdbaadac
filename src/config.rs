//src/config.rs

use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::correlation::Pairing;
use crate::error::{RarefactionError, Result};
use crate::results::ResultFormat;

pub const DEFAULT_DEPTHS: &[usize] = &[50, 100, 200, 500, 1000, 1500, 2000, 5000];
pub const DEFAULT_REPORT_NAME: &str = "basic_report_k_mer.json";
pub const DEFAULT_MATRIX_POINTER: &str = "/mds_kmer/kmer_dissim_matrix/link_content";

/// Subsample FASTQ reads at increasing depths and measure how well two
/// k-mer analysis tools agree on each subsample.
#[derive(Parser, Debug, Clone)]
#[command(name = "rarefaction-rs", version, about)]
pub struct RarefactionConfig {
    /// Directory of (optionally gzipped) FASTQ files
    #[arg(short = 'i', long)]
    pub input_dir: PathBuf,

    /// Working directory for replicates and reports; removed when the run ends
    #[arg(short = 'o', long)]
    pub output_dir: PathBuf,

    /// Depth levels (reads per replicate file), comma separated
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_DEPTHS.to_vec())]
    pub depths: Vec<usize>,

    /// Independent replicates drawn per depth level
    #[arg(long, default_value_t = 20)]
    pub replicates: usize,

    #[arg(long, default_value = "kmerprimary:1.0.0")]
    pub primary_image: String,

    #[arg(long, default_value = "kmersecondary:2.0.1")]
    pub secondary_image: String,

    /// Permutations for the Mantel significance estimate
    #[arg(long, default_value_t = 1000)]
    pub permutations: usize,

    #[arg(long, value_enum, default_value_t = Pairing::SameReplicate)]
    pub pairing: Pairing,

    /// Deadline per tool invocation in seconds, 0 disables it
    #[arg(long, default_value_t = 3600)]
    pub tool_timeout_secs: u64,

    #[arg(long, default_value = "docker")]
    pub container_runtime: String,

    #[arg(long, default_value = DEFAULT_REPORT_NAME)]
    pub report_name: String,

    /// JSON pointer to the base64 matrix payload inside the report
    #[arg(long, default_value = DEFAULT_MATRIX_POINTER)]
    pub matrix_pointer: String,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long, default_value = "results.txt")]
    pub results: PathBuf,

    #[arg(long, value_enum, default_value_t = ResultFormat::Text)]
    pub format: ResultFormat,

    /// Truncate an existing results file instead of refusing to run
    #[arg(long)]
    pub force: bool,

    /// Remove a pre-existing working directory before starting
    #[arg(long)]
    pub clean: bool,

    /// Treat tool, report and correlation failures as fatal
    #[arg(long)]
    pub fail_fast: bool,

    /// Rayon worker threads, 0 keeps the rayon default
    #[arg(long, default_value_t = 0)]
    pub threads: usize,

    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl RarefactionConfig {
    /// Config with every default filled in, for library callers.
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            depths: DEFAULT_DEPTHS.to_vec(),
            replicates: 20,
            primary_image: "kmerprimary:1.0.0".to_string(),
            secondary_image: "kmersecondary:2.0.1".to_string(),
            permutations: 1000,
            pairing: Pairing::SameReplicate,
            tool_timeout_secs: 3600,
            container_runtime: "docker".to_string(),
            report_name: DEFAULT_REPORT_NAME.to_string(),
            matrix_pointer: DEFAULT_MATRIX_POINTER.to_string(),
            seed: None,
            results: PathBuf::from("results.txt"),
            format: ResultFormat::Text,
            force: false,
            clean: false,
            fail_fast: false,
            threads: 0,
            log_file: None,
        }
    }

    /// Check option values and put the depth list in ascending order.
    pub fn validate(&mut self) -> Result<()> {
        if !self.input_dir.is_dir() {
            return Err(RarefactionError::config(format!(
                "input directory {:?} does not exist",
                self.input_dir
            )));
        }
        if self.depths.is_empty() {
            return Err(RarefactionError::config("at least one depth level is required"));
        }
        if self.depths.contains(&0) {
            return Err(RarefactionError::config("depth levels must be positive"));
        }
        if self.replicates == 0 {
            return Err(RarefactionError::config("replicates must be at least 1"));
        }
        if !self.matrix_pointer.is_empty() && !self.matrix_pointer.starts_with('/') {
            return Err(RarefactionError::config(format!(
                "matrix pointer {:?} must start with '/'",
                self.matrix_pointer
            )));
        }
        // The working root is removed with everything below it.
        let input = resolve_path(&self.input_dir)?;
        let work = resolve_path(&self.output_dir)?;
        if input.starts_with(&work) {
            return Err(RarefactionError::config(format!(
                "working directory {:?} must not contain the input directory {:?}",
                self.output_dir, self.input_dir
            )));
        }
        for (what, path) in [("results file", Some(&self.results)), ("log file", self.log_file.as_ref())] {
            if let Some(path) = path {
                if resolve_path(path)?.starts_with(&work) {
                    return Err(RarefactionError::config(format!(
                        "{} {:?} must not be inside the working directory {:?}",
                        what, path, self.output_dir
                    )));
                }
            }
        }

        let mut sorted = self.depths.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted != self.depths {
            log::warn!("Depth levels reordered to {:?}", sorted);
            self.depths = sorted;
        }
        Ok(())
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        if self.tool_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.tool_timeout_secs))
        }
    }
}

/// Absolute form of `path` with symlinks and `..` resolved, for paths that
/// may not exist yet: the deepest existing ancestor is canonicalized and the
/// remaining components are appended.
fn resolve_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut missing = Vec::new();
    let mut existing = absolute.as_path();
    let mut resolved = loop {
        match fs::canonicalize(existing) {
            Ok(p) => break p,
            Err(_) => match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    missing.push(name.to_os_string());
                    existing = parent;
                }
                // only `..` or the root itself is left
                _ => break existing.to_path_buf(),
            },
        }
    };
    for name in missing.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}
