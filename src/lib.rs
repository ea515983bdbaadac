// src/lib.rs
pub mod types;
pub mod error;
pub mod config;
pub mod fastq;
pub mod workdir;
pub mod sample;
pub mod analysis;
pub mod dissimilarity;
pub mod mantel;
pub mod correlation;
pub mod orchestrator;
pub mod results;

use std::fmt::Write as FmtWrite;

use serde::Serialize;

use crate::config::RarefactionConfig;
use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::types::{CoefficientRecord, DepthOutcome, DepthReport};

/// Everything one run produced.
/// Only structured data is stored; the text forms are generated on demand.
#[derive(Debug, Clone, Serialize)]
pub struct RarefactionResults {
    /// All coefficients of all successful depth levels, in depth order
    pub records: Vec<CoefficientRecord>,

    /// One entry per configured depth level, including skipped ones
    pub levels: Vec<DepthReport>,
}

impl RarefactionResults {
    pub fn from_levels(levels: Vec<DepthReport>) -> Self {
        let records = levels
            .iter()
            .filter_map(|l| match &l.outcome {
                DepthOutcome::Succeeded { coefficients } => Some(coefficients.iter().cloned()),
                DepthOutcome::Skipped { .. } => None,
            })
            .flatten()
            .collect();
        Self { records, levels }
    }

    /// Depth levels that were skipped.
    pub fn skipped(&self) -> impl Iterator<Item = &DepthReport> {
        self.levels
            .iter()
            .filter(|l| matches!(l.outcome, DepthOutcome::Skipped { .. }))
    }

    /// Legacy text form: for every successful depth, a line with the list of
    /// coefficients followed by a line repeating the depth once per coefficient.
    pub fn get_results_text(&self) -> String {
        let mut output = String::new();
        for level in &self.levels {
            if let DepthOutcome::Succeeded { coefficients } = &level.outcome {
                let coefs: Vec<f64> = coefficients.iter().map(|c| c.coefficient).collect();
                let depths = vec![level.depth; coefs.len()];
                writeln!(output, "{:?}", coefs).unwrap();
                writeln!(output, "{:?}", depths).unwrap();
            }
        }
        output
    }

    /// Tab-separated form, one row per coefficient.
    pub fn get_results_tsv(&self) -> Result<String> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(Vec::new());
        for rec in &self.records {
            wtr.serialize(rec).map_err(std::io::Error::from)?;
        }
        let bytes = wtr.into_inner().map_err(|e| e.into_error())?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn get_results_json(&self) -> Result<String> {
        let mut s = serde_json::to_string_pretty(self).map_err(std::io::Error::from)?;
        s.push('\n');
        Ok(s)
    }
}

/// Run the whole rarefaction analysis described by `config` with the
/// containerized tools it names. The caller writes the results.
pub fn run_rarefaction(mut config: RarefactionConfig) -> Result<RarefactionResults> {
    config.validate()?;
    Orchestrator::from_config(config)?.run()
}
