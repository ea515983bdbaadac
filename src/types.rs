//src/types.rs

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::error::SkipReason;

/// Terminator of one input line. A final line without one is written back
/// with `Lf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineEnd {
    #[default]
    Lf,
    CrLf,
}

impl LineEnd {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            LineEnd::Lf => b"\n",
            LineEnd::CrLf => b"\r\n",
        }
    }
}

/// One FASTQ record, the four lines stored without their line terminators.
/// The terminators are kept apart so the record can be written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastqRecord {
    pub header: Vec<u8>,
    pub seq: Vec<u8>,
    pub separator: Vec<u8>,
    pub quals: Vec<u8>,
    pub line_ends: [LineEnd; 4],
}

/// One correlation coefficient, tagged with the depth level it belongs to.
/// Never mutated after the correlation engine creates it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoefficientRecord {
    pub depth: usize,
    pub replicate_a: usize,
    pub replicate_b: usize,
    pub coefficient: f64,
    pub p_value: Option<f64>,
}

/// Result of one depth-level iteration that did not end the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DepthOutcome {
    Succeeded { coefficients: Vec<CoefficientRecord> },
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepthReport {
    pub depth: usize,
    #[serde(flatten)]
    pub outcome: DepthOutcome,
}

/// States a depth level moves through; only used for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepthState {
    Sampling,
    Analyzing(String),
    Extracting,
    Correlating,
    Succeeded,
    Skipped,
}

impl fmt::Display for DepthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepthState::Sampling => write!(f, "sampling"),
            DepthState::Analyzing(stage) => write!(f, "analyzing({stage})"),
            DepthState::Extracting => write!(f, "extracting"),
            DepthState::Correlating => write!(f, "correlating"),
            DepthState::Succeeded => write!(f, "succeeded"),
            DepthState::Skipped => write!(f, "skipped"),
        }
    }
}

/// Report directory written by one analysis stage for one replicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDir {
    pub replicate: usize,
    pub stage: String,
    pub path: PathBuf,
}
