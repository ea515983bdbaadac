//src/error.rs

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Every failure the pipeline can raise.
///
/// Whether a failure ends the whole run or only the current depth level is
/// decided by [`RarefactionError::disposition`], not by the call site.
#[derive(Error, Debug)]
pub enum RarefactionError {
    /// Requested read count exceeds the records available in one input file
    #[error("requested {requested} reads but {file:?} only holds {available}")]
    InsufficientDepth {
        file: PathBuf,
        requested: usize,
        available: usize,
    },

    /// The external analysis tool exited with failure or could not be spawned
    #[error("tool {tool} failed on stage {stage}, replicate {replicate}: {message}")]
    ToolInvocation {
        tool: String,
        stage: String,
        replicate: usize,
        message: String,
    },

    /// The external analysis tool ran past its deadline and was killed
    #[error("tool {tool} timed out after {timeout:?} on stage {stage}, replicate {replicate}")]
    ToolTimeout {
        tool: String,
        stage: String,
        replicate: usize,
        timeout: Duration,
    },

    /// Missing or malformed report document / matrix payload
    #[error("cannot decode {path:?}: {message}")]
    Decode { path: PathBuf, message: String },

    /// Matrices that cannot be compared (label mismatch, too few samples)
    #[error("statistics error: {message}")]
    Statistics { message: String },

    /// Input reads that do not follow the 4-line record layout
    #[error("malformed FASTQ {path:?}: {message}")]
    MalformedInput { path: PathBuf, message: String },

    /// Working tree problems (directory exists, permission denied, ...)
    #[error("filesystem error at {path:?}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid options
    #[error("configuration error: {message}")]
    Config { message: String },
}

pub type Result<T> = std::result::Result<T, RarefactionError>;

/// Why a depth level contributed no coefficients.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    InsufficientDepth,
    ToolFailure(String),
    DecodeFailure(String),
    StatisticsFailure(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::InsufficientDepth => write!(f, "read number exceeds reads in sample"),
            SkipReason::ToolFailure(m) => write!(f, "analysis tool failure: {m}"),
            SkipReason::DecodeFailure(m) => write!(f, "report decode failure: {m}"),
            SkipReason::StatisticsFailure(m) => write!(f, "correlation failure: {m}"),
        }
    }
}

/// What the orchestrator should do with an error raised inside a depth level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Skip(SkipReason),
    Fatal,
}

impl RarefactionError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn decode(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Decode {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn statistics(message: impl Into<String>) -> Self {
        Self::Statistics {
            message: message.into(),
        }
    }

    pub fn malformed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::MalformedInput {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Classify this error for the depth-level loop.
    ///
    /// `InsufficientDepth` always skips the level. Tool, decode and statistics
    /// failures skip unless `fail_fast` is set. Everything else describes the
    /// environment rather than the data and ends the run.
    pub fn disposition(&self, fail_fast: bool) -> Disposition {
        let soft = match self {
            RarefactionError::InsufficientDepth { .. } => {
                return Disposition::Skip(SkipReason::InsufficientDepth)
            }
            RarefactionError::ToolInvocation { .. } | RarefactionError::ToolTimeout { .. } => {
                SkipReason::ToolFailure(self.to_string())
            }
            RarefactionError::Decode { .. } => SkipReason::DecodeFailure(self.to_string()),
            RarefactionError::Statistics { .. } => SkipReason::StatisticsFailure(self.to_string()),
            RarefactionError::MalformedInput { .. }
            | RarefactionError::Filesystem { .. }
            | RarefactionError::Io(_)
            | RarefactionError::Config { .. } => return Disposition::Fatal,
        };
        if fail_fast {
            Disposition::Fatal
        } else {
            Disposition::Skip(soft)
        }
    }
}
