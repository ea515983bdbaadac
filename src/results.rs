//src/results.rs

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{RarefactionError, Result};
use crate::RarefactionResults;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ResultFormat {
    /// Per successful depth: the coefficient list, then the matching depth labels
    Text,
    /// One row per coefficient
    Tsv,
    /// Coefficients plus the outcome of every depth level
    Json,
}

/// Render the accumulated results in `format`.
pub fn render(results: &RarefactionResults, format: ResultFormat) -> Result<String> {
    match format {
        ResultFormat::Text => Ok(results.get_results_text()),
        ResultFormat::Tsv => results.get_results_tsv(),
        ResultFormat::Json => results.get_results_json(),
    }
}

/// Fail early if `path` exists and may not be replaced.
///
/// Called before any depth level runs so a long run never ends on a
/// results file it is not allowed to write.
pub fn check_writable(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(RarefactionError::filesystem(
            path,
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "results file exists (use --force to overwrite)",
            ),
        ));
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "results".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

/// Write `content` to `path` once.
///
/// Without `force` an existing file is never touched and the call fails.
/// With `force` the old content is replaced as a whole: the new content is
/// written to a sibling temporary file and renamed over `path`.
pub fn write_results(path: &Path, content: &str, force: bool) -> Result<()> {
    check_writable(path, force)?;
    let tmp = temp_path(path);
    {
        let mut f = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|e| RarefactionError::filesystem(&tmp, e))?;
        f.write_all(content.as_bytes())
            .and_then(|_| f.sync_all())
            .map_err(|e| RarefactionError::filesystem(&tmp, e))?;
    }
    if !force && path.exists() {
        let _ = fs::remove_file(&tmp);
        return check_writable(path, force);
    }
    fs::rename(&tmp, path).map_err(|e| RarefactionError::filesystem(path, e))?;
    log::info!("Results written to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SkipReason;
    use crate::types::{CoefficientRecord, DepthOutcome, DepthReport};
    use pretty_assertions::assert_eq;

    fn sample_results() -> RarefactionResults {
        let recs = vec![
            CoefficientRecord { depth: 50, replicate_a: 0, replicate_b: 0, coefficient: 0.5, p_value: Some(0.01) },
            CoefficientRecord { depth: 50, replicate_a: 1, replicate_b: 1, coefficient: 1.0, p_value: None },
        ];
        RarefactionResults::from_levels(vec![
            DepthReport { depth: 50, outcome: DepthOutcome::Succeeded { coefficients: recs } },
            DepthReport { depth: 150, outcome: DepthOutcome::Skipped { reason: SkipReason::InsufficientDepth } },
        ])
    }

    #[test]
    fn test_text_format_lists_coefficients_and_depths() {
        let text = render(&sample_results(), ResultFormat::Text).unwrap();
        assert_eq!(text, "[0.5, 1.0]\n[50, 50]\n");
    }

    #[test]
    fn test_tsv_format() {
        let text = render(&sample_results(), ResultFormat::Tsv).unwrap();
        assert_eq!(
            text,
            "depth\treplicate_a\treplicate_b\tcoefficient\tp_value\n50\t0\t0\t0.5\t0.01\n50\t1\t1\t1.0\t\n"
        );
    }

    #[test]
    fn test_json_format_keeps_skipped_levels() {
        let text = render(&sample_results(), ResultFormat::Json).unwrap();
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["records"].as_array().unwrap().len(), 2);
        assert_eq!(v["levels"][1]["status"], "skipped");
        assert_eq!(v["levels"][1]["reason"]["kind"], "insufficient_depth");
    }

    #[test]
    fn test_existing_file_needs_force() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("results.txt");
        write_results(&p, "first\n", false).unwrap();
        assert!(matches!(
            write_results(&p, "second\n", false),
            Err(RarefactionError::Filesystem { .. })
        ));
        assert_eq!(fs::read_to_string(&p).unwrap(), "first\n");

        write_results(&p, "second\n", true).unwrap();
        assert_eq!(fs::read_to_string(&p).unwrap(), "second\n");
        assert!(!temp_path(&p).exists());
    }
}
