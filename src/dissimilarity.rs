//src/dissimilarity.rs

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::Path;

use crate::error::{RarefactionError, Result};
use crate::types::ReportDir;

const SYMMETRY_TOLERANCE: f64 = 1e-9;

/// Square, symmetric matrix of pairwise dissimilarities between labelled samples.
#[derive(Debug, Clone, PartialEq)]
pub struct DissimilarityMatrix {
    labels: Vec<String>,
    /// row-major, `labels.len()^2` entries
    values: Vec<f64>,
}

impl DissimilarityMatrix {
    pub fn new(labels: Vec<String>, values: Vec<f64>) -> std::result::Result<Self, String> {
        let n = labels.len();
        if values.len() != n * n {
            return Err(format!("{} labels but {} values", n, values.len()));
        }
        let mut seen = ahash::AHashSet::new();
        for l in &labels {
            if !seen.insert(l.as_str()) {
                return Err(format!("duplicate sample label {:?}", l));
            }
        }
        if let Some(v) = values.iter().find(|v| !v.is_finite()) {
            return Err(format!("non-finite dissimilarity {}", v));
        }
        for i in 0..n {
            for j in (i + 1)..n {
                let (a, b) = (values[i * n + j], values[j * n + i]);
                if (a - b).abs() > SYMMETRY_TOLERANCE * a.abs().max(b.abs()).max(1.0) {
                    return Err(format!(
                        "matrix is not symmetric at ({}, {}): {} vs {}",
                        labels[i], labels[j], a, b
                    ));
                }
            }
        }
        Ok(Self { labels, values })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.len() + j]
    }

    /// Same matrix with rows and columns in the order of `labels`, or None
    /// when the label sets differ.
    pub fn reordered(&self, labels: &[String]) -> Option<Self> {
        if labels.len() != self.len() {
            return None;
        }
        let pos: Vec<usize> = labels
            .iter()
            .map(|l| self.labels.iter().position(|m| m == l))
            .collect::<Option<_>>()?;
        let n = self.len();
        let mut values = Vec::with_capacity(n * n);
        for &i in &pos {
            for &j in &pos {
                values.push(self.get(i, j));
            }
        }
        Some(Self {
            labels: labels.to_vec(),
            values,
        })
    }

    /// Parse the delimited-text form: a header row of sample labels (its first
    /// cell is the index name and ignored), then one labelled row per sample.
    pub fn from_csv(text: &str) -> std::result::Result<Self, String> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let header = rdr.headers().map_err(|e| e.to_string())?.clone();
        let labels: Vec<String> = header.iter().skip(1).map(str::to_string).collect();
        if labels.is_empty() {
            return Err("header row has no sample labels".to_string());
        }

        let mut values = Vec::with_capacity(labels.len() * labels.len());
        let mut row_labels = Vec::with_capacity(labels.len());
        for row in rdr.records() {
            let row = row.map_err(|e| e.to_string())?;
            let mut cells = row.iter();
            let label = cells.next().unwrap_or_default().to_string();
            for cell in cells {
                let v: f64 = cell
                    .parse()
                    .map_err(|_| format!("row {:?}: {:?} is not a number", label, cell))?;
                values.push(v);
            }
            row_labels.push(label);
        }
        if row_labels != labels {
            return Err(format!(
                "row labels {:?} do not match column labels {:?}",
                row_labels, labels
            ));
        }
        Self::new(labels, values)
    }

    /// Inverse of [`DissimilarityMatrix::from_csv`]; values use the shortest
    /// representation that parses back to the same `f64`.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        for l in &self.labels {
            write!(out, ",{}", l).unwrap();
        }
        out.push('\n');
        for (i, l) in self.labels.iter().enumerate() {
            out.push_str(l);
            for j in 0..self.len() {
                write!(out, ",{}", self.get(i, j)).unwrap();
            }
            out.push('\n');
        }
        out
    }

    /// Decode a base64 payload wrapping the CSV form.
    pub fn decode_payload(payload: &str) -> std::result::Result<Self, String> {
        let bytes = BASE64
            .decode(payload.trim().as_bytes())
            .map_err(|e| format!("invalid base64 payload: {}", e))?;
        let text = String::from_utf8(bytes).map_err(|e| format!("payload is not UTF-8: {}", e))?;
        Self::from_csv(&text)
    }

    pub fn encode_payload(&self) -> String {
        BASE64.encode(self.to_csv().as_bytes())
    }
}

/// Load the report of one replicate and decode the matrix found at `pointer`.
///
/// The report may hold the document itself or a JSON string containing the
/// document; both forms are accepted.
pub fn extract_matrix(report: &ReportDir, report_name: &str, pointer: &str) -> Result<DissimilarityMatrix> {
    let path = report.path.join(report_name);
    log::debug!("Decoding {} report of replicate {}", report.stage, report.replicate);
    let text = fs::read_to_string(&path).map_err(|e| {
        RarefactionError::decode(
            &path,
            format!("cannot read {} report of replicate {}: {}", report.stage, report.replicate, e),
        )
    })?;
    matrix_from_report_text(&path, &text, pointer)
}

pub fn matrix_from_report_text(path: &Path, text: &str, pointer: &str) -> Result<DissimilarityMatrix> {
    let mut doc: Value = serde_json::from_str(text)
        .map_err(|e| RarefactionError::decode(path, format!("invalid JSON: {}", e)))?;
    if let Value::String(inner) = &doc {
        doc = serde_json::from_str(inner)
            .map_err(|e| RarefactionError::decode(path, format!("invalid embedded JSON: {}", e)))?;
    }

    let payload = doc
        .pointer(pointer)
        .ok_or_else(|| RarefactionError::decode(path, format!("no field at {}", pointer)))?
        .as_str()
        .ok_or_else(|| RarefactionError::decode(path, format!("field at {} is not a string", pointer)))?;

    DissimilarityMatrix::decode_payload(payload).map_err(|m| RarefactionError::decode(path, m))
}

/// Decode the matrices of a whole stage, in replicate order.
pub fn extract_stage(reports: &[ReportDir], report_name: &str, pointer: &str) -> Result<Vec<DissimilarityMatrix>> {
    let mut sorted: Vec<&ReportDir> = reports.iter().collect();
    sorted.sort_by_key(|r| r.replicate);
    sorted
        .into_iter()
        .map(|r| extract_matrix(r, report_name, pointer))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{DEFAULT_MATRIX_POINTER, DEFAULT_REPORT_NAME};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    pub(crate) fn matrix(labels: &[&str], rows: &[&[f64]]) -> DissimilarityMatrix {
        DissimilarityMatrix::new(
            labels.iter().map(|s| s.to_string()).collect(),
            rows.iter().flat_map(|r| r.iter().copied()).collect(),
        )
        .unwrap()
    }

    /// Report text in the doubly-encoded form the k-mer tools emit.
    pub(crate) fn report_json(m: &DissimilarityMatrix) -> String {
        let inner = serde_json::json!({
            "mds_kmer": { "kmer_dissim_matrix": { "link_content": m.encode_payload() } }
        });
        serde_json::to_string(&Value::String(inner.to_string())).unwrap()
    }

    #[test]
    fn test_payload_round_trip() {
        let m = matrix(
            &["S1", "S2", "S3"],
            &[&[0.0, 0.125, 0.3333333333333333], &[0.125, 0.0, 0.7], &[0.3333333333333333, 0.7, 0.0]],
        );
        assert_eq!(DissimilarityMatrix::decode_payload(&m.encode_payload()).unwrap(), m);
    }

    #[test]
    fn test_parses_pandas_style_csv() {
        let text = ",A,B\nA,0.0,1.5\nB,1.5,0.0\n";
        let m = DissimilarityMatrix::from_csv(text).unwrap();
        assert_eq!(m.labels(), &["A".to_string(), "B".to_string()]);
        assert_eq!(m.get(0, 1), 1.5);
    }

    #[test]
    fn test_rejects_bad_matrices() {
        assert!(DissimilarityMatrix::from_csv(",A,B\nA,0,1\nB,2,0\n").is_err());
        assert!(DissimilarityMatrix::from_csv(",A,B\nA,0,1\nC,1,0\n").is_err());
        assert!(DissimilarityMatrix::from_csv(",A,B\nA,0,x\nB,1,0\n").is_err());
        assert!(DissimilarityMatrix::from_csv(",A,B\nA,0,1\n").is_err());
        assert!(DissimilarityMatrix::decode_payload("%%%").is_err());
    }

    #[test]
    fn test_reordered() {
        let m = matrix(&["A", "B", "C"], &[&[0.0, 1.0, 2.0], &[1.0, 0.0, 3.0], &[2.0, 3.0, 0.0]]);
        let r = m.reordered(&["C".into(), "A".into(), "B".into()]).unwrap();
        assert_eq!(r.get(0, 1), 2.0);
        assert_eq!(r.get(0, 2), 3.0);
        assert!(m.reordered(&["A".into(), "B".into(), "D".into()]).is_none());
    }

    #[test]
    fn test_extract_from_report_dir() {
        let dir = tempfile::tempdir().unwrap();
        let m = matrix(&["A", "B", "C"], &[&[0.0, 0.5, 0.5], &[0.5, 0.0, 0.5], &[0.5, 0.5, 0.0]]);
        fs::write(dir.path().join(DEFAULT_REPORT_NAME), report_json(&m)).unwrap();
        let report = ReportDir {
            replicate: 0,
            stage: "primary".into(),
            path: dir.path().to_path_buf(),
        };
        let got = extract_matrix(&report, DEFAULT_REPORT_NAME, DEFAULT_MATRIX_POINTER).unwrap();
        assert_eq!(got, m);
    }

    #[test]
    fn test_plain_document_is_accepted() {
        let m = matrix(&["A", "B"], &[&[0.0, 1.0], &[1.0, 0.0]]);
        let doc = serde_json::json!({
            "mds_kmer": { "kmer_dissim_matrix": { "link_content": m.encode_payload() } }
        });
        let got = matrix_from_report_text(Path::new("r.json"), &doc.to_string(), DEFAULT_MATRIX_POINTER).unwrap();
        assert_eq!(got, m);
    }

    #[test]
    fn test_missing_report_and_field_are_decode_errors() {
        let report = ReportDir {
            replicate: 4,
            stage: "secondary".into(),
            path: PathBuf::from("/nonexistent/report/dir"),
        };
        match extract_matrix(&report, DEFAULT_REPORT_NAME, DEFAULT_MATRIX_POINTER) {
            Err(RarefactionError::Decode { message, .. }) => {
                assert!(message.contains("secondary report of replicate 4"), "{message}");
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(matches!(
            matrix_from_report_text(Path::new("r.json"), r#"{"mds_kmer": {}}"#, DEFAULT_MATRIX_POINTER),
            Err(RarefactionError::Decode { .. })
        ));
        assert!(matches!(
            matrix_from_report_text(Path::new("r.json"), "not json", DEFAULT_MATRIX_POINTER),
            Err(RarefactionError::Decode { .. })
        ));
    }
}
