use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;

use crate::error::{RarefactionError, Result};
use crate::types::{FastqRecord, LineEnd};

const GZ_BUF_SIZE: usize = 1 << 22;
const FASTQ_SUFFIXES: &[&str] = &[".fastq", ".fq", ".fastq.gz", ".fq.gz"];

/// Open a plain or gzipped file, deciding by the ".gz" extension.
pub fn open_with_gz<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead + Send>> {
    let path = path.as_ref();
    let f = File::open(path).map_err(|e| RarefactionError::filesystem(path, e))?;

    let is_gz = path
        .extension()
        .map(|ext| ext == "gz")
        .unwrap_or(false);

    Ok(if is_gz {
        Box::new(BufReader::with_capacity(GZ_BUF_SIZE, MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    })
}

/// Streaming reader over 4-line FASTQ records.
///
/// A truncated final record, a header not starting with '@' or a separator
/// not starting with '+' is reported as `MalformedInput`.
pub struct FastqReader {
    reader: Box<dyn BufRead + Send>,
    path: PathBuf,
    record_number: usize,
}

impl FastqReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        Ok(Self {
            reader: open_with_gz(&path)?,
            path,
            record_number: 0,
        })
    }

    /// Reads one line into `buf` without its terminator; `None` at EOF.
    fn read_line(&mut self, buf: &mut Vec<u8>) -> Result<Option<LineEnd>> {
        buf.clear();
        if self.reader.read_until(b'\n', buf)? == 0 {
            return Ok(None);
        }
        let mut end = LineEnd::Lf;
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
                end = LineEnd::CrLf;
            }
        }
        Ok(Some(end))
    }

    fn next_record(&mut self) -> Result<Option<FastqRecord>> {
        let mut header = Vec::new();
        let mut line_ends = [LineEnd::Lf; 4];
        match self.read_line(&mut header)? {
            Some(end) => line_ends[0] = end,
            None => return Ok(None),
        }
        if !header.starts_with(b"@") {
            return Err(RarefactionError::malformed(
                &self.path,
                format!("record {} header does not start with '@'", self.record_number),
            ));
        }

        let mut seq = Vec::new();
        let mut separator = Vec::new();
        let mut quals = Vec::new();
        for (line, end) in [&mut seq, &mut separator, &mut quals]
            .into_iter()
            .zip(line_ends[1..].iter_mut())
        {
            *end = self.read_line(line)?.ok_or_else(|| {
                RarefactionError::malformed(
                    &self.path,
                    format!(
                        "record {} is truncated, line count is not a multiple of 4",
                        self.record_number
                    ),
                )
            })?;
        }
        if !separator.starts_with(b"+") {
            return Err(RarefactionError::malformed(
                &self.path,
                format!("record {} separator does not start with '+'", self.record_number),
            ));
        }

        self.record_number += 1;
        Ok(Some(FastqRecord {
            header,
            seq,
            separator,
            quals,
            line_ends,
        }))
    }
}

impl Iterator for FastqReader {
    type Item = Result<FastqRecord>;

    fn next(&mut self) -> Option<Result<FastqRecord>> {
        self.next_record().transpose()
    }
}

/// Count the records of a FASTQ file in one pass.
pub fn count_records<P: AsRef<Path>>(path: P) -> Result<usize> {
    let mut n = 0;
    for rec in FastqReader::open(path)? {
        rec?;
        n += 1;
    }
    Ok(n)
}

/// Load all records of a file. Only meant for small files.
pub fn read_fastq_records<P: AsRef<Path>>(path: P) -> Result<Vec<FastqRecord>> {
    FastqReader::open(path)?.collect()
}

pub fn is_fastq_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    FASTQ_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

/// File name with ".gz" and then ".fastq"/".fq" removed.
pub fn fastq_stem(name: &str) -> &str {
    let base = strip_suffix_ci(name, ".gz").unwrap_or(name);
    strip_suffix_ci(base, ".fastq")
        .or_else(|| strip_suffix_ci(base, ".fq"))
        .unwrap_or(base)
}

fn strip_suffix_ci<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    let cut = s.len().checked_sub(suffix.len())?;
    if s.is_char_boundary(cut) && s[cut..].eq_ignore_ascii_case(suffix) {
        Some(&s[..cut])
    } else {
        None
    }
}

/// An input FASTQ file and its record count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub path: PathBuf,
    pub stem: String,
    pub records: usize,
}

/// The FASTQ files of the input directory, counted once per run.
#[derive(Debug, Clone)]
pub struct InputCorpus {
    pub files: Vec<InputFile>,
}

impl InputCorpus {
    pub fn scan<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| RarefactionError::filesystem(dir, e))? {
            let path = entry?.path();
            let name = match path.file_name() {
                Some(n) => n.to_string_lossy().into_owned(),
                None => continue,
            };
            if path.is_file() && is_fastq_name(&name) {
                paths.push((path, name));
            } else {
                log::debug!("Ignoring {:?}", path);
            }
        }
        paths.sort();

        if paths.is_empty() {
            return Err(RarefactionError::config(format!(
                "no FASTQ files found in {:?}",
                dir
            )));
        }

        let mut files = Vec::with_capacity(paths.len());
        let mut stems = ahash::AHashSet::new();
        for (path, name) in paths {
            let stem = fastq_stem(&name).to_string();
            if !stems.insert(stem.clone()) {
                return Err(RarefactionError::config(format!(
                    "input files collide on output name {:?}",
                    stem
                )));
            }
            let records = count_records(&path)?;
            log::info!("{:?}: {} records", path, records);
            files.push(InputFile { path, stem, records });
        }
        Ok(Self { files })
    }

    /// Smallest record count over all files, the deepest level that can succeed.
    pub fn min_records(&self) -> usize {
        self.files.iter().map(|f| f.records).min().unwrap_or(0)
    }
}
