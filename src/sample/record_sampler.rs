use ahash::AHashMap;
use rayon::prelude::*;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::draw_rng;
use crate::error::{RarefactionError, Result};
use crate::fastq::{count_records, fastq_stem, FastqReader, InputFile};
use crate::types::FastqRecord;

const PROGRESS_EVERY: usize = 100_000;

/// Draw `replicates` independent sets of `k` distinct record indices from
/// `[0, total)`. Sets may overlap each other.
///
/// `seed_parts` identifies the draw (depth, file) so seeded runs differ per
/// file and per level while staying reproducible.
pub fn draw_index_sets(
    path: &Path,
    total: usize,
    k: usize,
    replicates: usize,
    seed: Option<u64>,
    seed_parts: &[u64],
) -> Result<Vec<Vec<usize>>> {
    if k > total {
        return Err(RarefactionError::InsufficientDepth {
            file: path.to_path_buf(),
            requested: k,
            available: total,
        });
    }

    Ok((0..replicates)
        .into_par_iter()
        .map(|rep| {
            let mut parts = seed_parts.to_vec();
            parts.push(rep as u64);
            let mut rng = draw_rng(seed, &parts);
            let mut idx = rand::seq::index::sample(&mut rng, total, k).into_vec();
            idx.sort_unstable();
            idx
        })
        .collect())
}

/// The draws for one input file, ready to be written in one pass.
#[derive(Debug, Clone)]
pub struct SamplePlan {
    pub path: PathBuf,
    pub stem: String,
    pub depth: usize,
    pub replicates: usize,
    /// record index -> replicates that selected it
    selections: AHashMap<usize, Vec<usize>>,
    last_selected: Option<usize>,
}

impl SamplePlan {
    pub fn from_index_sets(
        path: PathBuf,
        stem: String,
        depth: usize,
        index_sets: &[Vec<usize>],
    ) -> Self {
        let mut selections: AHashMap<usize, Vec<usize>> = AHashMap::new();
        for (rep, set) in index_sets.iter().enumerate() {
            for &idx in set {
                selections.entry(idx).or_default().push(rep);
            }
        }
        let last_selected = selections.keys().copied().max();
        Self {
            path,
            stem,
            depth,
            replicates: index_sets.len(),
            selections,
            last_selected,
        }
    }

    /// Output file of replicate `rep` below `out_root`.
    pub fn output_path(&self, out_root: &Path, rep: usize) -> PathBuf {
        out_root
            .join(rep.to_string())
            .join(format!("{}_{}.fastq", self.stem, rep))
    }

    /// Copy the selected records into `out_root/<rep>/<stem>_<rep>.fastq`
    /// for every replicate, reading the input once.
    pub fn write(&self, out_root: &Path) -> Result<Vec<PathBuf>> {
        let paths: Vec<PathBuf> = (0..self.replicates)
            .map(|rep| self.output_path(out_root, rep))
            .collect();
        let mut writers = paths
            .iter()
            .map(|p| create_output(p))
            .collect::<Result<Vec<_>>>()?;
        let mut written = vec![0usize; self.replicates];

        log::debug!("Start sampling {:?} at depth {}", self.path, self.depth);
        if let Some(last) = self.last_selected {
            for (idx, rec) in FastqReader::open(&self.path)?.enumerate() {
                let rec = rec?;
                if let Some(reps) = self.selections.get(&idx) {
                    for &rep in reps {
                        write_record(&mut writers[rep], &rec)
                            .map_err(|e| RarefactionError::filesystem(&paths[rep], e))?;
                        written[rep] += 1;
                    }
                }
                if (idx + 1) % PROGRESS_EVERY == 0 {
                    log::debug!("{:?}: {} records scanned", self.path, idx + 1);
                }
                if idx >= last {
                    break;
                }
            }
        }

        for (w, p) in writers.iter_mut().zip(&paths) {
            w.flush().map_err(|e| RarefactionError::filesystem(p, e))?;
        }
        if let Some(short) = written.iter().position(|&n| n != self.depth) {
            return Err(RarefactionError::malformed(
                &self.path,
                format!(
                    "replicate {} received {} of {} records, file changed since it was counted",
                    short, written[short], self.depth
                ),
            ));
        }
        log::debug!("Finish sampling {:?}", self.path);
        Ok(paths)
    }
}

fn create_output(path: &Path) -> Result<BufWriter<File>> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map(BufWriter::new)
        .map_err(|e| RarefactionError::filesystem(path, e))
}

fn write_record<W: Write>(w: &mut W, rec: &FastqRecord) -> std::io::Result<()> {
    for (line, end) in [&rec.header, &rec.seq, &rec.separator, &rec.quals]
        .into_iter()
        .zip(rec.line_ends)
    {
        w.write_all(line)?;
        w.write_all(end.as_bytes())?;
    }
    Ok(())
}

/// Plan the draws for one already-counted input file.
pub fn plan_file_sample(
    file: &InputFile,
    file_index: usize,
    depth: usize,
    replicates: usize,
    seed: Option<u64>,
) -> Result<SamplePlan> {
    let sets = draw_index_sets(
        &file.path,
        file.records,
        depth,
        replicates,
        seed,
        &[depth as u64, file_index as u64],
    )?;
    Ok(SamplePlan::from_index_sets(
        file.path.clone(),
        file.stem.clone(),
        depth,
        &sets,
    ))
}

/// Subsample one FASTQ file into `replicates` files of exactly `depth`
/// records under `out_root/<rep>/`. The replicate directories must exist.
///
/// Nothing is written when `depth` exceeds the records in the file.
pub fn sample_file(
    path: &Path,
    out_root: &Path,
    depth: usize,
    replicates: usize,
    seed: Option<u64>,
) -> Result<Vec<PathBuf>> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file = InputFile {
        path: path.to_path_buf(),
        stem: fastq_stem(&name).to_string(),
        records: count_records(path)?,
    };
    plan_file_sample(&file, 0, depth, replicates, seed)?.write(out_root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fastq::read_fastq_records;
    use crate::fastq::tests::fastq_text;
    use std::collections::HashSet;
    use std::fs;

    fn setup(records: usize, replicates: usize) -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("reads.fastq");
        fs::write(&input, fastq_text(records, "r")).unwrap();
        let out = dir.path().join("out");
        for rep in 0..replicates {
            fs::create_dir_all(out.join(rep.to_string())).unwrap();
        }
        (dir, input, out)
    }

    #[test]
    fn test_draws_are_distinct_and_in_range() {
        let sets = draw_index_sets(Path::new("x"), 100, 100, 3, Some(7), &[1]).unwrap();
        for set in &sets {
            assert_eq!(set.len(), 100);
            assert_eq!(set.iter().collect::<HashSet<_>>().len(), 100);
            assert!(set.iter().all(|&i| i < 100));
        }
    }

    #[test]
    fn test_seeded_draws_are_reproducible_and_independent() {
        let a = draw_index_sets(Path::new("x"), 100_000, 50, 4, Some(42), &[50, 0]).unwrap();
        let b = draw_index_sets(Path::new("x"), 100_000, 50, 4, Some(42), &[50, 0]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a[0], a[1]);
        let other_file = draw_index_sets(Path::new("x"), 100_000, 50, 4, Some(42), &[50, 1]).unwrap();
        assert_ne!(a[0], other_file[0]);
    }

    #[test]
    fn test_depth_above_total_is_insufficient() {
        let err = draw_index_sets(Path::new("x"), 100, 101, 2, None, &[]).unwrap_err();
        assert!(matches!(
            err,
            RarefactionError::InsufficientDepth { requested: 101, available: 100, .. }
        ));
    }

    #[test]
    fn test_sample_file_writes_exact_depth() {
        let (_dir, input, out) = setup(100, 4);
        let outputs = sample_file(&input, &out, 50, 4, None).unwrap();
        assert_eq!(outputs.len(), 4);

        let originals: HashSet<Vec<u8>> = read_fastq_records(&input)
            .unwrap()
            .into_iter()
            .map(|r| r.header)
            .collect();
        let mut contents = HashSet::new();
        for (rep, p) in outputs.iter().enumerate() {
            assert_eq!(p, &out.join(rep.to_string()).join(format!("reads_{rep}.fastq")));
            let recs = read_fastq_records(p).unwrap();
            assert_eq!(recs.len(), 50);
            let ids: HashSet<_> = recs.iter().map(|r| r.header.clone()).collect();
            assert_eq!(ids.len(), 50);
            assert!(ids.is_subset(&originals));
            contents.insert(fs::read(p).unwrap());
        }
        assert_eq!(contents.len(), 4);
    }

    #[test]
    fn test_full_depth_copies_every_record_in_order() {
        let (_dir, input, out) = setup(10, 1);
        let outputs = sample_file(&input, &out, 10, 1, Some(1)).unwrap();
        assert_eq!(fs::read_to_string(&outputs[0]).unwrap(), fastq_text(10, "r"));
    }

    #[test]
    fn test_crlf_records_are_copied_unchanged() {
        let (dir, _input, out) = setup(0, 1);
        let input = dir.path().join("dos.fastq");
        let text = fastq_text(6, "d").replace('\n', "\r\n");
        fs::write(&input, &text).unwrap();
        let outputs = sample_file(&input, &out, 6, 1, Some(3)).unwrap();
        assert_eq!(fs::read_to_string(&outputs[0]).unwrap(), text);
    }

    #[test]
    fn test_insufficient_depth_leaves_no_files() {
        let (_dir, input, out) = setup(100, 2);
        let err = sample_file(&input, &out, 150, 2, None).unwrap_err();
        assert!(matches!(err, RarefactionError::InsufficientDepth { .. }));
        for rep in 0..2 {
            assert_eq!(fs::read_dir(out.join(rep.to_string())).unwrap().count(), 0);
        }
    }
}
