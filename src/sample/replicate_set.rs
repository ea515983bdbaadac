use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

use super::record_sampler::{plan_file_sample, SamplePlan};
use crate::error::{RarefactionError, Result};
use crate::fastq::InputCorpus;
use crate::workdir::WorkRoot;

/// A materialized replicate tree: `root/{0..R-1}/<stem>_<rep>.fastq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicateSet {
    pub root: PathBuf,
    pub depth: usize,
    pub dirs: Vec<PathBuf>,
}

impl ReplicateSet {
    pub fn replicates(&self) -> usize {
        self.dirs.len()
    }
}

fn create_replicate_dirs(work: &WorkRoot, root: &Path, replicates: usize) -> Result<Vec<PathBuf>> {
    (0..replicates)
        .map(|rep| work.create_dir(root.join(rep.to_string())))
        .collect()
}

/// Subsample every file of `corpus` to `depth` records, `replicates` times.
///
/// Replicate directories are created first. All draws are planned before any
/// file is written, so an `InsufficientDepth` failure leaves empty directories
/// only. Files are sampled in parallel; each writes to its own output names.
pub fn build_replicate_set(
    work: &WorkRoot,
    root: &Path,
    corpus: &InputCorpus,
    depth: usize,
    replicates: usize,
    seed: Option<u64>,
) -> Result<ReplicateSet> {
    log::info!("Start sampling {} replicates at depth {}", replicates, depth);
    let dirs = create_replicate_dirs(work, root, replicates)?;

    let plans: Vec<SamplePlan> = corpus
        .files
        .par_iter()
        .enumerate()
        .map(|(i, file)| plan_file_sample(file, i, depth, replicates, seed))
        .collect::<Result<_>>()?;

    plans
        .par_iter()
        .map(|plan| plan.write(root).map(|_| ()))
        .collect::<Result<Vec<()>>>()?;

    log::info!("Finish sampling");
    Ok(ReplicateSet {
        root: root.to_path_buf(),
        depth,
        dirs,
    })
}

/// Copy a replicate tree to `dest_root`, for a stage that consumes its own copy.
pub fn copy_replicate_set(work: &WorkRoot, set: &ReplicateSet, dest_root: &Path) -> Result<ReplicateSet> {
    let dirs = create_replicate_dirs(work, dest_root, set.replicates())?;
    for (src, dst) in set.dirs.iter().zip(&dirs) {
        for entry in fs::read_dir(src).map_err(|e| RarefactionError::filesystem(src, e))? {
            let entry = entry?;
            let target = dst.join(entry.file_name());
            fs::copy(entry.path(), &target).map_err(|e| RarefactionError::filesystem(&target, e))?;
        }
    }
    Ok(ReplicateSet {
        root: dest_root.to_path_buf(),
        depth: set.depth,
        dirs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fastq::read_fastq_records;
    use crate::fastq::tests::fastq_text;
    use pretty_assertions::assert_eq;

    fn corpus_dir(files: &[(&str, usize)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, n) in files {
            fs::write(dir.path().join(name), fastq_text(*n, name)).unwrap();
        }
        dir
    }

    #[test]
    fn test_one_file_four_replicates() {
        let input = corpus_dir(&[("sample.fastq", 100)]);
        let scratch = tempfile::tempdir().unwrap();
        let work = WorkRoot::claim(scratch.path().join("work"), false).unwrap();
        let corpus = InputCorpus::scan(input.path()).unwrap();

        let root = work.path().join("primary");
        let set = build_replicate_set(&work, &root, &corpus, 50, 4, None).unwrap();
        assert_eq!(set.replicates(), 4);

        let mut bodies = Vec::new();
        for (rep, dir) in set.dirs.iter().enumerate() {
            assert_eq!(dir, &root.join(rep.to_string()));
            let files: Vec<_> = fs::read_dir(dir).unwrap().map(|e| e.unwrap().path()).collect();
            assert_eq!(files.len(), 1);
            assert_eq!(read_fastq_records(&files[0]).unwrap().len(), 50);
            bodies.push(fs::read(&files[0]).unwrap());
        }
        bodies.sort();
        bodies.dedup();
        assert_eq!(bodies.len(), 4);
    }

    #[test]
    fn test_every_file_lands_in_every_replicate() {
        let input = corpus_dir(&[("a.fastq", 30), ("b.fq", 40)]);
        let scratch = tempfile::tempdir().unwrap();
        let work = WorkRoot::claim(scratch.path().join("work"), false).unwrap();
        let corpus = InputCorpus::scan(input.path()).unwrap();

        let set = build_replicate_set(&work, &work.path().join("s"), &corpus, 20, 3, Some(3)).unwrap();
        for (rep, dir) in set.dirs.iter().enumerate() {
            let mut names: Vec<String> = fs::read_dir(dir)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            assert_eq!(names, vec![format!("a_{rep}.fastq"), format!("b_{rep}.fastq")]);
        }
    }

    #[test]
    fn test_insufficient_depth_in_any_file_writes_nothing() {
        let input = corpus_dir(&[("a.fastq", 100), ("b.fastq", 10)]);
        let scratch = tempfile::tempdir().unwrap();
        let work = WorkRoot::claim(scratch.path().join("work"), false).unwrap();
        let corpus = InputCorpus::scan(input.path()).unwrap();

        let root = work.path().join("s");
        let err = build_replicate_set(&work, &root, &corpus, 50, 2, None).unwrap_err();
        assert!(matches!(err, RarefactionError::InsufficientDepth { available: 10, .. }));
        for rep in 0..2 {
            assert_eq!(fs::read_dir(root.join(rep.to_string())).unwrap().count(), 0);
        }
    }

    #[test]
    fn test_copy_is_independent() {
        let input = corpus_dir(&[("a.fastq", 20)]);
        let scratch = tempfile::tempdir().unwrap();
        let work = WorkRoot::claim(scratch.path().join("work"), false).unwrap();
        let corpus = InputCorpus::scan(input.path()).unwrap();

        let set = build_replicate_set(&work, &work.path().join("one"), &corpus, 5, 2, None).unwrap();
        let copy = copy_replicate_set(&work, &set, &work.path().join("two")).unwrap();
        work.remove_dir(&set.root).unwrap();
        for (rep, dir) in copy.dirs.iter().enumerate() {
            let f = dir.join(format!("a_{rep}.fastq"));
            assert_eq!(read_fastq_records(f).unwrap().len(), 5);
        }
    }
}
