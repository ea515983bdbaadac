//src/workdir.rs

use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{RarefactionError, Result};

/// The single working root of a run.
///
/// Every directory created or removed below the root goes through this
/// handle so that parallel samplers never race on directory existence.
#[derive(Debug)]
pub struct WorkRoot {
    root: PathBuf,
    lock: Mutex<()>,
}

impl WorkRoot {
    /// Claim `root` for this run. An existing root is an error unless
    /// `clean` is set, in which case it is removed first.
    pub fn claim<P: AsRef<Path>>(root: P, clean: bool) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if root.exists() {
            if !clean {
                return Err(RarefactionError::filesystem(
                    &root,
                    std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "working directory already exists (use --clean to remove it)",
                    ),
                ));
            }
            log::warn!("Removing existing working directory {:?}", root);
            fs::remove_dir_all(&root).map_err(|e| RarefactionError::filesystem(&root, e))?;
        }
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create one directory (and missing parents up to it). Fails if it exists.
    pub fn create_dir<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        let dir = dir.as_ref();
        let _guard = self.lock.lock();
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent).map_err(|e| RarefactionError::filesystem(parent, e))?;
        }
        fs::create_dir(dir).map_err(|e| RarefactionError::filesystem(dir, e))?;
        Ok(dir.to_path_buf())
    }

    /// Recursively delete `dir`; a missing directory is not an error.
    pub fn remove_dir<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        let _guard = self.lock.lock();
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RarefactionError::filesystem(dir, e)),
        }
    }

    /// Remove the whole working root.
    pub fn teardown(&self) -> Result<()> {
        self.remove_dir(&self.root)
    }

    pub fn is_empty_or_missing(&self) -> bool {
        match fs::read_dir(&self.root) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_refuses_existing_root_without_clean() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            WorkRoot::claim(dir.path(), false),
            Err(RarefactionError::Filesystem { .. })
        ));

        fs::write(dir.path().join("stale"), "x").unwrap();
        let work = WorkRoot::claim(dir.path(), true).unwrap();
        assert!(!dir.path().exists());
        assert!(work.is_empty_or_missing());
    }

    #[test]
    fn test_create_twice_fails_and_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let work = WorkRoot::claim(dir.path().join("work"), false).unwrap();
        let d = work.create_dir(work.path().join("a/0")).unwrap();
        assert!(d.is_dir());
        assert!(work.create_dir(&d).is_err());

        work.remove_dir(work.path().join("a")).unwrap();
        work.remove_dir(work.path().join("a")).unwrap();
        work.teardown().unwrap();
        assert!(work.is_empty_or_missing());
    }
}
