use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// Temporary file that is removed when dropped unless [`ScratchFile::keep`]
/// was called.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    armed: bool,
}

impl ScratchFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// Fresh, uniquely named path under `dir`; nothing is created on disk.
    pub fn unique_in(dir: &Path, stem: &str) -> Self {
        Self::new(dir.join(format!("{stem}-{}.tmp", Uuid::new_v4())))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "unable to remove temp file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::unique_in(dir.path(), "t");
        std::fs::write(scratch.path(), b"x").unwrap();
        let path = scratch.path().to_path_buf();
        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn kept_file_survives() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::unique_in(dir.path(), "t");
        std::fs::write(scratch.path(), b"x").unwrap();
        let path = scratch.keep();
        assert!(path.exists());
    }

    #[test]
    fn names_are_unique_and_missing_files_drop_quietly() {
        let dir = tempfile::tempdir().unwrap();
        let a = ScratchFile::unique_in(dir.path(), "t");
        let b = ScratchFile::unique_in(dir.path(), "t");
        assert_ne!(a.path(), b.path());
    }
}
