//! Model store on the local filesystem.
//!
//! Each model is a subdirectory of the store root. Uploaded archives are
//! spooled to a hidden part file while the request body is read, then
//! committed under their own filename and extracted next to it.
//!
//! All methods here block; call them from blocking task bodies.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use modelhub_core::naming::archive_stem;
use modelhub_core::TaskError;

const SPOOL_PREFIX: &str = ".incoming-";

#[derive(Debug, Clone)]
pub struct ModelStore {
    root: Arc<PathBuf>,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn model_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.model_dir(name).is_dir()
    }

    /// Names of all model directories, sorted. Hidden entries are skipped.
    pub fn list_models(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.root.as_path())? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Regular files directly inside a model directory, sorted.
    pub fn model_files(&self, name: &str) -> io::Result<Vec<String>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(self.model_dir(name))? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn remove_model(&self, name: &str) -> io::Result<()> {
        fs::remove_dir_all(self.model_dir(name))
    }

    /// Fresh path for spooling an incoming upload.
    pub fn spool_path(&self) -> PathBuf {
        self.root
            .join(format!("{SPOOL_PREFIX}{}.part", uuid::Uuid::new_v4()))
    }

    /// Move a spooled upload to `<root>/<filename>`.
    pub fn commit_archive(&self, spool: SpooledArchive, filename: &str) -> io::Result<PathBuf> {
        let target = self.root.join(filename);
        fs::rename(&spool.path, &target)?;
        Ok(target)
    }

    /// Extract `<root>/<filename>` into `<root>/<stem>`, overwriting files
    /// that already exist there.
    pub fn extract_archive(&self, filename: &str) -> Result<PathBuf, TaskError> {
        let archive_path = self.root.join(filename);
        let target = self.model_dir(archive_stem(filename));

        let file = fs::File::open(&archive_path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| TaskError::CorruptArchive(format!("{filename}: {e}")))?;
        fs::create_dir_all(&target)?;
        archive
            .extract(&target)
            .map_err(|e| TaskError::CorruptArchive(format!("{filename}: {e}")))?;

        tracing::debug!(
            archive = %archive_path.display(),
            target = %target.display(),
            entries = archive.len(),
            "Archive extracted",
        );
        Ok(target)
    }
}

/// An upload written to a part file; deleted on drop unless committed.
#[derive(Debug)]
pub struct SpooledArchive {
    path: PathBuf,
    len: u64,
}

impl SpooledArchive {
    pub fn new(path: PathBuf, len: u64) -> Self {
        Self { path, len }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_len(&mut self, len: u64) {
        self.len = len;
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for SpooledArchive {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove spooled upload");
            }
        }
    }
}
