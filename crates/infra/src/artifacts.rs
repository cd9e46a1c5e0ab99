//! Artifact storage: executor output kept out-of-band, keyed by job id.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use scanqueue_core::JobId;

/// Extension of every stored artifact (the executor emits XML).
pub const ARTIFACT_EXTENSION: &str = "xml";

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact for job {0} not found")]
    Missing(JobId),
    #[error("artifact I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub trait ArtifactStore: Send + Sync {
    /// Store (or replace) the artifact for `id`.
    fn put(&self, id: JobId, contents: &[u8]) -> Result<(), ArtifactError>;

    fn get(&self, id: JobId) -> Result<Vec<u8>, ArtifactError>;

    /// Remove the artifact. Returns false if there was none.
    fn delete(&self, id: JobId) -> Result<bool, ArtifactError>;

    /// File name a download of this artifact should carry.
    fn file_name(&self, id: JobId) -> String {
        format!("{id}.{ARTIFACT_EXTENSION}")
    }
}

/// Artifacts as `<dir>/<id>.xml`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the directory if it does not exist.
    pub fn ensure_dir(&self) -> Result<(), ArtifactError> {
        fs::create_dir_all(&self.dir).map_err(|source| ArtifactError::Io {
            path: self.dir.clone(),
            source,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: JobId) -> PathBuf {
        self.dir.join(self.file_name(id))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, id: JobId, contents: &[u8]) -> Result<(), ArtifactError> {
        let path = self.path_for(id);
        // Write beside the target and rename so readers never see a partial file.
        let tmp = path.with_extension(format!("{ARTIFACT_EXTENSION}.tmp"));
        let io_err = |source| ArtifactError::Io {
            path: path.clone(),
            source,
        };
        fs::write(&tmp, contents).map_err(io_err)?;
        fs::rename(&tmp, &path).map_err(io_err)
    }

    fn get(&self, id: JobId) -> Result<Vec<u8>, ArtifactError> {
        let path = self.path_for(id);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ArtifactError::Missing(id)),
            Err(source) => Err(ArtifactError::Io { path, source }),
        }
    }

    fn delete(&self, id: JobId) -> Result<bool, ArtifactError> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ArtifactError::Io { path, source }),
        }
    }
}
