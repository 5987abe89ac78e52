//! Inter-stage handoff storage.
//!
//! Each stage writes its output as one artifact addressed by
//! `(run key, artifact kind)`; the next stage reads it back. Artifacts are
//! never cleaned up by the pipeline.

pub mod codec;

use std::collections::HashMap;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;

use sales_etl_types::{ArtifactKind, RunKey, StageError};

/// Storage contract for run artifacts.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn ArtifactStore>`.
pub trait ArtifactStore: Send + Sync {
    /// Persist `bytes` as the artifact, replacing any previous content.
    ///
    /// # Errors
    ///
    /// Returns an `artifact` [`StageError`] when the write fails.
    fn put(&self, run_key: &RunKey, kind: ArtifactKind, bytes: &[u8]) -> Result<(), StageError>;

    /// Read the artifact back.
    ///
    /// # Errors
    ///
    /// Returns an `artifact` [`StageError`] when it is absent or unreadable.
    fn get(&self, run_key: &RunKey, kind: ArtifactKind) -> Result<Vec<u8>, StageError>;

    /// Where the artifact lives, for logs.
    fn location(&self, run_key: &RunKey, kind: ArtifactKind) -> String;
}

/// Artifacts as files in one directory.
///
/// Writes go to a hidden temp file first and are renamed into place, so a
/// reader never sees a half-written artifact.
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    /// # Errors
    ///
    /// Returns an `artifact` [`StageError`] if the directory can't be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            StageError::artifact(
                "ARTIFACT_DIR",
                format!("cannot create artifact dir {}: {e}", dir.display()),
            )
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, run_key: &RunKey, kind: ArtifactKind) -> PathBuf {
        self.dir.join(kind.file_name(run_key))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, run_key: &RunKey, kind: ArtifactKind, bytes: &[u8]) -> Result<(), StageError> {
        let target = self.path_for(run_key, kind);
        let tmp = self.dir.join(format!(
            ".{}.tmp-{}",
            kind.file_name(run_key),
            std::process::id()
        ));
        let write_err = |e: std::io::Error| {
            StageError::artifact(
                "ARTIFACT_WRITE",
                format!("cannot write {}: {e}", target.display()),
            )
        };

        let mut file = std::fs::File::create(&tmp).map_err(write_err)?;
        file.write_all(bytes).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);
        std::fs::rename(&tmp, &target).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            write_err(e)
        })?;
        Ok(())
    }

    fn get(&self, run_key: &RunKey, kind: ArtifactKind) -> Result<Vec<u8>, StageError> {
        let path = self.path_for(run_key, kind);
        std::fs::read(&path).map_err(|e| {
            let code = if e.kind() == std::io::ErrorKind::NotFound {
                "ARTIFACT_MISSING"
            } else {
                "ARTIFACT_READ"
            };
            StageError::artifact(code, format!("cannot read {}: {e}", path.display()))
        })
    }

    fn location(&self, run_key: &RunKey, kind: ArtifactKind) -> String {
        self.path_for(run_key, kind).display().to_string()
    }
}

/// Process-local artifacts, for tests.
#[derive(Default)]
pub struct MemoryArtifactStore {
    entries: Mutex<HashMap<(RunKey, ArtifactKind), Vec<u8>>>,
}

impl MemoryArtifactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(RunKey, ArtifactKind), Vec<u8>>>, StageError>
    {
        self.entries
            .lock()
            .map_err(|_| StageError::internal("ARTIFACT_LOCK", "artifact store lock poisoned"))
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn put(&self, run_key: &RunKey, kind: ArtifactKind, bytes: &[u8]) -> Result<(), StageError> {
        self.lock()?.insert((run_key.clone(), kind), bytes.to_vec());
        Ok(())
    }

    fn get(&self, run_key: &RunKey, kind: ArtifactKind) -> Result<Vec<u8>, StageError> {
        self.lock()?
            .get(&(run_key.clone(), kind))
            .cloned()
            .ok_or_else(|| {
                StageError::artifact(
                    "ARTIFACT_MISSING",
                    format!("no {kind} artifact for run {run_key}"),
                )
            })
    }

    fn location(&self, run_key: &RunKey, kind: ArtifactKind) -> String {
        format!("memory://{}", kind.file_name(run_key))
    }
}
