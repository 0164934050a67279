//! Durable storage seam for finalized recordings.
//!
//! The recording sink hands a finalized WAV file to a `DurableStorage`
//! collaborator and reports the stable reference it returns. Deleting
//! that reference later is the collaborator's responsibility, not the
//! engine's.

use crate::error::{EngineError, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

/// Accepts a finalized local WAV file and returns a stable reference.
pub trait DurableStorage: Send + Sync {
    fn store(&self, wav: &Path) -> Result<PathBuf>;
}

/// Moves finalized recordings into a local directory under a
/// timestamped name.
pub struct LocalDirStorage {
    dir: PathBuf,
}

impl LocalDirStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| EngineError::Storage(format!("cannot create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }
}

impl DurableStorage for LocalDirStorage {
    fn store(&self, wav: &Path) -> Result<PathBuf> {
        let name = format!("recording-{}.wav", Utc::now().format("%Y%m%d-%H%M%S%.3f"));
        let dest = self.dir.join(name);

        // Rename when source and destination share a filesystem, copy
        // across mounts otherwise.
        if fs::rename(wav, &dest).is_err() {
            fs::copy(wav, &dest)
                .map_err(|e| EngineError::Storage(format!("cannot store recording: {e}")))?;
            if let Err(e) = fs::remove_file(wav) {
                log::warn!("stored {} but could not remove temp file: {}", dest.display(), e);
            }
        }

        log::info!("Recording stored at {}", dest.display());
        Ok(dest)
    }
}
