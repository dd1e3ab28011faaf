//! Single-slot handoff between "script generated" and "script executed".
//!
//! The slot is one well-known file path, not a queue: storing while a script
//! is already pending overwrites it. Presence of the file is the signal that
//! an artifact is waiting to run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

const SLOT_FILE_NAME: &str = "aicmd_pending.sh";

#[derive(Debug, Clone)]
pub struct ArtifactSlot {
    path: PathBuf,
}

impl ArtifactSlot {
    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    /// The default slot lives in the user state directory, overridable with
    /// `AICMD_STATE_DIR`.
    pub fn default_location() -> io::Result<Self> {
        let dir = std::env::var_os("AICMD_STATE_DIR")
            .map(PathBuf::from)
            .or_else(|| dirs::state_dir().map(|base| base.join("aicmd")))
            .or_else(|| dirs::data_local_dir().map(|base| base.join("aicmd")))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::Unsupported,
                    "no state directory available on this platform",
                )
            })?;
        Ok(Self::at(dir.join(SLOT_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stores `code` in the slot, replacing any pending artifact.
    pub fn store(&self, code: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, code)
    }

    pub fn pending(&self) -> bool {
        self.path.exists()
    }

    pub fn read(&self) -> io::Result<String> {
        fs::read_to_string(&self.path)
    }

    /// Removes the pending artifact. An empty slot is fine; any other failure
    /// is logged and swallowed, since the slot must never block a run.
    pub fn clear(&self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), "failed to clear the artifact slot: {err}");
            }
        }
    }
}
