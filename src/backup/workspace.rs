use crate::backup::result_error::result::Result;
use itertools::Itertools;
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempDir};

/// Name of the credential-store directory inside the workspace.
pub static KEYCHAIN_DIR_NAME: &str = "keychain";

static WORKSPACE_PREFIX: &str = "host_backup.";

/// Uniquely named scratch directory owned by exactly one run.
///
/// Dropping it removes the directory recursively.
#[derive(Debug)]
pub struct ScratchWorkspace {
    dir: TempDir,
}

impl ScratchWorkspace {
    /// Creates the workspace under `parent`, or the system temp dir.
    pub fn create(parent: Option<&Path>) -> Result<Self> {
        let parent = parent
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&parent)?;
        let dir = Builder::new().prefix(WORKSPACE_PREFIX).tempdir_in(parent)?;
        tracing::debug!("Created scratch workspace {:?}", dir.path());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn keychain_dir(&self) -> PathBuf {
        self.path().join(KEYCHAIN_DIR_NAME)
    }

    /// Top-level entries other than the keychain, sorted by name.
    pub fn entries(&self) -> Result<Vec<PathBuf>> {
        let keychain = self.keychain_dir();
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(self.path())? {
            let path = entry?.path();
            if path != keychain {
                entries.push(path);
            }
        }
        Ok(entries.into_iter().sorted().collect())
    }

    /// Regular files directly inside the workspace, sorted by name.
    pub fn top_level_files(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|p| {
                std::fs::symlink_metadata(p)
                    .map(|m| m.file_type().is_file())
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Removes the workspace, reporting failures instead of swallowing them.
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        tracing::debug!("Removed scratch workspace {:?}", path);
        Ok(())
    }
}
