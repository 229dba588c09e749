use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::workspace::ScratchWorkspace;
use function_name::named;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Copies the workspace into the dated generation directory.
#[derive(Clone, Debug)]
pub struct LocalPublisher {
    generation_dir: PathBuf,
}

impl LocalPublisher {
    pub fn new(generation_dir: PathBuf) -> Self {
        Self { generation_dir }
    }

    /// Creates the generation directory (and its parents) if needed.
    #[named]
    pub fn prepare(&self) -> Result<()> {
        std::fs::create_dir_all(&self.generation_dir)
            .map_err(Error::from)
            .add_msg(format!(
                "Cannot create output directory {:?}",
                self.generation_dir
            ))
            .add_fn_name(function_path!())
    }

    /// Copies every workspace entry except the keychain, keeping symlinks as
    /// symlinks. Workspace originals are left for the final cleanup.
    #[named]
    pub fn publish(&self, workspace: &ScratchWorkspace) -> Result<Vec<PathBuf>> {
        self.prepare()?;
        let mut published = Vec::new();
        for entry in workspace.entries().add_fn_name(function_path!())? {
            let dest = copy_tree(&entry, workspace.path(), &self.generation_dir)
                .add_msg(format!("Cannot publish {:?}", entry))
                .add_fn_name(function_path!())?;
            tracing::info!(status = "ok", "Published {:?}", dest);
            published.push(dest);
        }
        Ok(published)
    }
}

fn copy_tree(src: &Path, base: &Path, dest_root: &Path) -> Result<PathBuf> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry?;
        let target = dest_root.join(entry.path().strip_prefix(base)?);
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(dest_root.join(src.strip_prefix(base)?))
}

#[cfg(unix)]
fn copy_symlink(src: &Path, target: &Path) -> Result<()> {
    let link = std::fs::read_link(src)?;
    if target.symlink_metadata().is_ok() {
        std::fs::remove_file(target)?;
    }
    std::os::unix::fs::symlink(link, target)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, target: &Path) -> Result<()> {
    std::fs::copy(src, target)?;
    Ok(())
}
