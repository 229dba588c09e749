//! Imports recipient public keys into a per-run credential store.

use crate::backup::encrypt::age::read_recipients;
use crate::backup::encrypt::EncryptionConfig;
use crate::backup::function_path;
use crate::backup::outcome::RunOutcome;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::tools::ToolAvailability;
use crate::backup::workspace::ScratchWorkspace;
use age::Recipient;
use function_name::named;
use itertools::Itertools;
use std::path::{Path, PathBuf};

/// File name suffix that marks a file in the key directory as a public key.
pub static KEY_FILE_EXT: &str = "pub";

/// Credential store living inside the scratch workspace.
#[derive(Debug)]
pub struct Keychain {
    dir: PathBuf,
}

impl Keychain {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Re-reads every imported key. An empty store yields an empty list.
    pub fn recipients(&self) -> Result<Vec<Box<dyn Recipient>>> {
        let mut recipients = Vec::new();
        for path in list_key_files(&self.dir)? {
            recipients.extend(read_recipients(&path)?);
        }
        Ok(recipients)
    }
}

/// Sets up the keychain for this run.
///
/// `Ok(None)` means encryption is off for the run: disabled in configuration,
/// no cipher available, or a key directory without any `.pub` file.
/// A missing key directory while encryption is requested is fatal.
#[named]
pub fn provision(
    config: &EncryptionConfig,
    tools: &ToolAvailability,
    workspace: &ScratchWorkspace,
    outcome: &mut RunOutcome,
) -> Result<Option<Keychain>> {
    if !config.enabled {
        tracing::info!("Encryption disabled");
        return Ok(None);
    }
    if tools.cipher().is_none() {
        tracing::warn!("No encryption mechanism available, archives will not be encrypted");
        return Ok(None);
    }
    if !config.key_dir.is_dir() {
        return Err(Error::missing_key_dir(config.key_dir.clone())).add_fn_name(function_path!());
    }

    let key_files = list_key_files(&config.key_dir)
        .add_msg(format!("Cannot list key directory {:?}", config.key_dir))
        .add_fn_name(function_path!())?;
    if key_files.is_empty() {
        tracing::warn!(
            "No .{} key found in {:?}, archives will not be encrypted",
            KEY_FILE_EXT,
            config.key_dir
        );
        return Ok(None);
    }

    let dir = workspace.keychain_dir();
    create_private_dir(&dir).add_fn_name(function_path!())?;

    let mut imported = 0;
    for key_file in key_files {
        let res = read_recipients(&key_file).and_then(|recipients| {
            let file_name = key_file
                .file_name()
                .ok_or_else(|| std::io::Error::other("key path has no file name"))?;
            std::fs::copy(&key_file, dir.join(file_name))?;
            Ok(recipients.len())
        });
        match res {
            Ok(count) => {
                tracing::info!(status = "ok", "Imported {} recipient(s) from {:?}", count, key_file);
                imported += count;
            }
            Err(e) => outcome.record_error(e.add_msg(format!("Skipping key {:?}", key_file))),
        }
    }
    tracing::info!("Keychain holds {} recipient(s)", imported);

    Ok(Some(Keychain { dir }))
}

fn list_key_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_key = path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext == KEY_FILE_EXT);
        if is_key {
            files.push(path);
        }
    }
    Ok(files.into_iter().sorted().collect())
}

fn create_private_dir(dir: &Path) -> Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
        .create(dir)
        .map_err(Error::from)
        .add_msg(format!("Cannot create keychain {:?}", dir))
}
