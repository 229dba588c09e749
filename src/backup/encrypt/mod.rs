pub mod age;

use crate::backup::function_path;
use crate::backup::keychain::Keychain;
use crate::backup::outcome::RunOutcome;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::run::Cancellation;
use crate::backup::workspace::ScratchWorkspace;
use derive_more::Display;
use function_name::named;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub static DEFAULT_KEY_DIR: &str = "/etc/host_backup/keys";

/// What happens to a plaintext archive whose encryption failed.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionFailurePolicy {
    /// Leave the plaintext in place; it gets published unencrypted.
    #[default]
    #[display("keep_plaintext")]
    KeepPlaintext,
    /// Delete the plaintext so nothing unencrypted is published.
    #[display("discard_plaintext")]
    DiscardPlaintext,
    /// Stop the whole run.
    #[display("abort")]
    Abort,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EncryptionConfig {
    pub enabled: bool,
    pub ascii_armor: bool,
    pub key_dir: PathBuf,
    pub on_failure: EncryptionFailurePolicy,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ascii_armor: true,
            key_dir: PathBuf::from(DEFAULT_KEY_DIR),
            on_failure: EncryptionFailurePolicy::default(),
        }
    }
}

/// Encrypts every regular top-level file of the workspace in place.
///
/// Without a keychain this is a no-op. Successfully encrypted plaintext is
/// deleted; a failure is handled according to `config.on_failure`.
#[named]
pub fn encrypt_workspace(
    keychain: Option<&Keychain>,
    config: &EncryptionConfig,
    workspace: &ScratchWorkspace,
    outcome: &mut RunOutcome,
    cancel: &Cancellation,
) -> Result<()> {
    let Some(keychain) = keychain else {
        tracing::info!("Skipping encryption");
        return Ok(());
    };

    let recipients = keychain.recipients().add_fn_name(function_path!())?;
    if recipients.is_empty() {
        tracing::warn!("Keychain holds no recipient, every file will fail encryption");
    }

    for entry in workspace.entries().add_fn_name(function_path!())? {
        if entry.is_dir() {
            tracing::warn!("Directory {:?} is not encrypted", entry);
        }
    }

    for file in workspace.top_level_files().add_fn_name(function_path!())? {
        cancel.check()?;
        match age::encrypt_file(&file, &recipients, config.ascii_armor) {
            Ok(encrypted) => settle_plaintext(
                &file,
                &encrypted,
                std::fs::remove_file(&file),
                config.on_failure,
                outcome,
            )
            .add_fn_name(function_path!())?,
            Err(e) => handle_failure(&file, e, config.on_failure, outcome)
                .add_fn_name(function_path!())?,
        }
    }
    Ok(())
}

fn handle_failure(
    file: &Path,
    error: Error,
    policy: EncryptionFailurePolicy,
    outcome: &mut RunOutcome,
) -> Result<()> {
    let error = error.add_msg(format!("Cannot encrypt {:?}", file));
    match policy {
        EncryptionFailurePolicy::KeepPlaintext => {
            outcome.record_error(error);
            tracing::warn!("{:?} will be published unencrypted", file);
            Ok(())
        }
        EncryptionFailurePolicy::DiscardPlaintext => match std::fs::remove_file(file) {
            Ok(()) => {
                outcome.record_error(error);
                tracing::warn!("Discarded plaintext {:?}", file);
                Ok(())
            }
            Err(e) => {
                outcome.record_error(error.chain(
                    Error::from(e).add_msg(format!("Cannot discard plaintext {:?}", file)),
                ));
                tracing::warn!("{:?} will be published unencrypted", file);
                Ok(())
            }
        },
        EncryptionFailurePolicy::Abort => {
            tracing::error!("{error}");
            Err(Error::encryption_aborted(file))
        }
    }
}

/// Finishes a file whose ciphertext was written, given the outcome of
/// deleting its plaintext.
///
/// A plaintext that cannot be deleted is a recoverable error unless the
/// policy is `abort`. Under `keep_plaintext` the ciphertext twin is dropped so
/// the file is published once, unencrypted. Under `discard_plaintext` the
/// ciphertext is kept.
fn settle_plaintext(
    file: &Path,
    encrypted: &Path,
    removal: std::io::Result<()>,
    policy: EncryptionFailurePolicy,
    outcome: &mut RunOutcome,
) -> Result<()> {
    let Err(e) = removal else {
        tracing::info!(status = "ok", "Encrypted {:?}", encrypted);
        return Ok(());
    };
    let error = Error::from(e).add_msg(format!("Cannot delete plaintext {:?}", file));
    match policy {
        EncryptionFailurePolicy::KeepPlaintext => {
            outcome.record_error(error);
            if let Err(e) = std::fs::remove_file(encrypted) {
                tracing::warn!("Cannot remove ciphertext {:?}: {e}", encrypted);
            }
            tracing::warn!("{:?} will be published unencrypted", file);
            Ok(())
        }
        EncryptionFailurePolicy::DiscardPlaintext => {
            outcome.record_error(error);
            tracing::warn!("{:?} will be published next to its ciphertext", file);
            Ok(())
        }
        EncryptionFailurePolicy::Abort => {
            tracing::error!("{error}");
            Err(Error::encryption_aborted(file))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::keychain::provision;
    use crate::backup::tools::{Tool, ToolAvailability, ToolLocator};
    use tempfile::TempDir;

    struct Fixture {
        _keys: TempDir,
        _scratch: TempDir,
        workspace: ScratchWorkspace,
        config: EncryptionConfig,
    }

    fn fixture(valid_key: bool) -> Fixture {
        let keys = TempDir::new().unwrap();
        let key = if valid_key {
            ::age::x25519::Identity::generate().to_public().to_string()
        } else {
            "not a key".to_string()
        };
        std::fs::write(keys.path().join("ops.pub"), key).unwrap();
        let scratch = TempDir::new().unwrap();
        let workspace = ScratchWorkspace::create(Some(scratch.path())).unwrap();
        let config = EncryptionConfig {
            key_dir: keys.path().to_path_buf(),
            ..EncryptionConfig::default()
        };
        Fixture {
            _keys: keys,
            _scratch: scratch,
            workspace,
            config,
        }
    }

    fn keychain(f: &Fixture, outcome: &mut RunOutcome) -> Keychain {
        let tools = ToolAvailability::new(
            ToolLocator::default(),
            Some(Tool::Builtin("tar")),
            Some(Tool::Builtin("age")),
            None,
        );
        provision(&f.config, &tools, &f.workspace, outcome)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_plaintext_replaced_by_ciphertext() {
        let f = fixture(true);
        let mut outcome = RunOutcome::default();
        let keychain = keychain(&f, &mut outcome);
        std::fs::write(f.workspace.path().join("etc.tar.gz"), "a").unwrap();
        std::fs::write(f.workspace.path().join("home.tar.gz"), "b").unwrap();
        std::fs::create_dir(f.workspace.path().join("dump")).unwrap();

        encrypt_workspace(
            Some(&keychain),
            &f.config,
            &f.workspace,
            &mut outcome,
            &Cancellation::default(),
        )
        .unwrap();

        assert!(!outcome.has_errors());
        assert_eq!(
            f.workspace.top_level_files().unwrap(),
            vec![
                f.workspace.path().join("etc.tar.gz.age"),
                f.workspace.path().join("home.tar.gz.age"),
            ]
        );
        assert!(f.workspace.keychain_dir().join("ops.pub").is_file());
    }

    #[test]
    fn test_empty_keychain_keeps_plaintext_with_error() {
        let f = fixture(false);
        let mut outcome = RunOutcome::default();
        let keychain = keychain(&f, &mut outcome);
        assert_eq!(outcome.error_count(), 1);
        std::fs::write(f.workspace.path().join("etc.tar"), "a").unwrap();

        encrypt_workspace(
            Some(&keychain),
            &f.config,
            &f.workspace,
            &mut outcome,
            &Cancellation::default(),
        )
        .unwrap();

        assert_eq!(outcome.error_count(), 2);
        assert!(f.workspace.path().join("etc.tar").is_file());
        assert!(!f.workspace.path().join("etc.tar.age").exists());
    }

    #[test]
    fn test_discard_policy_removes_plaintext() {
        let mut f = fixture(false);
        f.config.on_failure = EncryptionFailurePolicy::DiscardPlaintext;
        let mut outcome = RunOutcome::default();
        let keychain = keychain(&f, &mut outcome);
        std::fs::write(f.workspace.path().join("etc.tar"), "a").unwrap();

        encrypt_workspace(
            Some(&keychain),
            &f.config,
            &f.workspace,
            &mut outcome,
            &Cancellation::default(),
        )
        .unwrap();

        assert!(outcome.has_errors());
        assert!(f.workspace.top_level_files().unwrap().is_empty());
    }

    #[test]
    fn test_abort_policy_is_fatal() {
        let mut f = fixture(false);
        f.config.on_failure = EncryptionFailurePolicy::Abort;
        let mut outcome = RunOutcome::default();
        let keychain = keychain(&f, &mut outcome);
        std::fs::write(f.workspace.path().join("etc.tar"), "a").unwrap();

        let err = encrypt_workspace(
            Some(&keychain),
            &f.config,
            &f.workspace,
            &mut outcome,
            &Cancellation::default(),
        )
        .unwrap_err();
        assert!(matches!(err.root(), Error::EncryptionAborted(_)));
    }

    #[test]
    fn test_no_keychain_is_noop() {
        let f = fixture(true);
        std::fs::write(f.workspace.path().join("etc.tar"), "a").unwrap();
        let mut outcome = RunOutcome::default();

        encrypt_workspace(
            None,
            &f.config,
            &f.workspace,
            &mut outcome,
            &Cancellation::default(),
        )
        .unwrap();
        assert!(f.workspace.path().join("etc.tar").is_file());
    }

    fn encrypted_pair() -> (TempDir, PathBuf, PathBuf) {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("etc.tar.gz");
        let encrypted = super::age::encrypted_path(&file);
        std::fs::write(&file, "plain").unwrap();
        std::fs::write(&encrypted, "cipher").unwrap();
        (temp, file, encrypted)
    }

    fn read_only() -> std::io::Result<()> {
        Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied))
    }

    #[test]
    fn test_undeletable_plaintext_keeps_run_going() {
        let (_temp, file, encrypted) = encrypted_pair();
        let mut outcome = RunOutcome::default();

        settle_plaintext(
            &file,
            &encrypted,
            read_only(),
            EncryptionFailurePolicy::KeepPlaintext,
            &mut outcome,
        )
        .unwrap();
        assert_eq!(outcome.error_count(), 1);
        assert!(file.is_file());
        assert!(!encrypted.exists());

        let (_temp, file, encrypted) = encrypted_pair();
        settle_plaintext(
            &file,
            &encrypted,
            read_only(),
            EncryptionFailurePolicy::DiscardPlaintext,
            &mut outcome,
        )
        .unwrap();
        assert_eq!(outcome.error_count(), 2);
        assert!(encrypted.is_file());
    }

    #[test]
    fn test_undeletable_plaintext_with_abort_policy() {
        let (_temp, file, encrypted) = encrypted_pair();
        let mut outcome = RunOutcome::default();

        let err = settle_plaintext(
            &file,
            &encrypted,
            read_only(),
            EncryptionFailurePolicy::Abort,
            &mut outcome,
        )
        .unwrap_err();
        assert!(matches!(err, Error::EncryptionAborted(_)));
        assert!(!outcome.has_errors());
    }

    #[test]
    fn test_deleted_plaintext_is_success() {
        let (_temp, file, encrypted) = encrypted_pair();
        let mut outcome = RunOutcome::default();
        settle_plaintext(
            &file,
            &encrypted,
            Ok(()),
            EncryptionFailurePolicy::Abort,
            &mut outcome,
        )
        .unwrap();
        assert!(!outcome.has_errors());
        assert!(encrypted.is_file());
    }

    #[test]
    fn test_policy_names() {
        let policy: EncryptionFailurePolicy = serde_yml::from_str("discard_plaintext").unwrap();
        assert_eq!(policy, EncryptionFailurePolicy::DiscardPlaintext);
        assert_eq!(EncryptionFailurePolicy::default().to_string(), "keep_plaintext");
    }
}
