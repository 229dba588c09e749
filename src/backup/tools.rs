//! Resolution of the external capabilities a run depends on, and the single
//! place external commands are spawned from.

use crate::backup::backup_config::RunConfiguration;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use derive_more::Display;
use getset::Getters;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Capability {
    #[display("archiver")]
    Archiver,
    #[display("cipher")]
    Cipher,
    #[display("sync")]
    Sync,
}

/// How a capability is provided.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tool {
    /// Linked into this binary.
    Builtin(&'static str),
    Executable(PathBuf),
}

/// Looks executables up on `PATH`, or on an explicit search path when configured.
#[derive(Clone, Debug, Default)]
pub struct ToolLocator {
    search_path: Option<OsString>,
}

impl ToolLocator {
    pub fn new(search_path: Option<OsString>) -> Self {
        Self { search_path }
    }

    pub fn find(&self, program: &str) -> Option<PathBuf> {
        match &self.search_path {
            Some(paths) => {
                let cwd = std::env::current_dir().ok()?;
                which::which_in(program, Some(paths), cwd).ok()
            }
            None => which::which(program).ok(),
        }
    }

    /// Like [`ToolLocator::find`], but a missing program is an error.
    pub fn require(&self, capability: &str, program: &str) -> Result<PathBuf> {
        self.find(program)
            .ok_or_else(|| Error::missing_tool(capability, program))
    }
}

/// Capability → resolved tool mapping, computed once per run.
#[derive(Clone, Debug, Getters)]
#[getset(get = "pub")]
pub struct ToolAvailability {
    locator: ToolLocator,
    archiver: Option<Tool>,
    cipher: Option<Tool>,
    sync: Option<Tool>,
}

impl ToolAvailability {
    pub fn new(
        locator: ToolLocator,
        archiver: Option<Tool>,
        cipher: Option<Tool>,
        sync: Option<Tool>,
    ) -> Self {
        Self {
            locator,
            archiver,
            cipher,
            sync,
        }
    }

    /// Resolves every capability and applies the fatal/degrade rules.
    ///
    /// Archiving and encryption are linked in. The sync tool is an executable,
    /// and only mandatory when the remote stage will run.
    pub fn resolve(config: &RunConfiguration) -> Result<Self> {
        let locator = ToolLocator::new(config.tool_search_path().clone().map(OsString::from));
        let sync = locator
            .find(config.sync_program())
            .map(Tool::Executable);
        let availability = Self::new(
            locator,
            Some(Tool::Builtin("tar")),
            Some(Tool::Builtin("age")),
            sync,
        );
        availability.check(config)?;
        Ok(availability)
    }

    pub fn get(&self, capability: Capability) -> Option<&Tool> {
        match capability {
            Capability::Archiver => self.archiver.as_ref(),
            Capability::Cipher => self.cipher.as_ref(),
            Capability::Sync => self.sync.as_ref(),
        }
    }

    pub fn check(&self, config: &RunConfiguration) -> Result<()> {
        if self.archiver.is_none() {
            return Err(Error::missing_tool(Capability::Archiver.to_string(), "tar"));
        }
        if *config.remote_backup() && self.sync.is_none() {
            return Err(Error::missing_tool(
                Capability::Sync.to_string(),
                config.sync_program().as_str(),
            ));
        }
        if config.encryption().enabled && self.cipher.is_none() {
            tracing::warn!("No cipher available, encryption disabled for this run");
        }
        for capability in [Capability::Archiver, Capability::Cipher, Capability::Sync] {
            match self.get(capability) {
                Some(tool) => tracing::debug!("{capability}: {tool:?}"),
                None => tracing::debug!("{capability}: absent"),
            }
        }
        Ok(())
    }

    /// Resolves a plugin's own executable dependency.
    pub fn locate(&self, program: &str) -> Result<PathBuf> {
        self.locator.require("plugin", program)
    }
}

/// Runs a command to completion, failing on a non-zero exit status.
pub fn run_command(mut command: Command) -> Result<Output> {
    tracing::debug!("Running {}", describe(&command));
    let output = command.stdin(Stdio::null()).output()?;
    check_output(&command, output)
}

/// Runs a command with `input` fed to its standard input.
pub fn run_command_with_input(mut command: Command, input: &[u8]) -> Result<Output> {
    tracing::debug!("Running {}", describe(&command));
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let stdin = child.stdin.take();
    // stdin is fed from its own thread while the pipes drain here
    let output = std::thread::scope(|scope| {
        let writer = scope.spawn(move || match stdin {
            // a child that exits without reading is judged by its status
            Some(mut stdin) => match stdin.write_all(input) {
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                res => res,
            },
            None => Ok(()),
        });
        let output = child.wait_with_output();
        let written = writer
            .join()
            .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")));
        output.and_then(|output| written.map(|_| output))
    })?;
    check_output(&command, output)
}

fn check_output(command: &Command, output: Output) -> Result<Output> {
    if output.status.success() {
        return Ok(output);
    }
    Err(Error::command_failed(
        program_name(command.get_program()),
        output.status.to_string(),
        command_summary(&output),
    ))
}

fn program_name(program: &std::ffi::OsStr) -> String {
    Path::new(program)
        .file_name()
        .unwrap_or(program)
        .to_string_lossy()
        .into_owned()
}

// Program and arguments only: the environment may carry passwords.
fn describe(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|a| a.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

fn command_summary(out: &Output) -> String {
    let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if !stderr.is_empty() {
        return stderr;
    }
    if !stdout.is_empty() {
        return stdout;
    }
    format!("status {}", out.status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn fake_executable(dir: &Path, name: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    #[cfg(unix)]
    fn test_locator_uses_search_path() {
        let temp = TempDir::new().unwrap();
        let exe = fake_executable(temp.path(), "fake-sync");
        let locator = ToolLocator::new(Some(temp.path().as_os_str().to_owned()));

        assert_eq!(locator.find("fake-sync"), Some(exe));
        assert!(locator.find("definitely-not-installed-tool").is_none());
    }

    #[test]
    fn test_require_reports_missing_tool() {
        let temp = TempDir::new().unwrap();
        let locator = ToolLocator::new(Some(temp.path().as_os_str().to_owned()));
        let err = locator.require("sync", "rsync").unwrap_err();
        assert!(matches!(err, Error::MissingTool { .. }));
    }

    #[test]
    #[cfg(unix)]
    fn test_run_command_failure_carries_stderr() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo boom >&2; exit 3");
        match run_command(command).unwrap_err() {
            Error::CommandFailed {
                program, summary, ..
            } => {
                assert_eq!(program, "sh");
                assert_eq!(summary, "boom");
            }
            e => panic!("Expected CommandFailed, got {e}"),
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_run_command_with_input_feeds_stdin() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("cat");
        let output = run_command_with_input(command, b"hello").unwrap();
        assert_eq!(output.stdout, b"hello");
    }

    #[test]
    #[cfg(unix)]
    fn test_run_command_with_input_drains_output_before_reading() {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg("head -c 1048576 /dev/zero; head -c 1048576 /dev/zero >&2; wc -c");
        let input = vec![b'x'; 1 << 20];
        let output = run_command_with_input(command, &input).unwrap();
        let (zeros, count) = output.stdout.split_at(1 << 20);
        assert!(zeros.iter().all(|b| *b == 0));
        assert_eq!(String::from_utf8_lossy(count).trim(), "1048576");
        assert_eq!(output.stderr.len(), 1 << 20);
    }

    #[test]
    fn test_describe_omits_environment() {
        let mut command = Command::new("mysqldump");
        command.env("MYSQL_PWD", "secret").arg("--host").arg("db");
        assert_eq!(describe(&command), "mysqldump --host db");
    }
}
