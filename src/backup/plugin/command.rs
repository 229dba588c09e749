use crate::backup::plugin::{Plugin, PluginContext};
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::tools::{run_command, ToolAvailability};
use bon::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use validator::Validate;

pub static HOSTNAME_ENV: &str = "HOST_BACKUP_HOSTNAME";
pub static SUBJECT_ENV: &str = "HOST_BACKUP_SUBJECT";

/// Any executable, called as `<program> [args...] <target>`.
///
/// The host name and current run status are exported as
/// `HOST_BACKUP_HOSTNAME` and `HOST_BACKUP_SUBJECT`.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[getset(get = "pub")]
pub struct CommandPlugin {
    #[validate(length(min = 1))]
    #[builder(into)]
    program: String,
    #[serde(default)]
    #[builder(default, into)]
    args: Vec<String>,
}

impl Plugin for CommandPlugin {
    fn check_dependencies(&self, tools: &ToolAvailability) -> Result<()> {
        tools.locate(&self.program).map(|_| ())
    }

    fn exec(&self, target: &Path, ctx: &PluginContext) -> Result<()> {
        let program = ctx.tools.locate(&self.program)?;
        let mut command = Command::new(program);
        command
            .args(&self.args)
            .arg(target)
            .env(HOSTNAME_ENV, ctx.hostname)
            .env(SUBJECT_ENV, ctx.subject);
        run_command(command).add_msg(format!("Command plugin {:?} failed", self.program))?;
        Ok(())
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use crate::backup::plugin::tests::{script, tools_in};
    use crate::backup::result_error::error::Error;
    use tempfile::TempDir;

    #[test]
    fn test_command_receives_target_and_env() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("out.txt");
        script(
            temp.path(),
            "export-app",
            &format!("echo \"$1 $2 $HOST_BACKUP_HOSTNAME\" > {}", out.display()),
        );
        let tools = tools_in(Some(temp.path()), None);
        let plugin = CommandPlugin::builder()
            .program("export-app")
            .args(vec!["--full".to_string()])
            .build();
        plugin.check_dependencies(&tools).unwrap();

        plugin
            .exec(
                Path::new("/tmp/ws"),
                &PluginContext {
                    tools: &tools,
                    hostname: "web1",
                    subject: "s",
                },
            )
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(out).unwrap().trim(),
            "--full /tmp/ws web1"
        );
    }

    #[test]
    fn test_non_zero_exit_is_error() {
        let temp = TempDir::new().unwrap();
        script(temp.path(), "failing", "echo nope >&2; exit 1");
        let tools = tools_in(Some(temp.path()), None);
        let plugin = CommandPlugin::builder().program("failing").build();

        let err = plugin
            .exec(
                Path::new("/tmp/ws"),
                &PluginContext {
                    tools: &tools,
                    hostname: "web1",
                    subject: "s",
                },
            )
            .unwrap_err();
        assert!(matches!(err.root(), Error::CommandFailed { .. }));
    }

    #[test]
    fn test_empty_program_invalid() {
        let plugin = CommandPlugin::builder().program("").build();
        assert!(plugin.validate().is_err());
    }
}
