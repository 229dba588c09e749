use crate::backup::plugin::{Plugin, PluginContext};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::tools::{run_command, Capability, Tool, ToolAvailability};
use bon::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use validator::Validate;

/// Mirrors the output root to `destination` with the resolved sync tool.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[getset(get = "pub")]
pub struct RsyncPlugin {
    /// Anything the sync tool accepts, e.g. `backup@vault:/srv/hosts/`.
    #[validate(length(min = 1))]
    #[builder(into)]
    destination: String,
    #[serde(default)]
    #[builder(default, into)]
    args: Vec<String>,
}

fn sync_program(tools: &ToolAvailability) -> Result<PathBuf> {
    match tools.sync() {
        Some(Tool::Executable(path)) => Ok(path.clone()),
        Some(Tool::Builtin(name)) => Err(Error::missing_tool(
            Capability::Sync.to_string(),
            format!("{name} (builtin, cannot be spawned)"),
        )),
        None => Err(Error::missing_tool(Capability::Sync.to_string(), "rsync")),
    }
}

impl Plugin for RsyncPlugin {
    fn check_dependencies(&self, tools: &ToolAvailability) -> Result<()> {
        sync_program(tools).map(|_| ())
    }

    fn exec(&self, target: &Path, ctx: &PluginContext) -> Result<()> {
        // trailing slash: copy the contents, not the directory itself
        let mut source = OsString::from(target.as_os_str());
        source.push("/");

        let mut command = Command::new(sync_program(ctx.tools)?);
        command
            .arg("-a")
            .args(&self.args)
            .arg(source)
            .arg(&self.destination);
        run_command(command).add_msg(format!("Sync to {:?} failed", self.destination))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::plugin::tests::tools_in;

    #[test]
    fn test_requires_sync_tool() {
        let plugin = RsyncPlugin::builder().destination("vault:/srv").build();
        let err = plugin.check_dependencies(&tools_in(None, None)).unwrap_err();
        assert!(matches!(err, Error::MissingTool { .. }));
    }

    #[test]
    #[cfg(unix)]
    fn test_exec_passes_contents_source_and_destination() {
        use crate::backup::plugin::tests::script;
        use tempfile::TempDir;

        let temp = TempDir::new().unwrap();
        let out = temp.path().join("args.txt");
        let fake = script(
            temp.path(),
            "rsync",
            &format!("echo \"$@\" > {}", out.display()),
        );
        let tools = tools_in(None, Some(fake));
        let plugin = RsyncPlugin::builder()
            .destination("vault:/srv/hosts")
            .args(vec!["--delete".to_string()])
            .build();
        plugin.check_dependencies(&tools).unwrap();

        plugin
            .exec(
                Path::new("/var/backups/host_backup"),
                &PluginContext {
                    tools: &tools,
                    hostname: "web1",
                    subject: "s",
                },
            )
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(out).unwrap().trim(),
            "-a --delete /var/backups/host_backup/ vault:/srv/hosts"
        );
    }
}
