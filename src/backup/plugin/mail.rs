use crate::backup::plugin::smtp::read_log;
use crate::backup::plugin::{Plugin, PluginContext};
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::tools::{run_command_with_input, ToolAvailability};
use bon::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use validator::Validate;

static DEFAULT_PROGRAM: &str = "mail";

fn default_program() -> String {
    DEFAULT_PROGRAM.to_string()
}

/// `mail -s <subject> <recipient>` with the run log on standard input.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[getset(get = "pub")]
pub struct MailPlugin {
    #[validate(email)]
    #[builder(into)]
    recipient: String,
    #[serde(default = "default_program")]
    #[builder(default = default_program(), into)]
    program: String,
}

impl Plugin for MailPlugin {
    fn check_dependencies(&self, tools: &ToolAvailability) -> Result<()> {
        tools.locate(&self.program).map(|_| ())
    }

    fn exec(&self, target: &Path, ctx: &PluginContext) -> Result<()> {
        let mut command = Command::new(ctx.tools.locate(&self.program)?);
        command.arg("-s").arg(ctx.subject).arg(&self.recipient);
        run_command_with_input(command, read_log(target).as_bytes())
            .add_msg(format!("Mail to {:?} failed", self.recipient))?;
        Ok(())
    }
}
