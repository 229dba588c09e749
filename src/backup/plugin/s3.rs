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

static DEFAULT_PROGRAM: &str = "aws";

fn default_program() -> String {
    DEFAULT_PROGRAM.to_string()
}

/// `aws s3 sync <output_root> s3://<bucket>/<prefix>`.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[getset(get = "pub")]
pub struct S3Plugin {
    #[validate(length(min = 3, max = 63))]
    #[builder(into)]
    bucket: String,
    #[builder(into)]
    prefix: Option<String>,
    #[serde(default)]
    #[builder(default, into)]
    args: Vec<String>,
    #[serde(default = "default_program")]
    #[builder(default = default_program(), into)]
    program: String,
}

impl S3Plugin {
    pub fn url(&self) -> String {
        match self.prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(prefix) if !prefix.is_empty() => format!("s3://{}/{}", self.bucket, prefix),
            _ => format!("s3://{}", self.bucket),
        }
    }
}

impl Plugin for S3Plugin {
    fn check_dependencies(&self, tools: &ToolAvailability) -> Result<()> {
        tools.locate(&self.program).map(|_| ())
    }

    fn exec(&self, target: &Path, ctx: &PluginContext) -> Result<()> {
        let url = self.url();
        let mut command = Command::new(ctx.tools.locate(&self.program)?);
        command
            .arg("s3")
            .arg("sync")
            .args(&self.args)
            .arg(target)
            .arg(&url);
        run_command(command).add_msg(format!("Upload to {url} failed"))?;
        Ok(())
    }
}
