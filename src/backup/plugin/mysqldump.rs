use crate::backup::plugin::{Plugin, PluginContext};
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::tools::{run_command, ToolAvailability};
use crate::backup::validate::validate_sanitized_file_names;
use bon::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use validator::Validate;

static DEFAULT_PROGRAM: &str = "mysqldump";
static DEFAULT_HOST: &str = "localhost";
static PASSWORD_ENV: &str = "MYSQL_PWD";

fn default_program() -> String {
    DEFAULT_PROGRAM.to_string()
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

/// One `<database>.sql` dump per database, written into the workspace.
///
/// The password travels through `MYSQL_PWD` so it never shows on a command line.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[getset(get = "pub")]
pub struct MysqldumpPlugin {
    #[serde(default = "default_host")]
    #[builder(default = default_host(), into)]
    host: String,
    #[validate(length(min = 1))]
    #[builder(into)]
    user: String,
    #[validate(nested)]
    #[builder(into)]
    password: Option<RedactedString>,
    /// Each name becomes `<name>.sql` in the workspace.
    #[validate(length(min = 1), custom(function = validate_sanitized_file_names))]
    #[builder(into)]
    databases: Vec<String>,
    #[serde(default = "default_program")]
    #[builder(default = default_program(), into)]
    program: String,
}

impl MysqldumpPlugin {
    fn dump(&self, program: &Path, database: &str, dest_dir: &Path) -> Result<()> {
        let dest = dest_dir.join(format!("{database}.sql"));
        let mut command = Command::new(program);
        command
            .arg("--host")
            .arg(&self.host)
            .arg("--user")
            .arg(&self.user)
            .arg("--single-transaction")
            .arg("--routines")
            .arg("--result-file")
            .arg(&dest)
            .arg(database);
        if let Some(password) = &self.password {
            command.env(PASSWORD_ENV, password.inner());
        }
        run_command(command).add_msg(format!("Dump of database {:?} failed", database))?;
        tracing::info!("Dumped database {:?} to {:?}", database, dest);
        Ok(())
    }
}

impl Plugin for MysqldumpPlugin {
    fn check_dependencies(&self, tools: &ToolAvailability) -> Result<()> {
        tools.locate(&self.program).map(|_| ())
    }

    fn exec(&self, target: &Path, ctx: &PluginContext) -> Result<()> {
        let program = ctx.tools.locate(&self.program)?;
        let errors: Vec<Error> = self
            .databases
            .iter()
            .filter_map(|db| self.dump(&program, db, target).err())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::from(errors))
        }
    }
}
