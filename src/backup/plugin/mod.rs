//! Discovery, registration and invocation of plugins.
//!
//! Every regular file in a category directory is a plugin. Its identity is
//! the file name up to the first `.`, and its content is a YAML descriptor
//! whose `type` selects one of the handlers linked into this binary:
//!
//! ```yaml
//! # /etc/host_backup/plugins/application/app-db.yml
//! type: sqlite
//! databases:
//!   - path: /var/lib/app/app.db
//! ```

pub mod command;
pub mod mail;
pub mod mysqldump;
pub mod rsync;
pub mod s3;
pub mod smtp;
pub mod sqlite;

use crate::backup::function_path;
use crate::backup::outcome::RunOutcome;
use crate::backup::plugin::command::CommandPlugin;
use crate::backup::plugin::mail::MailPlugin;
use crate::backup::plugin::mysqldump::MysqldumpPlugin;
use crate::backup::plugin::rsync::RsyncPlugin;
use crate::backup::plugin::s3::S3Plugin;
use crate::backup::plugin::smtp::SmtpPlugin;
use crate::backup::plugin::sqlite::SqlitePlugin;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::run::Cancellation;
use crate::backup::tools::ToolAvailability;
use derive_more::{Display, From};
use function_name::named;
use itertools::Itertools;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use validator::{Validate, ValidationErrors};

pub static DEFAULT_APPLICATION_DIR: &str = "/etc/host_backup/plugins/application";
pub static DEFAULT_REMOTE_DIR: &str = "/etc/host_backup/plugins/remote";
pub static DEFAULT_POST_BACKUP_DIR: &str = "/etc/host_backup/plugins/post-backup";

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord)]
pub enum PluginCategory {
    #[display("application")]
    Application,
    #[display("remote")]
    Remote,
    #[display("post-backup")]
    PostBackup,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PluginDirs {
    pub application_dir: PathBuf,
    pub remote_dir: PathBuf,
    pub post_backup_dir: PathBuf,
}

impl Default for PluginDirs {
    fn default() -> Self {
        Self {
            application_dir: DEFAULT_APPLICATION_DIR.into(),
            remote_dir: DEFAULT_REMOTE_DIR.into(),
            post_backup_dir: DEFAULT_POST_BACKUP_DIR.into(),
        }
    }
}

impl PluginDirs {
    pub fn dir(&self, category: PluginCategory) -> &Path {
        match category {
            PluginCategory::Application => &self.application_dir,
            PluginCategory::Remote => &self.remote_dir,
            PluginCategory::PostBackup => &self.post_backup_dir,
        }
    }
}

/// Run-level facts handed to every plugin invocation.
#[derive(Clone, Copy, Debug)]
pub struct PluginContext<'a> {
    pub tools: &'a ToolAvailability,
    pub hostname: &'a str,
    /// Status line of the run so far, used as notification subject.
    pub subject: &'a str,
}

/// A loaded plugin handler.
///
/// `target` is the scratch workspace for application plugins, the output
/// root for remote plugins and the run log for post-backup plugins.
pub trait Plugin: Debug {
    /// Fails when an external program this plugin needs cannot be found.
    fn check_dependencies(&self, _tools: &ToolAvailability) -> Result<()> {
        Ok(())
    }

    fn exec(&self, target: &Path, ctx: &PluginContext) -> Result<()>;
}

/// `enabled` plus the handler-specific fields selected by `type`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PluginDescriptor<K> {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub kind: K,
}

fn default_enabled() -> bool {
    true
}

#[derive(Clone, Debug, From, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApplicationPlugin {
    Sqlite(SqlitePlugin),
    Mysqldump(MysqldumpPlugin),
    Command(CommandPlugin),
}

#[derive(Clone, Debug, From, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemotePlugin {
    Rsync(RsyncPlugin),
    S3(S3Plugin),
    Command(CommandPlugin),
}

#[derive(Clone, Debug, From, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PostBackupPlugin {
    Smtp(SmtpPlugin),
    Mail(MailPlugin),
    Command(CommandPlugin),
}

macro_rules! dispatch_plugin {
    ($kind:ident { $($variant:ident),+ }) => {
        impl Validate for $kind {
            fn validate(&self) -> std::result::Result<(), ValidationErrors> {
                match self {
                    $(Self::$variant(inner) => inner.validate(),)+
                }
            }
        }

        impl Plugin for $kind {
            fn check_dependencies(&self, tools: &ToolAvailability) -> Result<()> {
                match self {
                    $(Self::$variant(inner) => inner.check_dependencies(tools),)+
                }
            }

            fn exec(&self, target: &Path, ctx: &PluginContext) -> Result<()> {
                match self {
                    $(Self::$variant(inner) => inner.exec(target, ctx),)+
                }
            }
        }
    };
}

dispatch_plugin!(ApplicationPlugin { Sqlite, Mysqldump, Command });
dispatch_plugin!(RemotePlugin { Rsync, S3, Command });
dispatch_plugin!(PostBackupPlugin { Smtp, Mail, Command });

/// File name up to the first `.`; `None` for hidden files.
pub fn plugin_id(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy();
    let id = name.split('.').next()?;
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Regular files of a category directory, sorted by name.
///
/// A missing or unreadable directory is fatal.
pub fn discover(category: PluginCategory, dir: &Path) -> Result<Vec<PathBuf>> {
    let read_dir =
        std::fs::read_dir(dir).map_err(|_| Error::missing_plugin_dir(category.to_string(), dir))?;
    let mut files = Vec::new();
    for entry in read_dir {
        let entry = entry?;
        if entry.file_type()?.is_file() || entry.path().is_file() {
            files.push(entry.path());
        }
    }
    Ok(files.into_iter().sorted().collect())
}

fn parse_descriptor<K>(path: &Path) -> Result<(bool, Box<dyn Plugin>)>
where
    K: Plugin + Validate + DeserializeOwned + 'static,
{
    let text = std::fs::read_to_string(path)?;
    let descriptor: PluginDescriptor<K> = serde_yml::from_str(&text)
        .map_err(|e| Error::plugin_load(path, e.to_string()))?;
    descriptor
        .kind
        .validate()
        .map_err(|e| Error::plugin_load(path, e.to_string()))?;
    Ok((descriptor.enabled, Box::new(descriptor.kind)))
}

fn load_descriptor(category: PluginCategory, path: &Path) -> Result<(bool, Box<dyn Plugin>)> {
    match category {
        PluginCategory::Application => parse_descriptor::<ApplicationPlugin>(path),
        PluginCategory::Remote => parse_descriptor::<RemotePlugin>(path),
        PluginCategory::PostBackup => parse_descriptor::<PostBackupPlugin>(path),
    }
}

#[derive(Debug)]
pub struct RegisteredPlugin {
    pub id: String,
    pub source: PathBuf,
    pub enabled: bool,
    handler: Box<dyn Plugin>,
}

/// Identity → handler mapping for one category, iterated in identity order.
#[derive(Debug)]
pub struct PluginRegistry {
    category: PluginCategory,
    plugins: BTreeMap<String, RegisteredPlugin>,
}

impl PluginRegistry {
    pub fn new(category: PluginCategory) -> Self {
        Self {
            category,
            plugins: BTreeMap::new(),
        }
    }

    /// Discovers and registers every plugin of `dir`.
    #[named]
    pub fn load(category: PluginCategory, dir: &Path, tools: &ToolAvailability) -> Result<Self> {
        let mut registry = Self::new(category);
        let files = discover(category, dir).add_fn_name(function_path!())?;
        if files.is_empty() {
            tracing::warn!("No {} plugin found in {:?}", category, dir);
        }
        for path in files {
            let Some(id) = plugin_id(&path) else {
                tracing::debug!("Ignoring hidden file {:?}", path);
                continue;
            };
            let (enabled, handler) = load_descriptor(category, &path)
                .add_msg(format!("Cannot load {} plugin {:?}", category, id))
                .add_fn_name(function_path!())?;
            registry
                .register(id, path, enabled, handler, tools)
                .add_fn_name(function_path!())?;
        }
        Ok(registry)
    }

    /// Adds a handler. Duplicate identities and missing dependencies of an
    /// enabled plugin are errors.
    pub fn register(
        &mut self,
        id: String,
        source: PathBuf,
        enabled: bool,
        handler: Box<dyn Plugin>,
        tools: &ToolAvailability,
    ) -> Result<()> {
        if let Some(existing) = self.plugins.get(&id) {
            return Err(Error::plugin_load(
                source,
                format!("identity {:?} already provided by {:?}", id, existing.source),
            ));
        }
        if enabled {
            handler
                .check_dependencies(tools)
                .add_msg(format!("{} plugin {:?} is enabled", self.category, id))?;
        }
        tracing::info!(
            "Registered {} plugin {:?} ({})",
            self.category,
            id,
            if enabled { "enabled" } else { "disabled" }
        );
        self.plugins.insert(
            id.clone(),
            RegisteredPlugin {
                id,
                source,
                enabled,
                handler,
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    /// Invokes every enabled plugin with `target`.
    ///
    /// A failing plugin is recorded and the next one still runs.
    pub fn run_all(
        &self,
        target: &Path,
        ctx: &PluginContext,
        outcome: &mut RunOutcome,
        cancel: &Cancellation,
    ) -> Result<()> {
        for plugin in self.plugins.values() {
            cancel.check()?;
            if !plugin.enabled {
                tracing::info!("{} plugin {:?} disabled, skipping", self.category, plugin.id);
                continue;
            }
            tracing::info!("Running {} plugin {:?}", self.category, plugin.id);
            match plugin.handler.exec(target, ctx) {
                Ok(_) => tracing::info!(status = "ok", "{} plugin {:?}", self.category, plugin.id),
                Err(e) => outcome.record_error(
                    e.add_msg(format!("{} plugin {:?} failed", self.category, plugin.id)),
                ),
            }
        }
        Ok(())
    }
}
