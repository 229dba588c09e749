use crate::backup::cli::Args;
use crate::backup::compress::CompressionConfig;
use crate::backup::encrypt::EncryptionConfig;
use crate::backup::function_path;
use crate::backup::plugin::PluginDirs;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::retention::Retention;
use crate::backup::validate::{
    render_date_format, validate_date_format, validate_dir_exist_or_created,
    validate_sanitized_file_name,
};
use bon::Builder;
use chrono::{DateTime, Local};
use function_name::named;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use validator::Validate;

/// Environment variable naming the configuration file.
pub static CONFIG_ENV: &str = "HOST_BACKUP_CONFIG";
pub static DEFAULT_CONFIG_PATH: &str = "/etc/host_backup/config.yml";
pub static DEFAULT_OUTPUT_ROOT: &str = "/var/backups/host_backup";
pub static DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";
pub static DEFAULT_LOG_FILE: &str = "/var/tmp/host_backup.log";
pub static DEFAULT_SYNC_PROGRAM: &str = "rsync";

fn default_source_paths() -> Vec<String> {
    ["/etc", "/home", "/root", "/var/spool/cron"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Immutable settings of one run.
///
/// Built from defaults, then the YAML file, then command-line switches.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(default, deny_unknown_fields)]
#[getset(get = "pub")]
pub struct RunConfiguration {
    #[builder(default = default_source_paths())]
    source_paths: Vec<String>,
    #[validate(custom(function = validate_dir_exist_or_created))]
    #[builder(default = PathBuf::from(DEFAULT_OUTPUT_ROOT), into)]
    output_root: PathBuf,
    #[validate(custom(function = validate_date_format))]
    #[builder(default = DEFAULT_DATE_FORMAT.to_string(), into)]
    date_format: String,
    #[builder(default)]
    retention: Retention,
    #[builder(default)]
    compression: CompressionConfig,
    #[builder(default)]
    encryption: EncryptionConfig,
    #[builder(default)]
    plugins: PluginDirs,
    #[builder(default = true)]
    application_plugins: bool,
    #[builder(default = true)]
    remote_backup: bool,
    #[builder(default = true)]
    post_backup: bool,
    #[builder(default = true)]
    color: bool,
    #[builder(default = PathBuf::from(DEFAULT_LOG_FILE), into)]
    log_file: PathBuf,
    #[builder(into)]
    scratch_dir: Option<PathBuf>,
    #[getset(skip)]
    #[validate(custom(function = validate_sanitized_file_name))]
    #[builder(into)]
    hostname: Option<String>,
    #[builder(default = DEFAULT_SYNC_PROGRAM.to_string(), into)]
    sync_program: String,
    #[builder(into)]
    tool_search_path: Option<String>,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RunConfiguration {
    /// Configured host name, or the system one.
    pub fn hostname(&self) -> String {
        self.hostname
            .clone()
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned())
    }

    /// Reads the YAML file at `path`.
    ///
    /// A missing file gives the defaults unless `required` is set.
    #[named]
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        if !required && !path.exists() {
            tracing::info!("No configuration file at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let file = std::fs::File::open(path)
            .map_err(Error::from)
            .add_msg(format!("Cannot open configuration {:?}", path))
            .add_fn_name(function_path!())?;
        serde_yml::from_reader(file)
            .map_err(Error::from)
            .add_msg(format!("Parse YAML config failed: {:?}", path))
            .add_fn_name(function_path!())
    }

    /// Applies command-line switches on top of the loaded settings.
    pub fn with_overrides(mut self, args: &Args) -> Self {
        if let Some(method) = args.compression_method() {
            self.compression.enabled = true;
            self.compression.method = method.to_string();
        }
        if args.no_compression {
            self.compression.enabled = false;
        }
        if args.local_only {
            self.remote_backup = false;
        }
        if args.no_ascii {
            self.encryption.ascii_armor = false;
        }
        if args.no_encryption {
            self.encryption.enabled = false;
        }
        if args.no_application {
            self.application_plugins = false;
        }
        if args.no_color {
            self.color = false;
        }
        self
    }

    /// Loads, overrides and validates the configuration for this process.
    pub fn resolve(args: &Args) -> Result<Arc<Self>> {
        let explicit = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        Self::resolve_from(explicit.as_deref(), args)
    }

    /// Like [`RunConfiguration::resolve`], with the file path given directly.
    #[named]
    pub fn resolve_from(path: Option<&Path>, args: &Args) -> Result<Arc<Self>> {
        let config = match path {
            Some(path) => Self::load(path, true)?,
            None => Self::load(Path::new(DEFAULT_CONFIG_PATH), false)?,
        }
        .with_overrides(args);

        config
            .validate()
            .map_err(Error::from)
            .add_msg("Config validation failed")
            .add_fn_name(function_path!())?;
        tracing::debug!(
            "Effective configuration: {}",
            serde_json::to_string(&config)?
        );
        Ok(Arc::new(config))
    }

    /// `<output_root>/<hostname>`: parent of every generation of this host.
    pub fn host_root(&self, hostname: &str) -> PathBuf {
        self.output_root.join(hostname)
    }

    /// Directory name of the generation started at `now`.
    pub fn date_label(&self, now: DateTime<Local>) -> Result<String> {
        render_date_format(&self.date_format, &now)
            .ok_or_else(|| Error::date_format(self.date_format.clone()))
    }
}
