//! The fixed backup pipeline and the lifetime of its scratch workspace.

use crate::backup::archive::Archiver;
use crate::backup::backup_config::RunConfiguration;
use crate::backup::encrypt::encrypt_workspace;
use crate::backup::function_path;
use crate::backup::keychain;
use crate::backup::log::relocate_log;
use crate::backup::outcome::RunOutcome;
use crate::backup::plugin::{PluginCategory, PluginContext, PluginRegistry};
use crate::backup::publish::LocalPublisher;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;
use crate::backup::retention::apply_retention;
use crate::backup::tools::ToolAvailability;
use crate::backup::workspace::ScratchWorkspace;
use chrono::Local;
use function_name::named;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared interruption flag, checked between stages and between items.
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    /// Sets the flag on SIGINT/SIGTERM.
    pub fn install_handler(&self) -> Result<()> {
        let flag = self.flag.clone();
        ctrlc::set_handler(move || {
            tracing::warn!("Interrupt received, stopping after the current step");
            flag.store(true, Ordering::SeqCst);
        })?;
        Ok(())
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::interrupted())
        } else {
            Ok(())
        }
    }
}

/// Removes the workspace and relocates the run log when dropped.
struct CleanupGuard {
    workspace: Option<ScratchWorkspace>,
    log_file: PathBuf,
    generation_dir: PathBuf,
}

impl CleanupGuard {
    fn workspace(&self) -> Option<&ScratchWorkspace> {
        self.workspace.as_ref()
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if let Some(workspace) = self.workspace.take() {
            let path = workspace.path().to_path_buf();
            if let Err(e) = workspace.close() {
                tracing::warn!("Cannot remove scratch workspace {:?}: {e}", path);
            }
        }
        if !self.generation_dir.is_dir() {
            tracing::info!("Run log stays at {:?}", self.log_file);
            return;
        }
        match relocate_log(&self.log_file, &self.generation_dir) {
            Ok(Some(dest)) => tracing::info!("Run log moved to {:?}", dest),
            Ok(None) => {}
            Err(e) => tracing::warn!("Cannot relocate run log {:?}: {e}", self.log_file),
        }
    }
}

struct Registries {
    application: Option<PluginRegistry>,
    remote: Option<PluginRegistry>,
    post_backup: Option<PluginRegistry>,
}

pub struct RunController {
    config: Arc<RunConfiguration>,
    cancel: Cancellation,
}

impl RunController {
    pub fn new(config: Arc<RunConfiguration>, cancel: Cancellation) -> Self {
        Self { config, cancel }
    }

    /// Runs every stage once, in order.
    ///
    /// `Err` is a fatal error; recoverable ones are counted in the returned
    /// outcome. The workspace is removed on every path out of this function.
    #[named]
    pub fn run(&self) -> Result<RunOutcome> {
        let hostname = self.config.hostname();
        let label = self.config.date_label(Local::now())?;
        let generation_dir = self.config.host_root(&hostname).join(label);
        tracing::info!("Starting backup of {} into {:?}", hostname, generation_dir);

        let workspace = ScratchWorkspace::create(self.config.scratch_dir().as_deref())
            .add_fn_name(function_path!())?;
        let guard = CleanupGuard {
            workspace: Some(workspace),
            log_file: self.config.log_file().clone(),
            generation_dir: generation_dir.clone(),
        };
        let workspace = guard
            .workspace()
            .ok_or_else(|| Error::from(std::io::Error::other("scratch workspace missing")))?;

        let mut outcome = RunOutcome::default();
        self.run_stages(workspace, &hostname, &generation_dir, &mut outcome)?;
        Ok(outcome)
    }

    fn run_stages(
        &self,
        workspace: &ScratchWorkspace,
        hostname: &str,
        generation_dir: &Path,
        outcome: &mut RunOutcome,
    ) -> Result<()> {
        let config = self.config.as_ref();
        let cancel = &self.cancel;

        let tools = ToolAvailability::resolve(config)?;
        let registries = self.load_registries(&tools)?;
        cancel.check()?;

        let keychain = keychain::provision(config.encryption(), &tools, workspace, outcome)?;
        cancel.check()?;

        let archiver = Archiver::from_config(config.compression(), outcome);
        archiver.archive_sources(config.source_paths(), workspace, outcome, cancel)?;
        cancel.check()?;

        if let Some(registry) = &registries.application {
            let subject = outcome.summary(hostname);
            let ctx = PluginContext {
                tools: &tools,
                hostname,
                subject: &subject,
            };
            registry.run_all(workspace.path(), &ctx, outcome, cancel)?;
        } else {
            tracing::info!("Application plugins disabled");
        }
        cancel.check()?;

        encrypt_workspace(
            keychain.as_ref(),
            config.encryption(),
            workspace,
            outcome,
            cancel,
        )?;
        cancel.check()?;

        LocalPublisher::new(generation_dir.to_path_buf()).publish(workspace)?;
        cancel.check()?;

        if let Some(registry) = &registries.remote {
            let subject = outcome.summary(hostname);
            let ctx = PluginContext {
                tools: &tools,
                hostname,
                subject: &subject,
            };
            registry.run_all(config.output_root(), &ctx, outcome, cancel)?;
        } else {
            tracing::info!("Remote backup disabled");
        }
        cancel.check()?;

        apply_retention(
            &config.host_root(hostname),
            generation_dir,
            *config.retention(),
            outcome,
            cancel,
        )?;

        let summary = outcome.summary(hostname);
        if outcome.has_errors() {
            tracing::error!("{summary}");
        } else {
            tracing::info!(status = "ok", "{summary}");
        }

        if let Some(registry) = &registries.post_backup {
            let ctx = PluginContext {
                tools: &tools,
                hostname,
                subject: &summary,
            };
            registry.run_all(config.log_file(), &ctx, outcome, cancel)?;
        }
        Ok(())
    }

    fn load_registries(&self, tools: &ToolAvailability) -> Result<Registries> {
        let config = self.config.as_ref();
        let load = |enabled: bool, category: PluginCategory| -> Result<Option<PluginRegistry>> {
            if !enabled {
                return Ok(None);
            }
            PluginRegistry::load(category, config.plugins().dir(category), tools).map(Some)
        };
        Ok(Registries {
            application: load(*config.application_plugins(), PluginCategory::Application)?,
            remote: load(*config.remote_backup(), PluginCategory::Remote)?,
            post_backup: load(*config.post_backup(), PluginCategory::PostBackup)?,
        })
    }
}
