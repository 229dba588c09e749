use clap::Parser;
use host_backup::backup::backup_config::RunConfiguration;
use host_backup::backup::cli::Args;
use host_backup::backup::log;
use host_backup::backup::run::{Cancellation, RunController};
use std::process::ExitCode;
use tracing::error;

fn main() -> ExitCode {
    let args = Args::parse();

    // The run log path is only known once the configuration is loaded.
    let config = match tracing::subscriber::with_default(
        log::console_subscriber(!args.no_color),
        || RunConfiguration::resolve(&args),
    ) {
        Ok(config) => config,
        Err(e) => {
            tracing::subscriber::with_default(log::console_subscriber(!args.no_color), || {
                error!(fatal = true, "{e}")
            });
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = log::init(&config) {
        tracing::subscriber::with_default(log::console_subscriber(*config.color()), || {
            error!(fatal = true, "{e}")
        });
        return ExitCode::FAILURE;
    }

    let cancel = Cancellation::default();
    if let Err(e) = cancel.install_handler() {
        error!(fatal = true, "{e}");
        return ExitCode::FAILURE;
    }

    match RunController::new(config, cancel).run() {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(fatal = true, "{e}");
            ExitCode::FAILURE
        }
    }
}
