//! # host_backup
//!
//! A host-local backup orchestrator: archives configured directories, optionally
//! compresses and encrypts them, publishes them into a dated per-host directory,
//! hands them to remote sync plugins and prunes old generations.
//!
//! ## Features
//!
//! - **Source patterns**: literal paths and glob patterns, one archive per match
//! - **Compression**: gzip, bzip2, xz or legacy lzma
//! - **Encryption**: age, to every recipient key found in a key directory
//! - **Plugins**: application (database dumps), remote (rsync, S3) and post-backup (mail) steps
//! - **Retention**: keeps the newest generations by count
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use host_backup::backup::backup_config::RunConfiguration;
//! use host_backup::backup::cli::Args;
//! use host_backup::backup::run::{Cancellation, RunController};
//!
//! let args = Args::parse();
//! let config = RunConfiguration::resolve(&args)?;
//! let outcome = RunController::new(config, Cancellation::default()).run()?;
//! println!("errors recorded: {}", outcome.error_count());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
