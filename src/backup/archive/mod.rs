pub mod source;

use crate::backup::compress::{CompressionConfig, CompressionMethod};
use crate::backup::file_ext::{layered_file_ext, FileExtProvider};
use crate::backup::finish::Finish;
use crate::backup::function_path;
use crate::backup::outcome::RunOutcome;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::run::Cancellation;
use crate::backup::workspace::ScratchWorkspace;
use function_name::named;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Separator that replaces `/` in archive names.
pub static NAME_DELIMITER: &str = "_";
static ROOT_ARCHIVE_NAME: &str = "root";

/// `/var/lib/app` → `var_lib_app.tar.gz` for gzip.
pub fn archive_name(source: &Path, method: CompressionMethod) -> String {
    let stem = archive_stem(source);
    let ext = layered_file_ext([&method as &dyn FileExtProvider]);
    format!("{stem}.{ext}")
}

fn archive_stem(source: &Path) -> String {
    let stripped = source.to_string_lossy();
    let stripped = stripped.trim_start_matches('/').trim_end_matches('/');
    if stripped.is_empty() {
        ROOT_ARCHIVE_NAME.to_string()
    } else {
        stripped.replace('/', NAME_DELIMITER)
    }
}

/// Produces one tar archive per source path.
#[derive(Clone, Debug)]
pub struct Archiver {
    method: CompressionMethod,
}

impl Archiver {
    pub fn new(method: CompressionMethod) -> Self {
        Self { method }
    }

    /// Archiver for the configured compression; an unknown method is recorded
    /// and replaced by gzip.
    pub fn from_config(config: &CompressionConfig, outcome: &mut RunOutcome) -> Self {
        let (method, error) = config.resolve();
        if let Some(error) = error {
            outcome.record_error(error);
        }
        tracing::info!("Archive compression: {}", method);
        Self::new(method)
    }

    pub fn method(&self) -> CompressionMethod {
        self.method
    }

    /// Archives every path the patterns expand to into the workspace.
    ///
    /// Missing or unreadable sources are skipped; a failing archive is
    /// recorded and the remaining sources are still processed.
    #[named]
    pub fn archive_sources(
        &self,
        patterns: &[String],
        workspace: &ScratchWorkspace,
        outcome: &mut RunOutcome,
        cancel: &Cancellation,
    ) -> Result<Vec<PathBuf>> {
        let mut archives = Vec::new();
        for pattern in patterns {
            let sources = match source::expand_pattern(pattern) {
                Ok(sources) => sources,
                Err(e) => {
                    outcome.record_error(
                        e.add_msg(format!("Invalid source pattern {:?}", pattern))
                            .add_fn_name(function_path!()),
                    );
                    continue;
                }
            };
            for source in sources {
                cancel.check()?;
                match self.create_archive(&source, workspace.path()) {
                    Ok(archive) => {
                        tracing::info!(status = "ok", "Archived {:?} to {:?}", source, archive);
                        archives.push(archive);
                    }
                    Err(e) => outcome.record_error(e.add_fn_name(function_path!())),
                }
            }
        }
        Ok(archives)
    }

    /// Writes `<dest_dir>/<archive_name>` holding `source`.
    ///
    /// Entries are stored relative to `/`, symlinks as links. A partially
    /// written archive is removed on failure.
    pub fn create_archive(&self, source: &Path, dest_dir: &Path) -> Result<PathBuf> {
        let archive = dest_dir.join(archive_name(source, self.method));
        tracing::info!("Creating archive {:?} from {:?}", archive, source);
        if archive.exists() {
            return Err(Error::from(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{:?} already exists", archive),
            ))
            .add_msg(format!("Cannot archive {:?}", source)));
        }
        let res = self.write_archive(source, &archive);
        if let Err(e) = res {
            let mut e = e.add_msg(format!("Cannot archive {:?}", source));
            if archive.exists() {
                if let Err(e2) = std::fs::remove_file(&archive) {
                    e = e.chain(e2.into());
                }
            }
            return Err(e);
        }
        Ok(archive)
    }

    fn write_archive(&self, source: &Path, archive: &Path) -> Result<()> {
        let file = File::create_new(archive)
            .map_err(Error::from)
            .add_msg(format!("Cannot create {:?}", archive))?;
        let writer = self.method.build_compressor(BufWriter::new(file))?;
        let mut builder = tar::Builder::new(writer);
        builder.follow_symlinks(false);

        let name = match source.strip_prefix("/") {
            Ok(relative) if relative.as_os_str().is_empty() => PathBuf::from("."),
            Ok(relative) => relative.to_path_buf(),
            Err(_) => source.to_path_buf(),
        };
        if std::fs::metadata(source)?.is_dir() {
            builder.append_dir_all(&name, source)?;
        } else {
            builder.append_path_with_name(source, &name)?;
        }

        builder.into_inner()?.finish()?.finish()?.sync_all()?;
        Ok(())
    }
}
