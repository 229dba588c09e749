use crate::backup::compress::CompressionMethod;
use clap::Parser;

/// Back up this host: archive, encrypt, publish, sync and prune.
///
/// Settings are read from the YAML file named by `HOST_BACKUP_CONFIG`
/// (default `/etc/host_backup/config.yml`); the switches below override it.
#[derive(Parser, Debug, Default, Clone, PartialEq, Eq)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Compress archives with gzip
    #[arg(long, overrides_with_all = ["bzip2", "xz", "lzma"])]
    pub gzip: bool,
    /// Compress archives with bzip2
    #[arg(long, visible_alias = "bzip", overrides_with_all = ["gzip", "xz", "lzma"])]
    pub bzip2: bool,
    /// Compress archives with xz
    #[arg(long, overrides_with_all = ["gzip", "bzip2", "lzma"])]
    pub xz: bool,
    /// Compress archives with legacy lzma
    #[arg(long, overrides_with_all = ["gzip", "bzip2", "xz"])]
    pub lzma: bool,
    /// Write plain .tar archives
    #[arg(long)]
    pub no_compression: bool,
    /// Skip the remote backup stage
    #[arg(long)]
    pub local_only: bool,
    /// Write binary instead of ascii-armored ciphertext
    #[arg(long)]
    pub no_ascii: bool,
    /// Do not encrypt archives
    #[arg(long)]
    pub no_encryption: bool,
    /// Skip the application plugin stage
    #[arg(long)]
    pub no_application: bool,
    /// Disable colored console output
    #[arg(long)]
    pub no_color: bool,
}

impl Args {
    /// Compression method selected on the command line, if any.
    pub fn compression_method(&self) -> Option<CompressionMethod> {
        if self.gzip {
            Some(CompressionMethod::Gzip)
        } else if self.bzip2 {
            Some(CompressionMethod::Bzip2)
        } else if self.xz {
            Some(CompressionMethod::Xz)
        } else if self.lzma {
            Some(CompressionMethod::Lzma)
        } else {
            None
        }
    }
}
