pub mod lzma;

use crate::backup::file_ext::FileExtProvider;
use crate::backup::finish::Finish;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use bzip2::write::BzEncoder;
use derive_more::Display;
use flate2::write::GzEncoder;
use io_enum::Write;
use liblzma::write::XzEncoder;
use serde::{Deserialize, Serialize};
use std::io;
use std::io::Write;
use std::str::FromStr;

#[derive(Write)]
pub enum Compressor<W: Write> {
    None(W),
    Gzip(GzEncoder<W>),
    Bzip2(BzEncoder<W>),
    Xz(XzEncoder<W>),
    Lzma(XzEncoder<W>),
}

impl<W: Write> Finish<W> for Compressor<W> {
    fn finish(self) -> io::Result<W> {
        match self {
            Compressor::None(w) => Ok(w),
            Compressor::Gzip(w) => w.finish(),
            Compressor::Bzip2(w) => w.finish(),
            Compressor::Xz(w) => w.finish(),
            Compressor::Lzma(w) => w.finish(),
        }
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionMethod {
    #[display("none")]
    None,
    #[display("gzip")]
    Gzip,
    #[display("bzip2")]
    Bzip2,
    #[display("xz")]
    Xz,
    #[display("lzma")]
    Lzma,
}

impl FromStr for CompressionMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "gzip" | "gz" => Ok(Self::Gzip),
            "bzip2" | "bzip" | "bz2" => Ok(Self::Bzip2),
            "xz" => Ok(Self::Xz),
            "lzma" => Ok(Self::Lzma),
            other => Err(format!("unrecognized compression method {other:?}")),
        }
    }
}

impl FileExtProvider for CompressionMethod {
    fn file_ext(&self) -> Option<&'static str> {
        match self {
            CompressionMethod::None => None,
            CompressionMethod::Gzip => Some("gz"),
            CompressionMethod::Bzip2 => Some("bz2"),
            CompressionMethod::Xz => Some("xz"),
            CompressionMethod::Lzma => Some("lzma"),
        }
    }
}

impl CompressionMethod {
    pub fn build_compressor<W: Write>(&self, writer: W) -> Result<Compressor<W>> {
        Ok(match self {
            CompressionMethod::None => Compressor::None(writer),
            CompressionMethod::Gzip => {
                Compressor::Gzip(GzEncoder::new(writer, flate2::Compression::default()))
            }
            CompressionMethod::Bzip2 => {
                Compressor::Bzip2(BzEncoder::new(writer, bzip2::Compression::default()))
            }
            CompressionMethod::Xz => Compressor::Xz(lzma::xz_encoder(writer)?),
            CompressionMethod::Lzma => Compressor::Lzma(lzma::lzma_alone_encoder(writer)?),
        })
    }
}

/// Compression settings as written in the configuration file.
///
/// `method` stays a plain string so that an unknown name reaches the archiver,
/// which reports it and falls back to gzip instead of rejecting the whole file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub method: String,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: CompressionMethod::Gzip.to_string(),
        }
    }
}

impl CompressionConfig {
    /// Effective method; the error is set when `method` was not recognized.
    pub fn resolve(&self) -> (CompressionMethod, Option<Error>) {
        if !self.enabled {
            return (CompressionMethod::None, None);
        }
        match self.method.parse() {
            Ok(method) => (method, None),
            Err(reason) => (
                CompressionMethod::Gzip,
                Some(Error::from(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{reason}, falling back to gzip"),
                ))),
            ),
        }
    }
}
