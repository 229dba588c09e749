use crate::backup::result_error::result::Result;
use liblzma::stream::{Check, LzmaOptions, MtStreamBuilder, Stream};
use liblzma::write::XzEncoder;
use std::io::Write;
use std::num::NonZero;

/// Default compression level (balance of speed vs size)
static DEFAULT_COMPRESSION_LEVEL: u32 = 6;
/// Maximum threads to prevent resource exhaustion
static DEFAULT_MAX_PARALLELIZATION: usize = 32;

fn default_thread_count() -> u32 {
    std::thread::available_parallelism()
        .map(NonZero::get)
        .map(|core| core / 2)
        .map(|t| t.max(1))
        .map(|t| t.min(DEFAULT_MAX_PARALLELIZATION) as u32)
        .unwrap_or(1)
}

/// `.xz` container, multi-threaded when more than one core is available.
pub fn xz_encoder<W: Write>(writer: W) -> Result<XzEncoder<W>> {
    let thread = default_thread_count();
    tracing::debug!(
        "Creating XZ compressor with level={}, threads={}",
        DEFAULT_COMPRESSION_LEVEL,
        thread
    );

    if thread == 1 {
        Ok(XzEncoder::new(writer, DEFAULT_COMPRESSION_LEVEL))
    } else {
        let stream = MtStreamBuilder::new()
            .preset(DEFAULT_COMPRESSION_LEVEL)
            .check(Check::Crc64)
            .threads(thread)
            .encoder()?;
        Ok(XzEncoder::new_stream(writer, stream))
    }
}

/// Legacy `.lzma` (lzma_alone) container. Always single-threaded.
pub fn lzma_alone_encoder<W: Write>(writer: W) -> Result<XzEncoder<W>> {
    let options = LzmaOptions::new_preset(DEFAULT_COMPRESSION_LEVEL)?;
    let stream = Stream::new_lzma_encoder(&options)?;
    Ok(XzEncoder::new_stream(writer, stream))
}
