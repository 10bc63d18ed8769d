//! Whole-file transcoding: stream every buffer of an existing file into a
//! new file under a different codec assignment or alignment policy.
//!
//! Buffer order and `info` metadata are preserved, so the result is
//! interchangeable with the original for any consumer — only the storage
//! representation changes. Typical uses are recompressing a mappable file
//! for archival, or expanding a compressed file into a mappable one.

use std::path::Path;

use tracing::debug;

use crate::codecs::CodecSpec;
use crate::error::BinPickleResult;
use crate::read::BinPickleReader;
use crate::write::BinPickleWriter;

/// Rewrite `src` into `dst`, applying `codecs` to every buffer.
///
/// With `align_for_mapping` set, raw buffers in the output land on page
/// boundaries. Returns the total length of the new file.
pub fn rewrite<P: AsRef<Path>, Q: AsRef<Path>>(
    src: P,
    dst: Q,
    codecs: &[CodecSpec],
    align_for_mapping: bool,
) -> BinPickleResult<u64> {
    let reader = BinPickleReader::open(src.as_ref(), false)?;
    let mut writer = BinPickleWriter::create(dst.as_ref())?;
    debug!(
        src = %src.as_ref().display(),
        dst = %dst.as_ref().display(),
        buffers = reader.len(),
        "rewriting binpickle file"
    );

    for index in 0..reader.len() {
        let data = reader.get_buffer(index)?;
        let info = reader.entries()[index].info.clone();
        writer.write_buffer(&data, codecs, info, align_for_mapping)?;
    }

    let total = writer.finalize()?;
    writer.close()?;
    Ok(total)
}
