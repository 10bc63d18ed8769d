//! Streaming-append writer for BinPickle files.
//!
//! A writer owns an exclusive writable sink. It is created once, accepts
//! buffers in order, is finalized exactly once, and is then discarded. Bytes
//! reach the sink in strictly increasing offset order; the only backward seek
//! is the header length back-patch during finalize.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ciborium::Value;
use tracing::debug;

use crate::codecs::{default_registry, CodecPipeline, CodecRegistry, CodecSpec};
use crate::digest::{hash_bytes, Digest256, DigestEngine};
use crate::error::{BinPickleError, BinPickleResult};
use crate::format::{align_up, host_page_size, FileHeader, FileTrailer, HEADER_SIZE, TRAILER_SIZE};
use crate::index::{encode_index, IndexEntry};

const STREAM_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Open,
    Writing,
    Finalized,
    Closed,
    Failed,
}

/// Stateful builder that streams buffers to a file, accumulates the index,
/// and emits the trailer.
///
/// States move `Open → Writing → Finalized → Closed`. A codec or I/O failure
/// moves the writer to a terminal `Failed` state: the partial file is not
/// self-consistent and must be discarded by the caller.
pub struct BinPickleWriter {
    path: PathBuf,
    file: File,
    state: WriterState,
    position: u64,
    entries: Vec<IndexEntry>,
    registry: Arc<dyn CodecRegistry>,
    page_size: u64,
    padding_bytes: u64,
}

impl BinPickleWriter {
    /// Create a new BinPickle file at `path`, truncating any existing file.
    ///
    /// The header is written immediately with a zero payload length and
    /// back-patched during [`finalize`](Self::finalize).
    pub fn create<P: AsRef<Path>>(path: P) -> BinPickleResult<Self> {
        Self::create_with_registry(path, default_registry())
    }

    /// Create a writer that resolves codecs against a caller-supplied
    /// registry.
    pub fn create_with_registry<P: AsRef<Path>>(
        path: P,
        registry: Arc<dyn CodecRegistry>,
    ) -> BinPickleResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::create(&path)?;
        file.write_all(&FileHeader::placeholder().encode())?;
        debug!(path = %path.display(), "created binpickle file");
        Ok(Self {
            path,
            file,
            state: WriterState::Open,
            position: HEADER_SIZE as u64,
            entries: Vec::new(),
            registry,
            page_size: host_page_size(),
            padding_bytes: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Index entries accumulated so far, in write order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Total zero padding inserted for page alignment. Padding appears only
    /// in the payload region, never in the index.
    pub fn padding_bytes(&self) -> u64 {
        self.padding_bytes
    }

    /// Append one buffer.
    ///
    /// `codecs` is the chain to apply, in encode order; empty means raw.
    /// When `align_for_mapping` is set and the chain is empty, the buffer is
    /// placed on the next page boundary so a mapped reader can hand out
    /// zero-copy views. Alignment is advisory: with a non-empty chain it is
    /// skipped, since mapped access to encoded bytes needs a copy anyway.
    ///
    /// Returns the index of the new entry.
    pub fn write_buffer(
        &mut self,
        data: &[u8],
        codecs: &[CodecSpec],
        info: Option<BTreeMap<String, Value>>,
        align_for_mapping: bool,
    ) -> BinPickleResult<usize> {
        match self.state {
            WriterState::Open | WriterState::Writing => {}
            WriterState::Failed => return Err(BinPickleError::WriterFailed),
            WriterState::Finalized | WriterState::Closed => {
                return Err(BinPickleError::invalid_state(
                    "cannot write buffer after finalize",
                ));
            }
        }
        self.state = WriterState::Writing;

        match self.append_buffer(data, codecs, info, align_for_mapping) {
            Ok(index) => Ok(index),
            Err(err) => {
                self.state = WriterState::Failed;
                Err(err)
            }
        }
    }

    fn append_buffer(
        &mut self,
        data: &[u8],
        codecs: &[CodecSpec],
        info: Option<BTreeMap<String, Value>>,
        align_for_mapping: bool,
    ) -> BinPickleResult<usize> {
        // Empty buffers bypass the codec chain entirely; they stay mappable
        // and cost nothing to store.
        let pipeline = if data.is_empty() {
            CodecPipeline::identity()
        } else {
            CodecPipeline::resolve(self.registry.as_ref(), codecs)?
        };

        if pipeline.is_empty() && align_for_mapping {
            self.pad_to_page_boundary()?;
        }

        let offset = self.position;
        let dec_length = data.len() as u64;
        let (enc_length, hash) = if pipeline.is_empty() {
            self.stream_span(data)?
        } else {
            let encoded = pipeline.encode(data)?;
            self.stream_span(&encoded)?
        };
        debug!(
            offset,
            dec_length, enc_length, "wrote buffer {}", self.entries.len()
        );

        self.entries.push(IndexEntry {
            offset,
            enc_length,
            dec_length,
            hash,
            codecs: pipeline.specs(),
            info,
            extra: BTreeMap::new(),
        });
        Ok(self.entries.len() - 1)
    }

    /// Finish the file: emit the index, the trailer, and the back-patched
    /// header, then sync. Returns the total file length.
    pub fn finalize(&mut self) -> BinPickleResult<u64> {
        match self.state {
            WriterState::Open | WriterState::Writing => {}
            WriterState::Failed => return Err(BinPickleError::WriterFailed),
            WriterState::Finalized | WriterState::Closed => {
                return Err(BinPickleError::invalid_state("writer already finalized"));
            }
        }

        match self.emit_index_and_trailer() {
            Ok(total) => {
                self.state = WriterState::Finalized;
                Ok(total)
            }
            Err(err) => {
                self.state = WriterState::Failed;
                Err(err)
            }
        }
    }

    fn emit_index_and_trailer(&mut self) -> BinPickleResult<u64> {
        let index_offset = self.position;
        let blob = encode_index(&self.entries)?;
        let index_length = u32::try_from(blob.len()).map_err(|_| {
            BinPickleError::serialization(format!(
                "index of {} bytes exceeds the u32 length field",
                blob.len()
            ))
        })?;
        debug!(
            entries = self.entries.len(),
            index_offset, index_length, "writing index"
        );

        self.file.write_all(&blob)?;
        let trailer = FileTrailer {
            index_offset,
            index_length,
            index_hash: hash_bytes(&blob),
        };
        self.file.write_all(&trailer.encode())?;
        self.position = index_offset + index_length as u64 + TRAILER_SIZE as u64;

        // The one permitted backward seek: patch the payload length into the
        // header written at create time.
        let header = FileHeader {
            version: crate::format::FORMAT_VERSION,
            payload_length: index_offset - HEADER_SIZE as u64,
        };
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header.encode())?;
        self.file.flush()?;
        self.file.sync_data()?;

        debug!(total_length = self.position, "finalized binpickle file");
        Ok(self.position)
    }

    /// Release the writer. Clean only from the `Finalized` state; from any
    /// other state the partial file on disk should be discarded.
    pub fn close(&mut self) -> BinPickleResult<()> {
        self.state = WriterState::Closed;
        Ok(())
    }

    fn pad_to_page_boundary(&mut self) -> BinPickleResult<()> {
        let aligned = align_up(self.position, self.page_size);
        if aligned > self.position {
            let mut remaining = (aligned - self.position) as usize;
            let zeros = [0u8; STREAM_CHUNK];
            while remaining > 0 {
                let chunk = remaining.min(STREAM_CHUNK);
                self.file.write_all(&zeros[..chunk])?;
                remaining -= chunk;
            }
            self.padding_bytes += aligned - self.position;
            debug!(
                padding = aligned - self.position,
                aligned, "padded to page boundary"
            );
            self.position = aligned;
        }
        Ok(())
    }

    /// Stream a span to the sink while hashing it, one pass.
    fn stream_span(&mut self, span: &[u8]) -> BinPickleResult<(u64, Digest256)> {
        let mut engine = DigestEngine::new();
        for chunk in span.chunks(STREAM_CHUNK) {
            engine.update(chunk);
            self.file.write_all(chunk)?;
        }
        self.position += span.len() as u64;
        Ok((span.len() as u64, engine.finalize()))
    }
}
