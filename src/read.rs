//! Reader for BinPickle files: open protocol, eager and mapped retrieval,
//! and validation sweeps.
//!
//! In eager mode every requested buffer is copied out of the file and
//! decoded. In mapped mode a single read-only mapping spans the payload
//! region and raw buffers come back as zero-copy views; buffers with a codec
//! chain degrade to eager semantics per buffer, which is why writers that
//! want sharing leave their bulk buffers uncompressed.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use memmap2::MmapOptions;
use tracing::debug;

use crate::codecs::{default_registry, CodecPipeline, CodecRegistry};
use crate::digest::hash_bytes;
use crate::error::{BinPickleError, BinPickleResult};
use crate::format::{FileHeader, FileTrailer, HEADER_SIZE, MIN_FILE_SIZE, TRAILER_SIZE};
use crate::index::{decode_index, validate_entries, IndexEntry};
use crate::mapped::{BufferView, MapBacking, MappedSlice};

/// Classification result of [`file_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// The file does not exist.
    Missing,
    /// The file exists but does not start with a valid BinPickle header.
    Invalid,
    /// The file carries a valid BinPickle header.
    BinPickle,
}

/// Basic information about a file, from its header only.
#[derive(Debug, Clone, Copy)]
pub struct FileInfo {
    pub status: FileStatus,
    /// Length of the file on disk (zero when missing).
    pub file_length: u64,
    /// Payload-region length declared by the header (zero unless valid).
    pub payload_length: u64,
}

impl FileInfo {
    pub fn is_valid(&self) -> bool {
        self.status == FileStatus::BinPickle
    }
}

/// Probe whether `path` is a BinPickle file without reading past the header.
pub fn file_info<P: AsRef<Path>>(path: P) -> FileInfo {
    let file = match File::open(path.as_ref()) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return FileInfo {
                status: FileStatus::Missing,
                file_length: 0,
                payload_length: 0,
            };
        }
        Err(_) => {
            return FileInfo {
                status: FileStatus::Invalid,
                file_length: 0,
                payload_length: 0,
            };
        }
    };
    let file_length = file.metadata().map(|m| m.len()).unwrap_or(0);
    match read_span(&file, 0, HEADER_SIZE) {
        Ok(buf) => match FileHeader::decode(&buf) {
            Ok(header) => FileInfo {
                status: FileStatus::BinPickle,
                file_length,
                payload_length: header.payload_length,
            },
            Err(_) => FileInfo {
                status: FileStatus::Invalid,
                file_length,
                payload_length: 0,
            },
        },
        Err(_) => FileInfo {
            status: FileStatus::Invalid,
            file_length,
            payload_length: 0,
        },
    }
}

struct MappedState {
    backing: Arc<MapBacking>,
    /// Per-entry record of digest checks that already passed; verification
    /// happens on first access and successful results are cached.
    verified: Vec<AtomicBool>,
}

/// A BinPickle file opened for reading.
pub struct BinPickleReader {
    path: PathBuf,
    file: File,
    header: FileHeader,
    trailer: FileTrailer,
    entries: Vec<IndexEntry>,
    registry: Arc<dyn CodecRegistry>,
    mapping: Option<MappedState>,
    closed: bool,
}

impl std::fmt::Debug for BinPickleReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinPickleReader")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("trailer", &self.trailer)
            .field("entries", &self.entries)
            .field("closed", &self.closed)
            .finish()
    }
}

impl BinPickleReader {
    /// Open `path` and validate its header, trailer, and index.
    ///
    /// With `direct` set, a single read-only mapping is established over the
    /// payload region and raw buffers are vended as zero-copy views.
    pub fn open<P: AsRef<Path>>(path: P, direct: bool) -> BinPickleResult<Self> {
        Self::open_with_registry(path, direct, default_registry())
    }

    /// Open with a caller-supplied codec registry.
    pub fn open_with_registry<P: AsRef<Path>>(
        path: P,
        direct: bool,
        registry: Arc<dyn CodecRegistry>,
    ) -> BinPickleResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let file_length = file.metadata()?.len();
        if file_length < MIN_FILE_SIZE {
            return Err(BinPickleError::malformed(format!(
                "file of {file_length} bytes is too small for a BinPickle file"
            )));
        }

        let header = FileHeader::decode(&read_span(&file, 0, HEADER_SIZE)?)?;
        let trailer = FileTrailer::decode(&read_span(
            &file,
            file_length - TRAILER_SIZE as u64,
            TRAILER_SIZE,
        )?)?;
        trailer.validate_bounds(file_length)?;
        if header.payload_length != trailer.index_offset - HEADER_SIZE as u64 {
            return Err(BinPickleError::malformed(format!(
                "header declares a {}-byte payload region but the index starts at {}",
                header.payload_length, trailer.index_offset
            )));
        }

        let blob = read_span(&file, trailer.index_offset, trailer.index_length as usize)?;
        if hash_bytes(&blob) != trailer.index_hash {
            return Err(BinPickleError::corrupt_index("index digest mismatch"));
        }
        let entries = decode_index(&blob)?;
        validate_entries(&entries, trailer.index_offset)?;
        debug!(
            path = %path.display(),
            entries = entries.len(),
            direct,
            "opened binpickle file"
        );

        let mapping = if direct {
            let mmap = unsafe {
                MmapOptions::new()
                    .len(trailer.index_offset as usize)
                    .map(&file)?
            };
            Some(MappedState {
                backing: MapBacking::new(mmap),
                verified: entries.iter().map(|_| AtomicBool::new(false)).collect(),
            })
        } else {
            None
        };

        Ok(Self {
            path,
            file,
            header,
            trailer,
            entries,
            registry,
            mapping,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Payload-region length declared by the (validated) header.
    pub fn payload_length(&self) -> u64 {
        self.header.payload_length
    }

    /// The validated index listing, in write order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Number of stored buffers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the reader holds a mapping over the payload region.
    pub fn is_direct(&self) -> bool {
        self.mapping.is_some()
    }

    /// Whether every buffer can be vended zero-copy: true iff no entry
    /// carries a codec chain.
    pub fn is_mappable(&self) -> bool {
        self.entries.iter().all(IndexEntry::is_raw)
    }

    /// Number of mapped views currently alive (always zero in eager mode).
    pub fn live_views(&self) -> usize {
        self.mapping
            .as_ref()
            .map(|m| m.backing.governor().live_views())
            .unwrap_or(0)
    }

    /// Retrieve one buffer.
    ///
    /// Eager mode returns an owned, decoded region. Mapped mode returns a
    /// zero-copy view for raw buffers and an owned region for encoded ones.
    /// A digest failure on one buffer does not poison the reader; other
    /// buffers remain retrievable.
    pub fn get_buffer(&self, index: usize) -> BinPickleResult<BufferView> {
        if self.closed {
            return Err(BinPickleError::invalid_state("reader is closed"));
        }
        let entry = self
            .entries
            .get(index)
            .ok_or(BinPickleError::NoSuchBuffer(index))?;

        match &self.mapping {
            Some(mapped) => {
                let start = entry.offset as usize;
                let end = start + entry.enc_length as usize;
                let stored = &mapped.backing.bytes()[start..end];
                if !mapped.verified[index].load(Ordering::Acquire) {
                    verify_stored(index, stored, entry)?;
                    mapped.verified[index].store(true, Ordering::Release);
                }
                if entry.is_raw() {
                    debug!(index, len = entry.enc_length, "vending mapped view");
                    Ok(BufferView::Mapped(MappedSlice::new(
                        Arc::clone(&mapped.backing),
                        start,
                        entry.enc_length as usize,
                    )))
                } else {
                    self.decode_entry(index, entry, stored)
                }
            }
            None => {
                let stored = read_span(&self.file, entry.offset, entry.enc_length as usize)?;
                verify_stored(index, &stored, entry)?;
                if entry.is_raw() {
                    Ok(BufferView::Owned(stored))
                } else {
                    self.decode_entry(index, entry, &stored)
                }
            }
        }
    }

    fn decode_entry(
        &self,
        index: usize,
        entry: &IndexEntry,
        stored: &[u8],
    ) -> BinPickleResult<BufferView> {
        debug!(index, codecs = entry.codecs.len(), "decoding buffer");
        let pipeline = CodecPipeline::resolve(self.registry.as_ref(), &entry.codecs)?;
        let decoded = pipeline.decode(stored, entry.dec_length)?;
        Ok(BufferView::Owned(decoded))
    }

    /// Exhaustively re-check the file and report every problem found instead
    /// of failing on the first. Fatal index problems prevent opening, so
    /// this sweep covers buffer digests, decoded lengths, and layout.
    pub fn find_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match read_span(
            &self.file,
            self.trailer.index_offset,
            self.trailer.index_length as usize,
        ) {
            Ok(blob) => {
                if hash_bytes(&blob) != self.trailer.index_hash {
                    errors.push("index hash mismatch".to_string());
                }
            }
            Err(err) => errors.push(format!("index unreadable: {err}")),
        }

        let mut cursor = HEADER_SIZE as u64;
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.offset < cursor {
                errors.push(format!(
                    "entry {i}: offset {} before expected start {cursor}",
                    entry.offset
                ));
            }
            cursor = entry.offset + entry.enc_length;

            let stored = match read_span(&self.file, entry.offset, entry.enc_length as usize) {
                Ok(stored) => stored,
                Err(err) => {
                    errors.push(format!("entry {i}: unreadable: {err}"));
                    continue;
                }
            };
            if hash_bytes(&stored) != entry.hash {
                errors.push(format!("entry {i}: invalid digest"));
            }
            if !entry.is_raw() {
                match CodecPipeline::resolve(self.registry.as_ref(), &entry.codecs)
                    .and_then(|p| p.decode(&stored, entry.dec_length))
                {
                    Ok(_) => {}
                    Err(err) => errors.push(format!("entry {i}: {err}")),
                }
            }
        }
        errors
    }

    /// Close the reader.
    ///
    /// Unconditional in eager mode. In mapped mode the close is refused with
    /// [`BinPickleError::BuffersStillLive`] while any vended view is alive,
    /// and the mapping stays intact; retry after the views are dropped.
    pub fn close(&mut self) -> BinPickleResult<()> {
        if let Some(mapped) = &self.mapping {
            let live = mapped.backing.governor().live_views();
            if live > 0 {
                return Err(BinPickleError::BuffersStillLive { live });
            }
            self.mapping = None;
        }
        self.closed = true;
        Ok(())
    }
}

fn verify_stored(index: usize, stored: &[u8], entry: &IndexEntry) -> BinPickleResult<()> {
    if hash_bytes(stored) != entry.hash {
        return Err(BinPickleError::corrupt_buffer(
            index,
            "stored bytes do not match the index digest",
        ));
    }
    Ok(())
}

/// Positional read of `len` bytes at `offset`.
fn read_span(file: &File, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut handle = file;
    handle.seek(SeekFrom::Start(offset))?;
    handle.read_exact(&mut buf)?;
    Ok(buf)
}
