//! Container file format for large, heterogeneous in-memory objects whose
//! bulk lives in contiguous binary buffers.
//!
//! A BinPickle file interleaves two delivery modes in a single artifact:
//!
//! - **Page-aligned uncompressed buffers** that can be memory-mapped into
//!   multiple processes for read-only sharing.
//! - **Codec-compressed buffers** optimised for long-term storage and
//!   transfer.
//!
//! The file is append-only at construction and read-only afterwards: a
//! 16-byte header, a payload region of digested (optionally encoded)
//! buffers, a self-describing CBOR index, and a 44-byte trailer that locates
//! and authenticates the index.
//!
//! ## Key Components
//!
//! - [`BinPickleWriter`]: streaming-append builder; buffers in, index and
//!   trailer out.
//! - [`BinPickleReader`]: validated access in eager (copying) or mapped
//!   (zero-copy) mode.
//! - [`CodecRegistry`] / [`CodecPipeline`]: injectable codec resolution and
//!   chained encode/decode.
//! - [`MappedBufferGovernor`]: refuses to unmap while any vended view is
//!   still live.
//!
//! ## Example
//!
//! ```no_run
//! use binpickle::{BinPickleReader, BinPickleWriter, CodecSpec};
//!
//! # fn main() -> binpickle::BinPickleResult<()> {
//! let mut writer = BinPickleWriter::create("model.bpk")?;
//! writer.write_buffer(&[0u8; 4096], &[], None, true)?;
//! writer.write_buffer(b"pickle bytes", &[CodecSpec::new("gz")], None, false)?;
//! writer.finalize()?;
//! writer.close()?;
//!
//! let mut reader = BinPickleReader::open("model.bpk", true)?;
//! let bulk = reader.get_buffer(0)?; // zero-copy view into the mapping
//! assert_eq!(bulk.len(), 4096);
//! drop(bulk);
//! reader.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! The writer is strictly single-owner. A reader's open and close are
//! single-threaded, but vended mapped views may be read and dropped from any
//! thread; the governor's accounting is atomic.

pub mod codecs;
pub mod digest;
pub mod error;
pub mod format;
pub mod index;
pub mod mapped;
pub mod read;
pub mod rewrite;
pub mod write;

pub use codecs::{
    default_registry, Codec, CodecPipeline, CodecRegistry, CodecSpec, GzCodec, NullCodec,
    StandardRegistry, ZstdCodec,
};
pub use digest::{hash_bytes, Digest256, DigestEngine};
pub use error::{BinPickleError, BinPickleResult};
pub use format::{FileHeader, FileTrailer, FORMAT_VERSION, HEADER_SIZE, MAGIC, TRAILER_SIZE};
pub use index::IndexEntry;
pub use mapped::{BufferView, MappedBufferGovernor, MappedSlice, MappingToken};
pub use read::{file_info, BinPickleReader, FileInfo, FileStatus};
pub use rewrite::rewrite;
pub use write::BinPickleWriter;
