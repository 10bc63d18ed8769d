//! Mapped-buffer lifetime accounting.
//!
//! The memory mapping is owned by a shared backing that the reader and every
//! vended view hold strong references to, so a view can outlive the lexical
//! scope of the reader that produced it. The governor counts live views;
//! [`crate::read::BinPickleReader::close`] consults the count and refuses to
//! unmap while it is non-zero. Dropping the last reference unmaps.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use memmap2::Mmap;

/// Counts how many mapped views derived from one reader are still in use.
///
/// Increment happens on the thread that vends a view; decrement may happen on
/// any thread the host uses to release views.
#[derive(Debug, Default)]
pub struct MappedBufferGovernor {
    live: AtomicUsize,
}

impl MappedBufferGovernor {
    /// Number of mapped views currently alive.
    pub fn live_views(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    fn retain(&self) {
        self.live.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self) {
        let prev = self.live.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "governor release without matching retain");
    }
}

/// The shared owner of one read-only mapping over a file's payload region.
pub(crate) struct MapBacking {
    mmap: Mmap,
    governor: MappedBufferGovernor,
}

impl MapBacking {
    pub(crate) fn new(mmap: Mmap) -> Arc<Self> {
        Arc::new(Self {
            mmap,
            governor: MappedBufferGovernor::default(),
        })
    }

    pub(crate) fn governor(&self) -> &MappedBufferGovernor {
        &self.governor
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.mmap
    }
}

/// A strong reference to the mapping, counted by the governor.
///
/// The token keeps the mapping resident: as long as any token is alive the
/// backing memory stays valid, and the owning reader's `close` is refused.
pub struct MappingToken {
    backing: Arc<MapBacking>,
}

impl MappingToken {
    pub(crate) fn new(backing: Arc<MapBacking>) -> Self {
        backing.governor().retain();
        Self { backing }
    }
}

impl Clone for MappingToken {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.backing))
    }
}

impl Drop for MappingToken {
    fn drop(&mut self) {
        self.backing.governor().release();
    }
}

impl fmt::Debug for MappingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingToken")
            .field("live_views", &self.backing.governor().live_views())
            .finish()
    }
}

/// A zero-copy byte view into the mapping.
#[derive(Debug, Clone)]
pub struct MappedSlice {
    token: MappingToken,
    offset: usize,
    len: usize,
}

impl MappedSlice {
    pub(crate) fn new(backing: Arc<MapBacking>, offset: usize, len: usize) -> Self {
        debug_assert!(offset + len <= backing.bytes().len());
        Self {
            token: MappingToken::new(backing),
            offset,
            len,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.token.backing.bytes()[self.offset..self.offset + self.len]
    }
}

impl Deref for MappedSlice {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for MappedSlice {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

/// A buffer retrieved from a reader: either an owned (copied, decoded)
/// region, or a zero-copy view into the mapping.
#[derive(Debug)]
pub enum BufferView {
    Owned(Vec<u8>),
    Mapped(MappedSlice),
}

impl BufferView {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            BufferView::Owned(data) => data,
            BufferView::Mapped(slice) => slice.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// Whether this view borrows the mapping (and therefore pins it).
    pub fn is_mapped(&self) -> bool {
        matches!(self, BufferView::Mapped(_))
    }

    /// Copy the bytes out, releasing any mapping reference.
    pub fn into_owned(self) -> Vec<u8> {
        match self {
            BufferView::Owned(data) => data,
            BufferView::Mapped(slice) => slice.as_slice().to_vec(),
        }
    }
}

impl Deref for BufferView {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for BufferView {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}
