use std::fmt;
use std::ptr::NonNull;

use tracing::debug;

use crate::resource::{check_ownership, requested_size};
use crate::{
    Alignment, BulkResource, ByteSpan, Bytes, MemoryResource, RewindableResource, RwByteSpan,
};

/// The chunk size of a [`LinearResource`] created with [`LinearResource::new()`].
pub const DEFAULT_CHUNK_GRANULARITY: Bytes = Bytes::kib(64);

/// Header at the start of every chunk, linking it to the chunk allocated before it.
#[repr(C)]
struct Chunk {
    previous: Option<NonNull<Chunk>>,

    // Everything obtained from the underlying resource, header included.
    span: RwByteSpan,

    // The part of `span` after the header.
    payload: RwByteSpan,
}

const CHUNK_ALIGNMENT: Alignment = Alignment::of::<Chunk>();

/// Bump allocation over a growing chain of chunks obtained from an underlying resource.
///
/// Allocation serves from the free part of the newest chunk. When a request does not fit, a new
/// chunk of at least `granularity` bytes is requested from the underlying resource and pushed onto
/// the chain. The remainder of the previous chunk is abandoned.
///
/// Individual deallocation is a no-op. [Restoring a savepoint][RewindableResource::restore]
/// returns every chunk allocated after the savepoint to the underlying resource and
/// [`deallocate_all()`][BulkResource::deallocate_all] returns all of them, as does dropping the
/// resource.
///
/// # Examples
///
/// ```
/// use tiered_memory::{Bytes, LinearResource, MemoryResource, SystemResource, align};
///
/// let mut linear = LinearResource::with_granularity(SystemResource, Bytes::kib(4));
///
/// let small = linear.allocate(Bytes::new(100), align!(8));
/// let large = linear.allocate(Bytes::kib(10), align!(8));
///
/// assert!(!small.is_empty() && !large.is_empty());
/// assert_eq!(linear.chunk_count(), 2);
/// assert_eq!(linear.owns(small.into()), Some(true));
/// ```
pub struct LinearResource<U: MemoryResource> {
    underlying: U,
    granularity: usize,

    // Newest chunk, the head of the chain.
    current: Option<NonNull<Chunk>>,

    // Unused tail of the newest chunk.
    free: RwByteSpan,

    chunk_count: usize,
}

/// Savepoint of a [`LinearResource`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LinearSavepoint {
    chunk: Option<NonNull<Chunk>>,
    free: RwByteSpan,
}

impl<U: MemoryResource> LinearResource<U> {
    /// Creates a resource that obtains chunks of
    /// [`DEFAULT_CHUNK_GRANULARITY`] bytes from `underlying`.
    #[must_use]
    pub fn new(underlying: U) -> Self {
        Self::with_granularity(underlying, DEFAULT_CHUNK_GRANULARITY)
    }

    /// Creates a resource that obtains chunks from `underlying` whose sizes are multiples of
    /// `granularity`.
    #[must_use]
    pub fn with_granularity(underlying: U, granularity: Bytes) -> Self {
        Self {
            underlying,
            granularity: granularity.to_usize().unwrap_or(0).max(1),
            current: None,
            free: RwByteSpan::empty(),
            chunk_count: 0,
        }
    }

    /// The resource chunks are obtained from.
    #[must_use]
    pub fn underlying(&self) -> &U {
        &self.underlying
    }

    /// The unit in which chunk sizes are requested.
    #[must_use]
    pub fn granularity(&self) -> Bytes {
        Bytes::from_usize(self.granularity)
    }

    /// The number of chunks currently held.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Serves a request from the newest chunk if it fits.
    fn carve(&mut self, size: usize, alignment: Alignment) -> Option<RwByteSpan> {
        let mut free = self.free.align(alignment);

        if free.size() < size {
            return None;
        }

        let block = free.pop_front(Bytes::from_usize(size));
        self.free = free;

        Some(block)
    }

    /// Obtains a chunk large enough for the request and makes it the newest.
    fn push_chunk(&mut self, size: usize, alignment: Alignment) -> bool {
        let Some(chunk_size) = size
            .checked_add(alignment.mask())
            .and_then(|size| size.checked_add(size_of::<Chunk>()))
            .and_then(|needed| {
                needed
                    .max(self.granularity)
                    .checked_next_multiple_of(self.granularity)
            })
        else {
            return false;
        };

        let span = self
            .underlying
            .allocate(Bytes::from_usize(chunk_size), CHUNK_ALIGNMENT);

        if span.is_empty() {
            return false;
        }

        let (_, payload) = span.split_at(Bytes::from_usize(size_of::<Chunk>()));
        let header = span.start().cast::<Chunk>();

        // SAFETY: The span is fresh from the underlying resource, large enough for the header
        // and aligned for it.
        unsafe {
            header.write(Chunk {
                previous: self.current,
                span,
                payload,
            });
        }

        self.current = NonNull::new(header);
        self.free = payload;
        self.chunk_count += 1;

        debug!(chunk = ?span, count = self.chunk_count, "acquired chunk");

        true
    }

    /// Returns the newest chunk to the underlying resource.
    fn pop_chunk(&mut self) {
        let Some(chunk) = self.current else {
            return;
        };

        // SAFETY: The header was written by `push_chunk()` and the chunk is still held.
        let Chunk { previous, span, .. } = unsafe { chunk.read() };

        // SAFETY: The span came from the underlying resource with this alignment and nothing
        // handed out from it is used any more.
        unsafe {
            self.underlying.deallocate(span, CHUNK_ALIGNMENT);
        }

        self.current = previous;
        self.free = RwByteSpan::empty();
        self.chunk_count -= 1;
    }
}

// SAFETY: Spans are carved in increasing order from the free tail of the newest chunk and never
// overlap. Chunks stay allocated from the underlying resource until they are reclaimed.
unsafe impl<U: MemoryResource> MemoryResource for LinearResource<U> {
    fn allocate(&mut self, size: Bytes, alignment: Alignment) -> RwByteSpan {
        let Some(size) = requested_size(size) else {
            return RwByteSpan::empty();
        };

        if let Some(block) = self.carve(size, alignment) {
            return block;
        }

        if !self.push_chunk(size, alignment) {
            return RwByteSpan::empty();
        }

        self.carve(size, alignment).unwrap_or_default()
    }

    unsafe fn deallocate(&mut self, block: RwByteSpan, _alignment: Alignment) {
        check_ownership(self, block);
    }

    fn owns(&self, block: ByteSpan) -> Option<bool> {
        let mut current = self.current;

        while let Some(chunk) = current {
            // SAFETY: The header was written by `push_chunk()` and the chunk is still held.
            let chunk = unsafe { chunk.as_ref() };

            if chunk.payload.contains(block) {
                return Some(true);
            }

            current = chunk.previous;
        }

        Some(false)
    }
}

impl<U: MemoryResource> BulkResource for LinearResource<U> {
    fn deallocate_all(&mut self) {
        while self.current.is_some() {
            self.pop_chunk();
        }
    }
}

impl<U: MemoryResource> RewindableResource for LinearResource<U> {
    type Savepoint = LinearSavepoint;

    fn savepoint(&self) -> Self::Savepoint {
        LinearSavepoint {
            chunk: self.current,
            free: self.free,
        }
    }

    unsafe fn restore(&mut self, savepoint: Self::Savepoint) {
        while self.current != savepoint.chunk {
            debug_assert!(
                self.current.is_some(),
                "savepoint {savepoint:?} refers to a chunk that was already released"
            );

            if self.current.is_none() {
                break;
            }

            self.pop_chunk();
        }

        self.free = savepoint.free;
    }
}

impl<U: MemoryResource> Drop for LinearResource<U> {
    fn drop(&mut self) {
        self.deallocate_all();
    }
}

impl<U: MemoryResource + fmt::Debug> fmt::Debug for LinearResource<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinearResource")
            .field("underlying", &self.underlying)
            .field("granularity", &self.granularity())
            .field("current", &self.current)
            .field("free", &self.free)
            .field("chunk_count", &self.chunk_count)
            .finish()
    }
}

// SAFETY: The chain only points into chunks owned by this resource. Moving the resource to
// another thread moves the underlying resource along, which must permit that.
unsafe impl<U: MemoryResource + Send> Send for LinearResource<U> {}
// SAFETY: Shared references only read the chain.
unsafe impl<U: MemoryResource + Sync> Sync for LinearResource<U> {}
