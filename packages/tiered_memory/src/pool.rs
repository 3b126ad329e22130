use std::fmt;
use std::ptr::NonNull;

use tracing::debug;

use crate::resource::{check_ownership, requested_size};
use crate::{Alignment, BulkResource, ByteSpan, Bytes, MemoryResource, RwByteSpan};

/// The number of blocks that fit into a slab of a [`PoolResource`] unless a different slab size
/// is chosen with [`PoolResource::with_slab_size()`].
pub const DEFAULT_SLAB_BLOCKS: usize = 32;

/// Header at the start of every slab, linking it to the slab allocated before it.
#[repr(C)]
struct Slab {
    previous: Option<NonNull<Slab>>,

    // Everything obtained from the underlying resource, header included.
    span: RwByteSpan,
}

const SLAB_ALIGNMENT: Alignment = Alignment::of::<Slab>();

/// Free-list node, stored in the first bytes of a returned block.
#[repr(C)]
struct FreeBlock {
    next: Option<NonNull<FreeBlock>>,
}

/// Fixed-size blocks carved from slabs obtained from an underlying resource.
///
/// Every block can hold up to `block_size` bytes aligned to `alignment`. Requests that are larger
/// or need a stricter alignment fail. Returned blocks go onto an intrusive free list and are
/// handed out again in LIFO order before new blocks are carved. Block contents are not cleared
/// between uses.
///
/// [`deallocate_all()`][BulkResource::deallocate_all] returns every slab to the underlying
/// resource, as does dropping the pool.
///
/// # Examples
///
/// ```
/// use tiered_memory::{Bytes, MemoryResource, PoolResource, SystemResource, align};
///
/// let mut pool = PoolResource::new(SystemResource, Bytes::new(64), align!(16));
///
/// let first = pool.allocate(Bytes::new(48), align!(8));
/// assert_eq!(first.len(), Bytes::new(48));
///
/// // SAFETY: The block came from this pool and is not used afterwards.
/// unsafe { pool.deallocate(first, align!(8)) };
///
/// let second = pool.allocate(Bytes::new(64), align!(16));
/// assert_eq!(second.start(), first.start());
///
/// // Too large for a block.
/// assert!(pool.allocate(Bytes::new(65), align!(16)).is_empty());
/// ```
pub struct PoolResource<U: MemoryResource> {
    underlying: U,

    block_size: usize,
    alignment: Alignment,

    // Distance between consecutive blocks. Fits a free-list node and keeps blocks aligned.
    stride: usize,
    block_alignment: Alignment,

    slab_size: usize,
    min_slab_size: usize,

    // Newest slab, the head of the chain.
    slabs: Option<NonNull<Slab>>,

    // Part of the newest slab not yet carved into blocks.
    uncarved: RwByteSpan,

    free_list: Option<NonNull<FreeBlock>>,

    slab_count: usize,
    free_block_count: usize,
}

impl<U: MemoryResource> PoolResource<U> {
    /// Creates a pool of blocks holding up to `block_size` bytes aligned to `alignment`.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is not positive or if a slab of [`DEFAULT_SLAB_BLOCKS`] blocks of
    /// this size and alignment does not fit into the address space. Use
    /// [`try_new()`][Self::try_new] to handle sizes that come from outside the program.
    #[must_use]
    pub fn new(underlying: U, block_size: Bytes, alignment: Alignment) -> Self {
        Self::try_new(underlying, block_size, alignment)
            .expect("pool block size must be positive and fit into the address space")
    }

    /// Creates a pool of blocks holding up to `block_size` bytes aligned to `alignment`.
    ///
    /// Returns `None` if `block_size` is not positive or if a slab of [`DEFAULT_SLAB_BLOCKS`]
    /// blocks of this size and alignment does not fit into the address space.
    #[must_use]
    pub fn try_new(underlying: U, block_size: Bytes, alignment: Alignment) -> Option<Self> {
        let block_size = block_size.to_usize().filter(|size| *size > 0)?;

        let block_alignment = alignment.max(Alignment::of::<FreeBlock>());
        let stride = block_alignment.checked_align_up(block_size.max(size_of::<FreeBlock>()))?;

        let slab_size = slab_size_for(stride, block_alignment, DEFAULT_SLAB_BLOCKS)?;

        // Never larger than the default slab.
        let min_slab_size = slab_size_for(stride, block_alignment, 1)?;

        Some(Self {
            underlying,
            block_size,
            alignment,
            stride,
            block_alignment,
            slab_size,
            min_slab_size,
            slabs: None,
            uncarved: RwByteSpan::empty(),
            free_list: None,
            slab_count: 0,
            free_block_count: 0,
        })
    }

    /// Sets the size of the slabs requested from the underlying resource.
    ///
    /// The size is raised to the minimum that fits one block if it is smaller.
    #[must_use]
    pub fn with_slab_size(mut self, slab_size: Bytes) -> Self {
        self.slab_size = slab_size
            .to_usize()
            .unwrap_or(0)
            .max(self.min_slab_size);
        self
    }

    /// The resource slabs are obtained from.
    #[must_use]
    pub fn underlying(&self) -> &U {
        &self.underlying
    }

    /// The largest request a block can hold.
    #[must_use]
    pub fn block_size(&self) -> Bytes {
        Bytes::from_usize(self.block_size)
    }

    /// The strictest alignment a block satisfies.
    #[must_use]
    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    /// The size of the slabs requested from the underlying resource.
    #[must_use]
    pub fn slab_size(&self) -> Bytes {
        Bytes::from_usize(self.slab_size)
    }

    /// The number of slabs currently held.
    #[must_use]
    pub fn slab_count(&self) -> usize {
        self.slab_count
    }

    /// The number of returned blocks waiting to be handed out again.
    #[must_use]
    pub fn free_block_count(&self) -> usize {
        self.free_block_count
    }

    fn pop_free(&mut self) -> Option<*mut u8> {
        let block = self.free_list?;

        // SAFETY: The node was written by `deallocate()` into a block that nobody else uses.
        let FreeBlock { next } = unsafe { block.read() };

        self.free_list = next;
        self.free_block_count -= 1;

        Some(block.as_ptr().cast())
    }

    fn carve(&mut self) -> Option<*mut u8> {
        let mut uncarved = self.uncarved.align(self.block_alignment);

        if uncarved.size() < self.stride {
            return None;
        }

        let block = uncarved.pop_front(Bytes::from_usize(self.stride));
        self.uncarved = uncarved;

        Some(block.start())
    }

    fn push_slab(&mut self) -> bool {
        let span = self
            .underlying
            .allocate(Bytes::from_usize(self.slab_size), SLAB_ALIGNMENT);

        if span.is_empty() {
            return false;
        }

        let header = span.start().cast::<Slab>();

        // SAFETY: The span is fresh from the underlying resource, large enough for the header
        // and aligned for it.
        unsafe {
            header.write(Slab {
                previous: self.slabs,
                span,
            });
        }

        self.slabs = NonNull::new(header);
        self.uncarved = span.split_at(Bytes::from_usize(size_of::<Slab>())).1;
        self.slab_count += 1;

        debug!(
            slab = ?span,
            block_size = self.block_size,
            count = self.slab_count,
            "acquired slab"
        );

        true
    }
}

/// The size of a slab holding `blocks` blocks, with room for the header and for aligning the
/// first block. `None` if that does not fit into `isize`.
fn slab_size_for(stride: usize, block_alignment: Alignment, blocks: usize) -> Option<usize> {
    stride
        .checked_mul(blocks)
        .and_then(|payload| payload.checked_add(size_of::<Slab>()))
        .and_then(|size| size.checked_add(block_alignment.mask()))
        .filter(|size| isize::try_from(*size).is_ok())
}

// SAFETY: Every block is a distinct `stride`-sized, aligned piece of a slab. A block is either
// handed out or on the free list, never both. Slabs stay allocated until reclaimed in bulk.
unsafe impl<U: MemoryResource> MemoryResource for PoolResource<U> {
    fn allocate(&mut self, size: Bytes, alignment: Alignment) -> RwByteSpan {
        let Some(size) = requested_size(size) else {
            return RwByteSpan::empty();
        };

        if size > self.block_size || alignment > self.alignment {
            return RwByteSpan::empty();
        }

        let block = match self.pop_free().or_else(|| self.carve()) {
            Some(block) => block,
            None => {
                if !self.push_slab() {
                    return RwByteSpan::empty();
                }

                let Some(block) = self.carve() else {
                    return RwByteSpan::empty();
                };

                block
            }
        };

        RwByteSpan::from_raw_parts(block, size)
    }

    unsafe fn deallocate(&mut self, block: RwByteSpan, _alignment: Alignment) {
        check_ownership(self, block);

        if block.is_empty() {
            return;
        }

        let node = block.start().cast::<FreeBlock>();

        // SAFETY: The caller returns the block, which is aligned for and large enough to hold a
        // free-list node.
        unsafe {
            node.write(FreeBlock {
                next: self.free_list,
            });
        }

        self.free_list = NonNull::new(node);
        self.free_block_count += 1;
    }

    fn owns(&self, block: ByteSpan) -> Option<bool> {
        let mut current = self.slabs;

        while let Some(slab) = current {
            // SAFETY: The header was written by `push_slab()` and the slab is still held.
            let slab = unsafe { slab.as_ref() };

            let (_, blocks) = slab.span.split_at(Bytes::from_usize(size_of::<Slab>()));
            if blocks.contains(block) {
                return Some(true);
            }

            current = slab.previous;
        }

        Some(false)
    }
}

impl<U: MemoryResource> BulkResource for PoolResource<U> {
    fn deallocate_all(&mut self) {
        while let Some(slab) = self.slabs {
            // SAFETY: The header was written by `push_slab()` and the slab is still held.
            let Slab { previous, span } = unsafe { slab.read() };

            // SAFETY: The span came from the underlying resource with this alignment and none
            // of its blocks are used any more.
            unsafe {
                self.underlying.deallocate(span, SLAB_ALIGNMENT);
            }

            self.slabs = previous;
        }

        self.uncarved = RwByteSpan::empty();
        self.free_list = None;
        self.slab_count = 0;
        self.free_block_count = 0;
    }
}

impl<U: MemoryResource> Drop for PoolResource<U> {
    fn drop(&mut self) {
        self.deallocate_all();
    }
}

impl<U: MemoryResource + fmt::Debug> fmt::Debug for PoolResource<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolResource")
            .field("underlying", &self.underlying)
            .field("block_size", &self.block_size())
            .field("alignment", &self.alignment)
            .field("stride", &self.stride)
            .field("block_alignment", &self.block_alignment)
            .field("slab_size", &self.slab_size())
            .field("min_slab_size", &self.min_slab_size)
            .field("slabs", &self.slabs)
            .field("uncarved", &self.uncarved)
            .field("free_list", &self.free_list)
            .field("slab_count", &self.slab_count)
            .field("free_block_count", &self.free_block_count)
            .finish()
    }
}

// SAFETY: The slab chain and free list only point into slabs owned by this pool. Moving the pool
// to another thread moves the underlying resource along, which must permit that.
unsafe impl<U: MemoryResource + Send> Send for PoolResource<U> {}
// SAFETY: Shared references only read the slab chain.
unsafe impl<U: MemoryResource + Sync> Sync for PoolResource<U> {}
