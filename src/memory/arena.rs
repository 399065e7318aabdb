//! Native memory arena for aggregator and EWMA records.
//!
//! Every record lives in its own aligned, zero-initialized block taken
//! straight from the global allocator, so per-metric state never sits on
//! the Rust heap next to unrelated objects and is released exactly once
//! when its owning handle is dropped.
//!
//! All `unsafe` pointer work for the engine is confined to this file.
//! Upper layers see [`ArenaBox<T>`], which hands out `&T` only; records
//! are built entirely from atomics so shared access is sufficient.

use crate::core::config::MemoryConfig;
use crate::core::{Result, TsaggError};
use serde::Serialize;
use std::alloc::{self, Layout};
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Marker for record types whose all-zero bit pattern is a valid value.
///
/// # Safety
///
/// Implementors must be valid when every byte is zero and must not own
/// heap resources (the arena never runs constructors).
pub unsafe trait Zeroable: Sized {}

/// Allocation counters, only maintained when tracking is enabled.
#[derive(Debug, Default)]
pub struct ArenaStats {
    outstanding_bytes: AtomicUsize,
    outstanding_blocks: AtomicUsize,
    peak_bytes: AtomicUsize,
    total_allocations: AtomicU64,
}

impl ArenaStats {
    fn record_allocation(&self, size: usize) {
        self.total_allocations.fetch_add(1, Ordering::Relaxed);
        self.outstanding_blocks.fetch_add(1, Ordering::Relaxed);
        let current = self.outstanding_bytes.fetch_add(size, Ordering::Relaxed) + size;
        self.peak_bytes.fetch_max(current, Ordering::Relaxed);
    }

    fn record_release(&self, size: usize) {
        self.outstanding_blocks.fetch_sub(1, Ordering::Relaxed);
        self.outstanding_bytes.fetch_sub(size, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ArenaSnapshot {
        ArenaSnapshot {
            outstanding_bytes: self.outstanding_bytes.load(Ordering::Relaxed),
            outstanding_blocks: self.outstanding_blocks.load(Ordering::Relaxed),
            peak_bytes: self.peak_bytes.load(Ordering::Relaxed),
            total_allocations: self.total_allocations.load(Ordering::Relaxed),
        }
    }
}

/// Copy of the arena counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArenaSnapshot {
    /// Bytes currently allocated
    pub outstanding_bytes: usize,
    /// Blocks currently allocated
    pub outstanding_blocks: usize,
    /// High-water mark of outstanding bytes
    pub peak_bytes: usize,
    /// Blocks ever allocated
    pub total_allocations: u64,
}

/// Allocator of aligned, zeroed native blocks.
#[derive(Clone)]
pub struct NativeArena {
    alignment: usize,
    stats: Option<Arc<ArenaStats>>,
}

impl NativeArena {
    /// Create an arena from the memory configuration
    pub fn new(config: &MemoryConfig) -> Result<Self> {
        if !config.alignment.is_power_of_two() {
            return Err(TsaggError::config(format!(
                "memory.alignment must be a power of two, got {}",
                config.alignment
            )));
        }

        Ok(Self {
            alignment: config.alignment,
            stats: config.tracking.then(|| Arc::new(ArenaStats::default())),
        })
    }

    /// Allocate `size` zeroed bytes aligned to the configured alignment.
    ///
    /// Either the whole block is returned or nothing is allocated.
    pub fn allocate(&self, size: usize) -> Result<NativeBlock> {
        self.allocate_aligned(size, self.alignment)
    }

    /// Return a block to the allocator.
    ///
    /// Equivalent to dropping it; ownership makes a double release impossible.
    pub fn release(&self, block: NativeBlock) {
        drop(block);
    }

    /// Allocate a zero-initialized record of type `T`.
    pub fn alloc_record<T: Zeroable>(&self) -> Result<ArenaBox<T>> {
        let align = self.alignment.max(std::mem::align_of::<T>());
        let block = self.allocate_aligned(std::mem::size_of::<T>(), align)?;
        Ok(ArenaBox {
            block,
            _marker: PhantomData,
        })
    }

    /// Outstanding allocation totals, `None` when tracking is off
    pub fn snapshot(&self) -> Option<ArenaSnapshot> {
        self.stats.as_ref().map(|stats| stats.snapshot())
    }

    /// Whether allocation counters are kept
    pub fn is_tracking(&self) -> bool {
        self.stats.is_some()
    }

    /// Minimum block alignment
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    fn allocate_aligned(&self, size: usize, align: usize) -> Result<NativeBlock> {
        if size == 0 {
            return Err(TsaggError::invalid_argument("cannot allocate a zero-sized block"));
        }
        let layout = Layout::from_size_align(size, align)
            .map_err(|_| TsaggError::OutOfMemory { requested: size })?;

        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(TsaggError::OutOfMemory { requested: size })?;

        if let Some(stats) = &self.stats {
            stats.record_allocation(layout.size());
        }

        Ok(NativeBlock {
            ptr,
            layout,
            stats: self.stats.as_ref().map(Arc::clone),
        })
    }
}

impl fmt::Debug for NativeArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeArena")
            .field("alignment", &self.alignment)
            .field("tracking", &self.is_tracking())
            .finish()
    }
}

/// An owned native block, released on drop.
pub struct NativeBlock {
    ptr: NonNull<u8>,
    layout: Layout,
    stats: Option<Arc<ArenaStats>>,
}

impl NativeBlock {
    /// Start address of the block
    #[inline]
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Raw start pointer
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Block size in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Always false for allocated blocks
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    /// Block alignment
    #[inline]
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    /// Read the block contents.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: the block is `len` initialized (zeroed) bytes owned by self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for NativeBlock {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc_zeroed with this exact layout and
        // ownership guarantees this runs once.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
        if let Some(stats) = &self.stats {
            stats.record_release(self.layout.size());
        }
    }
}

// SAFETY: the block is uniquely owned raw memory with no thread affinity.
unsafe impl Send for NativeBlock {}
// SAFETY: shared access only hands out `&[u8]`.
unsafe impl Sync for NativeBlock {}

/// Typed handle to a record living in a native block.
pub struct ArenaBox<T: Zeroable> {
    block: NativeBlock,
    _marker: PhantomData<T>,
}

impl<T: Zeroable> ArenaBox<T> {
    /// Address of the backing block; stable for the lifetime of the handle.
    #[inline]
    pub fn addr(&self) -> usize {
        self.block.addr()
    }

    /// Size of the backing block in bytes
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block.len()
    }
}

impl<T: Zeroable> Deref for ArenaBox<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the block is sized and aligned for T, zeroed at allocation
        // (valid per Zeroable) and outlives the returned borrow.
        unsafe { &*self.block.as_ptr().cast::<T>() }
    }
}

impl<T: Zeroable> Drop for ArenaBox<T> {
    fn drop(&mut self) {
        // SAFETY: the record was never moved out and is dropped once, before
        // the block itself is released.
        unsafe { std::ptr::drop_in_place(self.block.as_ptr().cast::<T>().cast_mut()) };
    }
}

// SAFETY: ArenaBox owns its T exactly like Box<T>.
unsafe impl<T: Zeroable + Send> Send for ArenaBox<T> {}
// SAFETY: only `&T` is ever handed out.
unsafe impl<T: Zeroable + Sync> Sync for ArenaBox<T> {}
