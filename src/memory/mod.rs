//! Native memory management: the block arena and the in-record spinlock.

/// Aligned, zeroed native blocks
pub mod arena;
/// Lock word embedded in each record
pub mod spinlock;

pub use arena::{ArenaBox, ArenaSnapshot, NativeArena, NativeBlock, Zeroable};
pub use spinlock::{run_exclusive, try_run_exclusive, ExclusiveGuard};
