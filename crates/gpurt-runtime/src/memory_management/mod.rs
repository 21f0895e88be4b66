mod base;
pub use base::*;

mod residency;
pub use residency::*;

mod heap_pool;
pub use heap_pool::*;

#[cfg(feature = "allocator-bytes")]
mod bytes;
#[cfg(feature = "allocator-bytes")]
pub use bytes::*;

/// Smallest unit of memory the kernel-mode driver pages in and out.
pub const PAGE_SIZE: u64 = 4096;

/// Cache line size used to place GPU-written records on distinct lines.
pub const CACHE_LINE_SIZE: u64 = 64;

/// Upper bound on hardware engine contexts tracked per allocation.
///
/// Sized once at compile time so that per-allocation bookkeeping never
/// allocates or resizes concurrently with readers.
pub const MAX_OS_CONTEXT_COUNT: usize = 32;
