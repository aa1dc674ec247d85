//! Error types, one per layer of the file system.
//!
//! Each layer's error wraps the layer below it with a `#[from]` conversion,
//! so a failure deep in the stack travels up through `?` without losing its
//! origin. Two families of variants exist side by side:
//!
//! - *invariant violations*: conditions the on-disk state or the cache
//!   should never produce (double frees, a full inode table, a cached inode
//!   that is free on disk). They surface as distinct typed errors a caller
//!   can log and contain; nothing here halts the process.
//! - *expected operational failures*: missing names, duplicate names,
//!   out-of-range offsets, exhausted resources. Plain results; retrying is
//!   the caller's business.

use ruxfs_api::error::ApiError;
use thiserror::Error;

/// Errors from the block allocator layer
#[derive(Error, Debug)]
pub enum BlockLayerError {
    /// Failure in one of the collaborator layers (cache, journal,
    /// controller)
    #[error("api layer failure: {0}")]
    Api(#[from] ApiError),
    /// Invalid input to the block layer
    #[error("invalid block layer input: {0}")]
    BlockLayerInput(&'static str),
    /// Every bit in the free bit map is set; recoverable, not fatal
    #[error("no free data blocks left on the device")]
    OutOfBlocks,
    /// The bit for this block was already clear. Freeing a free block means
    /// some layer's bookkeeping is wrong, so it is flagged distinctly
    /// instead of silently succeeding.
    #[error("data block {0} is already free")]
    DoubleFree(u64),
}

/// Errors from the inode cache and content map layers
#[derive(Error, Debug)]
pub enum InodeLayerError {
    /// Failure in the block allocator underneath
    #[error("block layer failure: {0}")]
    Block(#[from] BlockLayerError),
    /// Failure in one of the collaborator layers
    #[error("api layer failure: {0}")]
    Api(#[from] ApiError),
    /// Invalid input to the inode layer
    #[error("invalid inode layer input: {0}")]
    InodeLayerInput(&'static str),
    /// Every slot in the inode cache is referenced; recoverable once some
    /// holder lets go
    #[error("inode cache has no free entry")]
    CacheFull,
    /// The allocation scan found no free inode on the device
    #[error("no free inodes left on the device")]
    OutOfInodes,
    /// The logical block index lies beyond what direct plus single- plus
    /// double-indirect addressing can reach
    #[error("logical block {0} is beyond the largest supported file")]
    BlockOutOfRange(u64),
    /// The write would push the file past its maximum size
    #[error("write would exceed the maximum file size")]
    FileTooLarge,
    /// A device inode whose major number has no registered handler
    #[error("no device handler registered for major number {0}")]
    NoDeviceHandler(u16),
    /// A condition the cache and disk state should never produce
    #[error("file system invariant violated: {0}")]
    Invariant(&'static str),
}

/// Errors from the directory layer
#[derive(Error, Debug)]
pub enum DirLayerError {
    /// Failure in the inode layer underneath
    #[error("inode layer failure: {0}")]
    Inode(#[from] InodeLayerError),
    /// Failure in one of the collaborator layers
    #[error("api layer failure: {0}")]
    Api(#[from] ApiError),
    /// Invalid input to the directory layer
    #[error("invalid directory layer input: {0}")]
    DirLayerInput(&'static str),
    /// No entry with the requested name
    #[error("no directory entry with that name")]
    NotFound,
    /// An entry with the requested name already exists
    #[error("directory entry name already present")]
    AlreadyExists,
}

/// Errors from the path resolver
#[derive(Error, Debug)]
pub enum PathLayerError {
    /// Failure in the directory layer underneath
    #[error("directory layer failure: {0}")]
    Dir(#[from] DirLayerError),
    /// Failure in the inode layer underneath
    #[error("inode layer failure: {0}")]
    Inode(#[from] InodeLayerError),
    /// A component on the way to the final name is not a directory
    #[error("path component is not a directory")]
    NotADirectory,
    /// Resolving the parent of a path that never traversed one: a bare
    /// separator, or a single relative component
    #[error("path has no parent directory to resolve")]
    NoParent,
}
