//! The core of the file system: block allocation, the inode cache, the
//! content map, directories and path resolution, layered over the
//! collaborators in the `ruxfs_api` crate.
//!
//! Start reading at [`fs::FileSystem`], which owns the collaborators and
//! carries one module's worth of operations per core component. The modules
//! are declared here in dependency order, leaves first.

#![deny(missing_docs)]

pub mod error;

pub mod alloc;
pub mod content;
pub mod dir;
pub mod icache;
pub mod path;

pub mod fs;

pub use fs::FileSystem;
pub use icache::{InodeGuard, InodeHandle};
