//! The file system itself: construction, mounting, and teardown.
//!
//! A [`FileSystem`] owns its collaborators (buffer cache, journal, inode
//! cache and device table) and exposes the five core layers as methods,
//! one module per layer:
//!
//! - block allocation in [`alloc`](../alloc/index.html)
//! - the inode cache in [`icache`](../icache/index.html)
//! - the content map in [`content`](../content/index.html)
//! - directories in [`dir`](../dir/index.html)
//! - path resolution in [`path`](../path/index.html)
//!
//! All methods take `&self`; the interior locks of the collaborators carry
//! the synchronization, so a `FileSystem` can be shared between threads
//! behind an `Arc`.

use crate::error::InodeLayerError;
use crate::icache::InodeCache;
use log::{debug, warn};
use ruxfs_api::cache::BufferCache;
use ruxfs_api::controller::Device;
use ruxfs_api::devtable::{CharDevice, DeviceTable};
use ruxfs_api::journal::Journal;
use ruxfs_api::types::{
    DInode, DeviceId, FType, SuperBlock, DINODE_SIZE, ROOT_INUM, SUPERBLOCK_BLOCK,
};
use std::path::Path;
use std::sync::Arc;

/// Inode cache capacity used by [`FileSystem::mkfs`] and
/// [`FileSystem::mountfs`]
pub const DEFAULT_CACHE_ENTRIES: usize = 50;

/// A mounted file system on a single device.
pub struct FileSystem {
    pub(crate) cache: Arc<BufferCache>,
    pub(crate) journal: Journal,
    pub(crate) icache: InodeCache,
    pub(crate) devtable: DeviceTable,
    root_dev: DeviceId,
}

impl FileSystem {
    /// Check whether `sb` describes a layout this code can run on: regions
    /// in order behind the reserved block and the superblock, each large
    /// enough for what it must hold, all of it inside `nblocks`.
    pub fn sb_valid(sb: &SuperBlock) -> bool {
        if sb.block_size < *DINODE_SIZE {
            // An inode must fit inside a single block
            return false;
        }
        let ipb = sb.block_size / *DINODE_SIZE;
        let inode_blocks = (sb.ninodes + ipb - 1) / ipb;
        let bits_per_block = sb.block_size * 8;
        let bmap_blocks = (sb.ndatablocks + bits_per_block - 1) / bits_per_block;
        sb.inodestart > SUPERBLOCK_BLOCK
            && sb.inodestart + inode_blocks <= sb.bmapstart
            && sb.bmapstart + bmap_blocks <= sb.datastart
            && sb.datastart + sb.ndatablocks <= sb.nblocks
    }

    /// Create a fresh file system image at `path` and mount it, with the
    /// default inode cache capacity.
    pub fn mkfs<P: AsRef<Path>>(path: P, sb: &SuperBlock) -> Result<Self, InodeLayerError> {
        Self::mkfs_with_cache(path, sb, DEFAULT_CACHE_ENTRIES)
    }

    /// Create a fresh file system image at `path` and mount it.
    ///
    /// Writes the superblock into block 1, marks every inode in the inode
    /// region free (loading each region block exactly once), installs the
    /// root directory (inode [`ROOT_INUM`], type directory, link count 1,
    /// no entries) and commits the journal so the image on disk is
    /// complete before this returns.
    pub fn mkfs_with_cache<P: AsRef<Path>>(
        path: P,
        sb: &SuperBlock,
        cache_entries: usize,
    ) -> Result<Self, InodeLayerError> {
        if !Self::sb_valid(sb) {
            return Err(InodeLayerError::InodeLayerInput(
                "superblock does not describe a valid file system",
            ));
        }
        let device = Device::new(path, sb.block_size, sb.nblocks)?;
        let fs = Self::assemble(device, cache_entries)?;

        // Superblock first, then the inode region, then the root.
        {
            let mut block = fs.cache.acquire(fs.root_dev, SUPERBLOCK_BLOCK)?;
            block.serialize_into(sb, 0)?;
            fs.journal.record(&block)?;
        }
        let ipb = sb.block_size / *DINODE_SIZE;
        let inode_blocks = (sb.ninodes + ipb - 1) / ipb;
        let free = DInode::default();
        for bl in 0..inode_blocks {
            let mut block = fs.cache.acquire(fs.root_dev, sb.inodestart + bl)?;
            for n in 0..ipb {
                if bl * ipb + n >= sb.ninodes {
                    break;
                }
                block.serialize_into(&free, n * *DINODE_SIZE)?;
            }
            fs.journal.record(&block)?;
        }
        let root = DInode {
            ft: FType::TDir,
            nlink: 1,
            ..DInode::default()
        };
        fs.put_dinode(fs.root_dev, ROOT_INUM, &root)?;
        fs.journal.commit()?;
        debug!(
            "mkfs: {} blocks of {} bytes, {} inodes",
            sb.nblocks, sb.block_size, sb.ninodes
        );
        Ok(fs)
    }

    /// Mount an existing device with the default inode cache capacity.
    pub fn mountfs(dev: Device) -> Result<Self, InodeLayerError> {
        Self::mountfs_with_cache(dev, DEFAULT_CACHE_ENTRIES)
    }

    /// Mount an existing device: read the superblock out of block 1, check
    /// that it is valid and agrees with the device geometry, and wrap the
    /// device. The regions themselves are trusted to be well-formed.
    pub fn mountfs_with_cache(dev: Device, cache_entries: usize) -> Result<Self, InodeLayerError> {
        let sb = dev
            .read_block(SUPERBLOCK_BLOCK)
            .and_then(|b| b.deserialize_from::<SuperBlock>(0))?;
        if !Self::sb_valid(&sb) {
            return Err(InodeLayerError::InodeLayerInput(
                "superblock does not describe a valid file system",
            ));
        }
        if sb.block_size != dev.block_size || sb.nblocks != dev.nblocks {
            return Err(InodeLayerError::InodeLayerInput(
                "superblock disagrees with the device geometry",
            ));
        }
        Self::assemble(dev, cache_entries)
    }

    fn assemble(device: Device, cache_entries: usize) -> Result<Self, InodeLayerError> {
        let cache = Arc::new(BufferCache::new());
        let root_dev = cache.attach(device)?;
        let journal = Journal::new(Arc::clone(&cache));
        Ok(FileSystem {
            cache,
            journal,
            icache: InodeCache::new(cache_entries),
            devtable: DeviceTable::new(),
            root_dev,
        })
    }

    /// Unmount the file system, committing any outstanding journal records,
    /// and hand back the device image.
    pub fn unmountfs(self) -> Device {
        if let Err(e) = self.journal.commit() {
            warn!("journal commit during unmount failed: {}", e);
        }
        let FileSystem {
            cache,
            journal,
            root_dev,
            ..
        } = self;
        drop(journal);
        // The journal held the only other reference to the cache, so the
        // root device is still attached and detaching cannot fail.
        cache.detach(root_dev).expect("root device is attached")
    }

    /// Install a handler for device inodes with the given major number
    pub fn register_device(&self, major: u16, handler: Arc<dyn CharDevice>) {
        self.devtable.register(major, handler);
    }

    /// The device this file system was mounted from; absolute paths resolve
    /// against its root inode
    pub fn root_dev(&self) -> DeviceId {
        self.root_dev
    }
}
