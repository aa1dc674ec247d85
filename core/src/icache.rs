//! The inode cache: a fixed-size arena of in-memory inodes with reference
//! counting and per-entry exclusive locking.
//!
//! Every cached inode moves through the same states:
//!
//! * *Free*: reference count 0. The slot can be claimed by any fetch.
//! * *Allocated, invalid*: claimed for an identity `(device, inum)` but the
//!   on-disk inode has not been read yet. Nothing in the entry besides the
//!   identity may be trusted.
//! * *Valid, unlocked*: content has been read once since the claim.
//! * *Valid, locked*: one holder owns the content exclusively through an
//!   [`InodeGuard`].
//!
//! Identity changes (claiming a slot, reference counts) are serialized by
//! the one table-wide mutex, so concurrent [`iget`]s for the same identity
//! always converge on a single slot. Content exclusivity is the per-slot
//! busy flag layered above that mutex: [`ilock`] parks the caller on a
//! condition variable while the flag is set, and distinct inodes can be
//! locked concurrently.
//!
//! A typical sequence, mirroring how the layers above use this module:
//!
//! ```ignore
//! let ino = fs.iget(dev, inum)?;        // long-lived reference
//! let mut guard = fs.ilock(&ino)?;      // short exclusive access
//! /* examine and modify the content through the guard */
//! drop(guard);                          // unlock, wake waiters
//! fs.iput(ino)?;                        // drop the reference
//! ```
//!
//! Fetching and locking are split so a holder can keep an inode cached
//! across many operations (an open file, a current directory) without
//! starving everyone else. The guard borrows the handle it was created
//! from, which makes releasing a locked inode a compile-time error rather
//! than a runtime one.
//!
//! [`iget`]: ../fs/struct.FileSystem.html#method.iget
//! [`ilock`]: ../fs/struct.FileSystem.html#method.ilock

use crate::error::InodeLayerError;
use crate::fs::FileSystem;
use log::{debug, trace};
use ruxfs_api::types::{DInode, DeviceId, FType, DINODE_SIZE};
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub(crate) struct Slot {
    /// Identity this slot currently caches; stale once `refs` drops to 0
    ident: Option<(DeviceId, u64)>,
    refs: u64,
    valid: bool,
    busy: bool,
    node: DInode,
}

/// The arena behind a [`FileSystem`]'s inode handling.
///
/// [`FileSystem`]: ../fs/struct.FileSystem.html
pub(crate) struct InodeCache {
    slots: Mutex<Vec<Slot>>,
    /// Signaled whenever a busy flag is cleared
    released: Condvar,
}

impl InodeCache {
    pub(crate) fn new(entries: usize) -> InodeCache {
        let mut slots = Vec::with_capacity(entries);
        slots.resize_with(entries, Slot::default);
        InodeCache {
            slots: Mutex::new(slots),
            released: Condvar::new(),
        }
    }
}

/// A counted reference to one cached inode.
///
/// Obtained from [`iget`], [`ialloc`] or [`idup`]; must be given back with
/// [`iput`]. Handles are deliberately not `Clone`; a second long-lived
/// reference has to go through `idup` so the cache can count it.
///
/// [`iget`]: ../fs/struct.FileSystem.html#method.iget
/// [`ialloc`]: ../fs/struct.FileSystem.html#method.ialloc
/// [`idup`]: ../fs/struct.FileSystem.html#method.idup
/// [`iput`]: ../fs/struct.FileSystem.html#method.iput
#[derive(Debug)]
pub struct InodeHandle {
    pub(crate) slot: usize,
    dev: DeviceId,
    inum: u64,
}

impl InodeHandle {
    /// Device this inode lives on
    pub fn dev(&self) -> DeviceId {
        self.dev
    }

    /// This inode's number on its device
    pub fn inum(&self) -> u64 {
        self.inum
    }

    /// Index of the cache slot backing this handle. Diagnostic only: two
    /// live handles for one identity always report the same slot.
    pub fn slot_id(&self) -> usize {
        self.slot
    }
}

/// Exclusive access to a cached inode's content.
///
/// Created by [`ilock`]; dereferences to the cached [`DInode`]. Dropping
/// the guard writes the (possibly modified) content back into the cache
/// slot, clears the busy flag and wakes waiters, which is the in-memory
/// unlock.
/// Getting content onto the *disk* is separate: call
/// [`iupdate`](../fs/struct.FileSystem.html#method.iupdate).
///
/// [`ilock`]: ../fs/struct.FileSystem.html#method.ilock
/// [`DInode`]: ../../ruxfs_api/types/struct.DInode.html
pub struct InodeGuard<'a> {
    fs: &'a FileSystem,
    handle: &'a InodeHandle,
    node: DInode,
}

impl<'a> InodeGuard<'a> {
    /// Device of the locked inode
    pub fn dev(&self) -> DeviceId {
        self.handle.dev
    }

    /// Number of the locked inode
    pub fn inum(&self) -> u64 {
        self.handle.inum
    }
}

impl<'a> Deref for InodeGuard<'a> {
    type Target = DInode;

    fn deref(&self) -> &DInode {
        &self.node
    }
}

impl<'a> DerefMut for InodeGuard<'a> {
    fn deref_mut(&mut self) -> &mut DInode {
        &mut self.node
    }
}

impl<'a> Drop for InodeGuard<'a> {
    fn drop(&mut self) {
        if let Ok(mut slots) = self.fs.icache.slots.lock() {
            let s = &mut slots[self.handle.slot];
            s.node = self.node;
            s.valid = true;
            s.busy = false;
            drop(slots);
            self.fs.icache.released.notify_all();
        }
    }
}

impl FileSystem {
    fn slots(&self) -> Result<MutexGuard<'_, Vec<Slot>>, InodeLayerError> {
        self.icache
            .slots
            .lock()
            .map_err(|_| InodeLayerError::Invariant("inode table lock poisoned"))
    }

    /// Fetch a counted reference to inode `inum` on `dev`.
    ///
    /// Returns the slot already caching this identity if there is one,
    /// otherwise claims the first slot with no references and marks it
    /// invalid. Does not lock the inode and does not touch the disk.
    /// Fails with `CacheFull` when every slot is referenced.
    pub fn iget(&self, dev: DeviceId, inum: u64) -> Result<InodeHandle, InodeLayerError> {
        let mut slots = self.slots()?;
        let mut empty = None;
        for (idx, s) in slots.iter_mut().enumerate() {
            if s.refs > 0 && s.ident == Some((dev, inum)) {
                s.refs += 1;
                return Ok(InodeHandle {
                    slot: idx,
                    dev,
                    inum,
                });
            }
            if empty.is_none() && s.refs == 0 {
                empty = Some(idx);
            }
        }
        // Recycle a free slot; whatever it cached before is discarded.
        let idx = empty.ok_or(InodeLayerError::CacheFull)?;
        let s = &mut slots[idx];
        s.ident = Some((dev, inum));
        s.refs = 1;
        s.valid = false;
        s.busy = false;
        trace!("iget: ({}, {}) -> slot {}", dev, inum, idx);
        Ok(InodeHandle {
            slot: idx,
            dev,
            inum,
        })
    }

    /// Take out a second counted reference to the same inode, without
    /// locking it
    pub fn idup(&self, ino: &InodeHandle) -> Result<InodeHandle, InodeLayerError> {
        let mut slots = self.slots()?;
        slots[ino.slot].refs += 1;
        Ok(InodeHandle {
            slot: ino.slot,
            dev: ino.dev,
            inum: ino.inum,
        })
    }

    /// Lock the inode for exclusive content access, reading it from disk if
    /// this is the first lock since the slot was claimed.
    ///
    /// Suspends on a condition variable while another guard exists; there
    /// is no timeout. Finding a free-typed inode on disk here is an
    /// invariant violation: a referenced identity must point at an
    /// allocated inode.
    pub fn ilock<'a>(&'a self, ino: &'a InodeHandle) -> Result<InodeGuard<'a>, InodeLayerError> {
        let (valid, mut node) = {
            let mut slots = self.slots()?;
            if slots[ino.slot].refs == 0 {
                return Err(InodeLayerError::Invariant("locking an unreferenced inode"));
            }
            while slots[ino.slot].busy {
                slots = self
                    .icache
                    .released
                    .wait(slots)
                    .map_err(|_| InodeLayerError::Invariant("inode table lock poisoned"))?;
            }
            let s = &mut slots[ino.slot];
            s.busy = true;
            (s.valid, s.node)
        };

        if !valid {
            // First lock since the claim: fault the content in, outside the
            // table lock.
            match self.get_dinode(ino.dev, ino.inum) {
                Ok(d) if d.ft == FType::TFree => {
                    self.clear_busy(ino.slot);
                    return Err(InodeLayerError::Invariant(
                        "referenced inode is free on disk",
                    ));
                }
                Ok(d) => node = d,
                Err(e) => {
                    self.clear_busy(ino.slot);
                    return Err(e);
                }
            }
        }
        Ok(InodeGuard {
            fs: self,
            handle: ino,
            node,
        })
    }

    /// Drop a counted reference.
    ///
    /// If this was the last reference to a valid inode with no links left,
    /// the inode is destroyed first: its content is released, its on-disk
    /// record is marked free, and only then does the slot become reusable,
    /// all under the busy flag, so no one can observe a half-destroyed
    /// inode.
    pub fn iput(&self, ino: InodeHandle) -> Result<(), InodeLayerError> {
        let mut node = {
            let mut slots = self.slots()?;
            let s = &mut slots[ino.slot];
            if s.refs == 0 {
                return Err(InodeLayerError::Invariant(
                    "releasing an unreferenced inode",
                ));
            }
            if !(s.refs == 1 && s.valid && s.node.nlink == 0) {
                s.refs -= 1;
                return Ok(());
            }
            if s.busy {
                // refs == 1 means the caller is the only holder, so nobody
                // can legitimately have this locked.
                return Err(InodeLayerError::Invariant("releasing a busy inode"));
            }
            s.busy = true;
            s.node
        };

        debug!(
            "iput: destroying unlinked inode ({}, {})",
            ino.dev, ino.inum
        );
        let res = (|| {
            self.itrunc_raw(ino.dev, ino.inum, &mut node)?;
            node.ft = FType::TFree;
            self.put_dinode(ino.dev, ino.inum, &node)
        })();

        let mut slots = self.slots()?;
        let s = &mut slots[ino.slot];
        s.node = node;
        s.valid = false;
        s.busy = false;
        s.refs -= 1;
        drop(slots);
        self.icache.released.notify_all();
        res
    }

    /// Allocate a fresh inode of type `ft` on `dev` and fetch a reference
    /// to it.
    ///
    /// Scans the inode region for the first free record, loading each
    /// region block once, and claims it through the journal with link
    /// count and size 0. Inode 0 is never handed out.
    pub fn ialloc(&self, dev: DeviceId, ft: FType) -> Result<InodeHandle, InodeLayerError> {
        let sb = self.readsb(dev)?;
        let ipb = sb.block_size / *DINODE_SIZE;
        let inode_blocks = (sb.ninodes + ipb - 1) / ipb;
        for bl in 0..inode_blocks {
            let mut block = self.cache.acquire(dev, sb.inodestart + bl)?;
            for n in 0..ipb {
                let inum = bl * ipb + n;
                if inum >= sb.ninodes {
                    break;
                }
                if inum == 0 {
                    continue;
                }
                let off = n * *DINODE_SIZE;
                if block.deserialize_from::<DInode>(off)?.ft == FType::TFree {
                    let node = DInode {
                        ft,
                        ..DInode::default()
                    };
                    block.serialize_into(&node, off)?;
                    self.journal.record(&block)?;
                    drop(block);
                    debug!("ialloc: dev {} inum {} as {:?}", dev, inum, ft);
                    return self.iget(dev, inum);
                }
            }
        }
        Err(InodeLayerError::OutOfInodes)
    }

    /// Persist the locked inode's in-memory content to its on-disk record,
    /// through the journal
    pub fn iupdate(&self, ino: &InodeGuard<'_>) -> Result<(), InodeLayerError> {
        self.put_dinode(ino.dev(), ino.inum(), &*ino)
    }

    /// Is an inode with this identity currently held in the cache?
    pub fn is_cached(&self, dev: DeviceId, inum: u64) -> bool {
        self.icache
            .slots
            .lock()
            .map(|slots| {
                slots
                    .iter()
                    .any(|s| s.refs > 0 && s.ident == Some((dev, inum)))
            })
            .unwrap_or(false)
    }

    /// Clear a busy flag set by a lock attempt that could not produce a
    /// guard
    fn clear_busy(&self, slot: usize) {
        if let Ok(mut slots) = self.icache.slots.lock() {
            slots[slot].busy = false;
            drop(slots);
            self.icache.released.notify_all();
        }
    }

    /// Read the on-disk record of inode `inum`
    pub(crate) fn get_dinode(&self, dev: DeviceId, inum: u64) -> Result<DInode, InodeLayerError> {
        let (block_no, off) = self.locate_inode(dev, inum)?;
        let block = self.cache.acquire(dev, block_no)?;
        Ok(block.deserialize_from::<DInode>(off)?)
    }

    /// Overwrite the on-disk record of inode `inum`, through the journal
    pub(crate) fn put_dinode(
        &self,
        dev: DeviceId,
        inum: u64,
        node: &DInode,
    ) -> Result<(), InodeLayerError> {
        let (block_no, off) = self.locate_inode(dev, inum)?;
        let mut block = self.cache.acquire(dev, block_no)?;
        block.serialize_into(node, off)?;
        self.journal.record(&block)?;
        Ok(())
    }

    /// Block number and in-block offset of inode `inum`'s record
    fn locate_inode(&self, dev: DeviceId, inum: u64) -> Result<(u64, u64), InodeLayerError> {
        let sb = self.readsb(dev)?;
        if inum >= sb.ninodes {
            return Err(InodeLayerError::InodeLayerInput(
                "inode number out of bounds",
            ));
        }
        let ipb = sb.block_size / *DINODE_SIZE;
        Ok((sb.inodestart + inum / ipb, (inum % ipb) * *DINODE_SIZE))
    }
}
