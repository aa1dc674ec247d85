//! The buffer cache: exclusive, scoped access to disk blocks.
//!
//! [`BufferCache::acquire`] hands out a [`BlockGuard`] for one block of one
//! attached device. While a guard is alive its holder is the only party that
//! can see or touch that block; a second `acquire` for the same block parks
//! the caller on a condition variable until the guard is dropped. Dropping
//! the guard puts the (possibly modified) block image back into the cache
//! slot and wakes one waiter, so the block is released on every exit path.
//!
//! Modified blocks are *not* written back to the device by the cache. The
//! cached image is the authoritative copy for subsequent readers; getting a
//! mutation onto the disk itself is the journal's job (see
//! [`journal`](../journal/index.html)), which calls back into
//! [`write_through`](struct.BufferCache.html#method.write_through) at commit
//! time.
//!
//! There is no eviction: every block touched stays resident until its device
//! is detached. The eviction policy of a real buffer cache is outside the
//! scope of this crate.
//!
//! A thread must never hold two guards for the same block; the second
//! acquisition would wait on the first forever.

use super::controller::Device;
use super::error::{ApiError, Result};
use super::types::{Block, DeviceId};
use log::trace;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};

struct BufSlot {
    /// `None` while a guard owns the block image
    held: Mutex<Option<Block>>,
    freed: Condvar,
}

/// Cache of disk blocks for any number of attached devices.
pub struct BufferCache {
    devices: RwLock<HashMap<DeviceId, Mutex<Device>>>,
    slots: Mutex<HashMap<(DeviceId, u64), Arc<BufSlot>>>,
    next_dev: AtomicU32,
}

impl BufferCache {
    /// An empty cache with no attached devices
    pub fn new() -> BufferCache {
        BufferCache {
            devices: RwLock::new(HashMap::new()),
            slots: Mutex::new(HashMap::new()),
            next_dev: AtomicU32::new(0),
        }
    }

    /// Attach a device and return the id under which its blocks can be
    /// acquired from now on
    pub fn attach(&self, device: Device) -> Result<DeviceId> {
        let id = DeviceId(self.next_dev.fetch_add(1, Ordering::SeqCst));
        let mut devices = self
            .devices
            .write()
            .map_err(|_| ApiError::Poisoned("buffer cache device table"))?;
        devices.insert(id, Mutex::new(device));
        trace!("buffer cache: attached device {}", id);
        Ok(id)
    }

    /// Detach a device, dropping all of its cached blocks, and hand it back.
    /// Cached images that were never committed through the journal are lost.
    pub fn detach(&self, dev: DeviceId) -> Result<Device> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| ApiError::Poisoned("buffer cache slot table"))?;
        slots.retain(|(d, _), _| *d != dev);
        drop(slots);
        let mut devices = self
            .devices
            .write()
            .map_err(|_| ApiError::Poisoned("buffer cache device table"))?;
        let device = devices.remove(&dev).ok_or(ApiError::UnknownDevice(dev.0))?;
        device
            .into_inner()
            .map_err(|_| ApiError::Poisoned("detached device"))
    }

    /// Acquire exclusive access to block `block_no` of device `dev`,
    /// reading it from the device on first touch. Blocks until any current
    /// holder of the same block lets go.
    pub fn acquire(&self, dev: DeviceId, block_no: u64) -> Result<BlockGuard> {
        let slot = {
            let mut slots = self
                .slots
                .lock()
                .map_err(|_| ApiError::Poisoned("buffer cache slot table"))?;
            match slots.get(&(dev, block_no)) {
                Some(slot) => Arc::clone(slot),
                None => {
                    // Miss: fault the block in from the device. Done under
                    // the table lock so two racing misses cannot create two
                    // slots for one block.
                    let devices = self
                        .devices
                        .read()
                        .map_err(|_| ApiError::Poisoned("buffer cache device table"))?;
                    let device = devices.get(&dev).ok_or(ApiError::UnknownDevice(dev.0))?;
                    let block = device
                        .lock()
                        .map_err(|_| ApiError::Poisoned("attached device"))?
                        .read_block(block_no)?;
                    trace!("buffer cache: miss on ({}, {})", dev, block_no);
                    let slot = Arc::new(BufSlot {
                        held: Mutex::new(Some(block)),
                        freed: Condvar::new(),
                    });
                    slots.insert((dev, block_no), Arc::clone(&slot));
                    slot
                }
            }
        };

        let mut held = slot
            .held
            .lock()
            .map_err(|_| ApiError::Poisoned("buffer cache slot"))?;
        while held.is_none() {
            held = slot
                .freed
                .wait(held)
                .map_err(|_| ApiError::Poisoned("buffer cache slot"))?;
        }
        let block = held.take();
        drop(held);
        Ok(BlockGuard { slot, dev, block })
    }

    /// Write a block image straight to its device, bypassing the slot table.
    /// Used by the journal when committing recorded images.
    pub fn write_through(&self, dev: DeviceId, block: &Block) -> Result<()> {
        let devices = self
            .devices
            .read()
            .map_err(|_| ApiError::Poisoned("buffer cache device table"))?;
        let device = devices.get(&dev).ok_or(ApiError::UnknownDevice(dev.0))?;
        let result = device
            .lock()
            .map_err(|_| ApiError::Poisoned("attached device"))?
            .write_block(block);
        result
    }
}

impl Default for BufferCache {
    fn default() -> BufferCache {
        BufferCache::new()
    }
}

/// Exclusive handle on one cached block.
///
/// Dereferences to [`Block`]; dropping it returns the image to the cache and
/// wakes a waiting acquirer.
///
/// [`Block`]: ../types/struct.Block.html
pub struct BlockGuard {
    slot: Arc<BufSlot>,
    dev: DeviceId,
    block: Option<Block>,
}

impl BlockGuard {
    /// Device this block belongs to
    pub fn device(&self) -> DeviceId {
        self.dev
    }
}

impl Deref for BlockGuard {
    type Target = Block;

    fn deref(&self) -> &Block {
        // The image is only ever absent after drop has run.
        self.block.as_ref().expect("live guard without a block")
    }
}

impl DerefMut for BlockGuard {
    fn deref_mut(&mut self) -> &mut Block {
        self.block.as_mut().expect("live guard without a block")
    }
}

impl Drop for BlockGuard {
    fn drop(&mut self) {
        if let Ok(mut held) = self.slot.held.lock() {
            *held = self.block.take();
            self.slot.freed.notify_one();
        }
    }
}
