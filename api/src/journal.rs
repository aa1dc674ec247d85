//! The write-ahead journal: the only road from a mutated block to the disk.
//!
//! Every layer above the buffer cache mutates blocks in place through a
//! [`BlockGuard`] and then calls [`Journal::record`] to snapshot the image
//! into the pending transaction. [`Journal::commit`] writes the recorded
//! images through to their devices in recording order. Re-recording a block
//! that is already pending replaces the older image, so a block written many
//! times inside one transaction hits the disk once.
//!
//! How mutations are *grouped* into crash-consistent transactions is the
//! caller's concern; this module only guarantees that a recorded image
//! reaches the device atomically and in order at commit time. A mutation
//! that is never recorded never leaves the buffer cache.
//!
//! [`BlockGuard`]: ../cache/struct.BlockGuard.html

use super::cache::{BlockGuard, BufferCache};
use super::error::{ApiError, Result};
use super::types::{Block, DeviceId};
use log::{debug, trace};
use std::sync::{Arc, Mutex};

struct Recorded {
    dev: DeviceId,
    block_no: u64,
    image: Box<[u8]>,
}

/// Write-ahead log over a [`BufferCache`].
///
/// [`BufferCache`]: ../cache/struct.BufferCache.html
pub struct Journal {
    cache: Arc<BufferCache>,
    pending: Mutex<Vec<Recorded>>,
}

impl Journal {
    /// A journal committing through the given cache
    pub fn new(cache: Arc<BufferCache>) -> Journal {
        Journal {
            cache,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot the guard's current block image into the pending
    /// transaction. Absorbs an earlier record of the same block.
    pub fn record(&self, guard: &BlockGuard) -> Result<()> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| ApiError::Poisoned("journal transaction"))?;
        let dev = guard.device();
        let block_no = guard.block_no;
        let image: Box<[u8]> = guard.contents_as_ref().into();
        if let Some(prior) = pending
            .iter_mut()
            .find(|r| r.dev == dev && r.block_no == block_no)
        {
            trace!("journal: absorbing ({}, {})", dev, block_no);
            prior.image = image;
        } else {
            pending.push(Recorded {
                dev,
                block_no,
                image,
            });
        }
        Ok(())
    }

    /// Write every recorded image to its device, in recording order, and
    /// clear the transaction
    pub fn commit(&self) -> Result<()> {
        let drained: Vec<Recorded> = {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| ApiError::Poisoned("journal transaction"))?;
            pending.drain(..).collect()
        };
        debug!("journal: committing {} block(s)", drained.len());
        for r in drained {
            self.cache
                .write_through(r.dev, &Block::new(r.block_no, r.image))?;
        }
        Ok(())
    }

    /// Number of block images waiting in the pending transaction
    pub fn pending(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Device;
    use std::fs::{create_dir_all, remove_dir, remove_file};
    use std::path::PathBuf;

    static BLOCK_SIZE: u64 = 32;
    static NBLOCKS: u64 = 4;

    fn image_path(name: &str) -> PathBuf {
        let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("images-journal-".to_string() + name);
        path.push("img");
        if path.exists() {
            remove_file(&path).unwrap();
        }
        create_dir_all(path.parent().unwrap()).unwrap();
        path
    }

    #[test]
    fn commit_persists_and_absorption_coalesces() {
        let path = image_path("commit");
        let cache = Arc::new(BufferCache::new());
        let dev = cache
            .attach(Device::new(&path, BLOCK_SIZE, NBLOCKS).unwrap())
            .unwrap();
        let journal = Journal::new(Arc::clone(&cache));

        {
            let mut b = cache.acquire(dev, 3).unwrap();
            b.write_data(&[1], 0).unwrap();
            journal.record(&b).unwrap();
            b.write_data(&[2], 0).unwrap();
            journal.record(&b).unwrap();
        }
        // Two records of one block were absorbed into one pending image
        assert_eq!(journal.pending(), 1);

        journal.commit().unwrap();
        assert_eq!(journal.pending(), 0);

        let device = cache.detach(dev).unwrap();
        let mut seen = [0u8; 1];
        device.read_block(3).unwrap().read_data(&mut seen, 0).unwrap();
        assert_eq!(seen, [2]);

        let p = device.device_path().to_owned();
        device.destruct();
        remove_dir(p.parent().unwrap()).unwrap();
    }

    #[test]
    fn unrecorded_mutations_stay_in_the_cache() {
        let path = image_path("volatile");
        let cache = Arc::new(BufferCache::new());
        let dev = cache
            .attach(Device::new(&path, BLOCK_SIZE, NBLOCKS).unwrap())
            .unwrap();
        let journal = Journal::new(Arc::clone(&cache));

        {
            let mut b = cache.acquire(dev, 1).unwrap();
            b.write_data(&[9], 0).unwrap();
        }
        journal.commit().unwrap();

        let device = cache.detach(dev).unwrap();
        assert_eq!(
            device.read_block(1).unwrap(),
            crate::types::Block::new_zero(1, BLOCK_SIZE)
        );
        let p = device.device_path().to_owned();
        device.destruct();
        remove_dir(p.parent().unwrap()).unwrap();
    }
}
