//! The block allocator: bitmap-backed bookkeeping for the data region.
//!
//! One bit per data block, packed LSB-first into the bitmap region.
//! Allocation scans the bitmap from the front and takes the first clear
//! bit, so freed blocks are found again quickly; the freshly claimed block
//! is zeroed before its address is handed out. Both the bitmap mutation and
//! the zeroing travel through the journal.
//!
//! The superblock is deserialized from block 1 at the start of every
//! operation rather than held in the `FileSystem`; block 1 in the buffer
//! cache is the single source of truth for the layout.

use crate::error::BlockLayerError;
use crate::fs::FileSystem;
use bit_field::BitField;
use log::trace;
use ruxfs_api::types::{DeviceId, SuperBlock, SUPERBLOCK_BLOCK};

impl FileSystem {
    /// Read the superblock of `dev`, fresh from the buffer cache
    pub fn readsb(&self, dev: DeviceId) -> Result<SuperBlock, BlockLayerError> {
        let block = self.cache.acquire(dev, SUPERBLOCK_BLOCK)?;
        Ok(block.deserialize_from::<SuperBlock>(0)?)
    }

    /// Allocate a zeroed data block on `dev` and return its absolute block
    /// address.
    ///
    /// Scans the bitmap region byte-wise, loading each bitmap block once
    /// and skipping fully set bytes. Returns
    /// [`OutOfBlocks`](../error/enum.BlockLayerError.html) when every
    /// tracked bit is set.
    pub fn balloc(&self, dev: DeviceId) -> Result<u64, BlockLayerError> {
        let sb = self.readsb(dev)?;
        let bits_per_block = sb.block_size * 8;
        let bmap_blocks = (sb.ndatablocks + bits_per_block - 1) / bits_per_block;

        // Index of the data block the current byte's first bit refers to
        let mut bit: u64 = 0;
        for bl in 0..bmap_blocks {
            let mut bmap = self.cache.acquire(dev, sb.bmapstart + bl)?;
            for by in 0..sb.block_size {
                if bit >= sb.ndatablocks {
                    break;
                }
                let mut byte = [0u8; 1];
                bmap.read_data(&mut byte, by)?;
                if byte[0] == 0xff {
                    bit += 8;
                    continue;
                }
                for i in 0..8u64 {
                    // Trailing bits of a partial byte track nothing; a clear
                    // bit there means the region proper is exhausted.
                    if bit + i >= sb.ndatablocks {
                        return Err(BlockLayerError::OutOfBlocks);
                    }
                    if !byte[0].get_bit(i as usize) {
                        byte[0].set_bit(i as usize, true);
                        bmap.write_data(&byte, by)?;
                        self.journal.record(&bmap)?;
                        drop(bmap);
                        let addr = sb.datastart + bit + i;
                        self.bzero(dev, addr, sb.block_size)?;
                        trace!("balloc: dev {} -> block {}", dev, addr);
                        return Ok(addr);
                    }
                }
            }
        }
        Err(BlockLayerError::OutOfBlocks)
    }

    /// Free the data block at absolute address `addr` on `dev` by clearing
    /// its bit.
    ///
    /// An address outside the data region is rejected as input; a bit that
    /// is already clear is flagged as
    /// [`DoubleFree`](../error/enum.BlockLayerError.html) and the bitmap is
    /// left untouched.
    pub fn bfree(&self, dev: DeviceId, addr: u64) -> Result<(), BlockLayerError> {
        let sb = self.readsb(dev)?;
        if addr < sb.datastart || addr >= sb.datastart + sb.ndatablocks {
            return Err(BlockLayerError::BlockLayerInput(
                "block address outside the data region",
            ));
        }
        let bit = addr - sb.datastart;
        let bits_per_block = sb.block_size * 8;
        let mut bmap = self.cache.acquire(dev, sb.bmapstart + bit / bits_per_block)?;
        let byte_off = (bit % bits_per_block) / 8;
        let bit_in_byte = (bit % 8) as usize;

        let mut byte = [0u8; 1];
        bmap.read_data(&mut byte, byte_off)?;
        if !byte[0].get_bit(bit_in_byte) {
            return Err(BlockLayerError::DoubleFree(addr));
        }
        byte[0].set_bit(bit_in_byte, false);
        bmap.write_data(&byte, byte_off)?;
        self.journal.record(&bmap)?;
        trace!("bfree: dev {} block {}", dev, addr);
        Ok(())
    }

    /// Overwrite the block at `addr` with zeroes, through the journal
    fn bzero(&self, dev: DeviceId, addr: u64, block_size: u64) -> Result<(), BlockLayerError> {
        let mut block = self.cache.acquire(dev, addr)?;
        block.write_data(&vec![0; block_size as usize], 0)?;
        self.journal.record(&block)?;
        Ok(())
    }
}
