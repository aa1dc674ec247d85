//! The content map: from a file's logical block index to a physical block,
//! and the byte-granular reads and writes built on top of it.
//!
//! An inode addresses its content in three tiers. With S entries per lookup
//! table (block size / 8):
//!
//! * logical blocks `[0, 12)` sit in the inode's direct slots;
//! * the next S go through the single-indirect table;
//! * the next S² go through the double-indirect table's two levels.
//!
//! [`bmap`] resolves an index across the tiers and allocates whatever is
//! missing on the way: the target block, and any table that was not there
//! yet. Each newly written slot is persisted (the inode through
//! [`iupdate`], a table block through the journal) before allocation goes
//! a level deeper. Traversal is plain nested lookups over fixed tables;
//! nothing recurses.
//!
//! [`bmap`]: ../fs/struct.FileSystem.html#method.bmap
//! [`iupdate`]: ../fs/struct.FileSystem.html#method.iupdate

use crate::error::InodeLayerError;
use crate::fs::FileSystem;
use crate::icache::InodeGuard;
use log::trace;
use ruxfs_api::types::{
    Buffer, DInode, DeviceId, FType, Stat, ADDR_ENTRY_SIZE, DIRECT_POINTERS,
    DOUBLE_INDIRECT_SLOT, SINGLE_INDIRECT_SLOT,
};

impl FileSystem {
    /// Resolve logical block `bn` of the locked inode to a physical block
    /// address, allocating the block (and any missing lookup tables) on the
    /// way.
    ///
    /// An index beyond the double-indirect tier is an expected
    /// `BlockOutOfRange` error.
    pub fn bmap(&self, ino: &mut InodeGuard<'_>, bn: u64) -> Result<u64, InodeLayerError> {
        let dev = ino.dev();
        let sb = self.readsb(dev)?;
        let single = sb.block_size / ADDR_ENTRY_SIZE;

        if bn < DIRECT_POINTERS {
            let mut addr = ino.addrs[bn as usize];
            if addr == 0 {
                addr = self.balloc(dev)?;
                ino.addrs[bn as usize] = addr;
                self.iupdate(ino)?;
            }
            return Ok(addr);
        }

        let off = bn - DIRECT_POINTERS;
        if off < single {
            let table = self.inode_slot_or_alloc(ino, SINGLE_INDIRECT_SLOT)?;
            return self.table_entry_or_alloc(dev, table, off);
        }

        let off = off - single;
        if off < single * single {
            let level1 = self.inode_slot_or_alloc(ino, DOUBLE_INDIRECT_SLOT)?;
            let level2 = self.table_entry_or_alloc(dev, level1, off / single)?;
            return self.table_entry_or_alloc(dev, level2, off % single);
        }

        Err(InodeLayerError::BlockOutOfRange(bn))
    }

    /// The address in one of the inode's own indirect slots, allocating the
    /// table and persisting the inode if the slot was empty
    fn inode_slot_or_alloc(
        &self,
        ino: &mut InodeGuard<'_>,
        slot: usize,
    ) -> Result<u64, InodeLayerError> {
        let mut addr = ino.addrs[slot];
        if addr == 0 {
            addr = self.balloc(ino.dev())?;
            ino.addrs[slot] = addr;
            self.iupdate(ino)?;
        }
        Ok(addr)
    }

    /// The address at index `idx` of the lookup table stored in block
    /// `table`, allocating the target and journaling the updated table
    /// entry if it was empty
    fn table_entry_or_alloc(
        &self,
        dev: DeviceId,
        table: u64,
        idx: u64,
    ) -> Result<u64, InodeLayerError> {
        let mut block = self.cache.acquire(dev, table)?;
        let off = idx * ADDR_ENTRY_SIZE;
        let mut addr = block.deserialize_from::<u64>(off)?;
        if addr == 0 {
            addr = self.balloc(dev)?;
            block.serialize_into(&addr, off)?;
            self.journal.record(&block)?;
        }
        Ok(addr)
    }

    /// Release all content of the locked inode: every direct block, both
    /// indirect structures and everything they point at. Resets the size to
    /// 0 and persists the emptied inode.
    ///
    /// The caller holds the only guard, and the release discipline in
    /// [`iput`](struct.FileSystem.html#method.iput) guarantees no other
    /// reference exists when this runs as part of destroying an inode.
    pub fn itrunc(&self, ino: &mut InodeGuard<'_>) -> Result<(), InodeLayerError> {
        let dev = ino.dev();
        let inum = ino.inum();
        self.itrunc_raw(dev, inum, &mut *ino)
    }

    pub(crate) fn itrunc_raw(
        &self,
        dev: DeviceId,
        inum: u64,
        node: &mut DInode,
    ) -> Result<(), InodeLayerError> {
        let sb = self.readsb(dev)?;
        let single = sb.block_size / ADDR_ENTRY_SIZE;
        trace!("itrunc: dev {} inum {}", dev, inum);

        for i in 0..DIRECT_POINTERS as usize {
            if node.addrs[i] != 0 {
                self.bfree(dev, node.addrs[i])?;
                node.addrs[i] = 0;
            }
        }

        if node.addrs[SINGLE_INDIRECT_SLOT] != 0 {
            let table = node.addrs[SINGLE_INDIRECT_SLOT];
            self.free_table_targets(dev, table, single)?;
            self.bfree(dev, table)?;
            node.addrs[SINGLE_INDIRECT_SLOT] = 0;
        }

        if node.addrs[DOUBLE_INDIRECT_SLOT] != 0 {
            let level1 = node.addrs[DOUBLE_INDIRECT_SLOT];
            {
                let block = self.cache.acquire(dev, level1)?;
                for j in 0..single {
                    let level2 = block.deserialize_from::<u64>(j * ADDR_ENTRY_SIZE)?;
                    if level2 != 0 {
                        self.free_table_targets(dev, level2, single)?;
                        self.bfree(dev, level2)?;
                    }
                }
            }
            self.bfree(dev, level1)?;
            node.addrs[DOUBLE_INDIRECT_SLOT] = 0;
        }

        node.size = 0;
        self.put_dinode(dev, inum, node)
    }

    /// Free every block a lookup table points at, leaving the table block
    /// itself to the caller
    fn free_table_targets(
        &self,
        dev: DeviceId,
        table: u64,
        entries: u64,
    ) -> Result<(), InodeLayerError> {
        let block = self.cache.acquire(dev, table)?;
        for i in 0..entries {
            let addr = block.deserialize_from::<u64>(i * ADDR_ENTRY_SIZE)?;
            if addr != 0 {
                self.bfree(dev, addr)?;
            }
        }
        Ok(())
    }

    /// Read up to `n` bytes starting at byte offset `off` into `buf`.
    ///
    /// Reads at most what `buf` can hold and clamps at the end of the file;
    /// a read starting exactly at the size returns 0 bytes, while an offset
    /// further out (or an overflowing `off + n`) is rejected. Device inodes
    /// are redirected to the handler for their major number. Returns the
    /// number of bytes read.
    pub fn readi(
        &self,
        ino: &mut InodeGuard<'_>,
        buf: &mut Buffer,
        off: u64,
        n: u64,
    ) -> Result<u64, InodeLayerError> {
        if ino.ft == FType::TDev {
            let handler = self
                .devtable
                .get(ino.major)
                .ok_or_else(|| InodeLayerError::NoDeviceHandler(ino.major))?;
            let mut data = vec![0; n.min(buf.len()) as usize];
            let read = handler.read(&mut data)?;
            buf.write_data(&data[..read as usize], 0)?;
            return Ok(read);
        }

        let n = n.min(buf.len());
        if off > ino.size || off.checked_add(n).is_none() {
            return Err(InodeLayerError::InodeLayerInput(
                "read beyond the bounds of the file",
            ));
        }
        let n = n.min(ino.size - off);
        let block_size = self.readsb(ino.dev())?.block_size;

        let mut done = 0;
        while done < n {
            let pos = off + done;
            let addr = self.bmap(ino, pos / block_size)?;
            let block = self.cache.acquire(ino.dev(), addr)?;
            let chunk = (n - done).min(block_size - pos % block_size);
            let mut data = vec![0; chunk as usize];
            block.read_data(&mut data, pos % block_size)?;
            buf.write_data(&data, done)?;
            done += chunk;
        }
        Ok(n)
    }

    /// Write `n` bytes from `buf` into the inode starting at byte offset
    /// `off`, allocating blocks as the file grows.
    ///
    /// The write may begin exactly at the current size (append) but not
    /// beyond it, must not overflow, and must not push the file past the
    /// largest size the three addressing tiers can reach. If it extends the
    /// file, the new size is persisted. Device inodes are redirected to the
    /// handler for their major number. Returns the number of bytes written.
    pub fn writei(
        &self,
        ino: &mut InodeGuard<'_>,
        buf: &Buffer,
        off: u64,
        n: u64,
    ) -> Result<u64, InodeLayerError> {
        if ino.ft == FType::TDev {
            let handler = self
                .devtable
                .get(ino.major)
                .ok_or_else(|| InodeLayerError::NoDeviceHandler(ino.major))?;
            let mut data = vec![0; n.min(buf.len()) as usize];
            buf.read_data(&mut data, 0)?;
            return Ok(handler.write(&data)?);
        }

        if buf.len() < n {
            return Err(InodeLayerError::InodeLayerInput(
                "buffer holds fewer bytes than the write asks for",
            ));
        }
        let end = match off.checked_add(n) {
            Some(end) if off <= ino.size => end,
            _ => {
                return Err(InodeLayerError::InodeLayerInput(
                    "write beyond the bounds of the file",
                ))
            }
        };
        let sb = self.readsb(ino.dev())?;
        let single = sb.block_size / ADDR_ENTRY_SIZE;
        let max_size = (DIRECT_POINTERS + single + single * single) * sb.block_size;
        if end > max_size {
            return Err(InodeLayerError::FileTooLarge);
        }

        let mut done = 0;
        while done < n {
            let pos = off + done;
            let addr = self.bmap(ino, pos / sb.block_size)?;
            let mut block = self.cache.acquire(ino.dev(), addr)?;
            let chunk = (n - done).min(sb.block_size - pos % sb.block_size);
            let mut data = vec![0; chunk as usize];
            buf.read_data(&mut data, done)?;
            block.write_data(&data, pos % sb.block_size)?;
            self.journal.record(&block)?;
            done += chunk;
        }

        if n > 0 && end > ino.size {
            ino.size = end;
            self.iupdate(ino)?;
        }
        Ok(n)
    }

    /// Metadata projection of the locked inode
    pub fn stati(&self, ino: &InodeGuard<'_>) -> Stat {
        Stat {
            dev: ino.dev(),
            inum: ino.inum(),
            ft: ino.ft,
            nlink: ino.nlink,
            size: ino.size,
        }
    }
}
