//! On-disk record types and the buffer/block abstractions they are stored in.
//!
//! The disk layout described by these types is, in block order:
//!
//! \[boot block | super block | inode region | free bit map | data region\]
//!
//! 1. *boot block*: block 0 is reserved and never touched by this code.
//! 2. *super block*: block 1 holds the serialized [`SuperBlock`], which
//!    records where every other region starts and how large it is.
//! 3. *inode region*: all [`DInode`] records in inode-number order, packed
//!    whole into blocks (an inode never straddles two blocks). Room is kept
//!    for inode 0, but numbering effectively starts at [`ROOT_INUM`].
//! 4. *free bit map*: one bit per data block, 1 = allocated. Bits are
//!    numbered LSB-first within each byte.
//! 5. *data region*: the blocks file and directory content lives in.
//!
//! All records are written with `bincode`, which keeps every field at a fixed
//! width, so the layout is reproducible as long as the same serializer is
//! used on both sides.

use super::error::{ApiError, Result};
use lazy_static::lazy_static;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::io::prelude::*;
use std::io::{Cursor, SeekFrom};

/// Number of direct block-address slots in an inode
pub const DIRECT_POINTERS: u64 = 12;
/// Index of the single-indirect slot in an inode's address array
pub const SINGLE_INDIRECT_SLOT: usize = DIRECT_POINTERS as usize;
/// Index of the double-indirect slot in an inode's address array
pub const DOUBLE_INDIRECT_SLOT: usize = SINGLE_INDIRECT_SLOT + 1;
/// Total number of block-address slots in an inode
pub const ADDR_SLOTS: usize = DOUBLE_INDIRECT_SLOT + 1;
/// Width in bytes of one address entry inside an indirect lookup table
pub const ADDR_ENTRY_SIZE: u64 = 8;
/// Number of characters a directory entry name can hold
pub const DIRNAME_SIZE: usize = 14;
/// Inode number of the root directory
pub const ROOT_INUM: u64 = 1;
/// Block index the superblock is stored at; block 0 is reserved
pub const SUPERBLOCK_BLOCK: u64 = 1;

/// Identifier handed out by the buffer cache when a [`Device`] is attached.
///
/// Together with an inode or block number this forms the identity used
/// throughout the file system, e.g. `(DeviceId, inum)` for cached inodes.
///
/// [`Device`]: ../controller/struct.Device.html
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub(crate) u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A chunk of bytes on the heap, with raw and serialized access.
///
/// Used both as the contents of a [`Block`] and as the in/out parameter of
/// the byte-granular inode read and write operations.
#[derive(Debug, PartialEq, Eq)]
pub struct Buffer {
    contents: Box<[u8]>,
}

impl Buffer {
    /// Wrap the given bytes in a buffer
    pub fn new(data: Box<[u8]>) -> Buffer {
        Buffer { contents: data }
    }

    /// An all-zero buffer of `len` bytes
    pub fn new_zero(len: u64) -> Buffer {
        Buffer {
            contents: vec![0; len as usize].into_boxed_slice(),
        }
    }

    /// Length of the buffer in bytes
    pub fn len(&self) -> u64 {
        self.contents.len() as u64
    }

    /// Borrow the raw contents
    pub fn contents_as_ref(&self) -> &[u8] {
        &self.contents
    }

    /// Copy `data.len()` bytes starting at `offset` into `data`.
    /// Fails without reading anything if the range leaves the buffer.
    pub fn read_data(&self, data: &mut [u8], offset: u64) -> Result<()> {
        let end = offset + data.len() as u64;
        if end > self.len() {
            return Err(ApiError::BlockInput("read past the end of the buffer"));
        }
        data.copy_from_slice(&self.contents[offset as usize..end as usize]);
        Ok(())
    }

    /// Copy all of `data` into the buffer starting at `offset`.
    /// Fails without writing anything if the range leaves the buffer.
    pub fn write_data(&mut self, data: &[u8], offset: u64) -> Result<()> {
        let end = offset + data.len() as u64;
        if end > self.len() {
            return Err(ApiError::BlockInput("write past the end of the buffer"));
        }
        self.contents[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    /// Deserialize a value of type `S` from the bytes starting at `offset`
    pub fn deserialize_from<S>(&self, offset: u64) -> Result<S>
    where
        S: DeserializeOwned,
    {
        let mut c = Cursor::new(&self.contents);
        c.seek(SeekFrom::Start(offset))?;
        Ok(bincode::deserialize_from(c)?)
    }

    /// Serialize `stru` into the buffer starting at `offset`.
    /// Goes through [`write_data`](#method.write_data) so that a value that
    /// does not fit is rejected instead of silently truncated.
    pub fn serialize_into<S>(&mut self, stru: &S, offset: u64) -> Result<()>
    where
        S: Serialize,
    {
        let bin = bincode::serialize(stru)?;
        self.write_data(&bin, offset)
    }
}

/// One disk block's worth of data, tagged with its block number.
/// The unit of transfer between the buffer cache and the controller.
#[derive(Debug, PartialEq, Eq)]
pub struct Block {
    /// Index of this block on its device
    pub block_no: u64,
    buf: Buffer,
}

impl Block {
    /// A block at index `block_no` with the given contents
    pub fn new(block_no: u64, data: Box<[u8]>) -> Block {
        Block {
            block_no,
            buf: Buffer::new(data),
        }
    }

    /// An all-zero block of `len` bytes at index `block_no`
    pub fn new_zero(block_no: u64, len: u64) -> Block {
        Block {
            block_no,
            buf: Buffer::new_zero(len),
        }
    }

    /// Length of the block in bytes
    pub fn len(&self) -> u64 {
        self.buf.len()
    }

    /// Borrow the raw contents
    pub fn contents_as_ref(&self) -> &[u8] {
        self.buf.contents_as_ref()
    }

    /// See [`Buffer::read_data`](struct.Buffer.html#method.read_data)
    pub fn read_data(&self, data: &mut [u8], offset: u64) -> Result<()> {
        self.buf.read_data(data, offset)
    }

    /// See [`Buffer::write_data`](struct.Buffer.html#method.write_data)
    pub fn write_data(&mut self, data: &[u8], offset: u64) -> Result<()> {
        self.buf.write_data(data, offset)
    }

    /// See [`Buffer::deserialize_from`](struct.Buffer.html#method.deserialize_from)
    pub fn deserialize_from<S>(&self, offset: u64) -> Result<S>
    where
        S: DeserializeOwned,
    {
        self.buf.deserialize_from(offset)
    }

    /// See [`Buffer::serialize_into`](struct.Buffer.html#method.serialize_into)
    pub fn serialize_into<S>(&mut self, stru: &S, offset: u64) -> Result<()>
    where
        S: Serialize,
    {
        self.buf.serialize_into(stru, offset)
    }
}

/// File system metadata, stored at [`SUPERBLOCK_BLOCK`].
///
/// Region starts are absolute block indices. The regions must appear in
/// order and fit inside `nblocks`; the core crate checks this before
/// creating or mounting a file system. The serialized struct must fit in a
/// single block.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    /// Size of each block, in bytes
    pub block_size: u64,
    /// Total number of blocks in the file system
    pub nblocks: u64,
    /// Number of inode records the inode region keeps track of, counting
    /// the unused inode 0
    pub ninodes: u64,
    /// First block of the inode region; at least 2, since blocks 0 and 1
    /// are spoken for
    pub inodestart: u64,
    /// Number of data blocks tracked by the bit map
    pub ndatablocks: u64,
    /// First block of the free bit map region
    pub bmapstart: u64,
    /// First block of the data region
    pub datastart: u64,
}

lazy_static! {
    /// Serialized size of the superblock in bytes, computed at runtime from
    /// the serializer itself so it can never drift from the actual encoding.
    pub static ref SUPERBLOCK_SIZE: u64 =
        bincode::serialize(&SuperBlock::default()).unwrap().len() as u64;
}

/// The type of an on-disk inode.
///
/// `TFree` is deliberately the first variant: it serializes to tag 0, so a
/// zero-filled inode region reads back as all-free and "type 0 means free"
/// holds bit-exactly on disk.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Copy, Clone)]
pub enum FType {
    /// Free inode, available to the allocation scan
    TFree,
    /// Regular file
    TFile,
    /// Directory
    TDir,
    /// Device node; reads and writes are redirected to the handler
    /// registered for its major number
    TDev,
}

impl Default for FType {
    fn default() -> FType {
        FType::TFree
    }
}

/// An inode as it exists on disk.
///
/// The address array holds [`DIRECT_POINTERS`] direct block addresses,
/// followed by the single-indirect table address at
/// [`SINGLE_INDIRECT_SLOT`] and the double-indirect table address at
/// [`DOUBLE_INDIRECT_SLOT`]. Address 0 means "no block here yet".
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct DInode {
    /// File type; `TFree` means this inode can be claimed by allocation
    pub ft: FType,
    /// Major device number; selects the handler for `TDev` inodes
    pub major: u16,
    /// Minor device number
    pub minor: u16,
    /// Number of directory entries referring to this inode
    pub nlink: u16,
    /// Size of the file contents in bytes
    pub size: u64,
    /// Block-address slots: direct, then single-indirect, then
    /// double-indirect
    pub addrs: [u64; ADDR_SLOTS],
}

lazy_static! {
    /// Serialized size of a disk inode in bytes
    pub static ref DINODE_SIZE: u64 =
        bincode::serialize(&DInode::default()).unwrap().len() as u64;
}

/// One record in a directory's contents.
///
/// An `inum` of 0 marks an empty, reusable record. Names shorter than
/// [`DIRNAME_SIZE`] are terminated by a `'\0'` character. `char` serializes
/// at a fixed 4 bytes under bincode, which keeps every record the same size.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
pub struct DirEntry {
    /// Number of the inode this entry points at; 0 for an empty record
    pub inum: u64,
    /// The entry's name, padded with `'\0'`
    pub name: [char; DIRNAME_SIZE],
}

lazy_static! {
    /// Serialized size of a directory entry in bytes
    pub static ref DIRENTRY_SIZE: u64 =
        bincode::serialize(&DirEntry::default()).unwrap().len() as u64;
}

/// Metadata projection of an inode, for handing across the syscall boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Device the inode lives on
    pub dev: DeviceId,
    /// Inode number
    pub inum: u64,
    /// File type
    pub ft: FType,
    /// Link count
    pub nlink: u16,
    /// Content size in bytes
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    static BLOCK_SIZE: u64 = 512;

    #[test]
    fn raw_rw() {
        let mut b = Block::new_zero(7, BLOCK_SIZE);
        assert_eq!(b.contents_as_ref(), &vec![0; BLOCK_SIZE as usize][..]);

        let data = vec![5; 5];
        b.write_data(&data, 10).unwrap();
        let mut readback = vec![0; 5];
        b.read_data(&mut readback, 8).unwrap();
        assert_eq!(readback, vec![0, 0, 5, 5, 5]);

        // Out-of-bounds accesses leave the block untouched
        let mut one = vec![1];
        assert!(b.write_data(&one, BLOCK_SIZE).is_err());
        assert!(b.read_data(&mut one, BLOCK_SIZE).is_err());
        assert!(b.write_data(&[], BLOCK_SIZE).is_ok());
        assert!(b.write_data(&[], BLOCK_SIZE + 1).is_err());
    }

    #[test]
    fn record_sizes_are_stable() {
        // Every inode and directory entry must serialize to the same width,
        // or the packed regions fall apart.
        let filled = DInode {
            ft: FType::TDir,
            major: 3,
            minor: 1,
            nlink: 9,
            size: 1 << 40,
            addrs: [u64::max_value(); ADDR_SLOTS],
        };
        assert_eq!(
            bincode::serialize(&filled).unwrap().len() as u64,
            *DINODE_SIZE
        );

        let mut de = DirEntry::default();
        de.inum = 42;
        de.name[0] = 'x';
        assert_eq!(
            bincode::serialize(&de).unwrap().len() as u64,
            *DIRENTRY_SIZE
        );
        assert!(*SUPERBLOCK_SIZE <= BLOCK_SIZE);
    }

    #[test]
    fn free_type_is_tag_zero() {
        // A zero-filled inode slot must read back as a free inode.
        let zeroes = vec![0u8; *DINODE_SIZE as usize];
        let node: DInode = bincode::deserialize(&zeroes).unwrap();
        assert_eq!(node.ft, FType::TFree);
        assert_eq!(node, DInode::default());
    }

    #[test]
    fn block_serialization_roundtrip() {
        let mut b = Block::new_zero(3, BLOCK_SIZE);
        let node = DInode {
            ft: FType::TFile,
            nlink: 1,
            size: 999,
            ..DInode::default()
        };
        b.serialize_into(&node, 0).unwrap();
        b.serialize_into(&node, *DINODE_SIZE).unwrap();
        assert_eq!(b.deserialize_from::<DInode>(0).unwrap(), node);
        assert_eq!(b.deserialize_from::<DInode>(*DINODE_SIZE).unwrap(), node);

        // Serializing where the record does not fit is rejected
        assert!(b
            .serialize_into(&node, BLOCK_SIZE - *DINODE_SIZE + 1)
            .is_err());
    }
}
