//! The disk controller: a block device emulated on top of a memory-mapped
//! file.
//!
//! A [`Device`] either creates a fresh zero-filled image file or loads an
//! existing one, and then serves whole-block reads and writes against the
//! mapping. This is the bottom of the stack; everything above it (buffer
//! cache, journal, the core layers) only ever talks to a device through
//! [`read_block`](struct.Device.html#method.read_block) and
//! [`write_block`](struct.Device.html#method.write_block).
//!
//! The controller makes no attempt to lock the backing file against other
//! processes; concurrent access to the image from outside the running file
//! system is undefined behavior.

use super::error::{ApiError, Result};
use super::types::Block;
use memmap::MmapMut;
use std::fs::{remove_file, OpenOptions};
use std::path::{Path, PathBuf};

/// A block device backed by a memory-mapped image file.
#[derive(Debug)]
pub struct Device {
    /// Size of the blocks this device reads and writes, in bytes
    pub block_size: u64,
    /// Total number of blocks on this device
    pub nblocks: u64,
    path: PathBuf,
    image: MmapMut,
}

impl Device {
    /// Create a device on a *new* image file at `path`, zero-filled, with
    /// `nblocks` blocks of `block_size` bytes each.
    /// Fails if the file already exists.
    pub fn new<P: AsRef<Path>>(path: P, block_size: u64, nblocks: u64) -> Result<Device> {
        if path.as_ref().exists() {
            return Err(ApiError::ControllerInput(
                "refusing to create a device over an existing image",
            ));
        }
        Device::open(path, block_size, nblocks)
    }

    /// Load a device from an *existing* image file at `path`.
    /// Fails if the file is missing or does not have the expected size.
    pub fn load<P: AsRef<Path>>(path: P, block_size: u64, nblocks: u64) -> Result<Device> {
        if !path.as_ref().exists() {
            return Err(ApiError::ControllerInput(
                "tried to load a non-existing device image",
            ));
        }
        Device::open(path, block_size, nblocks)
    }

    fn open<P: AsRef<Path>>(path: P, block_size: u64, nblocks: u64) -> Result<Device> {
        let size = block_size * nblocks;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let existing = file.metadata()?.len();
        if existing == 0 {
            // Fresh image; extending fills it with zeroes.
            file.set_len(size)?;
        } else if existing != size {
            return Err(ApiError::ControllerInput(
                "image size does not match the device geometry",
            ));
        }
        let image = unsafe { memmap::MmapOptions::new().map_mut(&file)? };
        Ok(Device {
            block_size,
            nblocks,
            path: path.as_ref().to_path_buf(),
            image,
        })
    }

    /// Total capacity of this device in bytes
    pub fn device_size(&self) -> u64 {
        self.block_size * self.nblocks
    }

    /// Path of the image file backing this device
    pub fn device_path(&self) -> &Path {
        &self.path
    }

    /// End this device's life and delete its backing image.
    /// Panics if the file cannot be removed.
    pub fn destruct(self) {
        remove_file(&self.path).unwrap();
    }

    /// Read the block at `index` into an owned [`Block`].
    ///
    /// [`Block`]: ../types/struct.Block.html
    pub fn read_block(&self, index: u64) -> Result<Block> {
        if index >= self.nblocks {
            return Err(ApiError::ControllerInput("read past the end of the device"));
        }
        let start = (index * self.block_size) as usize;
        let end = start + self.block_size as usize;
        Ok(Block::new(index, self.image[start..end].into()))
    }

    /// Write the given block back to its position on the device.
    /// The block must be exactly one `block_size` long and its number must
    /// fall inside the device.
    pub fn write_block(&mut self, b: &Block) -> Result<()> {
        if b.len() != self.block_size {
            return Err(ApiError::ControllerInput(
                "writing a block of the wrong size",
            ));
        }
        if b.block_no >= self.nblocks {
            return Err(ApiError::ControllerInput(
                "write past the end of the device",
            ));
        }
        let start = (b.block_no * self.block_size) as usize;
        let end = start + self.block_size as usize;
        self.image[start..end].copy_from_slice(b.contents_as_ref());
        Ok(())
    }
}

impl Drop for Device {
    /// Make sure the mapping is persisted before the device goes away, as
    /// long as the backing file has not been removed underneath us.
    fn drop(&mut self) {
        if self.path.exists() {
            self.image.flush().unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Device;
    use crate::types::Block;
    use std::fs::{create_dir_all, remove_dir, remove_file};
    use std::path::PathBuf;

    static BLOCK_SIZE: u64 = 16;
    static NBLOCKS: u64 = 8;

    fn image_path(name: &str) -> PathBuf {
        let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("images-controller-".to_string() + name);
        path.push("img");
        if path.exists() {
            remove_file(&path).unwrap();
        }
        create_dir_all(path.parent().unwrap()).unwrap();
        path
    }

    fn teardown(dev: Device) {
        let path = dev.device_path().to_owned();
        dev.destruct();
        remove_dir(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn fresh_device_is_zeroed() {
        let path = image_path("fresh");
        let mut dev = Device::new(&path, BLOCK_SIZE, NBLOCKS).unwrap();

        assert_eq!(dev.read_block(3).unwrap(), Block::new_zero(3, BLOCK_SIZE));
        assert!(dev.read_block(NBLOCKS).is_err());
        assert!(dev
            .write_block(&Block::new_zero(0, BLOCK_SIZE - 1))
            .is_err());

        let written = Block::new(2, (0u8..16).collect());
        dev.write_block(&written).unwrap();
        assert_eq!(dev.read_block(2).unwrap(), written);

        teardown(dev);
        assert!(!path.exists());
    }

    #[test]
    fn reload_preserves_contents() {
        let path = image_path("reload");
        let mut dev = Device::new(&path, BLOCK_SIZE, NBLOCKS).unwrap();
        let written = Block::new(5, (0u8..16).rev().collect());
        dev.write_block(&written).unwrap();
        drop(dev);

        // Wrong geometry is refused, right geometry sees the old data
        assert!(Device::load(&path, BLOCK_SIZE, NBLOCKS + 1).is_err());
        let dev = Device::load(&path, BLOCK_SIZE, NBLOCKS).unwrap();
        assert_eq!(dev.read_block(5).unwrap(), written);
        teardown(dev);
    }
}
