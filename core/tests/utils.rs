#![allow(dead_code)]

//Shared fixtures for the integration tests.
//Each test backs its file system with its own disk image so the tests can
//run in parallel without stepping on each other.

use ruxfs_api::controller::Device;
use ruxfs_api::types::{FType, SuperBlock};
use ruxfs_core::FileSystem;
use std::fs::{create_dir_all, remove_dir, remove_file};
use std::path::{Path, PathBuf};

//A small geometry every test in this suite can share:
//[0 boot | 1 super | 2..12 inodes | 12 bitmap | 13..73 data | padding]
pub const BLOCK_SIZE: u64 = 256;
pub static SUPERBLOCK_GOOD: SuperBlock = SuperBlock {
    block_size: BLOCK_SIZE,
    nblocks: 80,
    ninodes: 10,
    inodestart: 2,
    ndatablocks: 60,
    bmapstart: 12,
    datastart: 13,
};

//Number of address entries per indirect lookup table under this geometry
pub const TABLE_ENTRIES: u64 = BLOCK_SIZE / 8;

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

//Create the directories leading up to a fresh image path, removing a
//leftover image from an earlier run if there is one
pub fn disk_prep_path(name: &str, img_name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push(name);
    path.push(img_name);

    if path.exists() {
        remove_file(&path).unwrap();
    }
    create_dir_all(path.parent().unwrap()).unwrap();
    path
}

//Undo disk_prep_path, including removing the parent directory
pub fn disk_unprep_path(path: &Path) {
    remove_file(path).unwrap();
    let parent = path.parent().unwrap();
    remove_dir(parent).unwrap(); //Safety: only removes an empty directory
}

//Destruct the given device and clean up its directory
pub fn disk_destruct(dev: Device) {
    let path = dev.device_path().to_owned();
    drop(dev); //Release the mapping before deleting the file
    disk_unprep_path(&path);
}

//Unmount the file system and clean up its image
pub fn fs_destruct(fs: FileSystem) {
    disk_destruct(fs.unmountfs());
}

//Allocate an inode with nlink 1, so a later iput does not destroy it,
//and return its number
pub fn alloc_linked_inode(fs: &FileSystem, ft: FType) -> u64 {
    let ino = fs.ialloc(fs.root_dev(), ft).unwrap();
    {
        let mut guard = fs.ilock(&ino).unwrap();
        guard.nlink = 1;
        fs.iupdate(&guard).unwrap();
    }
    let inum = ino.inum();
    fs.iput(ino).unwrap();
    inum
}

//Insert child_inum under `name` in the directory with inode number
//parent_inum
pub fn link_under(fs: &FileSystem, parent_inum: u64, name: &str, child_inum: u64) {
    let parent = fs.iget(fs.root_dev(), parent_inum).unwrap();
    let mut guard = fs.ilock(&parent).unwrap();
    fs.dirlink(&mut guard, name, child_inum).unwrap();
    drop(guard);
    fs.iput(parent).unwrap();
}

//A byte pattern long enough to make block-boundary mistakes visible
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
