//Creating, mounting and unmounting file systems, and what survives a
//remount.

use ruxfs_api::controller::Device;
use ruxfs_api::types::{Buffer, FType, SuperBlock, ROOT_INUM, SUPERBLOCK_BLOCK};
use ruxfs_core::FileSystem;

#[path = "utils.rs"]
mod utils;
use utils::{BLOCK_SIZE, SUPERBLOCK_GOOD};

fn disk_prep_path(name: &str) -> std::path::PathBuf {
    utils::disk_prep_path(&("images-fs-".to_string() + name), "img")
}

#[test]
fn superblock_validation() {
    assert!(FileSystem::sb_valid(&SUPERBLOCK_GOOD));

    //The inode region may not overlap the reserved blocks
    let mut sb = SUPERBLOCK_GOOD;
    sb.inodestart = 1;
    assert!(!FileSystem::sb_valid(&sb));

    //Regions out of order
    let mut sb = SUPERBLOCK_GOOD;
    sb.bmapstart = sb.inodestart;
    assert!(!FileSystem::sb_valid(&sb));

    //Data region falls off the device
    let mut sb = SUPERBLOCK_GOOD;
    sb.nblocks = 50;
    assert!(!FileSystem::sb_valid(&sb));

    //An inode must fit in one block
    let mut sb = SUPERBLOCK_GOOD;
    sb.block_size = 8;
    assert!(!FileSystem::sb_valid(&sb));

    //mkfs refuses an invalid superblock before touching the path
    let path = disk_prep_path("badsb");
    assert!(FileSystem::mkfs(&path, &sb).is_err());
    assert!(!path.exists());
    std::fs::remove_dir(path.parent().unwrap()).unwrap();
}

#[test]
fn mkfs_installs_the_root() {
    let path = disk_prep_path("mkfs");
    let fs = FileSystem::mkfs(&path, &SUPERBLOCK_GOOD).unwrap();

    let root = fs.iget(fs.root_dev(), ROOT_INUM).unwrap();
    {
        let guard = fs.ilock(&root).unwrap();
        assert_eq!(guard.ft, FType::TDir);
        assert_eq!(guard.nlink, 1);
        assert_eq!(guard.size, 0);
        let st = fs.stati(&guard);
        assert_eq!(st.inum, ROOT_INUM);
        assert_eq!(st.ft, FType::TDir);
    }
    fs.iput(root).unwrap();

    //The superblock itself was persisted into block 1
    let dev = fs.unmountfs();
    let sb = dev
        .read_block(SUPERBLOCK_BLOCK)
        .unwrap()
        .deserialize_from::<SuperBlock>(0)
        .unwrap();
    assert_eq!(sb, SUPERBLOCK_GOOD);
    utils::disk_destruct(dev);
}

#[test]
fn mounting_checks_the_image() {
    //A device that never saw mkfs has no valid superblock
    let path = disk_prep_path("nofs");
    let dev = Device::new(&path, BLOCK_SIZE, 80).unwrap();
    assert!(FileSystem::mountfs(dev).is_err());
    std::fs::remove_file(&path).unwrap();
    std::fs::remove_dir(path.parent().unwrap()).unwrap();

    //Geometry disagreement between superblock and device is refused
    let path = disk_prep_path("geom");
    let fs = FileSystem::mkfs(&path, &SUPERBLOCK_GOOD).unwrap();
    let dev = fs.unmountfs();
    drop(dev);
    let dev = Device::load(&path, BLOCK_SIZE / 2, 160).unwrap();
    assert!(FileSystem::mountfs(dev).is_err());
    std::fs::remove_file(&path).unwrap();
    let parent = path.parent().unwrap().to_owned();
    std::fs::remove_dir(parent).unwrap();
}

#[test]
fn contents_survive_a_remount() -> anyhow::Result<()> {
    utils::init_log();
    let path = disk_prep_path("remount");
    let fs = FileSystem::mkfs(&path, &SUPERBLOCK_GOOD)?;
    let data = utils::pattern(3 * BLOCK_SIZE as usize);

    let inum = utils::alloc_linked_inode(&fs, FType::TFile);
    {
        let file = fs.iget(fs.root_dev(), inum)?;
        let mut guard = fs.ilock(&file)?;
        let buf = Buffer::new(data.clone().into_boxed_slice());
        fs.writei(&mut guard, &buf, 0, buf.len())?;
        drop(guard);
        fs.iput(file)?;
    }
    utils::link_under(&fs, ROOT_INUM, "keepsake", inum);

    //Unmount commits the journal; a remount must see everything
    let dev = fs.unmountfs();
    drop(dev);
    let dev = Device::load(&path, BLOCK_SIZE, SUPERBLOCK_GOOD.nblocks)?;
    let fs = FileSystem::mountfs(dev)?;

    let root = fs.iget(fs.root_dev(), ROOT_INUM)?;
    let file = fs.namei(&root, "/keepsake")?;
    assert_eq!(file.inum(), inum);
    {
        let mut guard = fs.ilock(&file)?;
        assert_eq!(guard.size, data.len() as u64);
        let mut buf = Buffer::new_zero(data.len() as u64);
        let buf_len = buf.len();
        let n = fs.readi(&mut guard, &mut buf, 0, buf_len)?;
        assert_eq!(n, data.len() as u64);
        assert_eq!(buf.contents_as_ref(), &data[..]);
    }
    fs.iput(file)?;
    fs.iput(root)?;
    utils::fs_destruct(fs);
    Ok(())
}
