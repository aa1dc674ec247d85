//The block allocator: bitmap scanning, reuse, and the two ways freeing can
//go wrong.

use ruxfs_core::error::BlockLayerError;
use ruxfs_core::FileSystem;

#[path = "utils.rs"]
mod utils;
use utils::SUPERBLOCK_GOOD;

fn disk_prep_path(name: &str) -> std::path::PathBuf {
    utils::disk_prep_path(&("images-alloc-".to_string() + name), "img")
}

#[test]
fn first_fit_until_exhaustion() {
    let path = disk_prep_path("exhaust");
    let fs = FileSystem::mkfs(&path, &SUPERBLOCK_GOOD).unwrap();
    let dev = fs.root_dev();

    //A fresh bitmap hands out every data block once, in order
    for i in 0..SUPERBLOCK_GOOD.ndatablocks {
        assert_eq!(fs.balloc(dev).unwrap(), SUPERBLOCK_GOOD.datastart + i);
    }
    //Exhaustion is a recoverable error, not a crash
    assert!(matches!(fs.balloc(dev), Err(BlockLayerError::OutOfBlocks)));

    //Freeing makes the same address allocatable again
    let freed = SUPERBLOCK_GOOD.datastart + 17;
    fs.bfree(dev, freed).unwrap();
    assert_eq!(fs.balloc(dev).unwrap(), freed);

    utils::fs_destruct(fs);
}

#[test]
fn freeing_a_free_block_is_flagged() {
    let path = disk_prep_path("doublefree");
    let fs = FileSystem::mkfs(&path, &SUPERBLOCK_GOOD).unwrap();
    let dev = fs.root_dev();

    //Never allocated: the bit is clear, so this is a double free
    let never = SUPERBLOCK_GOOD.datastart + 3;
    assert!(matches!(
        fs.bfree(dev, never),
        Err(BlockLayerError::DoubleFree(b)) if b == never
    ));

    //Allocated once, freed twice
    let b = fs.balloc(dev).unwrap();
    fs.bfree(dev, b).unwrap();
    assert!(matches!(
        fs.bfree(dev, b),
        Err(BlockLayerError::DoubleFree(_))
    ));

    utils::fs_destruct(fs);
}

#[test]
fn addresses_outside_the_data_region_are_rejected() {
    let path = disk_prep_path("bounds");
    let fs = FileSystem::mkfs(&path, &SUPERBLOCK_GOOD).unwrap();
    let dev = fs.root_dev();

    //The bitmap block itself, and one past the tracked range
    assert!(matches!(
        fs.bfree(dev, SUPERBLOCK_GOOD.bmapstart),
        Err(BlockLayerError::BlockLayerInput(_))
    ));
    assert!(matches!(
        fs.bfree(
            dev,
            SUPERBLOCK_GOOD.datastart + SUPERBLOCK_GOOD.ndatablocks
        ),
        Err(BlockLayerError::BlockLayerInput(_))
    ));

    utils::fs_destruct(fs);
}

#[test]
fn superblock_reads_fresh_each_time() {
    let path = disk_prep_path("readsb");
    let fs = FileSystem::mkfs(&path, &SUPERBLOCK_GOOD).unwrap();
    assert_eq!(fs.readsb(fs.root_dev()).unwrap(), SUPERBLOCK_GOOD);
    utils::fs_destruct(fs);
}
