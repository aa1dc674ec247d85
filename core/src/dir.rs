//! The directory layer: fixed-size name records inside directory inodes.
//!
//! A directory's content is nothing special, just a byte sequence addressed
//! through the content map like any file, except that it is read and
//! written in whole [`DirEntry`] records. An entry with inode number 0 is
//! an empty record: lookups skip it, insertion reuses the first one it
//! finds before growing the directory.
//!
//! Inserting a name does *not* touch the target inode's link count, and the
//! same inode number may appear under many names (hard links); keeping
//! `nlink` in step with the records is the calling layer's bookkeeping.
//!
//! [`DirEntry`]: ../../ruxfs_api/types/struct.DirEntry.html

use crate::error::{DirLayerError, InodeLayerError};
use crate::fs::FileSystem;
use crate::icache::{InodeGuard, InodeHandle};
use ruxfs_api::types::{Buffer, DirEntry, FType, DIRENTRY_SIZE, DIRNAME_SIZE};

/// Is `name` usable as a directory entry name?
/// Accepts "." and "..", and otherwise non-empty alphanumeric names of at
/// most [`DIRNAME_SIZE`] characters.
pub fn is_valid_name(name: &str) -> bool {
    name == "."
        || name == ".."
        || (!name.is_empty()
            && name.chars().count() <= DIRNAME_SIZE
            && name.chars().all(char::is_alphanumeric))
}

/// Build a directory entry for `inum` named `name`; `None` if the name is
/// invalid
pub fn new_de(inum: u64, name: &str) -> Option<DirEntry> {
    let mut de = DirEntry {
        inum,
        name: Default::default(),
    };
    set_name_str(&mut de, name)?;
    Some(de)
}

/// The entry's name as a `String`, up to the first `'\0'`
pub fn get_name_str(de: &DirEntry) -> String {
    de.name.iter().take_while(|&&c| c != '\0').collect()
}

/// Store `name` into the entry, padded with a terminating `'\0'` when it is
/// shorter than the name field; `None` if the name is invalid
pub fn set_name_str(de: &mut DirEntry, name: &str) -> Option<()> {
    if !is_valid_name(name) {
        return None;
    }
    let mut len = 0;
    for (i, c) in name.chars().enumerate() {
        de.name[i] = c;
        len = i + 1;
    }
    if len < DIRNAME_SIZE {
        de.name[len] = '\0';
    }
    Some(())
}

/// Does the entry's bounded name equal `name`?
fn name_matches(de: &DirEntry, name: &str) -> bool {
    let mut chars = name.chars();
    for i in 0..DIRNAME_SIZE {
        match (de.name[i], chars.next()) {
            ('\0', None) => return true,
            (c, Some(n)) if c == n => continue,
            _ => return false,
        }
    }
    // All DIRNAME_SIZE characters matched; equal iff the name ends here too
    chars.next().is_none()
}

impl FileSystem {
    /// The `idx`th record of the locked directory
    fn get_dir_entry(
        &self,
        dir: &mut InodeGuard<'_>,
        idx: u64,
    ) -> Result<DirEntry, DirLayerError> {
        let mut buf = Buffer::new_zero(*DIRENTRY_SIZE);
        let read = self.readi(dir, &mut buf, idx * *DIRENTRY_SIZE, *DIRENTRY_SIZE)?;
        if read != *DIRENTRY_SIZE {
            return Err(InodeLayerError::Invariant("short read of a directory entry").into());
        }
        Ok(buf.deserialize_from::<DirEntry>(0)?)
    }

    /// Look `name` up in the locked directory.
    ///
    /// Scans the records in order, skipping empty ones, and returns a
    /// fetched handle for the first match together with the byte offset its
    /// record was found at. A miss is the expected `NotFound`; calling this
    /// on anything but a directory is an invariant violation.
    pub fn dirlookup(
        &self,
        dir: &mut InodeGuard<'_>,
        name: &str,
    ) -> Result<(InodeHandle, u64), DirLayerError> {
        if dir.ft != FType::TDir {
            return Err(InodeLayerError::Invariant("directory lookup on a non-directory").into());
        }
        let records = dir.size / *DIRENTRY_SIZE;
        for idx in 0..records {
            let de = self.get_dir_entry(dir, idx)?;
            if de.inum == 0 {
                continue;
            }
            if name_matches(&de, name) {
                let child = self.iget(dir.dev(), de.inum)?;
                return Ok((child, idx * *DIRENTRY_SIZE));
            }
        }
        Err(DirLayerError::NotFound)
    }

    /// Insert a record binding `name` to `inum` in the locked directory and
    /// return the byte offset it was written at.
    ///
    /// Reuses the first empty record, or appends past the end (growing the
    /// directory through the content map) when there is none. Fails with
    /// `AlreadyExists` (leaving the directory untouched) when the name is
    /// already present. The target inode number is not checked for
    /// uniqueness: linking one inode under several names is allowed.
    pub fn dirlink(
        &self,
        dir: &mut InodeGuard<'_>,
        name: &str,
        inum: u64,
    ) -> Result<u64, DirLayerError> {
        if dir.ft != FType::TDir {
            return Err(InodeLayerError::Invariant("directory insert on a non-directory").into());
        }
        match self.dirlookup(dir, name) {
            Ok((existing, _)) => {
                self.iput(existing)?;
                return Err(DirLayerError::AlreadyExists);
            }
            Err(DirLayerError::NotFound) => {}
            Err(e) => return Err(e),
        }
        let de = new_de(inum, name).ok_or(DirLayerError::DirLayerInput(
            "invalid directory entry name",
        ))?;

        let records = dir.size / *DIRENTRY_SIZE;
        let mut off = dir.size;
        for idx in 0..records {
            if self.get_dir_entry(dir, idx)?.inum == 0 {
                off = idx * *DIRENTRY_SIZE;
                break;
            }
        }

        let mut buf = Buffer::new_zero(*DIRENTRY_SIZE);
        buf.serialize_into(&de, 0)?;
        self.writei(dir, &buf, off, *DIRENTRY_SIZE)?;
        Ok(off)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_roundtrip() {
        let de = new_de(7, "notes").unwrap();
        assert_eq!(get_name_str(&de), "notes");
        assert_eq!(de.inum, 7);

        let full = "a".repeat(DIRNAME_SIZE);
        let de = new_de(1, &full).unwrap();
        assert_eq!(get_name_str(&de), full);
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(new_de(1, "").is_none());
        assert!(new_de(1, "with/slash").is_none());
        assert!(new_de(1, &"a".repeat(DIRNAME_SIZE + 1)).is_none());
        assert!(new_de(1, ".").is_some());
        assert!(new_de(1, "..").is_some());
    }

    #[test]
    fn bounded_name_compare() {
        let de = new_de(1, "abc").unwrap();
        assert!(name_matches(&de, "abc"));
        assert!(!name_matches(&de, "ab"));
        assert!(!name_matches(&de, "abcd"));
        let full = "b".repeat(DIRNAME_SIZE);
        let de = new_de(1, &full).unwrap();
        assert!(name_matches(&de, &full));
        assert!(!name_matches(&de, &"b".repeat(DIRNAME_SIZE - 1)));
    }
}
