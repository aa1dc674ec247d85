//! The path resolver: from a slash-separated path to an inode.
//!
//! A path starting with '/' is walked from the root inode of the root
//! device; anything else is walked from the caller's current-directory
//! handle, of which a duplicated reference is taken; the resolver never
//! re-resolves the current directory. Repeated and trailing separators
//! contribute empty components and are discarded; "." and ".." receive no
//! special treatment and are looked up in the directory at hand like any
//! other name. A component longer than the bounded name length is
//! truncated, not rejected.
//!
//! At every step the walker locks the inode it stands on, checks that it is
//! a directory, looks the next component up, and moves its counted
//! reference one level down. Locks are held only across the single lookup,
//! never over the whole walk.

use crate::error::PathLayerError;
use crate::fs::FileSystem;
use crate::icache::InodeHandle;
use log::warn;
use relative_path::{Component, RelativePath};
use ruxfs_api::types::{FType, DIRNAME_SIZE, ROOT_INUM};

/// Split a path into its lookup names: whether it is absolute, and the
/// components with empties discarded and each name truncated to
/// [`DIRNAME_SIZE`] characters
fn split_path(path: &str) -> (bool, Vec<String>) {
    let absolute = path.starts_with('/');
    let names = RelativePath::new(path.trim_start_matches('/'))
        .components()
        .map(|c| match c {
            Component::CurDir => ".".to_string(),
            Component::ParentDir => "..".to_string(),
            Component::Normal(name) => name.chars().take(DIRNAME_SIZE).collect(),
        })
        .collect();
    (absolute, names)
}

impl FileSystem {
    /// Resolve `path` to a counted reference on its final inode.
    ///
    /// Relative paths start at `cwd`. An empty or all-separator relative
    /// path resolves to a duplicate of `cwd` itself.
    pub fn namei(&self, cwd: &InodeHandle, path: &str) -> Result<InodeHandle, PathLayerError> {
        let (ino, _) = self.namex(cwd, path, false)?;
        Ok(ino)
    }

    /// Resolve `path` to its parent directory: a counted reference on the
    /// next-to-last inode, plus the final name, for a caller that wants to
    /// create or unlink that name.
    ///
    /// Fails with `NoParent` when no distinct parent is ever traversed
    /// (a bare "/" or a single relative component) rather than returning
    /// the starting inode as its own parent.
    pub fn nameiparent(
        &self,
        cwd: &InodeHandle,
        path: &str,
    ) -> Result<(InodeHandle, String), PathLayerError> {
        let (ino, name) = self.namex(cwd, path, true)?;
        Ok((ino, name.unwrap_or_default()))
    }

    fn namex(
        &self,
        cwd: &InodeHandle,
        path: &str,
        want_parent: bool,
    ) -> Result<(InodeHandle, Option<String>), PathLayerError> {
        let (absolute, names) = split_path(path);
        let mut cur = if absolute {
            self.iget(self.root_dev(), ROOT_INUM)?
        } else {
            self.idup(cwd)?
        };

        if want_parent && (names.is_empty() || (!absolute && names.len() == 1)) {
            self.put_quiet(cur);
            return Err(PathLayerError::NoParent);
        }

        for (idx, name) in names.iter().enumerate() {
            let last = idx + 1 == names.len();
            let (dir_slot, lock_err) = match self.ilock(&cur) {
                Ok(guard) => (Some(guard), None),
                Err(e) => (None, Some(e)),
            };
            if let Some(e) = lock_err {
                drop(dir_slot);
                self.put_quiet(cur);
                return Err(e.into());
            }
            let mut dir = dir_slot.unwrap();
            if dir.ft != FType::TDir {
                drop(dir);
                self.put_quiet(cur);
                return Err(PathLayerError::NotADirectory);
            }
            if want_parent && last {
                drop(dir);
                return Ok((cur, Some(name.clone())));
            }
            let child = match self.dirlookup(&mut dir, name) {
                Ok((child, _)) => child,
                Err(e) => {
                    drop(dir);
                    self.put_quiet(cur);
                    return Err(e.into());
                }
            };
            drop(dir);
            self.iput(cur)?;
            cur = child;
        }
        Ok((cur, None))
    }

    /// Give a reference back on a failure path, where the walk's own error
    /// is the one worth reporting
    fn put_quiet(&self, ino: InodeHandle) {
        if let Err(e) = self.iput(ino) {
            warn!("releasing an inode during a failed path walk: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::split_path;

    #[test]
    fn separators_and_empties() {
        assert_eq!(split_path("/a/b"), (true, vec!["a".into(), "b".into()]));
        assert_eq!(split_path("//a///b/"), (true, vec!["a".into(), "b".into()]));
        assert_eq!(split_path("a"), (false, vec!["a".into()]));
        assert_eq!(split_path("/"), (true, vec![]));
        assert_eq!(split_path(""), (false, vec![]));
    }

    #[test]
    fn dot_names_pass_through() {
        assert_eq!(
            split_path("./../x"),
            (false, vec![".".into(), "..".into(), "x".into()])
        );
    }

    #[test]
    fn long_components_are_truncated() {
        let long = "abcdefghijklmnopqrstuvwxyz";
        let (_, names) = split_path(long);
        assert_eq!(names, vec!["abcdefghijklmn".to_string()]);
    }
}
