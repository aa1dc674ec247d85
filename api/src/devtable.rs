//! Read/write handlers for device-type inodes, keyed by major number.
//!
//! An inode of type `TDev` has no block storage; the content layer forwards
//! its reads and writes to whatever [`CharDevice`] is registered under the
//! inode's major number. Registering handlers (console, null device, ...)
//! is the embedder's job; asking for an unregistered major number is an
//! expected, recoverable condition surfaced by the lookup returning `None`.

use super::error::Result;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A byte-stream device that inode reads and writes can be redirected to.
pub trait CharDevice: Send + Sync {
    /// Read up to `dst.len()` bytes from the device; returns how many were
    /// actually produced
    fn read(&self, dst: &mut [u8]) -> Result<u64>;

    /// Write the bytes in `src` to the device; returns how many were
    /// actually consumed
    fn write(&self, src: &[u8]) -> Result<u64>;
}

/// Registry of [`CharDevice`] handlers by major number.
pub struct DeviceTable {
    handlers: RwLock<HashMap<u16, Arc<dyn CharDevice>>>,
}

impl DeviceTable {
    /// An empty table
    pub fn new() -> DeviceTable {
        DeviceTable {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Install `handler` for `major`, replacing any previous handler
    pub fn register(&self, major: u16, handler: Arc<dyn CharDevice>) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.insert(major, handler);
        }
    }

    /// Look up the handler for `major`
    pub fn get(&self, major: u16) -> Option<Arc<dyn CharDevice>> {
        self.handlers
            .read()
            .ok()
            .and_then(|h| h.get(&major).map(Arc::clone))
    }
}

impl Default for DeviceTable {
    fn default() -> DeviceTable {
        DeviceTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Null;
    impl CharDevice for Null {
        fn read(&self, _dst: &mut [u8]) -> Result<u64> {
            Ok(0)
        }
        fn write(&self, src: &[u8]) -> Result<u64> {
            Ok(src.len() as u64)
        }
    }

    #[test]
    fn register_and_lookup() {
        let table = DeviceTable::new();
        assert!(table.get(1).is_none());
        table.register(1, Arc::new(Null));
        let h = table.get(1).unwrap();
        assert_eq!(h.write(&[1, 2, 3]).unwrap(), 3);
        assert!(table.get(2).is_none());
    }
}
