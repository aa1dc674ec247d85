//! Error type shared by the collaborator layers in this crate.

use std::io;
use thiserror::Error;

/// Errors produced by the controller, buffer cache, journal and device table.
///
/// The `#[from]` conversions let the implementations bubble up `io` and
/// `bincode` failures with the `?` operator, the same way the layered error
/// types in the core crate wrap this one.
#[derive(Error, Debug)]
pub enum ApiError {
    /// I/O failure while manipulating the backing image of a device
    #[error("i/o failure in the controller layer")]
    Io(#[from] io::Error),
    /// A structure could not be read from or written into a block
    #[error("(de)serialization failure")]
    Serialize(#[from] bincode::Error),
    /// Invalid input to the controller layer
    #[error("invalid controller input: {0}")]
    ControllerInput(&'static str),
    /// Invalid input to a block or buffer operation
    #[error("invalid block input: {0}")]
    BlockInput(&'static str),
    /// The given device id is not attached to the buffer cache
    #[error("device {0} is not attached")]
    UnknownDevice(u32),
    /// A lock was poisoned by a panicking thread; the structure it protects
    /// can no longer be trusted
    #[error("poisoned lock in {0}")]
    Poisoned(&'static str),
}

/// Shorthand for a `Result` carrying an [`ApiError`]
pub type Result<T> = std::result::Result<T, ApiError>;
