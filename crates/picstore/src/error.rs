//! Error types for picstore

use std::fmt;
use std::io;

/// Result type alias for picstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for record store operations
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(io::Error),

    /// Data file is not a record log, or a record is malformed
    Parse(String),

    /// Key too large (max 1 KiB)
    KeyTooLarge(usize),

    /// Value too large (max 16 MiB)
    ValueTooLarge(usize),

    /// Store is closed
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Parse(msg) => write!(f, "Parse error: {}", msg),
            Error::KeyTooLarge(size) => write!(f, "Key too large: {} bytes (max 1 KiB)", size),
            Error::ValueTooLarge(size) => {
                write!(f, "Value too large: {} bytes (max 16 MiB)", size)
            }
            Error::Closed => write!(f, "Store is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        Error::Parse(format!("{:?}", err))
    }
}
