use std::fmt::Display;

/// emberdb errors.
#[derive(Debug)]
pub enum Error {
    /// An empty key or value was presented to the WAL or engine.
    InvalidEntry(String),
    /// A read or delete addressed a key that is not present.
    KeyNotFound(String),
    /// An underlying filesystem failure (open, read, write, seek, sync).
    Io(std::io::Error),
    /// A lock was poisoned by a panicking holder. Terminal for the
    /// affected component.
    Poisoned,
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::InvalidEntry(msg) => write!(f, "invalid entry: {msg}"),
            Error::KeyNotFound(key) => write!(f, "key not found: {key}"),
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Poisoned => write!(f, "lock poisoned"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::Poisoned
    }
}

/// An emberdb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;
