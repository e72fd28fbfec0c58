use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Parse,
    Corrupted,
    NotFound,
    InvalidArgument,
    InvalidState,
    Internal,
    Cancelled,
    DuplicateEntry,
    InitializationFailed,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: String) -> Self {
        Error { kind, context }
    }

    pub fn parse(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Parse, context.into())
    }

    pub fn corrupted(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Corrupted, context.into())
    }

    pub fn cancelled() -> Self {
        Error::new(ErrorKind::Cancelled, "operation cancelled".to_string())
    }

    /// Errors that mean "the on-disk data can't be trusted"; query paths turn
    /// these into a rebuild request instead of propagating them.
    pub fn is_storage_related(&self) -> bool {
        matches!(self.kind, ErrorKind::Io | ErrorKind::Parse | ErrorKind::Corrupted)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            context: err.to_string(),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error {
            kind: ErrorKind::Parse,
            context: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            kind: ErrorKind::Parse,
            context: format!("JSON error: {}", err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
