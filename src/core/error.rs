use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Parse,
    NotFound,
    InvalidArgument,
    OutOfRange,
    InvalidState,
    AccessDenied,
    Cancelled,
    Internal,
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

    pub fn out_of_range(idx: u64, len: usize) -> Self {
        Error::new(
            ErrorKind::OutOfRange,
            format!("{} is outside the index (length {})", idx, len),
        )
    }

    pub fn cancelled(what: &str) -> Self {
        Error::new(ErrorKind::Cancelled, format!("{} was cancelled", what))
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
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

impl From<mailparse::MailParseError> for Error {
    fn from(err: mailparse::MailParseError) -> Self {
        Error {
            kind: ErrorKind::Parse,
            context: format!("Mail parse error: {}", err),
        }
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error {
            kind: ErrorKind::Io,
            context: format!("Failed to persist file: {}", err.error),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
