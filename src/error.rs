use std::path::PathBuf;

use crate::deps::thiserror;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("invalid page at block {bno}: {reason}")]
    InvalidPage { bno: i64, reason: String },

    #[error("store is read-only")]
    ReadOnly,

    #[error("io error during {op} on {path:?}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn invalid_argument<S: Into<String>>(reason: S) -> Self {
        Error::InvalidArgument { reason: reason.into() }
    }

    pub fn invalid_page<S: Into<String>>(
        bno: i64,
        reason: S,
    ) -> Self {
        Error::InvalidPage { bno, reason: reason.into() }
    }

    pub fn io(
        op: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Error::Io { op, path: path.into(), source }
    }
}
