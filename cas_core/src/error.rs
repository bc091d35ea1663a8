//! Error taxonomy shared by every crate in the workspace.

use std::collections::HashMap;

use crate::Ref;

/// The error kinds a `Store` (or anything built on top of one) can surface.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt blob {ref_}: {reason}")]
    CorruptBlob { ref_: Ref, reason: String },

    #[error("I/O error during {op}: {source}")]
    Io {
        op: String,
        #[source]
        source: std::io::Error,
    },

    #[error("anchor write conflict for {name:?}")]
    Conflict { name: String },

    #[error("{0}")]
    Multi(#[from] MultiError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub fn io(op: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            op: op.into(),
            source,
        }
    }

    pub fn corrupt(ref_: Ref, reason: impl Into<String>) -> Self {
        Error::CorruptBlob {
            ref_,
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Aggregate per-ref errors from `get_multi`/`put_multi`. Every input ref is
/// accounted for in either the caller's success map or this error's map —
/// never silently dropped.
#[derive(Debug, Default)]
pub struct MultiError {
    pub errors: HashMap<Ref, Error>,
}

impl std::fmt::Display for MultiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} of the operations failed", self.errors.len())
    }
}

impl std::error::Error for MultiError {}

pub type Result<T> = std::result::Result<T, Error>;
