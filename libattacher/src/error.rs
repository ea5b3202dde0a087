//! Error types.
//!
//! All failures in `libattacher` are represented by [`CsiError`].  Attach and
//! detach failures are additionally wrapped in [`VolumeOpError`], which adds
//! the final/transient classification the caller needs to decide whether the
//! volume can be forgotten.

use thiserror::Error;

use crate::classify::ErrorClass;
use crate::status::{Code, Status};

/// Unified error type for driver connection operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CsiError {
    /// The driver endpoint address could not be parsed or resolved.
    #[error("invalid driver address {0:?}")]
    InvalidAddress(String),

    /// The connection to the driver could not be established or broke.
    #[error("transport error: {0}")]
    Transport(String),

    /// Connection configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The driver answered `GetPluginInfo` successfully but with no name.
    #[error("driver name is empty")]
    EmptyDriverName,

    /// The connection was closed before the operation was issued.
    #[error("connection is closed")]
    ConnectionClosed,

    /// The driver (or the call deadline) failed the RPC.
    #[error("rpc failed: {0}")]
    Remote(Status),
}

impl CsiError {
    /// Create a [`CsiError::Transport`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }

    /// Create a [`CsiError::Config`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    /// The status code this error is classified by.
    ///
    /// Locally synthesized errors map onto the code a remote peer would have
    /// used for the same situation.
    pub fn code(&self) -> Code {
        match self {
            Self::Remote(status) => status.code(),
            Self::InvalidAddress(_) | Self::Config(_) => Code::InvalidArgument,
            Self::Transport(_) | Self::ConnectionClosed => Code::Unavailable,
            Self::EmptyDriverName => Code::Internal,
        }
    }

    /// The remote status, if the driver produced one.
    pub fn status(&self) -> Option<&Status> {
        match self {
            Self::Remote(status) => Some(status),
            _ => None,
        }
    }
}

impl From<Status> for CsiError {
    fn from(status: Status) -> Self {
        Self::Remote(status)
    }
}

/// A failed attach or detach, together with its classification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{source} ({class})")]
pub struct VolumeOpError {
    class: ErrorClass,
    source: CsiError,
}

impl VolumeOpError {
    pub(crate) fn new(class: ErrorClass, source: CsiError) -> Self {
        Self { class, source }
    }

    /// Whether the volume may be treated as detached.
    ///
    /// `true` only for final errors: the driver has proven the volume is not
    /// (and will not become) attached through this call.
    pub fn detached(&self) -> bool {
        self.class.is_final()
    }

    pub fn class(&self) -> ErrorClass {
        self.class
    }

    /// The underlying error.
    pub fn error(&self) -> &CsiError {
        &self.source
    }
}
