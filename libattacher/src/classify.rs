//! Final / transient classification of failed volume operations.
//!
//! A failed attach or detach is **final** when the status code proves the
//! operation did not happen and cannot happen by repeating the same call: the
//! caller may forget the volume.  Anything else is **transient**: the outcome
//! is unknown and the volume must be assumed attached until a retry succeeds.
//!
//! Only codes on an explicit allow-list are final.  The default list is
//! [`DEFAULT_FINAL_CODES`]; it can be replaced through
//! [`ConnectionConfig::final_codes`](crate::config::ConnectionConfig::final_codes).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CsiError;
use crate::status::Code;

/// Codes treated as final unless configured otherwise.
///
/// * `NotFound` — the volume or node does not exist.
/// * `InvalidArgument` — the request itself is malformed.
/// * `Unimplemented` — the driver does not support the RPC.
pub const DEFAULT_FINAL_CODES: [Code; 3] =
    [Code::NotFound, Code::InvalidArgument, Code::Unimplemented];

/// Classification of a failed attach/detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The operation is known not to have succeeded; retrying cannot change that.
    Final,
    /// The outcome is unknown; retry later.
    Transient,
}

impl ErrorClass {
    pub fn is_final(self) -> bool {
        self == ErrorClass::Final
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Final => f.write_str("final"),
            Self::Transient => f.write_str("transient"),
        }
    }
}

/// The allow-list of final status codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FinalCodes(BTreeSet<Code>);

impl FinalCodes {
    /// Build an allow-list from exactly the given codes.
    pub fn new(codes: impl IntoIterator<Item = Code>) -> Self {
        Self(codes.into_iter().collect())
    }

    pub fn contains(&self, code: Code) -> bool {
        self.0.contains(&code)
    }

    pub fn iter(&self) -> impl Iterator<Item = Code> + '_ {
        self.0.iter().copied()
    }

    pub fn classify(&self, code: Code) -> ErrorClass {
        if self.contains(code) {
            ErrorClass::Final
        } else {
            ErrorClass::Transient
        }
    }

    /// Classify any crate error through its status code.
    pub fn classify_error(&self, err: &CsiError) -> ErrorClass {
        self.classify(err.code())
    }
}

impl Default for FinalCodes {
    fn default() -> Self {
        Self::new(DEFAULT_FINAL_CODES)
    }
}
