//! Structured protocol error records.
//!
//! Errors visible to clients are data, not panics: a handler accumulates
//! [`ErrorRecord`]s and the router attaches them to the response under the
//! `errors` key. The `code` strings below are part of the wire protocol.

use std::fmt;

use crate::codec::Dict;

/// Protocol error kinds, rendered on the wire as their screaming-snake names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errors {
    /// Generic unrecoverable error: oversize body, missing form field,
    /// unexpected failure.
    Failure,
    /// The client public key could not be parsed.
    BadClientKey,
    /// Cryptographic or parameter mismatch: bad signature, nonce mismatch.
    BadValue,
    /// Unknown URI or unknown inner command.
    UnknownCommand,
    /// The backend failed while executing an authenticated command.
    CommandFailed,
}

impl Errors {
    pub fn as_str(&self) -> &'static str {
        match self {
            Errors::Failure => "FAILURE",
            Errors::BadClientKey => "BAD_CLIENT_KEY",
            Errors::BadValue => "BAD_VALUE",
            Errors::UnknownCommand => "UNKNOWN_COMMAND",
            Errors::CommandFailed => "COMMAND_FAILED",
        }
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured error: what failed (`code`), on which object, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub code: Errors,
    /// The parameter or entity the error refers to; empty for generic failures.
    pub object: String,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(code: Errors, object: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            object: object.into(),
            message: message.into(),
        }
    }

    /// Wire form: `{code, object, message}`.
    pub fn to_dict(&self) -> Dict {
        Dict::new()
            .with("code", self.code.as_str())
            .with("object", self.object.clone())
            .with("message", self.message.clone())
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}): {}", self.code, self.object, self.message)
    }
}
