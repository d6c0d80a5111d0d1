// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for realm discovery.
//!
//! Errors fall into three groups that the orchestrator treats differently:
//!
//! ```text
//! absence of data   NotFound, TemporaryFailure, NoSuchObject, TimedOut,
//!                   Io(refused | unreachable | timed out)
//!                   -> diagnostic only, the candidate found nothing
//! cancellation      Cancelled
//!                   -> wins over everything once observed
//! everything else   Ldap, Protocol, Tls, Certificate, Resolve, Io(other) ...
//!                   -> error of record if no candidate succeeds
//! ```

use std::io;
use thiserror::Error;

use crate::ldap::result as ldap_result;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Discovery error.
///
/// `Clone` so a single verdict can be handed to every caller waiting on
/// the same in-flight discovery.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Operation was cancelled")]
    Cancelled,

    #[error("No DNS records found for {0}")]
    NotFound(String),

    #[error("Temporary failure in name resolution: {0}")]
    TemporaryFailure(String),

    #[error("DNS resolution failed: {0}")]
    Resolve(String),

    #[error("LDAP error {code}: {message}")]
    Ldap { code: u32, message: String },

    #[error("{0}")]
    NoSuchObject(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("I/O error: {message}")]
    Io { kind: io::ErrorKind, message: String },

    #[error("Timed out: {0}")]
    TimedOut(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build an error from an LDAP result code.
    ///
    /// `noSuchObject` (32) maps to [`Error::NoSuchObject`] so callers can
    /// treat it as absence of data.
    pub fn ldap(code: u32, context: impl Into<String>) -> Self {
        let context = context.into();
        if code == ldap_result::NO_SUCH_OBJECT {
            return Self::NoSuchObject(if context.is_empty() {
                ldap_result::describe(code).to_string()
            } else {
                context
            });
        }
        let message = if context.is_empty() {
            ldap_result::describe(code).to_string()
        } else {
            format!("{} ({})", ldap_result::describe(code), context)
        };
        Self::Ldap { code, message }
    }

    /// True for errors that only mean "this strategy found nothing".
    pub fn is_absence(&self) -> bool {
        match self {
            Self::NotFound(_) | Self::TemporaryFailure(_) | Self::NoSuchObject(_) => true,
            Self::TimedOut(_) => true,
            Self::Io { kind, .. } => matches!(
                kind,
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::HostUnreachable
                    | io::ErrorKind::NetworkUnreachable
            ),
            _ => false,
        }
    }

    /// True if this is a cancellation error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::TimedOut("operation did not complete in time".into())
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Self::Tls(e.to_string())
    }
}

impl From<crate::config::ConfigError> for Error {
    fn from(e: crate::config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
