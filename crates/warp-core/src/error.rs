use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};
use thiserror::Error;

use crate::image::AddrSpace;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{space} address {address:#x} is outside all mapped sections")]
    OutOfRange { address: u32, space: AddrSpace },

    #[error("Read of {size} bytes at physical offset {offset:#x} exceeds the image")]
    ReadOutOfBounds { offset: u32, size: usize },

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("{0}")]
    AnchorNotFound(String),

    #[error("{0}")]
    PatternNotFound(String),

    #[error("{0}")]
    PostconditionMissing(String),

    #[error("dependency failed: {0}")]
    DependencyFailure(ResolveError),

    #[error("{0} is already being resolved (dependency cycle)")]
    CyclicDependency(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], used in reports.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
pub enum FailureKind {
    AnchorNotFound,
    PatternNotFound,
    PostconditionMissing,
    DependencyFailure,
    OutOfRange,
    CyclicDependency,
    Other,
}

impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::AnchorNotFound(_) => FailureKind::AnchorNotFound,
            Error::PatternNotFound(_) => FailureKind::PatternNotFound,
            Error::PostconditionMissing(_) => FailureKind::PostconditionMissing,
            Error::DependencyFailure(_) => FailureKind::DependencyFailure,
            Error::OutOfRange { .. } | Error::ReadOutOfBounds { .. } => FailureKind::OutOfRange,
            Error::CyclicDependency(_) => FailureKind::CyclicDependency,
            _ => FailureKind::Other,
        }
    }

    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

impl From<ResolveError> for Error {
    fn from(err: ResolveError) -> Self {
        Error::DependencyFailure(err)
    }
}

#[derive(Debug)]
struct Failure {
    resolver: &'static str,
    error: Error,
}

/// The permanent failure of one resolver.
///
/// Cloning shares the same underlying failure, so every replay of a failed
/// `load` hands out the object produced by the first attempt.
#[derive(Debug, Clone)]
pub struct ResolveError(Arc<Failure>);

impl ResolveError {
    pub fn new(resolver: &'static str, error: Error) -> Self {
        Self(Arc::new(Failure { resolver, error }))
    }

    pub fn resolver(&self) -> &'static str {
        self.0.resolver
    }

    pub fn error(&self) -> &Error {
        &self.0.error
    }

    pub fn kind(&self) -> FailureKind {
        self.0.error.kind()
    }

    /// Walks `DependencyFailure` links down to the failure that started the chain.
    pub fn root_cause(&self) -> &ResolveError {
        match &self.0.error {
            Error::DependencyFailure(inner) => inner.root_cause(),
            _ => self,
        }
    }

    pub fn ptr_eq(&self, other: &ResolveError) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.0.resolver, self.0.error)
    }
}

impl std::error::Error for ResolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0.error)
    }
}
