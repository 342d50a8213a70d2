//! Domain error model.

use thiserror::Error;

/// Failure to parse a domain value.
///
/// Collaborator and scheduling failures live in `recurra-billing`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A currency code was not recognised.
    #[error("unknown currency: {0}")]
    UnknownCurrency(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
