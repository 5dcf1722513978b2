//! Domain error model.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::id::{EntryId, UnitId};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. duplicate creation).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The unit graph cannot relate the requested units for this product.
    ///
    /// Recoverable: advisory views may fall back to a factor of 1, ledger
    /// mutations must reject the operation.
    #[error("no conversion path from unit {from} to unit {to}")]
    NoConversionPath { from: UnitId, to: UnitId },

    /// Requested consumption exceeds the available eligible amount.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        requested: Decimal,
        available: Decimal,
    },

    /// The ledger entry was already reversed.
    #[error("entry {0} is already undone")]
    AlreadyUndone(EntryId),

    /// The ledger entry is not independently reversible.
    #[error("entry cannot be undone: {0}")]
    CannotUndo(String),

    /// The conversion rule set contains a resolvable cycle.
    ///
    /// A configuration error: rule authors should be constrained so this never
    /// occurs, but it is checked and reported rather than mis-resolved.
    #[error("conversion cycle detected: {0}")]
    CycleDetected(String),

    /// Lock contention on a product stream (retryable).
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn cannot_undo(msg: impl Into<String>) -> Self {
        Self::CannotUndo(msg.into())
    }

    pub fn cycle(msg: impl Into<String>) -> Self {
        Self::CycleDetected(msg.into())
    }

    pub fn concurrent(msg: impl Into<String>) -> Self {
        Self::ConcurrentModification(msg.into())
    }
}
