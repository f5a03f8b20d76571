//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use rust_decimal::Decimal;
use thiserror::Error;

/// Which rolling window a limit violation hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    Daily,
    Monthly,
}

impl std::fmt::Display for LimitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitScope::Daily => write!(f, "daily"),
            LimitScope::Monthly => write!(f, "monthly"),
        }
    }
}

/// Business rule violations and domain invariant failures.
/// Independent of the web and storage layers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Insufficient balance for a debit (amount plus fee)
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    /// Account is frozen and cannot move money
    #[error("Account is frozen")]
    AccountFrozen,

    /// Invalid amount (zero, negative, out of range)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Beneficiary does not exist
    #[error("Beneficiary not found: {0}")]
    BeneficiaryNotFound(String),

    /// Beneficiary exists but is deactivated
    #[error("Beneficiary is not active: {0}")]
    BeneficiaryInactive(String),

    /// Beneficiary belongs to a different account owner
    #[error("Beneficiary does not belong to the requesting account")]
    BeneficiaryNotOwned,

    /// Transfer whose destination resolves to the source account
    #[error("Cannot transfer to the same account")]
    SameAccountTransfer,

    /// Single-transaction or rolling-window limit exceeded
    #[error("{scope} limit exceeded")]
    LimitExceeded { scope: LimitScope },

    /// Amount is outside the single-transaction bounds for this action
    #[error("Amount outside allowed bounds: {0}")]
    AmountOutOfBounds(String),

    /// Concurrent modification detected (optimistic locking)
    #[error("Version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: i64, found: i64 },

    /// Duplicate operation (idempotency)
    #[error("Duplicate operation: {key}")]
    DuplicateOperation { key: String },
}

impl DomainError {
    /// Create an insufficient funds error
    pub fn insufficient_funds(required: Decimal, available: Decimal) -> Self {
        Self::InsufficientFunds {
            required,
            available,
        }
    }

    /// Check if this is a client error (caller's fault, no retry)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InsufficientFunds { .. }
                | Self::AccountFrozen
                | Self::InvalidAmount(_)
                | Self::BeneficiaryNotFound(_)
                | Self::BeneficiaryInactive(_)
                | Self::BeneficiaryNotOwned
                | Self::SameAccountTransfer
                | Self::LimitExceeded { .. }
                | Self::AmountOutOfBounds(_)
        )
    }

    /// Check if this is a conflict error (retry may help)
    pub fn is_conflict_error(&self) -> bool {
        matches!(
            self,
            Self::VersionConflict { .. } | Self::DuplicateOperation { .. }
        )
    }
}
