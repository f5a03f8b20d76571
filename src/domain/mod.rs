//! Domain module
//!
//! Core domain types for money movement: validated amounts and balances,
//! fee schedules, transaction records, and the operation context threaded
//! through every request.

pub mod amount;
pub mod context;
pub mod error;
pub mod fees;
pub mod transaction;

pub use amount::{Amount, AmountError, Balance};
pub use context::OperationContext;
pub use error::{DomainError, LimitScope};
pub use fees::FeeSchedule;
pub use transaction::{
    Counterparty, RiskDecision, RiskFactor, RiskMetadata, Transaction, TransactionStatus,
    TransactionType,
};
