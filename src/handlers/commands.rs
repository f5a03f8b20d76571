//! Command definitions
//!
//! Commands represent intentions to move money. Results carry exactly what
//! the caller needs: the committed transaction, its status, and the fee.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::TransactionStatus;

/// Command to transfer money to a saved beneficiary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCommand {
    /// Source account
    pub account_id: Uuid,

    /// Saved beneficiary to pay
    pub beneficiary_id: Uuid,

    /// Amount to transfer (as string for precise decimal)
    pub amount: String,
}

impl TransferCommand {
    pub fn new(account_id: Uuid, beneficiary_id: Uuid, amount: String) -> Self {
        Self {
            account_id,
            beneficiary_id,
            amount,
        }
    }
}

/// Command to credit an inbound deposit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveCommand {
    /// Account to credit
    pub account_id: Uuid,

    /// Amount received (as string for precise decimal)
    pub amount: String,

    /// Where the money came from (gateway reference)
    pub source_reference: String,
}

impl ReceiveCommand {
    pub fn new(account_id: Uuid, amount: String, source_reference: String) -> Self {
        Self {
            account_id,
            amount,
            source_reference,
        }
    }
}

/// Result of a committed transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResult {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub fee: Decimal,
}

/// Result of a committed receive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveResult {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub fee: Decimal,
}
