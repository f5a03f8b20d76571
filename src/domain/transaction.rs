//! Transaction records
//!
//! A Transaction is created once per logical money movement and never
//! mutated after reaching a terminal status. The signed amount equals the
//! balance delta it caused; the fee is recorded alongside it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of money movement a transaction represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Outbound transfer to a beneficiary (debit)
    TransferOut,

    /// Inbound leg of a transfer whose destination is an internal account (credit)
    TransferIn,

    /// Inbound deposit from an external source (credit)
    Receive,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::TransferOut => "transfer_out",
            TransactionType::TransferIn => "transfer_in",
            TransactionType::Receive => "receive",
        }
    }

    /// Whether transactions of this type debit the account.
    pub fn is_debit(&self) -> bool {
        matches!(self, TransactionType::TransferOut)
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction lifecycle. Completed and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The other side of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Counterparty {
    /// A saved beneficiary owned by the sending account
    Beneficiary { beneficiary_id: Uuid },

    /// Another internal account (the matching leg of an internal transfer)
    Account { account_id: Uuid },

    /// An external source reference (gateway, network)
    External { reference: String },
}

/// A single contributing signal in a risk assessment.
///
/// Factors are a closed set of tagged variants rather than loose metadata
/// so audits can rely on their shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "factor", rename_all = "snake_case")]
pub enum RiskFactor {
    AmountAboveHighRiskThreshold { amount: Decimal, threshold: Decimal },
    AmountAboveHistoricalAverage { amount: Decimal, average: Decimal },
    UntrustedDevice { device_id: String },
    UnfamiliarOrigin { origin: String },
    VelocityAboveBaseline { recent_count: u64, baseline: u64 },
    SuspiciousIp { ip: String },
}

/// Outcome of the risk decision policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskDecision {
    Allow,
    RequireVerification,
    Block,
}

/// Risk assessment embedded in a transaction for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetadata {
    /// Score 0-100
    pub score: u8,

    /// Signals that contributed to the score
    pub factors: Vec<RiskFactor>,

    /// The decision the policy produced
    pub decision: RiskDecision,
}

/// A single money movement against one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,

    /// The account whose balance this transaction changed
    pub account_id: Uuid,

    /// The other side of the movement
    pub counterparty: Counterparty,

    /// Signed amount: equals the balance delta this transaction caused.
    /// Negative for debits (includes the fee), positive for credits
    /// (net of the fee).
    pub amount: Decimal,

    /// Fee charged on this transaction
    pub fee: Decimal,

    #[serde(rename = "type")]
    pub tx_type: TransactionType,

    pub status: TransactionStatus,

    /// Risk assessment captured at apply time, if one ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskMetadata>,

    /// Device that initiated the operation, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// The pre-fee amount the caller asked to move.
    ///
    /// For a debit the signed amount is -(principal + fee); for a credit it
    /// is +(principal - fee), except the internal transfer-in leg which
    /// carries no fee.
    pub fn principal(&self) -> Decimal {
        if self.amount < Decimal::ZERO {
            -self.amount - self.fee
        } else {
            self.amount + self.fee
        }
    }

    /// Whether the signed amount reconciles with the recorded fee and type.
    pub fn reconciles(&self) -> bool {
        if self.tx_type.is_debit() {
            self.amount < Decimal::ZERO
        } else {
            self.amount >= Decimal::ZERO
        }
    }
}
