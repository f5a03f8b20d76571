//! Limit Enforcement
//!
//! Single-transaction bounds plus rolling daily/monthly sums of COMPLETED
//! transactions per account and action type. The decision here is only a
//! snapshot; the ledger re-runs it against fresh state inside its commit
//! loop, which is what actually closes the concurrent-overspend race.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::{Amount, DomainError, LimitScope, TransactionType};
use crate::store::{StoreError, TransactionIndex};

/// Thresholds for one action type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLimits {
    /// Smallest allowed single transaction
    pub min_amount: Decimal,

    /// Largest allowed single transaction
    pub max_amount: Decimal,

    /// Rolling calendar-day cap
    pub daily_limit: Decimal,

    /// Rolling calendar-month cap
    pub monthly_limit: Decimal,

    /// Above this, the fraud engine weighs the amount heavily; not a hard
    /// block by itself
    pub high_risk_threshold: Decimal,
}

/// Per-action-type thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitPolicy {
    pub transfer_out: ActionLimits,
    pub receive: ActionLimits,
}

impl LimitPolicy {
    pub fn for_type(&self, tx_type: TransactionType) -> &ActionLimits {
        match tx_type {
            TransactionType::TransferOut => &self.transfer_out,
            // Inbound legs and receives share thresholds.
            TransactionType::TransferIn | TransactionType::Receive => &self.receive,
        }
    }
}

/// Outcome of a limit check.
#[derive(Debug, Clone, PartialEq)]
pub enum LimitDecision {
    Allowed,
    Denied { reason: DomainError },
}

impl LimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, LimitDecision::Allowed)
    }
}

/// Limit enforcement errors
#[derive(Debug, thiserror::Error)]
pub enum LimitError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Evaluates amounts against bounds and rolling windows.
pub struct LimitEnforcer {
    index: Arc<dyn TransactionIndex>,
    clock: Arc<dyn Clock>,
    policy: LimitPolicy,
}

impl LimitEnforcer {
    pub fn new(
        index: Arc<dyn TransactionIndex>,
        clock: Arc<dyn Clock>,
        policy: LimitPolicy,
    ) -> Self {
        Self {
            index,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    /// The high-risk threshold the fraud engine consults for this type.
    pub fn high_risk_threshold(&self, tx_type: TransactionType) -> Decimal {
        self.policy.for_type(tx_type).high_risk_threshold
    }

    /// Check a prospective transaction against bounds and windows.
    pub async fn check(
        &self,
        account_id: Uuid,
        tx_type: TransactionType,
        amount: &Amount,
    ) -> Result<LimitDecision, LimitError> {
        let limits = self.policy.for_type(tx_type);
        let value = amount.value();

        if value < limits.min_amount || value > limits.max_amount {
            return Ok(LimitDecision::Denied {
                reason: DomainError::AmountOutOfBounds(format!(
                    "{value} not in [{}, {}]",
                    limits.min_amount, limits.max_amount
                )),
            });
        }

        let now = self.clock.now();

        let daily_total = self
            .index
            .completed_total(account_id, tx_type, day_start(now))
            .await?;
        if daily_total + value > limits.daily_limit {
            tracing::info!(
                %account_id,
                tx_type = %tx_type,
                %daily_total,
                amount = %value,
                limit = %limits.daily_limit,
                "Daily limit exceeded"
            );
            return Ok(LimitDecision::Denied {
                reason: DomainError::LimitExceeded {
                    scope: LimitScope::Daily,
                },
            });
        }

        let monthly_total = self
            .index
            .completed_total(account_id, tx_type, month_start(now))
            .await?;
        if monthly_total + value > limits.monthly_limit {
            tracing::info!(
                %account_id,
                tx_type = %tx_type,
                %monthly_total,
                amount = %value,
                limit = %limits.monthly_limit,
                "Monthly limit exceeded"
            );
            return Ok(LimitDecision::Denied {
                reason: DomainError::LimitExceeded {
                    scope: LimitScope::Monthly,
                },
            });
        }

        Ok(LimitDecision::Allowed)
    }
}

/// Midnight UTC of the current day.
fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid");
    Utc.from_utc_datetime(&midnight)
}

/// Midnight UTC of the first of the current month.
fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let first = now
        .date_naive()
        .with_day(1)
        .expect("day one is always valid")
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid");
    Utc.from_utc_datetime(&first)
}
