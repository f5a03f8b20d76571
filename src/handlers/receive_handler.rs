//! Receive Handler
//!
//! Credits inbound deposits. Receives skip fraud scoring (money coming in)
//! but still pass the rate-limit gate and the ledger's limit checks.

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{Amount, OperationContext};
use crate::error::AppError;
use crate::ledger::LedgerEngine;
use crate::notify::{NotificationDispatcher, NotificationEvent, NotificationKind};
use crate::ratelimit::RateLimiter;

use super::{ReceiveCommand, ReceiveResult};

/// Handler for inbound deposits
pub struct ReceiveHandler {
    rate_limiter: Arc<RateLimiter>,
    ledger: Arc<LedgerEngine>,
    notifier: NotificationDispatcher,
    max_attempts: u32,
}

impl ReceiveHandler {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        ledger: Arc<LedgerEngine>,
        notifier: NotificationDispatcher,
        max_attempts: u32,
    ) -> Self {
        Self {
            rate_limiter,
            ledger,
            notifier,
            max_attempts,
        }
    }

    /// Execute the receive command.
    pub async fn execute(
        &self,
        command: ReceiveCommand,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<ReceiveResult, AppError> {
        let key = format!("receive:{}", command.account_id);

        if !self.rate_limiter.check_limit(&key, self.max_attempts).await? {
            let lockout_until = self.rate_limiter.lockout_time(&key).await?;
            return Err(AppError::RateLimited { lockout_until });
        }

        let amount: Amount = match command.amount.parse() {
            Ok(amount) => amount,
            Err(e) => {
                self.rate_limiter.increment(&key, self.max_attempts).await?;
                return Err(AppError::InvalidRequest(format!("Invalid amount: {e}")));
            }
        };

        let outcome = match self
            .ledger
            .apply_receive(
                command.account_id,
                amount,
                command.source_reference.clone(),
                context,
                idempotency_key,
            )
            .await
        {
            Ok(outcome) => {
                self.rate_limiter.reset_limit(&key).await?;
                outcome
            }
            Err(e) => {
                self.rate_limiter.increment(&key, self.max_attempts).await?;
                return Err(e.into());
            }
        };

        self.notifier.dispatch(NotificationEvent {
            kind: NotificationKind::ReceiveCompleted,
            account_id: command.account_id,
            amount: amount.value() - outcome.fee,
            fee: outcome.fee,
            status: outcome.status,
        });

        Ok(ReceiveResult {
            transaction_id: outcome.transaction_id,
            status: outcome.status,
            fee: outcome.fee,
        })
    }
}
