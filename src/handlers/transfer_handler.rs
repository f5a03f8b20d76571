//! Transfer Handler
//!
//! Orchestrates an outbound transfer through the full control flow:
//! rate-limit gate, limit check, fraud scoring (with device trust and
//! step-up sessions), the atomic ledger apply, and the asynchronous
//! notification. A failure at any stage aborts before the ledger mutation;
//! only the ledger stage produces durable state.

use std::sync::Arc;
use uuid::Uuid;

use crate::device::DeviceTrustManager;
use crate::domain::{Amount, OperationContext, TransactionType};
use crate::error::AppError;
use crate::ledger::LedgerEngine;
use crate::limits::{LimitDecision, LimitEnforcer};
use crate::notify::{NotificationDispatcher, NotificationEvent, NotificationKind};
use crate::ratelimit::RateLimiter;
use crate::risk::{RiskEngine, TransactionProbe};
use crate::store::TransactionIndex;

use super::{TransferCommand, TransferResult};

/// Handler for outbound transfers
pub struct TransferHandler {
    rate_limiter: Arc<RateLimiter>,
    limits: Arc<LimitEnforcer>,
    risk: Arc<RiskEngine>,
    devices: Arc<DeviceTrustManager>,
    ledger: Arc<LedgerEngine>,
    index: Arc<dyn TransactionIndex>,
    notifier: NotificationDispatcher,
    max_attempts: u32,
}

impl TransferHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        limits: Arc<LimitEnforcer>,
        risk: Arc<RiskEngine>,
        devices: Arc<DeviceTrustManager>,
        ledger: Arc<LedgerEngine>,
        index: Arc<dyn TransactionIndex>,
        notifier: NotificationDispatcher,
        max_attempts: u32,
    ) -> Self {
        Self {
            rate_limiter,
            limits,
            risk,
            devices,
            ledger,
            index,
            notifier,
            max_attempts,
        }
    }

    /// Execute the transfer command.
    pub async fn execute(
        &self,
        command: TransferCommand,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<TransferResult, AppError> {
        let key = format!("transfer:{}", command.account_id);

        if !self.rate_limiter.check_limit(&key, self.max_attempts).await? {
            let lockout_until = self.rate_limiter.lockout_time(&key).await?;
            return Err(AppError::RateLimited { lockout_until });
        }

        match self.run(&command, idempotency_key, context).await {
            Ok(result) => {
                // Success clears the counter; failures accumulate toward
                // lockout (the asymmetry is deliberate).
                self.rate_limiter.reset_limit(&key).await?;
                Ok(result)
            }
            Err(e) => {
                self.rate_limiter.increment(&key, self.max_attempts).await?;
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        command: &TransferCommand,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<TransferResult, AppError> {
        let amount: Amount = command
            .amount
            .parse()
            .map_err(|e| AppError::InvalidRequest(format!("Invalid amount: {e}")))?;

        // Register the device sighting before scoring so first-sight
        // devices exist in PENDING_VERIFICATION.
        if let Some(device_id) = &context.device_id {
            self.devices
                .observe(device_id, command.account_id, context.origin().as_deref())
                .await?;
        }

        // Fast-fail snapshot check; the ledger re-runs it under the
        // version guard before committing.
        if let LimitDecision::Denied { reason } = self
            .limits
            .check(command.account_id, TransactionType::TransferOut, &amount)
            .await?
        {
            return Err(reason.into());
        }

        let assessment = self
            .risk
            .check_transaction(&TransactionProbe {
                account_id: command.account_id,
                amount,
                tx_type: TransactionType::TransferOut,
                device_id: context.device_id.clone(),
                ip: context.client_ip,
                location: context.location.clone(),
            })
            .await;

        if !assessment.is_allowed {
            return Err(AppError::FraudBlocked);
        }
        if assessment.requires_verification && !self.step_up_satisfied(command, context).await? {
            return Err(AppError::VerificationRequired);
        }

        let outcome = self
            .ledger
            .apply_transfer(
                command.account_id,
                command.beneficiary_id,
                amount,
                Some(assessment.metadata()),
                context,
                idempotency_key,
            )
            .await?;

        // Post-commit bookkeeping is best-effort; the transfer is final.
        if let Some(origin) = context.origin() {
            if let Err(e) = self.index.record_origin(command.account_id, &origin).await {
                tracing::warn!(error = %e, "Failed to record transfer origin");
            }
        }

        self.notifier.dispatch(NotificationEvent {
            kind: NotificationKind::TransferCompleted,
            account_id: command.account_id,
            amount: -(amount.value() + outcome.fee),
            fee: outcome.fee,
            status: outcome.status,
        });

        Ok(TransferResult {
            transaction_id: outcome.transaction_id,
            status: outcome.status,
            fee: outcome.fee,
        })
    }

    /// A step-up requirement is satisfied by a live session bound to this
    /// account and device. An expired session is simply absent.
    async fn step_up_satisfied(
        &self,
        command: &TransferCommand,
        context: &OperationContext,
    ) -> Result<bool, AppError> {
        let token = match &context.session_token {
            Some(token) => token,
            None => return Ok(false),
        };
        let session = match self.devices.session(token).await? {
            Some(session) => session,
            None => return Ok(false),
        };
        if session.account_id != command.account_id {
            return Ok(false);
        }
        if let Some(device_id) = &context.device_id {
            if &session.device_id != device_id {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
