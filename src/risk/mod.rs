//! Fraud Risk Engine
//!
//! Scores a prospective transaction from independent signals: amount vs.
//! the high-risk threshold and the account's history, device trust,
//! origin familiarity, velocity, and suspicious-IP membership. Each signal
//! adds a configured weight to a 0-100 score; thresholds turn the score
//! into allow / verify / block.
//!
//! The factor breakdown is logged internally only. Callers never see why a
//! transaction was blocked, just that it was.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::device::{DeviceError, DeviceTrustManager};
use crate::domain::{Amount, RiskDecision, RiskFactor, RiskMetadata, TransactionType};
use crate::limits::LimitPolicy;
use crate::store::{StoreError, TransactionIndex};

/// What to do when risk inputs are unavailable. Always an explicit
/// configuration decision, never an implicit default at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFailPolicy {
    /// Allow the transaction with a zero score
    FailOpen,

    /// Block the transaction
    FailClosed,
}

impl std::str::FromStr for RiskFailPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail_open" => Ok(RiskFailPolicy::FailOpen),
            "fail_closed" => Ok(RiskFailPolicy::FailClosed),
            other => Err(format!("unknown risk fail policy: {other}")),
        }
    }
}

/// Score contribution per signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskWeights {
    pub high_amount: u8,
    pub above_average: u8,
    pub untrusted_device: u8,
    pub unfamiliar_origin: u8,
    pub velocity: u8,
    pub suspicious_ip: u8,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            high_amount: 30,
            above_average: 20,
            untrusted_device: 25,
            unfamiliar_origin: 15,
            velocity: 20,
            suspicious_ip: 40,
        }
    }
}

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct RiskParams {
    pub weights: RiskWeights,

    /// Score at or above which verification is required
    pub verify_threshold: u8,

    /// Score at or above which the transaction is blocked
    pub block_threshold: u8,

    /// Window for the velocity signal
    pub velocity_window: chrono::Duration,

    /// Transactions per window considered normal
    pub velocity_baseline: u64,

    /// Amount must exceed average * multiplier to trip the history signal
    pub average_multiplier: Decimal,

    pub suspicious_ips: HashSet<IpAddr>,

    pub fail_policy: RiskFailPolicy,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            weights: RiskWeights::default(),
            verify_threshold: 40,
            block_threshold: 70,
            velocity_window: chrono::Duration::minutes(10),
            velocity_baseline: 5,
            average_multiplier: Decimal::from(3),
            suspicious_ips: HashSet::new(),
            fail_policy: RiskFailPolicy::FailClosed,
        }
    }
}

/// A prospective transaction to score.
#[derive(Debug, Clone)]
pub struct TransactionProbe {
    pub account_id: Uuid,
    pub amount: Amount,
    pub tx_type: TransactionType,
    pub device_id: Option<String>,
    pub ip: Option<IpAddr>,
    pub location: Option<String>,
}

impl TransactionProbe {
    fn origin(&self) -> Option<String> {
        self.location
            .clone()
            .or_else(|| self.ip.map(|ip| ip.to_string()))
    }
}

/// The scoring outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub is_allowed: bool,
    pub requires_verification: bool,
    pub risk_score: u8,
    pub decision: RiskDecision,
    pub factors: Vec<RiskFactor>,
}

impl RiskAssessment {
    fn from_score(score: u8, factors: Vec<RiskFactor>, params: &RiskParams) -> Self {
        let decision = if score >= params.block_threshold {
            RiskDecision::Block
        } else if score >= params.verify_threshold {
            RiskDecision::RequireVerification
        } else {
            RiskDecision::Allow
        };
        Self {
            is_allowed: decision != RiskDecision::Block,
            requires_verification: decision == RiskDecision::RequireVerification,
            risk_score: score,
            decision,
            factors,
        }
    }

    /// Audit payload embedded in the transaction record.
    pub fn metadata(&self) -> RiskMetadata {
        RiskMetadata {
            score: self.risk_score,
            factors: self.factors.clone(),
            decision: self.decision,
        }
    }
}

/// Internal scoring failures, resolved by the fail policy.
#[derive(Debug, thiserror::Error)]
enum RiskError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

/// Scores prospective transactions.
pub struct RiskEngine {
    index: Arc<dyn TransactionIndex>,
    devices: Arc<DeviceTrustManager>,
    clock: Arc<dyn Clock>,
    limit_policy: LimitPolicy,
    params: RiskParams,
}

impl RiskEngine {
    pub fn new(
        index: Arc<dyn TransactionIndex>,
        devices: Arc<DeviceTrustManager>,
        clock: Arc<dyn Clock>,
        limit_policy: LimitPolicy,
        params: RiskParams,
    ) -> Self {
        Self {
            index,
            devices,
            clock,
            limit_policy,
            params,
        }
    }

    /// Score a prospective transaction and apply the decision policy.
    ///
    /// Never returns an error: if scoring inputs are unavailable the
    /// configured fail policy decides, and the failure is logged.
    pub async fn check_transaction(&self, probe: &TransactionProbe) -> RiskAssessment {
        match self.score(probe).await {
            Ok(assessment) => {
                if assessment.decision != RiskDecision::Allow {
                    // Full breakdown stays internal; callers get a generic
                    // error only.
                    tracing::warn!(
                        account_id = %probe.account_id,
                        score = assessment.risk_score,
                        decision = ?assessment.decision,
                        factors = ?assessment.factors,
                        "Risk policy triggered"
                    );
                }
                assessment
            }
            Err(e) => {
                tracing::error!(
                    account_id = %probe.account_id,
                    error = %e,
                    policy = ?self.params.fail_policy,
                    "Risk scoring unavailable, applying fail policy"
                );
                match self.params.fail_policy {
                    RiskFailPolicy::FailOpen => RiskAssessment {
                        is_allowed: true,
                        requires_verification: false,
                        risk_score: 0,
                        decision: RiskDecision::Allow,
                        factors: Vec::new(),
                    },
                    RiskFailPolicy::FailClosed => RiskAssessment {
                        is_allowed: false,
                        requires_verification: false,
                        risk_score: 100,
                        decision: RiskDecision::Block,
                        factors: Vec::new(),
                    },
                }
            }
        }
    }

    async fn score(&self, probe: &TransactionProbe) -> Result<RiskAssessment, RiskError> {
        let weights = &self.params.weights;
        let mut factors = Vec::new();
        let mut score: u32 = 0;
        let amount = probe.amount.value();

        let threshold = self.limit_policy.for_type(probe.tx_type).high_risk_threshold;
        if amount > threshold {
            score += weights.high_amount as u32;
            factors.push(RiskFactor::AmountAboveHighRiskThreshold { amount, threshold });
        }

        if let Some(average) = self.index.average_principal(probe.account_id).await? {
            if average > Decimal::ZERO && amount > average * self.params.average_multiplier {
                score += weights.above_average as u32;
                factors.push(RiskFactor::AmountAboveHistoricalAverage { amount, average });
            }
        }

        let device_trusted = match &probe.device_id {
            Some(device_id) => self.devices.is_device_trusted(device_id).await?,
            None => false,
        };
        if !device_trusted {
            score += weights.untrusted_device as u32;
            factors.push(RiskFactor::UntrustedDevice {
                device_id: probe
                    .device_id
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            });
        }

        if let Some(origin) = probe.origin() {
            if !self.index.is_known_origin(probe.account_id, &origin).await? {
                score += weights.unfamiliar_origin as u32;
                factors.push(RiskFactor::UnfamiliarOrigin { origin });
            }
        }

        let since = self.clock.now() - self.params.velocity_window;
        let recent_count = self.index.recent_count(probe.account_id, since).await?;
        if recent_count > self.params.velocity_baseline {
            score += weights.velocity as u32;
            factors.push(RiskFactor::VelocityAboveBaseline {
                recent_count,
                baseline: self.params.velocity_baseline,
            });
        }

        if let Some(ip) = probe.ip {
            if self.params.suspicious_ips.contains(&ip) {
                score += weights.suspicious_ip as u32;
                factors.push(RiskFactor::SuspiciousIp { ip: ip.to_string() });
            }
        }

        let score = score.min(100) as u8;
        Ok(RiskAssessment::from_score(score, factors, &self.params))
    }
}
