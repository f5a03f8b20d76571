//! Configuration module
//!
//! Loads configuration from environment variables. Every tunable the
//! engines consume (fee schedules, limit thresholds, risk thresholds and
//! policy, trust and session windows, rate-limit windows) lives here with
//! a production default.

use rust_decimal::Decimal;
use std::collections::HashSet;
use std::env;
use std::net::IpAddr;
use std::str::FromStr;

use crate::domain::FeeSchedule;
use crate::ledger::FeePolicy;
use crate::limits::{ActionLimits, LimitPolicy};
use crate::risk::{RiskFailPolicy, RiskParams, RiskWeights};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Database connection URL; absent means the in-memory stores
    pub database_url: Option<String>,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Fee schedule for outbound transfers (base:rate:min:max)
    pub transfer_fees: FeeSchedule,

    /// Fee schedule for receives (base:rate:min:max)
    pub receive_fees: FeeSchedule,

    /// Thresholds for outbound transfers
    pub transfer_limits: ActionLimits,

    /// Thresholds for receives
    pub receive_limits: ActionLimits,

    /// Risk score at which step-up verification is required
    pub risk_verify_threshold: u8,

    /// Risk score at which the transaction is blocked
    pub risk_block_threshold: u8,

    /// Behavior when risk inputs are unavailable
    pub risk_fail_policy: RiskFailPolicy,

    /// Velocity window in seconds
    pub risk_velocity_window_secs: i64,

    /// Transactions per velocity window considered normal
    pub risk_velocity_baseline: u64,

    /// Known-suspicious IPs
    pub risk_suspicious_ips: HashSet<IpAddr>,

    /// Days a verified device stays trusted
    pub device_trust_days: i64,

    /// Minutes a step-up session stays valid
    pub session_ttl_minutes: i64,

    /// Rate-limit counting window in seconds
    pub rate_limit_window_secs: i64,

    /// Lockout duration in seconds once a key exceeds its attempts
    pub rate_limit_lockout_secs: i64,

    /// Attempts allowed per window for money-moving operations
    pub rate_limit_max_attempts: u32,

    /// Requests allowed per window per caller at the API edge
    pub api_rate_limit: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_env("PORT", "3000")?;
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let database_url = env::var("DATABASE_URL").ok();
        let database_max_connections = parse_env("DATABASE_MAX_CONNECTIONS", "10")?;

        let transfer_fees = parse_env("TRANSFER_FEE_SCHEDULE", "0:0.01:1:50")?;
        let receive_fees = parse_env("RECEIVE_FEE_SCHEDULE", "0:0.005:0:25")?;

        let transfer_limits = ActionLimits {
            min_amount: parse_env("TRANSFER_MIN_AMOUNT", "1")?,
            max_amount: parse_env("TRANSFER_MAX_AMOUNT", "25000")?,
            daily_limit: parse_env("TRANSFER_DAILY_LIMIT", "5000")?,
            monthly_limit: parse_env("TRANSFER_MONTHLY_LIMIT", "50000")?,
            high_risk_threshold: parse_env("TRANSFER_HIGH_RISK_THRESHOLD", "10000")?,
        };
        let receive_limits = ActionLimits {
            min_amount: parse_env("RECEIVE_MIN_AMOUNT", "0.01")?,
            max_amount: parse_env("RECEIVE_MAX_AMOUNT", "50000")?,
            daily_limit: parse_env("RECEIVE_DAILY_LIMIT", "20000")?,
            monthly_limit: parse_env("RECEIVE_MONTHLY_LIMIT", "200000")?,
            high_risk_threshold: parse_env("RECEIVE_HIGH_RISK_THRESHOLD", "15000")?,
        };

        let risk_fail_policy = env::var("RISK_FAIL_POLICY")
            .unwrap_or_else(|_| "fail_closed".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("RISK_FAIL_POLICY"))?;

        let risk_suspicious_ips = parse_ip_list("RISK_SUSPICIOUS_IPS")?;

        Ok(Self {
            host,
            port,
            environment,
            database_url,
            database_max_connections,
            transfer_fees,
            receive_fees,
            transfer_limits,
            receive_limits,
            risk_verify_threshold: parse_env("RISK_VERIFY_THRESHOLD", "40")?,
            risk_block_threshold: parse_env("RISK_BLOCK_THRESHOLD", "70")?,
            risk_fail_policy,
            risk_velocity_window_secs: parse_env("RISK_VELOCITY_WINDOW_SECS", "600")?,
            risk_velocity_baseline: parse_env("RISK_VELOCITY_BASELINE", "5")?,
            risk_suspicious_ips,
            device_trust_days: parse_env("DEVICE_TRUST_DAYS", "30")?,
            session_ttl_minutes: parse_env("SESSION_TTL_MINUTES", "30")?,
            rate_limit_window_secs: parse_env("RATE_LIMIT_WINDOW_SECS", "900")?,
            rate_limit_lockout_secs: parse_env("RATE_LIMIT_LOCKOUT_SECS", "1800")?,
            rate_limit_max_attempts: parse_env("RATE_LIMIT_MAX_ATTEMPTS", "5")?,
            api_rate_limit: parse_env("API_RATE_LIMIT_PER_WINDOW", "100")?,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Fee schedules as the ledger consumes them.
    pub fn fee_policy(&self) -> FeePolicy {
        FeePolicy {
            transfer: self.transfer_fees.clone(),
            receive: self.receive_fees.clone(),
        }
    }

    /// Limit thresholds as the enforcer consumes them.
    pub fn limit_policy(&self) -> LimitPolicy {
        LimitPolicy {
            transfer_out: self.transfer_limits.clone(),
            receive: self.receive_limits.clone(),
        }
    }

    /// Risk tunables as the engine consumes them.
    pub fn risk_params(&self) -> RiskParams {
        RiskParams {
            weights: RiskWeights::default(),
            verify_threshold: self.risk_verify_threshold,
            block_threshold: self.risk_block_threshold,
            velocity_window: chrono::Duration::seconds(self.risk_velocity_window_secs),
            velocity_baseline: self.risk_velocity_baseline,
            average_multiplier: Decimal::from(3),
            suspicious_ips: self.risk_suspicious_ips.clone(),
            fail_policy: self.risk_fail_policy,
        }
    }
}

/// Read an env var with a default and parse it.
fn parse_env<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name))
}

/// Parse a comma-separated IP list.
fn parse_ip_list(name: &'static str) -> Result<HashSet<IpAddr>, ConfigError> {
    let raw = match env::var(name) {
        Ok(raw) => raw,
        Err(_) => return Ok(HashSet::new()),
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|_| ConfigError::InvalidValue(name)))
        .collect()
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
