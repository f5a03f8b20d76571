//! Fee schedules
//!
//! A fee schedule turns a transaction amount into a fee via
//! `clamp(base + rate * amount, min_fee, max_fee)`. Transfers and receives
//! carry distinct schedules, parameterized in configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::Amount;

/// Fee parameters for one transaction type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Flat component charged on every transaction
    pub base: Decimal,

    /// Proportional component (e.g. 0.01 = 1% of the amount)
    pub rate: Decimal,

    /// Lower clamp for the computed fee
    pub min_fee: Decimal,

    /// Upper clamp for the computed fee
    pub max_fee: Decimal,
}

impl FeeSchedule {
    /// Build a schedule, rejecting inverted clamps and negative parameters.
    pub fn new(
        base: Decimal,
        rate: Decimal,
        min_fee: Decimal,
        max_fee: Decimal,
    ) -> Result<Self, FeeScheduleError> {
        if base < Decimal::ZERO || rate < Decimal::ZERO || min_fee < Decimal::ZERO {
            return Err(FeeScheduleError::NegativeParameter);
        }
        if min_fee > max_fee {
            return Err(FeeScheduleError::InvertedClamp { min_fee, max_fee });
        }
        Ok(Self {
            base,
            rate,
            min_fee,
            max_fee,
        })
    }

    /// A schedule that always yields a zero fee.
    pub fn free() -> Self {
        Self {
            base: Decimal::ZERO,
            rate: Decimal::ZERO,
            min_fee: Decimal::ZERO,
            max_fee: Decimal::ZERO,
        }
    }

    /// Compute the fee for an amount.
    ///
    /// The result is rounded to 2 decimal places (banker's rounding) before
    /// clamping so the fee is always representable in minor currency units.
    /// Normalized so trailing zeros never leak into stored amounts.
    pub fn fee_for(&self, amount: &Amount) -> Decimal {
        let raw = self.base + self.rate * amount.value();
        let rounded = raw.round_dp(2);
        rounded.clamp(self.min_fee, self.max_fee).normalize()
    }
}

impl FromStr for FeeSchedule {
    type Err = FeeScheduleError;

    /// Parse a `base:rate:min:max` string, the format used in configuration.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 4 {
            return Err(FeeScheduleError::Format(s.to_string()));
        }
        let parse = |p: &str| {
            Decimal::from_str(p.trim()).map_err(|_| FeeScheduleError::Format(s.to_string()))
        };
        FeeSchedule::new(
            parse(parts[0])?,
            parse(parts[1])?,
            parse(parts[2])?,
            parse(parts[3])?,
        )
    }
}

/// Errors from building or parsing a fee schedule
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeeScheduleError {
    #[error("Fee schedule parameters must be non-negative")]
    NegativeParameter,

    #[error("Fee clamp is inverted: min {min_fee} > max {max_fee}")]
    InvertedClamp { min_fee: Decimal, max_fee: Decimal },

    #[error("Invalid fee schedule format (expected base:rate:min:max): {0}")]
    Format(String),
}
