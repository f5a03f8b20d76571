//! Store module
//!
//! Repository ports for the engine, plus the in-memory and Postgres
//! adapters. The engines only ever see these traits, so tests run against
//! the in-memory doubles and production wires whichever adapter the
//! deployment configured.

mod memory;
mod postgres;

pub use memory::{MemoryLedgerStore, MemoryTtlStore};
pub use postgres::PgLedgerStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{Balance, Transaction, TransactionType};

/// Account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Frozen,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Frozen => "frozen",
        }
    }
}

impl std::str::FromStr for AccountStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "frozen" => Ok(AccountStatus::Frozen),
            other => Err(StoreError::Corrupt(format!(
                "unknown account status: {other}"
            ))),
        }
    }
}

/// An account as the ledger sees it: balance plus the version token used
/// for optimistic concurrency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub balance: Balance,
    pub status: AccountStatus,
    pub version: i64,
}

impl AccountRecord {
    pub fn new(id: Uuid, owner_id: Uuid, balance: Balance) -> Self {
        Self {
            id,
            owner_id,
            balance,
            status: AccountStatus::Active,
            version: 1,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.status == AccountStatus::Frozen
    }
}

/// Where a beneficiary's money goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Destination {
    /// Another account inside this ledger
    Internal { account_id: Uuid },

    /// A reference handled by an external network
    External { reference: String },
}

/// A saved beneficiary. Read-only to the ledger; `active` is a precondition
/// for transfers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beneficiary {
    pub id: Uuid,

    /// Owning account
    pub account_id: Uuid,

    pub destination: Destination,

    pub active: bool,
}

/// One account mutation inside a ledger commit.
#[derive(Debug, Clone)]
pub struct CommitEntry {
    pub account_id: Uuid,

    /// Version observed when the engine read the account
    pub expected_version: i64,

    /// Balance after the mutation (non-negative by construction)
    pub new_balance: Balance,

    /// The transaction that explains the delta
    pub transaction: Transaction,
}

/// A set of entries the store must apply as one indivisible unit.
#[derive(Debug, Clone)]
pub struct LedgerCommit {
    pub entries: Vec<CommitEntry>,

    /// Caller-supplied idempotency key; a commit under a key that already
    /// completed replays the recorded transaction instead of re-applying.
    pub idempotency_key: Option<Uuid>,
}

/// What a commit attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// All entries applied
    Applied,

    /// The idempotency key had already completed; nothing was applied
    Replayed { transaction_id: Uuid },
}

/// Storage layer errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Version conflict for account {account_id}: expected {expected}, actual {actual}")]
    VersionConflict {
        account_id: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Balance constraint violated for account {0}")]
    NegativeBalance(Uuid),

    #[error("Corrupt stored state: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Conflicts are the only errors worth retrying without operator
    /// intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}

/// Authoritative account state. The ledger is the only caller of `commit`.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Read an account with its current version token.
    async fn account(&self, id: Uuid) -> Result<Option<AccountRecord>, StoreError>;

    /// Create an account (provisioning, not money movement).
    async fn create_account(&self, record: AccountRecord) -> Result<(), StoreError>;

    /// Apply balance mutations and their transaction records as one
    /// indivisible unit, guarded by the expected versions. Returns
    /// `VersionConflict` (and applies nothing) if any account moved since
    /// it was read.
    async fn commit(&self, commit: LedgerCommit) -> Result<CommitOutcome, StoreError>;

    /// Read a committed transaction.
    async fn transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError>;
}

/// Read-side queries over committed transactions, used by limit enforcement
/// and risk scoring. May be slightly stale for velocity reads.
#[async_trait]
pub trait TransactionIndex: Send + Sync {
    /// Sum of principal amounts of COMPLETED transactions of one type in
    /// [since, now).
    async fn completed_total(
        &self,
        account_id: Uuid,
        tx_type: TransactionType,
        since: DateTime<Utc>,
    ) -> Result<Decimal, StoreError>;

    /// Count of transactions (any status) for the account in [since, now).
    async fn recent_count(
        &self,
        account_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Mean principal over the account's completed history, if any exists.
    async fn average_principal(&self, account_id: Uuid) -> Result<Option<Decimal>, StoreError>;

    /// Whether this origin (location label or IP) has been seen for the
    /// account before.
    async fn is_known_origin(&self, account_id: Uuid, origin: &str) -> Result<bool, StoreError>;

    /// Remember an origin for the account.
    async fn record_origin(&self, account_id: Uuid, origin: &str) -> Result<(), StoreError>;
}

/// Beneficiary lookups. Validity checks happen in the ledger.
#[async_trait]
pub trait BeneficiaryStore: Send + Sync {
    async fn beneficiary(&self, id: Uuid) -> Result<Option<Beneficiary>, StoreError>;

    async fn create_beneficiary(&self, beneficiary: Beneficiary) -> Result<(), StoreError>;
}

/// Closure passed to `TtlStore::fetch_update`; receives the current value
/// (absent if missing or expired) and returns the replacement, or `None` to
/// delete the key.
pub type UpdateFn = Box<dyn FnOnce(Option<&str>) -> Option<String> + Send>;

/// Ephemeral TTL-keyed state: rate-limit counters, device records, session
/// tokens. Expiry is treated as "not found", never as an error.
#[async_trait]
pub trait TtlStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store a value; `ttl: None` means no expiry.
    async fn put(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Atomic read-modify-write on one key. The closure runs under the
    /// key's lock; no other writer can interleave. Returns the new value.
    async fn fetch_update(
        &self,
        key: &str,
        ttl: Option<Duration>,
        f: UpdateFn,
    ) -> Result<Option<String>, StoreError>;

    /// Drop expired entries; returns how many were removed.
    async fn purge_expired(&self) -> Result<u64, StoreError>;
}
