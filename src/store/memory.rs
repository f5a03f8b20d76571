//! In-memory store adapters
//!
//! Used by the test suite and by deployments without a configured database.
//! The ledger store serializes commits behind a single async mutex, which
//! gives the same observable guarantee as the database adapter's
//! version-guarded update: no partial commit is ever visible.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::{Transaction, TransactionStatus, TransactionType};

use super::{
    AccountRecord, AccountStore, Beneficiary, BeneficiaryStore, CommitOutcome, LedgerCommit,
    StoreError, TransactionIndex, TtlStore, UpdateFn,
};

#[derive(Default)]
struct LedgerInner {
    accounts: HashMap<Uuid, AccountRecord>,
    transactions: HashMap<Uuid, Transaction>,
    beneficiaries: HashMap<Uuid, Beneficiary>,
    origins: HashMap<Uuid, Vec<String>>,
    /// idempotency key -> transaction id of the first committed entry
    idempotency: HashMap<Uuid, Uuid>,
}

/// In-memory ledger store. One mutex guards accounts, transactions, and
/// idempotency records so a commit is indivisible.
pub struct MemoryLedgerStore {
    inner: Mutex<LedgerInner>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LedgerInner::default()),
        }
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for MemoryLedgerStore {
    async fn account(&self, id: Uuid) -> Result<Option<AccountRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.accounts.get(&id).cloned())
    }

    async fn create_account(&self, record: AccountRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.accounts.insert(record.id, record);
        Ok(())
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<CommitOutcome, StoreError> {
        let mut inner = self.inner.lock().await;

        if let Some(key) = commit.idempotency_key {
            if let Some(tx_id) = inner.idempotency.get(&key) {
                return Ok(CommitOutcome::Replayed {
                    transaction_id: *tx_id,
                });
            }
        }

        // Validate every entry before touching anything so a failed commit
        // leaves no partial state.
        for entry in &commit.entries {
            let account = inner
                .accounts
                .get(&entry.account_id)
                .ok_or(StoreError::AccountNotFound(entry.account_id))?;
            if account.version != entry.expected_version {
                return Err(StoreError::VersionConflict {
                    account_id: entry.account_id,
                    expected: entry.expected_version,
                    actual: account.version,
                });
            }
            if entry.new_balance.value() < Decimal::ZERO {
                // Balance construction already forbids this; backstop per
                // the storage contract.
                return Err(StoreError::NegativeBalance(entry.account_id));
            }
        }

        for entry in &commit.entries {
            let account = inner
                .accounts
                .get_mut(&entry.account_id)
                .expect("validated above");
            account.balance = entry.new_balance;
            account.version += 1;
            inner
                .transactions
                .insert(entry.transaction.id, entry.transaction.clone());
        }

        if let Some(key) = commit.idempotency_key {
            let first_tx = commit.entries[0].transaction.id;
            inner.idempotency.insert(key, first_tx);
        }

        Ok(CommitOutcome::Applied)
    }

    async fn transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.transactions.get(&id).cloned())
    }
}

#[async_trait]
impl TransactionIndex for MemoryLedgerStore {
    async fn completed_total(
        &self,
        account_id: Uuid,
        tx_type: TransactionType,
        since: DateTime<Utc>,
    ) -> Result<Decimal, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .transactions
            .values()
            .filter(|tx| {
                tx.account_id == account_id
                    && tx.tx_type == tx_type
                    && tx.status == TransactionStatus::Completed
                    && tx.created_at >= since
            })
            .map(|tx| tx.principal())
            .sum())
    }

    async fn recent_count(
        &self,
        account_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .transactions
            .values()
            .filter(|tx| tx.account_id == account_id && tx.created_at >= since)
            .count() as u64)
    }

    async fn average_principal(&self, account_id: Uuid) -> Result<Option<Decimal>, StoreError> {
        let inner = self.inner.lock().await;
        let principals: Vec<Decimal> = inner
            .transactions
            .values()
            .filter(|tx| {
                tx.account_id == account_id && tx.status == TransactionStatus::Completed
            })
            .map(|tx| tx.principal())
            .collect();

        if principals.is_empty() {
            return Ok(None);
        }
        let count = Decimal::from(principals.len() as i64);
        let total: Decimal = principals.into_iter().sum();
        Ok(Some(total / count))
    }

    async fn is_known_origin(&self, account_id: Uuid, origin: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .origins
            .get(&account_id)
            .map(|known| known.iter().any(|o| o == origin))
            .unwrap_or(false))
    }

    async fn record_origin(&self, account_id: Uuid, origin: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let known = inner.origins.entry(account_id).or_default();
        if !known.iter().any(|o| o == origin) {
            known.push(origin.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl BeneficiaryStore for MemoryLedgerStore {
    async fn beneficiary(&self, id: Uuid) -> Result<Option<Beneficiary>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.beneficiaries.get(&id).cloned())
    }

    async fn create_beneficiary(&self, beneficiary: Beneficiary) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.beneficiaries.insert(beneficiary.id, beneficiary);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct TtlEntry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

/// In-memory TTL map over a sharded concurrent map. Expired entries read as
/// absent; `purge_expired` reclaims them.
pub struct MemoryTtlStore {
    map: DashMap<String, TtlEntry>,
    clock: Arc<dyn Clock>,
}

impl MemoryTtlStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            map: DashMap::new(),
            clock,
        }
    }

    fn expiry_for(&self, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        ttl.map(|d| {
            self.clock.now()
                + chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
        })
    }

    fn is_expired(&self, entry: &TtlEntry) -> bool {
        entry
            .expires_at
            .map(|at| at <= self.clock.now())
            .unwrap_or(false)
    }
}

#[async_trait]
impl TtlStore for MemoryTtlStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        // Clone out of the guard before any removal; holding a read ref
        // across a remove on the same shard would deadlock.
        let value = match self.map.get(key) {
            Some(entry) if !self.is_expired(&entry) => Some(entry.value.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if value.is_none() {
            self.map.remove(key);
        }
        Ok(value)
    }

    async fn put(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.map.insert(
            key.to_string(),
            TtlEntry {
                value,
                expires_at: self.expiry_for(ttl),
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.map.remove(key);
        Ok(())
    }

    async fn fetch_update(
        &self,
        key: &str,
        ttl: Option<Duration>,
        f: UpdateFn,
    ) -> Result<Option<String>, StoreError> {
        // The entry API holds the shard lock across the closure, so the
        // read-modify-write cannot interleave with another writer.
        let entry = self.map.entry(key.to_string());
        let new_expiry = self.expiry_for(ttl);

        match entry {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let current = if self.is_expired(occupied.get()) {
                    None
                } else {
                    Some(occupied.get().value.clone())
                };
                match f(current.as_deref()) {
                    Some(new_value) => {
                        occupied.insert(TtlEntry {
                            value: new_value.clone(),
                            expires_at: new_expiry,
                        });
                        Ok(Some(new_value))
                    }
                    None => {
                        occupied.remove();
                        Ok(None)
                    }
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => match f(None) {
                Some(new_value) => {
                    vacant.insert(TtlEntry {
                        value: new_value.clone(),
                        expires_at: new_expiry,
                    });
                    Ok(Some(new_value))
                }
                None => Ok(None),
            },
        }
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let before = self.map.len();
        let now = self.clock.now();
        self.map
            .retain(|_, entry| entry.expires_at.map(|at| at > now).unwrap_or(true));
        Ok((before - self.map.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::domain::{Balance, Counterparty};
    use rust_decimal_macros::dec;

    fn record(balance: Decimal) -> AccountRecord {
        AccountRecord::new(Uuid::new_v4(), Uuid::new_v4(), Balance::new(balance).unwrap())
    }

    fn completed_tx(account_id: Uuid, amount: Decimal, fee: Decimal) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            account_id,
            counterparty: Counterparty::External {
                reference: "gw:test".to_string(),
            },
            amount,
            fee,
            tx_type: if amount < Decimal::ZERO {
                TransactionType::TransferOut
            } else {
                TransactionType::Receive
            },
            status: TransactionStatus::Completed,
            risk: None,
            device_id: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_commit_applies_balance_and_transaction() {
        let store = MemoryLedgerStore::new();
        let account = record(dec!(1000));
        let account_id = account.id;
        store.create_account(account).await.unwrap();

        let tx = completed_tx(account_id, dec!(-202), dec!(2));
        let tx_id = tx.id;
        let outcome = store
            .commit(LedgerCommit {
                entries: vec![super::super::CommitEntry {
                    account_id,
                    expected_version: 1,
                    new_balance: Balance::new(dec!(798)).unwrap(),
                    transaction: tx,
                }],
                idempotency_key: None,
            })
            .await
            .unwrap();

        assert_eq!(outcome, CommitOutcome::Applied);
        let account = store.account(account_id).await.unwrap().unwrap();
        assert_eq!(account.balance.value(), dec!(798));
        assert_eq!(account.version, 2);
        assert!(store.transaction(tx_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_commit_stale_version_conflicts_without_side_effects() {
        let store = MemoryLedgerStore::new();
        let account = record(dec!(1000));
        let account_id = account.id;
        store.create_account(account).await.unwrap();

        let tx = completed_tx(account_id, dec!(-100), dec!(0));
        let result = store
            .commit(LedgerCommit {
                entries: vec![super::super::CommitEntry {
                    account_id,
                    expected_version: 7,
                    new_balance: Balance::new(dec!(900)).unwrap(),
                    transaction: tx,
                }],
                idempotency_key: None,
            })
            .await;

        assert!(matches!(
            result,
            Err(StoreError::VersionConflict { expected: 7, actual: 1, .. })
        ));
        let account = store.account(account_id).await.unwrap().unwrap();
        assert_eq!(account.balance.value(), dec!(1000));
        assert_eq!(account.version, 1);
    }

    #[tokio::test]
    async fn test_commit_idempotency_replay() {
        let store = MemoryLedgerStore::new();
        let account = record(dec!(1000));
        let account_id = account.id;
        store.create_account(account).await.unwrap();

        let key = Uuid::new_v4();
        let tx = completed_tx(account_id, dec!(-100), dec!(0));
        let tx_id = tx.id;

        let commit = LedgerCommit {
            entries: vec![super::super::CommitEntry {
                account_id,
                expected_version: 1,
                new_balance: Balance::new(dec!(900)).unwrap(),
                transaction: tx,
            }],
            idempotency_key: Some(key),
        };

        assert_eq!(
            store.commit(commit.clone()).await.unwrap(),
            CommitOutcome::Applied
        );

        // Second attempt under the same key replays without applying.
        let outcome = store.commit(commit).await.unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Replayed {
                transaction_id: tx_id
            }
        );
        let account = store.account(account_id).await.unwrap().unwrap();
        assert_eq!(account.balance.value(), dec!(900));
        assert_eq!(account.version, 2);
    }

    #[tokio::test]
    async fn test_completed_total_uses_principal() {
        let store = MemoryLedgerStore::new();
        let account = record(dec!(1000));
        let account_id = account.id;
        store.create_account(account).await.unwrap();

        for amount in [dec!(-101), dec!(-202)] {
            let fee = if amount == dec!(-101) { dec!(1) } else { dec!(2) };
            let tx = completed_tx(account_id, amount, fee);
            let expected_version = store.account(account_id).await.unwrap().unwrap().version;
            let balance = store.account(account_id).await.unwrap().unwrap().balance;
            store
                .commit(LedgerCommit {
                    entries: vec![super::super::CommitEntry {
                        account_id,
                        expected_version,
                        new_balance: balance.debit(-amount).unwrap(),
                        transaction: tx,
                    }],
                    idempotency_key: None,
                })
                .await
                .unwrap();
        }

        let since = Utc::now() - chrono::Duration::hours(1);
        let total = store
            .completed_total(account_id, TransactionType::TransferOut, since)
            .await
            .unwrap();
        // principals: 100 + 200
        assert_eq!(total, dec!(300));
    }

    #[tokio::test]
    async fn test_origins_roundtrip() {
        let store = MemoryLedgerStore::new();
        let account_id = Uuid::new_v4();

        assert!(!store
            .is_known_origin(account_id, "NL-Amsterdam")
            .await
            .unwrap());
        store
            .record_origin(account_id, "NL-Amsterdam")
            .await
            .unwrap();
        assert!(store
            .is_known_origin(account_id, "NL-Amsterdam")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_ttl_store_expiry_reads_as_absent() {
        let clock = Arc::new(MockClock::new(Utc::now()));
        let store = MemoryTtlStore::new(clock.clone());

        store
            .put("k", "v".to_string(), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_store_fetch_update_counts() {
        let clock = Arc::new(MockClock::new(Utc::now()));
        let store = MemoryTtlStore::new(clock);

        for expected in 1..=3u32 {
            let new = store
                .fetch_update(
                    "counter",
                    Some(Duration::from_secs(60)),
                    Box::new(|current| {
                        let count: u32 =
                            current.map(|v| v.parse().unwrap_or(0)).unwrap_or(0);
                        Some((count + 1).to_string())
                    }),
                )
                .await
                .unwrap();
            assert_eq!(new.as_deref(), Some(expected.to_string().as_str()));
        }
    }

    #[tokio::test]
    async fn test_ttl_store_purge_expired() {
        let clock = Arc::new(MockClock::new(Utc::now()));
        let store = MemoryTtlStore::new(clock.clone());

        store
            .put("short", "a".to_string(), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        store.put("forever", "b".to_string(), None).await.unwrap();

        clock.advance(chrono::Duration::seconds(11));
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.get("forever").await.unwrap().as_deref(), Some("b"));
    }
}
