//! Postgres store adapter
//!
//! Durable implementation of the ledger ports. The commit path runs inside
//! one database transaction with a version-guarded UPDATE per account, so a
//! conflicting writer makes the whole commit fail with `VersionConflict`
//! and nothing half-applied is ever visible.
//!
//! Expected tables: accounts, transactions, ledger_idempotency,
//! account_origins, beneficiaries (see migrations in the deployment repo).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction as PgTx};
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::{Transaction, TransactionType};

use super::{
    AccountRecord, AccountStatus, AccountStore, Beneficiary, BeneficiaryStore, CommitEntry,
    CommitOutcome, LedgerCommit, StoreError, TransactionIndex,
};

/// Postgres-backed ledger store.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn apply_entry(
        &self,
        tx: &mut PgTx<'_, Postgres>,
        entry: &CommitEntry,
    ) -> Result<(), StoreError> {
        // Version-guarded update: zero rows means a concurrent writer won.
        let rows_affected = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $3, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2 AND $3 >= 0
            "#,
        )
        .bind(entry.account_id)
        .bind(entry.expected_version)
        .bind(entry.new_balance.value())
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            let actual: Option<i64> =
                sqlx::query_scalar(r#"SELECT version FROM accounts WHERE id = $1"#)
                    .bind(entry.account_id)
                    .fetch_optional(&mut **tx)
                    .await?;

            return match actual {
                Some(actual) => Err(StoreError::VersionConflict {
                    account_id: entry.account_id,
                    expected: entry.expected_version,
                    actual,
                }),
                None => Err(StoreError::AccountNotFound(entry.account_id)),
            };
        }

        let record = &entry.transaction;
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, account_id, counterparty, amount, fee,
                tx_type, status, risk, device_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id)
        .bind(record.account_id)
        .bind(serde_json::to_value(&record.counterparty)?)
        .bind(record.amount)
        .bind(record.fee)
        .bind(record.tx_type.as_str())
        .bind(record.status.as_str())
        .bind(
            record
                .risk
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        )
        .bind(&record.device_id)
        .bind(record.created_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl AccountStore for PgLedgerStore {
    async fn account(&self, id: Uuid) -> Result<Option<AccountRecord>, StoreError> {
        let row: Option<(Uuid, Uuid, Decimal, String, i64)> = sqlx::query_as(
            r#"
            SELECT id, owner_id, balance, status, version
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(id, owner_id, balance, status, version)| {
            Ok(AccountRecord {
                id,
                owner_id,
                balance: crate::domain::Balance::new(balance)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                status: AccountStatus::from_str(&status)?,
                version,
            })
        })
        .transpose()
    }

    async fn create_account(&self, record: AccountRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, owner_id, balance, status, version)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(record.owner_id)
        .bind(record.balance.value())
        .bind(record.status.as_str())
        .bind(record.version)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<CommitOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        if let Some(key) = commit.idempotency_key {
            let existing: Option<Uuid> = sqlx::query_scalar(
                r#"SELECT transaction_id FROM ledger_idempotency WHERE key = $1"#,
            )
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(transaction_id) = existing {
                return Ok(CommitOutcome::Replayed { transaction_id });
            }
        }

        for entry in &commit.entries {
            self.apply_entry(&mut tx, entry).await?;
        }

        if let Some(key) = commit.idempotency_key {
            sqlx::query(
                r#"
                INSERT INTO ledger_idempotency (key, transaction_id, created_at)
                VALUES ($1, $2, NOW())
                "#,
            )
            .bind(key)
            .bind(commit.entries[0].transaction.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(CommitOutcome::Applied)
    }

    async fn transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        let row: Option<(
            Uuid,
            Uuid,
            serde_json::Value,
            Decimal,
            Decimal,
            String,
            String,
            Option<serde_json::Value>,
            Option<String>,
            DateTime<Utc>,
        )> = sqlx::query_as(
            r#"
            SELECT id, account_id, counterparty, amount, fee,
                   tx_type, status, risk, device_id, created_at
            FROM transactions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(
            |(id, account_id, counterparty, amount, fee, tx_type, status, risk, device_id, created_at)| {
                Ok(Transaction {
                    id,
                    account_id,
                    counterparty: serde_json::from_value(counterparty)?,
                    amount,
                    fee,
                    tx_type: serde_json::from_value(serde_json::Value::String(tx_type))?,
                    status: serde_json::from_value(serde_json::Value::String(status))?,
                    risk: risk.map(serde_json::from_value).transpose()?,
                    device_id,
                    created_at,
                })
            },
        )
        .transpose()
    }
}

#[async_trait]
impl TransactionIndex for PgLedgerStore {
    async fn completed_total(
        &self,
        account_id: Uuid,
        tx_type: TransactionType,
        since: DateTime<Utc>,
    ) -> Result<Decimal, StoreError> {
        // Principal = |signed amount| minus the fee for debits, plus it for
        // credits; mirrors Transaction::principal.
        let total: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(
                CASE WHEN amount < 0 THEN -amount - fee ELSE amount + fee END
            ), 0)
            FROM transactions
            WHERE account_id = $1
              AND tx_type = $2
              AND status = 'completed'
              AND created_at >= $3
            "#,
        )
        .bind(account_id)
        .bind(tx_type.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    async fn recent_count(
        &self,
        account_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM transactions
            WHERE account_id = $1 AND created_at >= $2
            "#,
        )
        .bind(account_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn average_principal(&self, account_id: Uuid) -> Result<Option<Decimal>, StoreError> {
        let average: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT AVG(
                CASE WHEN amount < 0 THEN -amount - fee ELSE amount + fee END
            )
            FROM transactions
            WHERE account_id = $1 AND status = 'completed'
            "#,
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(average)
    }

    async fn is_known_origin(&self, account_id: Uuid, origin: &str) -> Result<bool, StoreError> {
        let known: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM account_origins
                WHERE account_id = $1 AND origin = $2
            )
            "#,
        )
        .bind(account_id)
        .bind(origin)
        .fetch_one(&self.pool)
        .await?;

        Ok(known)
    }

    async fn record_origin(&self, account_id: Uuid, origin: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO account_origins (account_id, origin, first_seen_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (account_id, origin) DO NOTHING
            "#,
        )
        .bind(account_id)
        .bind(origin)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl BeneficiaryStore for PgLedgerStore {
    async fn beneficiary(&self, id: Uuid) -> Result<Option<Beneficiary>, StoreError> {
        let row: Option<(Uuid, Uuid, serde_json::Value, bool)> = sqlx::query_as(
            r#"
            SELECT id, account_id, destination, active
            FROM beneficiaries
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(id, account_id, destination, active)| {
            Ok(Beneficiary {
                id,
                account_id,
                destination: serde_json::from_value(destination)?,
                active,
            })
        })
        .transpose()
    }

    async fn create_beneficiary(&self, beneficiary: Beneficiary) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO beneficiaries (id, account_id, destination, active)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(beneficiary.id)
        .bind(beneficiary.account_id)
        .bind(serde_json::to_value(&beneficiary.destination)?)
        .bind(beneficiary.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
