//! Engine integration tests
//!
//! Exercises the money-movement properties end to end over the in-memory
//! stores: fee arithmetic, insufficient funds, concurrent transfers,
//! device trust expiry, and rate-limit lockout.

use rust_decimal_macros::dec;

use payflow_core::clock::Clock;
use payflow_core::domain::{Amount, DomainError, OperationContext, TransactionStatus};
use payflow_core::ledger::{FeePolicy, LedgerError};
use payflow_core::store::AccountStore;
use payflow_core::Config;

mod common;

#[tokio::test]
async fn test_successful_transfer_reconciles_exactly() {
    let app = common::setup(dec!(1000)).await;

    let outcome = app
        .ledger
        .apply_transfer(
            app.account_id,
            app.beneficiary_id,
            Amount::new(dec!(200)).unwrap(),
            None,
            &OperationContext::new(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, TransactionStatus::Completed);
    assert_eq!(outcome.fee, dec!(2));
    assert_eq!(common::balance_of(&app, app.account_id).await, dec!(798));

    // The signed amount equals the balance delta it caused.
    let tx = app
        .store
        .transaction(outcome.transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.amount, dec!(-202));
    assert_eq!(tx.amount, dec!(798) - dec!(1000));
}

#[tokio::test]
async fn test_insufficient_funds_leaves_balance_unchanged() {
    let app = common::setup(dec!(150)).await;

    let result = app
        .ledger
        .apply_transfer(
            app.account_id,
            app.beneficiary_id,
            Amount::new(dec!(150)).unwrap(),
            None,
            &OperationContext::new(),
            None,
        )
        .await;

    assert!(matches!(
        result,
        Err(LedgerError::Domain(DomainError::InsufficientFunds { .. }))
    ));
    assert_eq!(common::balance_of(&app, app.account_id).await, dec!(150));
}

#[tokio::test]
async fn test_concurrent_transfers_never_overdraw() {
    // Zero fees so the arithmetic matches the stated property exactly:
    // balance 1000, two simultaneous transfers of 700, final balance 300
    // (one success) and never negative.
    let config = Config::from_env().unwrap();
    let fees = FeePolicy {
        transfer: "0:0:0:0".parse().unwrap(),
        receive: "0:0:0:0".parse().unwrap(),
    };
    let app = common::setup_with(dec!(1000), config, fees).await;

    let amount = Amount::new(dec!(700)).unwrap();
    let ctx_a = OperationContext::new();
    let ctx_b = OperationContext::new();
    let (a, b) = tokio::join!(
        app.ledger.apply_transfer(
            app.account_id,
            app.beneficiary_id,
            amount,
            None,
            &ctx_a,
            None,
        ),
        app.ledger.apply_transfer(
            app.account_id,
            app.beneficiary_id,
            amount,
            None,
            &ctx_b,
            None,
        ),
    );

    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one of two concurrent 700s may land");

    let failed = if a.is_ok() { b } else { a };
    assert!(matches!(
        failed,
        Err(LedgerError::Domain(DomainError::InsufficientFunds { .. }))
    ));

    let balance = common::balance_of(&app, app.account_id).await;
    assert_eq!(balance, dec!(300));
    assert!(balance >= dec!(0));
}

#[tokio::test]
async fn test_concurrent_small_transfers_all_land() {
    let config = Config::from_env().unwrap();
    let fees = FeePolicy {
        transfer: "0:0:0:0".parse().unwrap(),
        receive: "0:0:0:0".parse().unwrap(),
    };
    let app = common::setup_with(dec!(1000), config, fees).await;

    let amount = Amount::new(dec!(100)).unwrap();
    let ctx_a = OperationContext::new();
    let ctx_b = OperationContext::new();
    let ctx_c = OperationContext::new();
    let (a, b, c) = tokio::join!(
        app.ledger.apply_transfer(
            app.account_id,
            app.beneficiary_id,
            amount,
            None,
            &ctx_a,
            None,
        ),
        app.ledger.apply_transfer(
            app.account_id,
            app.beneficiary_id,
            amount,
            None,
            &ctx_b,
            None,
        ),
        app.ledger.apply_transfer(
            app.account_id,
            app.beneficiary_id,
            amount,
            None,
            &ctx_c,
            None,
        ),
    );

    // The commit loop retries conflicting writers against fresh state, so
    // all three settle.
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(common::balance_of(&app, app.account_id).await, dec!(700));
}

#[tokio::test]
async fn test_device_trust_expires_with_time() {
    let app = common::setup(dec!(1000)).await;
    let owner = uuid::Uuid::new_v4();

    app.devices
        .trust_device("dev-1", owner, None)
        .await
        .unwrap();
    assert!(app.devices.is_device_trusted("dev-1").await.unwrap());

    // Default trust window is 30 days.
    app.clock.advance(chrono::Duration::days(31));
    assert!(!app.devices.is_device_trusted("dev-1").await.unwrap());
}

#[tokio::test]
async fn test_rate_limit_lockout_and_reset() {
    let app = common::setup(dec!(1000)).await;
    let key = "signin:user@example.com:203.0.113.7";

    for _ in 0..5 {
        app.rate_limiter.increment(key, 5).await.unwrap();
    }

    assert!(!app.rate_limiter.check_limit(key, 5).await.unwrap());
    let lockout = app.rate_limiter.lockout_time(key).await.unwrap().unwrap();
    assert!(lockout > app.clock.now());

    app.rate_limiter.reset_limit(key).await.unwrap();
    assert!(app.rate_limiter.check_limit(key, 5).await.unwrap());
}

#[tokio::test]
async fn test_daily_limit_example() {
    // 4900 of the 5000 daily cap already used; a 200 transfer must be
    // rejected with the daily scope and the balance untouched.
    let config = Config::from_env().unwrap();
    let fees = FeePolicy {
        transfer: "0:0:0:0".parse().unwrap(),
        receive: "0:0:0:0".parse().unwrap(),
    };
    let app = common::setup_with(dec!(10000), config, fees).await;

    app.ledger
        .apply_transfer(
            app.account_id,
            app.beneficiary_id,
            Amount::new(dec!(4900)).unwrap(),
            None,
            &OperationContext::new(),
            None,
        )
        .await
        .unwrap();
    let balance_before = common::balance_of(&app, app.account_id).await;

    let result = app
        .ledger
        .apply_transfer(
            app.account_id,
            app.beneficiary_id,
            Amount::new(dec!(200)).unwrap(),
            None,
            &OperationContext::new(),
            None,
        )
        .await;

    assert!(matches!(
        result,
        Err(LedgerError::Domain(DomainError::LimitExceeded {
            scope: payflow_core::domain::LimitScope::Daily
        }))
    ));
    assert_eq!(
        common::balance_of(&app, app.account_id).await,
        balance_before
    );
}

#[tokio::test]
async fn test_daily_window_rolls_over() {
    let config = Config::from_env().unwrap();
    let fees = FeePolicy {
        transfer: "0:0:0:0".parse().unwrap(),
        receive: "0:0:0:0".parse().unwrap(),
    };
    let app = common::setup_with(dec!(20000), config, fees).await;

    app.ledger
        .apply_transfer(
            app.account_id,
            app.beneficiary_id,
            Amount::new(dec!(4900)).unwrap(),
            None,
            &OperationContext::new(),
            None,
        )
        .await
        .unwrap();

    // Next calendar day the daily window is empty again (the monthly one
    // may still bind, but 4900 + 4900 stays under 50000).
    app.clock.advance(chrono::Duration::days(1));
    app.ledger
        .apply_transfer(
            app.account_id,
            app.beneficiary_id,
            Amount::new(dec!(4900)).unwrap(),
            None,
            &OperationContext::new(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(
        common::balance_of(&app, app.account_id).await,
        dec!(10200)
    );
}
