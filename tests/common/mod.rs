//! Common test utilities
//!
//! Builds the full engine stack over the in-memory stores, mirroring the
//! production wiring in main.rs.

use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use payflow_core::api::AppState;
use payflow_core::clock::MockClock;
use payflow_core::device::DeviceTrustManager;
use payflow_core::domain::Balance;
use payflow_core::handlers::{ReceiveHandler, TransferHandler};
use payflow_core::ledger::{FeePolicy, LedgerEngine};
use payflow_core::limits::LimitEnforcer;
use payflow_core::notify::{NotificationDispatcher, TracingSink};
use payflow_core::ratelimit::RateLimiter;
use payflow_core::risk::RiskEngine;
use payflow_core::store::{
    AccountRecord, AccountStore, Beneficiary, BeneficiaryStore, Destination, MemoryLedgerStore,
    MemoryTtlStore,
};
use payflow_core::Config;

pub struct TestApp {
    pub clock: Arc<MockClock>,
    pub store: Arc<MemoryLedgerStore>,
    pub devices: Arc<DeviceTrustManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub ledger: Arc<LedgerEngine>,
    pub state: AppState,
    pub account_id: Uuid,
    pub beneficiary_id: Uuid,
}

/// Build the stack with the default fee schedules.
pub async fn setup(balance: Decimal) -> TestApp {
    let config = Config::from_env().expect("default config must load");
    let fees = config.fee_policy();
    setup_with(balance, config, fees).await
}

/// Build the stack with explicit fee schedules.
pub async fn setup_with(balance: Decimal, config: Config, fees: FeePolicy) -> TestApp {
    let config = Arc::new(config);
    let clock = Arc::new(MockClock::new(chrono::Utc::now()));
    let store = Arc::new(MemoryLedgerStore::new());
    let ttl_store = Arc::new(MemoryTtlStore::new(clock.clone()));

    let account_id = Uuid::new_v4();
    store
        .create_account(AccountRecord::new(
            account_id,
            Uuid::new_v4(),
            Balance::new(balance).expect("test balance must be valid"),
        ))
        .await
        .expect("seed account");

    let beneficiary_id = Uuid::new_v4();
    store
        .create_beneficiary(Beneficiary {
            id: beneficiary_id,
            account_id,
            destination: Destination::External {
                reference: "net:0612345678".to_string(),
            },
            active: true,
        })
        .await
        .expect("seed beneficiary");

    let limits = Arc::new(LimitEnforcer::new(
        store.clone(),
        clock.clone(),
        config.limit_policy(),
    ));
    let devices = Arc::new(DeviceTrustManager::new(
        ttl_store.clone(),
        clock.clone(),
        chrono::Duration::days(config.device_trust_days),
        chrono::Duration::minutes(config.session_ttl_minutes),
    ));
    let risk = Arc::new(RiskEngine::new(
        store.clone(),
        devices.clone(),
        clock.clone(),
        config.limit_policy(),
        config.risk_params(),
    ));
    let ledger = Arc::new(LedgerEngine::new(
        store.clone(),
        store.clone(),
        limits.clone(),
        fees,
        clock.clone(),
    ));
    let rate_limiter = Arc::new(RateLimiter::new(
        ttl_store.clone(),
        clock.clone(),
        chrono::Duration::seconds(config.rate_limit_window_secs),
        chrono::Duration::seconds(config.rate_limit_lockout_secs),
    ));
    let notifier = NotificationDispatcher::start(Arc::new(TracingSink));

    let transfers = Arc::new(TransferHandler::new(
        rate_limiter.clone(),
        limits,
        risk,
        devices.clone(),
        ledger.clone(),
        store.clone(),
        notifier.clone(),
        config.rate_limit_max_attempts,
    ));
    let receives = Arc::new(ReceiveHandler::new(
        rate_limiter.clone(),
        ledger.clone(),
        notifier,
        config.rate_limit_max_attempts,
    ));

    let state = AppState {
        config,
        transfers,
        receives,
        devices: devices.clone(),
        rate_limiter: rate_limiter.clone(),
        accounts: store.clone(),
    };

    TestApp {
        clock,
        store,
        devices,
        rate_limiter,
        ledger,
        state,
        account_id,
        beneficiary_id,
    }
}

/// Current balance of an account.
pub async fn balance_of(app: &TestApp, account_id: Uuid) -> Decimal {
    app.store
        .account(account_id)
        .await
        .expect("store read")
        .expect("account exists")
        .balance
        .value()
}
