//! Device Trust Manager
//!
//! Tracks client devices by fingerprint, their trust state, and the
//! step-up sessions issued after verification. Records live in the shared
//! TTL store; an expired session simply reads as absent.
//!
//! Trust state machine per device:
//! UNKNOWN (never seen) -> PENDING_VERIFICATION (first sight) ->
//! TRUSTED (explicit verification) -> EXPIRED (trust window elapsed,
//! equivalent to PENDING_VERIFICATION for checks).

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::store::{StoreError, TtlStore};

/// Client-supplied attributes a fingerprint is derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceComponents {
    pub user_agent: String,
    pub platform: String,
    pub screen: String,
    pub timezone: String,
    pub language: String,
}

/// Trust state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustState {
    Unknown,
    PendingVerification,
    Trusted,
    Expired,
}

/// Stored record for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub owner_account_id: Uuid,
    pub state: TrustState,

    /// Always present while state is Trusted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_expiry: Option<DateTime<Utc>>,

    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,

    /// Last origin (location label or IP) the device was seen from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_origin: Option<String>,
}

/// Step-up session issued after device verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub token: String,
    pub account_id: Uuid,
    pub device_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Device trust errors
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Unreadable device record for {0}")]
    Corrupt(String),
}

/// Manages device fingerprints, trust state, and step-up sessions.
pub struct DeviceTrustManager {
    store: Arc<dyn TtlStore>,
    clock: Arc<dyn Clock>,
    trust_duration: Duration,
    session_ttl: Duration,
}

impl DeviceTrustManager {
    pub fn new(
        store: Arc<dyn TtlStore>,
        clock: Arc<dyn Clock>,
        trust_duration: Duration,
        session_ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            trust_duration,
            session_ttl,
        }
    }

    /// Deterministic fingerprint over client-supplied attributes. The same
    /// components always yield the same device id.
    pub fn generate_fingerprint(components: &DeviceComponents) -> String {
        let canonical = format!(
            "ua={}|platform={}|screen={}|tz={}|lang={}",
            components.user_agent,
            components.platform,
            components.screen,
            components.timezone,
            components.language,
        );
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn device_key(device_id: &str) -> String {
        format!("device:{device_id}")
    }

    fn session_key(token: &str) -> String {
        format!("session:{token}")
    }

    async fn load(&self, device_id: &str) -> Result<Option<DeviceRecord>, DeviceError> {
        let raw = self.store.get(&Self::device_key(device_id)).await?;
        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|_| DeviceError::Corrupt(device_id.to_string()))
        })
        .transpose()
    }

    async fn save(&self, record: &DeviceRecord) -> Result<(), DeviceError> {
        let raw = serde_json::to_string(record).map_err(StoreError::from)?;
        // Device records carry their trust expiry explicitly; no store TTL.
        self.store
            .put(&Self::device_key(&record.device_id), raw, None)
            .await?;
        Ok(())
    }

    /// Register a sighting of a device. First sight creates the record in
    /// PENDING_VERIFICATION and binds it to the owning account; later
    /// sightings update last-seen data only.
    pub async fn observe(
        &self,
        device_id: &str,
        owner_account_id: Uuid,
        origin: Option<&str>,
    ) -> Result<DeviceRecord, DeviceError> {
        let now = self.clock.now();
        let record = match self.load(device_id).await? {
            Some(mut record) => {
                record.last_seen_at = now;
                if let Some(origin) = origin {
                    record.last_origin = Some(origin.to_string());
                }
                record
            }
            None => {
                tracing::info!(device_id, account_id = %owner_account_id, "First sight of device");
                DeviceRecord {
                    device_id: device_id.to_string(),
                    owner_account_id,
                    state: TrustState::PendingVerification,
                    trust_expiry: None,
                    first_seen_at: now,
                    last_seen_at: now,
                    last_origin: origin.map(str::to_string),
                }
            }
        };
        self.save(&record).await?;
        Ok(record)
    }

    /// Effective trust state: a missing record is Unknown, and a Trusted
    /// record past its expiry reads as Expired.
    pub async fn trust_state(&self, device_id: &str) -> Result<TrustState, DeviceError> {
        let record = match self.load(device_id).await? {
            Some(record) => record,
            None => return Ok(TrustState::Unknown),
        };
        Ok(self.effective_state(&record))
    }

    fn effective_state(&self, record: &DeviceRecord) -> TrustState {
        match (record.state, record.trust_expiry) {
            (TrustState::Trusted, Some(expiry)) if expiry > self.clock.now() => {
                TrustState::Trusted
            }
            (TrustState::Trusted, _) => TrustState::Expired,
            (state, _) => state,
        }
    }

    /// True only for a Trusted device whose trust window has not elapsed.
    pub async fn is_device_trusted(&self, device_id: &str) -> Result<bool, DeviceError> {
        Ok(self.trust_state(device_id).await? == TrustState::Trusted)
    }

    /// Transition a device to Trusted with a fresh expiry. Idempotent:
    /// re-trusting an already-trusted device just refreshes the window.
    pub async fn trust_device(
        &self,
        device_id: &str,
        owner_account_id: Uuid,
        components: Option<&DeviceComponents>,
    ) -> Result<DeviceRecord, DeviceError> {
        let now = self.clock.now();
        let mut record = match self.load(device_id).await? {
            Some(record) => record,
            None => DeviceRecord {
                device_id: device_id.to_string(),
                owner_account_id,
                state: TrustState::PendingVerification,
                trust_expiry: None,
                first_seen_at: now,
                last_seen_at: now,
                last_origin: None,
            },
        };

        let expiry = now + self.trust_duration;
        record.state = TrustState::Trusted;
        record.trust_expiry = Some(expiry);
        record.last_seen_at = now;
        if let Some(components) = components {
            // Re-derive the fingerprint so a trust grant with fresh
            // attributes stays bound to the same device id.
            let fingerprint = Self::generate_fingerprint(components);
            if fingerprint != record.device_id {
                tracing::warn!(
                    device_id,
                    "Trust grant components do not match the stored fingerprint"
                );
            }
        }

        self.save(&record).await?;
        tracing::info!(
            device_id,
            account_id = %owner_account_id,
            trust_expiry = %expiry,
            "Device trusted"
        );
        Ok(record)
    }

    /// Issue a step-up session for a verified device.
    pub async fn issue_session(
        &self,
        device_id: &str,
        account_id: Uuid,
    ) -> Result<SessionRecord, DeviceError> {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let session = SessionRecord {
            token: token.clone(),
            account_id,
            device_id: device_id.to_string(),
            expires_at: self.clock.now() + self.session_ttl,
        };
        let raw = serde_json::to_string(&session).map_err(StoreError::from)?;
        self.store
            .put(
                &Self::session_key(&token),
                raw,
                self.session_ttl.to_std().ok(),
            )
            .await?;
        Ok(session)
    }

    /// Look up a session. Expired or unknown tokens both read as absent;
    /// the caller treats them as "not authenticated", not as an error.
    pub async fn session(&self, token: &str) -> Result<Option<SessionRecord>, DeviceError> {
        let raw = match self.store.get(&Self::session_key(token)).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let session: SessionRecord =
            serde_json::from_str(&raw).map_err(|_| DeviceError::Corrupt(token.to_string()))?;
        if session.expires_at <= self.clock.now() {
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Drop a session token.
    pub async fn revoke_session(&self, token: &str) -> Result<(), DeviceError> {
        self.store.remove(&Self::session_key(token)).await?;
        Ok(())
    }
}
