//! API Routes
//!
//! HTTP endpoint definitions. Transport concerns only: parse the request,
//! hand it to a handler or engine, map the result.

use axum::{
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::{DeviceComponents, DeviceTrustManager, TrustState};
use crate::domain::{OperationContext, TransactionStatus};
use crate::error::AppError;
use crate::handlers::{ReceiveCommand, TransferCommand};

use super::AppState;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub account_id: Uuid,
    pub beneficiary_id: Uuid,
    pub amount: String,
}

#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub fee: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveRequest {
    pub account_id: Uuid,
    pub amount: String,
    pub source_reference: String,
}

#[derive(Debug, Serialize)]
pub struct ReceiveResponse {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub fee: Decimal,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub account_id: Uuid,
    pub balance: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct TrustDeviceRequest {
    pub account_id: Uuid,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub components: Option<DeviceComponents>,
}

#[derive(Debug, Serialize)]
pub struct TrustDeviceResponse {
    pub device_id: String,
    pub state: TrustState,
    pub trust_expiry: Option<DateTime<Utc>>,
    pub session_token: String,
    pub session_expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DeviceTrustedResponse {
    pub device_id: String,
    pub trusted: bool,
}

#[derive(Debug, Serialize)]
pub struct RateLimitStatusResponse {
    pub key: String,
    pub allowed: bool,
    pub lockout_until: Option<DateTime<Utc>>,
}

// =========================================================================
// Router
// =========================================================================

/// All API routes. Middleware is layered on by the caller.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/transfers", post(create_transfer))
        .route("/receives", post(create_receive))
        .route("/accounts/:id/balance", get(get_balance))
        .route("/devices/trust", post(trust_device))
        .route("/devices/:id/trusted", get(device_trusted))
        .route("/ratelimits/:key", get(rate_limit_status))
        .route("/ratelimits/:key/reset", post(rate_limit_reset))
}

// =========================================================================
// Money movement
// =========================================================================

async fn create_transfer(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    headers: HeaderMap,
    Json(request): Json<TransferRequest>,
) -> Result<(StatusCode, Json<TransferResponse>), AppError> {
    let idempotency_key = idempotency_key(&headers)?;

    let result = state
        .transfers
        .execute(
            TransferCommand::new(request.account_id, request.beneficiary_id, request.amount),
            idempotency_key,
            &context,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(TransferResponse {
            transaction_id: result.transaction_id,
            status: result.status,
            fee: result.fee,
        }),
    ))
}

async fn create_receive(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    headers: HeaderMap,
    Json(request): Json<ReceiveRequest>,
) -> Result<(StatusCode, Json<ReceiveResponse>), AppError> {
    let idempotency_key = idempotency_key(&headers)?;

    let result = state
        .receives
        .execute(
            ReceiveCommand::new(request.account_id, request.amount, request.source_reference),
            idempotency_key,
            &context,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ReceiveResponse {
            transaction_id: result.transaction_id,
            status: result.status,
            fee: result.fee,
        }),
    ))
}

async fn get_balance(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<BalanceResponse>, AppError> {
    let account = state
        .accounts
        .account(account_id)
        .await?
        .ok_or_else(|| crate::domain::DomainError::AccountNotFound(account_id.to_string()))?;

    Ok(Json(BalanceResponse {
        account_id,
        balance: account.balance.value(),
    }))
}

// =========================================================================
// Device trust
// =========================================================================

async fn trust_device(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<TrustDeviceRequest>,
) -> Result<(StatusCode, Json<TrustDeviceResponse>), AppError> {
    let device_id = resolve_device_id(&request, &context)?;

    let record = state
        .devices
        .trust_device(&device_id, request.account_id, request.components.as_ref())
        .await?;

    // Verification succeeded: issue the step-up session alongside.
    let session = state
        .devices
        .issue_session(&device_id, request.account_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(TrustDeviceResponse {
            device_id,
            state: record.state,
            trust_expiry: record.trust_expiry,
            session_token: session.token,
            session_expires_at: session.expires_at,
        }),
    ))
}

fn resolve_device_id(
    request: &TrustDeviceRequest,
    context: &OperationContext,
) -> Result<String, AppError> {
    if let Some(device_id) = &request.device_id {
        return Ok(device_id.clone());
    }
    if let Some(components) = &request.components {
        return Ok(DeviceTrustManager::generate_fingerprint(components));
    }
    if let Some(device_id) = &context.device_id {
        return Ok(device_id.clone());
    }
    Err(AppError::MissingHeader("X-Device-Id".to_string()))
}

async fn device_trusted(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceTrustedResponse>, AppError> {
    let trusted = state.devices.is_device_trusted(&device_id).await?;
    Ok(Json(DeviceTrustedResponse { device_id, trusted }))
}

// =========================================================================
// Rate limit administration
// =========================================================================

async fn rate_limit_status(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<RateLimitStatusResponse>, AppError> {
    let allowed = state
        .rate_limiter
        .check_limit(&key, state.config.rate_limit_max_attempts)
        .await?;
    let lockout_until = state.rate_limiter.lockout_time(&key).await?;

    Ok(Json(RateLimitStatusResponse {
        key,
        allowed,
        lockout_until,
    }))
}

async fn rate_limit_reset(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
    state.rate_limiter.reset_limit(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Parse the optional X-Idempotency-Key header.
fn idempotency_key(headers: &HeaderMap) -> Result<Option<Uuid>, AppError> {
    match headers.get("x-idempotency-key") {
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| AppError::InvalidRequest("Invalid X-Idempotency-Key".to_string()))?;
            let key = Uuid::parse_str(raw)
                .map_err(|_| AppError::InvalidRequest("Invalid X-Idempotency-Key".to_string()))?;
            Ok(Some(key))
        }
        None => Ok(None),
    }
}
