//! Operation Context
//!
//! Metadata about the current operation, threaded through every engine call
//! for auditing, risk scoring, and tracing.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// Context for an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationContext {
    /// Device that initiated the request, if the client supplied one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// Client IP address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<IpAddr>,

    /// Coarse location label reported for the request (e.g. "NL-Amsterdam")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Correlation ID for request tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,

    /// Step-up session token presented with the request, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

impl OperationContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self {
            device_id: None,
            client_ip: None,
            location: None,
            correlation_id: None,
            session_token: None,
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Generate a new correlation ID if not present
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }

    /// The origin label used for familiarity checks: the location if
    /// reported, otherwise the client IP.
    pub fn origin(&self) -> Option<String> {
        self.location
            .clone()
            .or_else(|| self.client_ip.map(|ip| ip.to_string()))
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}
