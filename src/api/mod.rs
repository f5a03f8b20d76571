//! API module
//!
//! HTTP surface: routes, middleware, and the shared application state.

pub mod middleware;
pub mod routes;

use std::sync::Arc;

use crate::config::Config;
use crate::device::DeviceTrustManager;
use crate::handlers::{ReceiveHandler, TransferHandler};
use crate::ratelimit::RateLimiter;
use crate::store::AccountStore;

pub use routes::create_router;

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub transfers: Arc<TransferHandler>,
    pub receives: Arc<ReceiveHandler>,
    pub devices: Arc<DeviceTrustManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub accounts: Arc<dyn AccountStore>,
}
