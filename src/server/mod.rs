//! HTTP server for the bookkeeping bot.
//!
//! # Endpoints
//!
//! - `GET /wechat` - Platform handshake: echoes `echostr` when the signature is valid
//! - `POST /wechat` - Accepts message deliveries and answers with reply XML
//! - `GET /health` - Returns 200 if server is running

use std::sync::Arc;

use crate::dispatch::MessageDispatch;

pub mod health;
pub mod webhook;

pub use health::health_handler;
pub use webhook::{handshake_handler, message_handler};

/// Shared application state, passed to handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    dispatcher: Arc<dyn MessageDispatch>,

    /// Shared secret for the SHA-1 request signature.
    token: String,
}

impl AppState {
    pub fn new(dispatcher: Arc<dyn MessageDispatch>, token: impl Into<String>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                dispatcher,
                token: token.into(),
            }),
        }
    }

    pub fn dispatcher(&self) -> &dyn MessageDispatch {
        self.inner.dispatcher.as_ref()
    }

    pub fn token(&self) -> &str {
        &self.inner.token
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/wechat", get(handshake_handler).post(message_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
