//! Callback endpoint handlers.
//!
//! The platform signs every request with query parameters
//! `signature`, `timestamp` and `nonce`. The handshake (`GET`) echoes back
//! `echostr`; message deliveries (`POST`) carry an XML body and are answered
//! synchronously with reply XML.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::wechat::{InboundMessage, verify_signature};

/// Errors that can occur when handling a callback.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("request body is not UTF-8")]
    InvalidEncoding(#[from] std::str::Utf8Error),

    #[error("invalid XML body: {0}")]
    InvalidXml(#[from] quick_xml::DeError),

    #[error("failed to encode reply: {0}")]
    Encode(#[from] quick_xml::SeError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::InvalidSignature
            | WebhookError::InvalidEncoding(_)
            | WebhookError::InvalidXml(_) => StatusCode::BAD_REQUEST,
            WebhookError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Signature parameters present on every callback.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SignatureParams {
    pub signature: String,
    pub timestamp: String,
    pub nonce: String,
    /// Only sent with the handshake.
    pub echostr: String,
}

impl SignatureParams {
    fn verify(&self, token: &str) -> Result<(), WebhookError> {
        if verify_signature(token, &self.timestamp, &self.nonce, &self.signature) {
            Ok(())
        } else {
            warn!(
                timestamp = %self.timestamp,
                nonce = %self.nonce,
                signature = %self.signature,
                "Invalid callback signature"
            );
            Err(WebhookError::InvalidSignature)
        }
    }
}

/// Handshake handler: `GET /wechat`.
///
/// - 200 with `echostr` as the body when the signature is valid
/// - 400 otherwise
pub async fn handshake_handler(
    State(app_state): State<AppState>,
    Query(params): Query<SignatureParams>,
) -> Result<String, WebhookError> {
    params.verify(app_state.token())?;
    info!("Callback handshake verified");
    Ok(params.echostr)
}

/// Message handler: `POST /wechat`.
///
/// - 200 with reply XML, including for replies that report a failure
/// - 400 for a bad signature or malformed XML
pub async fn message_handler(
    State(app_state): State<AppState>,
    Query(params): Query<SignatureParams>,
    body: Bytes,
) -> Result<Response, WebhookError> {
    // Verify the signature before parsing.
    params.verify(app_state.token())?;

    let message = InboundMessage::parse(std::str::from_utf8(&body)?).map_err(|e| {
        warn!(error = %e, "Unparseable message body");
        WebhookError::from(e)
    })?;
    debug!(
        delivery_id = %message.delivery_id(),
        msg_type = %message.msg_type,
        "Received message"
    );

    let text = app_state.dispatcher().reply_to(&message).await;
    let xml = message.reply(text, Utc::now()).to_xml()?;

    Ok(([(header::CONTENT_TYPE, "application/xml; charset=utf-8")], xml).into_response())
}
