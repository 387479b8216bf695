//! Webhook server — the Twilio-facing HTTP surface.
//!
//! One POST route receiving the form-encoded WhatsApp webhook, answered with
//! TwiML so the reply goes back over the same channel, plus a health check.

use std::sync::Arc;

use axum::extract::{Form, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{error, info};

use crate::error::PipelineError;
use crate::pipeline::MessageProcessor;

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<MessageProcessor>,
}

/// Twilio WhatsApp webhook payload (the fields we use).
#[derive(Debug, Deserialize)]
pub struct WebhookForm {
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "Body")]
    pub body: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/webhook", post(webhook))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn webhook(State(state): State<AppState>, Form(form): Form<WebhookForm>) -> Response {
    info!(from = %form.from, "Inbound webhook");

    match state.processor.handle(&form.from, &form.body).await {
        Ok(reply) => twiml_message(&reply),
        Err(PipelineError::InvalidMessage(reason)) => {
            info!(from = %form.from, reason, "Ignoring invalid inbound message");
            twiml_empty()
        }
        Err(e) => {
            // Storage failures propagate as a 5xx so the sender retries the
            // whole message.
            error!(from = %form.from, error = %e, "Webhook processing failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn twiml_message(reply: &str) -> Response {
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Message>{}</Message></Response>",
        xml_escape(reply)
    );
    ([(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

fn twiml_empty() -> Response {
    (
        [(header::CONTENT_TYPE, "application/xml")],
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response></Response>".to_string(),
    )
        .into_response()
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
