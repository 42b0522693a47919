// =============================================================================
// Webhook endpoint — signature check, event fan-out, reply
// =============================================================================
//
// The handler verifies the signature over the raw body before any parsing,
// acks fast, and processes each event in its own task. No event path
// propagates a fault back to the transport: everything ends in either a
// reply or a logged error, and the next delivery is unaffected.
// =============================================================================

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::app_state::AppState;
use crate::ingest;
use crate::webhook::signature;

// ---------------------------------------------------------------------------
// Inbound event model
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub events: Vec<InboundEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub reply_token: Option<String>,
    #[serde(default)]
    pub source: EventSource,
    #[serde(default)]
    pub message: Option<InboundMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: Option<String>,
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// POST /webhook. Raw body in, fast 200 out; the real work happens in
/// per-event tasks.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let presented = headers
        .get(signature::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !signature::verify(&state.channel_secret, &body, presented) {
        warn!("webhook signature verification failed");
        return StatusCode::FORBIDDEN;
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            // The platform redelivers on non-2xx; a malformed body will not
            // improve on retry, so ack it.
            warn!(error = %e, "unparsable webhook body — acknowledged and dropped");
            return StatusCode::OK;
        }
    };

    debug!(count = payload.events.len(), "webhook events received");
    for event in payload.events {
        let state = state.clone();
        tokio::spawn(async move {
            process_event(state, event).await;
        });
    }

    StatusCode::OK
}

/// Handle one inbound event end to end.
async fn process_event(state: Arc<AppState>, event: InboundEvent) {
    if event.kind != "message" {
        debug!(kind = %event.kind, "ignoring non-message event");
        return;
    }
    let Some(message) = event.message else {
        return;
    };
    let Some(reply_token) = event.reply_token else {
        debug!("message event without reply token");
        return;
    };
    let user_id = event
        .source
        .user_id
        .unwrap_or_else(|| "anonymous".to_string());

    let reply = match message.kind.as_str() {
        "text" => {
            let text = message.text.unwrap_or_default();
            ingest::respond_to_text(&state, &user_id, &text).await
        }
        "image" | "audio" => match state.messenger.get_content(&message.id).await {
            Ok(media) => {
                let description = if message.kind == "image" {
                    "The user sent this chart image. Analyse the setup shown."
                } else {
                    "The user sent this voice note describing a market situation. \
                     Respond to what they describe."
                };
                ingest::respond_to_media(&state, &user_id, media, description).await
            }
            Err(e) => {
                error!(error = %e, message_id = %message.id, "media download failed");
                "Sorry — I couldn't fetch that attachment. Please send it again.".to_string()
            }
        },
        other => {
            debug!(kind = other, "unsupported message type");
            "I can read text, chart images, and voice notes.".to_string()
        }
    };

    if let Err(e) = state.messenger.reply(&reply_token, &reply).await {
        error!(error = %e, "failed to send reply");
    }
}

// =============================================================================
// Tests
// =============================================================================
