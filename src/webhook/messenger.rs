// =============================================================================
// Messaging-platform REST client — replies and media content
// =============================================================================
//
// SECURITY: the channel access token is sent as a Bearer header and never
// logged or serialized.
// =============================================================================

use anyhow::{Context, Result};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::ai::MediaPart;

/// Platform caps a text message at 5000 characters.
const MAX_REPLY_CHARS: usize = 5000;
/// Media downloads are bounded; a hung fetch is a failure, not a wait.
const MEDIA_TIMEOUT: Duration = Duration::from_secs(20);

/// Client for the reply and content endpoints.
#[derive(Clone)]
pub struct MessengerClient {
    channel_token: String,
    api_base: String,
    data_base: String,
    client: reqwest::Client,
}

impl MessengerClient {
    pub fn new(channel_token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(MEDIA_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");

        Self {
            channel_token: channel_token.into(),
            api_base: "https://api.line.me".to_string(),
            data_base: "https://api-data.line.me".to_string(),
            client,
        }
    }

    /// Override both endpoint bases (tests, proxies).
    pub fn with_bases(mut self, api_base: impl Into<String>, data_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.data_base = data_base.into();
        self
    }

    /// POST /v2/bot/message/reply — send one text message against a reply
    /// token. Over-long text is truncated to the platform cap.
    #[instrument(skip_all, name = "messenger::reply")]
    pub async fn reply(&self, reply_token: &str, text: &str) -> Result<()> {
        let text = truncate_reply(text);
        let url = format!("{}/v2/bot/message/reply", self.api_base);
        let body = json!({
            "replyToken": reply_token,
            "messages": [{ "type": "text", "text": text }],
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.channel_token)
            .json(&body)
            .send()
            .await
            .context("reply request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            anyhow::bail!("reply endpoint returned {status}: {detail}");
        }

        debug!(chars = text.len(), "reply sent");
        Ok(())
    }

    /// GET /v2/bot/message/{id}/content — fetch the binary content of a
    /// media message. The MIME type comes from the response headers.
    #[instrument(skip(self), name = "messenger::get_content")]
    pub async fn get_content(&self, message_id: &str) -> Result<MediaPart> {
        let url = format!("{}/v2/bot/message/{}/content", self.data_base, message_id);

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.channel_token)
            .send()
            .await
            .context("content request failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("content endpoint returned {status}");
        }

        let mime = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let data = resp
            .bytes()
            .await
            .context("failed to read media content body")?
            .to_vec();

        if data.is_empty() {
            warn!(message_id, "media content was empty");
        }
        debug!(message_id, mime = %mime, bytes = data.len(), "media downloaded");

        Ok(MediaPart { mime, data })
    }
}

/// Truncate to the platform cap on a char boundary.
fn truncate_reply(text: &str) -> &str {
    if text.chars().count() <= MAX_REPLY_CHARS {
        return text;
    }
    let end = text
        .char_indices()
        .nth(MAX_REPLY_CHARS)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    &text[..end]
}

impl std::fmt::Debug for MessengerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessengerClient")
            .field("channel_token", &"<redacted>")
            .field("api_base", &self.api_base)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
