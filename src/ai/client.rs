// =============================================================================
// Gemini REST client — generateContent with bounded, jittered retry
// =============================================================================
//
// SECURITY: the API key is sent as a header and never logged or serialized.
//
// Failure policy: each attempt is capped by an overall timeout; transport
// errors, 429 and 5xx responses are retried a fixed number of times with
// exponential backoff plus jitter. Other 4xx responses fail immediately —
// retrying a rejected request is pointless. Callers treat an exhausted
// retry budget as a recoverable failure (apology reply), never a crash.
// =============================================================================

use anyhow::Result;
use base64::Engine;
use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Attempts beyond the first.
const MAX_RETRIES: u32 = 2;
/// Base backoff doubled per retry.
const BACKOFF_BASE_MS: u64 = 500;
/// Random jitter added on top of each backoff.
const BACKOFF_JITTER_MS: u64 = 250;
/// Hard cap per attempt; a hung call is a failure, not a wait.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Binary attachment forwarded inline with the prompt.
#[derive(Debug, Clone)]
pub struct MediaPart {
    /// MIME type as reported by the messaging platform (image/jpeg, audio/m4a, ...).
    pub mime: String,
    pub data: Vec<u8>,
}

/// Gemini generateContent client.
#[derive(Clone)]
pub struct AiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl AiClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `api_key` — Gemini API key (sent as `x-goog-api-key`, never in the URL).
    /// * `model`   — e.g. "gemini-2.0-flash".
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(ATTEMPT_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");

        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            client,
        }
    }

    /// Override the endpoint base URL (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    // -------------------------------------------------------------------------
    // Generation
    // -------------------------------------------------------------------------

    /// Generate a reply for `user_text` under `system_prompt`, with an
    /// optional inline media part. Returns the concatenated candidate text.
    #[instrument(skip_all, name = "ai::generate", fields(model = %self.model))]
    pub async fn generate(
        &self,
        system_prompt: &str,
        user_text: &str,
        media: Option<&MediaPart>,
    ) -> Result<String> {
        let body = build_request_body(system_prompt, user_text, media);
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );

        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying AI call");
                tokio::time::sleep(delay).await;
            }

            match self.attempt(&url, &body).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    if !e.retryable {
                        return Err(e.error);
                    }
                    warn!(attempt, error = %e.error, "AI call failed");
                    last_err = Some(e.error);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| anyhow::anyhow!("AI call failed with no recorded error"))
            .context(format!("AI call exhausted {MAX_RETRIES} retries")))
    }

    async fn attempt(&self, url: &str, body: &Value) -> std::result::Result<String, AttemptError> {
        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AttemptError {
                error: anyhow::Error::new(e).context("generateContent request failed"),
                retryable: true,
            })?;

        let status = resp.status();
        let payload: Value = resp.json().await.map_err(|e| AttemptError {
            error: anyhow::Error::new(e).context("failed to parse generateContent response"),
            retryable: true,
        })?;

        if !status.is_success() {
            let retryable = status.as_u16() == 429 || status.is_server_error();
            return Err(AttemptError {
                error: anyhow::anyhow!("generateContent returned {status}: {payload}"),
                retryable,
            });
        }

        let text = extract_candidate_text(&payload).ok_or_else(|| AttemptError {
            error: anyhow::anyhow!("generateContent response had no candidate text: {payload}"),
            retryable: true,
        })?;

        debug!(chars = text.len(), "AI reply received");
        Ok(text)
    }
}

struct AttemptError {
    error: anyhow::Error,
    retryable: bool,
}

// ---------------------------------------------------------------------------
// Request / response shaping
// ---------------------------------------------------------------------------

/// Build the generateContent request body. Media is embedded inline as
/// base64 next to the text part.
fn build_request_body(system_prompt: &str, user_text: &str, media: Option<&MediaPart>) -> Value {
    let mut parts = vec![json!({ "text": user_text })];
    if let Some(m) = media {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&m.data);
        parts.push(json!({
            "inline_data": { "mime_type": m.mime, "data": encoded }
        }));
    }

    json!({
        "system_instruction": { "parts": [{ "text": system_prompt }] },
        "contents": [{ "role": "user", "parts": parts }],
        "generation_config": { "temperature": 0.7 }
    })
}

/// Concatenate the text parts of the first candidate.
fn extract_candidate_text(payload: &Value) -> Option<String> {
    let parts = payload
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("");

    (!text.is_empty()).then_some(text)
}

/// Exponential backoff with jitter: 500ms, 1s, 2s... plus up to 250ms noise.
fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE_MS.saturating_mul(1 << (attempt.saturating_sub(1)));
    let jitter = rand::thread_rng().gen_range(0..BACKOFF_JITTER_MS);
    Duration::from_millis(base + jitter)
}

impl std::fmt::Debug for AiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiClient")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
