// =============================================================================
// Generative-AI capability
// =============================================================================
//
// The rest of the engine sees one call: generate(system, text, media?) ->
// text. Request-body shape, retry, and timeout negotiation live entirely in
// the client.

pub mod client;
pub mod prompt;

pub use client::{AiClient, MediaPart};
