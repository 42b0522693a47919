// =============================================================================
// Webhook transport — messaging-platform boundary
// =============================================================================
//
// Signature verification, inbound event parsing, and the reply/media client.
// Nothing in here touches the ledger directly; events are handed to the
// ingestion pipeline.

pub mod handler;
pub mod messenger;
pub mod signature;
