// =============================================================================
// HTTP surface — webhook ingress plus the read-only dashboard API
// =============================================================================

pub mod rest;
