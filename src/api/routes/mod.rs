//! API route modules.

pub mod webhooks;
