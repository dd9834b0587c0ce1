use async_trait::async_trait;

use crate::api::IngestError;
use crate::record::RoutingKey;

pub mod kafka;
pub mod print;

/// Publishes one keyed MTB file and waits for the outcome.
///
/// `Ok(true)` means the broker acknowledged the message, `Ok(false)` that it
/// took the message without acknowledging it. Errors are reserved for the
/// send mechanism itself failing.
#[async_trait]
pub trait Publisher {
    async fn send(&self, key: &RoutingKey, payload: String) -> Result<bool, IngestError>;
}
