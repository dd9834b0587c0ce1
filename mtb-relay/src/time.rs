use std::time::Duration;

use async_trait::async_trait;

#[async_trait]
pub trait Sleeper {
    // Wait for the given backoff interval
    async fn sleep(&self, duration: Duration);
}

#[derive(Clone, Default)]
pub struct TokioSleeper {}

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}
