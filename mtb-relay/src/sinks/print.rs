use async_trait::async_trait;

use metrics::counter;
use tracing::info;

use crate::api::IngestError;
use crate::record::RoutingKey;
use crate::sinks::Publisher;

pub struct PrintSink {}

#[async_trait]
impl Publisher for PrintSink {
    async fn send(&self, key: &RoutingKey, payload: String) -> Result<bool, IngestError> {
        info!(key = key.as_str(), "mtb file: {}", payload);
        counter!("mtb_files_published_total").increment(1);

        Ok(true)
    }
}
