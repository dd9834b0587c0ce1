use axum::extract::State;
use axum::http::StatusCode;
use bytes::Bytes;
use metrics::{counter, histogram};
use tracing::{debug, instrument, warn, Span};

use crate::api::IngestError;
use crate::prometheus::report_dropped_records;
use crate::pseudonym::Pseudonymizer;
use crate::record::MtbFile;
use crate::router;
use crate::sinks::Publisher;

/// Parse, check, pseudonymize and publish one MTB file.
///
/// Records without `patient.id` or `episode.id` are refused before gPAS or
/// Kafka see them. A publish that is not acknowledged is surfaced as
/// [`IngestError::PublishRejected`] without being retried.
pub async fn process_mtb_file(
    pseudonymizer: &(dyn Pseudonymizer + Send + Sync),
    sink: &(dyn Publisher + Send + Sync),
    body: &[u8],
) -> Result<(), IngestError> {
    let mut record = MtbFile::from_slice(body)?;
    record.validate()?;

    pseudonymizer.pseudonymize(&mut record).await?;

    let key = record.routing_key()?;
    Span::current().record("key", key.as_str());
    let payload = record.to_json()?;

    if !sink.send(&key, payload).await? {
        return Err(IngestError::PublishRejected);
    }
    debug!("MTB file published");
    Ok(())
}

#[instrument(skip_all, fields(size = body.len(), key))]
pub async fn post_mtb_file(
    state: State<router::State>,
    body: Bytes,
) -> Result<StatusCode, IngestError> {
    counter!("mtb_files_received_total").increment(1);
    histogram!("mtb_file_size_bytes").record(body.len() as f64);

    match process_mtb_file(state.pseudonymizer.as_ref(), state.sink.as_ref(), &body).await {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(err) => {
            report_dropped_records(err.cause());
            warn!("rejected MTB file: {}", err);
            Err(err)
        }
    }
}

pub async fn delete_mtb_file() -> StatusCode {
    StatusCode::NOT_IMPLEMENTED
}
