use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::api::IngestError;
use crate::record::MtbFile;

pub mod client;
pub mod fhir;

use client::GpasClient;
use fhir::Parameters;

/// Errors raised while exchanging a patient id for a pseudonym.
#[derive(Error, Debug)]
pub enum PseudonymError {
    #[error("failed to build the gPAS client: {0}")]
    ClientBuildError(reqwest::Error),
    #[error("gPAS could not be reached: {0}")]
    RequestFailed(reqwest::Error),
    #[error("gPAS answered with status {0}")]
    UnsuccessfulStatus(reqwest::StatusCode),
    #[error("failed to read the gPAS response: {0}")]
    ResponseBodyError(reqwest::Error),
    #[error("failed to encode the pseudonym request: {0}")]
    RequestEncodingError(serde_json::Error),
    #[error("{0}")]
    MalformedResponse(String),
}

impl From<PseudonymError> for IngestError {
    fn from(error: PseudonymError) -> Self {
        match error {
            PseudonymError::MalformedResponse(reason) => {
                IngestError::MalformedProviderResponse(reason)
            }
            other => IngestError::PseudonymUnavailable(other.to_string()),
        }
    }
}

/// Replaces the patient id of an MTB file before it leaves the relay.
#[async_trait]
pub trait Pseudonymizer {
    async fn pseudonymize(&self, record: &mut MtbFile) -> Result<(), IngestError>;
}

/// Leaves records untouched, used when pseudonymization is disabled.
pub struct Passthrough;

#[async_trait]
impl Pseudonymizer for Passthrough {
    async fn pseudonymize(&self, _record: &mut MtbFile) -> Result<(), IngestError> {
        Ok(())
    }
}

/// Swaps `patient.id` for the `system|value` pseudonym handed out by gPAS.
pub struct GpasPseudonymizer {
    client: GpasClient,
    target: String,
}

impl GpasPseudonymizer {
    pub fn new(client: GpasClient, target: String) -> Self {
        Self { client, target }
    }

    /// Ask gPAS for the pseudonym of `original`, formatted as `system|value`.
    pub async fn pseudonym_for(&self, original: &str) -> Result<String, PseudonymError> {
        let request = Parameters::pseudonym_request(&self.target, original);
        let body = serde_json::to_string(&request).map_err(PseudonymError::RequestEncodingError)?;

        let response = self.client.exchange(body).await?;
        let response: Parameters = serde_json::from_str(&response).map_err(|e| {
            PseudonymError::MalformedResponse(format!("response is not a Parameters resource: {e}"))
        })?;

        let pseudonym = response.first_pseudonym().ok_or_else(|| {
            PseudonymError::MalformedResponse("response holds no pseudonym".to_owned())
        })?;

        match (&pseudonym.system, &pseudonym.value) {
            (Some(system), Some(value)) => Ok(format!("{system}|{value}")),
            _ => Err(PseudonymError::MalformedResponse(
                "pseudonym is missing its system or value".to_owned(),
            )),
        }
    }
}

#[async_trait]
impl Pseudonymizer for GpasPseudonymizer {
    #[instrument(skip_all)]
    async fn pseudonymize(&self, record: &mut MtbFile) -> Result<(), IngestError> {
        let original = record
            .patient_id_text()
            .ok_or(IngestError::MissingRequiredField("patient.id"))?;

        let pseudonym = self.pseudonym_for(&original).await?;
        debug!("replacing patient id with pseudonym");

        record.set_patient_id(pseudonym)
    }
}
