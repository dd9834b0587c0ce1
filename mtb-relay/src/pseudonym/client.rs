use std::sync::Arc;
use std::time;

use metrics::counter;
use reqwest::header;
use tracing::{debug, instrument, warn};

use crate::pseudonym::PseudonymError;
use crate::retry::RetryPolicy;
use crate::time::{Sleeper, TokioSleeper};

pub const PSEUDONYMIZE_PATH: &str = "/ttp-fhir/fhir/gpas/$pseudonymizeAllowCreate";

/// HTTP client for the gPAS pseudonym exchange.
///
/// Transport failures (refused connections, timeouts, broken requests) are
/// retried according to the configured [`RetryPolicy`]. A response with a
/// non-success status is final and is never retried.
#[derive(Clone)]
pub struct GpasClient {
    client: reqwest::Client,
    url: String,
    retry_policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper + Send + Sync>,
}

impl GpasClient {
    pub fn new(
        base_url: &str,
        request_timeout: time::Duration,
        retry_policy: RetryPolicy,
    ) -> Result<Self, PseudonymError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("mtb-relay")
            .timeout(request_timeout)
            .build()
            .map_err(PseudonymError::ClientBuildError)?;

        Ok(Self {
            client,
            url: format!("{}{}", base_url.trim_end_matches('/'), PSEUDONYMIZE_PATH),
            retry_policy,
            sleeper: Arc::new(TokioSleeper::default()),
        })
    }

    /// Replace the sleeper used between attempts.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper + Send + Sync>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST a serialized `Parameters` resource and return the raw response body.
    #[instrument(skip_all)]
    pub async fn exchange(&self, body: String) -> Result<String, PseudonymError> {
        let response = self
            .retry_policy
            .run(self.sleeper.as_ref(), is_retryable, |_| {
                counter!("pseudonym_requests_total").increment(1);
                self.client.post(&self.url).body(body.clone()).send()
            })
            .await
            .map_err(|e| {
                counter!("pseudonym_request_errors_total", "cause" => "transport").increment(1);
                PseudonymError::RequestFailed(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            counter!("pseudonym_request_errors_total", "cause" => "status").increment(1);
            warn!("gPAS request unsuccessful, status {}", status);
            return Err(PseudonymError::UnsuccessfulStatus(status));
        }
        debug!("gPAS request succeeded, status {}", status);

        response
            .text()
            .await
            .map_err(PseudonymError::ResponseBodyError)
    }
}

fn is_retryable(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout() || error.is_request()
}
