use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time;

use anyhow::bail;
use envconfig::Envconfig;
use tracing::{info, Level};

use crate::pseudonym::client::GpasClient;
use crate::pseudonym::{GpasPseudonymizer, Passthrough, Pseudonymizer};
use crate::retry::RetryPolicy;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "0.0.0.0:8080")]
    pub address: SocketAddr,

    // Used for integration tests
    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(default = "10485760")]
    pub max_body_size: usize,

    pub otel_url: Option<String>,

    #[envconfig(default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(default = "mtb-relay")]
    pub otel_service_name: String,

    #[envconfig(default = "info")]
    pub log_level: Level,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub pseudonym: PseudonymConfig,
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic
    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes
    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds
    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd
    pub kafka_hosts: String,
    #[envconfig(default = "mtb-files")]
    pub kafka_topic: String,
    #[envconfig(default = "false")]
    pub kafka_tls: bool,
    #[envconfig(default = "")]
    pub kafka_client_id: String,
    #[envconfig(default = "all")]
    pub kafka_producer_acks: String, // 0 means the broker never acknowledges
}

#[derive(Envconfig, Clone)]
pub struct PseudonymConfig {
    #[envconfig(default = "false")]
    pub pseudonym_enabled: bool,

    pub gpas_url: Option<String>,

    #[envconfig(default = "")]
    pub pseudonym_target: String,

    #[envconfig(default = "5000")]
    pub gpas_request_timeout_ms: EnvMsDuration,

    #[envconfig(nested = true)]
    pub retry: RetryPolicyConfig,
}

impl PseudonymConfig {
    /// Picks the pseudonymization strategy. Fails when pseudonymization is
    /// enabled without a gPAS URL or target domain.
    pub fn pseudonymizer(&self) -> anyhow::Result<Arc<dyn Pseudonymizer + Send + Sync>> {
        if !self.pseudonym_enabled {
            info!("pseudonymization disabled, patient ids are forwarded as received");
            return Ok(Arc::new(Passthrough));
        }

        let Some(gpas_url) = self.gpas_url.as_deref().filter(|url| !url.is_empty()) else {
            bail!("PSEUDONYM_ENABLED is set but GPAS_URL is missing");
        };
        if self.pseudonym_target.is_empty() {
            bail!("PSEUDONYM_ENABLED is set but PSEUDONYM_TARGET is empty");
        }

        let client = GpasClient::new(
            gpas_url,
            self.gpas_request_timeout_ms.0,
            RetryPolicy::from(&self.retry),
        )?;
        info!(
            "pseudonymizing patient ids with gPAS at {}, domain {}",
            client.url(),
            self.pseudonym_target
        );

        Ok(Arc::new(GpasPseudonymizer::new(
            client,
            self.pseudonym_target.clone(),
        )))
    }
}

#[derive(Envconfig, Clone)]
pub struct RetryPolicyConfig {
    #[envconfig(from = "PSEUDONYM_RETRY_MAX_ATTEMPTS", default = "3")]
    pub max_attempts: u32,

    #[envconfig(from = "PSEUDONYM_RETRY_INITIAL_INTERVAL_MS", default = "1000")]
    pub initial_interval: EnvMsDuration,

    #[envconfig(from = "PSEUDONYM_RETRY_MULTIPLIER", default = "1.25")]
    pub multiplier: f64,

    #[envconfig(from = "PSEUDONYM_RETRY_MAXIMUM_INTERVAL_MS", default = "30000")]
    pub maximum_interval: EnvMsDuration,
}

impl From<&RetryPolicyConfig> for RetryPolicy {
    fn from(config: &RetryPolicyConfig) -> Self {
        RetryPolicy::new(
            config.max_attempts.max(1),
            config.initial_interval.0,
            config.multiplier,
        )
        .maximum_interval(config.maximum_interval.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}
