use std::time::Duration;

use async_trait::async_trait;
use health::HealthHandle;
use metrics::{counter, gauge};
use rdkafka::error::KafkaError;
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tracing::{debug, error, info, info_span, instrument, Instrument};

use crate::api::IngestError;
use crate::config::KafkaConfig;
use crate::record::RoutingKey;
use crate::sinks::Publisher;

struct KafkaContext {
    liveness: HealthHandle,
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        self.liveness.report_healthy();

        gauge!("mtb_kafka_callback_queue_depth").set(stats.replyq as f64);
        gauge!("mtb_kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("mtb_kafka_producer_queue_depth_limit").set(stats.msg_max as f64);
        gauge!("mtb_kafka_producer_queue_bytes").set(stats.msg_size as f64);
        gauge!("mtb_kafka_producer_queue_bytes_limit").set(stats.msg_size_max as f64);

        for (topic, stats) in stats.topics {
            gauge!(
                "mtb_kafka_produce_avg_batch_size_bytes",
                "topic" => topic
            )
            .set(stats.batchsize.avg as f64);
        }

        for (_, stats) in stats.brokers {
            let id_string = format!("{}", stats.nodeid);
            gauge!(
                "mtb_kafka_broker_requests_pending",
                "broker" => id_string.clone()
            )
            .set(stats.outbuf_cnt as f64);
            gauge!(
                "mtb_kafka_broker_responses_awaiting",
                "broker" => id_string.clone()
            )
            .set(stats.waitresp_cnt as f64);
            counter!(
                "mtb_kafka_broker_tx_errors_total",
                "broker" => id_string.clone()
            )
            .absolute(stats.txerrs);
            counter!(
                "mtb_kafka_broker_rx_errors_total",
                "broker" => id_string
            )
            .absolute(stats.rxerrs);
        }
    }
}

/// Publishes MTB files to a single Kafka topic, one message per file.
#[derive(Clone)]
pub struct KafkaSink {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaSink {
    pub fn new(config: KafkaConfig, liveness: HealthHandle) -> anyhow::Result<KafkaSink> {
        info!("connecting to Kafka brokers at {}...", config.kafka_hosts);

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            )
            .set("compression.codec", config.kafka_compression_codec)
            .set(
                "queue.buffering.max.kbytes",
                queue_buffering_kbytes(config.kafka_producer_queue_mib).to_string(),
            )
            .set("acks", config.kafka_producer_acks);

        if !config.kafka_client_id.is_empty() {
            client_config.set("client.id", config.kafka_client_id);
        }

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka configuration: {:?}", client_config);
        let producer: FutureProducer<KafkaContext> =
            client_config.create_with_context(KafkaContext { liveness })?;

        // Ping the cluster to make sure we can reach brokers, fail after 10 seconds
        drop(producer.client().fetch_metadata(
            Some("__consumer_offsets"),
            Timeout::After(Duration::new(10, 0)),
        )?);
        info!("connected to Kafka brokers");

        Ok(KafkaSink {
            producer,
            topic: config.kafka_topic,
        })
    }

    /// Wait for queued messages to be delivered, used on shutdown.
    pub fn flush(&self) -> Result<(), KafkaError> {
        self.producer.flush(Duration::new(30, 0))
    }

    fn kafka_send(&self, key: &RoutingKey, payload: &str) -> Result<DeliveryFuture, IngestError> {
        match self.producer.send_result(FutureRecord {
            topic: self.topic.as_str(),
            payload: Some(payload),
            partition: None,
            key: Some(key.as_str()),
            timestamp: None,
            headers: None,
        }) {
            Ok(ack) => Ok(ack),
            Err((e, _)) => {
                counter!("mtb_kafka_produce_errors_total").increment(1);
                error!("failed to enqueue MTB file: {}", e);
                Err(IngestError::PublishExecutionFailed(e.to_string()))
            }
        }
    }

    async fn process_ack(delivery: DeliveryFuture) -> Result<bool, IngestError> {
        match delivery.await {
            Err(_) => {
                // The producer dropped the delivery callback, usually on shutdown
                counter!("mtb_kafka_produce_errors_total").increment(1);
                error!("stopped waiting for the Kafka acknowledgment");
                Err(IngestError::PublishInterrupted)
            }
            Ok(Err((err, _))) => {
                counter!("mtb_kafka_produce_errors_total").increment(1);
                error!("failed to produce to Kafka: {}", err);
                Err(IngestError::PublishExecutionFailed(err.to_string()))
            }
            Ok(Ok((partition, offset))) => {
                if !acknowledged(offset) {
                    error!(partition, "MTB file sent to Kafka without acknowledgment");
                    return Ok(false);
                }
                debug!(partition, offset, "MTB file acknowledged by Kafka");
                counter!("mtb_files_published_total").increment(1);
                Ok(true)
            }
        }
    }
}

fn queue_buffering_kbytes(queue_mib: u32) -> u32 {
    queue_mib.saturating_mul(1024)
}

/// Brokers hand out an offset only for writes they acknowledged.
fn acknowledged(offset: i64) -> bool {
    offset >= 0
}

#[async_trait]
impl Publisher for KafkaSink {
    #[instrument(skip_all, fields(key = key.as_str()))]
    async fn send(&self, key: &RoutingKey, payload: String) -> Result<bool, IngestError> {
        let ack = self.kafka_send(key, &payload)?;
        Self::process_ack(ack)
            .instrument(info_span!("ack_wait_one"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use health::HealthRegistry;
    use rdkafka::mocking::MockCluster;
    use rdkafka::producer::DefaultProducerContext;
    use rdkafka::types::{RDKafkaApiKey, RDKafkaRespErr};
    use serde_json::json;

    fn start_on_mocked_sink(
        acks: &str,
    ) -> (MockCluster<'static, DefaultProducerContext>, KafkaSink) {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("rdkafka".to_string(), Duration::from_secs(30));
        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        let config = KafkaConfig {
            kafka_producer_linger_ms: 0,
            kafka_producer_queue_mib: 50,
            kafka_message_timeout_ms: 500,
            kafka_compression_codec: "none".to_string(),
            kafka_hosts: cluster.bootstrap_servers(),
            kafka_topic: "mtb-files".to_string(),
            kafka_tls: false,
            kafka_client_id: "mtb-relay-test".to_string(),
            kafka_producer_acks: acks.to_string(),
        };
        let sink = KafkaSink::new(config, handle).expect("failed to create sink");
        (cluster, sink)
    }

    fn key() -> RoutingKey {
        RoutingKey::new(&json!("P1"), &json!("E1")).expect("failed to build key")
    }

    async fn wait_until_ready(sink: &KafkaSink) {
        // Wait for producer to be healthy, to keep kafka_message_timeout_ms short and tests faster
        for _ in 0..20 {
            if sink.send(&key(), "{}".to_string()).await.is_ok() {
                break;
            }
        }
    }

    #[test]
    fn queue_size_is_converted_to_kbytes() {
        assert_eq!(queue_buffering_kbytes(400), 409_600);
        assert_eq!(queue_buffering_kbytes(5_000_000), u32::MAX);
    }

    #[test]
    fn negative_offsets_are_not_acknowledged() {
        assert!(acknowledged(0));
        assert!(acknowledged(42));
        assert!(!acknowledged(-1));
        assert!(!acknowledged(-1001));
    }

    #[tokio::test]
    async fn kafka_sink_error_handling() {
        // Uses a mocked Kafka broker that allows injecting write errors, to check error handling.
        // We test different cases in a single test to amortize the startup cost of the producer.
        let (cluster, sink) = start_on_mocked_sink("all");
        wait_until_ready(&sink).await;

        let acked = sink
            .send(&key(), r#"{"patient":{"id":"P1"}}"#.to_string())
            .await
            .expect("failed to send one initial MTB file");
        assert!(acked);

        // Producer should reject a 2MB message, twice the default `message.max.bytes`
        let big_payload = "x".repeat(2_000_000);
        match sink.send(&key(), big_payload).await {
            Err(IngestError::PublishExecutionFailed(_)) => {} // Expected
            Err(err) => panic!("wrong error code {}", err),
            Ok(_) => panic!("should have errored"),
        };

        // Simulate unretriable errors
        cluster.clear_request_errors(RDKafkaApiKey::Produce);
        let err = [RDKafkaRespErr::RD_KAFKA_RESP_ERR_MSG_SIZE_TOO_LARGE; 1];
        cluster.request_errors(RDKafkaApiKey::Produce, &err);
        match sink.send(&key(), "{}".to_string()).await {
            Err(IngestError::PublishExecutionFailed(_)) => {} // Expected
            Err(err) => panic!("wrong error code {}", err),
            Ok(_) => panic!("should have errored"),
        };
        cluster.clear_request_errors(RDKafkaApiKey::Produce);
        let err = [RDKafkaRespErr::RD_KAFKA_RESP_ERR_INVALID_PARTITIONS; 1];
        cluster.request_errors(RDKafkaApiKey::Produce, &err);
        match sink.send(&key(), "{}".to_string()).await {
            Err(IngestError::PublishExecutionFailed(_)) => {} // Expected
            Err(err) => panic!("wrong error code {}", err),
            Ok(_) => panic!("should have errored"),
        };

        // Simulate transient errors, messages should go through OK
        cluster.clear_request_errors(RDKafkaApiKey::Produce);
        let err = [RDKafkaRespErr::RD_KAFKA_RESP_ERR_BROKER_NOT_AVAILABLE; 2];
        cluster.request_errors(RDKafkaApiKey::Produce, &err);
        sink.send(&key(), "{}".to_string())
            .await
            .expect("failed to send one MTB file after recovery");

        // Timeout on a sustained transient error
        cluster.clear_request_errors(RDKafkaApiKey::Produce);
        let err = [RDKafkaRespErr::RD_KAFKA_RESP_ERR_BROKER_NOT_AVAILABLE; 50];
        cluster.request_errors(RDKafkaApiKey::Produce, &err);
        match sink.send(&key(), "{}".to_string()).await {
            Err(IngestError::PublishExecutionFailed(_)) => {} // Expected
            Err(err) => panic!("wrong error code {}", err),
            Ok(_) => panic!("should have errored"),
        };
    }

    #[tokio::test]
    async fn unacknowledged_writes_report_false() {
        let (_cluster, sink) = start_on_mocked_sink("0");
        wait_until_ready(&sink).await;

        let acked = sink
            .send(&key(), "{}".to_string())
            .await
            .expect("send failed");
        assert!(!acked);
    }
}
