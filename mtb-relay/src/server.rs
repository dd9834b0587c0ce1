use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use health::{ComponentStatus, HealthRegistry};
use tokio::net::TcpListener;

use crate::config::Config;
use crate::prometheus::setup_metrics_recorder;
use crate::router;
use crate::sinks::kafka::KafkaSink;
use crate::sinks::print::PrintSink;
use crate::sinks::Publisher;

type Sinks = (Arc<dyn Publisher + Send + Sync>, Option<Arc<KafkaSink>>);

fn create_sink(config: &Config, liveness: &HealthRegistry) -> anyhow::Result<Sinks> {
    if config.print_sink {
        // Print sink is only used for local debug, don't allow a container with it to run on prod
        liveness
            .register("print_sink".to_string(), Duration::from_secs(30))
            .report_status(ComponentStatus::Unhealthy);

        Ok((Arc::new(PrintSink {}), None))
    } else {
        let sink_liveness = liveness.register("rdkafka".to_string(), Duration::from_secs(30));
        let kafka = Arc::new(KafkaSink::new(config.kafka.clone(), sink_liveness)?);
        let sink: Arc<dyn Publisher + Send + Sync> = kafka.clone();

        Ok((sink, Some(kafka)))
    }
}

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let liveness = HealthRegistry::new("liveness");

    let pseudonymizer = config.pseudonym.pseudonymizer()?;
    let (sink, kafka) = create_sink(&config, &liveness)?;

    // Don't install metrics unless asked to
    let metrics = match config.export_prometheus {
        true => Some(setup_metrics_recorder()?),
        false => None,
    };

    let app = router::router(
        liveness,
        sink,
        pseudonymizer,
        config.max_body_size,
        metrics,
    );

    tracing::info!("listening on {:?}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    if let Some(kafka) = kafka {
        tracing::info!("flushing pending Kafka messages");
        kafka.flush()?;
    }
    Ok(())
}
