//! Replay parked messages from the retry topic back to their origin topics.
use std::future::ready;
use std::time::Duration;

use axum::{routing::get, Router};
use common_kafka::kafka_consumer::SingleTopicConsumer;
use common_kafka::kafka_producer::create_kafka_producer;
use health::HealthRegistry;
use retry_common::metrics::{serve, setup_metrics_routes};
use retry_common::policy::RetryPolicy;
use retry_common::sink::KafkaSink;
use retry_consumer::config::Config;
use retry_consumer::consumer::RetryConsumer;
use retry_consumer::error::ConsumerError;
use tracing::info;
use tracing_subscriber::EnvFilter;

async fn index() -> &'static str {
    "messaging retry consumer"
}

#[tokio::main]
async fn main() -> Result<(), ConsumerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::init_with_defaults().expect("invalid configuration");
    let policy = RetryPolicy::new(
        config.retry_interval_seconds,
        config.max_retry_duration_seconds,
    )
    .expect("invalid retry configuration");

    let health_registry = HealthRegistry::new("liveness");
    let consumer_liveness = health_registry
        .register("consumer".to_string(), time::Duration::seconds(60))
        .await;
    let producer_liveness = health_registry
        .register("rdkafka".to_string(), time::Duration::seconds(30))
        .await;

    let consumer = SingleTopicConsumer::new(config.kafka.clone(), config.consumer.clone())?;
    let producer = create_kafka_producer(&config.kafka, producer_liveness).await?;
    let sink = KafkaSink::new(producer);

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route(
            "/_liveness",
            get(move || ready(health_registry.get_status())),
        );
    let router = setup_metrics_routes(router);
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    info!(
        topic = %config.consumer.kafka_consumer_topic,
        "starting retry consumer"
    );
    let retry_consumer = RetryConsumer::new(
        consumer,
        sink,
        policy,
        Duration::from_millis(config.redeliver_pause_ms),
        consumer_liveness,
    );
    retry_consumer.run().await
}
