//! Consume item events, persisting them and parking early updates on the
//! retry topic.
use std::future::ready;
use std::sync::Arc;

use axum::{routing::get, Router};
use common_kafka::kafka_consumer::SingleTopicConsumer;
use common_kafka::kafka_producer::create_kafka_producer;
use envconfig::Envconfig;
use health::HealthRegistry;
use item_consumer::config::Config;
use item_consumer::consumer::{CreateItemConsumer, UpdateItemConsumer};
use item_consumer::items::PostgresItemStore;
use item_consumer::service::ItemService;
use retry_common::metrics::{serve, setup_metrics_routes};
use retry_common::sink::KafkaSink;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

async fn index() -> &'static str {
    "item consumer"
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::init_from_env().expect("invalid configuration");

    let health_registry = HealthRegistry::new("liveness");
    let create_liveness = health_registry
        .register("create-consumer".to_string(), time::Duration::seconds(60))
        .await;
    let update_liveness = health_registry
        .register("update-consumer".to_string(), time::Duration::seconds(60))
        .await;
    let producer_liveness = health_registry
        .register("rdkafka".to_string(), time::Duration::seconds(30))
        .await;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_pg_connections)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to postgres");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    let producer = create_kafka_producer(&config.kafka, producer_liveness)
        .await
        .expect("failed to create kafka producer");
    let service = Arc::new(ItemService::new(
        PostgresItemStore::new(pool),
        KafkaSink::new(producer),
        &config.retry_topic,
    ));

    let create_consumer = CreateItemConsumer::new(
        SingleTopicConsumer::new(
            config.kafka.clone(),
            config.consumer_config(&config.create_item_topic),
        )
        .expect("failed to create create-item consumer"),
        service.clone(),
        create_liveness,
    );
    let update_consumer = UpdateItemConsumer::new(
        SingleTopicConsumer::new(
            config.kafka.clone(),
            config.consumer_config(&config.update_item_topic),
        )
        .expect("failed to create update-item consumer"),
        service.clone(),
        update_liveness,
    );

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
        create_topic = %config.create_item_topic,
        update_topic = %config.update_item_topic,
        "starting item consumers"
    );
    tokio::select! {
        result = create_consumer.run() => {
            error!("create-item consumer exited: {:?}", result);
        }
        result = update_consumer.run() => {
            error!("update-item consumer exited: {:?}", result);
        }
    }
    std::process::exit(1);
}
