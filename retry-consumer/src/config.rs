use common_kafka::config::{ConsumerConfig, KafkaConfig};
use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3301")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,

    /// The interval that must have passed since the last attempt before a
    /// parked message is replayed to its origin topic.
    #[envconfig(default = "10")]
    pub retry_interval_seconds: u64,

    /// The maximum amount of time a message is retried, measured from its
    /// first delivery, before it is discarded.
    #[envconfig(default = "300")]
    pub max_retry_duration_seconds: u64,

    /// How long to pause after deferring a delivery before polling the retry
    /// topic again. Mirrors the broker's redelivery backoff.
    #[envconfig(default = "1000")]
    pub redeliver_pause_ms: u64,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        ConsumerConfig::set_defaults("messaging-retry-rs", "messaging-retry");
        Self::init_from_env()
    }

    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
