use std::time::Duration;

use broker::config::{DEFAULT_TOPIC, SUBSCRIBER_CLIENT_ID};
use broker::{BrokerConfig, BrokerSection, QoS, parse_qos};
use clap::Args;
use pipeline::OverflowPolicy;
use pipeline::config::{DEFAULT_BUFFER, DEFAULT_UNSUBSCRIBE_TIMEOUT};
use serde::Deserialize;

use super::error::SubscriberError;

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerSection,
    pub topic: Option<String>,
    pub qos: Option<u8>,
    /// Ёмкость каналов `in`/`out`.
    pub buffer: Option<usize>,
    pub overflow: Option<OverflowPolicy>,
    pub unsubscribe_timeout_ms: Option<u64>,
}

pub fn load_config(path: &str) -> Result<Config, SubscriberError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| SubscriberError::Config(format!("cannot read config {path}: {e}")))?;
    toml::from_str(&content).map_err(|e| SubscriberError::Config(format!("bad config {path}: {e}")))
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug)]
pub struct SubArgs {
    /// Путь к config.toml
    #[arg(long, default_value = "config.toml", env = "SUBSCRIBER_CONFIG")]
    pub config: String,

    /// URI брокера (tcp://host:port)
    #[arg(long, env = "MQTT_BROKER")]
    pub broker: Option<String>,

    #[arg(long)]
    pub client_id: Option<String>,

    /// Топик (допустимы wildcard'ы + и #)
    #[arg(long)]
    pub topic: Option<String>,

    /// QoS подписки (0, 1, 2)
    #[arg(long)]
    pub qos: Option<u8>,

    /// Ёмкость внутренних каналов (≥ 1)
    #[arg(long)]
    pub buffer: Option<usize>,

    /// Поведение при полном канале: back_pressure | drop
    #[arg(long)]
    pub overflow: Option<OverflowPolicy>,
}

// ═══════════════════════════════════════════════════════════════
//  Effective: merged config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct Effective {
    pub broker: BrokerConfig,
    pub topic: String,
    pub qos: QoS,
    pub buffer: usize,
    pub overflow: OverflowPolicy,
    pub unsubscribe_timeout: Duration,
}

impl Effective {
    pub fn new(args: &SubArgs) -> Result<Self, SubscriberError> {
        let cfg = match load_config(&args.config) {
            Ok(c) => c,
            Err(e) => {
                if std::path::Path::new(&args.config).exists() {
                    return Err(e);
                }
                Config::default()
            }
        };
        Self::merge(args, cfg)
    }

    fn merge(args: &SubArgs, cfg: Config) -> Result<Self, SubscriberError> {
        let broker = BrokerConfig::merge(
            SUBSCRIBER_CLIENT_ID,
            &cfg.broker,
            args.broker.as_deref(),
            args.client_id.as_deref(),
        );
        broker.endpoint()?;

        let buffer = args.buffer.or(cfg.buffer).unwrap_or(DEFAULT_BUFFER);
        if buffer == 0 {
            return Err(SubscriberError::Config("buffer must be at least 1".into()));
        }

        Ok(Self {
            broker,
            topic: args.topic.clone().or(cfg.topic).unwrap_or_else(|| DEFAULT_TOPIC.into()),
            qos: parse_qos(args.qos.or(cfg.qos).unwrap_or(1))?,
            buffer,
            overflow: args.overflow.or(cfg.overflow).unwrap_or_default(),
            unsubscribe_timeout: cfg
                .unsubscribe_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_UNSUBSCRIBE_TIMEOUT),
        })
    }
}
