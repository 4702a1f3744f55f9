use std::time::Duration;

use broker::config::{DEFAULT_TOPIC, PUBLISHER_CLIENT_ID};
use broker::{BrokerConfig, BrokerSection, parse_qos};
use clap::Args;
use pipeline::PublishSettings;
use pipeline::config::DEFAULT_INTERVAL;
use serde::Deserialize;

use super::error::SimplePubError;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerSection,
    pub topic: Option<String>,
    pub interval_ms: Option<u64>,
    pub qos: Option<u8>,
    pub retain: Option<bool>,
    pub seed: Option<u64>,
}

pub fn load_config(path: &str) -> Result<Config, SimplePubError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| SimplePubError::Config(format!("cannot read config {path}: {e}")))?;
    toml::from_str(&content).map_err(|e| SimplePubError::Config(format!("bad config {path}: {e}")))
}

#[derive(Args, Clone, Debug)]
pub struct PubArgs {
    /// Путь к config.toml
    #[arg(long, default_value = "config.toml", env = "SIMPLE_PUB_CONFIG")]
    pub config: String,

    /// URI брокера (tcp://host:port)
    #[arg(long, env = "MQTT_BROKER")]
    pub broker: Option<String>,

    #[arg(long)]
    pub client_id: Option<String>,

    #[arg(long)]
    pub topic: Option<String>,

    /// QoS публикации (0, 1, 2)
    #[arg(long)]
    pub qos: Option<u8>,

    /// Интервал между публикациями, мс
    #[arg(long)]
    pub interval: Option<u64>,

    /// Seed для PRNG (0 = системная энтропия)
    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub retain: bool,
}

/// Итоговая конфигурация: config.toml < env/CLI
#[derive(Debug)]
pub struct Effective {
    pub broker: BrokerConfig,
    pub publish: PublishSettings,
    pub seed: u64,
}

impl Effective {
    pub fn new(args: &PubArgs) -> Result<Self, SimplePubError> {
        let cfg = match load_config(&args.config) {
            Ok(c) => c,
            Err(e) => {
                if std::path::Path::new(&args.config).exists() {
                    return Err(e);
                }
                Config::default()
            }
        };

        let broker = BrokerConfig::merge(
            PUBLISHER_CLIENT_ID,
            &cfg.broker,
            args.broker.as_deref(),
            args.client_id.as_deref(),
        );
        broker.endpoint()?;

        Ok(Self {
            broker,
            publish: PublishSettings {
                topic: args.topic.clone().or(cfg.topic).unwrap_or_else(|| DEFAULT_TOPIC.into()),
                qos: parse_qos(args.qos.or(cfg.qos).unwrap_or(0))?,
                retain: args.retain || cfg.retain.unwrap_or(false),
                interval: args
                    .interval
                    .or(cfg.interval_ms)
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_INTERVAL),
            },
            seed: args.seed.or(cfg.seed).unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use broker::QoS;

    use super::*;

    #[test]
    fn defaults_match_the_simple_example() {
        let args = PubArgs {
            config: "missing-simple-pub.toml".into(),
            broker: None,
            client_id: None,
            topic: None,
            qos: None,
            interval: Some(500),
            seed: None,
            retain: false,
        };
        let eff = Effective::new(&args).unwrap();
        assert_eq!(eff.broker.client_id, "go-mqtt-client");
        assert_eq!(eff.publish.topic, "iot-messages");
        assert_eq!(eff.publish.qos, QoS::AtMostOnce);
        assert_eq!(eff.publish.interval, Duration::from_millis(500));
        assert_eq!(eff.seed, 0);
    }
}
