use std::time::Duration;

use broker::config::{DEFAULT_TOPIC, PUBLISHER_CLIENT_ID};
use broker::{BrokerConfig, BrokerSection, parse_qos};
use clap::Args;
use pipeline::PublishSettings;
use pipeline::config::DEFAULT_INTERVAL;
use serde::Deserialize;

use super::error::TelemetryPubError;

pub const DEFAULT_DEVICE_ID: &str = "bracelet-123";

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerSection,
    pub topic: Option<String>,
    pub device_id: Option<String>,
    pub interval_ms: Option<u64>,
    pub qos: Option<u8>,
    pub retain: Option<bool>,
    pub seed: Option<u64>,
}

pub fn load_config(path: &str) -> Result<Config, TelemetryPubError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| TelemetryPubError::Config(format!("cannot read config {path}: {e}")))?;
    toml::from_str(&content).map_err(|e| TelemetryPubError::Config(format!("bad config {path}: {e}")))
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug)]
pub struct PubArgs {
    /// Путь к config.toml
    #[arg(long, default_value = "config.toml", env = "TELEMETRY_PUB_CONFIG")]
    pub config: String,

    /// URI брокера (tcp://host:port)
    #[arg(long, env = "MQTT_BROKER")]
    pub broker: Option<String>,

    /// MQTT client id
    #[arg(long)]
    pub client_id: Option<String>,

    /// Топик для публикации
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

    /// Идентификатор устройства в записях
    #[arg(long)]
    pub device_id: Option<String>,

    /// Публиковать с retain
    #[arg(long)]
    pub retain: bool,
}

// ═══════════════════════════════════════════════════════════════
//  Effective: merged config
// ═══════════════════════════════════════════════════════════════

/// Итоговая конфигурация после мержа: config.toml < env/CLI
#[derive(Debug)]
pub struct Effective {
    pub broker: BrokerConfig,
    pub publish: PublishSettings,
    pub device_id: String,
    pub seed: u64,
}

impl Effective {
    pub fn new(args: &PubArgs) -> Result<Self, TelemetryPubError> {
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

    fn merge(args: &PubArgs, cfg: Config) -> Result<Self, TelemetryPubError> {
        let broker = BrokerConfig::merge(
            PUBLISHER_CLIENT_ID,
            &cfg.broker,
            args.broker.as_deref(),
            args.client_id.as_deref(),
        );
        broker.endpoint()?;

        let qos = parse_qos(args.qos.or(cfg.qos).unwrap_or(0))?;
        let interval = args
            .interval
            .or(cfg.interval_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_INTERVAL);

        Ok(Self {
            broker,
            publish: PublishSettings {
                topic: args.topic.clone().or(cfg.topic).unwrap_or_else(|| DEFAULT_TOPIC.into()),
                qos,
                retain: args.retain || cfg.retain.unwrap_or(false),
                interval,
            },
            device_id: args
                .device_id
                .clone()
                .or(cfg.device_id)
                .unwrap_or_else(|| DEFAULT_DEVICE_ID.into()),
            seed: args.seed.or(cfg.seed).unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use broker::QoS;

    use super::*;

    fn args() -> PubArgs {
        PubArgs {
            config: "does-not-exist.toml".into(),
            broker: None,
            client_id: None,
            topic: None,
            qos: None,
            interval: None,
            seed: None,
            device_id: None,
            retain: false,
        }
    }

    #[test]
    fn defaults_without_config_file() {
        let eff = Effective::new(&args()).unwrap();
        assert_eq!(eff.broker.uri, "tcp://localhost:1883");
        assert_eq!(eff.broker.client_id, "go-mqtt-client");
        assert_eq!(eff.publish.topic, "iot-messages");
        assert_eq!(eff.publish.qos, QoS::AtMostOnce);
        assert!(!eff.publish.retain);
        assert_eq!(eff.publish.interval, Duration::from_secs(1));
        assert_eq!(eff.device_id, "bracelet-123");
    }

    #[test]
    fn cli_overrides_file() {
        let cfg: Config = toml::from_str(
            r#"
            topic = "from-file"
            interval_ms = 250
            device_id = "bracelet-9"

            [broker]
            uri = "tcp://file-host:1883"
            "#,
        )
        .unwrap();
        let mut args = args();
        args.topic = Some("from-cli".into());
        args.broker = Some("mqtt://cli-host:1884".into());

        let eff = Effective::merge(&args, cfg).unwrap();
        assert_eq!(eff.publish.topic, "from-cli");
        assert_eq!(eff.publish.interval, Duration::from_millis(250));
        assert_eq!(eff.device_id, "bracelet-9");
        assert_eq!(eff.broker.endpoint().unwrap(), ("cli-host".to_string(), 1884));
    }

    #[test]
    fn rejects_bad_qos_and_uri() {
        let mut bad_qos = args();
        bad_qos.qos = Some(3);
        assert!(matches!(Effective::new(&bad_qos), Err(TelemetryPubError::Broker(_))));

        let mut bad_uri = args();
        bad_uri.broker = Some("ws://localhost".into());
        assert!(matches!(Effective::new(&bad_uri), Err(TelemetryPubError::Broker(_))));
    }

    #[test]
    fn malformed_existing_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("telemetry-pub-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "interval_ms = \"soon\"").unwrap();
        let mut args = args();
        args.config = path.to_string_lossy().into_owned();

        let result = Effective::new(&args);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(TelemetryPubError::Config(_))));
    }
}
