use std::time::Duration;

use rumqttc::{MqttOptions, QoS};
use serde::Deserialize;

use crate::BrokerError;

pub const DEFAULT_BROKER_URI: &str = "tcp://localhost:1883";
pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_TOPIC: &str = "iot-messages";
pub const PUBLISHER_CLIENT_ID: &str = "go-mqtt-client";
pub const SUBSCRIBER_CLIENT_ID: &str = "go-mqtt-subscriber";

// ═══════════════════════════════════════════════════════════════
//  [broker] section (TOML)
// ═══════════════════════════════════════════════════════════════

/// Секция `[broker]` в config.toml. Все поля опциональны: незаданные
/// берутся из CLI/env или из значений по умолчанию.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct BrokerSection {
    pub uri: Option<String>,
    pub client_id: Option<String>,
    pub keep_alive_secs: Option<u64>,
    pub request_capacity: Option<usize>,
    pub reconnect_delay_ms: Option<u64>,
    pub disconnect_grace_ms: Option<u64>,
    pub clean_session: Option<bool>,
}

// ═══════════════════════════════════════════════════════════════
//  BrokerConfig: resolved
// ═══════════════════════════════════════════════════════════════

/// Connection settings after merging file, env and CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub uri: String,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Capacity of the request queue between client handles and the event loop.
    pub request_capacity: usize,
    /// Pause before polling again after the connection dropped.
    pub reconnect_delay: Duration,
    pub disconnect_grace: Duration,
    pub clean_session: bool,
}

impl BrokerConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            uri: DEFAULT_BROKER_URI.to_string(),
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(30),
            request_capacity: 10,
            reconnect_delay: Duration::from_millis(1000),
            disconnect_grace: Duration::from_millis(250),
            clean_session: true,
        }
    }

    /// Merge: defaults < `[broker]` section < CLI/env overrides.
    pub fn merge(
        default_client_id: &str,
        section: &BrokerSection,
        uri: Option<&str>,
        client_id: Option<&str>,
    ) -> Self {
        let base = Self::new(default_client_id);
        Self {
            uri: uri.map(str::to_string).or_else(|| section.uri.clone()).unwrap_or(base.uri),
            client_id: client_id
                .map(str::to_string)
                .or_else(|| section.client_id.clone())
                .unwrap_or(base.client_id),
            keep_alive: section.keep_alive_secs.map(Duration::from_secs).unwrap_or(base.keep_alive),
            request_capacity: section.request_capacity.unwrap_or(base.request_capacity),
            reconnect_delay: section
                .reconnect_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(base.reconnect_delay),
            disconnect_grace: section
                .disconnect_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(base.disconnect_grace),
            clean_session: section.clean_session.unwrap_or(base.clean_session),
        }
    }

    /// Host and port parsed from [`Self::uri`].
    pub fn endpoint(&self) -> Result<(String, u16), BrokerError> {
        parse_uri(&self.uri)
    }

    pub fn mqtt_options(&self) -> Result<MqttOptions, BrokerError> {
        if self.client_id.trim().is_empty() || self.client_id.starts_with(' ') {
            return Err(BrokerError::InvalidClientId(self.client_id.clone()));
        }
        let (host, port) = self.endpoint()?;
        // rumqttc склеивает адрес как `host:port`, IPv6 нужны скобки.
        let host = if host.contains(':') { format!("[{host}]") } else { host };
        let mut options = MqttOptions::new(self.client_id.clone(), host, port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(self.clean_session);
        Ok(options)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new(PUBLISHER_CLIENT_ID)
    }
}

/// Разобрать `tcp://host:port`, `mqtt://host:port` или `host[:port]`.
fn parse_uri(uri: &str) -> Result<(String, u16), BrokerError> {
    let invalid = |reason: &'static str| BrokerError::InvalidUri {
        uri: uri.to_string(),
        reason,
    };

    let rest = match uri.split_once("://") {
        Some(("tcp" | "mqtt", rest)) => rest,
        Some(_) => return Err(invalid("unsupported scheme (expected tcp:// or mqtt://)")),
        None => uri,
    };
    let rest = rest.trim_end_matches('/');
    if rest.contains('/') {
        return Err(invalid("unexpected path"));
    }

    let parse_port = |port: &str| port.parse::<u16>().map_err(|_| invalid("bad port"));

    let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
        let (host, tail) = bracketed.split_once(']').ok_or_else(|| invalid("unclosed '['"))?;
        let port = match tail {
            "" => DEFAULT_PORT,
            tail => parse_port(tail.strip_prefix(':').ok_or_else(|| invalid("bad port"))?)?,
        };
        (host, port)
    } else {
        match rest.rsplit_once(':') {
            Some((host, _)) if host.contains(':') => return Err(invalid("IPv6 address must be in brackets")),
            Some((host, port)) => (host, parse_port(port)?),
            None => (rest, DEFAULT_PORT),
        }
    };
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    Ok((host.to_string(), port))
}

/// QoS level from its numeric form.
pub fn parse_qos(level: u8) -> Result<QoS, BrokerError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(BrokerError::InvalidQos(other)),
    }
}
