use std::time::Duration;

/// Terminal error of a broker operation, as reported through a [`crate::Token`].
///
/// Clone: одна и та же ошибка разлетается во все висящие токены при потере соединения.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("invalid broker uri '{uri}': {reason}")]
    InvalidUri { uri: String, reason: &'static str },

    #[error("invalid client id '{0}'")]
    InvalidClientId(String),

    #[error("invalid qos {0} (expected 0, 1 or 2)")]
    InvalidQos(u8),

    #[error("connect: {0}")]
    Connect(String),

    #[error("client already connected")]
    AlreadyConnected,

    #[error("client not connected")]
    NotConnected,

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("subscribe to '{topic}' rejected by broker")]
    SubscribeRejected { topic: String },

    #[error("request: {0}")]
    Request(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("client closed before completion")]
    Closed,
}

impl From<rumqttc::ClientError> for BrokerError {
    fn from(e: rumqttc::ClientError) -> Self {
        BrokerError::Request(e.to_string())
    }
}
