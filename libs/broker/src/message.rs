use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use rumqttc::QoS;

// ═══════════════════════════════════════════════════════════════
//  Inbound message
// ═══════════════════════════════════════════════════════════════

/// Delivery received from the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    topic: String,
    payload: Bytes,
    qos: QoS,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as text, invalid UTF-8 replaced.
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }
}

impl From<rumqttc::Publish> for Message {
    fn from(publish: rumqttc::Publish) -> Self {
        Self {
            topic: publish.topic,
            payload: publish.payload,
            qos: publish.qos,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Handler
// ═══════════════════════════════════════════════════════════════

/// Per-delivery callback.
///
/// Вызывается из driver-задачи клиента последовательно: следующий
/// `handle` не начнётся, пока не завершился предыдущий. Долгий `handle`
/// тормозит event loop и тем самым создаёт back-pressure на брокер.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: Message) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Adapter for synchronous closures.
pub struct FnHandler<F>(F);

impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(Message) + Send + Sync,
{
    fn handle(&self, message: Message) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        (self.0)(message);
        Box::pin(async {})
    }
}

pub fn handler_fn<F>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Message) + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

// ═══════════════════════════════════════════════════════════════
//  Topic filters
// ═══════════════════════════════════════════════════════════════

/// MQTT topic filter match with `+` (one level) and `#` (rest) wildcards.
///
/// Топики на `$` не матчатся wildcard'ом на первом уровне.
pub fn filter_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut levels = topic.split('/');
    for part in filter.split('/') {
        match part {
            "#" => return true,
            "+" => {
                if levels.next().is_none() {
                    return false;
                }
            }
            exact => {
                if levels.next() != Some(exact) {
                    return false;
                }
            }
        }
    }
    levels.next().is_none()
}
