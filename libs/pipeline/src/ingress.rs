use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use broker::{Message, MessageHandler};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::OverflowPolicy;

/// Ingress handler: доставка от брокера → канал `in`.
///
/// После отмены токена новые и ожидающие места сообщения дропаются.
pub struct Ingress {
    tx: mpsc::Sender<Message>,
    overflow: OverflowPolicy,
    token: CancellationToken,
}

impl Ingress {
    pub fn new(tx: mpsc::Sender<Message>, overflow: OverflowPolicy, token: CancellationToken) -> Self {
        Self { tx, overflow, token }
    }

    /// Bounded `in` channel with its ingress side (`capacity` is clamped to ≥ 1).
    pub fn channel(
        capacity: usize,
        overflow: OverflowPolicy,
        token: CancellationToken,
    ) -> (Arc<Ingress>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Arc::new(Ingress::new(tx, overflow, token)), rx)
    }

    async fn push(&self, message: Message) {
        if self.token.is_cancelled() {
            tracing::debug!(topic = %message.topic(), "cancelled, dropping late message");
            return;
        }

        match self.overflow {
            OverflowPolicy::Drop => match self.tx.try_send(message) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(m)) => {
                    tracing::warn!(topic = %m.topic(), "ingress channel full, dropping");
                }
                Err(mpsc::error::TrySendError::Closed(m)) => {
                    tracing::debug!(topic = %m.topic(), "ingress channel closed, dropping");
                }
            },
            OverflowPolicy::BackPressure => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => {
                        tracing::debug!("cancelled while waiting for capacity, dropping late message");
                    }
                    sent = self.tx.send(message) => {
                        if let Err(mpsc::error::SendError(m)) = sent {
                            tracing::debug!(topic = %m.topic(), "ingress channel closed, dropping");
                        }
                    }
                }
            }
        }
    }
}

impl MessageHandler for Ingress {
    fn handle(&self, message: Message) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.push(message))
    }
}
