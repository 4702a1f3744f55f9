use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rumqttc::{AsyncClient, ClientError, Event, EventLoop, Outgoing, Packet, QoS, SubscribeReasonCode};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::message::{Message, MessageHandler, filter_matches};
use crate::token::{Completion, Pending, RequestKind, Token, Waiter};
use crate::{BrokerConfig, BrokerError};

type LostCallback = Arc<dyn Fn(&BrokerError) + Send + Sync>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ═══════════════════════════════════════════════════════════════
//  Routes: topic filter → handler
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct Routes {
    filters: Vec<(String, Arc<dyn MessageHandler>)>,
    fallback: Option<Arc<dyn MessageHandler>>,
}

impl Routes {
    fn insert(&mut self, filter: &str, handler: Arc<dyn MessageHandler>) {
        match self.filters.iter_mut().find(|(f, _)| f == filter) {
            Some(slot) => slot.1 = handler,
            None => self.filters.push((filter.to_string(), handler)),
        }
    }

    fn remove(&mut self, filter: &str) {
        self.filters.retain(|(f, _)| f != filter);
    }

    /// Exact filter first, then wildcard filters, then the fallback handler.
    fn resolve(&self, topic: &str) -> Option<Arc<dyn MessageHandler>> {
        self.filters
            .iter()
            .find(|(f, _)| f == topic)
            .or_else(|| self.filters.iter().find(|(f, _)| filter_matches(f, topic)))
            .map(|(_, h)| h.clone())
            .or_else(|| self.fallback.clone())
    }

    fn clear(&mut self) {
        self.filters.clear();
        self.fallback = None;
    }
}

// ═══════════════════════════════════════════════════════════════
//  Shared state: client handle ↔ driver task
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct Shared {
    pending: Mutex<Pending>,
    routes: Mutex<Routes>,
    disconnect: Mutex<Option<Completion>>,
    connected: AtomicBool,
    on_lost: Mutex<Option<LostCallback>>,
}

impl Shared {
    fn on_outgoing(&self, outgoing: Outgoing) {
        let (kind, pkid) = match outgoing {
            Outgoing::Publish(pkid) => (RequestKind::Publish, pkid),
            Outgoing::Subscribe(pkid) => (RequestKind::Subscribe, pkid),
            Outgoing::Unsubscribe(pkid) => (RequestKind::Unsubscribe, pkid),
            other => {
                tracing::trace!(outgoing = ?other, "sent");
                return;
            }
        };
        lock(&self.pending).on_sent(kind, pkid);
    }

    fn on_ack(&self, packet: Packet) {
        match packet {
            Packet::PubAck(ack) => self.complete(RequestKind::Publish, ack.pkid),
            Packet::PubComp(ack) => self.complete(RequestKind::Publish, ack.pkid),
            Packet::SubAck(ack) => {
                let waiter = lock(&self.pending).take_inflight(RequestKind::Subscribe, ack.pkid);
                let Some(waiter) = waiter else { return };
                let rejected = ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));
                if rejected {
                    tracing::warn!(topic = %waiter.label, "subscription rejected");
                    lock(&self.routes).remove(&waiter.label);
                    let topic = waiter.label.clone();
                    waiter.finish(Err(BrokerError::SubscribeRejected { topic }));
                } else {
                    tracing::debug!(topic = %waiter.label, "subscription acknowledged");
                    waiter.finish(Ok(()));
                }
            }
            Packet::UnsubAck(ack) => {
                let waiter = lock(&self.pending).take_inflight(RequestKind::Unsubscribe, ack.pkid);
                if let Some(waiter) = waiter {
                    lock(&self.routes).remove(&waiter.label);
                    waiter.finish(Ok(()));
                }
            }
            other => tracing::trace!(packet = ?other, "incoming"),
        }
    }

    fn complete(&self, kind: RequestKind, pkid: u16) {
        let waiter = lock(&self.pending).take_inflight(kind, pkid);
        if let Some(waiter) = waiter {
            waiter.finish(Ok(()));
        }
    }

    fn connection_lost(&self, err: BrokerError) {
        self.connected.store(false, Ordering::SeqCst);
        tracing::warn!(error = %err, "connection lost");
        lock(&self.pending).connection_lost(&err);
        let callback = lock(&self.on_lost).clone();
        if let Some(callback) = callback {
            callback(&err);
        }
    }

    fn finish_disconnect(&self) -> bool {
        let done = lock(&self.disconnect).take();
        match done {
            Some(done) => {
                let _ = done.send(Ok(()));
                true
            }
            None => false,
        }
    }
}

/// Waiter registered for a request that is not queued in rumqttc yet.
///
/// Dropped before [`Registration::queued`] (the caller gave up mid-send):
/// the waiter is withdrawn so it cannot be paired with a later request.
struct Registration<'a> {
    pending: &'a Mutex<Pending>,
    kind: RequestKind,
    seq: Option<u64>,
}

impl<'a> Registration<'a> {
    fn new(pending: &'a Mutex<Pending>, kind: RequestKind, label: &str) -> (Self, Token) {
        let (seq, token) = lock(pending).register(kind, label);
        let registration = Self {
            pending,
            kind,
            seq: Some(seq),
        };
        (registration, token)
    }

    fn queued(mut self) {
        self.seq = None;
    }

    fn fail(mut self, err: BrokerError) {
        if let Some(waiter) = self.withdraw() {
            waiter.finish(Err(err));
        }
    }

    fn withdraw(&mut self) -> Option<Waiter> {
        let seq = self.seq.take()?;
        lock(self.pending).withdraw(self.kind, seq)
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.withdraw().is_some() {
            tracing::trace!(kind = ?self.kind, "request abandoned before queueing");
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Driver: polls the rumqttc event loop
// ═══════════════════════════════════════════════════════════════

/// Крутит event loop до отмены `stop` или отправки DISCONNECT.
///
/// Единственный dispatcher входящих сообщений: handler'ы вызываются
/// здесь же и по одному.
async fn drive(
    mut eventloop: EventLoop,
    shared: Arc<Shared>,
    stop: CancellationToken,
    reconnect_delay: Duration,
    connect: Completion,
) {
    let mut connect = Some(connect);

    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                shared.connected.store(true, Ordering::SeqCst);
                match connect.take() {
                    Some(done) => {
                        tracing::info!(session_present = ack.session_present, "connected to broker");
                        let _ = done.send(Ok(()));
                    }
                    None => tracing::info!("reconnected to broker"),
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = Message::from(publish);
                let handler = lock(&shared.routes).resolve(message.topic());
                let Some(handler) = handler else {
                    tracing::debug!(topic = %message.topic(), "no handler for topic, dropping");
                    continue;
                };
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = handler.handle(message) => {}
                }
            }
            Ok(Event::Incoming(packet)) => shared.on_ack(packet),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                shared.finish_disconnect();
                tracing::debug!("disconnect sent");
                break;
            }
            Ok(Event::Outgoing(outgoing)) => shared.on_outgoing(outgoing),
            Err(e) => {
                let reason = e.to_string();
                if let Some(done) = connect.take() {
                    tracing::error!(error = %reason, "connect failed");
                    let _ = done.send(Err(BrokerError::Connect(reason)));
                    break;
                }
                // Broker closed the socket after our DISCONNECT.
                if shared.finish_disconnect() {
                    break;
                }
                shared.connection_lost(BrokerError::ConnectionLost(reason));
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(reconnect_delay) => {}
                }
            }
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    lock(&shared.pending).fail_all(&BrokerError::Closed);
    if let Some(done) = connect.take() {
        let _ = done.send(Err(BrokerError::Closed));
    }
    // Handlers own the ingress side of downstream channels; dropping them closes those channels.
    lock(&shared.routes).clear();
    tracing::debug!("driver stopped");
}

// ═══════════════════════════════════════════════════════════════
//  BrokerClient
// ═══════════════════════════════════════════════════════════════

/// Connection to one MQTT broker.
///
/// ```ignore
/// let client = BrokerClient::new(&config)?;
/// client.connect().wait().await?;
/// client.publish("iot-messages", QoS::AtMostOnce, false, payload).await.wait().await?;
/// client.disconnect(Duration::from_millis(250)).await;
/// ```
pub struct BrokerClient {
    client: AsyncClient,
    eventloop: Mutex<Option<EventLoop>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<Shared>,
    /// Held from waiter registration until the request is queued, so waiters
    /// and requests of one kind stay in the same order.
    send_order: tokio::sync::Mutex<()>,
    stop: CancellationToken,
    config: BrokerConfig,
}

impl BrokerClient {
    pub fn new(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let options = config.mqtt_options()?;
        let (client, eventloop) = AsyncClient::new(options, config.request_capacity.max(1));
        tracing::debug!(uri = %config.uri, client_id = %config.client_id, "broker client created");

        Ok(Self {
            client,
            eventloop: Mutex::new(Some(eventloop)),
            driver: Mutex::new(None),
            shared: Arc::new(Shared::default()),
            send_order: tokio::sync::Mutex::new(()),
            stop: CancellationToken::new(),
            config: config.clone(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Handler for deliveries no subscription handler claims.
    pub fn set_default_handler(&self, handler: Arc<dyn MessageHandler>) {
        lock(&self.shared.routes).fallback = Some(handler);
    }

    /// Callback run by the driver each time an established connection drops.
    pub fn on_connection_lost<F>(&self, f: F)
    where
        F: Fn(&BrokerError) + Send + Sync + 'static,
    {
        *lock(&self.shared.on_lost) = Some(Arc::new(f));
    }

    /// Start the driver. The token resolves on the broker's CONNACK or the first connection error.
    pub fn connect(&self) -> Token {
        let eventloop = lock(&self.eventloop).take();
        let Some(eventloop) = eventloop else {
            return Token::ready(Err(BrokerError::AlreadyConnected));
        };

        let (done, token) = Token::pair();
        let handle = tokio::spawn(drive(
            eventloop,
            self.shared.clone(),
            self.stop.clone(),
            self.config.reconnect_delay,
            done,
        ));
        *lock(&self.driver) = Some(handle);
        tracing::debug!(uri = %self.config.uri, "connecting");
        token
    }

    pub async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: impl Into<Vec<u8>>) -> Token {
        let payload = payload.into();
        self.track(
            RequestKind::Publish,
            topic,
            self.client.publish(topic, qos, retain, payload),
        )
        .await
    }

    /// Subscribe `topic` and route its deliveries to `handler`
    /// (or to the default handler when `None`).
    pub async fn subscribe(&self, topic: &str, qos: QoS, handler: Option<Arc<dyn MessageHandler>>) -> Token {
        if !self.is_running() {
            return Token::ready(Err(BrokerError::NotConnected));
        }
        if let Some(handler) = handler {
            lock(&self.shared.routes).insert(topic, handler);
        }
        self.track(RequestKind::Subscribe, topic, self.client.subscribe(topic, qos))
            .await
    }

    /// Unsubscribe `topic`; its handler is dropped once the broker acknowledges.
    pub async fn unsubscribe(&self, topic: &str) -> Token {
        self.track(RequestKind::Unsubscribe, topic, self.client.unsubscribe(topic))
            .await
    }

    /// Send DISCONNECT, give it `grace` to go out, then stop and join the driver.
    ///
    /// Best effort: никогда не возвращает ошибку, безопасен без connect
    /// и после неудачного connect.
    pub async fn disconnect(&self, grace: Duration) {
        let handle = lock(&self.driver).take();

        if let Some(handle) = handle {
            if !handle.is_finished() {
                let (done, token) = Token::pair();
                *lock(&self.shared.disconnect) = Some(done);

                let sent = tokio::time::timeout(grace, async {
                    match self.client.disconnect().await {
                        Ok(()) => token.wait().await,
                        Err(e) => Err(BrokerError::from(e)),
                    }
                })
                .await;
                match sent {
                    Ok(Ok(())) => tracing::debug!("disconnected"),
                    Ok(Err(e)) => tracing::debug!(error = %e, "disconnect not confirmed"),
                    Err(_) => tracing::debug!(?grace, "disconnect not confirmed within grace"),
                }
            }

            self.stop.cancel();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "driver task failed");
            }
        }

        lock(&self.eventloop).take();
        self.shared.connected.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        lock(&self.driver).as_ref().is_some_and(|h| !h.is_finished())
    }

    async fn track<F>(&self, kind: RequestKind, label: &str, send: F) -> Token
    where
        F: Future<Output = Result<(), ClientError>>,
    {
        if !self.is_running() {
            return Token::ready(Err(BrokerError::NotConnected));
        }

        let _order = self.send_order.lock().await;
        let (registration, token) = Registration::new(&self.shared.pending, kind, label);
        match send.await {
            Ok(()) => registration.queued(),
            Err(e) => {
                tracing::warn!(?kind, topic = %label, error = %e, "request not queued");
                registration.fail(e.into());
            }
        }
        token
    }
}

impl Drop for BrokerClient {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

// ═══════════════════════════════════════════════════════════════
//  MessagePublisher: seam for publish loops
// ═══════════════════════════════════════════════════════════════

/// Publish one payload and wait for its completion.
pub trait MessagePublisher: Send + Sync {
    fn publish_message<'a>(
        &'a self,
        topic: &'a str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>>;
}

impl MessagePublisher for BrokerClient {
    fn publish_message<'a>(
        &'a self,
        topic: &'a str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
        Box::pin(async move { self.publish(topic, qos, retain, payload).await.wait().await })
    }
}
