use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::BrokerError;

pub(crate) type Completion = oneshot::Sender<Result<(), BrokerError>>;

// ═══════════════════════════════════════════════════════════════
//  Token
// ═══════════════════════════════════════════════════════════════

/// Completion handle of one broker operation.
#[must_use = "a token reports nothing unless waited on"]
#[derive(Debug)]
pub struct Token {
    rx: oneshot::Receiver<Result<(), BrokerError>>,
}

impl Token {
    pub(crate) fn pair() -> (Completion, Token) {
        let (tx, rx) = oneshot::channel();
        (tx, Token { rx })
    }

    /// Token that is already resolved.
    pub fn ready(result: Result<(), BrokerError>) -> Token {
        let (tx, token) = Token::pair();
        let _ = tx.send(result);
        token
    }

    /// Wait until the operation resolves. A dropped completer reads as [`BrokerError::Closed`].
    pub async fn wait(self) -> Result<(), BrokerError> {
        self.rx.await.unwrap_or(Err(BrokerError::Closed))
    }

    pub async fn wait_timeout(self, limit: Duration) -> Result<(), BrokerError> {
        tokio::time::timeout(limit, self.wait())
            .await
            .unwrap_or(Err(BrokerError::Timeout(limit)))
    }

    /// Non-blocking peek; `None` while the operation is still pending.
    pub fn try_result(&mut self) -> Option<Result<(), BrokerError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(BrokerError::Closed)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Pending requests
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum RequestKind {
    Publish,
    Subscribe,
    Unsubscribe,
}

/// Ожидающий завершения запрос. `label`: топик, для сообщений об ошибках.
pub(crate) struct Waiter {
    seq: u64,
    pub label: String,
    done: Completion,
}

impl Waiter {
    pub fn finish(self, result: Result<(), BrokerError>) {
        // Receiver may already be gone: nobody waits for this token.
        let _ = self.done.send(result);
    }
}

/// Bookkeeping that pairs tokens with packet identifiers.
///
/// rumqttc не возвращает pkid при постановке запроса, он появляется
/// только в событии `Outgoing`. Запросы одного вида уходят строго в
/// порядке постановки, поэтому очередь `queued`: FIFO: первое событие
/// `Outgoing::X(pkid)` принадлежит самому старому waiter'у вида X.
#[derive(Default)]
pub(crate) struct Pending {
    next_seq: u64,
    queued: HashMap<RequestKind, VecDeque<Waiter>>,
    inflight: HashMap<(RequestKind, u16), Waiter>,
}

impl Pending {
    pub fn register(&mut self, kind: RequestKind, label: &str) -> (u64, Token) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let (done, token) = Token::pair();
        self.queued.entry(kind).or_default().push_back(Waiter {
            seq,
            label: label.to_string(),
            done,
        });
        (seq, token)
    }

    /// Remove a waiter whose request never reached the event loop.
    pub fn withdraw(&mut self, kind: RequestKind, seq: u64) -> Option<Waiter> {
        let queue = self.queued.get_mut(&kind)?;
        let pos = queue.iter().position(|w| w.seq == seq)?;
        queue.remove(pos)
    }

    /// Request of `kind` was written with `pkid`. `pkid == 0` (QoS 0) completes immediately.
    ///
    /// A pkid that is already in flight is a retransmission after reconnect
    /// and does not consume a queued waiter.
    pub fn on_sent(&mut self, kind: RequestKind, pkid: u16) {
        if pkid != 0 && self.inflight.contains_key(&(kind, pkid)) {
            tracing::trace!(?kind, pkid, "retransmitted");
            return;
        }
        let Some(waiter) = self.queued.get_mut(&kind).and_then(VecDeque::pop_front) else {
            tracing::trace!(?kind, pkid, "outgoing packet without waiter");
            return;
        };
        if pkid == 0 {
            waiter.finish(Ok(()));
        } else {
            self.inflight.insert((kind, pkid), waiter);
        }
    }

    pub fn take_inflight(&mut self, kind: RequestKind, pkid: u16) -> Option<Waiter> {
        self.inflight.remove(&(kind, pkid))
    }

    /// Connection dropped. rumqttc keeps queued requests and unacknowledged
    /// publishes and sends them again after reconnect, so only in-flight
    /// subscribe/unsubscribe waiters are failed: their requests are gone.
    pub fn connection_lost(&mut self, err: &BrokerError) {
        let lost: Vec<_> = self
            .inflight
            .keys()
            .filter(|(kind, _)| *kind != RequestKind::Publish)
            .copied()
            .collect();
        for key in lost {
            if let Some(waiter) = self.inflight.remove(&key) {
                waiter.finish(Err(err.clone()));
            }
        }
    }

    /// Fail every queued and in-flight waiter with `err`.
    pub fn fail_all(&mut self, err: &BrokerError) {
        for (_, queue) in self.queued.drain() {
            for waiter in queue {
                waiter.finish(Err(err.clone()));
            }
        }
        for (_, waiter) in self.inflight.drain() {
            waiter.finish(Err(err.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.queued.values().map(VecDeque::len).sum::<usize>() + self.inflight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos0_publish_completes_when_written() {
        let mut pending = Pending::default();
        let (_, mut token) = pending.register(RequestKind::Publish, "iot-messages");
        assert!(token.try_result().is_none());

        pending.on_sent(RequestKind::Publish, 0);
        assert!(matches!(token.try_result(), Some(Ok(()))));
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn acked_requests_complete_on_ack() {
        let mut pending = Pending::default();
        let (_, mut first) = pending.register(RequestKind::Subscribe, "a");
        let (_, mut second) = pending.register(RequestKind::Subscribe, "b");

        pending.on_sent(RequestKind::Subscribe, 11);
        pending.on_sent(RequestKind::Subscribe, 12);
        assert!(first.try_result().is_none());

        let waiter = pending.take_inflight(RequestKind::Subscribe, 12).unwrap();
        assert_eq!(waiter.label, "b");
        waiter.finish(Err(BrokerError::SubscribeRejected { topic: "b".into() }));
        assert!(matches!(second.try_result(), Some(Err(BrokerError::SubscribeRejected { .. }))));

        pending.take_inflight(RequestKind::Subscribe, 11).unwrap().finish(Ok(()));
        assert!(matches!(first.try_result(), Some(Ok(()))));
    }

    #[test]
    fn kinds_are_paired_independently() {
        let mut pending = Pending::default();
        let (_, mut publish) = pending.register(RequestKind::Publish, "t");
        let (_, mut unsubscribe) = pending.register(RequestKind::Unsubscribe, "t");

        pending.on_sent(RequestKind::Unsubscribe, 3);
        assert!(publish.try_result().is_none());
        pending.on_sent(RequestKind::Publish, 0);
        assert!(matches!(publish.try_result(), Some(Ok(()))));

        assert!(pending.take_inflight(RequestKind::Publish, 3).is_none());
        pending.take_inflight(RequestKind::Unsubscribe, 3).unwrap().finish(Ok(()));
        assert!(matches!(unsubscribe.try_result(), Some(Ok(()))));
    }

    #[test]
    fn withdraw_removes_only_that_waiter() {
        let mut pending = Pending::default();
        let (a, _token_a) = pending.register(RequestKind::Publish, "a");
        let (_, mut token_b) = pending.register(RequestKind::Publish, "b");

        let waiter = pending.withdraw(RequestKind::Publish, a).unwrap();
        assert_eq!(waiter.label, "a");

        pending.on_sent(RequestKind::Publish, 0);
        assert!(matches!(token_b.try_result(), Some(Ok(()))));
    }

    #[test]
    fn fail_all_reaches_every_waiter() {
        let mut pending = Pending::default();
        let (_, mut queued) = pending.register(RequestKind::Publish, "t");
        let (_, mut inflight) = pending.register(RequestKind::Subscribe, "t");
        pending.on_sent(RequestKind::Subscribe, 5);

        pending.fail_all(&BrokerError::ConnectionLost("reset".into()));
        assert!(matches!(queued.try_result(), Some(Err(BrokerError::ConnectionLost(_)))));
        assert!(matches!(inflight.try_result(), Some(Err(BrokerError::ConnectionLost(_)))));
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn requests_queued_across_reconnect_keep_their_waiters() {
        let mut pending = Pending::default();
        let (_, mut before) = pending.register(RequestKind::Publish, "t");

        pending.connection_lost(&BrokerError::ConnectionLost("reset".into()));
        assert!(before.try_result().is_none());

        let (_, mut after) = pending.register(RequestKind::Publish, "t");
        // The request queued before the drop is written first after reconnect.
        pending.on_sent(RequestKind::Publish, 0);
        assert!(matches!(before.try_result(), Some(Ok(()))));
        assert!(after.try_result().is_none());

        pending.on_sent(RequestKind::Publish, 0);
        assert!(matches!(after.try_result(), Some(Ok(()))));
    }

    #[test]
    fn retransmitted_publish_does_not_take_next_waiter() {
        let mut pending = Pending::default();
        let (_, mut first) = pending.register(RequestKind::Publish, "a");
        pending.on_sent(RequestKind::Publish, 7);

        pending.connection_lost(&BrokerError::ConnectionLost("reset".into()));
        let (_, mut second) = pending.register(RequestKind::Publish, "b");

        pending.on_sent(RequestKind::Publish, 7);
        assert!(second.try_result().is_none());
        pending.on_sent(RequestKind::Publish, 8);
        assert!(first.try_result().is_none());

        assert_eq!(pending.take_inflight(RequestKind::Publish, 7).unwrap().label, "a");
        assert_eq!(pending.take_inflight(RequestKind::Publish, 8).unwrap().label, "b");
    }

    #[test]
    fn lost_connection_fails_inflight_subscribe_only() {
        let mut pending = Pending::default();
        let (_, mut subscribe) = pending.register(RequestKind::Subscribe, "a");
        let (_, mut unsubscribe) = pending.register(RequestKind::Unsubscribe, "b");
        let (_, mut publish) = pending.register(RequestKind::Publish, "c");
        pending.on_sent(RequestKind::Subscribe, 1);
        pending.on_sent(RequestKind::Publish, 2);

        pending.connection_lost(&BrokerError::ConnectionLost("reset".into()));
        assert!(matches!(subscribe.try_result(), Some(Err(BrokerError::ConnectionLost(_)))));
        assert!(unsubscribe.try_result().is_none());
        assert!(publish.try_result().is_none());
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn dropped_completer_reads_as_closed() {
        let (done, token) = Token::pair();
        drop(done);
        assert!(matches!(token.wait().await, Err(BrokerError::Closed)));
    }

    #[tokio::test]
    async fn wait_timeout_expires() {
        let (_done, token) = Token::pair();
        let result = token.wait_timeout(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(BrokerError::Timeout(_))));
    }
}
