use std::fmt;
use std::future::Future;
use std::io::Write;
use std::time::Duration;

use broker::{MessagePublisher, QoS};
use device_api::DeviceError;

// ═══════════════════════════════════════════════════════════════
//  Payload source
// ═══════════════════════════════════════════════════════════════

/// Generator stage of a publisher: one item per tick, encoded separately.
pub trait PayloadSource: Send {
    type Item: fmt::Display;

    fn next_item(&mut self) -> Self::Item;

    fn encode(&self, item: &Self::Item) -> Result<Vec<u8>, DeviceError>;

    /// Stdout line printed after a successful publish.
    fn describe(&self, item: &Self::Item) -> String {
        format!("Published: {item}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSettings {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub interval: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub published: u64,
    pub encode_failures: u64,
    pub publish_failures: u64,
}

// ═══════════════════════════════════════════════════════════════
//  Publish loop
// ═══════════════════════════════════════════════════════════════

/// Тик: item → encode → publish → wait → строка в `out` → sleep(interval).
///
/// Не больше одного publish в полёте. Ошибки encode/publish логируются,
/// цикл продолжается. Завершается, когда готов `stop`.
pub async fn run_publish_loop<S, P, W, F>(
    settings: &PublishSettings,
    source: &mut S,
    publisher: &P,
    out: &mut W,
    stop: F,
) -> PublishStats
where
    S: PayloadSource,
    P: MessagePublisher + ?Sized,
    W: Write,
    F: Future<Output = ()>,
{
    let mut stop = std::pin::pin!(stop);
    let mut stats = PublishStats::default();

    loop {
        let item = source.next_item();
        match source.encode(&item) {
            Ok(payload) => {
                // Completed publish wins over a simultaneous stop.
                let published = tokio::select! {
                    biased;
                    result = publisher.publish_message(&settings.topic, settings.qos, settings.retain, payload) => result,
                    _ = &mut stop => break,
                };
                match published {
                    Ok(()) => {
                        stats.published += 1;
                        if let Err(e) = writeln!(out, "{}", source.describe(&item)) {
                            tracing::warn!(error = %e, "cannot write publish line");
                        }
                    }
                    Err(e) => {
                        stats.publish_failures += 1;
                        tracing::error!(topic = %settings.topic, error = %e, "publish failed");
                    }
                }
            }
            Err(e) => {
                stats.encode_failures += 1;
                tracing::error!(error = %e, "encode failed, skipping tick");
            }
        }

        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = tokio::time::sleep(settings.interval) => {}
        }
    }

    tracing::info!(
        published = stats.published,
        encode_failures = stats.encode_failures,
        publish_failures = stats.publish_failures,
        "publish loop stopped"
    );
    stats
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::sync::Mutex;

    use broker::BrokerError;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use super::*;

    /// Records payloads; cancels `done` after `limit` calls; fails the calls listed in `fail_on`.
    struct Recorder {
        calls: Mutex<Vec<(Instant, Vec<u8>)>>,
        limit: usize,
        fail_on: Vec<usize>,
        done: CancellationToken,
    }

    impl Recorder {
        fn new(limit: usize, fail_on: Vec<usize>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                limit,
                fail_on,
                done: CancellationToken::new(),
            }
        }

        fn payloads(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(_, p)| String::from_utf8(p.clone()).unwrap())
                .collect()
        }
    }

    impl MessagePublisher for Recorder {
        fn publish_message<'a>(
            &'a self,
            topic: &'a str,
            qos: QoS,
            retain: bool,
            payload: Vec<u8>,
        ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
            assert_eq!(topic, "iot-messages");
            assert_eq!(qos, QoS::AtMostOnce);
            assert!(!retain);
            let index = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((Instant::now(), payload));
                if calls.len() >= self.limit {
                    self.done.cancel();
                }
                calls.len() - 1
            };
            let fail = self.fail_on.contains(&index);
            Box::pin(async move {
                if fail {
                    Err(BrokerError::Request("injected".into()))
                } else {
                    Ok(())
                }
            })
        }
    }

    /// Counts ticks; encoding fails for ticks in `fail_on`.
    struct Counter {
        next: u32,
        fail_on: Vec<u32>,
    }

    impl PayloadSource for Counter {
        type Item = u32;

        fn next_item(&mut self) -> u32 {
            self.next += 1;
            self.next - 1
        }

        fn encode(&self, item: &u32) -> Result<Vec<u8>, DeviceError> {
            if self.fail_on.contains(item) {
                let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
                return Err(DeviceError::Encode(err));
            }
            Ok(format!("tick-{item}").into_bytes())
        }
    }

    fn settings(interval: Duration) -> PublishSettings {
        PublishSettings {
            topic: "iot-messages".into(),
            qos: QoS::AtMostOnce,
            retain: false,
            interval,
        }
    }

    #[tokio::test]
    async fn ticks_are_spaced_by_interval() {
        let interval = Duration::from_millis(30);
        let publisher = Recorder::new(4, vec![]);
        let mut source = Counter { next: 0, fail_on: vec![] };
        let mut out = Vec::new();

        let stats = run_publish_loop(
            &settings(interval),
            &mut source,
            &publisher,
            &mut out,
            publisher.done.clone().cancelled_owned(),
        )
        .await;

        assert_eq!(stats.published, 4);
        let calls = publisher.calls.lock().unwrap();
        for pair in calls.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= interval);
        }
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 4);
    }

    #[tokio::test]
    async fn encode_failure_skips_only_that_tick() {
        let publisher = Recorder::new(3, vec![]);
        let mut source = Counter { next: 0, fail_on: vec![1] };
        let mut out = Vec::new();

        let stats = run_publish_loop(
            &settings(Duration::from_millis(1)),
            &mut source,
            &publisher,
            &mut out,
            publisher.done.clone().cancelled_owned(),
        )
        .await;

        assert_eq!(stats.encode_failures, 1);
        assert_eq!(publisher.payloads(), ["tick-0", "tick-2", "tick-3"]);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Published: 0\nPublished: 2\nPublished: 3\n"
        );
    }

    #[tokio::test]
    async fn publish_failure_is_logged_and_loop_continues() {
        let publisher = Recorder::new(3, vec![0]);
        let mut source = Counter { next: 0, fail_on: vec![] };
        let mut out = Vec::new();

        let stats = run_publish_loop(
            &settings(Duration::from_millis(1)),
            &mut source,
            &publisher,
            &mut out,
            publisher.done.clone().cancelled_owned(),
        )
        .await;

        assert_eq!(stats.publish_failures, 1);
        assert_eq!(String::from_utf8(out).unwrap(), "Published: 1\nPublished: 2\n");
    }

    #[tokio::test]
    async fn stop_interrupts_the_sleep() {
        let publisher = Recorder::new(usize::MAX, vec![]);
        let mut source = Counter { next: 0, fail_on: vec![] };
        let mut out = Vec::new();

        let started = Instant::now();
        let stats = run_publish_loop(
            &settings(Duration::from_secs(60)),
            &mut source,
            &publisher,
            &mut out,
            tokio::time::sleep(Duration::from_millis(20)),
        )
        .await;

        assert_eq!(stats.published, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
