use broker::BrokerClient;
use device_api::{BraceletGenerator, DeviceError, Rng, TelemetryRecord};
use pipeline::{PayloadSource, PublishStats, Shutdown, run_publish_loop};

use super::config::Effective;
use super::error::TelemetryPubError;

// ═══════════════════════════════════════════════════════════════
//  TelemetrySource
// ═══════════════════════════════════════════════════════════════

/// Один браслет: запись с текущим временем на каждый тик.
pub struct TelemetrySource {
    generator: BraceletGenerator,
}

impl TelemetrySource {
    pub fn new(rng: Rng, device_id: &str) -> Self {
        Self {
            generator: BraceletGenerator::new(rng, device_id),
        }
    }
}

impl PayloadSource for TelemetrySource {
    type Item = TelemetryRecord;

    fn next_item(&mut self) -> TelemetryRecord {
        self.generator.next_record()
    }

    fn encode(&self, item: &TelemetryRecord) -> Result<Vec<u8>, DeviceError> {
        item.encode()
    }
}

// ═══════════════════════════════════════════════════════════════
//  run
// ═══════════════════════════════════════════════════════════════

/// connect → signal handler → publish loop → disconnect.
pub async fn run(eff: &Effective) -> Result<PublishStats, TelemetryPubError> {
    let grace = eff.broker.disconnect_grace;
    let client = BrokerClient::new(&eff.broker)?;

    if let Err(e) = client.connect().wait().await {
        client.disconnect(grace).await;
        return Err(e.into());
    }
    println!("Connected to MQTT broker");
    tracing::info!(
        uri = %eff.broker.uri,
        client_id = %eff.broker.client_id,
        topic = %eff.publish.topic,
        device_id = %eff.device_id,
        "publishing telemetry"
    );

    let mut shutdown = match Shutdown::install() {
        Ok(s) => s,
        Err(e) => {
            client.disconnect(grace).await;
            return Err(e.into());
        }
    };

    let mut source = TelemetrySource::new(Rng::new(eff.seed), &eff.device_id);
    let mut stdout = std::io::stdout();
    let stats = run_publish_loop(&eff.publish, &mut source, &client, &mut stdout, async {
        shutdown.recv().await;
    })
    .await;

    println!("Stopping publisher...");
    client.disconnect(grace).await;
    println!("Disconnected");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use broker::{BrokerConfig, BrokerError, QoS};
    use pipeline::PublishSettings;

    use super::*;

    #[test]
    fn source_emits_decodable_bracelet_records() {
        let mut source = TelemetrySource::new(Rng::new(7), "bracelet-123");
        for _ in 0..100 {
            let record = source.next_item();
            let bytes = source.encode(&record).unwrap();

            let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(json["device_id"], "bracelet-123");
            assert_eq!(json["device_type"], "bracelet");
            let heart_rate = json["device_data"]["heart_rate"].as_u64().unwrap();
            assert!((60..100).contains(&heart_rate));

            assert_eq!(TelemetryRecord::decode(&bytes).unwrap(), record);
            assert!(source.describe(&record).starts_with("Published: {time: "));
        }
    }

    #[tokio::test]
    async fn unreachable_broker_is_fatal() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let eff = Effective {
            broker: BrokerConfig {
                uri: format!("tcp://{addr}"),
                ..BrokerConfig::new("telemetry-pub-test")
            },
            publish: PublishSettings {
                topic: "iot-messages".into(),
                qos: QoS::AtMostOnce,
                retain: false,
                interval: Duration::from_millis(10),
            },
            device_id: "bracelet-123".into(),
            seed: 1,
        };

        let result = tokio::time::timeout(Duration::from_secs(10), run(&eff)).await.unwrap();
        assert!(matches!(result, Err(TelemetryPubError::Broker(BrokerError::Connect(_)))));
    }
}
