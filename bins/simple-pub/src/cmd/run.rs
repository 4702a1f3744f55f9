use broker::BrokerClient;
use device_api::{DeviceError, GreetingPicker, Rng};
use pipeline::{PayloadSource, PublishStats, Shutdown, run_publish_loop};

use super::config::Effective;
use super::error::SimplePubError;

/// Фиксированные строки, payload: сам текст без кодирования.
pub struct GreetingSource {
    picker: GreetingPicker,
}

impl GreetingSource {
    pub fn new(rng: Rng) -> Self {
        Self {
            picker: GreetingPicker::new(rng),
        }
    }
}

impl PayloadSource for GreetingSource {
    type Item = &'static str;

    fn next_item(&mut self) -> &'static str {
        self.picker.next_message()
    }

    fn encode(&self, item: &&'static str) -> Result<Vec<u8>, DeviceError> {
        Ok(item.as_bytes().to_vec())
    }

    fn describe(&self, item: &&'static str) -> String {
        format!("Published message: {item}")
    }
}

pub async fn run(eff: &Effective) -> Result<PublishStats, SimplePubError> {
    let grace = eff.broker.disconnect_grace;
    let client = BrokerClient::new(&eff.broker)?;
    client.on_connection_lost(|err| println!("Connection lost: {err}"));

    if let Err(e) = client.connect().wait().await {
        client.disconnect(grace).await;
        return Err(e.into());
    }
    println!("Connected to MQTT Broker");

    let mut shutdown = match Shutdown::install() {
        Ok(s) => s,
        Err(e) => {
            client.disconnect(grace).await;
            return Err(e.into());
        }
    };

    let mut source = GreetingSource::new(Rng::new(eff.seed));
    let mut stdout = std::io::stdout();
    let stats = run_publish_loop(&eff.publish, &mut source, &client, &mut stdout, async {
        shutdown.recv().await;
    })
    .await;

    client.disconnect(grace).await;
    tracing::info!(published = stats.published, "simple publisher stopped");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use device_api::GREETINGS;

    use super::*;

    #[test]
    fn payload_is_the_greeting_text() {
        let mut source = GreetingSource::new(Rng::new(3));
        for _ in 0..50 {
            let text = source.next_item();
            assert!(GREETINGS.contains(&text));
            assert_eq!(source.encode(&text).unwrap(), text.as_bytes());
            assert_eq!(source.describe(&text), format!("Published message: {text}"));
        }
    }
}
