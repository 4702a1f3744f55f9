use std::future::Future;
use std::io::Write;

use broker::BrokerClient;
use pipeline::{Ingress, SharedWriter, Shutdown, SubscriberState, WorkerStats, spawn_worker};
use tokio_util::sync::CancellationToken;

use super::config::Effective;
use super::error::SubscriberError;

/// Subscriber with stdout output, stopped by SIGINT/SIGTERM.
pub async fn run(eff: &Effective) -> Result<WorkerStats, SubscriberError> {
    let mut shutdown = Shutdown::install()?;
    serve(eff, std::io::stdout(), async move {
        shutdown.recv().await;
    })
    .await
}

/// connect → worker → subscribe → ждать `stop` → cancel → unsubscribe →
/// disconnect → join worker.
///
/// Строки processor'а и строки жизненного цикла идут в один `writer`.
/// Ошибка до SUBSCRIBED фатальна: всё поднятое к этому моменту
/// освобождается, состояние FAILED.
pub async fn serve<W, F>(eff: &Effective, writer: W, stop: F) -> Result<WorkerStats, SubscriberError>
where
    W: Write + Send + 'static,
    F: Future<Output = ()>,
{
    let grace = eff.broker.disconnect_grace;
    let mut state = SubscriberState::default();
    let token = CancellationToken::new();
    let out = SharedWriter::new(writer);

    let client = BrokerClient::new(&eff.broker)?;
    let lost = out.clone();
    client.on_connection_lost(move |err| lost.line(format_args!("Connection lost: {err}")));

    // Deliveries on the subscribed topic reach the ingress through the default handler.
    let (ingress, input) = Ingress::channel(eff.buffer, eff.overflow, token.clone());
    client.set_default_handler(ingress);

    if let Err(e) = client.connect().wait().await {
        state.transition(SubscriberState::Failed)?;
        client.disconnect(grace).await;
        return Err(e.into());
    }
    out.line(format_args!("Connected to MQTT Broker"));
    state.transition(SubscriberState::Connected)?;

    let worker = spawn_worker(input, out.clone(), eff.buffer, token.clone());

    if let Err(e) = client.subscribe(&eff.topic, eff.qos, None).await.wait().await {
        tracing::error!(topic = %eff.topic, error = %e, "subscribe failed");
        state.transition(SubscriberState::Failed)?;
        token.cancel();
        client.disconnect(grace).await;
        worker.join().await;
        return Err(e.into());
    }
    out.line(format_args!("Subscribed to topic: {}", eff.topic));
    state.transition(SubscriberState::Subscribed)?;

    stop.await;

    state.transition(SubscriberState::Draining)?;
    token.cancel();
    out.line(format_args!("Unsubscribing and disconnecting..."));
    if let Err(e) = client
        .unsubscribe(&eff.topic)
        .await
        .wait_timeout(eff.unsubscribe_timeout)
        .await
    {
        tracing::warn!(topic = %eff.topic, error = %e, "unsubscribe not confirmed");
    }
    client.disconnect(grace).await;

    let stats = worker.join().await;
    state.transition(SubscriberState::Closed)?;
    tracing::info!(processed = stats.processed, drained = stats.drained, "subscriber stopped");
    out.line(format_args!("Goroutine terminated, exiting..."));
    Ok(stats)
}
