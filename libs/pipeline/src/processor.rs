use std::io::Write;

use broker::Message;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ═══════════════════════════════════════════════════════════════
//  Processor task: in → stdout line → out
// ═══════════════════════════════════════════════════════════════

/// Запустить processor: читает `in`, пишет строку на сообщение в `writer`,
/// пересылает сообщение в `out`.
///
/// Закрытие `in` завершает задачу и закрывает `out`. После отмены `in`
/// закрывается, и всё, что ingress успел туда положить, всё равно
/// печатается: пересылка в `out` для них только `try_send`.
/// Возвращает число обработанных.
pub fn spawn_processor<W>(
    mut input: mpsc::Receiver<Message>,
    mut writer: W,
    out_capacity: usize,
    token: CancellationToken,
) -> (JoinHandle<u64>, mpsc::Receiver<Message>)
where
    W: Write + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::channel(out_capacity.max(1));

    let handle = tokio::spawn(async move {
        let mut processed = 0u64;
        loop {
            let message = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                message = input.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            write_line(&mut writer, &message);
            processed += 1;

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                sent = out_tx.send(message) => {
                    if sent.is_err() {
                        tracing::debug!("downstream closed");
                        break;
                    }
                }
            }
        }

        // Accepted by the ingress before cancel: still one line each.
        input.close();
        let mut late = 0u64;
        while let Some(message) = input.recv().await {
            write_line(&mut writer, &message);
            late += 1;
            if out_tx.try_send(message).is_err() {
                tracing::trace!("out full or closed, accepted message not forwarded");
            }
        }
        if late > 0 {
            tracing::debug!(late, "flushed accepted messages after cancel");
        }
        processed += late;

        tracing::info!(processed, "processor stopped");
        processed
    });

    (handle, out_rx)
}

fn write_line<W: Write>(writer: &mut W, message: &Message) {
    let line = format!(
        "Received message: {} from topic: {}\n",
        message.payload_str(),
        message.topic()
    );
    if let Err(e) = writer.write_all(line.as_bytes()).and_then(|()| writer.flush()) {
        tracing::warn!(error = %e, "cannot write message line");
    }
}

/// Read `out` until it closes. Returns the number of drained messages.
pub async fn drain(mut out: mpsc::Receiver<Message>) -> u64 {
    let mut drained = 0u64;
    while let Some(message) = out.recv().await {
        tracing::trace!(topic = %message.topic(), "drained");
        drained += 1;
    }
    tracing::debug!(drained, "drain finished");
    drained
}

// ═══════════════════════════════════════════════════════════════
//  Worker: processor + drain
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub drained: u64,
}

/// Processor and drain tasks of one subscription.
pub struct Worker {
    processor: JoinHandle<u64>,
    drain: JoinHandle<u64>,
}

pub fn spawn_worker<W>(
    input: mpsc::Receiver<Message>,
    writer: W,
    out_capacity: usize,
    token: CancellationToken,
) -> Worker
where
    W: Write + Send + 'static,
{
    let (processor, out) = spawn_processor(input, writer, out_capacity, token);
    let drain = tokio::spawn(drain(out));
    Worker { processor, drain }
}

impl Worker {
    /// Wait for both tasks. The drain ends once the processor has exited.
    pub async fn join(self) -> WorkerStats {
        let processed = self.processor.await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "processor task failed");
            0
        });
        let drained = self.drain.await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "drain task failed");
            0
        });
        WorkerStats { processed, drained }
    }
}
