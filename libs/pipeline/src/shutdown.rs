use std::fmt;

use crate::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
        })
    }
}

/// SIGINT + SIGTERM, зарегистрированные при создании.
///
/// Регистрация сразу при `install()`: сигнал, пришедший до `recv()`,
/// не теряется. На не-Unix платформах: только Ctrl+C.
pub struct Shutdown {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl Shutdown {
    #[cfg(unix)]
    pub fn install() -> Result<Self, PipelineError> {
        use tokio::signal::unix::{SignalKind, signal};

        let interrupt = signal(SignalKind::interrupt()).map_err(PipelineError::Signal)?;
        let terminate = signal(SignalKind::terminate()).map_err(PipelineError::Signal)?;
        Ok(Self { interrupt, terminate })
    }

    #[cfg(not(unix))]
    pub fn install() -> Result<Self, PipelineError> {
        Ok(Self {})
    }

    /// Wait for the first shutdown signal.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> ShutdownSignal {
        let signal = tokio::select! {
            _ = self.interrupt.recv() => ShutdownSignal::Interrupt,
            _ = self.terminate.recv() => ShutdownSignal::Terminate,
        };
        tracing::info!(%signal, "shutdown signal received");
        signal
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> ShutdownSignal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        tracing::info!(signal = %ShutdownSignal::Interrupt, "shutdown signal received");
        ShutdownSignal::Interrupt
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn recv_waits_for_a_signal() {
        let mut shutdown = Shutdown::install().unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(50), shutdown.recv()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn signal_names() {
        assert_eq!(ShutdownSignal::Interrupt.to_string(), "SIGINT");
        assert_eq!(ShutdownSignal::Terminate.to_string(), "SIGTERM");
    }
}
