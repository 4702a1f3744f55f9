use crate::SubscriberState;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("broker: {0}")]
    Broker(#[from] broker::BrokerError),

    #[error("signal handler: {0}")]
    Signal(#[source] std::io::Error),

    #[error("illegal state transition {from} -> {to}")]
    Transition { from: SubscriberState, to: SubscriberState },
}
