use broker::BrokerError;
use pipeline::PipelineError;

#[derive(Debug, thiserror::Error)]
pub enum SimplePubError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Broker(#[from] BrokerError),

    #[error("{0}")]
    Pipeline(#[from] PipelineError),
}
