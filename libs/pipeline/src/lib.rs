//! Subscriber pipeline (ingress → processor → drain), signal handling
//! and the tick-driven publish loop shared by the publishers.

pub mod config;
pub mod error;
pub mod ingress;
pub mod output;
pub mod processor;
pub mod publish;
pub mod shutdown;
pub mod state;

pub use config::OverflowPolicy;
pub use error::PipelineError;
pub use ingress::Ingress;
pub use output::SharedWriter;
pub use processor::{Worker, WorkerStats, drain, spawn_processor, spawn_worker};
pub use publish::{PayloadSource, PublishSettings, PublishStats, run_publish_loop};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use state::SubscriberState;
