//! Device telemetry model shared by the publishers and the subscriber.
//!
//! Типы телеметрии, persisted-форма записи и генератор синтетических данных.

pub mod error;
pub mod stored;
pub mod synth;
pub mod types;

pub use error::DeviceError;
pub use stored::{IdSequence, StoredRecord};
pub use synth::{BraceletGenerator, GREETINGS, GreetingPicker, Rng};
pub use types::{BraceletData, DeviceData, TelemetryRecord};
