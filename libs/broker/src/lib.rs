//! Broker client over `rumqttc`.
//!
//! Каждая операция (connect, publish, subscribe, unsubscribe) возвращает
//! [`Token`], который резолвится, когда брокер подтвердил операцию.
//! Event loop крутится в отдельной задаче (driver), она же доставляет
//! входящие сообщения в [`MessageHandler`].

pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod token;

pub use client::{BrokerClient, MessagePublisher};
pub use config::{BrokerConfig, BrokerSection, parse_qos};
pub use error::BrokerError;
pub use message::{Message, MessageHandler, filter_matches, handler_fn};
pub use rumqttc::QoS;
pub use token::Token;
