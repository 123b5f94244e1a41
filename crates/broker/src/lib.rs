//! # Broker
//!
//! Broker gateway module.
//!
//! Responsibilities:
//! - Define the broker boundary (dial, channel, declare, bind, consume, close notifications)
//! - Establish a subscription from `ConsumerConfig`, releasing partial resources on failure
//! - Provide best-effort teardown that never fails the caller
//! - Provide an in-memory mock broker for tests
//!
//! ## Feature Flags
//!
//! - `amqp`: Enable the lapin-backed AMQP 0-9-1 client

pub mod client;
pub mod gateway;
pub mod mock_client;

#[cfg(feature = "amqp")]
pub mod lapin_client;

pub use client::{
    Acknowledge, BrokerChannel, BrokerClient, BrokerConnection, ConsumeOptions, DeliveryStream,
    QueueOptions,
};
pub use contracts::{BrokerOp, CloseNotice, CloseNotifications, ConsumerConfig, ContractError};
pub use gateway::{BrokerGateway, ChannelOf, DeliveriesOf, DeliveryOf, Established, Session};
pub use mock_client::{MockBroker, MockConfig, MockEvent};

#[cfg(feature = "amqp")]
pub use lapin_client::LapinClient;

/// Result alias
pub type Result<T> = std::result::Result<T, ContractError>;
