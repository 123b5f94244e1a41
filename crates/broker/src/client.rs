//! Broker client abstraction
//!
//! Defines traits for interacting with a message broker, supporting a real
//! AMQP implementation and mock testing.
//!
//! Error categories are part of the contract: dial and channel-open failures
//! are `Connectivity`, declare/bind/consume failures are `Setup`, cancel and
//! close failures are `ShutdownRace`, ack/reject failures are `Acknowledge`.

use std::future::Future;

use contracts::CloseNotifications;

use crate::Result;

/// Queue declaration flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
    pub no_wait: bool,
}

/// Subscription flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    pub auto_ack: bool,
    pub exclusive: bool,
    pub no_local: bool,
    pub no_wait: bool,
}

/// Broker client trait
///
/// Entry point of the broker boundary: produces live connections.
pub trait BrokerClient: Send + Sync + 'static {
    type Connection: BrokerConnection;

    /// Dial the broker at `address`
    fn dial(&self, address: &str) -> impl Future<Output = Result<Self::Connection>> + Send;
}

/// One live session with the broker
pub trait BrokerConnection: Send + Sync + 'static {
    type Channel: BrokerChannel;

    /// Open a channel on this connection
    fn open_channel(&self) -> impl Future<Output = Result<Self::Channel>> + Send;

    /// Register a close notification
    ///
    /// The stream yields at most one value. If the connection is already
    /// closed the returned stream is already closed.
    fn notify_closed(&self) -> CloseNotifications;

    /// Whether the connection is closed
    fn is_closed(&self) -> bool;

    /// Close the connection
    ///
    /// Whatever the outcome, every stream returned by `notify_closed` on this
    /// connection and its channels is closed once this returns.
    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Channel on a connection
pub trait BrokerChannel: Send + Sync + 'static {
    type Deliveries: DeliveryStream;

    /// Declare a queue
    fn declare_queue(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Bind `queue` to `exchange` with `routing_key`
    fn bind_queue(
        &self,
        queue: &str,
        routing_key: &str,
        exchange: &str,
        no_wait: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Start consuming from `queue`
    fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: ConsumeOptions,
    ) -> impl Future<Output = Result<Self::Deliveries>> + Send;

    /// Cancel the subscription named `consumer_tag`
    ///
    /// Waits for the broker to confirm, so acknowledgments sent before the
    /// call are flushed first.
    fn cancel(&self, consumer_tag: &str) -> impl Future<Output = Result<()>> + Send;

    /// Register a close notification
    fn notify_closed(&self) -> CloseNotifications;

    /// Close the channel
    ///
    /// Whatever the outcome, every stream returned by `notify_closed` on this
    /// channel is closed once this returns, and the delivery stream ends.
    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Lazy, finite stream of deliveries for one subscription
///
/// Ends when the channel or connection is closed. Must be `Sync`: the
/// dispatcher holds `&self` across handler awaits.
pub trait DeliveryStream: Send + Sync + 'static {
    type Delivery: Acknowledge;

    /// Next delivery, or None once the subscription is gone
    fn next_delivery(&mut self) -> impl Future<Output = Option<Result<Self::Delivery>>> + Send;
}

/// One message instance awaiting an acknowledgment decision
///
/// `ack` and `reject` consume the delivery, so a decision is made at most once.
pub trait Acknowledge: Send + 'static {
    /// Broker-assigned delivery tag
    fn delivery_tag(&self) -> u64;

    /// Message body
    fn body(&self) -> &[u8];

    /// Positive acknowledgment
    fn ack(self, multiple: bool) -> impl Future<Output = Result<()>> + Send;

    /// Negative acknowledgment
    fn reject(self, requeue: bool) -> impl Future<Output = Result<()>> + Send;
}
