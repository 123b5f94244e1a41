//! # Consumer
//!
//! Reconnecting queue consumer.
//!
//! Responsibilities:
//! - Dispatch deliveries to a `MessageHandler`, acking on success and
//!   rejecting with requeue on failure
//! - Watch connection/channel close notifications and re-establish the
//!   subscription with a fixed backoff until stopped
//! - Expose `start`/`stop` and a read-only view of the reconnect state
//!
//! ## Example
//!
//! ```ignore
//! use consumer::{Consumer, HandlerFn, LapinClient};
//!
//! let handler = HandlerFn::new(|body: &[u8]| {
//!     println!("{}", String::from_utf8_lossy(body));
//!     Ok(())
//! });
//! let mut consumer = Consumer::new(config, LapinClient::new(), handler);
//! consumer.start().await?;
//! // ...
//! consumer.stop().await;
//! ```

pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod supervisor;

pub use broker::{BrokerClient, MockBroker};
#[cfg(feature = "amqp")]
pub use broker::LapinClient;
pub use consumer::Consumer;
pub use contracts::{
    ConsumerConfig, HandlerError, HandlerFn, MessageHandler, ReconnectState,
};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use error::ConsumerError;
pub use metrics::{ConsumerMetrics, MetricsSnapshot};
pub use supervisor::Supervisor;
