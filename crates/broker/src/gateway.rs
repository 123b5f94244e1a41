//! BrokerGateway core implementation
//!
//! Establishes a subscription from `ConsumerConfig` and tears it down again.

use std::sync::atomic::{AtomicU64, Ordering};

use contracts::{CloseNotifications, ConsumerConfig, ContractError};
use tracing::{debug, info, instrument, warn};

use crate::client::{
    BrokerChannel, BrokerClient, BrokerConnection, ConsumeOptions, DeliveryStream, QueueOptions,
};
use crate::Result;

/// Channel type produced by a client's connections
pub type ChannelOf<C> = <<C as BrokerClient>::Connection as BrokerConnection>::Channel;

/// Delivery stream type produced by a client's channels
pub type DeliveriesOf<C> = <ChannelOf<C> as BrokerChannel>::Deliveries;

/// Delivery type produced by a client's delivery streams
pub type DeliveryOf<C> = <DeliveriesOf<C> as DeliveryStream>::Delivery;

/// Live connection/channel pair with its close notifications
pub struct Session<C: BrokerClient> {
    /// Connection handle
    pub connection: C::Connection,
    /// Channel handle, owned by the connection
    pub channel: ChannelOf<C>,
    /// Yields once when the connection closes
    pub connection_closed: CloseNotifications,
    /// Yields once when the channel closes
    pub channel_closed: CloseNotifications,
    /// Sequence number of this session within the gateway
    pub generation: u64,
}

/// Result of a successful connect: the session plus its delivery stream
///
/// The delivery stream is split off so it can be handed to a dispatcher by value.
pub struct Established<C: BrokerClient> {
    pub session: Session<C>,
    pub deliveries: DeliveriesOf<C>,
}

/// Broker Gateway
///
/// Thin facade over the broker client: sequences the calls that establish a
/// subscription and rolls back partial resources on failure.
pub struct BrokerGateway<C: BrokerClient> {
    client: C,
    config: ConsumerConfig,
    generation: AtomicU64,
}

impl<C: BrokerClient> BrokerGateway<C> {
    /// Create a new BrokerGateway
    pub fn new(client: C, config: ConsumerConfig) -> Self {
        Self {
            client,
            config,
            generation: AtomicU64::new(0),
        }
    }

    /// Consumer configuration
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Underlying client
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Dial, open a channel, declare, bind and consume
    ///
    /// # Atomicity
    /// If any step fails, every resource created by earlier steps is released
    /// before the error is returned.
    #[instrument(
        name = "broker_gateway_connect",
        skip(self),
        fields(queue = %self.config.queue, exchange = %self.config.exchange)
    )]
    pub async fn connect(&self) -> Result<Established<C>> {
        let connection = self.client.dial(&self.config.address).await?;

        let channel = match connection.open_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                warn!(error = %e, "open channel failed, closing connection");
                if let Err(close_err) = connection.close().await {
                    debug!(error = %close_err, "rollback: connection close failed");
                }
                return Err(e);
            }
        };

        let deliveries = match self.subscribe(&channel).await {
            Ok(deliveries) => deliveries,
            Err(e) => {
                warn!(error = %e, "subscription setup failed, rolling back");
                self.rollback(&connection, &channel).await;
                return Err(e);
            }
        };

        let connection_closed = connection.notify_closed();
        let channel_closed = channel.notify_closed();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        info!(
            generation,
            consumer_tag = %self.config.consumer_tag,
            "subscription established"
        );

        Ok(Established {
            session: Session {
                connection,
                channel,
                connection_closed,
                channel_closed,
                generation,
            },
            deliveries,
        })
    }

    /// Cancel the subscription, close the channel, close the connection
    ///
    /// Best-effort: every failure is logged and returned, never propagated.
    /// Cancel is skipped if the connection is already closed.
    #[instrument(
        name = "broker_gateway_teardown",
        skip(self, session),
        fields(generation = session.generation)
    )]
    pub async fn teardown(&self, session: &Session<C>) -> Vec<ContractError> {
        let mut failures = Vec::new();

        if !session.connection.is_closed() {
            if let Err(e) = session.channel.cancel(&self.config.consumer_tag).await {
                warn!(error = %e, "channel cancel failed");
                failures.push(e);
            }
        }

        if let Err(e) = session.channel.close().await {
            warn!(error = %e, "channel close failed");
            failures.push(e);
        }

        if let Err(e) = session.connection.close().await {
            warn!(error = %e, "connection close failed");
            failures.push(e);
        }

        debug!(failures = failures.len(), "teardown completed");
        failures
    }

    async fn subscribe(&self, channel: &ChannelOf<C>) -> Result<DeliveriesOf<C>> {
        let queue_options = QueueOptions {
            durable: false,
            auto_delete: self.config.auto_delete,
            exclusive: false,
            no_wait: false,
        };
        channel
            .declare_queue(&self.config.queue, queue_options)
            .await?;

        channel
            .bind_queue(
                &self.config.queue,
                &self.config.routing_key,
                &self.config.exchange,
                false,
            )
            .await?;

        let consume_options = ConsumeOptions {
            auto_ack: false,
            exclusive: false,
            no_local: false,
            no_wait: false,
        };
        channel
            .consume(
                &self.config.queue,
                &self.config.consumer_tag,
                consume_options,
            )
            .await
    }

    async fn rollback(&self, connection: &C::Connection, channel: &ChannelOf<C>) {
        if let Err(e) = channel.close().await {
            debug!(error = %e, "rollback: channel close failed");
        }
        if let Err(e) = connection.close().await {
            debug!(error = %e, "rollback: connection close failed");
        }
    }
}
