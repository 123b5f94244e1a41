//! AMQP 0-9-1 client backed by lapin

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use contracts::{close_notification, BrokerOp, CloseNotice, CloseNotifications, CloseNotifier, ContractError};
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicRejectOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use tracing::{debug, instrument, warn};

use crate::client::{
    Acknowledge, BrokerChannel, BrokerClient, BrokerConnection, ConsumeOptions, DeliveryStream,
    QueueOptions,
};
use crate::Result;

const REPLY_SUCCESS: u16 = 200;

/// Real broker client
#[derive(Debug, Clone, Default)]
pub struct LapinClient {
    properties_name: Option<String>,
}

impl LapinClient {
    /// Create a new LapinClient
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise `name` as the client connection name
    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.properties_name = Some(name.into());
        self
    }

    fn properties(&self) -> ConnectionProperties {
        let properties = ConnectionProperties::default();
        match &self.properties_name {
            Some(name) => properties.with_connection_name(name.clone().into()),
            None => properties,
        }
    }
}

/// Close listeners of one connection or channel
///
/// Shared with lapin's error callback, which fires from lapin's own threads.
#[derive(Default)]
struct Listeners {
    closed: AtomicBool,
    notifiers: Mutex<Vec<CloseNotifier>>,
}

impl Listeners {
    fn register(&self) -> CloseNotifications {
        let (notifier, stream) = close_notification();
        let mut notifiers = self.notifiers.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::SeqCst) {
            notifier.close();
        } else {
            notifiers.push(notifier);
        }
        stream
    }

    /// Deliver `notice` (or nothing) to every listener and close them
    fn finish(&self, notice: Option<CloseNotice>) {
        self.closed.store(true, Ordering::SeqCst);
        let mut notifiers = self.notifiers.lock().unwrap_or_else(PoisonError::into_inner);
        for notifier in notifiers.drain(..) {
            match &notice {
                Some(n) => {
                    notifier.notify(n.clone());
                }
                None => notifier.close(),
            }
        }
    }
}

impl BrokerClient for LapinClient {
    type Connection = LapinConnection;

    #[instrument(name = "lapin_dial", skip(self, address))]
    async fn dial(&self, address: &str) -> Result<LapinConnection> {
        let connection = Connection::connect(address, self.properties())
            .await
            .map_err(|e| ContractError::connectivity(BrokerOp::Dial, e.to_string()))?;

        let listeners = Arc::new(Listeners::default());
        let channels: Arc<Mutex<Vec<Arc<Listeners>>>> = Arc::default();
        {
            let listeners = Arc::clone(&listeners);
            let channels = Arc::clone(&channels);
            connection.on_error(move |e| {
                warn!(error = %e, "connection error");
                let notice = CloseNotice::Error(e.to_string());
                for channel in channels.lock().unwrap_or_else(PoisonError::into_inner).iter() {
                    channel.finish(Some(notice.clone()));
                }
                listeners.finish(Some(notice));
            });
        }

        debug!("connection opened");
        Ok(LapinConnection {
            inner: connection,
            listeners,
            channels,
        })
    }
}

/// Live lapin connection
pub struct LapinConnection {
    inner: Connection,
    listeners: Arc<Listeners>,
    channels: Arc<Mutex<Vec<Arc<Listeners>>>>,
}

impl LapinConnection {
    fn close_listeners(&self) {
        for channel in self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            channel.finish(None);
        }
        self.listeners.finish(None);
    }
}

impl BrokerConnection for LapinConnection {
    type Channel = LapinChannel;

    async fn open_channel(&self) -> Result<LapinChannel> {
        let channel = self
            .inner
            .create_channel()
            .await
            .map_err(|e| ContractError::connectivity(BrokerOp::OpenChannel, e.to_string()))?;

        let listeners = Arc::new(Listeners::default());
        {
            let listeners = Arc::clone(&listeners);
            channel.on_error(move |e| {
                warn!(error = %e, "channel error");
                listeners.finish(Some(CloseNotice::Error(e.to_string())));
            });
        }
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&listeners));

        Ok(LapinChannel {
            inner: channel,
            listeners,
        })
    }

    fn notify_closed(&self) -> CloseNotifications {
        if self.is_closed() {
            self.listeners.finish(None);
        }
        self.listeners.register()
    }

    fn is_closed(&self) -> bool {
        !self.inner.status().connected()
    }

    async fn close(&self) -> Result<()> {
        let result = self
            .inner
            .close(REPLY_SUCCESS, "consumer shutdown")
            .await
            .map_err(|e| ContractError::shutdown_race(BrokerOp::CloseConnection, e.to_string()));
        self.close_listeners();
        result
    }
}

/// Channel on a lapin connection
pub struct LapinChannel {
    inner: Channel,
    listeners: Arc<Listeners>,
}

impl BrokerChannel for LapinChannel {
    type Deliveries = LapinDeliveries;

    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<()> {
        let options = QueueDeclareOptions {
            passive: false,
            durable: options.durable,
            exclusive: options.exclusive,
            auto_delete: options.auto_delete,
            nowait: options.no_wait,
        };
        self.inner
            .queue_declare(name, options, FieldTable::default())
            .await
            .map(|_| ())
            .map_err(|e| ContractError::setup(BrokerOp::DeclareQueue, e.to_string()))
    }

    async fn bind_queue(
        &self,
        queue: &str,
        routing_key: &str,
        exchange: &str,
        no_wait: bool,
    ) -> Result<()> {
        self.inner
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions { nowait: no_wait },
                FieldTable::default(),
            )
            .await
            .map_err(|e| ContractError::setup(BrokerOp::BindQueue, e.to_string()))
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: ConsumeOptions,
    ) -> Result<LapinDeliveries> {
        let options = BasicConsumeOptions {
            no_local: options.no_local,
            no_ack: options.auto_ack,
            exclusive: options.exclusive,
            nowait: options.no_wait,
        };
        let consumer = self
            .inner
            .basic_consume(queue, consumer_tag, options, FieldTable::default())
            .await
            .map_err(|e| ContractError::setup(BrokerOp::Consume, e.to_string()))?;
        Ok(LapinDeliveries { inner: consumer })
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        self.inner
            .basic_cancel(consumer_tag, BasicCancelOptions { nowait: false })
            .await
            .map_err(|e| ContractError::shutdown_race(BrokerOp::Cancel, e.to_string()))
    }

    fn notify_closed(&self) -> CloseNotifications {
        if !self.inner.status().connected() {
            self.listeners.finish(None);
        }
        self.listeners.register()
    }

    async fn close(&self) -> Result<()> {
        let result = self
            .inner
            .close(REPLY_SUCCESS, "consumer shutdown")
            .await
            .map_err(|e| ContractError::shutdown_race(BrokerOp::CloseChannel, e.to_string()));
        self.listeners.finish(None);
        result
    }
}

/// lapin consumer adapted to [`DeliveryStream`]
pub struct LapinDeliveries {
    inner: lapin::Consumer,
}

impl DeliveryStream for LapinDeliveries {
    type Delivery = LapinDelivery;

    async fn next_delivery(&mut self) -> Option<Result<LapinDelivery>> {
        let item = self.inner.next().await?;
        Some(
            item.map(|inner| LapinDelivery { inner })
                .map_err(|e| ContractError::connectivity(BrokerOp::Consume, e.to_string())),
        )
    }
}

/// lapin delivery
pub struct LapinDelivery {
    inner: lapin::message::Delivery,
}

impl Acknowledge for LapinDelivery {
    fn delivery_tag(&self) -> u64 {
        self.inner.delivery_tag
    }

    fn body(&self) -> &[u8] {
        &self.inner.data
    }

    async fn ack(self, multiple: bool) -> Result<()> {
        self.inner
            .acker
            .ack(BasicAckOptions { multiple })
            .await
            .map_err(|e| ContractError::acknowledge(BrokerOp::Ack, e.to_string()))
    }

    async fn reject(self, requeue: bool) -> Result<()> {
        self.inner
            .acker
            .reject(BasicRejectOptions { requeue })
            .await
            .map_err(|e| ContractError::acknowledge(BrokerOp::Reject, e.to_string()))
    }
}
