//! Mock broker client
//!
//! In-memory broker for unit tests: records every operation, supports
//! failure injection and simulates broker-side closures.
//!
//! Requeued and unacknowledged messages go back to the ready queue and are
//! delivered on the next subscription, or when `redeliver` is called.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use contracts::{
    close_notification, BrokerOp, CloseNotice, CloseNotifications, CloseNotifier, ContractError,
};
use tokio::sync::mpsc;
use tracing::instrument;

use crate::client::{
    Acknowledge, BrokerChannel, BrokerClient, BrokerConnection, ConsumeOptions, DeliveryStream,
    QueueOptions,
};
use crate::Result;

/// Failure injection switches
#[derive(Debug, Default, Clone)]
pub struct MockConfig {
    pub fail_dial: bool,
    pub fail_open_channel: bool,
    pub fail_declare: bool,
    pub fail_bind: bool,
    pub fail_consume: bool,
    pub fail_cancel: bool,
}

/// Operation journal entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Dial {
        address: String,
    },
    OpenChannel {
        connection: u64,
    },
    DeclareQueue {
        queue: String,
        options: QueueOptions,
    },
    BindQueue {
        queue: String,
        routing_key: String,
        exchange: String,
        no_wait: bool,
    },
    Consume {
        queue: String,
        consumer_tag: String,
        options: ConsumeOptions,
    },
    Cancel {
        consumer_tag: String,
    },
    CloseChannel {
        channel: u64,
    },
    CloseConnection {
        connection: u64,
    },
    Ack {
        delivery_tag: u64,
        multiple: bool,
    },
    Reject {
        delivery_tag: u64,
        requeue: bool,
    },
}

/// Mock broker
///
/// Cloning shares the same broker state.
#[derive(Clone, Default)]
pub struct MockBroker {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    config: Mutex<MockConfig>,
    events: Mutex<Vec<MockEvent>>,
    dial_count: AtomicUsize,
    next_id: AtomicU64,
    next_delivery_tag: AtomicU64,
    connections: Mutex<Vec<Arc<ConnState>>>,
    /// Messages waiting for a consumer
    ready: Mutex<VecDeque<Bytes>>,
    /// Delivered, not yet acknowledged (delivery tag -> channel id, body)
    in_flight: Mutex<HashMap<u64, (u64, Bytes)>>,
    dropped: AtomicUsize,
}

struct ConnState {
    id: u64,
    closed: AtomicBool,
    notifiers: Mutex<Vec<CloseNotifier>>,
    channels: Mutex<Vec<Arc<ChanState>>>,
}

struct ChanState {
    id: u64,
    closed: AtomicBool,
    notifiers: Mutex<Vec<CloseNotifier>>,
    subscription: Mutex<Option<Subscription>>,
}

struct Subscription {
    consumer_tag: String,
    tx: mpsc::UnboundedSender<MockDelivery>,
}

impl MockBroker {
    /// Create a mock broker with no failures injected
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock broker with the given failure switches
    pub fn with_config(config: MockConfig) -> Self {
        let broker = Self::default();
        *broker.shared.config.lock().unwrap() = config;
        broker
    }

    /// Change failure switches at runtime
    pub fn configure(&self, f: impl FnOnce(&mut MockConfig)) {
        f(&mut self.shared.config.lock().unwrap());
    }

    /// Operation journal
    pub fn events(&self) -> Vec<MockEvent> {
        self.shared.events.lock().unwrap().clone()
    }

    /// Number of dial attempts, successful or not
    pub fn dial_count(&self) -> usize {
        self.shared.dial_count.load(Ordering::SeqCst)
    }

    /// Number of successful subscriptions
    pub fn consume_count(&self) -> usize {
        self.count_events(|e| matches!(e, MockEvent::Consume { .. }))
    }

    /// Delivery tags acknowledged so far
    pub fn acks(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::Ack { delivery_tag, .. } => Some(delivery_tag),
                _ => None,
            })
            .collect()
    }

    /// (delivery tag, requeue) pairs rejected so far
    pub fn rejects(&self) -> Vec<(u64, bool)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::Reject {
                    delivery_tag,
                    requeue,
                } => Some((delivery_tag, requeue)),
                _ => None,
            })
            .collect()
    }

    /// Connections not yet closed
    pub fn open_connections(&self) -> usize {
        self.shared
            .connections
            .lock()
            .unwrap()
            .iter()
            .filter(|c| !c.closed.load(Ordering::SeqCst))
            .count()
    }

    /// Channels not yet closed
    pub fn open_channels(&self) -> usize {
        self.shared
            .connections
            .lock()
            .unwrap()
            .iter()
            .flat_map(|c| c.channels.lock().unwrap().clone())
            .filter(|ch| !ch.closed.load(Ordering::SeqCst))
            .count()
    }

    /// Messages not yet acknowledged (ready + in flight)
    pub fn pending(&self) -> usize {
        self.shared.ready.lock().unwrap().len() + self.shared.in_flight.lock().unwrap().len()
    }

    /// Messages rejected without requeue
    pub fn dropped(&self) -> usize {
        self.shared.dropped.load(Ordering::SeqCst)
    }

    /// Enqueue a message and deliver it if a subscription is active
    pub fn publish(&self, body: impl Into<Bytes>) {
        self.shared.ready.lock().unwrap().push_back(body.into());
        self.shared.pump();
    }

    /// Deliver ready messages (including requeued ones) to the active subscription
    pub fn redeliver(&self) {
        self.shared.pump();
    }

    /// Simulate the broker closing the newest open connection
    ///
    /// Its channels are closed with the same notice.
    pub fn close_connection(&self, notice: CloseNotice) -> bool {
        match self.shared.newest_open_connection() {
            Some(conn) => {
                self.shared.shutdown_connection(&conn, Some(notice));
                true
            }
            None => false,
        }
    }

    /// Simulate the broker closing the newest open channel
    pub fn close_channel(&self, notice: CloseNotice) -> bool {
        let channel = self.shared.newest_open_connection().and_then(|conn| {
            conn.channels
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|ch| !ch.closed.load(Ordering::SeqCst))
                .cloned()
        });
        match channel {
            Some(ch) => {
                self.shared.shutdown_channel(&ch, Some(notice));
                true
            }
            None => false,
        }
    }

    /// Simulate the broker cancelling the active consumer
    ///
    /// The delivery stream ends; no close notification fires and the channel
    /// stays open.
    pub fn cancel_subscription(&self) -> bool {
        let Some(conn) = self.shared.newest_open_connection() else {
            return false;
        };
        let channels = conn.channels.lock().unwrap();
        channels
            .iter()
            .filter(|ch| !ch.closed.load(Ordering::SeqCst))
            .any(|ch| ch.subscription.lock().unwrap().take().is_some())
    }

    /// Poll `condition` until it holds or `timeout` elapses
    pub async fn wait_for(&self, timeout: Duration, condition: impl Fn(&MockBroker) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition(self) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn count_events(&self, predicate: impl Fn(&MockEvent) -> bool) -> usize {
        self.shared
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| predicate(e))
            .count()
    }
}

impl Shared {
    fn record(&self, event: MockEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn config(&self) -> MockConfig {
        self.config.lock().unwrap().clone()
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn newest_open_connection(&self) -> Option<Arc<ConnState>> {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| !c.closed.load(Ordering::SeqCst))
            .cloned()
    }

    fn active_subscription(&self) -> Option<(u64, mpsc::UnboundedSender<MockDelivery>)> {
        let conn = self.newest_open_connection()?;
        let channels = conn.channels.lock().unwrap();
        channels
            .iter()
            .rev()
            .filter(|ch| !ch.closed.load(Ordering::SeqCst))
            .find_map(|ch| {
                ch.subscription
                    .lock()
                    .unwrap()
                    .as_ref()
                    .map(|s| (ch.id, s.tx.clone()))
            })
    }

    /// Move ready messages to the active subscription, if any
    fn pump(self: &Arc<Self>) {
        let Some((channel_id, tx)) = self.active_subscription() else {
            return;
        };
        let mut ready = self.ready.lock().unwrap();
        while let Some(body) = ready.pop_front() {
            let delivery_tag = self.next_delivery_tag.fetch_add(1, Ordering::SeqCst) + 1;
            self.in_flight
                .lock()
                .unwrap()
                .insert(delivery_tag, (channel_id, body.clone()));
            let delivery = MockDelivery {
                delivery_tag,
                body: body.clone(),
                shared: Arc::clone(self),
            };
            if tx.send(delivery).is_err() {
                self.in_flight.lock().unwrap().remove(&delivery_tag);
                ready.push_front(body);
                break;
            }
        }
    }

    /// Return unacknowledged messages of a closed channel to the ready queue
    fn requeue_channel(&self, channel_id: u64) {
        let mut ready = self.ready.lock().unwrap();
        let mut in_flight = self.in_flight.lock().unwrap();
        let mut tags: Vec<u64> = in_flight
            .iter()
            .filter(|(_, (ch, _))| *ch == channel_id)
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable();
        for tag in tags {
            if let Some((_, body)) = in_flight.remove(&tag) {
                ready.push_back(body);
            }
        }
    }

    /// Close a channel; `notice` is sent to listeners, None closes them silently
    fn shutdown_channel(&self, channel: &ChanState, notice: Option<CloseNotice>) -> bool {
        if channel.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        channel.subscription.lock().unwrap().take();
        for notifier in channel.notifiers.lock().unwrap().drain(..) {
            match &notice {
                Some(n) => {
                    notifier.notify(n.clone());
                }
                None => notifier.close(),
            }
        }
        self.requeue_channel(channel.id);
        true
    }

    fn shutdown_connection(&self, conn: &ConnState, notice: Option<CloseNotice>) -> bool {
        if conn.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        for channel in conn.channels.lock().unwrap().iter() {
            self.shutdown_channel(channel, notice.clone());
        }
        for notifier in conn.notifiers.lock().unwrap().drain(..) {
            match &notice {
                Some(n) => {
                    notifier.notify(n.clone());
                }
                None => notifier.close(),
            }
        }
        true
    }

    fn settle(&self, delivery_tag: u64, requeue: Option<bool>) -> Result<()> {
        let op = if requeue.is_some() {
            BrokerOp::Reject
        } else {
            BrokerOp::Ack
        };
        let Some((_, body)) = self.in_flight.lock().unwrap().remove(&delivery_tag) else {
            return Err(ContractError::acknowledge(
                op,
                format!("unknown delivery tag {delivery_tag}, channel closed"),
            ));
        };
        match requeue {
            Some(true) => self.ready.lock().unwrap().push_back(body),
            Some(false) => {
                self.dropped.fetch_add(1, Ordering::SeqCst);
            }
            None => {}
        }
        Ok(())
    }
}

fn register(notifiers: &Mutex<Vec<CloseNotifier>>, closed: &AtomicBool) -> CloseNotifications {
    let (notifier, stream) = close_notification();
    let mut list = notifiers.lock().unwrap();
    if closed.load(Ordering::SeqCst) {
        notifier.close();
    } else {
        list.push(notifier);
    }
    stream
}

impl BrokerClient for MockBroker {
    type Connection = MockConnection;

    #[instrument(name = "mock_broker_dial", skip(self), fields(address = %address))]
    async fn dial(&self, address: &str) -> Result<MockConnection> {
        self.shared.dial_count.fetch_add(1, Ordering::SeqCst);
        self.shared.record(MockEvent::Dial {
            address: address.to_string(),
        });

        if self.shared.config().fail_dial {
            return Err(ContractError::connectivity(
                BrokerOp::Dial,
                "mock failure: connection refused",
            ));
        }

        let state = Arc::new(ConnState {
            id: self.shared.allocate_id(),
            closed: AtomicBool::new(false),
            notifiers: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
        });
        self.shared
            .connections
            .lock()
            .unwrap()
            .push(Arc::clone(&state));

        Ok(MockConnection {
            shared: Arc::clone(&self.shared),
            state,
        })
    }
}

/// Mock connection
pub struct MockConnection {
    shared: Arc<Shared>,
    state: Arc<ConnState>,
}

impl MockConnection {
    /// Connection id
    pub fn id(&self) -> u64 {
        self.state.id
    }
}

impl BrokerConnection for MockConnection {
    type Channel = MockChannel;

    async fn open_channel(&self) -> Result<MockChannel> {
        self.shared.record(MockEvent::OpenChannel {
            connection: self.state.id,
        });

        if self.is_closed() {
            return Err(ContractError::connectivity(
                BrokerOp::OpenChannel,
                "connection closed",
            ));
        }
        if self.shared.config().fail_open_channel {
            return Err(ContractError::connectivity(
                BrokerOp::OpenChannel,
                "mock failure: channel open refused",
            ));
        }

        let state = Arc::new(ChanState {
            id: self.shared.allocate_id(),
            closed: AtomicBool::new(false),
            notifiers: Mutex::new(Vec::new()),
            subscription: Mutex::new(None),
        });
        self.state
            .channels
            .lock()
            .unwrap()
            .push(Arc::clone(&state));

        Ok(MockChannel {
            shared: Arc::clone(&self.shared),
            state,
        })
    }

    fn notify_closed(&self) -> CloseNotifications {
        register(&self.state.notifiers, &self.state.closed)
    }

    fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.shared.record(MockEvent::CloseConnection {
            connection: self.state.id,
        });
        if self.shared.shutdown_connection(&self.state, None) {
            Ok(())
        } else {
            Err(ContractError::shutdown_race(
                BrokerOp::CloseConnection,
                "connection already closed",
            ))
        }
    }
}

/// Mock channel
pub struct MockChannel {
    shared: Arc<Shared>,
    state: Arc<ChanState>,
}

impl MockChannel {
    fn ensure_open(&self, op: BrokerOp) -> Result<()> {
        if self.state.closed.load(Ordering::SeqCst) {
            Err(ContractError::setup(op, "channel closed"))
        } else {
            Ok(())
        }
    }
}

impl BrokerChannel for MockChannel {
    type Deliveries = MockDeliveries;

    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<()> {
        self.shared.record(MockEvent::DeclareQueue {
            queue: name.to_string(),
            options,
        });
        self.ensure_open(BrokerOp::DeclareQueue)?;
        if self.shared.config().fail_declare {
            return Err(ContractError::setup(
                BrokerOp::DeclareQueue,
                "mock failure: access refused",
            ));
        }
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        routing_key: &str,
        exchange: &str,
        no_wait: bool,
    ) -> Result<()> {
        self.shared.record(MockEvent::BindQueue {
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
            exchange: exchange.to_string(),
            no_wait,
        });
        self.ensure_open(BrokerOp::BindQueue)?;
        if self.shared.config().fail_bind {
            return Err(ContractError::setup(
                BrokerOp::BindQueue,
                format!("mock failure: no exchange '{exchange}'"),
            ));
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: ConsumeOptions,
    ) -> Result<MockDeliveries> {
        self.ensure_open(BrokerOp::Consume)?;
        if self.shared.config().fail_consume {
            return Err(ContractError::setup(
                BrokerOp::Consume,
                "mock failure: consumer refused",
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.state.subscription.lock().unwrap() = Some(Subscription {
            consumer_tag: consumer_tag.to_string(),
            tx,
        });
        self.shared.record(MockEvent::Consume {
            queue: queue.to_string(),
            consumer_tag: consumer_tag.to_string(),
            options,
        });
        self.shared.pump();

        Ok(MockDeliveries { rx })
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        self.shared.record(MockEvent::Cancel {
            consumer_tag: consumer_tag.to_string(),
        });
        if self.shared.config().fail_cancel {
            return Err(ContractError::shutdown_race(
                BrokerOp::Cancel,
                "mock failure: cancel refused",
            ));
        }
        let mut subscription = self.state.subscription.lock().unwrap();
        match subscription.as_ref() {
            Some(s) if s.consumer_tag == consumer_tag => {
                subscription.take();
                Ok(())
            }
            _ => Err(ContractError::shutdown_race(
                BrokerOp::Cancel,
                format!("unknown consumer tag '{consumer_tag}'"),
            )),
        }
    }

    fn notify_closed(&self) -> CloseNotifications {
        register(&self.state.notifiers, &self.state.closed)
    }

    async fn close(&self) -> Result<()> {
        self.shared.record(MockEvent::CloseChannel {
            channel: self.state.id,
        });
        if self.shared.shutdown_channel(&self.state, None) {
            Ok(())
        } else {
            Err(ContractError::shutdown_race(
                BrokerOp::CloseChannel,
                "channel already closed",
            ))
        }
    }
}

/// Mock delivery stream
pub struct MockDeliveries {
    rx: mpsc::UnboundedReceiver<MockDelivery>,
}

impl DeliveryStream for MockDeliveries {
    type Delivery = MockDelivery;

    async fn next_delivery(&mut self) -> Option<Result<MockDelivery>> {
        self.rx.recv().await.map(Ok)
    }
}

/// Mock delivery
pub struct MockDelivery {
    delivery_tag: u64,
    body: Bytes,
    shared: Arc<Shared>,
}

impl Acknowledge for MockDelivery {
    fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    async fn ack(self, multiple: bool) -> Result<()> {
        self.shared.record(MockEvent::Ack {
            delivery_tag: self.delivery_tag,
            multiple,
        });
        self.shared.settle(self.delivery_tag, None)
    }

    async fn reject(self, requeue: bool) -> Result<()> {
        self.shared.record(MockEvent::Reject {
            delivery_tag: self.delivery_tag,
            requeue,
        });
        self.shared.settle(self.delivery_tag, Some(requeue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn subscribe(broker: &MockBroker) -> (MockConnection, MockChannel, MockDeliveries) {
        let conn = broker.dial("amqp://mock").await.unwrap();
        let channel = conn.open_channel().await.unwrap();
        let deliveries = channel
            .consume("q1", "consumer", ConsumeOptions::default())
            .await
            .unwrap();
        (conn, channel, deliveries)
    }

    #[tokio::test]
    async fn test_publish_and_ack() {
        let broker = MockBroker::new();
        let (_conn, _channel, mut deliveries) = subscribe(&broker).await;

        broker.publish(vec![0x01]);
        assert_eq!(broker.pending(), 1);

        let delivery = deliveries.next_delivery().await.unwrap().unwrap();
        assert_eq!(delivery.body(), &[0x01]);
        let tag = delivery.delivery_tag();
        delivery.ack(false).await.unwrap();

        assert_eq!(broker.acks(), vec![tag]);
        assert_eq!(broker.pending(), 0);
    }

    #[tokio::test]
    async fn test_reject_requeue_keeps_message() {
        let broker = MockBroker::new();
        let (_conn, _channel, mut deliveries) = subscribe(&broker).await;

        broker.publish(vec![0x02]);
        let delivery = deliveries.next_delivery().await.unwrap().unwrap();
        delivery.reject(true).await.unwrap();
        assert_eq!(broker.pending(), 1);
        assert_eq!(broker.dropped(), 0);

        broker.redeliver();
        let again = deliveries.next_delivery().await.unwrap().unwrap();
        assert_eq!(again.body(), &[0x02]);
    }

    #[tokio::test]
    async fn test_publish_before_subscribe_is_buffered() {
        let broker = MockBroker::new();
        broker.publish(vec![0x03]);
        let (_conn, _channel, mut deliveries) = subscribe(&broker).await;
        let delivery = deliveries.next_delivery().await.unwrap().unwrap();
        assert_eq!(delivery.body(), &[0x03]);
    }

    #[tokio::test]
    async fn test_broker_closed_connection_notifies_and_ends_stream() {
        let broker = MockBroker::new();
        let (conn, channel, mut deliveries) = subscribe(&broker).await;
        let mut conn_closed = conn.notify_closed();
        let mut chan_closed = channel.notify_closed();

        broker.publish(vec![0x04]);
        let unacked = deliveries.next_delivery().await.unwrap().unwrap();

        assert!(broker.close_connection(CloseNotice::Error("connection reset".into())));
        assert!(conn.is_closed());
        assert_eq!(
            conn_closed.closed().await,
            CloseNotice::Error("connection reset".into())
        );
        assert_eq!(
            chan_closed.closed().await,
            CloseNotice::Error("connection reset".into())
        );
        assert!(deliveries.next_delivery().await.is_none());

        // unacknowledged message returned to the queue
        assert!(unacked.ack(false).await.is_err());
        assert_eq!(broker.pending(), 1);
    }

    #[tokio::test]
    async fn test_notify_on_closed_resource_is_already_closed() {
        let broker = MockBroker::new();
        let (conn, _channel, _deliveries) = subscribe(&broker).await;
        conn.close().await.unwrap();
        let mut late = conn.notify_closed();
        assert!(late.drain_to_close().await.is_empty());
        assert!(conn.close().await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_ends_delivery_stream() {
        let broker = MockBroker::new();
        let (_conn, channel, mut deliveries) = subscribe(&broker).await;
        channel.cancel("consumer").await.unwrap();
        assert!(deliveries.next_delivery().await.is_none());
        assert!(channel.cancel("consumer").await.is_err());
    }

    #[tokio::test]
    async fn test_broker_cancel_ends_stream_without_notice() {
        let broker = MockBroker::new();
        let (conn, channel, mut deliveries) = subscribe(&broker).await;
        let mut chan_closed = channel.notify_closed();

        assert!(broker.cancel_subscription());
        assert!(deliveries.next_delivery().await.is_none());
        assert!(!conn.is_closed());
        assert!(tokio::time::timeout(Duration::from_millis(50), chan_closed.closed())
            .await
            .is_err());
        assert!(!broker.cancel_subscription());
    }
}
