//! Reconnect supervisor
//!
//! Sole owner of the live session. Listens for close notifications, tears the
//! stale session down and reconnects with a fixed backoff until shutdown.

use std::sync::Arc;
use std::time::Duration;

use broker::{BrokerClient, BrokerGateway, DeliveriesOf, Established, Session};
use contracts::{CloseNotice, MessageHandler, ReconnectState};
use observability::{record_reconnect_attempt, record_state, record_teardown_failures, ReconnectResult};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::metrics::ConsumerMetrics;

/// The session currently in service and the dispatcher draining it
struct Active<C: BrokerClient> {
    session: Session<C>,
    dispatcher: JoinHandle<DispatchReport>,
}

/// What ended the current session
#[derive(Debug, Clone, Copy)]
enum ClosedBy {
    Connection,
    Channel,
    /// Delivery stream ended with no close notification, e.g. a broker-side
    /// cancel or a normal close some clients do not report
    Stream,
}

impl ClosedBy {
    fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Channel => "channel",
            Self::Stream => "delivery_stream",
        }
    }
}

type Joined = Result<DispatchReport, tokio::task::JoinError>;

/// Reconnect Supervisor
pub struct Supervisor<C: BrokerClient, H> {
    gateway: BrokerGateway<C>,
    handler: Arc<H>,
    metrics: Arc<ConsumerMetrics>,
    shutdown: CancellationToken,
    state: watch::Sender<Option<ReconnectState>>,
    span: Span,
}

impl<C, H> Supervisor<C, H>
where
    C: BrokerClient,
    H: MessageHandler + Sync + 'static,
{
    pub fn new(
        gateway: BrokerGateway<C>,
        handler: Arc<H>,
        metrics: Arc<ConsumerMetrics>,
        shutdown: CancellationToken,
        state: watch::Sender<Option<ReconnectState>>,
        span: Span,
    ) -> Self {
        Self {
            gateway,
            handler,
            metrics,
            shutdown,
            state,
            span,
        }
    }

    /// Install the first session and run the supervisor in the background
    ///
    /// The state is `Connected` by the time this returns.
    pub fn spawn(self, established: Established<C>) -> JoinHandle<()> {
        let active = self.install(established);
        let span = self.span.clone();
        tokio::spawn(self.run(active).instrument(span))
    }

    async fn run(self, mut active: Active<C>) {
        loop {
            let mut joined: Option<Joined> = None;
            let (closed_by, notice) = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                notice = active.session.connection_closed.closed() => (ClosedBy::Connection, notice),
                notice = active.session.channel_closed.closed() => (ClosedBy::Channel, notice),
                result = &mut active.dispatcher => {
                    joined = Some(result);
                    (ClosedBy::Stream, CloseNotice::Normal)
                }
            };

            match &notice {
                CloseNotice::Error(reason) => warn!(
                    closed_by = closed_by.as_str(),
                    generation = active.session.generation,
                    reason = %reason,
                    "subscription lost"
                ),
                CloseNotice::Normal => warn!(
                    closed_by = closed_by.as_str(),
                    generation = active.session.generation,
                    "subscription closed"
                ),
            }

            self.set_state(ReconnectState::Reconnecting);
            self.discard(active, joined).await;

            match self.reconnect().await {
                Some(established) => active = self.install(established),
                None => {
                    self.set_state(ReconnectState::Stopped);
                    return;
                }
            }
        }

        info!("shutdown requested, releasing subscription");
        self.discard(active, None).await;
        self.set_state(ReconnectState::Stopped);
    }

    /// Hand the delivery stream to a fresh dispatcher and mark the consumer connected
    fn install(&self, established: Established<C>) -> Active<C> {
        let Established {
            session,
            deliveries,
        } = established;

        let dispatcher = self.dispatcher(deliveries, session.generation);
        self.set_state(ReconnectState::Connected);

        Active {
            session,
            dispatcher: dispatcher.spawn(self.span.clone()),
        }
    }

    fn dispatcher(&self, deliveries: DeliveriesOf<C>, generation: u64) -> Dispatcher<DeliveriesOf<C>, H> {
        Dispatcher::new(
            deliveries,
            Arc::clone(&self.handler),
            Arc::clone(&self.metrics),
            self.gateway.config().queue.clone(),
            generation,
        )
    }

    /// Tear down a stale session and wait for its dispatcher to exit
    ///
    /// `joined` carries the dispatcher result when it already finished.
    async fn discard(&self, active: Active<C>, joined: Option<Joined>) {
        let Active {
            session,
            dispatcher,
        } = active;

        self.release(session).await;

        let joined = match joined {
            Some(joined) => joined,
            None => dispatcher.await,
        };
        match joined {
            Ok(report) => debug!(
                generation = report.generation,
                delivered = report.delivered,
                ack_failures = report.ack_failures,
                "dispatcher finished"
            ),
            Err(e) => error!(error = %e, "dispatcher task failed"),
        }
    }

    /// Best-effort teardown, then drain both notification streams to close
    async fn release(&self, mut session: Session<C>) {
        let failures = self.gateway.teardown(&session).await;
        self.metrics.add_teardown_failures(failures.len());
        record_teardown_failures(&self.gateway.config().queue, failures.len());

        let connection_notices = session.connection_closed.drain_to_close().await;
        let channel_notices = session.channel_closed.drain_to_close().await;
        self.metrics.add_streams_drained(2);
        debug!(
            generation = session.generation,
            connection_notices = connection_notices.len(),
            channel_notices = channel_notices.len(),
            "notification streams drained"
        );
    }

    /// Retry connect at a fixed interval until it succeeds or shutdown fires
    ///
    /// Returns None on shutdown; no connect is issued once the token is cancelled.
    async fn reconnect(&self) -> Option<Established<C>> {
        let interval = self.gateway.config().reconnect_interval();
        let queue = &self.gateway.config().queue;
        let mut attempt: u64 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                info!(attempt, "shutdown requested, reconnect aborted");
                return None;
            }

            attempt += 1;
            self.metrics.inc_reconnect_attempts();

            match self.gateway.connect().await {
                Ok(established) => {
                    record_reconnect_attempt(queue, ReconnectResult::Success);
                    if self.shutdown.is_cancelled() {
                        info!("shutdown requested during connect, releasing new subscription");
                        let Established { session, deliveries } = established;
                        drop(deliveries);
                        self.release(session).await;
                        return None;
                    }
                    self.metrics.inc_reconnects();
                    info!(attempt, "reconnected");
                    return Some(established);
                }
                Err(e) => {
                    record_reconnect_attempt(queue, ReconnectResult::Failure);
                    warn!(
                        attempt,
                        error = %e,
                        retry_in_ms = duration_ms(interval),
                        "reconnect failed"
                    );
                }
            }

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!(attempt, "shutdown requested during backoff");
                    return None;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    fn set_state(&self, next: ReconnectState) {
        let previous = self.state.send_replace(Some(next));
        if let Some(previous) = previous {
            if previous != next && !previous.can_transition_to(next) {
                warn!(from = %previous, to = %next, "unexpected state transition");
            }
        }
        record_state(&self.gateway.config().queue, next);
        info!(state = %next, "consumer state changed");
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker::{MockBroker, MockEvent};
    use contracts::{ConsumerConfig, HandlerFn};

    fn config(interval: Duration) -> ConsumerConfig {
        ConsumerConfig::new("amqp://host", "ex1", "q1", false).with_reconnect_interval(interval)
    }

    struct Harness {
        broker: MockBroker,
        shutdown: CancellationToken,
        state: watch::Receiver<Option<ReconnectState>>,
        metrics: Arc<ConsumerMetrics>,
        task: JoinHandle<()>,
    }

    async fn start(interval: Duration) -> Harness {
        let broker = MockBroker::new();
        let gateway = BrokerGateway::new(broker.clone(), config(interval));
        let established = gateway.connect().await.unwrap();

        let (state_tx, state) = watch::channel(None);
        let shutdown = CancellationToken::new();
        let metrics = Arc::new(ConsumerMetrics::new());
        let supervisor = Supervisor::new(
            gateway,
            Arc::new(HandlerFn::new(|_: &[u8]| Ok(()))),
            metrics.clone(),
            shutdown.clone(),
            state_tx,
            Span::none(),
        );
        let task = supervisor.spawn(established);

        Harness {
            broker,
            shutdown,
            state,
            metrics,
            task,
        }
    }

    async fn wait_state(
        state: &mut watch::Receiver<Option<ReconnectState>>,
        want: ReconnectState,
    ) {
        tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| *s == Some(want)))
            .await
            .expect("state not reached")
            .unwrap();
    }

    #[tokio::test]
    async fn test_connected_after_spawn() {
        let h = start(Duration::from_millis(10)).await;
        assert_eq!(*h.state.borrow(), Some(ReconnectState::Connected));
        h.shutdown.cancel();
        h.task.await.unwrap();
        assert_eq!(*h.state.borrow(), Some(ReconnectState::Stopped));
        assert_eq!(h.broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_reconnects_after_connection_loss() {
        let mut h = start(Duration::from_millis(10)).await;

        h.broker
            .close_connection(CloseNotice::Error("connection reset".into()));

        assert!(
            h.broker
                .wait_for(Duration::from_secs(2), |b| b.consume_count() == 2)
                .await
        );
        wait_state(&mut h.state, ReconnectState::Connected).await;
        assert_eq!(h.broker.open_connections(), 1);
        assert_eq!(h.metrics.reconnects(), 1);

        h.shutdown.cancel();
        h.task.await.unwrap();
        assert_eq!(h.broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_stream_end_without_notice_reconnects() {
        let mut h = start(Duration::from_millis(10)).await;

        assert!(h.broker.cancel_subscription());

        assert!(
            h.broker
                .wait_for(Duration::from_secs(2), |b| b.consume_count() == 2)
                .await
        );
        wait_state(&mut h.state, ReconnectState::Connected).await;
        assert_eq!(h.broker.open_connections(), 1);
        assert_eq!(h.metrics.reconnects(), 1);
        // cancel of the already-gone consumer is swallowed
        assert_eq!(h.metrics.teardown_failures(), 1);

        h.broker.publish(vec![0x07]);
        assert!(
            h.broker
                .wait_for(Duration::from_secs(2), |b| b.acks().len() == 1)
                .await
        );

        h.shutdown.cancel();
        h.task.await.unwrap();
        assert_eq!(h.broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_channel_close_forces_full_teardown() {
        let h = start(Duration::from_millis(10)).await;

        h.broker
            .close_channel(CloseNotice::Error("precondition failed".into()));

        assert!(
            h.broker
                .wait_for(Duration::from_secs(2), |b| b.consume_count() == 2)
                .await
        );
        // the old connection was closed before the new dial
        let events = h.broker.events();
        let second_dial = events
            .iter()
            .rposition(|e| matches!(e, MockEvent::Dial { .. }))
            .unwrap();
        assert!(events[..second_dial]
            .iter()
            .any(|e| matches!(e, MockEvent::CloseConnection { .. })));

        h.shutdown.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_retries_at_fixed_interval_until_broker_returns() {
        let mut h = start(Duration::from_millis(20)).await;

        h.broker.configure(|c| c.fail_dial = true);
        h.broker.close_connection(CloseNotice::Error("broker down".into()));
        wait_state(&mut h.state, ReconnectState::Reconnecting).await;

        assert!(
            h.broker
                .wait_for(Duration::from_secs(2), |b| b.dial_count() >= 4)
                .await
        );
        assert_eq!(*h.state.borrow(), Some(ReconnectState::Reconnecting));

        h.broker.configure(|c| c.fail_dial = false);
        wait_state(&mut h.state, ReconnectState::Connected).await;
        assert!(h.metrics.reconnect_attempts() >= 4);

        h.shutdown.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_backoff() {
        let mut h = start(Duration::from_secs(5)).await;

        h.broker.configure(|c| c.fail_dial = true);
        h.broker.close_connection(CloseNotice::Error("broker down".into()));
        wait_state(&mut h.state, ReconnectState::Reconnecting).await;
        assert!(
            h.broker
                .wait_for(Duration::from_secs(1), |b| b.dial_count() == 2)
                .await
        );

        h.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), h.task)
            .await
            .expect("supervisor did not stop during backoff")
            .unwrap();

        assert_eq!(*h.state.borrow(), Some(ReconnectState::Stopped));
        assert_eq!(h.broker.dial_count(), 2);
    }
}
