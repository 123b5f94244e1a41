//! Consumer facade - public start/stop entry point

use std::sync::Arc;

use broker::{BrokerClient, BrokerGateway};
use contracts::{ConsumerConfig, MessageHandler, ReconnectState};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument, Span};

use crate::error::ConsumerError;
use crate::metrics::{ConsumerMetrics, MetricsSnapshot};
use crate::supervisor::Supervisor;

enum Lifecycle<C: BrokerClient> {
    /// Not started yet; the state sender is handed to the supervisor on start
    Idle {
        gateway: BrokerGateway<C>,
        state: watch::Sender<Option<ReconnectState>>,
    },
    Running(JoinHandle<()>),
    Stopped,
}

/// Reconnecting queue consumer
///
/// `start` performs the first connect and returns its error if it fails;
/// afterwards connection or channel loss is recovered in the background
/// until `stop` is called.
pub struct Consumer<C: BrokerClient, H> {
    handler: Arc<H>,
    metrics: Arc<ConsumerMetrics>,
    shutdown: CancellationToken,
    state: watch::Receiver<Option<ReconnectState>>,
    lifecycle: Lifecycle<C>,
    span: Span,
}

impl<C, H> Consumer<C, H>
where
    C: BrokerClient,
    H: MessageHandler + Sync + 'static,
{
    /// Create a consumer; nothing touches the network until `start`
    pub fn new(config: ConsumerConfig, client: C, handler: H) -> Self {
        let span = info_span!(
            "consumer",
            queue = %config.queue,
            consumer_tag = %config.consumer_tag
        );
        let (state_tx, state_rx) = watch::channel(None);
        Self {
            handler: Arc::new(handler),
            metrics: Arc::new(ConsumerMetrics::new()),
            shutdown: CancellationToken::new(),
            state: state_rx,
            lifecycle: Lifecycle::Idle {
                gateway: BrokerGateway::new(client, config),
                state: state_tx,
            },
            span,
        }
    }

    /// Log every event of this consumer inside `span` instead of the default one
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Connect, subscribe and launch background recovery
    ///
    /// # Errors
    /// - `Connect` if the first connect fails; the consumer may be started again
    /// - `AlreadyStarted` / `Stopped` if called in the wrong lifecycle state
    pub async fn start(&mut self) -> Result<(), ConsumerError> {
        let (gateway, state) = match std::mem::replace(&mut self.lifecycle, Lifecycle::Stopped) {
            Lifecycle::Idle { gateway, state } => (gateway, state),
            running @ Lifecycle::Running(_) => {
                self.lifecycle = running;
                return Err(ConsumerError::AlreadyStarted);
            }
            Lifecycle::Stopped => return Err(ConsumerError::Stopped),
        };

        let established = match gateway.connect().instrument(self.span.clone()).await {
            Ok(established) => established,
            Err(e) => {
                self.span.in_scope(|| error!(error = %e, "initial connect failed"));
                self.lifecycle = Lifecycle::Idle { gateway, state };
                return Err(ConsumerError::Connect(e));
            }
        };

        let supervisor = Supervisor::new(
            gateway,
            Arc::clone(&self.handler),
            Arc::clone(&self.metrics),
            self.shutdown.clone(),
            state,
            self.span.clone(),
        );
        self.lifecycle = Lifecycle::Running(supervisor.spawn(established));

        self.span.in_scope(|| info!("consumer started"));
        Ok(())
    }

    /// Fire the shutdown signal and wait for the final teardown
    ///
    /// Waits for the handler invocation in flight, if any. Calling `stop`
    /// again, or before `start`, only marks the consumer stopped.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();

        match std::mem::replace(&mut self.lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running(supervisor) => {
                if let Err(e) = supervisor.await {
                    self.span
                        .in_scope(|| error!(error = %e, "supervisor task failed"));
                }
                self.span.in_scope(|| info!("consumer stopped"));
            }
            Lifecycle::Idle { .. } => {
                self.span
                    .in_scope(|| debug!("stop before start, nothing to tear down"));
            }
            Lifecycle::Stopped => {
                self.span.in_scope(|| debug!("consumer already stopped"));
            }
        }
    }

    /// Current reconnect state; None before the first successful start
    pub fn state(&self) -> Option<ReconnectState> {
        *self.state.borrow()
    }

    /// Receiver following every state change
    pub fn watch_state(&self) -> watch::Receiver<Option<ReconnectState>> {
        self.state.clone()
    }

    /// Counters snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Whether `stop` has been called
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl<C: BrokerClient, H> Drop for Consumer<C, H> {
    fn drop(&mut self) {
        // a detached supervisor still releases the subscription
        self.shutdown.cancel();
    }
}
