//! Dispatcher - delivery loop for one connection lifetime

use std::sync::Arc;
use std::time::Instant;

use broker::{Acknowledge, DeliveryStream};
use contracts::MessageHandler;
use observability::{record_delivery_outcome, record_handler_latency_ms, DeliveryOutcome};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn, Instrument, Span};

use crate::metrics::ConsumerMetrics;

/// Per-lifetime totals returned when the delivery stream ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub generation: u64,
    pub delivered: u64,
    pub acked: u64,
    pub rejected: u64,
    pub ack_failures: u64,
}

/// Drains one delivery stream, resolving each delivery to ack or requeue-reject
///
/// Holds no reference to the supervisor; exits only when the stream ends.
pub struct Dispatcher<D, H> {
    deliveries: D,
    handler: Arc<H>,
    metrics: Arc<ConsumerMetrics>,
    queue: String,
    generation: u64,
}

impl<D, H> Dispatcher<D, H>
where
    D: DeliveryStream,
    H: MessageHandler + Sync + 'static,
{
    pub fn new(
        deliveries: D,
        handler: Arc<H>,
        metrics: Arc<ConsumerMetrics>,
        queue: impl Into<String>,
        generation: u64,
    ) -> Self {
        Self {
            deliveries,
            handler,
            metrics,
            queue: queue.into(),
            generation,
        }
    }

    /// Run the dispatcher loop
    ///
    /// Deliveries are handled one at a time, in stream order.
    #[instrument(
        name = "dispatcher_run",
        skip(self),
        fields(queue = %self.queue, generation = self.generation)
    )]
    pub async fn run(mut self) -> DispatchReport {
        info!("Dispatcher started");

        let mut report = DispatchReport {
            generation: self.generation,
            ..Default::default()
        };

        while let Some(next) = self.deliveries.next_delivery().await {
            let delivery = match next {
                Ok(delivery) => delivery,
                Err(e) => {
                    warn!(error = %e, "delivery stream failed");
                    break;
                }
            };
            report.delivered += 1;
            self.metrics.inc_delivered();
            self.dispatch(delivery, &mut report).await;
        }

        info!(
            delivered = report.delivered,
            acked = report.acked,
            rejected = report.rejected,
            "Delivery stream closed, dispatcher exiting"
        );
        report
    }

    /// Spawn the dispatcher as a background task inside `span`
    pub fn spawn(self, span: Span) -> JoinHandle<DispatchReport> {
        tokio::spawn(self.run().instrument(span))
    }

    async fn dispatch(&self, delivery: D::Delivery, report: &mut DispatchReport) {
        let delivery_tag = delivery.delivery_tag();

        let started = Instant::now();
        let outcome = self.handler.handle(delivery.body()).await;
        record_handler_latency_ms(&self.queue, started.elapsed().as_secs_f64() * 1000.0);

        let (settled, outcome) = match outcome {
            Ok(()) => {
                debug!(delivery_tag, "handler succeeded, acking");
                (delivery.ack(false).await, DeliveryOutcome::Acked)
            }
            Err(e) => {
                warn!(delivery_tag, error = %e, "handler failed, rejecting with requeue");
                (delivery.reject(true).await, DeliveryOutcome::Rejected)
            }
        };

        let outcome = match settled {
            Ok(()) => {
                if outcome == DeliveryOutcome::Acked {
                    report.acked += 1;
                    self.metrics.inc_acked();
                } else {
                    report.rejected += 1;
                    self.metrics.inc_rejected();
                }
                outcome
            }
            Err(e) => {
                // unacknowledged messages are redelivered once the channel is gone
                warn!(delivery_tag, error = %e, "acknowledgment failed");
                report.ack_failures += 1;
                self.metrics.inc_ack_failures();
                DeliveryOutcome::AckFailed
            }
        };
        record_delivery_outcome(&self.queue, outcome);
    }
}
