//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 基于 MockBroker 的 e2e 测试（无需真实 broker）

#[cfg(test)]
mod contract_tests {
    use contracts::{ConfigVersion, ReconnectState};

    #[test]
    fn test_contracts_compile() {
        let _ = ConfigVersion::V1;
        assert!(ReconnectState::Stopped.is_terminal());
    }

    #[test]
    fn test_config_file_to_consumer() {
        let config = config_loader::ConfigLoader::load_from_str(
            r#"
[consumer]
address = "amqp://localhost:5672"
exchange = "ex1"
queue = "q1"
routing_key = "rk"
"#,
            config_loader::ConfigFormat::Toml,
        )
        .unwrap();

        assert_eq!(config.consumer.consumer_tag, "consumer");
        assert_eq!(
            config.consumer.reconnect_interval(),
            std::time::Duration::from_secs(5)
        );
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use broker::{CloseNotice, MockBroker, MockEvent};
    use consumer::{Consumer, ConsumerError, HandlerError, HandlerFn, MessageHandler};
    use contracts::{ConsumerConfig, ContractError, ReconnectState};

    const DEADLINE: Duration = Duration::from_secs(2);

    fn scenario_config() -> ConsumerConfig {
        ConsumerConfig::new("broker://host", "ex1", "q1", false)
    }

    fn succeed() -> impl MessageHandler + Sync + 'static {
        HandlerFn::new(|_: &[u8]| Ok(()))
    }

    fn fail() -> impl MessageHandler + Sync + 'static {
        HandlerFn::new(|_: &[u8]| Err(HandlerError::new("rejected by handler")))
    }

    fn count(broker: &MockBroker, predicate: impl Fn(&MockEvent) -> bool) -> usize {
        broker.events().iter().filter(|e| predicate(e)).count()
    }

    /// Scenario A: handler succeeds, one delivery is acked, stop closes everything
    #[tokio::test]
    async fn test_scenario_a_ack_then_stop() {
        let broker = MockBroker::new();
        let mut consumer = Consumer::new(scenario_config(), broker.clone(), succeed());
        consumer.start().await.unwrap();

        broker.publish(vec![0x01]);
        assert!(broker.wait_for(DEADLINE, |b| b.acks().len() == 1).await);
        assert!(broker.rejects().is_empty());

        consumer.stop().await;

        assert_eq!(broker.open_channels(), 0);
        assert_eq!(broker.open_connections(), 0);
        assert_eq!(count(&broker, |e| matches!(e, MockEvent::CloseChannel { .. })), 1);
        assert_eq!(count(&broker, |e| matches!(e, MockEvent::CloseConnection { .. })), 1);
        assert_eq!(consumer.state(), Some(ReconnectState::Stopped));
        assert_eq!(consumer.metrics().acked, 1);
        assert_eq!(broker.pending(), 0);
    }

    /// Scenario B: handler fails, delivery is rejected with requeue and never acked
    #[tokio::test]
    async fn test_scenario_b_reject_requeue() {
        let broker = MockBroker::new();
        let mut consumer = Consumer::new(scenario_config(), broker.clone(), fail());
        consumer.start().await.unwrap();

        broker.publish(vec![0x02]);
        assert!(broker.wait_for(DEADLINE, |b| b.rejects().len() == 1).await);

        consumer.stop().await;

        assert_eq!(broker.rejects().len(), 1);
        let (_, requeue) = broker.rejects()[0];
        assert!(requeue);
        assert!(broker.acks().is_empty());
        // still on the queue
        assert_eq!(broker.pending(), 1);
        assert_eq!(broker.dropped(), 0);
    }

    /// Scenario C: channel closed with an error triggers teardown and a new connect
    #[tokio::test]
    async fn test_scenario_c_channel_error_reconnects() {
        let broker = MockBroker::new();
        let config = scenario_config().with_reconnect_interval(Duration::from_millis(50));
        let mut consumer = Consumer::new(config, broker.clone(), succeed());
        consumer.start().await.unwrap();
        let mut state = consumer.watch_state();

        broker.publish(vec![0x01]);
        assert!(broker.wait_for(DEADLINE, |b| b.acks().len() == 1).await);

        assert!(broker.close_channel(CloseNotice::Error("PRECONDITION_FAILED".into())));

        assert!(broker.wait_for(DEADLINE, |b| b.dial_count() >= 2).await);
        assert!(broker.wait_for(DEADLINE, |b| b.consume_count() == 2).await);
        tokio::time::timeout(
            DEADLINE,
            state.wait_for(|s| *s == Some(ReconnectState::Connected)),
        )
        .await
        .unwrap()
        .unwrap();
        // both notification streams of the stale pair were drained
        assert_eq!(consumer.metrics().streams_drained, 2);

        // the stale pair was released before the new dial
        let events = broker.events();
        let second_dial = events
            .iter()
            .rposition(|e| matches!(e, MockEvent::Dial { .. }))
            .unwrap();
        assert!(events[..second_dial]
            .iter()
            .any(|e| matches!(e, MockEvent::CloseConnection { .. })));
        assert_eq!(broker.open_connections(), 1);

        // the new dispatcher resumes consuming
        broker.publish(vec![0x03]);
        assert!(broker.wait_for(DEADLINE, |b| b.acks().len() == 2).await);

        consumer.stop().await;
        assert_eq!(broker.open_connections(), 0);
        assert_eq!(consumer.metrics().reconnects, 1);
        assert_eq!(consumer.metrics().streams_drained, 4);
    }

    /// A failed cancel during stop is swallowed; channel and connection still close
    #[tokio::test]
    async fn test_stop_survives_cancel_failure() {
        let broker = MockBroker::new();
        let mut consumer = Consumer::new(scenario_config(), broker.clone(), succeed());
        consumer.start().await.unwrap();

        broker.configure(|c| c.fail_cancel = true);
        consumer.stop().await;

        assert_eq!(broker.open_channels(), 0);
        assert_eq!(broker.open_connections(), 0);
        assert_eq!(consumer.metrics().teardown_failures, 1);
        assert_eq!(consumer.state(), Some(ReconnectState::Stopped));
        let events = broker.events();
        assert!(events
            .iter()
            .any(|e| matches!(e, MockEvent::CloseChannel { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, MockEvent::CloseConnection { .. })));
    }

    /// Connection loss is recovered within one backoff interval
    #[tokio::test]
    async fn test_connection_loss_recovered_within_interval() {
        let broker = MockBroker::new();
        let interval = Duration::from_millis(200);
        let config = scenario_config().with_reconnect_interval(interval);
        let mut consumer = Consumer::new(config, broker.clone(), succeed());
        consumer.start().await.unwrap();

        // first reconnect attempt fails, the second succeeds after one interval
        broker.configure(|c| c.fail_dial = true);
        broker.close_connection(CloseNotice::Error("connection reset".into()));
        assert!(broker.wait_for(DEADLINE, |b| b.dial_count() == 2).await);
        broker.configure(|c| c.fail_dial = false);

        let started = tokio::time::Instant::now();
        assert!(broker.wait_for(DEADLINE, |b| b.consume_count() == 2).await);
        assert!(started.elapsed() < interval + Duration::from_millis(500));

        consumer.stop().await;
    }

    /// Stop during the backoff wait returns promptly and no connect follows
    #[tokio::test]
    async fn test_stop_during_backoff() {
        let broker = MockBroker::new();
        let mut consumer = Consumer::new(scenario_config(), broker.clone(), succeed());
        consumer.start().await.unwrap();
        let mut state = consumer.watch_state();

        broker.configure(|c| c.fail_dial = true);
        broker.close_connection(CloseNotice::Error("connection reset".into()));
        tokio::time::timeout(
            DEADLINE,
            state.wait_for(|s| *s == Some(ReconnectState::Reconnecting)),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(broker.wait_for(DEADLINE, |b| b.dial_count() == 2).await);

        // default interval is 5s; stop must not wait it out
        tokio::time::timeout(Duration::from_secs(1), consumer.stop())
            .await
            .expect("stop waited for the backoff interval");

        let dials = broker.dial_count();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(broker.dial_count(), dials);
        assert_eq!(consumer.state(), Some(ReconnectState::Stopped));
    }

    /// The first connect error is returned by start and nothing retries it
    #[tokio::test]
    async fn test_initial_connect_failure() {
        let broker = MockBroker::new();
        broker.configure(|c| c.fail_bind = true);
        let mut consumer = Consumer::new(scenario_config(), broker.clone(), succeed());

        let err = consumer.start().await.unwrap_err();
        assert!(matches!(
            err,
            ConsumerError::Connect(ContractError::Setup { .. })
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(broker.dial_count(), 1);
        assert_eq!(broker.open_connections(), 0);
        assert_eq!(broker.open_channels(), 0);
        assert_eq!(consumer.state(), None);
    }

    /// Setup failures during reconnect are retried, with partial resources released
    #[tokio::test]
    async fn test_setup_failure_during_reconnect_rolls_back() {
        let broker = MockBroker::new();
        let config = scenario_config().with_reconnect_interval(Duration::from_millis(20));
        let mut consumer = Consumer::new(config, broker.clone(), succeed());
        consumer.start().await.unwrap();

        broker.configure(|c| c.fail_consume = true);
        broker.close_connection(CloseNotice::Normal);
        assert!(broker.wait_for(DEADLINE, |b| b.dial_count() >= 3).await);
        // every failed attempt closed what it opened
        assert!(broker.open_connections() <= 1);

        broker.configure(|c| c.fail_consume = false);
        assert!(broker.wait_for(DEADLINE, |b| b.consume_count() == 2).await);
        assert_eq!(broker.open_connections(), 1);

        consumer.stop().await;
        assert_eq!(broker.open_connections(), 0);
    }

    /// Always-succeeding handler converges to zero pending deliveries
    #[tokio::test]
    async fn test_success_converges_to_zero_pending() {
        let broker = MockBroker::new();
        let mut consumer = Consumer::new(scenario_config(), broker.clone(), succeed());
        consumer.start().await.unwrap();

        for i in 0..50u8 {
            broker.publish(vec![i]);
        }
        assert!(broker.wait_for(DEADLINE, |b| b.pending() == 0).await);
        assert_eq!(broker.acks().len(), 50);
        assert!(broker.rejects().is_empty());

        consumer.stop().await;
    }

    /// A rejected delivery is redelivered and acked once the handler recovers
    #[tokio::test]
    async fn test_requeued_message_is_redelivered() {
        let broker = MockBroker::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        let handler = HandlerFn::new(move |_: &[u8]| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(HandlerError::new("transient"))
            } else {
                Ok(())
            }
        });
        let mut consumer = Consumer::new(scenario_config(), broker.clone(), handler);
        consumer.start().await.unwrap();

        broker.publish(b"order-42".to_vec());
        assert!(broker.wait_for(DEADLINE, |b| b.rejects().len() == 1).await);

        broker.redeliver();
        assert!(broker.wait_for(DEADLINE, |b| b.acks().len() == 1).await);
        assert_eq!(broker.pending(), 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        consumer.stop().await;
    }

    /// Each delivery gets exactly one decision across a reconnect
    #[tokio::test]
    async fn test_exactly_one_decision_per_delivery() {
        let broker = MockBroker::new();
        let config = scenario_config().with_reconnect_interval(Duration::from_millis(20));
        let mut consumer = Consumer::new(config, broker.clone(), succeed());
        consumer.start().await.unwrap();

        for i in 0..10u8 {
            broker.publish(vec![i]);
        }
        assert!(broker.wait_for(DEADLINE, |b| b.pending() == 0).await);

        broker.close_connection(CloseNotice::Error("connection reset".into()));
        assert!(broker.wait_for(DEADLINE, |b| b.consume_count() == 2).await);
        for i in 10..20u8 {
            broker.publish(vec![i]);
        }
        assert!(broker.wait_for(DEADLINE, |b| b.pending() == 0).await);

        consumer.stop().await;

        let mut tags: Vec<u64> = broker.acks();
        tags.extend(broker.rejects().into_iter().map(|(tag, _)| tag));
        let total = tags.len();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), total);
        assert_eq!(total, 20);
    }
}
