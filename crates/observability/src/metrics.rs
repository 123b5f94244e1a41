//! 消费者指标记录模块
//!
//! 通过 `metrics` facade 记录，未安装 recorder 时为空操作。

use contracts::ReconnectState;
use metrics::{counter, gauge, histogram};

/// 投递的确认结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// handler 成功，已 ack
    Acked,
    /// handler 失败，已 reject(requeue=true)
    Rejected,
    /// ack/reject 本身失败
    AckFailed,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acked => "acked",
            Self::Rejected => "rejected",
            Self::AckFailed => "ack_failed",
        }
    }
}

/// 一次重连尝试的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectResult {
    Success,
    Failure,
}

impl ReconnectResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// 记录一次投递结果
pub fn record_delivery_outcome(queue: &str, outcome: DeliveryOutcome) {
    counter!(
        "mq_consumer_deliveries_total",
        "queue" => queue.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// 记录 handler 耗时
pub fn record_handler_latency_ms(queue: &str, latency_ms: f64) {
    histogram!(
        "mq_consumer_handler_latency_ms",
        "queue" => queue.to_string()
    )
    .record(latency_ms);
}

/// 记录重连尝试
pub fn record_reconnect_attempt(queue: &str, result: ReconnectResult) {
    counter!(
        "mq_consumer_reconnect_attempts_total",
        "queue" => queue.to_string(),
        "result" => result.as_str()
    )
    .increment(1);
}

/// 记录当前状态 (0 = connected, 1 = reconnecting, 2 = stopped)
pub fn record_state(queue: &str, state: ReconnectState) {
    let value = match state {
        ReconnectState::Connected => 0.0,
        ReconnectState::Reconnecting => 1.0,
        ReconnectState::Stopped => 2.0,
    };
    gauge!("mq_consumer_state", "queue" => queue.to_string()).set(value);
}

/// 记录 teardown 中被吞掉的错误数
pub fn record_teardown_failures(queue: &str, failures: usize) {
    if failures > 0 {
        counter!(
            "mq_consumer_teardown_failures_total",
            "queue" => queue.to_string()
        )
        .increment(failures as u64);
    }
}
