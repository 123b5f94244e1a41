//! Close notifications
//!
//! One-shot streams reporting the closure of a connection or channel. Each
//! stream yields at most one value and then closes for good.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

/// Why a connection or channel closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseNotice {
    /// Closed without an error
    Normal,
    /// Closed because of a broker or transport error
    Error(String),
}

impl CloseNotice {
    /// Error description, if the closure was abnormal
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Normal => None,
            Self::Error(message) => Some(message),
        }
    }
}

/// Create a connected notifier / notification-stream pair
pub fn close_notification() -> (CloseNotifier, CloseNotifications) {
    let (tx, rx) = mpsc::channel(1);
    (
        CloseNotifier {
            tx: Arc::new(Mutex::new(Some(tx))),
        },
        CloseNotifications { rx },
    )
}

/// Sending half of a close notification
///
/// Cloning shares the same underlying slot, so whichever clone fires first
/// wins and every later call is a no-op.
#[derive(Debug, Clone)]
pub struct CloseNotifier {
    tx: Arc<Mutex<Option<mpsc::Sender<CloseNotice>>>>,
}

impl CloseNotifier {
    /// Deliver a notice and close the stream
    ///
    /// Returns false if the notifier already fired or was closed.
    pub fn notify(&self, notice: CloseNotice) -> bool {
        match self.take() {
            // capacity 1 and a single send, so this only fails if the receiver is gone
            Some(tx) => tx.try_send(notice).is_ok(),
            None => false,
        }
    }

    /// Close the stream without delivering a value
    pub fn close(&self) {
        drop(self.take());
    }

    /// Whether the stream is still open on the sending side
    pub fn is_open(&self) -> bool {
        self.tx.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    fn take(&self) -> Option<mpsc::Sender<CloseNotice>> {
        match self.tx.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// Receiving half of a close notification
#[derive(Debug)]
pub struct CloseNotifications {
    rx: mpsc::Receiver<CloseNotice>,
}

impl CloseNotifications {
    /// Wait until the resource closes
    ///
    /// A stream that closes without a value reports [`CloseNotice::Normal`].
    pub async fn closed(&mut self) -> CloseNotice {
        self.rx.recv().await.unwrap_or(CloseNotice::Normal)
    }

    /// Consume and return every remaining value until the stream closes
    ///
    /// Completes once the notifier fired or was closed, so a discarded
    /// connection or channel is never kept alive by an unread stream.
    pub async fn drain_to_close(&mut self) -> Vec<CloseNotice> {
        let mut drained = Vec::new();
        while let Some(notice) = self.rx.recv().await {
            drained.push(notice);
        }
        drained
    }
}
