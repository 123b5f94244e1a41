//! Built-in message handlers.

use contracts::{HandlerError, MessageHandler};
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tokio::sync::Mutex;
use tracing::info;

/// Bytes of the body shown by [`LogHandler`]
const DEFAULT_PREVIEW_LEN: usize = 128;

/// Logs a preview of every body and acks
#[derive(Debug, Clone)]
pub struct LogHandler {
    preview_len: usize,
}

impl Default for LogHandler {
    fn default() -> Self {
        Self {
            preview_len: DEFAULT_PREVIEW_LEN,
        }
    }
}

impl MessageHandler for LogHandler {
    async fn handle(&self, body: &[u8]) -> Result<(), HandlerError> {
        info!(
            bytes = body.len(),
            body = %preview(body, self.preview_len),
            "Message received"
        );
        Ok(())
    }
}

/// Writes every body as one line; a failed write rejects the delivery
pub struct LineHandler<W> {
    out: Mutex<W>,
}

impl LineHandler<Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> LineHandler<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W> MessageHandler for LineHandler<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn handle(&self, body: &[u8]) -> Result<(), HandlerError> {
        let mut out = self.out.lock().await;
        out.write_all(body)
            .await
            .map_err(|e| HandlerError::with_source("write failed", e))?;
        out.write_all(b"\n")
            .await
            .map_err(|e| HandlerError::with_source("write failed", e))?;
        out.flush()
            .await
            .map_err(|e| HandlerError::with_source("flush failed", e))
    }
}

/// Lossy UTF-8 preview of at most `max` bytes
fn preview(body: &[u8], max: usize) -> String {
    if body.len() <= max {
        String::from_utf8_lossy(body).into_owned()
    } else {
        format!("{}...", String::from_utf8_lossy(&body[..max]))
    }
}
