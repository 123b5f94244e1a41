//! # Contracts
//!
//! Frozen interface contracts shared by every crate in the workspace.
//! Business crates may only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Ownership Model
//! - `ConsumerConfig` is immutable once a consumer is constructed
//! - `ReconnectState` is written by the reconnect supervisor only
//! - Close notifications yield at most one value before closing

mod config;
mod error;
mod handler;
mod notify;
mod state;

pub use config::*;
pub use error::*;
pub use handler::{HandlerError, HandlerFn, LocalMessageHandler, MessageHandler};
pub use notify::{close_notification, CloseNotice, CloseNotifications, CloseNotifier};
pub use state::ReconnectState;
