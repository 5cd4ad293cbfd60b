//! Core primitives for the pubflow publication-automation system.
//!
//! Everything here is consumed by more than one process: the frozen
//! [`Settings`](settings::Settings) record, article identity parsing, the
//! per-run [`session`] store, the [`monitor`] event sink, and the
//! [`queue`] abstraction the S3 router and starters communicate over.

pub mod identity;
pub mod monitor;
pub mod queue;
pub mod session;
pub mod settings;

pub use identity::{ArticleIdentity, ArticleKind};
pub use monitor::{Monitor, MonitorEvent, MonitorSink, Phase};
pub use queue::{MessageQueue, QueueMessage};
pub use session::{Session, SessionStore};
pub use settings::Settings;
