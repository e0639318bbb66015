//! Transport trait — the byte-level bus the connection adapter drives
//!
//! Transports move opaque bytes: `publish`, callback-based `subscribe` and
//! `queue_subscribe`, and one-shot `request`. Decoding and dispatch live
//! above this layer in [`Connection`](crate::connection::Connection).

use crate::error::{EventError, Result};
use crate::types::{AckFn, Format};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub mod memory;
pub mod nats;

/// Per-delivery callback registered with a transport
///
/// An `Err` means the delivery could not be handled; the transport logs it
/// and keeps the subscription alive.
pub type Callback = Arc<dyn Fn(RawMessage) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Transport-assigned subscription handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// One inbound delivery as the transport saw it
#[derive(Clone)]
pub struct RawMessage {
    /// Subject the message was published to
    pub subject: String,

    /// Reply subject for request/reply exchanges
    pub reply: Option<String>,

    /// Undecoded body
    pub payload: Bytes,

    acker: Option<AckFn>,
}

impl RawMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            reply: None,
            payload: payload.into(),
            acker: None,
        }
    }

    pub fn with_reply(mut self, reply: Option<String>) -> Self {
        self.reply = reply;
        self
    }

    /// Attach an acknowledgement hook
    pub fn with_acker(mut self, acker: AckFn) -> Self {
        self.acker = Some(acker);
        self
    }

    pub fn acker(&self) -> Option<AckFn> {
        self.acker.clone()
    }

    /// Body as UTF-8 text
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload).map_err(|e| EventError::Decode {
            format: "utf-8".to_string(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Debug for RawMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawMessage")
            .field("subject", &self.subject)
            .field("reply", &self.reply)
            .field("payload_len", &self.payload.len())
            .field("ackable", &self.acker.is_some())
            .finish()
    }
}

/// Byte-oriented message bus
///
/// Implementations own connection handling, reconnects, and their own
/// delivery loop; callbacks for one subscription run sequentially.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `payload` to `subject`
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    /// Register `callback` for every message on `subject`
    async fn subscribe(&self, subject: &str, callback: Callback) -> Result<SubscriptionId>;

    /// Register `callback` as one member of queue `group` on `subject`
    async fn queue_subscribe(
        &self,
        subject: &str,
        group: &str,
        callback: Callback,
    ) -> Result<SubscriptionId>;

    /// Publish and wait up to `timeout` for a single reply
    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<RawMessage>;

    /// Stop deliveries for a subscription
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;

    /// Flush pending writes and stop all subscriptions
    async fn close(&self) -> Result<()>;

    /// Wire format of inbound deliveries
    fn format(&self) -> Format {
        Format::Json
    }

    /// Transport name (e.g., "nats", "memory")
    fn name(&self) -> &str;
}

/// Whether a NATS subject `pattern` matches `subject`
///
/// `*` matches exactly one token, a trailing `>` matches one or more.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return pattern_tokens.next().is_none(),
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
