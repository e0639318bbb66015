//! In-memory transport for testing and single-process use
//!
//! Deliveries run inline inside `publish`, in subscription order, so tests
//! observe handler effects as soon as `publish` returns. Queue groups pick
//! members round-robin. In streaming mode every delivery is framed as a
//! NATS-Streaming line record with a sequence and nanosecond timestamp.

use super::{subject_matches, Callback, RawMessage, SubscriptionId, Transport};
use crate::codec::{Encoder, MessageEncoder, MessageNormalizer, Normalizer};
use crate::error::{EventError, Result};
use crate::types::{AckFn, Format, Message};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// Configuration for the in-memory transport
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Wire format handed to subscribers
    pub format: Format,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            format: Format::Json,
        }
    }
}

struct Registration {
    subject: String,
    group: Option<String>,
    callback: Callback,
}

#[derive(Default)]
struct State {
    subscriptions: BTreeMap<SubscriptionId, Registration>,
    /// (subject pattern, group) → next member index
    group_cursors: HashMap<(String, String), usize>,
}

/// In-process message bus
pub struct MemoryTransport {
    config: MemoryConfig,
    state: Arc<Mutex<State>>,
    next_id: AtomicU64,
    sequence: AtomicU64,
    acks: Arc<Mutex<Vec<u64>>>,
    failures: Arc<Mutex<Vec<String>>>,
}

impl MemoryTransport {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(State::default())),
            next_id: AtomicU64::new(1),
            sequence: AtomicU64::new(0),
            acks: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Transport that frames deliveries as NATS-Streaming line records
    pub fn streaming() -> Self {
        Self::new(MemoryConfig {
            format: Format::Streaming,
        })
    }

    /// Delivery sequence numbers acknowledged so far, in ack order
    pub fn acks(&self) -> Vec<u64> {
        self.acks.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// Errors returned by subscription callbacks
    pub fn delivery_errors(&self) -> Vec<String> {
        self.failures.lock().map(|f| f.clone()).unwrap_or_default()
    }

    /// Number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.state.lock().map(|s| s.subscriptions.len()).unwrap_or(0)
    }

    fn register(&self, subject: &str, group: Option<&str>, callback: Callback) -> Result<SubscriptionId> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut state = self.lock_state()?;
        state.subscriptions.insert(
            id,
            Registration {
                subject: subject.to_string(),
                group: group.map(str::to_string),
                callback,
            },
        );
        Ok(id)
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| EventError::Connection(format!("memory transport lock poisoned: {}", e)))
    }

    /// Pick every plain subscriber plus one member per queue group
    fn targets(&self, subject: &str) -> Result<Vec<Callback>> {
        let mut state = self.lock_state()?;
        let mut targets = Vec::new();
        let mut groups: BTreeMap<(String, String), Vec<Callback>> = BTreeMap::new();

        for reg in state.subscriptions.values() {
            if !subject_matches(&reg.subject, subject) {
                continue;
            }
            match &reg.group {
                None => targets.push(reg.callback.clone()),
                Some(group) => groups
                    .entry((reg.subject.clone(), group.clone()))
                    .or_default()
                    .push(reg.callback.clone()),
            }
        }

        for (key, members) in groups {
            let cursor = state.group_cursors.entry(key).or_insert(0);
            targets.push(members[*cursor % members.len()].clone());
            *cursor = cursor.wrapping_add(1);
        }

        Ok(targets)
    }

    fn frame(&self, subject: &str, reply: Option<String>, payload: Bytes) -> Result<RawMessage> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        let body = match self.config.format {
            Format::Json => payload,
            Format::Streaming => {
                let text = std::str::from_utf8(&payload).map_err(|e| EventError::Send {
                    subject: subject.to_string(),
                    reason: format!("payload is not UTF-8: {}", e),
                })?;
                let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
                let record = Message::new(sequence, subject, text, timestamp);
                let fields = MessageNormalizer.normalize(&record)?;
                Bytes::from(MessageEncoder.encode(&fields, Format::Streaming)?)
            }
        };

        let acks = self.acks.clone();
        let acker: AckFn = Arc::new(move || -> BoxFuture<'static, Result<()>> {
            let acks = acks.clone();
            Box::pin(async move {
                acks.lock()
                    .map_err(|e| EventError::Ack(e.to_string()))?
                    .push(sequence);
                Ok(())
            })
        });

        Ok(RawMessage::new(subject, body)
            .with_reply(reply)
            .with_acker(acker))
    }

    /// Deliver to matching subscribers; returns how many were targeted
    async fn deliver(&self, subject: &str, reply: Option<String>, payload: Bytes) -> Result<usize> {
        let targets = self.targets(subject)?;
        if targets.is_empty() {
            return Ok(0);
        }

        let message = self.frame(subject, reply, payload)?;
        for callback in &targets {
            if let Err(e) = callback(message.clone()).await {
                tracing::error!(subject = %subject, error = %e, "Delivery failed");
                if let Ok(mut failures) = self.failures.lock() {
                    failures.push(e.to_string());
                }
            }
        }

        Ok(targets.len())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        let delivered = self.deliver(subject, None, payload).await?;
        tracing::debug!(subject = %subject, delivered, "Published");
        Ok(())
    }

    async fn subscribe(&self, subject: &str, callback: Callback) -> Result<SubscriptionId> {
        self.register(subject, None, callback)
    }

    async fn queue_subscribe(
        &self,
        subject: &str,
        group: &str,
        callback: Callback,
    ) -> Result<SubscriptionId> {
        self.register(subject, Some(group), callback)
    }

    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<RawMessage> {
        let inbox = format!("_INBOX.{}", uuid::Uuid::new_v4().simple());
        let (tx, rx) = oneshot::channel::<RawMessage>();
        let tx = Arc::new(Mutex::new(Some(tx)));

        let reply_cb: Callback = Arc::new(move |msg: RawMessage| -> BoxFuture<'static, Result<()>> {
            let tx = tx.clone();
            Box::pin(async move {
                if let Some(tx) = tx.lock().ok().and_then(|mut slot| slot.take()) {
                    let _ = tx.send(msg);
                }
                Ok(())
            })
        });
        let inbox_id = self.register(&inbox, None, reply_cb)?;

        let delivered = match self.deliver(subject, Some(inbox.clone()), payload).await {
            Ok(n) => n,
            Err(e) => {
                self.unsubscribe(inbox_id).await?;
                return Err(e);
            }
        };
        if delivered == 0 {
            self.unsubscribe(inbox_id).await?;
            return Err(EventError::Send {
                subject: subject.to_string(),
                reason: "no responders".to_string(),
            });
        }

        let reply = tokio::time::timeout(timeout, rx).await;
        self.unsubscribe(inbox_id).await?;

        match reply {
            Ok(Ok(msg)) => Ok(msg),
            Ok(Err(_)) => Err(EventError::Connection("reply channel closed".to_string())),
            Err(_) => Err(EventError::Timeout(format!(
                "no reply on '{}' within {:?}",
                subject, timeout
            ))),
        }
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.lock_state()?.subscriptions.remove(&id);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.lock_state()?;
        state.subscriptions.clear();
        state.group_cursors.clear();
        Ok(())
    }

    fn format(&self) -> Format {
        self.config.format
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(counter: Arc<AtomicUsize>) -> Callback {
        Arc::new(move |_msg: RawMessage| -> BoxFuture<'static, Result<()>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        })
    }

    fn recording(seen: Arc<Mutex<Vec<RawMessage>>>) -> Callback {
        Arc::new(move |msg: RawMessage| -> BoxFuture<'static, Result<()>> {
            seen.lock().unwrap().push(msg);
            Box::pin(async { Ok(()) })
        })
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscribers() {
        let transport = MemoryTransport::default();
        let hits = Arc::new(AtomicUsize::new(0));

        transport.subscribe("orders.*", counting(hits.clone())).await.unwrap();
        transport.subscribe("orders.placed", counting(hits.clone())).await.unwrap();
        transport.subscribe("users.>", counting(hits.clone())).await.unwrap();

        transport
            .publish("orders.placed", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_queue_group_delivers_to_one_member() {
        let transport = MemoryTransport::default();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));

        transport.queue_subscribe("jobs", "workers", counting(a.clone())).await.unwrap();
        transport.queue_subscribe("jobs", "workers", counting(b.clone())).await.unwrap();

        for _ in 0..4 {
            transport.publish("jobs", Bytes::from_static(b"{}")).await.unwrap();
        }
        assert_eq!(a.load(Ordering::SeqCst), 2);
        assert_eq!(b.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let transport = MemoryTransport::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = transport.subscribe("a", counting(hits.clone())).await.unwrap();

        transport.unsubscribe(id).await.unwrap();
        transport.publish("a", Bytes::from_static(b"{}")).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(transport.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_streaming_framing() {
        let transport = MemoryTransport::streaming();
        let seen = Arc::new(Mutex::new(Vec::new()));
        transport.subscribe("a.b", recording(seen.clone())).await.unwrap();

        transport
            .publish("a.b", Bytes::from_static(br#"{"k":"v"}"#))
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        let text = seen[0].text().unwrap();
        assert!(text.starts_with("sequence: 1\nsubject: \"a.b\"\ndata: \"{\\\"k\\\":\\\"v\\\"}\"\ntimestamp: "));
        assert_eq!(transport.format(), Format::Streaming);
    }

    #[tokio::test]
    async fn test_streaming_framing_keeps_multiline_body() {
        let transport = MemoryTransport::streaming();
        let seen = Arc::new(Mutex::new(Vec::new()));
        transport.subscribe("a.b", recording(seen.clone())).await.unwrap();

        let body = "{\n  \"k\": \"v\"\r\n}";
        transport.publish("a.b", Bytes::from(body)).await.unwrap();

        let text = seen.lock().unwrap()[0].text().unwrap().to_string();
        assert_eq!(text.lines().count(), 4);
        let record = crate::codec::Serializer::new().deserialize_message(&text).unwrap();
        assert_eq!(record.data(), body);
        assert_eq!(record.sequence(), 1);
    }

    #[tokio::test]
    async fn test_ack_records_sequence() {
        let transport = MemoryTransport::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        transport.subscribe("a", recording(seen.clone())).await.unwrap();

        transport.publish("a", Bytes::from_static(b"1")).await.unwrap();
        transport.publish("a", Bytes::from_static(b"2")).await.unwrap();

        let second = seen.lock().unwrap()[1].clone();
        (second.acker().unwrap())().await.unwrap();
        assert_eq!(transport.acks(), vec![2]);
    }

    #[tokio::test]
    async fn test_callback_errors_are_recorded() {
        let transport = MemoryTransport::default();
        let failing: Callback = Arc::new(|_msg: RawMessage| -> BoxFuture<'static, Result<()>> {
            Box::pin(async { Err(EventError::UnknownField("x".to_string())) })
        });
        transport.subscribe("a", failing).await.unwrap();

        transport.publish("a", Bytes::from_static(b"{}")).await.unwrap();
        assert_eq!(transport.delivery_errors().len(), 1);
    }

    #[tokio::test]
    async fn test_request_reply() {
        let transport = Arc::new(MemoryTransport::default());
        let responder = transport.clone();
        let echo: Callback = Arc::new(move |msg: RawMessage| -> BoxFuture<'static, Result<()>> {
            let responder = responder.clone();
            Box::pin(async move {
                let reply = msg.reply.clone().unwrap();
                responder.publish(&reply, msg.payload.clone()).await
            })
        });
        transport.subscribe("echo", echo).await.unwrap();

        let reply = transport
            .request("echo", Bytes::from_static(b"ping"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(&reply.payload[..], b"ping");
        assert!(reply.subject.starts_with("_INBOX."));
        assert_eq!(transport.subscription_count(), 1);
    }

    #[tokio::test]
    async fn test_request_without_responders() {
        let transport = MemoryTransport::default();
        let err = transport
            .request("nobody", Bytes::from_static(b"ping"), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::Send { ref reason, .. } if reason == "no responders"));
        assert_eq!(transport.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let transport = MemoryTransport::default();
        let hits = Arc::new(AtomicUsize::new(0));
        transport.subscribe("silent", counting(hits)).await.unwrap();

        let err = transport
            .request("silent", Bytes::from_static(b"ping"), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::Timeout(_)));
        assert_eq!(transport.subscription_count(), 1);
    }
}
