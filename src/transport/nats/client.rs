//! NATS transport — connect, publish, callback subscriptions, request/reply

use super::config::NatsConfig;
use crate::error::{EventError, Result};
use crate::transport::{Callback, RawMessage, SubscriptionId, Transport};
use async_nats::RequestErrorKind;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// `Transport` backed by an `async-nats` client
///
/// Each subscription runs its own delivery task; callbacks for that
/// subscription are awaited one at a time, so per-subject ordering holds.
pub struct NatsTransport {
    /// NATS client connection
    client: async_nats::Client,

    /// Delivery tasks by subscription id; aborting one drops its
    /// `Subscriber`, which unsubscribes on the server
    tasks: Mutex<HashMap<SubscriptionId, JoinHandle<()>>>,

    next_id: AtomicU64,

    config: Arc<NatsConfig>,
}

impl NatsTransport {
    /// Connect to the configured server
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let connect_opts = build_connect_options(&config);

        let client = connect_opts
            .connect(&config.url)
            .await
            .map_err(|e| EventError::Connection(format!("{}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, "Connected to NATS");

        Ok(Self::from_client(client, config))
    }

    /// Wrap an already connected client
    pub fn from_client(client: async_nats::Client, config: NatsConfig) -> Self {
        Self {
            client,
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config: Arc::new(config),
        }
    }

    /// Get the underlying NATS client
    pub fn nats_client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Get the configuration
    pub fn config(&self) -> &NatsConfig {
        &self.config
    }

    fn spawn_delivery(
        &self,
        subscriber: async_nats::Subscriber,
        subject: &str,
        callback: Callback,
    ) -> Result<SubscriptionId> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let handle = tokio::spawn(run_delivery(subscriber, subject.to_string(), callback));

        self.tasks
            .lock()
            .map_err(|e| EventError::Connection(format!("subscription table poisoned: {}", e)))?
            .insert(id, handle);

        Ok(id)
    }
}

/// Feed every message of one subscription through its callback
async fn run_delivery(mut subscriber: async_nats::Subscriber, subject: String, callback: Callback) {
    while let Some(msg) = subscriber.next().await {
        let raw = RawMessage::new(msg.subject.to_string(), msg.payload)
            .with_reply(msg.reply.map(|r| r.to_string()));

        if let Err(e) = callback(raw).await {
            tracing::error!(subject = %subject, error = %e, "Delivery failed");
        }
    }

    tracing::debug!(subject = %subject, "Subscription closed");
}

#[async_trait]
impl Transport for NatsTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| EventError::Send {
                subject: subject.to_string(),
                reason: e.to_string(),
            })
    }

    async fn subscribe(&self, subject: &str, callback: Callback) -> Result<SubscriptionId> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| EventError::Subscribe {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;

        let id = self.spawn_delivery(subscriber, subject, callback)?;
        tracing::info!(subject = %subject, id = %id, "Subscription created");
        Ok(id)
    }

    async fn queue_subscribe(
        &self,
        subject: &str,
        group: &str,
        callback: Callback,
    ) -> Result<SubscriptionId> {
        let subscriber = self
            .client
            .queue_subscribe(subject.to_string(), group.to_string())
            .await
            .map_err(|e| EventError::Subscribe {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;

        let id = self.spawn_delivery(subscriber, subject, callback)?;
        tracing::info!(subject = %subject, group = %group, id = %id, "Queue subscription created");
        Ok(id)
    }

    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<RawMessage> {
        let reply = tokio::time::timeout(timeout, self.client.request(subject.to_string(), payload))
            .await
            .map_err(|_| {
                EventError::Timeout(format!("no reply on '{}' within {:?}", subject, timeout))
            })?
            .map_err(|e| match e.kind() {
                RequestErrorKind::TimedOut => {
                    EventError::Timeout(format!("no reply on '{}': {}", subject, e))
                }
                RequestErrorKind::NoResponders => EventError::Send {
                    subject: subject.to_string(),
                    reason: "no responders".to_string(),
                },
                _ => EventError::Send {
                    subject: subject.to_string(),
                    reason: e.to_string(),
                },
            })?;

        Ok(RawMessage::new(reply.subject.to_string(), reply.payload)
            .with_reply(reply.reply.map(|r| r.to_string())))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let handle = self
            .tasks
            .lock()
            .map_err(|e| EventError::Connection(format!("subscription table poisoned: {}", e)))?
            .remove(&id);

        match handle {
            Some(handle) => {
                handle.abort();
                tracing::info!(id = %id, "Subscription removed");
            }
            None => tracing::warn!(id = %id, "Unsubscribe for unknown subscription"),
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|e| EventError::Connection(format!("flush failed: {}", e)))?;

        let handles: Vec<_> = self
            .tasks
            .lock()
            .map_err(|e| EventError::Connection(format!("subscription table poisoned: {}", e)))?
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in handles {
            handle.abort();
        }

        tracing::info!(url = %self.config.url, "NATS transport closed");
        Ok(())
    }

    fn name(&self) -> &str {
        "nats"
    }
}

/// Build NATS connect options from config
fn build_connect_options(config: &NatsConfig) -> async_nats::ConnectOptions {
    let mut opts = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)));

    if let Some(ref token) = config.token {
        opts = opts.token(token.clone());
    }

    if let Some(ref name) = config.name {
        opts = opts.name(name);
    }

    opts
}
