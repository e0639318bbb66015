//! Connection adapter — typed publish/subscribe over a byte transport
//!
//! Outbound events are normalized and encoded as JSON envelopes. Inbound
//! deliveries run through one pipeline per subscription: decode the wire
//! format the transport reports, convert into the subscriber's event type,
//! acknowledge according to its [`AckMode`], and hand it to `handle`.
//! Decode failures go to the subscriber's own [`ErrorHandler`] or the
//! connection default, which rethrows.

use crate::codec::Serializer;
use crate::error::{EventError, Result};
use crate::registry::{MessageRegistry, TypeInitializer};
use crate::response::{response_channel, ResponseHandlerWrapper};
use crate::subscriber::{Delivery, ErrorHandler, FromPayload, Rethrow, Subscriber};
use crate::transport::{Callback, RawMessage, SubscriptionId, Transport};
use crate::types::{AckMode, Event, Format, Message};
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Connection adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    /// How long `request` waits for a reply
    pub request_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
        }
    }
}

/// Typed pub/sub over any [`Transport`]
pub struct Connection {
    transport: Arc<dyn Transport>,
    serializer: Arc<Serializer>,
    config: ConnectionConfig,
    initializer: Arc<TypeInitializer>,
    default_handler: Arc<dyn ErrorHandler>,
}

impl Connection {
    pub fn new(transport: Arc<dyn Transport>, config: ConnectionConfig) -> Self {
        Self {
            transport,
            serializer: Arc::new(Serializer::new()),
            config,
            initializer: Arc::new(TypeInitializer::default()),
            default_handler: Arc::new(Rethrow),
        }
    }

    /// Use `registry` for auxiliary message types declared by subscribers
    pub fn with_registry(mut self, registry: impl MessageRegistry + 'static) -> Self {
        self.initializer = Arc::new(TypeInitializer::new(registry));
        self
    }

    /// Replace the default decode-failure handler
    pub fn with_error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.default_handler = Arc::new(handler);
        self
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Publish `event` on `channel`, or on its event type when `None`
    pub async fn publish<E>(&self, event: &E, channel: Option<&str>) -> Result<()>
    where
        E: Event + Sync + ?Sized,
    {
        let channel = channel.unwrap_or_else(|| event.event_type());
        let body = self.encode(event)?;

        self.transport.publish(channel, body).await?;

        tracing::debug!(
            subject = %channel,
            event_id = %event.event_id(),
            event_type = %event.event_type(),
            "Event published"
        );
        Ok(())
    }

    /// Dispatch every event on `channel` to `subscriber`
    pub async fn subscribe<S: Subscriber>(&self, channel: &str, subscriber: S) -> Result<SubscriptionId> {
        self.initialize_uses(&subscriber)?;
        let callback = self.dispatcher(subscriber).into_callback();
        let id = self.transport.subscribe(channel, callback).await?;

        tracing::info!(subject = %channel, id = %id, transport = self.transport.name(), "Subscribed");
        Ok(id)
    }

    /// Dispatch to `subscriber` as one member of queue `group`
    pub async fn group_subscribe<S: Subscriber>(
        &self,
        channel: &str,
        group: &str,
        subscriber: S,
    ) -> Result<SubscriptionId> {
        self.initialize_uses(&subscriber)?;
        let callback = self.dispatcher(subscriber).into_callback();
        let id = self.transport.queue_subscribe(channel, group, callback).await?;

        tracing::info!(subject = %channel, group = %group, id = %id, "Group subscribed");
        Ok(id)
    }

    /// Send `event` on its event type and dispatch the reply to `handler`
    ///
    /// Only a reply carrying `response.{eventId}` reaches the handler. A
    /// request the transport cannot complete (no responders, timeout)
    /// fails with `RequestFailed`.
    pub async fn request<E, S>(&self, event: &E, handler: S) -> Result<()>
    where
        E: Event + Sync + ?Sized,
        S: Subscriber,
        S::Event: Event,
    {
        self.initialize_uses(&handler)?;
        let body = self.encode(event)?;
        let timeout = Duration::from_secs(self.config.request_timeout_secs);

        let reply = self
            .transport
            .request(event.event_type(), body, timeout)
            .await
            .map_err(|e| {
                tracing::warn!(
                    subject = %event.event_type(),
                    event_id = %event.event_id(),
                    error = %e,
                    "Request failed"
                );
                EventError::RequestFailed {
                    request: Box::new(event.to_payload()),
                    reason: e.to_string(),
                }
            })?;

        self.dispatcher(ResponseHandlerWrapper::new(handler, event))
            .dispatch(reply)
            .await
    }

    /// Subscribe `handler` to the response channel of `request`
    ///
    /// For responders that publish to the derived channel instead of a
    /// reply subject.
    pub async fn subscribe_responses<E, S>(&self, request: &E, handler: S) -> Result<SubscriptionId>
    where
        E: Event + ?Sized,
        S: Subscriber,
        S::Event: Event,
    {
        let channel = response_channel(request);
        self.subscribe(&channel, ResponseHandlerWrapper::new(handler, request))
            .await
    }

    /// Answer `request`, received through `delivery`, with `response`
    ///
    /// Goes to the delivery's reply subject when there is one, otherwise
    /// to the request's response channel.
    pub async fn respond<Req, Resp>(&self, delivery: &Delivery, request: &Req, response: &Resp) -> Result<()>
    where
        Req: Event + ?Sized,
        Resp: Event + Sync + ?Sized,
    {
        let channel = match delivery.reply() {
            Some(reply) => reply.to_string(),
            None => response_channel(request),
        };
        self.publish(response, Some(&channel)).await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.transport.unsubscribe(id).await
    }

    /// Flush the transport and stop every subscription
    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }

    /// Register the auxiliary types `subscriber` declares, once each
    pub fn initialize_uses<S: Subscriber>(&self, subscriber: &S) -> Result<usize> {
        self.initializer.initialize_uses(subscriber.uses())
    }

    fn encode<E: Event + ?Sized>(&self, event: &E) -> Result<Bytes> {
        self.serializer
            .serialize(event)
            .map(Bytes::from)
            .map_err(|e| EventError::InvalidEvent {
                event_type: event.event_type().to_string(),
                event_id: event.event_id().to_string(),
                reason: e.to_string(),
            })
    }

    fn dispatcher<S: Subscriber>(&self, subscriber: S) -> Arc<Dispatcher<S>> {
        Arc::new(Dispatcher {
            subscriber,
            serializer: self.serializer.clone(),
            default_handler: self.default_handler.clone(),
            format: self.transport.format(),
        })
    }
}

/// Decode-and-dispatch pipeline of one subscription
struct Dispatcher<S> {
    subscriber: S,
    serializer: Arc<Serializer>,
    default_handler: Arc<dyn ErrorHandler>,
    format: Format,
}

impl<S: Subscriber> Dispatcher<S> {
    fn into_callback(self: Arc<Self>) -> Callback {
        Arc::new(move |raw: RawMessage| -> BoxFuture<'static, Result<()>> {
            let dispatcher = self.clone();
            Box::pin(async move { dispatcher.dispatch(raw).await })
        })
    }

    async fn dispatch(&self, raw: RawMessage) -> Result<()> {
        let (event, message) = match self.decode(&raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(subject = %raw.subject, error = %e, "Undecodable delivery");
                return match self.subscriber.error_handler() {
                    Some(handler) => handler.handle_error(e, &raw).await,
                    None => self.default_handler.handle_error(e, &raw).await,
                };
            }
        };

        let delivery = Delivery::new(&raw, message);
        let ack_mode = self.subscriber.ack_mode();

        if ack_mode == AckMode::Before {
            delivery.ack().await?;
        }

        self.subscriber.handle(event, &delivery).await?;

        if ack_mode == AckMode::After {
            delivery.ack().await?;
        }

        tracing::debug!(subject = %delivery.subject(), sequence = ?delivery.sequence(), "Delivery handled");
        Ok(())
    }

    fn decode(&self, raw: &RawMessage) -> Result<(S::Event, Option<Message>)> {
        let text = raw.text()?;

        match self.format {
            Format::Json => {
                let payload = self.serializer.deserialize_payload(text, Format::Json)?;
                Ok((S::Event::from_payload(payload)?, None))
            }
            Format::Streaming => {
                let message = self
                    .serializer
                    .deserialize_message(text)?
                    .with_acker(raw.acker());
                let payload = self
                    .serializer
                    .deserialize_payload(message.data(), Format::Json)?;
                Ok((S::Event::from_payload(payload)?, Some(message)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::PayloadBuilder;
    use crate::registry::MemoryMessageRegistry;
    use crate::transport::memory::MemoryTransport;
    use crate::types::Payload;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect {
        events: Arc<Mutex<Vec<Payload>>>,
        uses: Vec<String>,
    }

    #[async_trait]
    impl Subscriber for Collect {
        type Event = Payload;

        async fn handle(&self, event: Payload, _delivery: &Delivery) -> Result<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }

        fn uses(&self) -> Vec<String> {
            self.uses.clone()
        }
    }

    fn connection(transport: Arc<MemoryTransport>) -> Connection {
        Connection::new(transport, ConnectionConfig::default())
    }

    fn event(event_type: &str) -> Payload {
        PayloadBuilder::with_defaults("tests")
            .event_type(event_type)
            .data(serde_json::json!({"n": 1}))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_publish_defaults_to_event_type_channel() {
        let transport = Arc::new(MemoryTransport::default());
        let conn = connection(transport.clone());
        let sub = Collect::default();
        let events = sub.events.clone();

        conn.subscribe("io.example.created", sub).await.unwrap();
        conn.publish(&event("io.example.created"), None).await.unwrap();
        conn.publish(&event("io.example.other"), None).await.unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "io.example.created");
    }

    #[tokio::test]
    async fn test_publish_explicit_channel() {
        let transport = Arc::new(MemoryTransport::default());
        let conn = connection(transport);
        let sub = Collect::default();
        let events = sub.events.clone();

        conn.subscribe("custom", sub).await.unwrap();
        conn.publish(&event("io.example.created"), Some("custom")).await.unwrap();

        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_invalid_event_sends_nothing() {
        let transport = Arc::new(MemoryTransport::default());
        let conn = connection(transport.clone());
        let sub = Collect::default();
        let events = sub.events.clone();
        conn.subscribe(">", sub).await.unwrap();

        let invalid = Payload::new("io.example.created", "0.1", "", "1");
        let err = conn.publish(&invalid, None).await.unwrap_err();

        assert!(matches!(err, EventError::InvalidEvent { ref event_id, .. } if event_id == "1"));
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_initializes_uses_once() {
        let registry = Arc::new(MemoryMessageRegistry::new());
        let conn = connection(Arc::new(MemoryTransport::default())).with_registry(registry.clone());

        for _ in 0..2 {
            let sub = Collect {
                uses: vec!["app.Detail".to_string(), "app.Money".to_string()],
                ..Default::default()
            };
            conn.subscribe("a", sub).await.unwrap();
        }

        assert_eq!(registry.calls(), vec!["app.Detail", "app.Money"]);
    }

    #[tokio::test]
    async fn test_subscribe_with_unknown_use_fails() {
        let conn = connection(Arc::new(MemoryTransport::default()))
            .with_registry(MemoryMessageRegistry::with_known(["app.Known"]));
        let sub = Collect {
            uses: vec!["app.Unknown".to_string()],
            ..Default::default()
        };

        let err = conn.subscribe("a", sub).await.unwrap_err();
        assert!(matches!(err, EventError::InvalidType(_)));
        assert_eq!(conn.transport().name(), "memory");
    }

    #[tokio::test]
    async fn test_decode_failure_rethrown_by_default() {
        let transport = Arc::new(MemoryTransport::default());
        let conn = connection(transport.clone());
        conn.subscribe("a", Collect::default()).await.unwrap();

        transport.publish("a", Bytes::from_static(b"not json")).await.unwrap();

        assert_eq!(transport.delivery_errors().len(), 1);
        assert!(transport.acks().is_empty());
    }

    #[test]
    fn test_connection_config_default() {
        let config: ConnectionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.request_timeout_secs, 10);

        let config: ConnectionConfig = serde_json::from_str(r#"{"requestTimeoutSecs": 2}"#).unwrap();
        assert_eq!(config.request_timeout_secs, 2);
    }
}
