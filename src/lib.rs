//! # nats-cloudevents
//!
//! CloudEvents payload codec and typed subscriber dispatch over NATS and
//! NATS Streaming.
//!
//! ## Overview
//!
//! `nats-cloudevents` turns domain events into CloudEvents JSON envelopes,
//! decodes them back (directly, or from the `key: value` line records
//! NATS Streaming wraps them in), and routes inbound deliveries to typed
//! subscribers with pluggable error handling and acknowledgement.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use nats_cloudevents::{
//!     Connection, ConnectionConfig, Delivery, Event, MemoryTransport, Payload,
//!     PayloadBuilder, Subscriber,
//! };
//!
//! struct Audit;
//!
//! #[async_trait]
//! impl Subscriber for Audit {
//!     type Event = Payload;
//!
//!     async fn handle(&self, event: Payload, _delivery: &Delivery) -> nats_cloudevents::Result<()> {
//!         println!("{} from {}", event.event_type(), event.source());
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> nats_cloudevents::Result<()> {
//! let conn = Connection::new(Arc::new(MemoryTransport::default()), ConnectionConfig::default());
//! conn.subscribe("io.example.order.placed", Audit).await?;
//!
//! let event = PayloadBuilder::with_defaults("shop")
//!     .event_type("io.example.order.placed")
//!     .data(serde_json::json!({"orderId": 42}))
//!     .build()?;
//! conn.publish(&event, None).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Transports
//!
//! - **memory** — In-process bus for testing, optionally streaming-framed
//! - **nats** — Core NATS via `async-nats`
//!
//! ## Architecture
//!
//! - **Event** trait / **Payload** — the CloudEvents envelope
//! - **codec** — decoder, denormalizer, normalizer, encoder per wire format
//! - **Transport** trait — byte-level publish/subscribe/request
//! - **Connection** — typed publish and the inbound dispatch pipeline
//! - **Subscriber** trait — typed handlers with ack mode and error handler

pub mod builder;
pub mod codec;
pub mod connection;
pub mod error;
pub mod registry;
pub mod response;
pub mod schema;
pub mod subscriber;
pub mod transport;
pub mod types;

// Re-export core types
pub use builder::PayloadBuilder;
pub use codec::{Deserialized, Serializer};
pub use connection::{Connection, ConnectionConfig};
pub use error::{EventError, Result};
pub use registry::{MemoryMessageRegistry, MessageRegistry, TypeInitializer};
pub use response::{response_channel, response_event_type, ResponseHandlerWrapper};
pub use schema::FieldSchema;
pub use subscriber::{Delivery, ErrorHandler, FromPayload, Rethrow, Subscriber, TypedEvent};
pub use transport::{Callback, RawMessage, SubscriptionId, Transport};
pub use types::{AckMode, Event, Format, Message, MessageKind, Payload};

// Re-export transports for convenience
pub use transport::memory::{MemoryConfig, MemoryTransport};
pub use transport::nats::{NatsConfig, NatsTransport};
