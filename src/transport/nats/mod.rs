//! NATS transport
//!
//! Implements `Transport` on top of `async-nats` core pub/sub with
//! at-most-once delivery and inbox-based request/reply.

mod client;
mod config;

pub use client::NatsTransport;
pub use config::NatsConfig;
