//! NATS connection configuration

use serde::{Deserialize, Serialize};

/// Connection settings for [`NatsTransport`](super::NatsTransport)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NatsConfig {
    /// Server URL (e.g., `nats://127.0.0.1:4222`)
    pub url: String,

    /// Client name reported to the server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Authentication token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,

    /// Server-side request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            name: None,
            token: None,
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
        }
    }
}
