//! # HTTP Gateway
//!
//! Exposes the research service over HTTP: a fire-and-forget create endpoint
//! backed by background runs, a synchronous invocation endpoint, and status
//! lookups for background runs.

mod server;

pub use server::{GatewayState, RunStatus, router, run_gateway};

use serde::{Deserialize, Serialize};

/// Configuration for the HTTP gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Seconds a finished background run stays queryable.
    pub run_retention_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            run_retention_secs: 3600,
        }
    }
}

impl GatewayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn run_retention(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.run_retention_secs)
    }
}
