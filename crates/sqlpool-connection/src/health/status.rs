//! Health status of a single connection

use serde::{Deserialize, Serialize};

use super::ping::PingResult;

/// Health status of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Not checked since the connection was opened
    #[default]
    Unknown,
    /// The last ping succeeded
    Healthy,
    /// The last ping failed
    Unhealthy,
}

impl HealthStatus {
    /// Classify the outcome of a ping.
    pub fn from_ping(result: &PingResult) -> Self {
        match result {
            Ok(_) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        }
    }

    /// Check if status is healthy.
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Check if the connection may still be handed out.
    ///
    /// `Unknown` counts as usable: fresh connections have not been pinged.
    pub fn is_usable(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }
}
