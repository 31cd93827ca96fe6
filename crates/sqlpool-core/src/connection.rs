//! Connection and factory traits

use crate::{QueryResult, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Query used by the default `ping` implementation
pub const PING_QUERY: &str = "SELECT 1";

/// A live handle to the backend
///
/// The pool hands a connection to exactly one caller at a time, so
/// implementations never see concurrent calls on the same handle.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "snowflake", "postgresql")
    fn driver_name(&self) -> &str;

    /// Run a query and collect every row it returns
    async fn query(&self, sql: &str) -> Result<QueryResult>;

    /// Run a minimal round trip to check the handle is alive
    async fn ping(&self) -> Result<()> {
        tracing::trace!(driver = %self.driver_name(), "pinging connection");
        self.query(PING_QUERY).await.map(|_| ())
    }

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;
}

/// Opens new backend connections for a target
///
/// A target names the logical resource a pool serves, such as a warehouse
/// database.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Open a new connection to `target`
    async fn connect(&self, target: &str) -> Result<Box<dyn Connection>>;
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    async fn connect(&self, target: &str) -> Result<Box<dyn Connection>> {
        (**self).connect(target).await
    }
}
