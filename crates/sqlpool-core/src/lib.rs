//! sqlpool core - backend abstractions shared by the pooling crates
//!
//! This crate defines the seam between the pool and a concrete warehouse
//! client:
//!
//! - `Connection` - one live handle to the backend
//! - `ConnectionFactory` - opens handles for a target
//! - `DriverError` - the raw failure a backend reports
//! - Result types like `Value`, `Row` and `QueryResult`

mod connection;
mod error;
mod types;

pub use connection::*;
pub use error::*;
pub use types::*;
