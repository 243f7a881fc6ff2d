//! Hot-reloading reverse proxy
//!
//! Requests to `/{scheme}/{host}/{path}` are forwarded to the backend
//! registered as `scheme://host`. Each backend may carry a bearer token
//! file and TLS client settings. Edits to those files rebuild the backend's
//! handler without interrupting requests already in flight.

pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;
pub mod table;
pub mod watcher;

pub use config::{RedirectConfig, RedirectEntry, DEFAULT_CONFIG_FILE};
pub use error::RedirectError;
pub use handler::RedirectHandler;
pub use router::router;
pub use server::RedirectServer;
pub use table::RedirectTable;
