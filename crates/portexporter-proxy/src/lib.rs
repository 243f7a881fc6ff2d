//! Relay: accepts tunnel registrations and dispatches inbound HTTP(S)
//! requests through the matching gateway's tunnel
//!
//! Requests arrive in proxy form. A plain origin-form request is only
//! accepted on `/connect`, where gateways register. Everything else names
//! its target host, whose hostname selects the tunnel:
//!
//! - `CONNECT host:port` dials the target, answers 200, then pipes raw bytes
//! - any other method is replayed over a dialed stream as HTTP/1.1

pub mod dispatcher;
pub mod error;
pub mod hijack;
pub mod identity;
pub mod pipe;
pub mod server;

pub use dispatcher::{Dispatcher, ProxyBody};
pub use error::{DispatchError, ProxyServerError};
pub use identity::identify;
pub use server::ProxyServer;
