//! Reference tunnel transport between gateways and the relay
//!
//! A gateway opens one outbound WebSocket to the relay's `/connect` endpoint
//! and announces itself with the `X-Proxy-Tunnel-ID` header. The relay then
//! opens logical streams ("dials") through that connection; each WebSocket
//! binary message carries one [`portexporter_proto::Frame`].
//!
//! - [`TunnelSession`]: frame multiplexer over one WebSocket, either side
//! - [`TunnelRegistry`]: identity to live session map on the relay
//! - [`relay::accept_registration`]: `/connect` upgrade handling
//! - [`client::run`]: gateway connect loop with reconnect backoff

pub mod client;
pub mod dialer;
pub mod error;
pub mod registry;
pub mod relay;
pub mod session;

pub use client::{Authorizer, TunnelClientConfig};
pub use dialer::{Dialer, TunnelStream};
pub use error::{DialError, TunnelError};
pub use registry::TunnelRegistry;
pub use session::{IncomingDial, TunnelSession};
