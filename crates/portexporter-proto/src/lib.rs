//! Tunnel protocol definitions
//!
//! Constants shared by the relay and the gateway, plus the frame format used
//! to multiplex dialed streams over a single tunnel connection.

pub mod frame;

pub use frame::{DialRequest, Frame, FrameError, FrameType, StreamId};

/// Header carrying the identity a gateway asserts when it registers a tunnel
pub const TUNNEL_ID_HEADER: &str = "X-Proxy-Tunnel-ID";

/// Path on the relay that accepts tunnel registrations
pub const CONNECT_PATH: &str = "/connect";

/// The only network a tunnel is allowed to dial
pub const NETWORK_TCP: &str = "tcp";

/// Largest payload carried by a single data frame (32KB)
pub const MAX_DATA_PAYLOAD: usize = 32 * 1024;

/// Bytes a sender may have in flight on one stream before the receiver
/// releases credit with a window update (256KB)
pub const STREAM_WINDOW: u32 = 256 * 1024;
