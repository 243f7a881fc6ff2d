//! Multiplexing frames for the tunnel connection
//!
//! Every WebSocket binary message carries exactly one frame:
//! - 4 bytes: stream ID (big-endian u32)
//! - 1 byte: frame type
//! - Rest: payload

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Stream identifier
pub type StreamId = u32;

/// Frame types for multiplexing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Stream payload bytes
    Data = 0,
    /// Sender will write no more bytes on this stream
    Fin = 1,
    /// Relay asks the gateway to open a connection; payload is a [`DialRequest`]
    Dial = 2,
    /// Gateway connected the requested address
    DialOk = 3,
    /// Gateway refused or failed the dial; payload is the error text
    DialErr = 4,
    /// Stream aborted, both directions are dead
    Reset = 5,
    /// Receiver consumed bytes; payload is the released credit (big-endian u32)
    WindowUpdate = 6,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameType::Data),
            1 => Ok(FrameType::Fin),
            2 => Ok(FrameType::Dial),
            3 => Ok(FrameType::DialOk),
            4 => Ok(FrameType::DialErr),
            5 => Ok(FrameType::Reset),
            6 => Ok(FrameType::WindowUpdate),
            _ => Err(FrameError::InvalidFrameType(value)),
        }
    }
}

/// Frame decoding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Invalid frame type: {0}")]
    InvalidFrameType(u8),

    #[error("Incomplete frame: {0} bytes")]
    IncompleteFrame(usize),

    #[error("Malformed dial request: {0}")]
    MalformedDial(String),

    #[error("Malformed window update: {0} byte payload")]
    MalformedWindowUpdate(usize),
}

/// Multiplexed frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream_id: StreamId,
    pub frame_type: FrameType,
    pub payload: Bytes,
}

impl Frame {
    /// Frame header size: stream_id (4) + frame_type (1) = 5 bytes
    pub const HEADER_SIZE: usize = 5;

    pub fn new(stream_id: StreamId, frame_type: FrameType, payload: Bytes) -> Self {
        Self {
            stream_id,
            frame_type,
            payload,
        }
    }

    pub fn data(stream_id: StreamId, payload: Bytes) -> Self {
        Self::new(stream_id, FrameType::Data, payload)
    }

    pub fn fin(stream_id: StreamId) -> Self {
        Self::new(stream_id, FrameType::Fin, Bytes::new())
    }

    pub fn reset(stream_id: StreamId) -> Self {
        Self::new(stream_id, FrameType::Reset, Bytes::new())
    }

    pub fn dial(stream_id: StreamId, request: &DialRequest) -> Self {
        Self::new(stream_id, FrameType::Dial, request.encode())
    }

    pub fn dial_ok(stream_id: StreamId) -> Self {
        Self::new(stream_id, FrameType::DialOk, Bytes::new())
    }

    pub fn dial_err(stream_id: StreamId, reason: &str) -> Self {
        Self::new(
            stream_id,
            FrameType::DialErr,
            Bytes::copy_from_slice(reason.as_bytes()),
        )
    }

    pub fn window_update(stream_id: StreamId, increment: u32) -> Self {
        Self::new(
            stream_id,
            FrameType::WindowUpdate,
            Bytes::copy_from_slice(&increment.to_be_bytes()),
        )
    }

    /// Credit released by a window update frame
    pub fn window_increment(&self) -> Result<u32, FrameError> {
        let bytes: [u8; 4] = self
            .payload
            .as_ref()
            .try_into()
            .map_err(|_| FrameError::MalformedWindowUpdate(self.payload.len()))?;
        Ok(u32::from_be_bytes(bytes))
    }

    /// Encode the frame into a single WebSocket message body
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(Self::HEADER_SIZE + self.payload.len());
        buf.put_u32(self.stream_id);
        buf.put_u8(self.frame_type as u8);
        buf.put_slice(&self.payload);
        buf.to_vec()
    }

    /// Decode a frame from a WebSocket message body
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < Self::HEADER_SIZE {
            return Err(FrameError::IncompleteFrame(data.len()));
        }

        let mut buf = data;
        let stream_id = buf.get_u32();
        let frame_type = FrameType::try_from(buf.get_u8())?;

        Ok(Self {
            stream_id,
            frame_type,
            payload: Bytes::copy_from_slice(buf),
        })
    }

    /// Payload interpreted as UTF-8 text (lossy), used for dial errors
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Target of a dial: network and `host:port` address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialRequest {
    pub network: String,
    pub address: String,
}

impl DialRequest {
    pub fn new(network: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            address: address.into(),
        }
    }

    fn encode(&self) -> Bytes {
        Bytes::from(format!("{},{}", self.network, self.address))
    }

    /// Parse the payload of a dial frame
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| FrameError::MalformedDial("payload is not UTF-8".to_string()))?;

        let (network, address) = text
            .split_once(',')
            .ok_or_else(|| FrameError::MalformedDial(text.to_string()))?;

        if network.is_empty() || address.is_empty() {
            return Err(FrameError::MalformedDial(text.to_string()));
        }

        Ok(Self::new(network, address))
    }
}

impl std::fmt::Display for DialRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.network, self.address)
    }
}
