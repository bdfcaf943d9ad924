//! Framed transport collaborator contract.
//!
//! The transport owns the message framing: data frames map to its binary
//! messages, resize control frames to text messages, and the close frame to
//! its native close handshake. Implementations serialise writes internally
//! (a single socket task fed by a queue), so the data pump and the resize
//! pump can share one handle.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::frame::CloseCode;

/// Close handshake contents received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseSignal {
    pub code: CloseCode,
    pub reason: String,
}

/// One delivered transport message, still at the wire level: control payloads
/// are decoded by the relay so that malformed ones can be dropped per frame.
#[derive(Debug)]
pub enum IncomingMessage {
    /// Binary message; always a data frame, payload verbatim.
    Data(Bytes),
    /// Text message; candidate resize control frame.
    Control(String),
    /// The peer completed (or initiated) the close handshake.
    Closed(CloseSignal),
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection ended without a close handshake.
    #[error("transport connection closed")]
    ConnectionClosed,
    #[error("transport failure: {0}")]
    Io(String),
    /// The peer delivered a message kind outside binary/text/close. Session
    /// fatal: it signals a peer or version mismatch.
    #[error("unsupported transport message kind: {0}")]
    UnsupportedMessage(&'static str),
}

#[async_trait]
pub trait FramedTransport: Send + Sync {
    async fn send_data(&self, payload: Bytes) -> Result<(), TransportError>;

    async fn send_control(&self, payload: String) -> Result<(), TransportError>;

    /// Initiate the close handshake. Best effort; implementations keep
    /// reading so the peer's acknowledgement still surfaces.
    async fn send_close(&self, code: CloseCode, reason: &str) -> Result<(), TransportError>;

    /// Next delivered message. Must be cancel-safe: the relay selects on it
    /// against session teardown.
    async fn next_message(&self) -> Result<IncomingMessage, TransportError>;

    /// Release the connection. Queued frames are flushed where possible, then
    /// the underlying socket is dropped.
    async fn shutdown(&self);
}
