use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("unable to query terminal size: {0}")]
    TerminalSize(io::Error),
    #[error("invalid bridge url '{url}': {reason}")]
    InvalidBridgeUrl { url: String, reason: String },
    #[error("failed to reach bridge: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Relay(#[from] gangway_relay::RelayError),
}
