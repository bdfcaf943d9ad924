use thiserror::Error;

/// Failures while establishing a shell session. All of these are fatal for
/// the one session being set up and leave nothing behind.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to dial {addr}: {source}")]
    Dial { addr: String, source: russh::Error },
    #[error("ssh handshake timed out for {addr}")]
    DialTimeout { addr: String },
    #[error("authentication failed for {user}@{addr}")]
    AuthenticationRejected { user: String, addr: String },
    #[error("{request} request rejected by {addr}")]
    RequestRejected {
        request: &'static str,
        addr: String,
    },
    #[error("shell channel closed during setup")]
    ChannelClosed,
    #[error("ssh error: {0}")]
    Ssh(#[from] russh::Error),
}
