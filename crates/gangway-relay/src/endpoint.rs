//! Local duplex endpoint contracts: the terminal on the client, the SSH shell
//! session on the pier.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use crate::frame::WindowSize;

/// Read half of the local endpoint.
#[async_trait]
pub trait EndpointReader: Send + 'static {
    /// Next chunk of input. `Ok(None)` is a clean end of stream, distinct
    /// from I/O failure. Must be cancel-safe: the relay selects on it against
    /// session teardown.
    async fn read_chunk(&mut self) -> io::Result<Option<Bytes>>;
}

/// Write half of the local endpoint.
#[async_trait]
pub trait EndpointWriter: Send + 'static {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;

    async fn close(&mut self) -> io::Result<()>;
}

/// Applies received resize frames to the shell's pseudo-terminal. Failures
/// are reported but never tear the session down.
pub trait ResizeTarget: Send + Sync {
    fn apply(&self, size: WindowSize) -> io::Result<()>;
}

/// Which way resize control frames flow through this relay instance.
pub enum ResizeRole {
    /// Neither produced nor consumed (tests, piping setups).
    Disabled,
    /// Frontend: publish local geometry changes to the peer. `initial` is the
    /// geometry already established at connection setup; the channel keeps
    /// only the latest size, so bursts collapse naturally.
    Producer {
        initial: WindowSize,
        updates: watch::Receiver<WindowSize>,
    },
    /// Backend: apply geometry received from the peer.
    Consumer(Arc<dyn ResizeTarget>),
}
