//! Raw-mode control and the terminal's endpoint halves.

use std::io::{self, Read};
use std::thread;

use async_trait::async_trait;
use bytes::Bytes;
use crossterm::terminal::{self, disable_raw_mode, enable_raw_mode};
use gangway_relay::{EndpointReader, EndpointWriter, WindowSize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::warn;

const STDIN_CHUNK: usize = 32 * 1024;

pub struct RawModeGuard(bool);

impl RawModeGuard {
    pub fn new() -> Self {
        match enable_raw_mode() {
            Ok(()) => Self(true),
            Err(err) => {
                warn!(error = %err, "failed to enable raw mode");
                Self(false)
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.0 {
            let _ = disable_raw_mode();
        }
    }
}

pub fn current_size() -> io::Result<WindowSize> {
    let (cols, rows) = terminal::size()?;
    Ok(WindowSize { cols, rows })
}

/// Stdin as an endpoint reader. A read(2) blocked on a tty cannot be
/// interrupted portably, so the reads happen on a dedicated detached thread
/// feeding a channel; the async half stays cancellable and the thread dies
/// with the process.
pub struct TerminalInput {
    chunks: mpsc::UnboundedReceiver<io::Result<Bytes>>,
}

impl TerminalInput {
    pub fn spawn() -> io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        thread::Builder::new()
            .name("stdin-reader".to_string())
            .spawn(move || {
                let mut stdin = io::stdin().lock();
                let mut buffer = vec![0u8; STDIN_CHUNK];
                loop {
                    match stdin.read(&mut buffer) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(Ok(Bytes::copy_from_slice(&buffer[..n]))).is_err() {
                                break;
                            }
                        }
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                        Err(err) => {
                            let _ = tx.send(Err(err));
                            break;
                        }
                    }
                }
            })?;
        Ok(Self { chunks: rx })
    }
}

#[async_trait]
impl EndpointReader for TerminalInput {
    async fn read_chunk(&mut self) -> io::Result<Option<Bytes>> {
        match self.chunks.recv().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }
}

/// Stdout as an endpoint writer. Bytes pass through verbatim; the remote side
/// owns all escape sequences.
pub struct TerminalOutput {
    stdout: tokio::io::Stdout,
}

impl TerminalOutput {
    pub fn new() -> Self {
        Self {
            stdout: tokio::io::stdout(),
        }
    }
}

impl Default for TerminalOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EndpointWriter for TerminalOutput {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.stdout.write_all(chunk).await?;
        self.stdout.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.stdout.flush().await
    }
}
