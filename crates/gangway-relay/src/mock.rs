//! In-memory transport and endpoints for exercising the relay engine.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

use crate::endpoint::{EndpointReader, EndpointWriter, ResizeTarget};
use crate::frame::{CloseCode, WindowSize};
use crate::transport::{CloseSignal, FramedTransport, IncomingMessage, TransportError};

type Delivery = Result<IncomingMessage, TransportError>;

/// One end of a paired in-memory transport. Frames sent on one end are
/// delivered on the other; dropping the sender side (via [`shutdown`]) shows
/// up on the peer as a connection that vanished without a close handshake.
///
/// [`shutdown`]: FramedTransport::shutdown
pub struct MockTransport {
    peer: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    incoming: AsyncMutex<mpsc::UnboundedReceiver<Delivery>>,
}

impl MockTransport {
    pub fn pair() -> (MockTransport, MockTransport) {
        let (left_tx, left_rx) = mpsc::unbounded_channel();
        let (right_tx, right_rx) = mpsc::unbounded_channel();
        (
            MockTransport {
                peer: Mutex::new(Some(right_tx)),
                incoming: AsyncMutex::new(left_rx),
            },
            MockTransport {
                peer: Mutex::new(Some(left_tx)),
                incoming: AsyncMutex::new(right_rx),
            },
        )
    }

    fn deliver(&self, item: Delivery) -> Result<(), TransportError> {
        match self.peer.lock().unwrap().as_ref() {
            Some(tx) => tx.send(item).map_err(|_| TransportError::ConnectionClosed),
            None => Err(TransportError::ConnectionClosed),
        }
    }

    /// Deliver a message kind outside the binary/text/close set, as a broken
    /// or mismatched peer would.
    pub fn send_unsupported(&self, kind: &'static str) {
        let _ = self.deliver(Err(TransportError::UnsupportedMessage(kind)));
    }
}

#[async_trait]
impl FramedTransport for MockTransport {
    async fn send_data(&self, payload: Bytes) -> Result<(), TransportError> {
        self.deliver(Ok(IncomingMessage::Data(payload)))
    }

    async fn send_control(&self, payload: String) -> Result<(), TransportError> {
        self.deliver(Ok(IncomingMessage::Control(payload)))
    }

    async fn send_close(&self, code: CloseCode, reason: &str) -> Result<(), TransportError> {
        self.deliver(Ok(IncomingMessage::Closed(CloseSignal {
            code,
            reason: reason.to_string(),
        })))
    }

    async fn next_message(&self) -> Result<IncomingMessage, TransportError> {
        match self.incoming.lock().await.recv().await {
            Some(delivery) => delivery,
            None => Err(TransportError::ConnectionClosed),
        }
    }

    async fn shutdown(&self) {
        self.peer.lock().unwrap().take();
    }
}

/// Endpoint reader fed by a test. End of stream is signalled by dropping the
/// handle.
pub struct FeedReader {
    chunks: mpsc::UnboundedReceiver<io::Result<Bytes>>,
}

pub struct FeedHandle {
    chunks: mpsc::UnboundedSender<io::Result<Bytes>>,
}

impl FeedReader {
    pub fn new() -> (FeedReader, FeedHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (FeedReader { chunks: rx }, FeedHandle { chunks: tx })
    }
}

impl FeedHandle {
    pub fn push(&self, chunk: &[u8]) {
        let _ = self.chunks.send(Ok(Bytes::copy_from_slice(chunk)));
    }

    pub fn fail(&self, err: io::Error) {
        let _ = self.chunks.send(Err(err));
    }
}

#[async_trait]
impl EndpointReader for FeedReader {
    async fn read_chunk(&mut self) -> io::Result<Option<Bytes>> {
        match self.chunks.recv().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }
}

/// Endpoint writer that hands written chunks back to the test and counts how
/// many times it was closed.
pub struct SinkWriter {
    written: mpsc::UnboundedSender<Bytes>,
    closes: Arc<AtomicUsize>,
}

pub struct SinkHandle {
    written: mpsc::UnboundedReceiver<Bytes>,
    closes: Arc<AtomicUsize>,
}

impl SinkWriter {
    pub fn new() -> (SinkWriter, SinkHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closes = Arc::new(AtomicUsize::new(0));
        (
            SinkWriter {
                written: tx,
                closes: closes.clone(),
            },
            SinkHandle {
                written: rx,
                closes,
            },
        )
    }
}

impl SinkHandle {
    pub async fn next(&mut self) -> Option<Bytes> {
        self.written.recv().await
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EndpointWriter for SinkWriter {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.written
            .send(Bytes::copy_from_slice(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "sink receiver dropped"))
    }

    async fn close(&mut self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Resize consumer that records every applied geometry.
#[derive(Default)]
pub struct RecordingResizeTarget {
    applied: Mutex<Vec<WindowSize>>,
}

impl RecordingResizeTarget {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn applied(&self) -> Vec<WindowSize> {
        self.applied.lock().unwrap().clone()
    }
}

impl ResizeTarget for RecordingResizeTarget {
    fn apply(&self, size: WindowSize) -> io::Result<()> {
        self.applied.lock().unwrap().push(size);
        Ok(())
    }
}
