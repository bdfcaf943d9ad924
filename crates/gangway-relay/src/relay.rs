//! The bidirectional pump and its shutdown choreography.
//!
//! Three tasks run per session: local-to-transport, transport-to-local, and
//! (on the frontend) the resize producer. Each one selects between its own
//! I/O and the shared session phase, so the first terminal event in any
//! direction releases the others promptly. `run` joins every task it spawned
//! before returning.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::endpoint::{EndpointReader, EndpointWriter, ResizeRole, ResizeTarget};
use crate::frame::{encode_resize, parse_resize, CloseCode, WindowSize};
use crate::state::{SessionPhase, SessionState};
use crate::transport::{FramedTransport, IncomingMessage, TransportError};

/// How long a graceful close waits for the peer's acknowledgement before
/// teardown proceeds unilaterally.
const CLOSE_HANDSHAKE_GRACE: Duration = Duration::from_secs(5);
/// How long teardown waits for a released pump to finish before aborting it.
const TEARDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("local endpoint failure: {0}")]
    Local(#[source] io::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("peer aborted session ({code}): {reason}")]
    PeerAborted { code: CloseCode, reason: String },
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// One relay instance: a local duplex endpoint wired to a framed transport.
pub struct Relay {
    label: String,
    transport: Arc<dyn FramedTransport>,
    reader: Box<dyn EndpointReader>,
    writer: Box<dyn EndpointWriter>,
    resize: ResizeRole,
}

impl Relay {
    pub fn new(
        label: impl Into<String>,
        transport: Arc<dyn FramedTransport>,
        reader: Box<dyn EndpointReader>,
        writer: Box<dyn EndpointWriter>,
    ) -> Self {
        Self {
            label: label.into(),
            transport,
            reader,
            writer,
            resize: ResizeRole::Disabled,
        }
    }

    pub fn with_resize_producer(
        mut self,
        initial: WindowSize,
        updates: watch::Receiver<WindowSize>,
    ) -> Self {
        self.resize = ResizeRole::Producer { initial, updates };
        self
    }

    pub fn with_resize_consumer(mut self, target: Arc<dyn ResizeTarget>) -> Self {
        self.resize = ResizeRole::Consumer(target);
        self
    }

    /// Drive the session until both directions have terminated. Consumes the
    /// relay; the transport connection and local endpoint are released before
    /// this returns, exactly once, whichever side initiated closure.
    pub async fn run(self) -> Result<(), RelayError> {
        let Relay {
            label,
            transport,
            reader,
            writer,
            resize,
        } = self;

        let (producer, consumer) = match resize {
            ResizeRole::Disabled => (None, None),
            ResizeRole::Producer { initial, updates } => (Some((initial, updates)), None),
            ResizeRole::Consumer(target) => (None, Some(target)),
        };

        let shared = Arc::new(Shared {
            label: label.clone(),
            transport,
            state: SessionState::new(),
            close_sent: AtomicBool::new(false),
            failure: Mutex::new(None),
        });

        info!(session = %label, "relay active");

        let mut outbound = tokio::spawn(pump_outbound(reader, shared.clone()));
        let mut inbound = tokio::spawn(pump_inbound(writer, consumer, shared.clone()));
        let resize_pump = producer
            .map(|(initial, updates)| tokio::spawn(pump_resize(initial, updates, shared.clone())));

        enum First {
            Outbound,
            Inbound,
        }

        let first = tokio::select! {
            _ = &mut outbound => First::Outbound,
            _ = &mut inbound => First::Inbound,
        };

        match first {
            First::Outbound => {
                // Local direction finished: either clean end of input (close
                // frame already sent, remote still draining) or a failure that
                // closed the session. Bound the wait for the peer to finish.
                if timeout(CLOSE_HANDSHAKE_GRACE, &mut inbound).await.is_err() {
                    warn!(session = %label, "peer did not complete close handshake; tearing down");
                    shared.state.close();
                    join_or_abort(&label, "inbound", &mut inbound).await;
                }
            }
            First::Inbound => {
                // Remote direction finished. The outbound pump must not start
                // another read; release it through the phase change.
                shared.state.close();
                join_or_abort(&label, "outbound", &mut outbound).await;
            }
        }

        shared.state.close();
        if let Some(mut pump) = resize_pump {
            join_or_abort(&label, "resize", &mut pump).await;
        }
        shared.transport.shutdown().await;

        let result = match shared.failure.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        };
        match &result {
            Ok(()) => info!(session = %label, "session closed"),
            Err(err) => warn!(session = %label, error = %err, "session closed abnormally"),
        }
        result
    }
}

struct Shared {
    label: String,
    transport: Arc<dyn FramedTransport>,
    state: SessionState,
    close_sent: AtomicBool,
    failure: Mutex<Option<RelayError>>,
}

impl Shared {
    /// First failure wins; later ones are already logged at their source.
    fn record_failure(&self, err: RelayError) {
        let mut slot = self.failure.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// At most one close frame leaves per session, best effort.
    async fn send_close(&self, code: CloseCode, reason: &str) {
        if self.close_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.transport.send_close(code, reason).await {
            debug!(session = %self.label, error = %err, "close frame could not be delivered");
        }
    }
}

async fn join_or_abort(label: &str, direction: &str, pump: &mut JoinHandle<()>) {
    if timeout(TEARDOWN_GRACE, &mut *pump).await.is_err() {
        warn!(session = %label, direction, "pump did not stop in time; aborting");
        pump.abort();
        let _ = pump.await;
    }
}

/// Local endpoint to transport.
async fn pump_outbound(mut reader: Box<dyn EndpointReader>, shared: Arc<Shared>) {
    loop {
        if shared.state.phase() != SessionPhase::Active {
            break;
        }
        let chunk = tokio::select! {
            biased;
            _ = shared.state.wait_closed() => break,
            chunk = reader.read_chunk() => chunk,
        };
        match chunk {
            Ok(Some(data)) => {
                if data.is_empty() {
                    continue;
                }
                // The peer may have closed while the read was in flight.
                if shared.state.phase() != SessionPhase::Active {
                    break;
                }
                if let Err(err) = shared.transport.send_data(data).await {
                    error!(session = %shared.label, direction = "outbound", error = %err, "transport write failed");
                    shared.record_failure(err.into());
                    shared.state.close();
                    break;
                }
            }
            Ok(None) => {
                debug!(session = %shared.label, direction = "outbound", "local endpoint reached end of stream");
                shared.send_close(CloseCode::Normal, "end of input").await;
                shared.state.local_eof();
                break;
            }
            Err(err) => {
                error!(session = %shared.label, direction = "outbound", error = %err, "local endpoint read failed");
                shared
                    .send_close(CloseCode::Abnormal, "local endpoint failure")
                    .await;
                shared.record_failure(RelayError::Local(err));
                shared.state.close();
                break;
            }
        }
    }
}

/// Transport to local endpoint, plus resize application on the consumer side.
async fn pump_inbound(
    mut writer: Box<dyn EndpointWriter>,
    consumer: Option<Arc<dyn ResizeTarget>>,
    shared: Arc<Shared>,
) {
    let mut last_applied: Option<WindowSize> = None;
    loop {
        if shared.state.is_closed() {
            break;
        }
        let message = tokio::select! {
            biased;
            _ = shared.state.wait_closed() => break,
            message = shared.transport.next_message() => message,
        };
        match message {
            Ok(IncomingMessage::Data(payload)) => {
                if payload.is_empty() {
                    continue;
                }
                if let Err(err) = writer.write_chunk(&payload).await {
                    error!(session = %shared.label, direction = "inbound", error = %err, "local endpoint write failed");
                    shared
                        .send_close(CloseCode::Abnormal, "local endpoint failure")
                        .await;
                    shared.record_failure(RelayError::Local(err));
                    shared.state.close();
                    break;
                }
            }
            Ok(IncomingMessage::Control(payload)) => match parse_resize(&payload) {
                Ok(size) => match &consumer {
                    Some(target) => {
                        if last_applied == Some(size) {
                            continue;
                        }
                        match target.apply(size) {
                            Ok(()) => {
                                last_applied = Some(size);
                                debug!(session = %shared.label, %size, "applied window resize");
                            }
                            Err(err) => {
                                warn!(session = %shared.label, %size, error = %err, "failed to apply window resize");
                            }
                        }
                    }
                    None => {
                        debug!(session = %shared.label, %size, "ignoring resize frame from peer");
                    }
                },
                Err(err) => {
                    warn!(session = %shared.label, payload = %payload, error = %err, "discarding malformed control frame");
                }
            },
            Ok(IncomingMessage::Closed(signal)) => {
                match signal.code {
                    CloseCode::Normal => {
                        info!(session = %shared.label, "peer finished cleanly");
                        shared.state.remote_eof();
                    }
                    code => {
                        warn!(session = %shared.label, %code, reason = %signal.reason, "peer aborted session");
                        shared.record_failure(RelayError::PeerAborted {
                            code,
                            reason: signal.reason,
                        });
                        shared.state.close();
                    }
                }
                break;
            }
            Err(TransportError::UnsupportedMessage(kind)) => {
                error!(session = %shared.label, direction = "inbound", kind, "unexpected transport message kind");
                shared
                    .send_close(CloseCode::ProtocolError, "unsupported message kind")
                    .await;
                shared.record_failure(RelayError::Protocol(format!(
                    "unsupported message kind: {kind}"
                )));
                shared.state.close();
                break;
            }
            Err(err) => {
                // A peer may drop the socket right after acknowledging our
                // close; past that point a vanished connection is not a fault.
                if shared.state.phase() == SessionPhase::HalfClosedLocal
                    && matches!(err, TransportError::ConnectionClosed)
                {
                    debug!(session = %shared.label, "transport closed after local end of stream");
                    shared.state.remote_eof();
                } else {
                    error!(session = %shared.label, direction = "inbound", error = %err, "transport read failed");
                    shared.record_failure(err.into());
                    shared.state.close();
                }
                break;
            }
        }
    }
    if let Err(err) = writer.close().await {
        debug!(session = %shared.label, error = %err, "local endpoint close failed");
    }
}

/// Resize producer: forward geometry changes, newest value wins, duplicates
/// suppressed. Runs until the session closes; emits only while `Active` since
/// nothing may follow a close frame.
async fn pump_resize(
    initial: WindowSize,
    mut updates: watch::Receiver<WindowSize>,
    shared: Arc<Shared>,
) {
    // The peer already knows the setup geometry; a change racing the session
    // start must still be delivered, so the baseline is the setup value
    // rather than whatever the channel holds by now.
    let mut last_sent = initial;
    loop {
        tokio::select! {
            biased;
            _ = shared.state.wait_closed() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let size = *updates.borrow_and_update();
                if size == last_sent {
                    continue;
                }
                if shared.state.phase() != SessionPhase::Active {
                    continue;
                }
                match shared.transport.send_control(encode_resize(size)).await {
                    Ok(()) => {
                        debug!(session = %shared.label, %size, "sent window resize");
                        last_sent = size;
                    }
                    Err(err) => {
                        warn!(session = %shared.label, %size, error = %err, "failed to send window resize");
                        shared.record_failure(err.into());
                        shared.state.close();
                        break;
                    }
                }
            }
        }
    }
}
