//! Server-side WebSocket adapter, mirror of the client's: one socket task
//! owns the accepted stream, writers share its queue.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use gangway_relay::{CloseCode, CloseSignal, FramedTransport, IncomingMessage, TransportError};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const FLUSH_GRACE: Duration = Duration::from_secs(2);

type Delivery = Result<IncomingMessage, TransportError>;

enum Outbound {
    Data(Bytes),
    Control(String),
    Close { code: CloseCode, reason: String },
}

pub struct SocketTransport {
    outgoing: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    incoming: AsyncMutex<mpsc::UnboundedReceiver<Delivery>>,
    socket_task: Mutex<Option<JoinHandle<()>>>,
}

impl SocketTransport {
    pub fn new(socket: WebSocket) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let socket_task = tokio::spawn(run_socket(socket, outgoing_rx, incoming_tx));
        Self {
            outgoing: Mutex::new(Some(outgoing_tx)),
            incoming: AsyncMutex::new(incoming_rx),
            socket_task: Mutex::new(Some(socket_task)),
        }
    }

    fn queue(&self, frame: Outbound) -> Result<(), TransportError> {
        match self.outgoing.lock().unwrap().as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| TransportError::ConnectionClosed),
            None => Err(TransportError::ConnectionClosed),
        }
    }
}

#[async_trait]
impl FramedTransport for SocketTransport {
    async fn send_data(&self, payload: Bytes) -> Result<(), TransportError> {
        self.queue(Outbound::Data(payload))
    }

    async fn send_control(&self, payload: String) -> Result<(), TransportError> {
        self.queue(Outbound::Control(payload))
    }

    async fn send_close(&self, code: CloseCode, reason: &str) -> Result<(), TransportError> {
        self.queue(Outbound::Close {
            code,
            reason: reason.to_string(),
        })
    }

    async fn next_message(&self) -> Result<IncomingMessage, TransportError> {
        match self.incoming.lock().await.recv().await {
            Some(delivery) => delivery,
            None => Err(TransportError::ConnectionClosed),
        }
    }

    async fn shutdown(&self) {
        self.outgoing.lock().unwrap().take();
        let task = self.socket_task.lock().unwrap().take();
        if let Some(mut task) = task {
            if timeout(FLUSH_GRACE, &mut task).await.is_err() {
                task.abort();
                let _ = task.await;
            }
        }
    }
}

async fn run_socket(
    socket: WebSocket,
    mut outgoing: mpsc::UnboundedReceiver<Outbound>,
    incoming: mpsc::UnboundedSender<Delivery>,
) {
    let (mut sink, mut source) = socket.split();
    loop {
        tokio::select! {
            frame = outgoing.recv() => match frame {
                Some(Outbound::Data(payload)) => {
                    if let Err(err) = sink.send(Message::Binary(payload.to_vec())).await {
                        let _ = incoming.send(Err(TransportError::Io(err.to_string())));
                        break;
                    }
                }
                Some(Outbound::Control(payload)) => {
                    if let Err(err) = sink.send(Message::Text(payload)).await {
                        let _ = incoming.send(Err(TransportError::Io(err.to_string())));
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: close_code_to_wire(code),
                        reason: reason.into(),
                    };
                    if sink.send(Message::Close(Some(frame))).await.is_err() {
                        let _ = incoming.send(Err(TransportError::ConnectionClosed));
                        break;
                    }
                    // Keep reading: the peer's acknowledgement still arrives.
                }
                None => break,
            },
            message = source.next() => match message {
                Some(Ok(Message::Binary(payload))) => {
                    if incoming.send(Ok(IncomingMessage::Data(Bytes::from(payload)))).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Text(payload))) => {
                    if incoming.send(Ok(IncomingMessage::Control(payload))).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let _ = incoming.send(Ok(IncomingMessage::Closed(map_close_frame(frame))));
                    break;
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Err(err)) => {
                    let _ = incoming.send(Err(TransportError::Io(err.to_string())));
                    break;
                }
                None => {
                    let _ = incoming.send(Err(TransportError::ConnectionClosed));
                    break;
                }
            },
        }
    }
    // Completes the close handshake: flushes the reply queued for a received
    // close frame, or sends one if none went out yet.
    let _ = sink.close().await;
}

fn close_code_to_wire(code: CloseCode) -> u16 {
    match code {
        CloseCode::Normal => close_code::NORMAL,
        CloseCode::Abnormal => close_code::ERROR,
        CloseCode::ProtocolError => close_code::PROTOCOL,
    }
}

fn close_code_from_wire(code: u16) -> CloseCode {
    match code {
        close_code::NORMAL => CloseCode::Normal,
        close_code::PROTOCOL => CloseCode::ProtocolError,
        _ => CloseCode::Abnormal,
    }
}

fn map_close_frame(frame: Option<CloseFrame<'static>>) -> CloseSignal {
    match frame {
        Some(frame) => CloseSignal {
            code: close_code_from_wire(frame.code),
            reason: frame.reason.into_owned(),
        },
        None => CloseSignal {
            code: CloseCode::Abnormal,
            reason: String::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_round_trip_through_wire_values() {
        for code in [CloseCode::Normal, CloseCode::Abnormal, CloseCode::ProtocolError] {
            assert_eq!(close_code_from_wire(close_code_to_wire(code)), code);
        }
    }

    #[test]
    fn unknown_wire_codes_map_to_abnormal() {
        assert_eq!(close_code_from_wire(close_code::AWAY), CloseCode::Abnormal);
        assert_eq!(close_code_from_wire(4000), CloseCode::Abnormal);
    }
}
