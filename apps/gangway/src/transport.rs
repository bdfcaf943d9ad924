//! WebSocket adapter for the relay engine.
//!
//! A single socket task owns the stream: sends from the data and resize pumps
//! are serialised through its queue, received messages are handed back over a
//! channel so `next_message` can take `&self`.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use gangway_relay::{CloseCode, CloseSignal, FramedTransport, IncomingMessage, TransportError};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const FLUSH_GRACE: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Delivery = Result<IncomingMessage, TransportError>;

enum Outbound {
    Data(Bytes),
    Control(String),
    Close { code: CloseCode, reason: String },
}

pub struct WebSocketTransport {
    outgoing: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    incoming: AsyncMutex<mpsc::UnboundedReceiver<Delivery>>,
    socket_task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    pub fn new(stream: WsStream) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let socket_task = tokio::spawn(run_socket(stream, outgoing_rx, incoming_tx));
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
impl FramedTransport for WebSocketTransport {
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
        // Dropping the queue lets the socket task flush whatever is already
        // queued (a close frame, typically) and exit on its own.
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
    stream: WsStream,
    mut outgoing: mpsc::UnboundedReceiver<Outbound>,
    incoming: mpsc::UnboundedSender<Delivery>,
) {
    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            frame = outgoing.recv() => match frame {
                Some(Outbound::Data(payload)) => {
                    if let Err(err) = sink.send(Message::Binary(payload.to_vec())).await {
                        let _ = incoming.send(Err(map_ws_error(err)));
                        break;
                    }
                }
                Some(Outbound::Control(payload)) => {
                    if let Err(err) = sink.send(Message::Text(payload)).await {
                        let _ = incoming.send(Err(map_ws_error(err)));
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
                Some(Ok(Message::Frame(_))) => {
                    let _ = incoming.send(Err(TransportError::UnsupportedMessage("raw frame")));
                    break;
                }
                Some(Err(err)) => {
                    let _ = incoming.send(Err(map_ws_error(err)));
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

fn close_code_to_wire(code: CloseCode) -> WsCloseCode {
    match code {
        CloseCode::Normal => WsCloseCode::Normal,
        CloseCode::Abnormal => WsCloseCode::Error,
        CloseCode::ProtocolError => WsCloseCode::Protocol,
    }
}

fn close_code_from_wire(code: WsCloseCode) -> CloseCode {
    match code {
        WsCloseCode::Normal => CloseCode::Normal,
        WsCloseCode::Protocol => CloseCode::ProtocolError,
        _ => CloseCode::Abnormal,
    }
}

fn map_close_frame(frame: Option<CloseFrame<'_>>) -> CloseSignal {
    match frame {
        Some(frame) => CloseSignal {
            code: close_code_from_wire(frame.code),
            reason: frame.reason.into_owned(),
        },
        // A close without a status code is not the clean shutdown this
        // protocol performs.
        None => CloseSignal {
            code: CloseCode::Abnormal,
            reason: String::new(),
        },
    }
}

fn map_ws_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::ConnectionClosed
        }
        other => TransportError::Io(other.to_string()),
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
        assert_eq!(
            close_code_from_wire(WsCloseCode::Away),
            CloseCode::Abnormal
        );
        assert_eq!(
            close_code_from_wire(WsCloseCode::Invalid),
            CloseCode::Abnormal
        );
    }

    #[test]
    fn close_without_status_is_abnormal() {
        let signal = map_close_frame(None);
        assert_eq!(signal.code, CloseCode::Abnormal);
    }
}
