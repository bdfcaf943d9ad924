//! Behavioural tests for the relay engine against the in-memory transport.
//!
//! One end of the pair is driven by a real `Relay`; the test plays the peer
//! on the other end.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use gangway_relay::mock::{FeedReader, MockTransport, RecordingResizeTarget, SinkWriter};
use gangway_relay::{
    CloseCode, FramedTransport, IncomingMessage, Relay, RelayError, TransportError, WindowSize,
};
use tokio::sync::watch;
use tokio::time::timeout;

const TICK: Duration = Duration::from_secs(5);

fn size(cols: u16, rows: u16) -> WindowSize {
    WindowSize { cols, rows }
}

async fn expect_message(peer: &MockTransport) -> IncomingMessage {
    timeout(TICK, peer.next_message())
        .await
        .expect("peer message in time")
        .expect("peer message")
}

async fn expect_data(peer: &MockTransport) -> Bytes {
    match expect_message(peer).await {
        IncomingMessage::Data(payload) => payload,
        other => panic!("expected data frame, got {other:?}"),
    }
}

#[tokio::test]
async fn relays_bytes_in_both_directions_in_order() {
    let (transport, peer) = MockTransport::pair();
    let (reader, feed) = FeedReader::new();
    let (writer, mut sink) = SinkWriter::new();

    let session = tokio::spawn(
        Relay::new("test", Arc::new(transport), Box::new(reader), Box::new(writer)).run(),
    );

    // End-to-end scenario: keystrokes one way, command output the other.
    feed.push(b"ls\n");
    assert_eq!(expect_data(&peer).await.as_ref(), b"ls\n");

    peer.send_data(Bytes::from_static(b"file1\n")).await.unwrap();
    peer.send_data(Bytes::from_static(b"file2\n")).await.unwrap();
    assert_eq!(
        timeout(TICK, sink.next()).await.expect("output").unwrap().as_ref(),
        b"file1\n"
    );
    assert_eq!(
        timeout(TICK, sink.next()).await.expect("output").unwrap().as_ref(),
        b"file2\n"
    );

    peer.send_close(CloseCode::Normal, "shell exited").await.unwrap();
    let result = timeout(TICK, session).await.expect("session ends").expect("join");
    assert!(result.is_ok(), "clean close, got {result:?}");
    assert_eq!(sink.close_count(), 1);
}

#[tokio::test]
async fn local_end_of_stream_half_closes_and_keeps_draining() {
    let (transport, peer) = MockTransport::pair();
    let (reader, feed) = FeedReader::new();
    let (writer, mut sink) = SinkWriter::new();

    let session = tokio::spawn(
        Relay::new("test", Arc::new(transport), Box::new(reader), Box::new(writer)).run(),
    );

    feed.push(b"exit\n");
    assert_eq!(expect_data(&peer).await.as_ref(), b"exit\n");
    drop(feed);

    // The relay announces the end of input with a clean close frame...
    match expect_message(&peer).await {
        IncomingMessage::Closed(signal) => assert_eq!(signal.code, CloseCode::Normal),
        other => panic!("expected close frame, got {other:?}"),
    }

    // ...but output still in flight is delivered before the session ends.
    peer.send_data(Bytes::from_static(b"logout\n")).await.unwrap();
    assert_eq!(
        timeout(TICK, sink.next()).await.expect("output").unwrap().as_ref(),
        b"logout\n"
    );
    peer.send_close(CloseCode::Normal, "").await.unwrap();

    let result = timeout(TICK, session).await.expect("session ends").expect("join");
    assert!(result.is_ok(), "clean close, got {result:?}");
    assert_eq!(sink.close_count(), 1);
}

#[tokio::test]
async fn malformed_control_frames_are_discarded_without_teardown() {
    let (transport, peer) = MockTransport::pair();
    let (reader, _feed) = FeedReader::new();
    let (writer, mut sink) = SinkWriter::new();
    let target = RecordingResizeTarget::new();

    let session = tokio::spawn(
        Relay::new("test", Arc::new(transport), Box::new(reader), Box::new(writer))
            .with_resize_consumer(target.clone())
            .run(),
    );

    peer.send_control("abc".to_string()).await.unwrap();
    peer.send_control("10".to_string()).await.unwrap();
    peer.send_control("80, 24".to_string()).await.unwrap();
    peer.send_data(Bytes::from_static(b"still alive")).await.unwrap();
    assert_eq!(
        timeout(TICK, sink.next()).await.expect("output").unwrap().as_ref(),
        b"still alive"
    );

    peer.send_close(CloseCode::Normal, "").await.unwrap();
    let result = timeout(TICK, session).await.expect("session ends").expect("join");
    assert!(result.is_ok(), "malformed control must not kill the session: {result:?}");
    assert!(target.applied().is_empty());
}

#[tokio::test]
async fn resize_frames_apply_in_order_and_skip_duplicates() {
    let (transport, peer) = MockTransport::pair();
    let (reader, _feed) = FeedReader::new();
    let (writer, mut sink) = SinkWriter::new();
    let target = RecordingResizeTarget::new();

    let session = tokio::spawn(
        Relay::new("test", Arc::new(transport), Box::new(reader), Box::new(writer))
            .with_resize_consumer(target.clone())
            .run(),
    );

    peer.send_control("80,24".to_string()).await.unwrap();
    peer.send_control("80,24".to_string()).await.unwrap();
    peer.send_control("132,43".to_string()).await.unwrap();
    // Data frame as an ordering barrier: controls above are handled first.
    peer.send_data(Bytes::from_static(b"sync")).await.unwrap();
    assert_eq!(
        timeout(TICK, sink.next()).await.expect("output").unwrap().as_ref(),
        b"sync"
    );
    assert_eq!(target.applied(), vec![size(80, 24), size(132, 43)]);

    peer.send_close(CloseCode::Normal, "").await.unwrap();
    let result = timeout(TICK, session).await.expect("session ends").expect("join");
    assert!(result.is_ok());
}

#[tokio::test]
async fn producer_publishes_changed_geometry_once() {
    let (transport, peer) = MockTransport::pair();
    let (reader, _feed) = FeedReader::new();
    let (writer, _sink) = SinkWriter::new();
    let (updates_tx, updates_rx) = watch::channel(size(80, 24));

    let session = tokio::spawn(
        Relay::new("test", Arc::new(transport), Box::new(reader), Box::new(writer))
            .with_resize_producer(size(80, 24), updates_rx)
            .run(),
    );

    updates_tx.send(size(120, 40)).unwrap();
    match expect_message(&peer).await {
        IncomingMessage::Control(payload) => assert_eq!(payload, "120,40"),
        other => panic!("expected control frame, got {other:?}"),
    }

    // Re-publishing the same geometry produces no frame; the next change does.
    updates_tx.send(size(120, 40)).unwrap();
    updates_tx.send(size(90, 30)).unwrap();
    match expect_message(&peer).await {
        IncomingMessage::Control(payload) => assert_eq!(payload, "90,30"),
        other => panic!("expected control frame, got {other:?}"),
    }

    peer.send_close(CloseCode::Normal, "").await.unwrap();
    let result = timeout(TICK, session).await.expect("session ends").expect("join");
    assert!(result.is_ok());
}

#[tokio::test]
async fn transport_drop_without_handshake_aborts_promptly() {
    let (transport, peer) = MockTransport::pair();
    let (reader, _feed) = FeedReader::new();
    let (writer, sink) = SinkWriter::new();

    let session = tokio::spawn(
        Relay::new("test", Arc::new(transport), Box::new(reader), Box::new(writer)).run(),
    );

    // Connection vanishes with no close frame; the local reader never reached
    // end of stream, so teardown must release it rather than wait on it.
    peer.shutdown().await;

    let result = timeout(TICK, session).await.expect("session ends").expect("join");
    match result {
        Err(RelayError::Transport(TransportError::ConnectionClosed)) => {}
        other => panic!("expected connection-closed failure, got {other:?}"),
    }
    assert_eq!(sink.close_count(), 1);
}

#[tokio::test]
async fn peer_abort_surfaces_as_failure() {
    let (transport, peer) = MockTransport::pair();
    let (reader, _feed) = FeedReader::new();
    let (writer, sink) = SinkWriter::new();

    let session = tokio::spawn(
        Relay::new("test", Arc::new(transport), Box::new(reader), Box::new(writer)).run(),
    );

    peer.send_close(CloseCode::Abnormal, "upstream died").await.unwrap();

    let result = timeout(TICK, session).await.expect("session ends").expect("join");
    match result {
        Err(RelayError::PeerAborted { code, reason }) => {
            assert_eq!(code, CloseCode::Abnormal);
            assert_eq!(reason, "upstream died");
        }
        other => panic!("expected peer abort, got {other:?}"),
    }
    assert_eq!(sink.close_count(), 1);
}

#[tokio::test]
async fn unsupported_message_kind_is_session_fatal() {
    let (transport, peer) = MockTransport::pair();
    let (reader, _feed) = FeedReader::new();
    let (writer, _sink) = SinkWriter::new();

    let session = tokio::spawn(
        Relay::new("test", Arc::new(transport), Box::new(reader), Box::new(writer)).run(),
    );

    peer.send_unsupported("raw frame");

    // The relay answers with a protocol-error close before tearing down.
    match expect_message(&peer).await {
        IncomingMessage::Closed(signal) => assert_eq!(signal.code, CloseCode::ProtocolError),
        other => panic!("expected close frame, got {other:?}"),
    }

    let result = timeout(TICK, session).await.expect("session ends").expect("join");
    match result {
        Err(RelayError::Protocol(_)) => {}
        other => panic!("expected protocol failure, got {other:?}"),
    }
}

#[tokio::test]
async fn local_read_failure_closes_abnormally() {
    let (transport, peer) = MockTransport::pair();
    let (reader, feed) = FeedReader::new();
    let (writer, sink) = SinkWriter::new();

    let session = tokio::spawn(
        Relay::new("test", Arc::new(transport), Box::new(reader), Box::new(writer)).run(),
    );

    feed.fail(io::Error::new(io::ErrorKind::ConnectionReset, "tty gone"));

    match expect_message(&peer).await {
        IncomingMessage::Closed(signal) => assert_eq!(signal.code, CloseCode::Abnormal),
        other => panic!("expected close frame, got {other:?}"),
    }

    let result = timeout(TICK, session).await.expect("session ends").expect("join");
    match result {
        Err(RelayError::Local(err)) => assert_eq!(err.kind(), io::ErrorKind::ConnectionReset),
        other => panic!("expected local failure, got {other:?}"),
    }
    assert_eq!(sink.close_count(), 1);
}
