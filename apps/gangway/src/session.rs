//! Connection setup and relay hand-off.

use std::sync::Arc;

use gangway_relay::{Relay, WindowSize};
use tokio_tungstenite::connect_async;
use tracing::{debug, info};
use url::Url;

use crate::cli::Cli;
use crate::error::ClientError;
use crate::resize;
use crate::terminal::{self, RawModeGuard, TerminalInput, TerminalOutput};
use crate::transport::WebSocketTransport;

/// Session endpoint on the pier: `/ssh/<host>`, with the initial geometry as
/// query parameters.
pub fn session_url(bridge: &str, host: &str, size: WindowSize) -> Result<Url, ClientError> {
    let invalid = |reason: String| ClientError::InvalidBridgeUrl {
        url: bridge.to_string(),
        reason,
    };
    let mut url = Url::parse(bridge).map_err(|err| invalid(err.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    }
    url.path_segments_mut()
        .map_err(|_| invalid("not a base url".to_string()))?
        .pop_if_empty()
        .push("ssh")
        .push(host);
    url.query_pairs_mut()
        .append_pair("width", &size.cols.to_string())
        .append_pair("height", &size.rows.to_string());
    Ok(url)
}

pub async fn run(cli: Cli) -> Result<(), ClientError> {
    let size = terminal::current_size().map_err(ClientError::TerminalSize)?;
    let url = session_url(&cli.bridge, &cli.host, size)?;

    debug!(url = %url, "dialing pier");
    let (stream, _response) = connect_async(url.as_str()).await?;
    info!(host = %cli.host, %size, "connected");

    let transport = Arc::new(WebSocketTransport::new(stream));
    let input = TerminalInput::spawn()?;
    let output = TerminalOutput::new();
    let (size_updates, watcher) = resize::spawn_watcher(size);

    let raw = RawModeGuard::new();
    let result = Relay::new(cli.host.clone(), transport, Box::new(input), Box::new(output))
        .with_resize_producer(size, size_updates)
        .run()
        .await;
    drop(raw);

    // The relay dropped its receiver, which is what stops the watcher.
    let _ = watcher.await;

    result.map_err(ClientError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size() -> WindowSize {
        WindowSize { cols: 80, rows: 24 }
    }

    #[test]
    fn builds_the_session_url_with_geometry() {
        let url = session_url("ws://bridge.example:8080", "db01", size()).expect("url");
        assert_eq!(url.as_str(), "ws://bridge.example:8080/ssh/db01?width=80&height=24");
    }

    #[test]
    fn keeps_a_base_path_on_the_bridge_url() {
        let url = session_url("wss://bridge.example/proxy/", "db01", size()).expect("url");
        assert_eq!(
            url.as_str(),
            "wss://bridge.example/proxy/ssh/db01?width=80&height=24"
        );
    }

    #[test]
    fn rejects_non_websocket_schemes() {
        let err = session_url("http://bridge.example", "db01", size()).unwrap_err();
        assert!(matches!(err, ClientError::InvalidBridgeUrl { .. }));
    }
}
