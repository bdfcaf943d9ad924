//! Session entry point: validate geometry, upgrade, start the shell, run the
//! relay, tear everything down exactly once.

use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gangway_relay::{CloseCode, FramedTransport, Relay, WindowSize};
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::SshConfig;
use crate::ssh::ShellSession;
use crate::transport::SocketTransport;

#[derive(Clone)]
pub struct AppState {
    pub ssh: Arc<SshConfig>,
}

#[derive(Debug, Deserialize)]
pub struct GeometryParams {
    width: Option<u16>,
    height: Option<u16>,
}

impl GeometryParams {
    fn validate(&self) -> Result<WindowSize, &'static str> {
        let cols = self.width.ok_or("missing 'width' query parameter")?;
        let rows = self.height.ok_or("missing 'height' query parameter")?;
        if cols == 0 || rows == 0 {
            return Err("'width' and 'height' must be positive");
        }
        Ok(WindowSize { cols, rows })
    }
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn shell_handler(
    State(state): State<AppState>,
    Path(host): Path<String>,
    Query(geometry): Query<GeometryParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let size = match geometry.validate() {
        Ok(size) => size,
        Err(reason) => {
            warn!(host = %host, reason, "rejecting session request");
            return (StatusCode::BAD_REQUEST, reason).into_response();
        }
    };
    ws.on_upgrade(move |socket| serve_session(state, host, size, socket))
}

async fn serve_session(state: AppState, host: String, size: WindowSize, socket: WebSocket) {
    let session_id = Uuid::new_v4();
    info!(session = %session_id, host = %host, %size, "session accepted");

    let mut shell = match ShellSession::connect(&state.ssh, &host, size).await {
        Ok(shell) => shell,
        Err(err) => {
            error!(session = %session_id, host = %host, error = %err, "failed to establish shell");
            let transport = SocketTransport::new(socket);
            let _ = transport
                .send_close(CloseCode::Abnormal, "shell setup failed")
                .await;
            transport.shutdown().await;
            return;
        }
    };

    let transport = Arc::new(SocketTransport::new(socket));
    let output = shell.take_output();
    let stdin = shell.stdin();
    let resize = Arc::new(shell.resize_target());

    let result = Relay::new(
        session_id.to_string(),
        transport,
        Box::new(output),
        Box::new(stdin),
    )
    .with_resize_consumer(resize)
    .run()
    .await;

    // The relay has terminated; the shell session is released regardless of
    // which side initiated closure.
    shell.close().await;

    match result {
        Ok(()) => info!(session = %session_id, host = %host, "session ended"),
        Err(err) => {
            warn!(session = %session_id, host = %host, error = %err, "session ended abnormally")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_positive_geometry() {
        let params = GeometryParams {
            width: Some(120),
            height: Some(40),
        };
        assert_eq!(params.validate(), Ok(WindowSize { cols: 120, rows: 40 }));
    }

    #[test]
    fn rejects_missing_parameters() {
        assert!(GeometryParams {
            width: None,
            height: Some(40),
        }
        .validate()
        .is_err());
        assert!(GeometryParams {
            width: Some(120),
            height: None,
        }
        .validate()
        .is_err());
    }

    #[test]
    fn rejects_zero_dimensions() {
        assert!(GeometryParams {
            width: Some(0),
            height: Some(40),
        }
        .validate()
        .is_err());
        assert!(GeometryParams {
            width: Some(120),
            height: Some(0),
        }
        .validate()
        .is_err());
    }
}
