//! Terminal dimension watcher.

use gangway_relay::WindowSize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Publishes geometry changes into a watch channel: only the most recent size
/// is kept, so bursts of signals collapse into one observable update. The
/// task ends once the session drops its receiver.
pub fn spawn_watcher(initial: WindowSize) -> (watch::Receiver<WindowSize>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(initial);
    let task = tokio::spawn(watch_signals(tx));
    (rx, task)
}

#[cfg(unix)]
async fn watch_signals(tx: watch::Sender<WindowSize>) {
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::{debug, warn};

    use crate::terminal;

    let mut winch = match signal(SignalKind::window_change()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "cannot watch for terminal resize");
            return;
        }
    };
    loop {
        tokio::select! {
            _ = tx.closed() => break,
            event = winch.recv() => {
                if event.is_none() {
                    break;
                }
                match terminal::current_size() {
                    Ok(size) => {
                        if *tx.borrow() != size {
                            debug!(%size, "terminal resized");
                            let _ = tx.send(size);
                        }
                    }
                    Err(err) => warn!(error = %err, "failed to query terminal size"),
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn watch_signals(tx: watch::Sender<WindowSize>) {
    // No resize notifications on this platform; hold the sender open until
    // the session drops its receiver.
    tx.closed().await;
}
