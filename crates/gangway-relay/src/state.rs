//! Session phase tracking shared by the concurrently running pump tasks.

use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::Notify;

const ACTIVE: u8 = 0;
const HALF_CLOSED_LOCAL: u8 = 1;
const HALF_CLOSED_REMOTE: u8 = 2;
const CLOSED: u8 = 3;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Both directions may send.
    Active,
    /// The local endpoint reached end of stream; remote-to-local still drains.
    HalfClosedLocal,
    /// The peer signalled end of stream; no further writes toward it.
    HalfClosedRemote,
    /// Terminal. Reached exactly once, from any phase.
    Closed,
}

impl SessionPhase {
    fn from_u8(raw: u8) -> SessionPhase {
        match raw {
            ACTIVE => SessionPhase::Active,
            HALF_CLOSED_LOCAL => SessionPhase::HalfClosedLocal,
            HALF_CLOSED_REMOTE => SessionPhase::HalfClosedRemote,
            _ => SessionPhase::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SessionPhase::Active => ACTIVE,
            SessionPhase::HalfClosedLocal => HALF_CLOSED_LOCAL,
            SessionPhase::HalfClosedRemote => HALF_CLOSED_REMOTE,
            SessionPhase::Closed => CLOSED,
        }
    }
}

/// Atomic phase value observed by every pump task. A plain flag would race;
/// all transitions go through compare-and-swap so each one happens once, and
/// waiters parked on [`SessionState::wait_closed`] are woken on the single
/// transition into `Closed`.
#[derive(Debug, Default)]
pub struct SessionState {
    phase: AtomicU8,
    closed: Notify,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == SessionPhase::Closed
    }

    /// The local endpoint reached end of stream.
    pub fn local_eof(&self) -> SessionPhase {
        self.half_close(SessionPhase::HalfClosedLocal, SessionPhase::HalfClosedRemote)
    }

    /// The peer signalled a clean end of stream.
    pub fn remote_eof(&self) -> SessionPhase {
        self.half_close(SessionPhase::HalfClosedRemote, SessionPhase::HalfClosedLocal)
    }

    fn half_close(&self, target: SessionPhase, complement: SessionPhase) -> SessionPhase {
        loop {
            let current = self.phase();
            let next = if current == SessionPhase::Active {
                target
            } else if current == complement {
                SessionPhase::Closed
            } else {
                return current;
            };
            if self
                .phase
                .compare_exchange(
                    current.as_u8(),
                    next.as_u8(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                if next == SessionPhase::Closed {
                    self.closed.notify_waiters();
                }
                return next;
            }
        }
    }

    /// Force the terminal phase. Returns true for the caller that performed
    /// the transition.
    pub fn close(&self) -> bool {
        let previous = self.phase.swap(CLOSED, Ordering::AcqRel);
        if previous != CLOSED {
            self.closed.notify_waiters();
            true
        } else {
            false
        }
    }

    /// Resolves once the session is `Closed`. Usable from any number of tasks.
    pub async fn wait_closed(&self) {
        loop {
            if self.is_closed() {
                return;
            }
            let notified = self.closed.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn eof_on_both_sides_closes() {
        let state = SessionState::new();
        assert_eq!(state.phase(), SessionPhase::Active);
        assert_eq!(state.local_eof(), SessionPhase::HalfClosedLocal);
        assert_eq!(state.remote_eof(), SessionPhase::Closed);
        assert!(state.is_closed());
    }

    #[test]
    fn half_close_is_idempotent() {
        let state = SessionState::new();
        assert_eq!(state.remote_eof(), SessionPhase::HalfClosedRemote);
        assert_eq!(state.remote_eof(), SessionPhase::HalfClosedRemote);
        assert_eq!(state.local_eof(), SessionPhase::Closed);
        assert_eq!(state.local_eof(), SessionPhase::Closed);
    }

    #[test]
    fn only_one_caller_performs_the_close() {
        let state = SessionState::new();
        assert!(state.close());
        assert!(!state.close());
        assert_eq!(state.remote_eof(), SessionPhase::Closed);
    }

    #[tokio::test]
    async fn wait_closed_wakes_parked_tasks() {
        let state = Arc::new(SessionState::new());
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_closed().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        state.close();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter released")
            .expect("waiter task");
    }

    #[tokio::test]
    async fn wait_closed_returns_immediately_when_already_closed() {
        let state = SessionState::new();
        state.close();
        tokio::time::timeout(Duration::from_millis(100), state.wait_closed())
            .await
            .expect("no wait on closed session");
    }
}
