//! Command link handle shared by every flow that talks to the device

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tello_shared::{
    codec::CodecError, DroneCommand, LinkEvent, LinkState, LinkStateMachine, Response,
    TransitionResult,
};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Errors raised by the command link
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Connection failed: no handshake reply after {attempts} attempts")]
    Connection { attempts: u32 },

    #[error("Link not ready (state: {0})")]
    NotReady(LinkState),

    #[error("Command '{command}' timed out after {attempts} attempts")]
    CommandTimeout { command: String, attempts: u32 },

    #[error("Link busy, command dropped")]
    Busy,

    #[error("Link closed")]
    Closed,

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// A command waiting for the link service
#[derive(Debug)]
pub struct LinkRequest {
    pub command: DroneCommand,
    pub enqueued_at: Instant,
    pub reply: oneshot::Sender<Result<Response, LinkError>>,
}

/// Reply to a submitted command, resolved by the link service
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<Result<Response, LinkError>>,
}

impl PendingReply {
    pub fn new(rx: oneshot::Receiver<Result<Response, LinkError>>) -> Self {
        Self { rx }
    }

    /// A reply that is already known
    pub fn ready(result: Result<Response, LinkError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    /// Wait for the ack, timeout or retry exhaustion
    pub async fn wait(self) -> Result<Response, LinkError> {
        self.rx.await.unwrap_or(Err(LinkError::Closed))
    }
}

/// Link state shared between the manager, its service task and handles
#[derive(Debug)]
pub struct LinkStatus {
    fsm: RwLock<LinkStateMachine>,
    state_tx: watch::Sender<LinkState>,
}

impl LinkStatus {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        Self {
            fsm: RwLock::new(LinkStateMachine::new()),
            state_tx,
        }
    }

    /// Current state without locking
    pub fn current(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    /// Observe state changes
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// Recent transitions, oldest first
    pub async fn history(&self) -> Vec<(LinkState, LinkState)> {
        self.fsm.read().await.history().copied().collect()
    }

    /// Feed an event into the state machine and publish the new state
    pub async fn apply(&self, event: LinkEvent) -> TransitionResult {
        let mut fsm = self.fsm.write().await;
        let from = fsm.state();
        let result = fsm.process_event(event);
        match &result {
            TransitionResult::Success(to) => {
                if from != *to {
                    debug!("[LINK] {} -> {} ({:?})", from, to, event);
                }
                self.state_tx.send_replace(*to);
            }
            TransitionResult::Invalid { from, event } => {
                warn!("[LINK] Ignoring {:?} in state {}", event, from);
            }
        }
        result
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Submits commands to the device
#[async_trait]
pub trait CommandLink: Send + Sync {
    /// Whether a command is queued or awaiting its ack
    fn is_busy(&self) -> bool;

    /// Claim the link for one command, or drop it if the link is busy
    fn try_submit(&self, command: DroneCommand) -> Result<PendingReply, LinkError>;

    /// Queue a command behind any in-flight one and wait for its outcome
    async fn send(&self, command: DroneCommand) -> Result<Response, LinkError>;
}

/// Cloneable handle onto the connection manager's send queue
#[derive(Clone)]
pub struct LinkHandle {
    requests: mpsc::Sender<LinkRequest>,
    status: Arc<LinkStatus>,
    pending: Arc<AtomicUsize>,
}

impl LinkHandle {
    pub fn new(
        requests: mpsc::Sender<LinkRequest>,
        status: Arc<LinkStatus>,
        pending: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            requests,
            status,
            pending,
        }
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        self.status.current()
    }

    fn ensure_ready(&self) -> Result<(), LinkError> {
        match self.status.current() {
            LinkState::Connected => Ok(()),
            other => Err(LinkError::NotReady(other)),
        }
    }
}

#[async_trait]
impl CommandLink for LinkHandle {
    fn is_busy(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }

    fn try_submit(&self, command: DroneCommand) -> Result<PendingReply, LinkError> {
        self.ensure_ready()?;

        if self
            .pending
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(LinkError::Busy);
        }

        let (tx, rx) = oneshot::channel();
        let request = LinkRequest {
            command,
            enqueued_at: Instant::now(),
            reply: tx,
        };

        match self.requests.try_send(request) {
            Ok(()) => Ok(PendingReply::new(rx)),
            Err(TrySendError::Full(_)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Err(LinkError::Busy)
            }
            Err(TrySendError::Closed(_)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Err(LinkError::Closed)
            }
        }
    }

    async fn send(&self, command: DroneCommand) -> Result<Response, LinkError> {
        self.ensure_ready()?;

        let (tx, rx) = oneshot::channel();
        let request = LinkRequest {
            command,
            enqueued_at: Instant::now(),
            reply: tx,
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.requests.send(request).await.is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(LinkError::Closed);
        }

        PendingReply::new(rx).wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_in_state(state: LinkState) -> (LinkHandle, mpsc::Receiver<LinkRequest>) {
        let (tx, rx) = mpsc::channel(4);
        let status = Arc::new(LinkStatus::new());
        status.state_tx.send_replace(state);
        (
            LinkHandle::new(tx, status, Arc::new(AtomicUsize::new(0))),
            rx,
        )
    }

    #[tokio::test]
    async fn test_rejects_when_not_connected() {
        let (handle, _rx) = handle_in_state(LinkState::Disconnected);
        let result = handle.send(DroneCommand::Takeoff).await;
        assert!(matches!(
            result,
            Err(LinkError::NotReady(LinkState::Disconnected))
        ));

        let (handle, _rx) = handle_in_state(LinkState::Lost);
        assert!(matches!(
            handle.try_submit(DroneCommand::Takeoff),
            Err(LinkError::NotReady(LinkState::Lost))
        ));
    }

    #[tokio::test]
    async fn test_try_submit_claims_link_once() {
        let (handle, mut rx) = handle_in_state(LinkState::Connected);

        let first = handle
            .try_submit(DroneCommand::Takeoff)
            .expect("first submit should claim the link");
        assert!(handle.is_busy());
        assert!(matches!(
            handle.try_submit(DroneCommand::Land),
            Err(LinkError::Busy)
        ));

        // Play the service: resolve the queued request
        let request = rx.recv().await.expect("request queued");
        assert_eq!(request.command, DroneCommand::Takeoff);
        handle.pending.fetch_sub(1, Ordering::SeqCst);
        let _ = request.reply.send(Ok(Response::Ok));

        assert_eq!(first.wait().await.expect("reply"), Response::Ok);
        assert!(!handle.is_busy());
    }

    #[tokio::test]
    async fn test_dropped_reply_reports_closed() {
        let (handle, mut rx) = handle_in_state(LinkState::Connected);
        let pending = handle
            .try_submit(DroneCommand::Takeoff)
            .expect("submit");
        drop(rx.recv().await);
        assert!(matches!(pending.wait().await, Err(LinkError::Closed)));
    }

    #[tokio::test]
    async fn test_status_publishes_transitions() {
        let status = LinkStatus::new();
        let mut watcher = status.subscribe();

        status.apply(LinkEvent::ConnectRequested).await;
        assert!(watcher.has_changed().expect("sender alive"));
        assert_eq!(*watcher.borrow_and_update(), LinkState::Connecting);

        let invalid = status.apply(LinkEvent::LinkDropped).await;
        assert!(matches!(invalid, TransitionResult::Invalid { .. }));
        assert_eq!(status.current(), LinkState::Connecting);
    }
}
