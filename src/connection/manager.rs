//! Connection manager for the device command link

use super::ack::{AckMatch, AckTracker};
use super::link::{CommandLink, LinkError, LinkHandle, LinkRequest, LinkStatus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tello_shared::{
    codec, limits, ports, DroneCommand, LinkEvent, LinkState, Response,
};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Device command endpoint
    pub drone_addr: String,
    /// Local address the device replies to
    pub bind_addr: String,
    /// How long to wait for each reply
    pub ack_timeout: Duration,
    /// Resends of a command after the first transmission
    pub command_retries: u32,
    /// Handshake transmissions before giving up
    pub handshake_attempts: u32,
    /// Delay before the first resend
    pub retry_delay: Duration,
    /// Maximum resend delay
    pub max_retry_delay: Duration,
    /// Commands that may wait behind the in-flight one
    pub queue_depth: usize,
    /// Abandoned commands in a row before the link is declared lost
    pub max_consecutive_timeouts: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            drone_addr: ports::DRONE_COMMAND_ADDR.into(),
            bind_addr: format!("0.0.0.0:{}", ports::LOCAL_COMMAND_PORT),
            ack_timeout: Duration::from_millis(limits::COMMAND_ACK_TIMEOUT_MS),
            command_retries: limits::COMMAND_MAX_RETRIES,
            handshake_attempts: limits::HANDSHAKE_ATTEMPTS,
            retry_delay: Duration::from_millis(250),
            max_retry_delay: Duration::from_secs(2),
            queue_depth: 8,
            max_consecutive_timeouts: limits::MAX_CONSECUTIVE_TIMEOUTS,
        }
    }
}

/// How many times to transmit and how long to wait between attempts
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    attempts: u32,
    ack_timeout: Duration,
    delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    fn handshake(config: &ConnectionConfig) -> Self {
        Self {
            attempts: config.handshake_attempts.max(1),
            ack_timeout: config.ack_timeout,
            delay: config.retry_delay,
            max_delay: config.max_retry_delay,
        }
    }

    fn command(config: &ConnectionConfig) -> Self {
        Self {
            attempts: config.command_retries + 1,
            ack_timeout: config.ack_timeout,
            delay: config.retry_delay,
            max_delay: config.max_retry_delay,
        }
    }
}

/// What the link service owns between runs
struct ServiceParts {
    requests: mpsc::Receiver<LinkRequest>,
    tracker: AckTracker,
}

struct RunningService {
    cancel: CancellationToken,
    task: JoinHandle<ServiceParts>,
}

/// Owns the command socket and serializes commands to the device
pub struct ConnectionManager {
    config: ConnectionConfig,
    status: Arc<LinkStatus>,
    /// Commands queued or awaiting their ack
    pending: Arc<AtomicUsize>,
    request_tx: mpsc::Sender<LinkRequest>,
    /// Queue and tracker while no service task is running
    parked: Option<ServiceParts>,
    service: Option<RunningService>,
}

impl ConnectionManager {
    /// Create a new connection manager in Disconnected state
    pub fn new(config: ConnectionConfig) -> Self {
        let (request_tx, requests) = mpsc::channel(config.queue_depth.max(1));
        let tracker = AckTracker::with_settle(config.ack_timeout);

        Self {
            config,
            status: Arc::new(LinkStatus::new()),
            pending: Arc::new(AtomicUsize::new(0)),
            request_tx,
            parked: Some(ServiceParts { requests, tracker }),
            service: None,
        }
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        self.status.current()
    }

    /// Recent link state transitions
    pub async fn history(&self) -> Vec<(LinkState, LinkState)> {
        self.status.history().await
    }

    /// Watch link state changes
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<LinkState> {
        self.status.subscribe()
    }

    /// Get a cloneable handle for submitting commands
    pub fn handle(&self) -> LinkHandle {
        LinkHandle::new(
            self.request_tx.clone(),
            self.status.clone(),
            self.pending.clone(),
        )
    }

    /// Get the configuration
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Perform the handshake and start the link service
    pub async fn connect(&mut self) -> Result<(), LinkError> {
        if self.state() == LinkState::Connected {
            return Ok(());
        }

        self.stop_service().await;
        let mut parts = match self.parked.take() {
            Some(parts) => parts,
            None => self.rebuild_queue(),
        };

        self.status.apply(LinkEvent::ConnectRequested).await;
        info!(
            "[LINK] Connecting to {} (local {})",
            self.config.drone_addr, self.config.bind_addr
        );

        let socket = match bind_socket(&self.config).await {
            Ok(socket) => socket,
            Err(e) => {
                error!("[LINK] Failed to open command socket: {}", e);
                self.parked = Some(parts);
                self.status.apply(LinkEvent::Closed).await;
                return Err(LinkError::Io(e));
            }
        };

        let policy = RetryPolicy::handshake(&self.config);
        let cancel = CancellationToken::new();
        let outcome = exchange(
            &socket,
            &mut parts.tracker,
            &DroneCommand::Handshake,
            Instant::now(),
            &policy,
            &cancel,
        )
        .await;

        match outcome {
            Ok(Response::Error(detail)) => {
                error!("[LINK] Device refused the handshake: {}", detail);
                self.parked = Some(parts);
                self.status.apply(LinkEvent::RetriesExhausted).await;
                Err(LinkError::Connection {
                    attempts: policy.attempts,
                })
            }
            Ok(_) => {
                self.status.apply(LinkEvent::HandshakeAcked).await;
                info!("[LINK] Connected to {}", self.config.drone_addr);

                let cancel = CancellationToken::new();
                let task = tokio::spawn(service_loop(
                    socket,
                    parts,
                    self.config.clone(),
                    self.status.clone(),
                    self.pending.clone(),
                    cancel.clone(),
                ));
                self.service = Some(RunningService { cancel, task });
                Ok(())
            }
            Err(e) => {
                error!(
                    "[LINK] No handshake reply after {} attempts, link lost ({})",
                    policy.attempts, e
                );
                self.parked = Some(parts);
                self.status.apply(LinkEvent::RetriesExhausted).await;
                Err(LinkError::Connection {
                    attempts: policy.attempts,
                })
            }
        }
    }

    /// Send a command and wait for its ack
    pub async fn send_command(&self, command: DroneCommand) -> Result<Response, LinkError> {
        self.handle().send(command).await
    }

    /// Cancel pending commands, release the socket and disconnect
    pub async fn close(&mut self) {
        self.stop_service().await;
        self.status.apply(LinkEvent::Closed).await;
        info!("[LINK] Closed");
    }

    /// Stop the service task and fail anything still queued
    async fn stop_service(&mut self) {
        if let Some(service) = self.service.take() {
            service.cancel.cancel();
            match service.task.await {
                Ok(parts) => self.parked = Some(parts),
                Err(e) => {
                    error!("[LINK] Service task failed: {}", e);
                    let parts = self.rebuild_queue();
                    self.parked = Some(parts);
                }
            }
        }

        if let Some(parts) = self.parked.as_mut() {
            fail_queued(&mut parts.requests, &self.pending, || LinkError::Closed);
        }
    }

    /// Replace a queue whose receiver was lost with a panicked task
    fn rebuild_queue(&mut self) -> ServiceParts {
        let (request_tx, requests) = mpsc::channel(self.config.queue_depth.max(1));
        self.request_tx = request_tx;
        self.pending.store(0, Ordering::SeqCst);
        ServiceParts {
            requests,
            tracker: AckTracker::with_settle(self.config.ack_timeout),
        }
    }
}

/// Bind the local command port and aim it at the device
async fn bind_socket(config: &ConnectionConfig) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind(&config.bind_addr).await?;
    socket.connect(&config.drone_addr).await?;
    Ok(socket)
}

/// Drain the send queue one command at a time
async fn service_loop(
    socket: UdpSocket,
    mut parts: ServiceParts,
    config: ConnectionConfig,
    status: Arc<LinkStatus>,
    pending: Arc<AtomicUsize>,
    cancel: CancellationToken,
) -> ServiceParts {
    let policy = RetryPolicy::command(&config);
    let mut consecutive_timeouts = 0u32;

    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = parts.requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let outcome = exchange(
            &socket,
            &mut parts.tracker,
            &request.command,
            request.enqueued_at,
            &policy,
            &cancel,
        )
        .await;

        match &outcome {
            Ok(Response::Error(detail)) => {
                consecutive_timeouts = 0;
                warn!("[LINK] Device rejected '{}': {}", request.command, detail);
            }
            Ok(response) => {
                consecutive_timeouts = 0;
                debug!(
                    "[LINK] '{}' -> {} ({}ms)",
                    request.command,
                    response,
                    request.enqueued_at.elapsed().as_millis()
                );
            }
            Err(LinkError::CommandTimeout { command, attempts }) => {
                consecutive_timeouts += 1;
                warn!(
                    "[LINK] Command '{}' abandoned after {} attempts ({} in a row)",
                    command, attempts, consecutive_timeouts
                );
            }
            Err(e) => {
                debug!("[LINK] '{}' failed: {}", request.command, e);
            }
        }

        pending.fetch_sub(1, Ordering::SeqCst);
        let _ = request.reply.send(outcome);

        if consecutive_timeouts >= config.max_consecutive_timeouts.max(1) {
            error!(
                "[LINK] {} commands in a row went unanswered, link lost",
                consecutive_timeouts
            );
            status.apply(LinkEvent::LinkDropped).await;
            break;
        }
    }

    let state = status.current();
    fail_queued(&mut parts.requests, &pending, || {
        if state == LinkState::Connected {
            LinkError::Closed
        } else {
            LinkError::NotReady(state)
        }
    });

    debug!(
        "[LINK] Service stopped ({} late replies discarded)",
        parts.tracker.late_replies()
    );
    parts
}

/// Reply to every queued request with an error
fn fail_queued(
    requests: &mut mpsc::Receiver<LinkRequest>,
    pending: &AtomicUsize,
    make_error: impl Fn() -> LinkError,
) {
    while let Ok(request) = requests.try_recv() {
        pending.fetch_sub(1, Ordering::SeqCst);
        let _ = request.reply.send(Err(make_error()));
    }
}

/// Send one command and wait for its reply, resending per the policy
async fn exchange(
    socket: &UdpSocket,
    tracker: &mut AckTracker,
    command: &DroneCommand,
    enqueued_at: Instant,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Response, LinkError> {
    drain_stale(socket, tracker);
    if settle(socket, tracker, cancel).await == Reply::Cancelled {
        return Err(LinkError::Closed);
    }

    let payload = codec::encode(command)?;
    let seq = tracker.begin(command.clone(), enqueued_at);
    let mut delay = policy.delay;

    for attempt in 1..=policy.attempts {
        tracker.record_transmission();
        debug!("[LINK] -> '{}' seq={} attempt={}", command, seq, attempt);

        match socket.send(&payload).await {
            Ok(_) => match await_reply(socket, tracker, policy.ack_timeout, cancel).await {
                Reply::Matched(response) => return Ok(response),
                Reply::TimedOut => {}
                Reply::Cancelled => {
                    tracker.abandon();
                    return Err(LinkError::Closed);
                }
                Reply::Settled => {}
            },
            Err(e) => {
                warn!("[LINK] Send of '{}' failed: {}", command, e);
            }
        }

        if attempt < policy.attempts {
            debug!(
                "[LINK] No reply to '{}' (attempt {}/{}), resending in {:?}",
                command, attempt, policy.attempts, delay
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracker.abandon();
                    return Err(LinkError::Closed);
                }
                _ = sleep(delay) => {}
            }
            delay = std::cmp::min(delay * 2, policy.max_delay);
        }
    }

    if let Some(abandoned) = tracker.abandon() {
        debug!(
            "[LINK] Abandoned seq={} after {} resend(s)",
            abandoned.seq,
            abandoned.retries()
        );
    }
    Err(LinkError::CommandTimeout {
        command: command.to_string(),
        attempts: policy.attempts,
    })
}

#[derive(Debug, PartialEq)]
enum Reply {
    Matched(Response),
    TimedOut,
    Cancelled,
    /// No replies owed any more
    Settled,
}

/// Wait for a reply to the in-flight command until the ack timeout
async fn await_reply(
    socket: &UdpSocket,
    tracker: &mut AckTracker,
    ack_timeout: Duration,
    cancel: &CancellationToken,
) -> Reply {
    let deadline = Instant::now() + ack_timeout;
    let mut buf = [0u8; limits::MAX_REPLY_SIZE];

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => return Reply::Cancelled,
            received = timeout_at(deadline, socket.recv(&mut buf)) => received,
        };

        match received {
            Err(_) => return Reply::TimedOut,
            Ok(Err(e)) => {
                // Typically ICMP port unreachable surfacing on a connected socket
                debug!("[LINK] Receive error: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => return Reply::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => return Reply::TimedOut,
                }
            }
            Ok(Ok(n)) => match codec::decode_reply(&buf[..n]) {
                Ok(response) => match tracker.resolve(response) {
                    AckMatch::Current {
                        seq,
                        response,
                        transmissions,
                    } => {
                        debug!(
                            "[LINK] <- '{}' seq={} after {} transmission(s)",
                            response, seq, transmissions
                        );
                        return Reply::Matched(response);
                    }
                    AckMatch::Late { last_seq } => {
                        debug!("[LINK] Discarding late reply (last seq {:?})", last_seq);
                    }
                },
                Err(e) => {
                    debug!("[LINK] Ignoring undecodable reply: {}", e);
                }
            },
        }
    }
}

/// Wait out replies owed to earlier commands before transmitting
async fn settle(socket: &UdpSocket, tracker: &mut AckTracker, cancel: &CancellationToken) -> Reply {
    let mut buf = [0u8; limits::MAX_REPLY_SIZE];

    while let Some(deadline) = tracker.settle_deadline(Instant::now()) {
        debug!(
            "[LINK] Waiting for {} owed reply(s) before transmitting",
            tracker.owed_replies()
        );
        let received = tokio::select! {
            _ = cancel.cancelled() => return Reply::Cancelled,
            received = timeout_at(deadline, socket.recv(&mut buf)) => received,
        };

        match received {
            Err(_) => {
                tracker.write_off();
                break;
            }
            Ok(Err(e)) => {
                debug!("[LINK] Receive error while settling: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => return Reply::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            Ok(Ok(n)) => {
                if let Ok(response) = codec::decode_reply(&buf[..n]) {
                    if let AckMatch::Late { last_seq } = tracker.resolve(response.clone()) {
                        debug!(
                            "[LINK] Discarding owed reply '{}' (last seq {:?})",
                            response, last_seq
                        );
                    }
                }
            }
        }
    }

    Reply::Settled
}

/// Discard replies that arrived after their command was resolved or abandoned
fn drain_stale(socket: &UdpSocket, tracker: &mut AckTracker) {
    let mut buf = [0u8; limits::MAX_REPLY_SIZE];
    while let Ok(n) = socket.try_recv(&mut buf) {
        if let Ok(response) = codec::decode_reply(&buf[..n]) {
            if let AckMatch::Late { last_seq } = tracker.resolve(response.clone()) {
                debug!(
                    "[LINK] Dropping stale reply '{}' (last seq {:?})",
                    response, last_seq
                );
            }
        }
    }
}
