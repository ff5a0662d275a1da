//! Session configuration and the main control loop

use crate::command::{
    classify_line, parse_intent, CommandDispatcher, DispatchError, DispatchOutcome, Intent,
    KeyAction, OperatorInput, Resolved,
};
use crate::connection::{CommandLink, ConnectionConfig, LinkError};
use crate::detection::{Detector, TargetClass};
use crate::telemetry::TelemetryConfig;
use crate::tracking::{Correction, TrackingConfig, TrackingController};
use crate::video::{Frame, VideoConfig};
use crate::voice::VoiceCommandService;
use std::sync::Arc;
use std::time::Duration;
use std::io::BufRead;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long shutdown waits for in-flight operator commands
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Everything a session needs to start
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connection: ConnectionConfig,
    pub video: VideoConfig,
    pub tracking: TrackingConfig,
    pub telemetry: TelemetryConfig,
    pub target: TargetClass,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            video: VideoConfig::default(),
            tracking: TrackingConfig::default(),
            telemetry: TelemetryConfig::default(),
            target: TargetClass::Face,
        }
    }
}

impl SessionConfig {
    /// Defaults with `TELLO_ADDR`, `TELLO_BIND` and `TELLO_TARGET` applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("TELLO_ADDR").filter(|v| !v.is_empty()) {
            self.connection.drone_addr = addr;
        }
        if let Some(bind) = lookup("TELLO_BIND").filter(|v| !v.is_empty()) {
            self.connection.bind_addr = bind;
        }
        if let Some(target) = lookup("TELLO_TARGET").filter(|v| !v.is_empty()) {
            match target.parse::<TargetClass>() {
                Ok(target) => self.target = target,
                Err(e) => warn!("[TRACK] Ignoring TELLO_TARGET: {}", e),
            }
        }
    }
}

/// Why the control loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Quit,
    Cancelled,
    InputClosed,
}

/// Per-frame tracking plus operator command handling
pub struct ControlLoop<L> {
    link: L,
    controller: TrackingController,
    dispatcher: CommandDispatcher,
    detector: Arc<dyn Detector>,
    target: TargetClass,
    voice: VoiceCommandService,
    frames: watch::Receiver<Option<Arc<Frame>>>,
    operator: mpsc::Receiver<OperatorInput>,
    voice_tx: mpsc::Sender<String>,
    voice_rx: mpsc::Receiver<String>,
    tasks: JoinSet<()>,
}

impl<L> ControlLoop<L>
where
    L: CommandLink + Clone + 'static,
{
    pub fn new(
        link: L,
        controller: TrackingController,
        detector: Arc<dyn Detector>,
        target: TargetClass,
        voice: VoiceCommandService,
        frames: watch::Receiver<Option<Arc<Frame>>>,
        operator: mpsc::Receiver<OperatorInput>,
    ) -> Self {
        let (voice_tx, voice_rx) = mpsc::channel(1);
        Self {
            link,
            controller,
            dispatcher: CommandDispatcher::default(),
            detector,
            target,
            voice,
            frames,
            operator,
            voice_tx,
            voice_rx,
            tasks: JoinSet::new(),
        }
    }

    pub fn controller(&self) -> &TrackingController {
        &self.controller
    }

    /// Run until quit, cancellation or end of operator input
    pub async fn run(mut self, cancel: CancellationToken) -> LoopExit {
        let mut video_alive = true;
        let mut input_open = true;

        let exit = loop {
            tokio::select! {
                _ = cancel.cancelled() => break LoopExit::Cancelled,

                changed = self.frames.changed(), if video_alive => {
                    match changed {
                        Ok(()) => {
                            let frame = self.frames.borrow_and_update().clone();
                            if let Some(frame) = frame {
                                self.on_frame(frame).await;
                            }
                        }
                        Err(_) => {
                            warn!("[TRACK] Video flow ended, tracking suspended");
                            video_alive = false;
                        }
                    }
                }

                input = self.operator.recv(), if input_open => {
                    match input {
                        Some(input) => {
                            if self.on_input(input) == Some(LoopExit::Quit) {
                                break LoopExit::Quit;
                            }
                        }
                        None => {
                            input_open = false;
                            if !video_alive {
                                break LoopExit::InputClosed;
                            }
                        }
                    }
                }

                Some(sentence) = self.voice_rx.recv() => {
                    self.on_sentence(&sentence);
                }

                Some(_) = self.tasks.join_next(), if !self.tasks.is_empty() => {}
            }

            if !input_open && !video_alive {
                break LoopExit::InputClosed;
            }
        };

        // Let commands already handed to the link finish, within reason
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while self.tasks.join_next().await.is_some() {}
        })
        .await
        .is_ok();
        if !drained {
            debug!("[TRACK] Abandoning {} pending task(s)", self.tasks.len());
            self.tasks.shutdown().await;
        }
        info!("[TRACK] Control loop stopped ({:?})", exit);
        exit
    }

    /// One control tick
    async fn on_frame(&mut self, frame: Arc<Frame>) {
        if !self.controller.is_active() {
            return;
        }

        let detector = self.detector.clone();
        let target = self.target;
        let threshold = self.threshold();
        let seen = frame.clone();
        let detection = match tokio::task::spawn_blocking(move || {
            detector.detect(&seen, target, threshold)
        })
        .await
        {
            Ok(detection) => detection,
            Err(e) => {
                warn!("[TRACK] Detector failed on frame {}: {}", frame.sequence, e);
                return;
            }
        };

        let corrections = self.controller.process(&frame, detection.as_ref());
        self.submit_corrections(&corrections);
    }

    fn threshold(&self) -> f32 {
        self.controller.confidence_threshold()
    }

    /// Submit corrections in priority order; stop at the first one the link refuses
    pub fn submit_corrections(&mut self, corrections: &[Correction]) -> usize {
        let mut submitted = 0;

        for (i, correction) in corrections.iter().enumerate() {
            let (command, violation) = self.dispatcher.correction_command(correction);
            if let Some(violation) = violation {
                warn!("[TRACK] {} correction: {}", correction.axis, violation);
            }

            match self.link.try_submit(command.clone()) {
                Ok(reply) => {
                    submitted += 1;
                    let axis = correction.axis;
                    self.tasks.spawn(async move {
                        match reply.wait().await {
                            Ok(response) if response.is_ok() => {
                                debug!("[TRACK] {} '{}' acked", axis, command)
                            }
                            Ok(response) => {
                                warn!("[TRACK] {} '{}' rejected: {}", axis, command, response)
                            }
                            Err(e) => warn!("[TRACK] {} '{}' failed: {}", axis, command, e),
                        }
                    });
                }
                Err(LinkError::Busy) => {
                    debug!(
                        "[TRACK] Link busy, dropping {} correction(s)",
                        corrections.len() - i
                    );
                    break;
                }
                Err(e) => {
                    debug!("[TRACK] Correction not sent: {}", e);
                    break;
                }
            }
        }

        submitted
    }

    /// Handle one operator input; returns Quit when the session should end
    fn on_input(&mut self, input: OperatorInput) -> Option<LoopExit> {
        match input {
            OperatorInput::Key(KeyAction::Quit) => {
                info!("[CMD] Quit requested");
                return Some(LoopExit::Quit);
            }
            OperatorInput::Key(KeyAction::ToggleRecording) => {
                warn!("[CMD] Video recording is not available");
            }
            OperatorInput::Key(KeyAction::VoiceCommand) => self.start_voice_capture(),
            OperatorInput::Key(KeyAction::Intent(intent)) => self.on_intent(intent),
            OperatorInput::Sentence(sentence) => self.on_sentence(&sentence),
        }
        None
    }

    fn on_sentence(&mut self, sentence: &str) {
        match parse_intent(sentence) {
            Ok(intent) => self.on_intent(intent),
            Err(e) => warn!("[CMD] {}", DispatchError::Parse(e)),
        }
    }

    fn on_intent(&mut self, intent: Intent) {
        match self.dispatcher.resolve(&intent) {
            Ok(Resolved::ToggleTracking) => {
                self.controller.toggle();
            }
            Ok(Resolved::Drone { .. }) => {
                let dispatcher = self.dispatcher.clone();
                let link = self.link.clone();
                self.tasks.spawn(async move {
                    match dispatcher.dispatch(&intent, &link).await {
                        Ok(DispatchOutcome::Sent { command, response, .. }) => {
                            info!("[CMD] '{}' -> {}", command, response)
                        }
                        Ok(DispatchOutcome::ToggleTracking) => {}
                        Err(DispatchError::Link(e @ LinkError::CommandTimeout { .. })) => {
                            warn!("[CMD] {}", e)
                        }
                        Err(e) => error!("[CMD] {}", e),
                    }
                });
            }
            Err(e) => warn!("[CMD] {}", DispatchError::Parse(e)),
        }
    }

    fn start_voice_capture(&mut self) {
        if !self.voice.is_available() {
            warn!("[CMD] Voice commands are not available");
            return;
        }
        let voice = self.voice.clone();
        let tx = self.voice_tx.clone();
        self.tasks.spawn(async move {
            match voice.capture_sentence().await {
                Ok(sentence) => {
                    let _ = tx.send(sentence).await;
                }
                Err(e) => warn!("[CMD] {}", e),
            }
        });
    }
}

/// Forward stdin lines as operator input until EOF or cancellation
///
/// Reads on a plain thread: a blocked stdin read never holds up runtime
/// shutdown, the thread is simply left behind when the process exits.
pub fn spawn_stdin_reader(
    tx: mpsc::Sender<OperatorInput>,
    cancel: CancellationToken,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    spawn_line_reader(std::io::BufReader::new(std::io::stdin()), tx, cancel)
}

fn spawn_line_reader<R>(
    reader: R,
    tx: mpsc::Sender<OperatorInput>,
    cancel: CancellationToken,
) -> std::io::Result<std::thread::JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    std::thread::Builder::new()
        .name("operator-input".into())
        .spawn(move || {
            for line in reader.lines() {
                if cancel.is_cancelled() {
                    break;
                }
                match line {
                    Ok(line) => {
                        if let Some(input) = classify_line(&line) {
                            if tx.blocking_send(input).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("[CMD] Failed to read operator input: {}", e);
                        break;
                    }
                }
            }
            debug!("[CMD] Operator input closed");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::PendingReply;
    use crate::detection::{BoundingBox, Detection, NullDetector};
    use crate::tracking::Axis;
    use crate::video::FrameSlot;
    use async_trait::async_trait;
    use bytes::Bytes;
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tello_shared::{DroneCommand, Response};
    use tokio::time::Instant;

    /// Link with one slot: a submitted command holds it until `release`
    #[derive(Clone, Default)]
    struct OneSlotLink {
        pending: Arc<AtomicUsize>,
        log: Arc<Mutex<Vec<DroneCommand>>>,
    }

    impl OneSlotLink {
        fn release(&self) {
            self.pending.store(0, Ordering::SeqCst);
        }

        fn log(&self) -> Vec<DroneCommand> {
            self.log.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl CommandLink for OneSlotLink {
        fn is_busy(&self) -> bool {
            self.pending.load(Ordering::SeqCst) > 0
        }

        fn try_submit(&self, command: DroneCommand) -> Result<PendingReply, LinkError> {
            if self
                .pending
                .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Err(LinkError::Busy);
            }
            self.log.lock().expect("lock").push(command);
            Ok(PendingReply::ready(Ok(Response::Ok)))
        }

        async fn send(&self, command: DroneCommand) -> Result<Response, LinkError> {
            self.log.lock().expect("lock").push(command);
            Ok(Response::Ok)
        }
    }

    /// Always sees the same subject
    struct FixedDetector(Detection);

    impl Detector for FixedDetector {
        fn candidates(&self, _: &Frame) -> Vec<Detection> {
            vec![self.0.clone()]
        }
    }

    fn frame(sequence: u64) -> Arc<Frame> {
        Arc::new(Frame {
            raw: Bytes::from_static(&[0, 0, 0, 1]),
            image: RgbImage::new(640, 480),
            sequence,
            captured_at: Instant::now(),
        })
    }

    fn control_loop(
        link: OneSlotLink,
        detector: Arc<dyn Detector>,
        slot: &FrameSlot,
    ) -> (ControlLoop<OneSlotLink>, mpsc::Sender<OperatorInput>) {
        let (tx, rx) = mpsc::channel(8);
        let control = ControlLoop::new(
            link,
            TrackingController::default(),
            detector,
            TargetClass::Face,
            VoiceCommandService::disabled(),
            slot.subscribe(),
            rx,
        );
        (control, tx)
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SessionConfig::default();
        config.apply_overrides(|key| match key {
            "TELLO_ADDR" => Some("127.0.0.1:9889".into()),
            _ => None,
        });
        assert_eq!(config.connection.drone_addr, "127.0.0.1:9889");
        assert_eq!(config.connection.bind_addr, "0.0.0.0:8889");
        assert_eq!(config.target, TargetClass::Face);

        config.apply_overrides(|key| match key {
            "TELLO_TARGET" => Some("person".into()),
            _ => None,
        });
        assert_eq!(config.target, TargetClass::Person);

        config.apply_overrides(|key| match key {
            "TELLO_TARGET" => Some("cat".into()),
            _ => None,
        });
        assert_eq!(config.target, TargetClass::Person);
    }

    #[tokio::test]
    async fn test_one_correction_in_flight_per_tick() {
        let link = OneSlotLink::default();
        let slot = FrameSlot::new();
        let subject = Detection {
            bbox: BoundingBox::new(560.0, 420.0, 40.0, 40.0),
            confidence: 0.9,
            label: TargetClass::Face,
        };
        let (mut control, _tx) = control_loop(
            link.clone(),
            Arc::new(FixedDetector(subject)),
            &slot,
        );
        control.controller.set_active(true);

        // Distance, Rotation and Vertical all fire; only Distance gets the link
        control.on_frame(frame(1)).await;
        assert_eq!(
            link.log(),
            vec![DroneCommand::Move {
                direction: tello_shared::Direction::Forward,
                cm: 50
            }]
        );

        // Still in flight: the next tick's corrections are dropped
        control.on_frame(frame(2)).await;
        assert_eq!(link.log().len(), 1);

        link.release();
        control.on_frame(frame(3)).await;
        assert_eq!(link.log().len(), 2);
    }

    /// Model that takes a while and finds nothing
    struct SlowDetector(Duration);

    impl Detector for SlowDetector {
        fn candidates(&self, _: &Frame) -> Vec<Detection> {
            std::thread::sleep(self.0);
            Vec::new()
        }
    }

    #[tokio::test]
    async fn test_slow_detector_leaves_runtime_responsive() {
        let slot = FrameSlot::new();
        let (mut control, _tx) = control_loop(
            OneSlotLink::default(),
            Arc::new(SlowDetector(Duration::from_millis(100))),
            &slot,
        );

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        control.on_frame(frame(1)).await;
        ticker.abort();
        assert!(ticks.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_corrections_follow_submission_order() {
        let link = OneSlotLink::default();
        let slot = FrameSlot::new();
        let (mut control, _tx) = control_loop(link.clone(), Arc::new(NullDetector), &slot);

        let corrections = [
            Correction {
                axis: Axis::Rotation,
                action: crate::tracking::CorrectionAction::Rotate(
                    tello_shared::RotationDirection::Clockwise,
                ),
                step: 15,
                error: 100.0,
            },
            Correction {
                axis: Axis::Vertical,
                action: crate::tracking::CorrectionAction::Move(tello_shared::Direction::Down),
                step: 20,
                error: 90.0,
            },
        ];
        assert_eq!(control.submit_corrections(&corrections), 1);
        assert_eq!(link.log()[0].to_string(), "cw 15");
    }

    #[tokio::test]
    async fn test_operator_input_flow() {
        let link = OneSlotLink::default();
        let slot = FrameSlot::new();
        let (control, tx) = control_loop(link.clone(), Arc::new(NullDetector), &slot);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(control.run(cancel.clone()));

        tx.send(OperatorInput::Key(KeyAction::Intent(Intent::Takeoff)))
            .await
            .expect("send");
        tx.send(OperatorInput::Sentence("go up 3 meters".into()))
            .await
            .expect("send");
        tx.send(OperatorInput::Sentence("sing a song".into()))
            .await
            .expect("send");
        tx.send(OperatorInput::Key(KeyAction::Quit))
            .await
            .expect("send");

        let exit = task.await.expect("join");
        assert_eq!(exit, LoopExit::Quit);

        let sent: Vec<String> = link.log().iter().map(|c| c.to_string()).collect();
        assert!(sent.contains(&"takeoff".to_string()));
        assert!(sent.contains(&"up 300".to_string()));
        assert_eq!(sent.len(), 2);
    }

    #[tokio::test]
    async fn test_toggle_tracking_is_local() {
        let link = OneSlotLink::default();
        let slot = FrameSlot::new();
        let (mut control, _tx) = control_loop(link.clone(), Arc::new(NullDetector), &slot);

        assert!(control.controller().is_active());
        control.on_input(OperatorInput::Key(KeyAction::Intent(Intent::ToggleTracking)));
        assert!(!control.controller().is_active());
        control.on_sentence("start tracking");
        assert!(control.controller().is_active());
        assert!(link.log().is_empty());
    }

    /// Reader whose first read blocks until the sender side is dropped
    struct StalledInput(std::sync::mpsc::Receiver<()>);

    impl std::io::Read for StalledInput {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    #[test]
    fn test_blocked_input_does_not_hold_runtime_shutdown() {
        let (release, stalled) = std::sync::mpsc::channel::<()>();
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let (tx, _rx) = mpsc::channel(1);

        runtime.block_on(async {
            spawn_line_reader(
                std::io::BufReader::new(StalledInput(stalled)),
                tx,
                CancellationToken::new(),
            )
            .expect("spawn reader");
        });

        let started = std::time::Instant::now();
        drop(runtime);
        assert!(started.elapsed() < Duration::from_secs(1));
        drop(release);
    }

    #[tokio::test]
    async fn test_line_reader_forwards_keys_and_sentences() {
        let (tx, mut rx) = mpsc::channel(4);
        let input = std::io::Cursor::new("t\ngo up 3 meters\n\nq\n");
        let reader = spawn_line_reader(input, tx, CancellationToken::new()).expect("spawn");

        assert_eq!(
            rx.recv().await,
            Some(OperatorInput::Key(KeyAction::Intent(Intent::Takeoff)))
        );
        assert_eq!(
            rx.recv().await,
            Some(OperatorInput::Sentence("go up 3 meters".into()))
        );
        assert_eq!(rx.recv().await, Some(OperatorInput::Key(KeyAction::Quit)));
        assert_eq!(rx.recv().await, None);
        reader.join().expect("reader thread");
    }

    #[tokio::test]
    async fn test_cancel_stops_loop() {
        let slot = FrameSlot::new();
        let (control, _tx) = control_loop(OneSlotLink::default(), Arc::new(NullDetector), &slot);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(control.run(cancel).await, LoopExit::Cancelled);
    }
}
