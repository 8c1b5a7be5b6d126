use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::config::SessionConfig;
use crate::models::error::SessionError;
use crate::models::state::RecordingState;
use crate::models::take::TakeMetadata;
use crate::processing::loop_player::{self, SharedLoopPlayer};
use crate::processing::meter::{self, LevelCell};
use crate::processing::spill_buffer::SpillBuffer;
use crate::storage::sidecar;
use crate::storage::take_reader;
use crate::storage::take_writer::TakeWriter;
use crate::traits::audio_graph::{AudioGraph, GraphEvent, InputTap};
use crate::traits::session_delegate::SessionDelegate;

/// Input level snapshot (RMS and peak, 0.0–1.0).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SessionLevels {
    pub input_rms: f32,
    pub input_peak: f32,
}

/// Counters for debugging a running session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDiagnostics {
    pub tap_callbacks: u64,
    pub samples_captured: u64,
    pub samples_dropped: u64,
    pub frames_written: u64,
    pub write_errors: u64,
    pub recoveries: u64,
}

/// State shared with the realtime tap callback.
///
/// The tap reads the recording flag, pushes into the spill buffer under a
/// short uncontended lock, and publishes levels through atomics. It never
/// touches the take file.
struct CaptureShared {
    recording: AtomicBool,
    spill: Mutex<SpillBuffer>,
    input_rms: LevelCell,
    input_peak: LevelCell,
    tap_callbacks: AtomicU64,
    samples_captured: AtomicU64,
    samples_dropped: AtomicU64,
}

type SharedDelegate = Arc<Mutex<Option<Arc<dyn SessionDelegate>>>>;

/// Duplex voice session controller.
///
/// Owns the graph topology, the recording/playback state machine, and
/// engine recovery. Generic over the graph backend so the full state
/// machine runs against a fake in tests.
///
/// Data flow while recording:
/// ```text
/// [input tap, realtime] → [SpillBuffer] → [writer thread] → [TakeWriter]
/// ```
/// Playback flow:
/// ```text
/// [take file → PlaybackBuffer] → [LoopPlayer] → [output render, realtime]
/// ```
pub struct VoiceSession<G: AudioGraph + 'static> {
    graph: Arc<Mutex<G>>,
    config: SessionConfig,
    player: SharedLoopPlayer,
    capture: Arc<CaptureShared>,
    writer: Arc<Mutex<Option<TakeWriter>>>,
    delegate: SharedDelegate,
    state: RecordingState,
    last_take: Option<TakeMetadata>,
    finalized_frames: Arc<AtomicU64>,
    write_errors: Arc<AtomicU64>,
    recoveries: Arc<AtomicU64>,
    drain_running: Arc<AtomicBool>,
    drain_handle: Option<thread::JoinHandle<()>>,
    monitor_running: Arc<AtomicBool>,
    monitor_handle: Option<thread::JoinHandle<()>>,
    is_setup: bool,
}

impl<G: AudioGraph + 'static> VoiceSession<G> {
    /// Fix the canonical format, wire the player into the graph, request
    /// the preferred hardware rate (best effort), and subscribe to
    /// configuration-change events.
    pub fn new(mut graph: G, config: SessionConfig) -> Result<Self, SessionError> {
        if config.format.sample_rate == 0 || config.format.channels == 0 {
            return Err(SessionError::FormatUnsupported(format!(
                "cannot fix canonical format {}",
                config.format
            )));
        }
        config.validate().map_err(SessionError::ConfigRejected)?;

        let player = loop_player::shared();
        graph.attach_player(Arc::clone(&player));

        // Hardware may clamp to a supported rate; that is not fatal here.
        // Backends reject an unservable canonical format on their own.
        if let Err(e) = graph.request_preferred_sample_rate(config.format.sample_rate) {
            log::warn!("preferred sample rate rejected, continuing: {}", e);
        }

        let events = graph.events();
        let graph = Arc::new(Mutex::new(graph));
        let delegate: SharedDelegate = Arc::new(Mutex::new(None));
        let recoveries = Arc::new(AtomicU64::new(0));
        let monitor_running = Arc::new(AtomicBool::new(true));

        let monitor_handle = Self::spawn_monitor(
            events,
            Arc::clone(&graph),
            Arc::clone(&delegate),
            Arc::clone(&recoveries),
            Arc::clone(&monitor_running),
        );

        let capture = Arc::new(CaptureShared {
            recording: AtomicBool::new(false),
            spill: Mutex::new(SpillBuffer::new(config.spill_capacity_samples())),
            input_rms: LevelCell::new(),
            input_peak: LevelCell::new(),
            tap_callbacks: AtomicU64::new(0),
            samples_captured: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
        });

        Ok(Self {
            graph,
            config,
            player,
            capture,
            writer: Arc::new(Mutex::new(None)),
            delegate,
            state: RecordingState::NoRecording,
            last_take: None,
            finalized_frames: Arc::new(AtomicU64::new(0)),
            write_errors: Arc::new(AtomicU64::new(0)),
            recoveries,
            drain_running: Arc::new(AtomicBool::new(false)),
            drain_handle: None,
            monitor_running,
            monitor_handle: Some(monitor_handle),
            is_setup: false,
        })
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn SessionDelegate>) {
        *self.delegate.lock() = Some(delegate);
    }

    /// Build the graph topology. Called once; later calls are no-ops.
    ///
    /// Voice processing is enabled before anything is connected or tapped,
    /// so a refusal aborts with no partial topology to unwind.
    pub fn setup(&mut self) -> Result<(), SessionError> {
        if self.is_setup {
            return Ok(());
        }

        let mut graph = self.graph.lock();
        graph.enable_voice_processing()?;
        graph.connect(&self.config.format)?;

        let tap = self.build_tap();
        graph.install_input_tap(self.config.tap_buffer_frames, &self.config.format, tap)?;
        graph.prepare();

        self.is_setup = true;
        Ok(())
    }

    /// Start the realtime graph. Retryable on failure.
    pub fn start(&mut self) -> Result<(), SessionError> {
        self.graph.lock().start()
    }

    /// Start the graph only if it is not already running. Safe to call
    /// redundantly; never rebuilds topology.
    pub fn ensure_engine_is_running(&mut self) -> Result<(), SessionError> {
        let mut graph = self.graph.lock();
        if graph.is_running() {
            return Ok(());
        }
        graph.start()
    }

    /// Begin a new take at the configured recording path.
    pub fn start_recording(&mut self) -> Result<(), SessionError> {
        if self.state.is_recording() {
            return Err(SessionError::InvalidState("already recording".into()));
        }

        // The take file is about to be truncated; it must not be feeding
        // the player at the same time.
        self.player.lock().stop();

        let writer = TakeWriter::create(&self.config.recording_path, &self.config.format)?;

        self.capture.spill.lock().clear();
        *self.writer.lock() = Some(writer);
        self.spawn_drain();
        self.capture.recording.store(true, Ordering::Release);
        self.set_state(RecordingState::Recording);
        Ok(())
    }

    /// Stop the current take, flush buffered samples, finalize the file.
    pub fn stop_recording(&mut self) -> Result<TakeMetadata, SessionError> {
        if !self.state.is_recording() {
            return Err(SessionError::InvalidState("not recording".into()));
        }

        self.capture.recording.store(false, Ordering::Release);

        self.drain_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.drain_handle.take() {
            let _ = handle.join();
        }

        // Whatever the tap captured before the flag flipped is still in the
        // spill buffer; flush it before closing.
        Self::drain_spill(
            &self.capture,
            &self.writer,
            &self.write_errors,
            &self.delegate,
            self.drain_chunk_samples(),
        );

        let writer = self
            .writer
            .lock()
            .take()
            .ok_or_else(|| SessionError::Storage("no open take to finalize".into()))?;
        let take = match writer.finalize() {
            Ok(take) => take,
            Err(e) => {
                // The handle is gone either way; the take on disk is not
                // trustworthy, so forget it.
                self.set_state(RecordingState::NoRecording);
                return Err(e);
            }
        };
        self.finalized_frames.store(take.frames, Ordering::Relaxed);

        if self.config.write_sidecar {
            if let Err(e) = sidecar::write_sidecar(&take, &self.config.recording_path) {
                log::warn!("failed to write take sidecar: {}", e);
                self.notify_error(&e);
            }
        }

        self.set_state(RecordingState::Available {
            path: self.config.recording_path.clone(),
        });
        self.last_take = Some(take.clone());
        if let Some(delegate) = self.delegate.lock().clone() {
            delegate.on_take_finished(&take);
        }
        Ok(take)
    }

    /// Start or stop recording depending on the current state.
    pub fn toggle_recording(&mut self) -> Result<(), SessionError> {
        if self.state.is_recording() {
            self.stop_recording().map(|_| ())
        } else {
            self.start_recording()
        }
    }

    /// Toggle loop playback of the last take.
    ///
    /// Playing pauses (position preserved). Otherwise the take is decoded
    /// on first use, scheduled looped on the player, and cached there;
    /// later toggles resume without touching the file. With no take this
    /// is a quiet no-op.
    pub fn toggle_playing(&mut self) -> Result<(), SessionError> {
        {
            let mut player = self.player.lock();
            if player.is_playing() {
                player.pause();
                return Ok(());
            }
        }

        match self.state.clone() {
            RecordingState::Available { path } => {
                let padding = self
                    .config
                    .format
                    .frames_for_millis(self.config.loop_padding_ms);
                let buffer = take_reader::load_take(&path, &self.config.format, padding)?;

                let mut player = self.player.lock();
                player.schedule_looped(buffer);
                player.play();
                drop(player);

                self.set_state(RecordingState::Loaded { path });
                Ok(())
            }
            RecordingState::Loaded { .. } => {
                self.player.lock().play();
                Ok(())
            }
            RecordingState::NoRecording | RecordingState::Recording => {
                log::debug!("playback toggle ignored: no take available");
                Ok(())
            }
        }
    }

    /// Stop recording (if active) and stop the player, discarding its
    /// position. Cleanup before a fresh take or teardown.
    pub fn stop_recording_and_players(&mut self) -> Result<(), SessionError> {
        let result = if self.state.is_recording() {
            self.stop_recording().map(|_| ())
        } else {
            Ok(())
        };
        self.player.lock().stop();
        result
    }

    pub fn is_recording(&self) -> bool {
        self.capture.recording.load(Ordering::Acquire)
    }

    pub fn is_playing(&self) -> bool {
        self.player.lock().is_playing()
    }

    pub fn recording_state(&self) -> RecordingState {
        self.state.clone()
    }

    /// Metadata of the most recently finalized take, if any.
    pub fn last_take(&self) -> Option<&TakeMetadata> {
        self.last_take.as_ref()
    }

    pub fn levels(&self) -> SessionLevels {
        SessionLevels {
            input_rms: self.capture.input_rms.load(),
            input_peak: self.capture.input_peak.load(),
        }
    }

    pub fn diagnostics(&self) -> SessionDiagnostics {
        let frames_written = self
            .writer
            .lock()
            .as_ref()
            .map(|w| w.frames_written())
            .unwrap_or_else(|| self.finalized_frames.load(Ordering::Relaxed));

        SessionDiagnostics {
            tap_callbacks: self.capture.tap_callbacks.load(Ordering::Relaxed),
            samples_captured: self.capture.samples_captured.load(Ordering::Relaxed),
            samples_dropped: self.capture.samples_dropped.load(Ordering::Relaxed),
            frames_written,
            write_errors: self.write_errors.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
        }
    }

    // --- Internal helpers ---

    fn set_state(&mut self, state: RecordingState) {
        self.state = state;
        if let Some(delegate) = self.delegate.lock().clone() {
            delegate.on_recording_state_changed(&self.state);
        }
    }

    fn notify_error(&self, error: &SessionError) {
        if let Some(delegate) = self.delegate.lock().clone() {
            delegate.on_error(error);
        }
    }

    /// The tap callback: realtime-safe, file-free.
    fn build_tap(&self) -> InputTap {
        let shared = Arc::clone(&self.capture);
        Box::new(move |samples: &[f32]| {
            shared.tap_callbacks.fetch_add(1, Ordering::Relaxed);
            shared.input_rms.store(meter::rms_level(samples));
            shared.input_peak.store(meter::peak_level(samples));

            if shared.recording.load(Ordering::Acquire) {
                let dropped = shared.spill.lock().push(samples);
                shared
                    .samples_captured
                    .fetch_add(samples.len() as u64, Ordering::Relaxed);
                if dropped > 0 {
                    shared
                        .samples_dropped
                        .fetch_add(dropped as u64, Ordering::Relaxed);
                }
            }
        })
    }

    fn drain_chunk_samples(&self) -> usize {
        (self.config.format.frames_for_millis(100) * self.config.format.channels as usize).max(1)
    }

    /// Spawn the writer thread moving spill-buffer samples to the take
    /// file every 100 ms for the duration of one recording.
    fn spawn_drain(&mut self) {
        self.drain_running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.drain_running);
        let capture = Arc::clone(&self.capture);
        let writer = Arc::clone(&self.writer);
        let write_errors = Arc::clone(&self.write_errors);
        let delegate = Arc::clone(&self.delegate);
        let chunk = self.drain_chunk_samples();

        let handle = thread::Builder::new()
            .name("take-writer".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(100));
                    Self::drain_spill(&capture, &writer, &write_errors, &delegate, chunk);
                }
            })
            .expect("failed to spawn take-writer thread");

        self.drain_handle = Some(handle);
    }

    /// Move everything currently in the spill buffer into the take file.
    ///
    /// Write failures are counted and reported but never interrupt the
    /// recording; the tap keeps running regardless.
    fn drain_spill(
        capture: &CaptureShared,
        writer: &Mutex<Option<TakeWriter>>,
        write_errors: &AtomicU64,
        delegate: &SharedDelegate,
        chunk: usize,
    ) {
        loop {
            let block = capture.spill.lock().drain(chunk);
            if block.is_empty() {
                return;
            }

            let mut guard = writer.lock();
            let Some(open) = guard.as_mut() else {
                // Stop won the race and closed the take; drop the block.
                return;
            };
            if let Err(e) = open.append(&block) {
                write_errors.fetch_add(1, Ordering::Relaxed);
                log::error!("failed to append captured audio: {}", e);
                drop(guard);
                if let Some(d) = delegate.lock().clone() {
                    d.on_error(&e);
                }
            }
        }
    }

    /// Monitor thread: serializes configuration-change recovery against
    /// control-thread calls through the graph lock.
    fn spawn_monitor(
        events: crossbeam_channel::Receiver<GraphEvent>,
        graph: Arc<Mutex<G>>,
        delegate: SharedDelegate,
        recoveries: Arc<AtomicU64>,
        running: Arc<AtomicBool>,
    ) -> thread::JoinHandle<()> {
        thread::Builder::new()
            .name("graph-monitor".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    match events.recv_timeout(Duration::from_millis(200)) {
                        Ok(GraphEvent::ConfigurationChanged) => {
                            let mut graph = graph.lock();
                            if graph.is_running() {
                                continue;
                            }
                            match graph.start() {
                                Ok(()) => {
                                    recoveries.fetch_add(1, Ordering::Relaxed);
                                    log::info!("engine restarted after configuration change");
                                    drop(graph);
                                    if let Some(d) = delegate.lock().clone() {
                                        d.on_engine_recovered();
                                    }
                                }
                                Err(e) => {
                                    log::warn!("engine restart failed, will retry: {}", e);
                                    drop(graph);
                                    if let Some(d) = delegate.lock().clone() {
                                        d.on_error(&e);
                                    }
                                }
                            }
                        }
                        Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                        Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .expect("failed to spawn graph-monitor thread")
    }
}

impl<G: AudioGraph + 'static> Drop for VoiceSession<G> {
    fn drop(&mut self) {
        self.capture.recording.store(false, Ordering::Release);

        self.drain_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.drain_handle.take() {
            let _ = handle.join();
        }

        self.monitor_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.monitor_handle.take() {
            let _ = handle.join();
        }

        self.player.lock().stop();
        self.graph.lock().stop();
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use crossbeam_channel::{unbounded, Receiver, Sender};
    use parking_lot::Mutex;

    use super::*;
    use crate::models::format::AudioFormat;

    #[derive(Default)]
    struct FakeInner {
        player: Option<SharedLoopPlayer>,
        tap: Option<InputTap>,
        running: bool,
        prepared: bool,
        connected: bool,
        connect_calls: u32,
        tap_installs: u32,
        start_calls: u32,
        fail_voice_processing: bool,
        fail_start: bool,
        hardware_format: AudioFormat,
        preferred_rates: Vec<u32>,
    }

    /// Shared-handle fake graph: the session owns one handle, the test
    /// keeps another to drive taps and events.
    #[derive(Clone)]
    struct FakeGraph {
        inner: Arc<Mutex<FakeInner>>,
        events_tx: Sender<GraphEvent>,
        events_rx: Receiver<GraphEvent>,
    }

    impl FakeGraph {
        fn new() -> Self {
            let (events_tx, events_rx) = unbounded();
            Self {
                inner: Arc::new(Mutex::new(FakeInner {
                    hardware_format: AudioFormat::canonical(),
                    ..Default::default()
                })),
                events_tx,
                events_rx,
            }
        }

        fn with_hardware_format(format: AudioFormat) -> Self {
            let fake = Self::new();
            fake.inner.lock().hardware_format = format;
            fake
        }

        fn fire_tap(&self, samples: &[f32]) {
            let mut inner = self.inner.lock();
            let tap = inner.tap.as_mut().expect("tap not installed");
            tap(samples);
        }

        fn fire_config_change(&self) {
            self.events_tx.send(GraphEvent::ConfigurationChanged).unwrap();
        }

        fn engine_running(&self) -> bool {
            self.inner.lock().running
        }

        fn halt_engine(&self) {
            self.inner.lock().running = false;
        }
    }

    impl AudioGraph for FakeGraph {
        fn attach_player(&mut self, player: SharedLoopPlayer) {
            self.inner.lock().player = Some(player);
        }

        fn request_preferred_sample_rate(&mut self, sample_rate: u32) -> Result<(), SessionError> {
            self.inner.lock().preferred_rates.push(sample_rate);
            Ok(())
        }

        fn enable_voice_processing(&mut self) -> Result<(), SessionError> {
            if self.inner.lock().fail_voice_processing {
                return Err(SessionError::VoiceProcessingUnavailable(
                    "no echo suppression on this input".into(),
                ));
            }
            Ok(())
        }

        fn connect(&mut self, format: &AudioFormat) -> Result<(), SessionError> {
            let mut inner = self.inner.lock();
            if *format != inner.hardware_format {
                return Err(SessionError::FormatUnsupported(format!(
                    "hardware runs {}, requested {}",
                    inner.hardware_format, format
                )));
            }
            if inner.connected {
                return Err(SessionError::Topology("already connected".into()));
            }
            inner.connected = true;
            inner.connect_calls += 1;
            Ok(())
        }

        fn install_input_tap(
            &mut self,
            _buffer_frames: u32,
            format: &AudioFormat,
            tap: InputTap,
        ) -> Result<(), SessionError> {
            let mut inner = self.inner.lock();
            if *format != inner.hardware_format {
                return Err(SessionError::FormatUnsupported(format!(
                    "hardware runs {}, requested {}",
                    inner.hardware_format, format
                )));
            }
            if inner.tap.is_some() {
                return Err(SessionError::Topology("tap already installed".into()));
            }
            inner.tap = Some(tap);
            inner.tap_installs += 1;
            Ok(())
        }

        fn prepare(&mut self) {
            self.inner.lock().prepared = true;
        }

        fn start(&mut self) -> Result<(), SessionError> {
            let mut inner = self.inner.lock();
            if inner.fail_start {
                return Err(SessionError::EngineStart("no valid route".into()));
            }
            inner.running = true;
            inner.start_calls += 1;
            Ok(())
        }

        fn stop(&mut self) {
            self.inner.lock().running = false;
        }

        fn is_running(&self) -> bool {
            self.inner.lock().running
        }

        fn events(&self) -> Receiver<GraphEvent> {
            self.events_rx.clone()
        }
    }

    struct RecordingDelegate {
        states: Mutex<Vec<RecordingState>>,
        takes: Mutex<Vec<TakeMetadata>>,
        errors: Mutex<Vec<SessionError>>,
    }

    impl RecordingDelegate {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                states: Mutex::new(Vec::new()),
                takes: Mutex::new(Vec::new()),
                errors: Mutex::new(Vec::new()),
            })
        }
    }

    impl SessionDelegate for RecordingDelegate {
        fn on_recording_state_changed(&self, state: &RecordingState) {
            self.states.lock().push(state.clone());
        }

        fn on_take_finished(&self, take: &TakeMetadata) {
            self.takes.lock().push(take.clone());
        }

        fn on_engine_recovered(&self) {}

        fn on_error(&self, error: &SessionError) {
            self.errors.lock().push(error.clone());
        }
    }

    fn test_config(name: &str) -> SessionConfig {
        SessionConfig {
            recording_path: std::env::temp_dir().join(format!("voice_loop_session_{}.wav", name)),
            ..Default::default()
        }
    }

    fn session_with_fake(name: &str) -> (VoiceSession<FakeGraph>, FakeGraph) {
        let fake = FakeGraph::new();
        let session = VoiceSession::new(fake.clone(), test_config(name)).unwrap();
        (session, fake)
    }

    #[test]
    fn setup_and_start_leave_recording_off() {
        let (mut session, fake) = session_with_fake("fresh_start");
        session.setup().unwrap();
        session.start().unwrap();

        assert!(fake.engine_running());
        assert!(fake.inner.lock().player.is_some());
        assert!(!session.is_recording());
        assert!(!session.is_playing());
        assert_eq!(session.recording_state(), RecordingState::NoRecording);
    }

    #[test]
    fn construction_requests_preferred_rate() {
        let (_session, fake) = session_with_fake("preferred_rate");
        assert_eq!(fake.inner.lock().preferred_rates, vec![48_000]);
    }

    #[test]
    fn invalid_format_rejected_at_construction() {
        let fake = FakeGraph::new();
        let mut config = test_config("bad_format");
        config.format.sample_rate = 0;

        let err = VoiceSession::new(fake, config).err().unwrap();
        assert!(matches!(err, SessionError::FormatUnsupported(_)));
    }

    #[test]
    fn mismatched_hardware_format_fails_setup() {
        let hw = AudioFormat {
            sample_rate: 44_100,
            ..AudioFormat::canonical()
        };
        let fake = FakeGraph::with_hardware_format(hw);
        let mut session = VoiceSession::new(fake, test_config("mismatch")).unwrap();

        let err = session.setup().unwrap_err();
        assert!(matches!(err, SessionError::FormatUnsupported(_)));
    }

    #[test]
    fn setup_is_idempotent() {
        let (mut session, fake) = session_with_fake("idempotent_setup");
        session.setup().unwrap();
        session.setup().unwrap();
        session.setup().unwrap();

        let inner = fake.inner.lock();
        assert_eq!(inner.connect_calls, 1);
        assert_eq!(inner.tap_installs, 1);
        assert!(inner.prepared);
    }

    #[test]
    fn redundant_recovery_is_noop() {
        let (mut session, fake) = session_with_fake("redundant_recovery");
        session.setup().unwrap();
        session.start().unwrap();

        session.ensure_engine_is_running().unwrap();
        session.ensure_engine_is_running().unwrap();
        session.ensure_engine_is_running().unwrap();

        let inner = fake.inner.lock();
        assert_eq!(inner.start_calls, 1);
        assert_eq!(inner.tap_installs, 1);
        drop(inner);
        assert!(!session.is_recording());
    }

    #[test]
    fn ensure_restarts_stopped_engine() {
        let (mut session, fake) = session_with_fake("ensure_restarts");
        session.setup().unwrap();
        session.start().unwrap();

        fake.halt_engine();
        session.ensure_engine_is_running().unwrap();
        assert!(fake.engine_running());
    }

    #[test]
    fn failed_start_is_retryable() {
        let (mut session, fake) = session_with_fake("failed_start");
        session.setup().unwrap();

        fake.inner.lock().fail_start = true;
        let err = session.start().unwrap_err();
        assert!(matches!(err, SessionError::EngineStart(_)));

        fake.inner.lock().fail_start = false;
        session.start().unwrap();
        assert!(fake.engine_running());
    }

    #[test]
    fn voice_processing_failure_aborts_setup() {
        let (mut session, fake) = session_with_fake("vp_failure");
        fake.inner.lock().fail_voice_processing = true;

        let err = session.setup().unwrap_err();
        assert!(matches!(err, SessionError::VoiceProcessingUnavailable(_)));
        assert!(!fake.inner.lock().connected);

        // The degraded state is recoverable: setup succeeds once the input
        // cooperates, without duplicating anything.
        fake.inner.lock().fail_voice_processing = false;
        session.setup().unwrap();
        assert_eq!(fake.inner.lock().tap_installs, 1);
    }

    #[test]
    fn record_then_stop_produces_playable_take() {
        let (mut session, fake) = session_with_fake("basic_take");
        let delegate = RecordingDelegate::new();
        session.set_delegate(delegate.clone());
        session.setup().unwrap();
        session.start().unwrap();

        session.toggle_recording().unwrap();
        assert!(session.is_recording());

        for _ in 0..8 {
            fake.fire_tap(&[0.25f32; 256]);
        }

        session.toggle_recording().unwrap();
        assert!(!session.is_recording());

        let take = session.last_take().unwrap();
        assert_eq!(take.frames, 8 * 256);
        assert!(!take.checksum.is_empty());

        // The finalized file is non-empty and decodable at the canonical format.
        let buffer = take_reader::load_take(
            &session.config.recording_path,
            &AudioFormat::canonical(),
            0,
        )
        .unwrap();
        assert_eq!(buffer.frames(), 8 * 256);

        assert_eq!(delegate.takes.lock().len(), 1);
        assert!(delegate.errors.lock().is_empty());
        let states = delegate.states.lock();
        assert!(matches!(states[0], RecordingState::Recording));
        assert!(matches!(states[1], RecordingState::Available { .. }));

        std::fs::remove_file(&session.config.recording_path).ok();
    }

    #[test]
    fn tap_ignores_input_while_not_recording() {
        let (mut session, fake) = session_with_fake("tap_gated");
        session.setup().unwrap();
        session.start().unwrap();

        fake.fire_tap(&[0.5f32; 256]);
        let diag = session.diagnostics();
        assert_eq!(diag.tap_callbacks, 1);
        assert_eq!(diag.samples_captured, 0);

        // Levels are still published for metering.
        assert!(session.levels().input_peak > 0.4);
    }

    #[test]
    fn toggle_playing_without_take_is_quiet_noop() {
        let (mut session, _fake) = session_with_fake("no_take_toggle");
        session.setup().unwrap();
        session.start().unwrap();

        session.toggle_playing().unwrap();
        assert!(!session.is_playing());
        assert_eq!(session.recording_state(), RecordingState::NoRecording);
    }

    #[test]
    fn config_change_restarts_stopped_engine() {
        let (mut session, fake) = session_with_fake("engine_recovery");
        session.setup().unwrap();

        assert!(!fake.engine_running());
        fake.fire_config_change();

        // The monitor thread picks the event up asynchronously.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while session.diagnostics().recoveries == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(fake.engine_running());
        assert_eq!(session.diagnostics().recoveries, 1);
    }

    #[test]
    fn config_change_while_running_changes_nothing() {
        let (mut session, fake) = session_with_fake("config_change_running");
        session.setup().unwrap();
        session.start().unwrap();

        fake.fire_config_change();
        thread::sleep(Duration::from_millis(50));

        assert_eq!(fake.inner.lock().start_calls, 1);
        assert_eq!(session.diagnostics().recoveries, 0);
    }

    #[test]
    fn starting_a_take_stops_playback() {
        let (mut session, fake) = session_with_fake("play_vs_record");
        session.setup().unwrap();
        session.start().unwrap();

        session.toggle_recording().unwrap();
        fake.fire_tap(&[0.1f32; 256]);
        session.toggle_recording().unwrap();

        session.toggle_playing().unwrap();
        assert!(session.is_playing());

        // A new take must never truncate the file out from under the player.
        session.start_recording().unwrap();
        assert!(!session.is_playing());
        assert!(session.is_recording());

        session.stop_recording_and_players().unwrap();
        std::fs::remove_file(&session.config.recording_path).ok();
    }

    #[test]
    fn loaded_take_is_not_redecoded() {
        let (mut session, fake) = session_with_fake("buffer_reuse");
        session.setup().unwrap();
        session.start().unwrap();

        session.toggle_recording().unwrap();
        fake.fire_tap(&[0.3f32; 256]);
        session.toggle_recording().unwrap();

        // First toggle decodes and schedules.
        session.toggle_playing().unwrap();
        assert!(session.is_playing());
        assert!(session.recording_state().is_loaded());

        // Remove the file: reuse must not go back to disk.
        std::fs::remove_file(&session.config.recording_path).unwrap();

        session.toggle_playing().unwrap(); // pause
        assert!(!session.is_playing());
        session.toggle_playing().unwrap(); // resume from cache
        assert!(session.is_playing());
    }

    #[test]
    fn toggle_symmetry_closes_the_take_file() {
        let (mut session, fake) = session_with_fake("toggle_symmetry");
        session.setup().unwrap();
        session.start().unwrap();

        session.toggle_recording().unwrap();
        fake.fire_tap(&[0.2f32; 256]);
        session.toggle_recording().unwrap();

        assert_eq!(session.recording_state(), RecordingState::Available {
            path: session.config.recording_path.clone(),
        });

        // A closed, finalized file has a consistent header; hound refuses
        // truncated/unfinalized WAVs.
        let reader = hound::WavReader::open(&session.config.recording_path).unwrap();
        assert_eq!(reader.duration(), 256);

        std::fs::remove_file(&session.config.recording_path).ok();
    }

    #[test]
    fn failed_file_create_leaves_state_machine_alone() {
        let fake = FakeGraph::new();
        let dir = std::env::temp_dir().join("voice_loop_session_as_dir");
        std::fs::create_dir_all(&dir).unwrap();

        let config = SessionConfig {
            recording_path: dir, // a directory cannot be opened for writing
            ..Default::default()
        };
        let mut session = VoiceSession::new(fake, config).unwrap();
        session.setup().unwrap();
        session.start().unwrap();

        let err = session.toggle_recording().unwrap_err();
        assert!(matches!(err, SessionError::FileCreate(_)));
        assert!(!session.is_recording());
        assert_eq!(session.recording_state(), RecordingState::NoRecording);
    }

    #[test]
    fn stop_without_start_is_invalid() {
        let (mut session, _fake) = session_with_fake("stop_without_start");
        let err = session.stop_recording().unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));
    }

    #[test]
    fn new_take_truncates_and_invalidates_loaded_buffer() {
        let (mut session, fake) = session_with_fake("retake");
        session.setup().unwrap();
        session.start().unwrap();

        session.toggle_recording().unwrap();
        fake.fire_tap(&[0.4f32; 256]);
        session.toggle_recording().unwrap();
        session.toggle_playing().unwrap();
        assert!(session.recording_state().is_loaded());

        // Record a longer replacement take.
        session.toggle_recording().unwrap();
        fake.fire_tap(&[0.6f32; 256]);
        fake.fire_tap(&[0.6f32; 256]);
        session.toggle_recording().unwrap();

        assert!(!session.recording_state().is_loaded());
        session.toggle_playing().unwrap();
        assert_eq!(session.last_take().unwrap().frames, 512);

        std::fs::remove_file(&session.config.recording_path).ok();
    }

    #[test]
    fn late_tap_delivery_after_stop_is_ignored() {
        let (mut session, fake) = session_with_fake("late_delivery");
        session.setup().unwrap();
        session.start().unwrap();

        session.toggle_recording().unwrap();
        fake.fire_tap(&[0.1f32; 256]);
        session.toggle_recording().unwrap();

        // A delivery that lost the race against stop: the flag is already
        // down, so nothing reaches the closed take.
        fake.fire_tap(&[0.9f32; 256]);

        let diag = session.diagnostics();
        assert_eq!(diag.samples_captured, 256);
        assert_eq!(diag.write_errors, 0);
        assert_eq!(session.last_take().unwrap().frames, 256);

        std::fs::remove_file(&session.config.recording_path).ok();
    }

    #[test]
    fn sidecar_written_next_to_take() {
        let (mut session, fake) = session_with_fake("sidecar");
        session.setup().unwrap();
        session.start().unwrap();

        session.toggle_recording().unwrap();
        fake.fire_tap(&[0.1f32; 256]);
        let take = session.stop_recording().unwrap();

        let sidecar = sidecar::read_sidecar(&session.config.recording_path).unwrap();
        assert_eq!(sidecar, take);

        std::fs::remove_file(&session.config.recording_path).ok();
        std::fs::remove_file(
            session.config.recording_path.with_extension("metadata.json"),
        )
        .ok();
    }

    #[test]
    fn drop_stops_graph_and_threads() {
        let fake = FakeGraph::new();
        let path: PathBuf;
        {
            let mut session =
                VoiceSession::new(fake.clone(), test_config("drop_cleanup")).unwrap();
            path = session.config.recording_path.clone();
            session.setup().unwrap();
            session.start().unwrap();
            session.toggle_recording().unwrap();
            fake.fire_tap(&[0.1f32; 256]);
        }
        assert!(!fake.engine_running());
        std::fs::remove_file(path).ok();
    }
}
