//! cpal-backed duplex audio graph.
//!
//! One input stream feeds the session's tap (optionally ducked by the echo
//! suppressor), one output stream renders the loop player. Stream errors
//! (device unplugged, route changed) invalidate the run state and emit a
//! `ConfigurationChanged` event; the session's monitor thread restarts the
//! graph, which re-resolves devices against the current defaults.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use voice_loop_core::processing::meter::{self, LevelCell};
use voice_loop_core::{
    AudioFormat, AudioGraph, EchoSuppressor, GraphEvent, InputTap, RoutePolicy, SessionError,
    SharedLoopPlayer,
};

use crate::device;

/// Backend configuration fixed at graph construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpalGraphConfig {
    /// Canonical format the graph serves. Topology calls must match it.
    pub format: AudioFormat,
    /// Output route selection when no explicit device is chosen.
    pub route_policy: RoutePolicy,
}

impl Default for CpalGraphConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat::canonical(),
            route_policy: RoutePolicy::PreferSpeaker,
        }
    }
}

/// Wrapper to hold a `cpal::Stream` in a `Send` context.
///
/// `cpal::Stream` is `!Send` due to platform internals. This is safe
/// because the graph lives behind the session's mutex: the stream is only
/// created, held, and dropped under that lock, never accessed
/// concurrently.
struct StreamHandle(#[allow(dead_code)] cpal::Stream);

// SAFETY: see above — single-owner access behind the session's graph lock.
unsafe impl Send for StreamHandle {}

/// Echo-suppression state shared between the two stream callbacks.
///
/// The output callback publishes its block peak into `far_end` (lock-free);
/// the input callback ducks captured samples by that level before they
/// reach the tap.
#[derive(Clone)]
struct VoiceProcessing {
    suppressor: Arc<Mutex<EchoSuppressor>>,
    far_end: Arc<LevelCell>,
    scratch: Arc<Mutex<Vec<f32>>>,
}

/// Duplex graph over the host's default audio devices.
pub struct CpalDuplexGraph {
    config: CpalGraphConfig,
    player: Option<SharedLoopPlayer>,
    tap: Option<Arc<Mutex<InputTap>>>,
    tap_buffer_frames: u32,
    voice_processing: Option<VoiceProcessing>,
    connected: bool,
    prepared: bool,
    output_config: Option<cpal::StreamConfig>,
    running: Arc<AtomicBool>,
    streams: Option<(StreamHandle, StreamHandle)>,
    events_tx: Sender<GraphEvent>,
    events_rx: Receiver<GraphEvent>,
}

impl CpalDuplexGraph {
    pub fn new(config: CpalGraphConfig) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            config,
            player: None,
            tap: None,
            tap_buffer_frames: 256,
            voice_processing: None,
            connected: false,
            prepared: false,
            output_config: None,
            running: Arc::new(AtomicBool::new(false)),
            streams: None,
            events_tx,
            events_rx,
        }
    }

    fn error_hook(&self, stream: &'static str) -> impl FnMut(cpal::StreamError) + Send + 'static {
        let running = Arc::clone(&self.running);
        let events = self.events_tx.clone();
        move |err| {
            log::error!("{} stream error, marking engine stopped: {}", stream, err);
            running.store(false, Ordering::Release);
            let _ = events.send(GraphEvent::ConfigurationChanged);
        }
    }

    fn build_input_stream(&self) -> Result<cpal::Stream, SessionError> {
        let device = device::resolve_input_device()?;
        device::validate_input_format(&device, &self.config.format)?;

        let tap = Arc::clone(
            self.tap
                .as_ref()
                .ok_or_else(|| SessionError::EngineStart("no input tap installed".into()))?,
        );
        let voice_processing = self.voice_processing.clone();

        let data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if let Some(vp) = &voice_processing {
                let mut scratch = vp.scratch.lock();
                scratch.clear();
                scratch.extend_from_slice(data);
                vp.suppressor
                    .lock()
                    .process(scratch.as_mut_slice(), vp.far_end.load());
                (*tap.lock())(scratch.as_slice());
            } else {
                (*tap.lock())(data);
            }
        };

        let base = cpal::StreamConfig {
            channels: self.config.format.channels,
            sample_rate: cpal::SampleRate(self.config.format.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(self.tap_buffer_frames),
        };

        // Some hosts refuse fixed buffer sizes; fall back to the device's
        // own pacing rather than failing the whole graph.
        match device.build_input_stream(&base, data_fn.clone(), self.error_hook("input"), None) {
            Ok(stream) => Ok(stream),
            Err(cpal::BuildStreamError::StreamConfigNotSupported) => {
                log::warn!(
                    "fixed {}-frame input buffer not supported, using device default",
                    self.tap_buffer_frames
                );
                let relaxed = cpal::StreamConfig {
                    buffer_size: cpal::BufferSize::Default,
                    ..base
                };
                device
                    .build_input_stream(&relaxed, data_fn, self.error_hook("input"), None)
                    .map_err(|e| SessionError::EngineStart(e.to_string()))
            }
            Err(e) => Err(SessionError::EngineStart(e.to_string())),
        }
    }

    fn build_output_stream(&self) -> Result<cpal::Stream, SessionError> {
        let device = device::resolve_output_device(self.config.route_policy)?;
        let config = self
            .output_config
            .clone()
            .ok_or_else(|| SessionError::EngineStart("output path not connected".into()))?;

        let player = Arc::clone(
            self.player
                .as_ref()
                .ok_or_else(|| SessionError::EngineStart("no player attached".into()))?,
        );
        let far_end = self.voice_processing.as_ref().map(|vp| Arc::clone(&vp.far_end));
        let channels = config.channels as usize;
        let mut mono = vec![0.0f32; 2048];

        let data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels;
            if mono.len() < frames {
                mono.resize(frames, 0.0);
            }
            player.lock().fill(&mut mono[..frames]);

            if let Some(cell) = &far_end {
                cell.store(meter::peak_level(&mono[..frames]));
            }

            // Mono fan-out across the device's channel layout.
            for (frame_idx, frame) in data.chunks_mut(channels).enumerate() {
                frame.fill(mono[frame_idx]);
            }
        };

        device
            .build_output_stream(&config, data_fn, self.error_hook("output"), None)
            .map_err(|e| SessionError::EngineStart(e.to_string()))
    }
}

impl AudioGraph for CpalDuplexGraph {
    fn attach_player(&mut self, player: SharedLoopPlayer) {
        self.player = Some(player);
    }

    fn request_preferred_sample_rate(&mut self, sample_rate: u32) -> Result<(), SessionError> {
        device::preferred_rate_available(sample_rate)
    }

    fn enable_voice_processing(&mut self) -> Result<(), SessionError> {
        if self.voice_processing.is_none() {
            self.voice_processing = Some(VoiceProcessing {
                suppressor: Arc::new(Mutex::new(EchoSuppressor::new(
                    self.config.format.sample_rate,
                ))),
                far_end: Arc::new(LevelCell::new()),
                scratch: Arc::new(Mutex::new(Vec::with_capacity(4096))),
            });
        }
        Ok(())
    }

    fn connect(&mut self, format: &AudioFormat) -> Result<(), SessionError> {
        if self.connected {
            return Err(SessionError::Topology("output path already connected".into()));
        }
        if *format != self.config.format {
            return Err(SessionError::FormatUnsupported(format!(
                "graph is fixed at {}, cannot connect {}",
                self.config.format, format
            )));
        }

        let device = device::resolve_output_device(self.config.route_policy)?;
        let config = device::validate_output_format(&device, format)?;
        log::debug!(
            "output connected: '{}' at {} Hz, {} channels",
            device.name().unwrap_or_default(),
            config.sample_rate.0,
            config.channels
        );

        self.output_config = Some(config);
        self.connected = true;
        Ok(())
    }

    fn install_input_tap(
        &mut self,
        buffer_frames: u32,
        format: &AudioFormat,
        tap: InputTap,
    ) -> Result<(), SessionError> {
        if self.tap.is_some() {
            return Err(SessionError::Topology("input tap already installed".into()));
        }
        if *format != self.config.format {
            return Err(SessionError::FormatUnsupported(format!(
                "graph is fixed at {}, cannot tap {}",
                self.config.format, format
            )));
        }

        let device = device::resolve_input_device()?;
        device::validate_input_format(&device, format)?;

        self.tap_buffer_frames = buffer_frames;
        self.tap = Some(Arc::new(Mutex::new(tap)));
        Ok(())
    }

    fn prepare(&mut self) {
        self.prepared = true;
        log::debug!("graph prepared: {} ready for start", self.config.format);
    }

    fn start(&mut self) -> Result<(), SessionError> {
        if self.running.load(Ordering::Acquire) {
            return Ok(());
        }
        if !self.prepared {
            log::debug!("starting graph without prepare()");
        }

        // Drop any stale streams from before an error, then rebuild against
        // the current default devices.
        self.streams = None;

        let input = self.build_input_stream()?;
        let output = self.build_output_stream()?;

        input
            .play()
            .map_err(|e| SessionError::EngineStart(e.to_string()))?;
        output
            .play()
            .map_err(|e| SessionError::EngineStart(e.to_string()))?;

        self.streams = Some((StreamHandle(input), StreamHandle(output)));
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.streams = None;
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn events(&self) -> Receiver<GraphEvent> {
        self.events_rx.clone()
    }
}
