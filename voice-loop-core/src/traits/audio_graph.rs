use crate::models::error::SessionError;
use crate::models::format::AudioFormat;
use crate::processing::loop_player::SharedLoopPlayer;

/// Callback receiving captured input buffers.
///
/// Invoked on the backend's realtime audio thread for every delivered tap
/// buffer, for the lifetime of the running graph. Implementations must not
/// block, allocate, or perform file I/O.
pub type InputTap = Box<dyn FnMut(&[f32]) + Send>;

/// Events emitted by the graph outside the normal call flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphEvent {
    /// The hardware route or configuration changed (device unplugged,
    /// interruption ended). The run state is invalid until restarted.
    ConfigurationChanged,
}

/// Output route selection when no explicit device is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutePolicy {
    /// Prefer a loudspeaker-class output endpoint over quieter routes.
    #[default]
    PreferSpeaker,
    /// Use whatever the host considers the default output.
    SystemDefault,
}

/// A realtime duplex audio graph.
///
/// The session controller is generic over this trait; the cpal backend
/// implements it against real hardware and tests implement it with a fake.
/// Topology calls (`connect`, `install_input_tap`) happen exactly once,
/// before `start()`; the graph must reject duplicates rather than stack
/// them.
pub trait AudioGraph: Send {
    /// Attach the loop player rendered by the output path. Called once at
    /// session construction, before any topology call.
    fn attach_player(&mut self, player: SharedLoopPlayer);

    /// Best-effort request that the hardware run at `sample_rate`. The
    /// hardware may clamp or refuse; the caller treats failure as
    /// recoverable.
    fn request_preferred_sample_rate(&mut self, sample_rate: u32) -> Result<(), SessionError>;

    /// Enable echo suppression on the input path.
    fn enable_voice_processing(&mut self) -> Result<(), SessionError>;

    /// Connect player → mixer → output using `format`. Fails with
    /// `FormatUnsupported` on any mismatch with the hardware configuration;
    /// no conversion is performed.
    fn connect(&mut self, format: &AudioFormat) -> Result<(), SessionError>;

    /// Install the input tap delivering `buffer_frames`-sized buffers in
    /// `format`. At most one tap may exist; a second install is a
    /// `Topology` error.
    fn install_input_tap(
        &mut self,
        buffer_frames: u32,
        format: &AudioFormat,
        tap: InputTap,
    ) -> Result<(), SessionError>;

    /// Pre-allocate resources so `start()` is cheap and glitch-free.
    fn prepare(&mut self);

    /// Start (or restart) the realtime graph.
    fn start(&mut self) -> Result<(), SessionError>;

    /// Stop the graph. Topology is retained; `start()` resumes it.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Channel on which the graph reports configuration changes. The
    /// subscription ends when the graph is dropped.
    fn events(&self) -> crossbeam_channel::Receiver<GraphEvent>;
}
