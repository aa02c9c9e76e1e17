//! Per-project state needed to interact with the audio stream: the stream
//! token, the project-owned meters and the play-speed multiplier.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use atomic_float::AtomicF64;
use cadenza_utils::{Publisher, Subscription};
use parking_lot::RwLock;
use tracing::debug;

use crate::meter::Meter;

/// Token value meaning "no stream is running for this project".
pub const NO_AUDIO_IO_TOKEN: i32 = -1;

/// Sent whenever [`ProjectAudioIo::set_play_speed`] changes the speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedChanged {
    pub speed: f64,
}

/// Options describing how a new stream for a project should be started.
#[derive(Clone)]
pub struct StreamOptions {
    pub rate: f64,
    pub play_speed: f64,
    pub variable_speed: bool,
    pub looping: bool,
    pub playback_meter: Option<Arc<dyn Meter>>,
    pub capture_meter: Option<Arc<dyn Meter>>,
}

impl std::fmt::Debug for StreamOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamOptions")
            .field("rate", &self.rate)
            .field("play_speed", &self.play_speed)
            .field("variable_speed", &self.variable_speed)
            .field("looping", &self.looping)
            .field("playback_meter", &self.playback_meter.is_some())
            .field("capture_meter", &self.capture_meter.is_some())
            .finish()
    }
}

/// Builds [`StreamOptions`] for a project.
///
/// Passed to [`ProjectAudioIo::new`]; applications that need a different
/// start-up policy supply their own implementation instead of the default.
pub trait OptionsFactory: Send + Sync {
    fn make_options(&self, project: &ProjectAudioIo, new_defaults: bool) -> StreamOptions;
}

impl<F> OptionsFactory for F
where
    F: Fn(&ProjectAudioIo, bool) -> StreamOptions + Send + Sync,
{
    fn make_options(&self, project: &ProjectAudioIo, new_defaults: bool) -> StreamOptions {
        self(project, new_defaults)
    }
}

/// Default policy: the project's meters and play speed at a fixed rate.
/// The `new_defaults` flag is ignored.
#[derive(Debug, Clone)]
pub struct DefaultOptionsFactory {
    pub rate: f64,
}

impl Default for DefaultOptionsFactory {
    fn default() -> Self {
        Self { rate: 48_000.0 }
    }
}

impl OptionsFactory for DefaultOptionsFactory {
    fn make_options(&self, project: &ProjectAudioIo, _new_defaults: bool) -> StreamOptions {
        StreamOptions {
            rate: self.rate,
            play_speed: project.play_speed(),
            variable_speed: false,
            looping: false,
            playback_meter: project.playback_meter(),
            capture_meter: project.capture_meter(),
        }
    }
}

/// Holds the audio-stream bookkeeping of one project.
pub struct ProjectAudioIo {
    token: AtomicI32,
    playback_meter: RwLock<Option<Arc<dyn Meter>>>,
    capture_meter: RwLock<Option<Arc<dyn Meter>>>,
    // Read by the scrubbing thread as well as the UI thread.
    play_speed: AtomicF64,
    speed_changed: Publisher<SpeedChanged>,
    options_factory: Arc<dyn OptionsFactory>,
}

impl ProjectAudioIo {
    pub fn new(options_factory: Arc<dyn OptionsFactory>) -> Self {
        Self {
            token: AtomicI32::new(NO_AUDIO_IO_TOKEN),
            playback_meter: RwLock::new(None),
            capture_meter: RwLock::new(None),
            play_speed: AtomicF64::new(1.0),
            speed_changed: Publisher::new(),
            options_factory,
        }
    }

    pub fn audio_io_token(&self) -> i32 {
        self.token.load(Ordering::Acquire)
    }

    pub fn set_audio_io_token(&self, token: i32) {
        self.token.store(token, Ordering::Release);
    }

    /// True while a stream started for this project is still running.
    pub fn is_audio_active(&self) -> bool {
        self.audio_io_token() > 0
    }

    pub fn playback_meter(&self) -> Option<Arc<dyn Meter>> {
        self.playback_meter.read().clone()
    }

    pub fn set_playback_meter(&self, meter: Option<Arc<dyn Meter>>) {
        *self.playback_meter.write() = meter;
    }

    pub fn capture_meter(&self) -> Option<Arc<dyn Meter>> {
        self.capture_meter.read().clone()
    }

    pub fn set_capture_meter(&self, meter: Option<Arc<dyn Meter>>) {
        *self.capture_meter.write() = meter;
    }

    #[inline]
    pub fn play_speed(&self) -> f64 {
        self.play_speed.load(Ordering::Relaxed)
    }

    pub fn set_play_speed(&self, speed: f64) {
        let previous = self.play_speed.swap(speed, Ordering::Relaxed);
        if previous != speed {
            self.speed_changed.publish(&SpeedChanged { speed });
        }
    }

    pub fn subscribe_speed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SpeedChanged) + Send + Sync + 'static,
    {
        self.speed_changed.subscribe(callback)
    }

    /// Asks the configured factory for the options of a new stream.
    pub fn stream_options(&self, new_defaults: bool) -> StreamOptions {
        self.options_factory.make_options(self, new_defaults)
    }

    /// Records a newly started stream together with its meters.
    pub fn start_stream(
        &self,
        token: i32,
        playback: Option<Arc<dyn Meter>>,
        capture: Option<Arc<dyn Meter>>,
    ) {
        debug!(token, "audio stream started");
        self.set_playback_meter(playback);
        self.set_capture_meter(capture);
        self.set_audio_io_token(token);
    }

    /// Clears the token and detaches the meters after stream teardown.
    pub fn stop_stream(&self) {
        let token = self.token.swap(NO_AUDIO_IO_TOKEN, Ordering::AcqRel);
        if token != NO_AUDIO_IO_TOKEN {
            debug!(token, "audio stream stopped");
        }
        self.set_playback_meter(None);
        self.set_capture_meter(None);
    }
}

impl Default for ProjectAudioIo {
    fn default() -> Self {
        Self::new(Arc::new(DefaultOptionsFactory::default()))
    }
}

impl std::fmt::Debug for ProjectAudioIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectAudioIo")
            .field("token", &self.audio_io_token())
            .field("play_speed", &self.play_speed())
            .finish()
    }
}
