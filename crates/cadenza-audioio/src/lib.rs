//! Project audio-IO state and a virtual audio stream.
//!
//! [`ProjectAudioIo`] is the per-project record consulted by effect hosting
//! code (stream token, meters, play speed). [`AudioIo`] drives a virtual
//! device thread that keeps that record up to date while a stream runs.

pub mod meter;
pub mod project;

use std::sync::{
    atomic::{AtomicBool, AtomicI32, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, error};

pub use meter::{Meter, PeakMeter};
pub use project::{
    DefaultOptionsFactory, OptionsFactory, ProjectAudioIo, SpeedChanged, StreamOptions,
    NO_AUDIO_IO_TOKEN,
};

/// Audio configuration describing the realtime stream.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Number of frames per processing block.
    pub block_size: usize,
    /// Number of audio channels.
    pub channels: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            block_size: 256,
            channels: 2,
        }
    }
}

/// Virtual audio device handing out stream tokens.
#[derive(Debug)]
pub struct AudioIo {
    config: AudioConfig,
    next_token: AtomicI32,
}

impl AudioIo {
    pub fn new(config: Option<AudioConfig>) -> Self {
        Self {
            config: config.unwrap_or_default(),
            next_token: AtomicI32::new(1),
        }
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Starts a stream for `project`, invoking `callback` once per block.
    ///
    /// The stream options come from the project's options factory. The
    /// project's token is set before the thread starts and reset when the
    /// returned handle is dropped.
    pub fn start_stream<F>(
        &self,
        project: Arc<ProjectAudioIo>,
        mut callback: F,
    ) -> anyhow::Result<AudioStreamHandle>
    where
        F: FnMut(&mut AudioBlock, f64) + Send + 'static,
    {
        let options = project.stream_options(false);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        if let Some(meter) = &options.playback_meter {
            meter.reset(options.rate, true);
        }
        if let Some(meter) = &options.capture_meter {
            meter.reset(options.rate, true);
        }
        project.start_stream(
            token,
            options.playback_meter.clone(),
            options.capture_meter.clone(),
        );

        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);
        let stream_project = Arc::clone(&project);
        let config = self.config.clone();
        let rate = options.rate.max(1.0);
        let spawned = thread::Builder::new()
            .name("cadenza-audio".into())
            .spawn(move || {
                let mut block = AudioBlock::new(config.channels, config.block_size);
                while !stop_clone.load(Ordering::Relaxed) {
                    let speed = stream_project.play_speed();
                    block.clear();
                    callback(&mut block, speed);
                    if let Some(meter) = stream_project.playback_meter() {
                        let interleaved = block.interleaved();
                        meter.update_display(block.channels.len(), block.frames, &interleaved);
                    }
                    let sleep = Duration::from_secs_f64(config.block_size as f64 / rate);
                    thread::sleep(sleep);
                }
            })
            .context("failed to spawn audio thread");

        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                project.stop_stream();
                return Err(err);
            }
        };
        debug!(token, "virtual stream running");
        Ok(AudioStreamHandle {
            handle: Some(handle),
            stop,
            project,
        })
    }
}

/// Handle to a running audio stream.
pub struct AudioStreamHandle {
    handle: Option<thread::JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    project: Arc<ProjectAudioIo>,
}

impl AudioStreamHandle {
    pub fn token(&self) -> i32 {
        self.project.audio_io_token()
    }
}

impl Drop for AudioStreamHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.join() {
                error!(?err, "failed to join audio thread");
            }
        }
        self.project.stop_stream();
    }
}

/// Audio buffer handed to the stream callback each block.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    /// Per-channel sample buffers.
    pub channels: Vec<Vec<f32>>,
    /// Number of frames.
    pub frames: usize,
}

impl AudioBlock {
    /// Creates a silent audio block.
    pub fn new(channels: usize, frames: usize) -> Self {
        Self {
            channels: vec![vec![0.0; frames]; channels],
            frames,
        }
    }

    /// Zeros the buffer.
    #[inline(always)]
    pub fn clear(&mut self) {
        for channel in &mut self.channels {
            for sample in channel.iter_mut() {
                *sample = 0.0;
            }
        }
    }

    /// Copies the block into frame-interleaved order.
    pub fn interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.frames * self.channels.len());
        for frame in 0..self.frames {
            for channel in &self.channels {
                out.push(channel.get(frame).copied().unwrap_or(0.0));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_sets_and_clears_project_token() {
        let project = Arc::new(ProjectAudioIo::default());
        let meter = Arc::new(PeakMeter::new());
        project.set_playback_meter(Some(meter.clone()));

        let audio = AudioIo::new(Some(AudioConfig {
            block_size: 16,
            channels: 2,
        }));
        let handle = audio
            .start_stream(Arc::clone(&project), |block, _speed| {
                for channel in &mut block.channels {
                    channel.fill(0.5);
                }
            })
            .expect("stream");

        assert!(project.is_audio_active());
        assert!(handle.token() > 0);
        for _ in 0..200 {
            if meter.max_peak() > 0.0 {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(meter.max_peak(), 0.5);

        drop(handle);
        assert!(!project.is_audio_active());
        assert!(project.playback_meter().is_none());
    }

    #[test]
    fn every_block_starts_silent() {
        use std::sync::atomic::AtomicUsize;

        let project = Arc::new(ProjectAudioIo::default());
        let audio = AudioIo::new(Some(AudioConfig {
            block_size: 8,
            channels: 1,
        }));
        let calls = Arc::new(AtomicUsize::new(0));
        let stale = Arc::new(AtomicBool::new(false));
        let (seen_calls, seen_stale) = (Arc::clone(&calls), Arc::clone(&stale));
        let handle = audio
            .start_stream(Arc::clone(&project), move |block, _speed| {
                if block.channels.iter().flatten().any(|sample| *sample != 0.0) {
                    seen_stale.store(true, Ordering::SeqCst);
                }
                block.channels[0].fill(0.25);
                seen_calls.fetch_add(1, Ordering::SeqCst);
            })
            .expect("stream");

        for _ in 0..500 {
            if calls.load(Ordering::SeqCst) >= 3 {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        drop(handle);
        assert!(calls.load(Ordering::SeqCst) >= 3);
        assert!(!stale.load(Ordering::SeqCst));
    }

    #[test]
    fn interleaves_channels() {
        let mut block = AudioBlock::new(2, 2);
        block.channels[0] = vec![1.0, 2.0];
        block.channels[1] = vec![3.0, 4.0];
        assert_eq!(block.interleaved(), vec![1.0, 3.0, 2.0, 4.0]);
        block.clear();
        assert_eq!(block.interleaved(), vec![0.0; 4]);
    }
}
