//! Level meters attached to a project's playback and capture streams.

use std::sync::atomic::{AtomicBool, Ordering};

use atomic_float::{AtomicF32, AtomicF64};

/// Live signal-level display fed by the audio stream.
///
/// Implementations are shared between the stream thread (which calls
/// [`Meter::update_display`]) and the UI thread, so every method takes `&self`.
pub trait Meter: Send + Sync {
    /// Forgets all displayed levels.
    fn clear(&self);
    /// Prepares for a new stream at `sample_rate`.
    fn reset(&self, sample_rate: f64, reset_clipping: bool);
    /// Feeds one interleaved block of `frames` frames over `channels` channels.
    fn update_display(&self, channels: usize, frames: usize, samples: &[f32]);
    fn is_disabled(&self) -> bool {
        false
    }
}

const MAX_CHANNELS: usize = 2;

/// Stereo peak meter with sticky clip detection.
#[derive(Debug)]
pub struct PeakMeter {
    peaks: [AtomicF32; MAX_CHANNELS],
    clipped: AtomicBool,
    disabled: AtomicBool,
    sample_rate: AtomicF64,
}

impl PeakMeter {
    pub fn new() -> Self {
        Self {
            peaks: [AtomicF32::new(0.0), AtomicF32::new(0.0)],
            clipped: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
            sample_rate: AtomicF64::new(0.0),
        }
    }

    pub fn peak(&self, channel: usize) -> f32 {
        self.peaks
            .get(channel)
            .map(|peak| peak.load(Ordering::Relaxed))
            .unwrap_or(0.0)
    }

    pub fn max_peak(&self) -> f32 {
        self.peaks
            .iter()
            .map(|peak| peak.load(Ordering::Relaxed))
            .fold(0.0, f32::max)
    }

    pub fn is_clipping(&self) -> bool {
        self.clipped.load(Ordering::Relaxed)
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Relaxed);
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate.load(Ordering::Relaxed)
    }
}

impl Default for PeakMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl Meter for PeakMeter {
    fn clear(&self) {
        for peak in &self.peaks {
            peak.store(0.0, Ordering::Relaxed);
        }
    }

    fn reset(&self, sample_rate: f64, reset_clipping: bool) {
        self.clear();
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
        if reset_clipping {
            self.clipped.store(false, Ordering::Relaxed);
        }
    }

    fn update_display(&self, channels: usize, frames: usize, samples: &[f32]) {
        if self.is_disabled() || channels == 0 {
            return;
        }
        let mut block_peaks = [0.0f32; MAX_CHANNELS];
        for (index, sample) in samples.iter().take(channels * frames).enumerate() {
            let channel = index % channels;
            if channel >= MAX_CHANNELS {
                continue;
            }
            let magnitude = sample.abs();
            if magnitude >= 1.0 {
                self.clipped.store(true, Ordering::Relaxed);
            }
            block_peaks[channel] = block_peaks[channel].max(magnitude);
        }
        for (peak, block) in self.peaks.iter().zip(block_peaks) {
            peak.store(block, Ordering::Relaxed);
        }
    }

    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }
}
