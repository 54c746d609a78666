// Gain adjustment between the decoder and the output sink
//
// Volume uses a decibel scale: a normalized level in [0, 1] maps to
// gain_db = -96 + 96 * level, so 0.0 is -96 dB (treated as digital silence)
// and 1.0 is 0 dB (unity). The stage never amplifies above unity.

use std::sync::Arc;

use parking_lot::Mutex;

use super::decoder::AudioDecoder;
use super::error::PlaybackError;
use super::output::SampleSource;

/// Gain applied at level 0.0; anything at or below it is muted.
pub const MIN_VOLUME_DB: f32 = -96.0;

/// Gain applied at level 1.0.
pub const MAX_VOLUME_DB: f32 = 0.0;

/// Map a normalized volume level to decibels.
///
/// Levels outside `[0.0, 1.0]` (and NaN) are rejected rather than clamped.
pub fn level_to_db(level: f32) -> Result<f32, PlaybackError> {
    if !(0.0..=1.0).contains(&level) {
        return Err(PlaybackError::InvalidArgument(format!(
            "volume level {} is outside [0.0, 1.0]",
            level
        )));
    }
    Ok(MIN_VOLUME_DB + level * (MAX_VOLUME_DB - MIN_VOLUME_DB))
}

/// Convert a gain in decibels to a linear amplitude factor.
pub fn db_to_amplitude(db: f32) -> f32 {
    if db <= MIN_VOLUME_DB {
        0.0
    } else {
        10f32.powf(db / 20.0)
    }
}

/// A gain value in both units, always updated together.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gain {
    pub db: f32,
    pub amplitude: f32,
}

impl Gain {
    pub fn from_db(db: f32) -> Self {
        Self {
            db,
            amplitude: db_to_amplitude(db),
        }
    }

    pub fn is_muted(&self) -> bool {
        self.amplitude == 0.0
    }
}

impl Default for Gain {
    fn default() -> Self {
        Self::from_db(MAX_VOLUME_DB)
    }
}

/// The volume lock of a session, shared with its gain stage.
#[derive(Debug, Default)]
pub struct VolumeControl {
    gain: Mutex<Gain>,
}

impl VolumeControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a normalized level, returning the resulting gain.
    pub fn set_level(&self, level: f32) -> Result<Gain, PlaybackError> {
        let gain = Gain::from_db(level_to_db(level)?);
        *self.gain.lock() = gain;
        Ok(gain)
    }

    pub fn gain(&self) -> Gain {
        *self.gain.lock()
    }
}

/// Wraps the decode handle and scales every sample by the current gain.
///
/// Samples decoded but not yet pulled by the sink stay buffered here, so a
/// session that is cleared from the sink resumes exactly where it stopped.
pub struct GainStage {
    decoder: Option<AudioDecoder>,
    volume: Arc<VolumeControl>,
    channels: usize,
    pending: Vec<f32>,
    cursor: usize,
    samples_delivered: u64,
}

impl GainStage {
    pub fn new(decoder: AudioDecoder, volume: Arc<VolumeControl>) -> Self {
        let channels = decoder.stream_format().channels.max(1) as usize;
        Self {
            decoder: Some(decoder),
            volume,
            channels,
            pending: Vec::new(),
            cursor: 0,
            samples_delivered: 0,
        }
    }

    /// Whole frames handed to the sink so far.
    pub fn frames_delivered(&self) -> u64 {
        self.samples_delivered / self.channels as u64
    }

    /// Release the decode handle. Returns false if it was already released.
    pub fn close(&mut self) -> bool {
        self.pending.clear();
        self.cursor = 0;
        self.decoder.take().is_some()
    }

    fn refill(&mut self) -> Result<bool, PlaybackError> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(false);
        };
        match decoder.decode_next()? {
            Some(samples) => {
                self.pending = samples;
                self.cursor = 0;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl SampleSource for GainStage {
    fn fill(&mut self, out: &mut [f32]) -> Result<usize, PlaybackError> {
        let amplitude = self.volume.gain().amplitude;
        let mut written = 0;

        while written < out.len() {
            if self.cursor >= self.pending.len() && !self.refill()? {
                break;
            }
            let available = &self.pending[self.cursor..];
            let n = available.len().min(out.len() - written);
            for (dst, src) in out[written..written + n].iter_mut().zip(available) {
                *dst = src * amplitude;
            }
            self.cursor += n;
            written += n;
        }

        self.samples_delivered += written as u64;
        Ok(written)
    }
}
