// Shared fixtures for integration tests
use std::path::{Path, PathBuf};

/// Write a 16-bit PCM WAV file with the given interleaved samples.
pub fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) {
    let data_len = (samples.len() * 2) as u32;
    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * channels as u32 * 2).to_le_bytes());
    bytes.extend_from_slice(&(channels * 2).to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    std::fs::write(path, bytes).unwrap();
}

/// One second of a stereo square wave at 8 kHz.
pub fn stereo_track(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    let samples: Vec<i16> = (0..8000 * 2)
        .map(|i| if (i / 80) % 2 == 0 { 8000 } else { -8000 })
        .collect();
    write_wav(&path, 8000, 2, &samples);
    path
}

/// A short mono MPEG-2 layer III clip, 22.05 kHz, 45 frames.
pub fn mp3_track(dir: &Path) -> PathBuf {
    let path = dir.join("tone.mp3");
    std::fs::write(&path, include_bytes!("../fixtures/tone.mp3")).unwrap();
    path
}
