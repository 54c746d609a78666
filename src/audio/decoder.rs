// Audio decoder using Symphonia
// Owns the open file and yields interleaved f32 samples on demand

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::error::PlaybackError;
use super::output::StreamFormat;

/// The decode handle of a playback session.
///
/// Dropping it closes the underlying file.
pub struct AudioDecoder {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    stream_format: StreamFormat,
    duration: Option<Duration>,
    sample_buf: Option<SampleBuffer<f32>>,
    /// First packet, decoded during `open` to learn the channel layout
    primed: Option<Vec<f32>>,
}

impl AudioDecoder {
    /// Open an audio file and decode its stream header.
    pub fn open(path: &Path) -> Result<Self, PlaybackError> {
        let file = File::open(path).map_err(|e| PlaybackError::ResourceUnavailable {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| PlaybackError::decode(path, format!("unrecognized stream: {}", e)))?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| PlaybackError::decode(path, "no audio track found"))?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .filter(|rate| *rate > 0)
            .ok_or_else(|| PlaybackError::decode(path, "sample rate missing"))?;
        let declared_channels = track.codec_params.channels.map(|c| c.count() as u16);

        let duration = track
            .codec_params
            .n_frames
            .map(|frames| Duration::from_secs_f64(frames as f64 / sample_rate as f64));

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| PlaybackError::decode(path, format!("unsupported codec: {}", e)))?;

        let mut this = Self {
            path: path.to_path_buf(),
            format,
            decoder,
            track_id,
            stream_format: StreamFormat {
                sample_rate,
                channels: declared_channels.unwrap_or(0),
            },
            duration,
            sample_buf: None,
            primed: None,
        };

        // Frames are split by the layout of decoded buffers, not the header
        let first = this
            .next_chunk()
            .map_err(|e| PlaybackError::decode(path, e))?;
        let decoded_channels = first.as_ref().map(|(_, channels)| *channels);
        if let (Some(declared), Some(decoded)) = (declared_channels, decoded_channels) {
            if declared != decoded {
                log::warn!(
                    "'{}' declares {} channel(s) but decodes to {}",
                    path.display(),
                    declared,
                    decoded
                );
            }
        }
        this.stream_format.channels = resolve_channels(declared_channels, decoded_channels)
            .ok_or_else(|| PlaybackError::decode(path, "channel layout unknown and no audio frames"))?;
        this.primed = first.map(|(samples, _)| samples);

        log::debug!(
            "Opened '{}': {}, duration {:?}",
            path.display(),
            this.stream_format,
            this.duration
        );
        Ok(this)
    }

    pub fn stream_format(&self) -> StreamFormat {
        self.stream_format
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Decode the next packet into interleaved f32 samples.
    /// Returns `None` once the stream is exhausted.
    pub fn decode_next(&mut self) -> Result<Option<Vec<f32>>, PlaybackError> {
        if let Some(samples) = self.primed.take() {
            return Ok(Some(samples));
        }
        match self.next_chunk()? {
            Some((samples, channels)) if channels == self.stream_format.channels => Ok(Some(samples)),
            Some((_, channels)) => Err(PlaybackError::StreamFailed(format!(
                "'{}' changed from {} to {} channel(s) mid-stream",
                self.path.display(),
                self.stream_format.channels,
                channels
            ))),
            None => Ok(None),
        }
    }

    /// Next decoded packet with the channel count of its buffer.
    fn next_chunk(&mut self) -> Result<Option<(Vec<f32>, u16)>, PlaybackError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => {
                    return Err(PlaybackError::StreamFailed(format!(
                        "failed to read packet from '{}': {}",
                        self.path.display(),
                        e
                    )))
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    if decoded.frames() == 0 {
                        continue;
                    }
                    let spec = *decoded.spec();
                    let needs_buf = self
                        .sample_buf
                        .as_ref()
                        .map_or(true, |buf| buf.capacity() < decoded.capacity() * spec.channels.count());
                    if needs_buf {
                        self.sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
                    }
                    if let Some(buf) = self.sample_buf.as_mut() {
                        buf.copy_interleaved_ref(decoded);
                        return Ok(Some((buf.samples().to_vec(), spec.channels.count() as u16)));
                    }
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    // Corrupt frames are skipped, the stream keeps going
                    log::warn!("Decode error in '{}' (skipping packet): {}", self.path.display(), e);
                    continue;
                }
                Err(e) => {
                    return Err(PlaybackError::StreamFailed(format!(
                        "decoder failed on '{}': {}",
                        self.path.display(),
                        e
                    )))
                }
            }
        }
    }
}

/// Channel count of a stream: what the first decoded buffer carries, else
/// what the container declares. `None` when neither is known.
fn resolve_channels(declared: Option<u16>, decoded: Option<u16>) -> Option<u16> {
    decoded.or(declared).filter(|channels| *channels > 0)
}
