// Playback session: one decoded source driving the shared output sink
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::decoder::AudioDecoder;
use super::error::PlaybackError;
use super::gain::{Gain, GainStage, VolumeControl};
use super::output::{OutputSink, Registration, SessionId, StreamFormat};

/// Delivered once on the completion channel of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The stream reached end-of-data while playing.
    Finished,
    /// Decoding or the output device failed while playing.
    Failed(String),
}

/// One-shot completion signal shared with every sink registration.
struct Completion {
    tx: Mutex<Option<oneshot::Sender<PlaybackOutcome>>>,
}

impl Completion {
    fn fire(&self, outcome: PlaybackOutcome) {
        if let Some(tx) = self.tx.lock().take() {
            // The receiver may have been dropped; nobody is listening then
            let _ = tx.send(outcome);
        }
    }
}

#[derive(Debug)]
struct Transport {
    paused: bool,
    closed: bool,
}

/// Owns exactly one decoded audio source for its whole lifetime.
///
/// Every method takes `&self`, so a session can be shared (`Arc`) between
/// event handlers on different threads. Transport calls serialize on the
/// transport lock and volume changes on a separate volume lock.
pub struct PlaybackSession {
    id: SessionId,
    path: PathBuf,
    format: StreamFormat,
    duration: Option<Duration>,
    sink: Arc<dyn OutputSink>,
    stage: Arc<Mutex<GainStage>>,
    volume: Arc<VolumeControl>,
    transport: Mutex<Transport>,
    completion: Arc<Completion>,
    completion_rx: Mutex<Option<oneshot::Receiver<PlaybackOutcome>>>,
}

impl PlaybackSession {
    /// Open and decode `path`, preparing `sink` for its format.
    ///
    /// Performs blocking file I/O; call it off the UI thread. The session
    /// starts paused at unity gain.
    pub fn open(path: impl AsRef<Path>, sink: Arc<dyn OutputSink>) -> Result<Self, PlaybackError> {
        let path = path.as_ref();
        log::info!("Opening playback session for '{}'", path.display());

        let decoder = AudioDecoder::open(path).map_err(|e| {
            log::error!("{}", e);
            e
        })?;
        let format = decoder.stream_format();
        let duration = decoder.duration();

        // On failure the decoder is dropped here, which closes the file
        sink.init(format).map_err(|e| {
            log::error!("Output init for '{}' failed: {}", path.display(), e);
            e
        })?;

        let volume = Arc::new(VolumeControl::new());
        let stage = Arc::new(Mutex::new(GainStage::new(decoder, volume.clone())));
        let (tx, rx) = oneshot::channel();
        let id = SessionId::next();

        log::info!("Session {} ready: {} ({})", id, path.display(), format);
        Ok(Self {
            id,
            path: path.to_path_buf(),
            format,
            duration,
            sink,
            stage,
            volume,
            transport: Mutex::new(Transport {
                paused: true,
                closed: false,
            }),
            completion: Arc::new(Completion {
                tx: Mutex::new(Some(tx)),
            }),
            completion_rx: Mutex::new(Some(rx)),
        })
    }

    /// Start or resume playback. No-op when already playing or closed.
    ///
    /// Fails with `OutputBusy` if another session currently holds the sink;
    /// the session then stays paused.
    pub fn play(&self) -> Result<(), PlaybackError> {
        let mut transport = self.transport.lock();
        if transport.closed {
            log::warn!("Play ignored: session {} is closed", self.id);
            return Ok(());
        }
        if !transport.paused {
            return Ok(());
        }

        let completion = self.completion.clone();
        let id = self.id;
        self.sink.play(Registration {
            session: id,
            format: self.format,
            source: Box::new(self.stage.clone()),
            on_finish: Box::new(move |outcome| match outcome {
                Ok(()) => {
                    log::info!("Session {} reached end of stream", id);
                    completion.fire(PlaybackOutcome::Finished);
                }
                Err(e) => {
                    log::error!("Session {} failed: {}", id, e);
                    completion.fire(PlaybackOutcome::Failed(e.to_string()));
                }
            }),
        })?;

        transport.paused = false;
        log::info!("Playback started (session {})", self.id);
        Ok(())
    }

    /// Stop playback, keeping the decode position. No-op when paused.
    pub fn pause(&self) {
        let mut transport = self.transport.lock();
        if transport.paused {
            return;
        }
        self.sink.clear(self.id);
        transport.paused = true;
        log::info!("Playback paused (session {})", self.id);
    }

    pub fn is_paused(&self) -> bool {
        self.transport.lock().paused
    }

    /// Set the volume from a normalized level in `[0.0, 1.0]`.
    ///
    /// The level maps to `-96 + 96 * level` dB; 0.0 is silence and 1.0 is
    /// unity gain. Out-of-range levels are rejected and leave the gain as is.
    pub fn set_volume(&self, level: f32) -> Result<(), PlaybackError> {
        let gain = self.volume.set_level(level).map_err(|e| {
            log::warn!("Session {}: {}", self.id, e);
            e
        })?;
        log::info!("Volume set to {:.1} dB (session {})", gain.db, self.id);
        Ok(())
    }

    /// The gain currently applied to samples.
    pub fn gain(&self) -> Gain {
        self.volume.gain()
    }

    pub fn volume_db(&self) -> f32 {
        self.volume.gain().db
    }

    /// Release the decode handle and leave the sink. Safe to call repeatedly.
    pub fn close(&self) {
        let mut transport = self.transport.lock();
        if transport.closed {
            return;
        }
        // The sink must stop pulling before the handle goes away
        self.sink.clear(self.id);
        transport.paused = true;
        transport.closed = true;
        self.stage.lock().close();
        log::info!("Session {} closed", self.id);
    }

    pub fn is_closed(&self) -> bool {
        self.transport.lock().closed
    }

    /// Hand out the completion receiver. Returns `None` after the first call.
    ///
    /// The receiver resolves once, when the stream ends or fails during
    /// playback. It is dropped unresolved if the session closes first.
    pub fn take_completion(&self) -> Option<oneshot::Receiver<PlaybackOutcome>> {
        self.completion_rx.lock().take()
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Stream length, when the container declares it.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// How far playback has advanced, measured in frames delivered to the sink.
    pub fn position(&self) -> Duration {
        let frames = self.stage.lock().frames_delivered();
        Duration::from_secs_f64(frames as f64 / self.format.sample_rate as f64)
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.close();
    }
}
