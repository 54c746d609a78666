// Audio output sinks
// A sink pulls interleaved f32 samples from at most one registered session

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;

use super::error::PlaybackError;

/// Identifies the session that owns a sink registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        SessionId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sample rate and channel count of a decoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz/{} ch", self.sample_rate, self.channels)
    }
}

/// A stream of interleaved f32 samples pulled by a sink.
pub trait SampleSource: Send {
    /// Fill `out` and return how many samples were written.
    /// Writing fewer than `out.len()` means the stream is exhausted.
    fn fill(&mut self, out: &mut [f32]) -> Result<usize, PlaybackError>;
}

impl<S: SampleSource> SampleSource for Arc<Mutex<S>> {
    fn fill(&mut self, out: &mut [f32]) -> Result<usize, PlaybackError> {
        self.lock().fill(out)
    }
}

/// Invoked once when a registered source ends or fails. Never invoked for a
/// registration removed with [`OutputSink::clear`].
pub type FinishCallback = Box<dyn FnOnce(Result<(), PlaybackError>) + Send>;

pub struct Registration {
    pub session: SessionId,
    pub format: StreamFormat,
    pub source: Box<dyn SampleSource>,
    pub on_finish: FinishCallback,
}

/// The process-wide output facility, injected into every session.
pub trait OutputSink: Send + Sync {
    /// Configure the sink for `format`. Idempotent for the current format;
    /// switching formats fails while another session is registered.
    fn init(&self, format: StreamFormat) -> Result<(), PlaybackError>;

    /// Register a session for continuous playback, reconfiguring an idle
    /// sink if the format differs. Fails with `OutputBusy` when another
    /// session holds the sink.
    fn play(&self, registration: Registration) -> Result<(), PlaybackError>;

    /// Remove the registration of `session`, if it holds the sink.
    fn clear(&self, session: SessionId) -> bool;

    fn format(&self) -> Option<StreamFormat>;

    fn active_session(&self) -> Option<SessionId>;
}

struct ActiveSource {
    session: SessionId,
    source: Box<dyn SampleSource>,
    // None once the source has ended or failed
    on_finish: Option<FinishCallback>,
}

/// Holds the single active registration and performs pulls for a sink.
///
/// A source that ends or fails stays registered, rendering silence, until
/// its session clears it. The sink is therefore held by exactly the session
/// that last played and has not paused or closed since.
#[derive(Default)]
pub struct SourceSlot {
    active: Mutex<Option<ActiveSource>>,
}

impl SourceSlot {
    pub fn owner(&self) -> Option<SessionId> {
        self.active.lock().as_ref().map(|active| active.session)
    }

    fn register(&self, registration: Registration) -> Result<(), PlaybackError> {
        let mut active = self.active.lock();
        if let Some(current) = active.as_ref() {
            if current.session != registration.session {
                return Err(PlaybackError::OutputBusy { owner: current.session });
            }
        }
        *active = Some(ActiveSource {
            session: registration.session,
            source: registration.source,
            on_finish: Some(registration.on_finish),
        });
        Ok(())
    }

    pub fn clear(&self, session: SessionId) -> bool {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|current| current.session == session) {
            *active = None;
            true
        } else {
            false
        }
    }

    /// Pull one buffer from the active source, padding with silence.
    /// Returns the number of source samples written.
    pub fn render(&self, out: &mut [f32]) -> usize {
        let (written, finished) = {
            let mut active = self.active.lock();
            let Some(current) = active.as_mut().filter(|current| current.on_finish.is_some()) else {
                out.fill(0.0);
                return 0;
            };
            match current.source.fill(out) {
                Ok(n) if n >= out.len() => return n,
                Ok(n) => {
                    out[n..].fill(0.0);
                    (n, current.on_finish.take().map(|cb| (current.session, cb, Ok(()))))
                }
                Err(e) => {
                    out.fill(0.0);
                    (0, current.on_finish.take().map(|cb| (current.session, cb, Err(e))))
                }
            }
        };

        if let Some((session, on_finish, outcome)) = finished {
            log::debug!("Session {} drained: {:?}", session, outcome.as_ref().err());
            on_finish(outcome);
        }
        written
    }

    /// Report `err` to the active registration and stop pulling from it.
    pub fn fail(&self, err: PlaybackError) {
        let on_finish = self.active.lock().as_mut().and_then(|current| current.on_finish.take());
        if let Some(on_finish) = on_finish {
            on_finish(Err(err));
        }
    }
}

/// Shared format rule: same format is a no-op, a different format needs an
/// idle slot, and `reconfigure` runs only when the format actually changes.
/// A failed `reconfigure` leaves the sink unconfigured.
fn ensure_format(
    current: &mut Option<StreamFormat>,
    requested: StreamFormat,
    slot: &SourceSlot,
    reconfigure: impl FnOnce(StreamFormat) -> Result<(), PlaybackError>,
) -> Result<(), PlaybackError> {
    if *current == Some(requested) {
        return Ok(());
    }
    if let Some(owner) = slot.owner() {
        return Err(PlaybackError::OutputInitError(format!(
            "output is playing session {} at {}, cannot switch to {}",
            owner,
            current.map(|f| f.to_string()).unwrap_or_default(),
            requested
        )));
    }
    if let Err(e) = reconfigure(requested) {
        // The old stream may already be torn down; force a rebuild next time
        *current = None;
        return Err(e);
    }
    *current = Some(requested);
    Ok(())
}

/// Sink without hardware. Each `render` call is one pull of the delivery loop.
#[derive(Default)]
pub struct MemorySink {
    slot: SourceSlot,
    format: Mutex<Option<StreamFormat>>,
    supported_rates: Option<Vec<u32>>,
    registrations: AtomicUsize,
    configurations: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that refuses any sample rate not listed.
    pub fn with_supported_rates(rates: &[u32]) -> Self {
        Self {
            supported_rates: Some(rates.to_vec()),
            ..Self::default()
        }
    }

    pub fn render(&self, out: &mut [f32]) -> usize {
        self.slot.render(out)
    }

    /// Fail the active registration as a broken device would.
    pub fn fail(&self, reason: &str) {
        self.slot.fail(PlaybackError::StreamFailed(reason.to_string()));
    }

    /// Number of accepted `play` registrations.
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Number of times the sink switched format.
    pub fn configurations(&self) -> usize {
        self.configurations.load(Ordering::SeqCst)
    }

    fn reconfigure(&self, format: StreamFormat) -> Result<(), PlaybackError> {
        if let Some(rates) = &self.supported_rates {
            if !rates.contains(&format.sample_rate) {
                return Err(PlaybackError::OutputInitError(format!(
                    "sample rate {} Hz is not supported",
                    format.sample_rate
                )));
            }
        }
        self.configurations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl OutputSink for MemorySink {
    fn init(&self, format: StreamFormat) -> Result<(), PlaybackError> {
        let mut current = self.format.lock();
        ensure_format(&mut *current, format, &self.slot, |f| self.reconfigure(f))
    }

    fn play(&self, registration: Registration) -> Result<(), PlaybackError> {
        let mut current = self.format.lock();
        if let Some(owner) = self.slot.owner().filter(|owner| *owner != registration.session) {
            return Err(PlaybackError::OutputBusy { owner });
        }
        ensure_format(&mut *current, registration.format, &self.slot, |f| self.reconfigure(f))?;
        self.slot.register(registration)?;
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self, session: SessionId) -> bool {
        self.slot.clear(session)
    }

    fn format(&self) -> Option<StreamFormat> {
        *self.format.lock()
    }

    fn active_session(&self) -> Option<SessionId> {
        self.slot.owner()
    }
}

/// Sink on the default cpal output device.
///
/// The cpal stream lives on a dedicated output thread because streams are not
/// `Send` on every host; the data callback pulls from the shared slot.
pub struct CpalSink {
    slot: Arc<SourceSlot>,
    state: Mutex<CpalState>,
}

#[derive(Default)]
struct CpalState {
    format: Option<StreamFormat>,
    thread: Option<OutputThread>,
}

impl CpalSink {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(SourceSlot::default()),
            state: Mutex::new(CpalState::default()),
        }
    }

    fn reconfigure(&self, thread: &mut Option<OutputThread>, format: StreamFormat) -> Result<(), PlaybackError> {
        // The old stream must be gone before the device is reopened
        thread.take();
        *thread = Some(OutputThread::spawn(format, self.slot.clone())?);
        log::info!("Audio output initialized at {}", format);
        Ok(())
    }
}

impl Default for CpalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for CpalSink {
    fn init(&self, format: StreamFormat) -> Result<(), PlaybackError> {
        let mut state = self.state.lock();
        let CpalState { format: current, thread } = &mut *state;
        ensure_format(current, format, &self.slot, |f| self.reconfigure(thread, f))
    }

    fn play(&self, registration: Registration) -> Result<(), PlaybackError> {
        let mut state = self.state.lock();
        if let Some(owner) = self.slot.owner().filter(|owner| *owner != registration.session) {
            return Err(PlaybackError::OutputBusy { owner });
        }
        let CpalState { format: current, thread } = &mut *state;
        ensure_format(current, registration.format, &self.slot, |f| self.reconfigure(thread, f))?;
        self.slot.register(registration)
    }

    fn clear(&self, session: SessionId) -> bool {
        self.slot.clear(session)
    }

    fn format(&self) -> Option<StreamFormat> {
        self.state.lock().format
    }

    fn active_session(&self) -> Option<SessionId> {
        self.slot.owner()
    }
}

/// Owns one running cpal stream. Dropping it stops the stream.
struct OutputThread {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl OutputThread {
    fn spawn(format: StreamFormat, slot: Arc<SourceSlot>) -> Result<Self, PlaybackError> {
        let (ready_tx, ready_rx) = bounded::<Result<(), PlaybackError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("megajam-output".to_string())
            .spawn(move || {
                let stream = match open_stream(format, slot) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Returns on a stop message or when the sender is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| PlaybackError::OutputInitError(format!("failed to spawn output thread: {}", e)))?;

        let startup = ready_rx.recv().unwrap_or_else(|_| {
            Err(PlaybackError::OutputInitError("output thread exited during startup".to_string()))
        });
        let mut thread = Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        };
        match startup {
            Ok(()) => Ok(thread),
            Err(e) => {
                thread.stop();
                Err(e)
            }
        }
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Audio output thread panicked");
            }
        }
    }
}

impl Drop for OutputThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_stream(format: StreamFormat, slot: Arc<SourceSlot>) -> Result<Stream, PlaybackError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlaybackError::OutputInitError("No output device available".to_string()))?;

    let rate = format.sample_rate;
    let supported = device
        .supported_output_configs()
        .map_err(|e| PlaybackError::OutputInitError(format!("Failed to query output configs: {}", e)))?
        .filter(|range| range.min_sample_rate().0 <= rate && rate <= range.max_sample_rate().0)
        .max_by_key(|range| config_preference(range.channels(), range.sample_format(), format.channels))
        .ok_or_else(|| {
            PlaybackError::OutputInitError(format!("Output device does not support {} Hz", rate))
        })?
        .with_sample_rate(SampleRate(rate));

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let source_channels = format.channels.max(1) as usize;

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, slot, source_channels)?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, slot, source_channels)?,
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, slot, source_channels)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, slot, source_channels)?,
        other => {
            return Err(PlaybackError::OutputInitError(format!(
                "Unsupported sample format: {:?}",
                other
            )))
        }
    };

    stream
        .play()
        .map_err(|e| PlaybackError::OutputInitError(format!("Failed to start stream: {}", e)))?;
    Ok(stream)
}

/// Prefer the source's own channel count, then stereo, then float samples.
fn config_preference(device_channels: u16, sample_format: cpal::SampleFormat, source_channels: u16) -> u8 {
    let channel_score = if device_channels == source_channels {
        4
    } else if device_channels == 2 {
        2
    } else {
        0
    };
    channel_score + u8::from(sample_format == cpal::SampleFormat::F32)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    slot: Arc<SourceSlot>,
    source_channels: usize,
) -> Result<Stream, PlaybackError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let device_channels = config.channels.max(1) as usize;
    let error_slot = slot.clone();
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / device_channels;
                scratch.resize(frames * source_channels, 0.0);
                slot.render(&mut scratch);
                remap_channels(&scratch, source_channels, data, device_channels);
            },
            move |err| {
                log::error!("Audio output error: {}", err);
                error_slot.fail(PlaybackError::StreamFailed(err.to_string()));
            },
            None,
        )
        .map_err(|e| PlaybackError::OutputInitError(format!("Failed to build output stream: {}", e)))
}

/// Copy frames between channel layouts: mono is duplicated to every output
/// channel, surplus source channels are dropped, missing ones are silent.
fn remap_channels<T>(src: &[f32], src_channels: usize, dst: &mut [T], dst_channels: usize)
where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    for (in_frame, out_frame) in src.chunks(src_channels).zip(dst.chunks_mut(dst_channels)) {
        for (ch, out) in out_frame.iter_mut().enumerate() {
            let value = if src_channels == 1 {
                in_frame[0]
            } else {
                in_frame.get(ch).copied().unwrap_or(0.0)
            };
            *out = T::from_sample(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    /// Counts down from `remaining`, one sample per value.
    struct Countdown {
        remaining: usize,
    }

    impl SampleSource for Countdown {
        fn fill(&mut self, out: &mut [f32]) -> Result<usize, PlaybackError> {
            let n = self.remaining.min(out.len());
            for (i, s) in out[..n].iter_mut().enumerate() {
                *s = (self.remaining - i) as f32;
            }
            self.remaining -= n;
            Ok(n)
        }
    }

    fn registration(
        session: SessionId,
        remaining: usize,
        finished: Arc<AtomicBool>,
    ) -> Registration {
        Registration {
            session,
            format: StreamFormat { sample_rate: 44100, channels: 2 },
            source: Box::new(Countdown { remaining }),
            on_finish: Box::new(move |outcome| {
                assert!(outcome.is_ok());
                assert!(!finished.swap(true, Ordering::SeqCst));
            }),
        }
    }

    #[test]
    fn test_render_pads_and_finishes_once() {
        let sink = MemorySink::new();
        let id = SessionId::next();
        let finished = Arc::new(AtomicBool::new(false));
        sink.play(registration(id, 6, finished.clone())).unwrap();

        let mut buf = [9.0f32; 4];
        assert_eq!(sink.render(&mut buf), 4);
        assert!(!finished.load(Ordering::SeqCst));

        assert_eq!(sink.render(&mut buf), 2);
        assert_eq!(buf, [2.0, 1.0, 0.0, 0.0]);
        assert!(finished.load(Ordering::SeqCst));

        // Drained sources keep the sink until their session lets go
        assert_eq!(sink.active_session(), Some(id));
        assert_eq!(sink.render(&mut buf), 0);
        assert_eq!(buf, [0.0; 4]);
        assert!(sink.clear(id));
        assert_eq!(sink.active_session(), None);
    }

    #[test]
    fn test_second_session_is_refused() {
        let sink = MemorySink::new();
        let first = SessionId::next();
        let second = SessionId::next();
        sink.play(registration(first, 100, Arc::new(AtomicBool::new(false)))).unwrap();

        let err = sink.play(registration(second, 100, Arc::new(AtomicBool::new(false)))).unwrap_err();
        assert!(matches!(err, PlaybackError::OutputBusy { owner } if owner == first));

        assert!(!sink.clear(second));
        assert!(sink.clear(first));
        sink.play(registration(second, 100, Arc::new(AtomicBool::new(false)))).unwrap();
        assert_eq!(sink.active_session(), Some(second));
    }

    #[test]
    fn test_clear_does_not_fire_finish() {
        let sink = MemorySink::new();
        let id = SessionId::next();
        let finished = Arc::new(AtomicBool::new(false));
        sink.play(registration(id, 100, finished.clone())).unwrap();
        assert!(sink.clear(id));
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_init_rules() {
        let sink = MemorySink::with_supported_rates(&[44100, 48000]);
        let cd = StreamFormat { sample_rate: 44100, channels: 2 };
        let dat = StreamFormat { sample_rate: 48000, channels: 2 };

        sink.init(cd).unwrap();
        sink.init(cd).unwrap();
        assert_eq!(sink.configurations(), 1);

        // Idle sink may switch rate
        sink.init(dat).unwrap();
        assert_eq!(sink.format(), Some(dat));

        let odd = StreamFormat { sample_rate: 11025, channels: 1 };
        assert!(matches!(sink.init(odd), Err(PlaybackError::OutputInitError(_))));
        assert_eq!(sink.format(), None);
        sink.init(dat).unwrap();
        assert_eq!(sink.format(), Some(dat));

        // Busy sink keeps its rate
        let id = SessionId::next();
        let mut reg = registration(id, 100, Arc::new(AtomicBool::new(false)));
        reg.format = dat;
        sink.play(reg).unwrap();
        assert!(matches!(sink.init(cd), Err(PlaybackError::OutputInitError(_))));
        sink.init(dat).unwrap();
    }

    #[test]
    fn test_failed_switch_forces_rebuild() {
        let sink = MemorySink::with_supported_rates(&[44100]);
        let cd = StreamFormat { sample_rate: 44100, channels: 2 };
        let dat = StreamFormat { sample_rate: 48000, channels: 2 };

        sink.init(cd).unwrap();
        assert!(sink.init(dat).is_err());
        assert_eq!(sink.format(), None);

        // Returning to the old format must build the output again
        sink.init(cd).unwrap();
        assert_eq!(sink.configurations(), 2);
        assert_eq!(sink.format(), Some(cd));

        let id = SessionId::next();
        let mut reg = registration(id, 100, Arc::new(AtomicBool::new(false)));
        reg.format = dat;
        assert!(sink.play(reg).is_err());
        assert_eq!(sink.active_session(), None);
        assert_eq!(sink.format(), None);
    }

    #[test]
    fn test_fail_reports_error() {
        let sink = MemorySink::new();
        let id = SessionId::next();
        let outcome = Arc::new(Mutex::new(None));
        let seen = outcome.clone();
        sink.play(Registration {
            session: id,
            format: StreamFormat { sample_rate: 44100, channels: 1 },
            source: Box::new(Countdown { remaining: 10 }),
            on_finish: Box::new(move |result| {
                *seen.lock() = Some(result.map_err(|e| e.to_string()));
            }),
        })
        .unwrap();

        sink.fail("device unplugged");
        sink.fail("device unplugged");
        assert_eq!(sink.active_session(), Some(id));
        let reported = outcome.lock().take().unwrap();
        assert!(reported.unwrap_err().contains("device unplugged"));
    }

    #[test]
    fn test_remap_mono_to_stereo() {
        let src = [0.5f32, -0.25];
        let mut dst = [0.0f32; 4];
        remap_channels(&src, 1, &mut dst, 2);
        assert_eq!(dst, [0.5, 0.5, -0.25, -0.25]);
    }

    #[test]
    fn test_remap_surround_to_stereo_and_back() {
        let src = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut dst = [0.0f32; 4];
        remap_channels(&src, 3, &mut dst, 2);
        assert_eq!(dst, [1.0, 2.0, 4.0, 5.0]);

        let mut wide = [9.0f32; 3];
        remap_channels(&[0.1f32, 0.2], 2, &mut wide, 3);
        assert_eq!(wide, [0.1, 0.2, 0.0]);
    }

    #[test]
    fn test_config_preference_orders_layouts() {
        use cpal::SampleFormat::{F32, I16};
        assert!(config_preference(2, I16, 2) > config_preference(6, F32, 2));
        assert!(config_preference(2, F32, 1) > config_preference(2, I16, 1));
        assert!(config_preference(1, I16, 1) > config_preference(2, F32, 1));
    }
}
