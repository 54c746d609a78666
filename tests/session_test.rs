// End-to-end session behaviour against the in-memory sink
mod common;

use std::sync::Arc;
use std::time::Duration;

use megajam::audio::gain::Gain;
use megajam::{MemorySink, OutputSink, PlaybackError, PlaybackOutcome, PlaybackSession, StreamFormat};

#[test]
fn test_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = common::stereo_track(dir.path(), "deck.wav");
    let sink = Arc::new(MemorySink::new());

    let session = PlaybackSession::open(&path, sink.clone()).unwrap();
    assert_eq!(session.format(), StreamFormat { sample_rate: 8000, channels: 2 });
    assert_eq!(session.duration(), Some(Duration::from_secs(1)));

    session.play().unwrap();
    assert!(!session.is_paused());
    session.pause();
    assert!(session.is_paused());
    session.play().unwrap();
    assert!(!session.is_paused());

    session.close();
    session.close();
    assert!(session.is_closed());
    assert!(session.is_paused());
    assert_eq!(sink.active_session(), None);

    // Transport after close does nothing
    session.play().unwrap();
    assert!(session.is_paused());
    assert_eq!(sink.active_session(), None);
}

#[test]
fn test_repeated_play_registers_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = common::stereo_track(dir.path(), "deck.wav");
    let sink = Arc::new(MemorySink::new());
    let session = PlaybackSession::open(&path, sink.clone()).unwrap();

    session.play().unwrap();
    session.play().unwrap();
    session.play().unwrap();
    assert_eq!(sink.registrations(), 1);
    assert_eq!(sink.active_session(), Some(session.id()));
}

#[test]
fn test_pause_keeps_position() {
    let dir = tempfile::tempdir().unwrap();
    let path = common::stereo_track(dir.path(), "deck.wav");
    let sink = Arc::new(MemorySink::new());
    let session = PlaybackSession::open(&path, sink.clone()).unwrap();

    session.play().unwrap();
    let mut buf = vec![0.0f32; 4000];
    sink.render(&mut buf);
    assert_eq!(session.position(), Duration::from_millis(250));

    session.pause();
    session.pause();
    // Nothing is pulled while paused
    assert_eq!(sink.render(&mut buf), 0);
    assert!(buf.iter().all(|s| *s == 0.0));
    assert_eq!(session.position(), Duration::from_millis(250));

    session.play().unwrap();
    sink.render(&mut buf);
    assert_eq!(session.position(), Duration::from_millis(500));
}

#[test]
fn test_volume_scales_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = common::stereo_track(dir.path(), "deck.wav");
    let sink = Arc::new(MemorySink::new());
    let session = PlaybackSession::open(&path, sink.clone()).unwrap();
    session.play().unwrap();

    let mut loud = vec![0.0f32; 160];
    sink.render(&mut loud);
    assert!(loud.iter().any(|s| s.abs() > 0.2));

    session.set_volume(0.0).unwrap();
    assert_eq!(session.volume_db(), -96.0);
    assert_eq!(session.gain().amplitude, 0.0);
    let mut muted = vec![1.0f32; 160];
    sink.render(&mut muted);
    assert!(muted.iter().all(|s| *s == 0.0));

    session.set_volume(0.75).unwrap();
    assert!((session.volume_db() - (-24.0)).abs() < 1e-4);
}

#[test]
fn test_invalid_volume_keeps_previous_gain() {
    let dir = tempfile::tempdir().unwrap();
    let path = common::stereo_track(dir.path(), "deck.wav");
    let session = PlaybackSession::open(&path, Arc::new(MemorySink::new())).unwrap();

    session.set_volume(0.5).unwrap();
    for level in [-0.1, 1.5, f32::NAN, f32::INFINITY] {
        let err = session.set_volume(level).unwrap_err();
        assert!(matches!(err, PlaybackError::InvalidArgument(_)));
    }
    assert!((session.volume_db() - (-48.0)).abs() < 1e-4);
}

#[test]
fn test_missing_file_is_resource_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemorySink::new());
    let err = PlaybackSession::open(dir.path().join("gone.mp3"), sink.clone()).err().unwrap();
    assert!(matches!(err, PlaybackError::ResourceUnavailable { .. }));
    assert_eq!(sink.format(), None);
}

#[test]
fn test_undecodable_files_are_decode_errors() {
    let dir = tempfile::tempdir().unwrap();
    let empty = dir.path().join("empty.mp3");
    std::fs::write(&empty, b"").unwrap();
    let text = dir.path().join("notes.mp3");
    std::fs::write(&text, "set list: opener, closer\n".repeat(64)).unwrap();

    let sink = Arc::new(MemorySink::new());
    for path in [empty, text] {
        let err = PlaybackSession::open(&path, sink.clone()).err().unwrap();
        assert!(matches!(err, PlaybackError::DecodeError { .. }), "{}: {:?}", path.display(), err);
    }
    assert_eq!(sink.configurations(), 0);
}

#[test]
fn test_format_change_refused_while_busy() {
    let dir = tempfile::tempdir().unwrap();
    let stereo = common::stereo_track(dir.path(), "stereo.wav");
    let mono = dir.path().join("mono.wav");
    common::write_wav(&mono, 22050, 1, &[0; 2205]);

    let sink = Arc::new(MemorySink::new());
    let deck_a = PlaybackSession::open(&stereo, sink.clone()).unwrap();
    deck_a.play().unwrap();

    let err = PlaybackSession::open(&mono, sink.clone()).err().unwrap();
    assert!(matches!(err, PlaybackError::OutputInitError(_)));

    deck_a.pause();
    let deck_b = PlaybackSession::open(&mono, sink.clone()).unwrap();
    assert_eq!(sink.format(), Some(deck_b.format()));
    assert_eq!(sink.configurations(), 2);
}

#[test]
fn test_completion_dropped_when_closed_early() {
    let dir = tempfile::tempdir().unwrap();
    let path = common::stereo_track(dir.path(), "deck.wav");
    let sink = Arc::new(MemorySink::new());
    let session = PlaybackSession::open(&path, sink.clone()).unwrap();
    let mut done = session.take_completion().unwrap();

    session.play().unwrap();
    session.close();
    drop(session);
    assert!(matches!(done.try_recv(), Err(tokio::sync::oneshot::error::TryRecvError::Closed)));
}

#[test]
fn test_completion_reported_after_full_render() {
    let dir = tempfile::tempdir().unwrap();
    let path = common::stereo_track(dir.path(), "deck.wav");
    let sink = Arc::new(MemorySink::new());
    let session = PlaybackSession::open(&path, sink.clone()).unwrap();
    let done = session.take_completion().unwrap();
    session.play().unwrap();

    let mut buf = vec![0.0f32; 1024];
    let mut total = 0;
    for _ in 0..32 {
        total += sink.render(&mut buf);
    }
    assert_eq!(total, 16000);
    assert_eq!(done.blocking_recv().unwrap(), PlaybackOutcome::Finished);
}

#[test]
fn test_mp3_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = common::mp3_track(dir.path());
    let sink = Arc::new(MemorySink::new());

    let session = PlaybackSession::open(&path, sink.clone()).unwrap();
    assert_eq!(session.format(), StreamFormat { sample_rate: 22050, channels: 1 });
    if let Some(duration) = session.duration() {
        assert!((duration.as_secs_f64() - 1.175).abs() < 0.05);
    }
    let done = session.take_completion().unwrap();

    session.play().unwrap();
    let mut buf = vec![0.0f32; 2205];
    sink.render(&mut buf);
    assert_eq!(session.position(), Duration::from_millis(100));
    session.pause();
    assert_eq!(sink.active_session(), None);
    session.play().unwrap();

    let mut total = 2205;
    for _ in 0..20 {
        total += sink.render(&mut buf);
    }
    assert!((40 * 576..=45 * 576).contains(&total));
    assert_eq!(done.blocking_recv().unwrap(), PlaybackOutcome::Finished);

    session.close();
    session.close();
    assert_eq!(sink.active_session(), None);
}

#[test]
fn test_position_with_odd_buffer_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let path = common::stereo_track(dir.path(), "deck.wav");
    let sink = Arc::new(MemorySink::new());
    let session = PlaybackSession::open(&path, sink.clone()).unwrap();
    session.play().unwrap();

    let mut buf = [0.0f32; 3];
    for _ in 0..4000 {
        assert_eq!(sink.render(&mut buf), 3);
    }
    assert_eq!(session.position(), Duration::from_millis(750));
}

#[test]
fn test_concurrent_transport_and_volume() {
    let dir = tempfile::tempdir().unwrap();
    let path = common::stereo_track(dir.path(), "deck.wav");
    let sink = Arc::new(MemorySink::new());
    let session = PlaybackSession::open(&path, sink.clone()).unwrap();

    let levels: Vec<f32> = (0..100).map(|i| i as f32 / 99.0).collect();
    std::thread::scope(|s| {
        for level in &levels {
            let session = &session;
            s.spawn(move || session.set_volume(*level).unwrap());
        }
        for i in 0..100 {
            let session = &session;
            s.spawn(move || {
                if i % 2 == 0 {
                    session.play().unwrap();
                } else {
                    session.pause();
                }
            });
        }
        s.spawn(|| {
            let mut buf = vec![0.0f32; 64];
            for _ in 0..100 {
                sink.render(&mut buf);
                let gain = session.gain();
                assert_eq!(gain, Gain::from_db(gain.db));
            }
        });
    });

    assert_eq!(session.is_paused(), sink.active_session() != Some(session.id()));
    let gain = session.gain();
    assert_eq!(gain, Gain::from_db(gain.db));
    assert!(levels.iter().any(|l| (-96.0 + 96.0 * l - gain.db).abs() < 1e-4));
}
