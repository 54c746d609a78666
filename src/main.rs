use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use megajam::db::models::NewTrack;
use megajam::{logger, AppSettings, CpalSink, DatabaseConnection, DbOperations, PlaybackOutcome, PlaybackSession};

#[derive(Parser, Debug)]
#[command(name = "megajam", version, about = "Headless deck: play tracks and manage the catalog")]
struct Args {
    /// Settings file
    #[arg(long, default_value = "config/settings.json")]
    config: PathBuf,

    /// Log to stderr instead of the configured log file
    #[arg(long)]
    stderr: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play an audio file until it ends
    Play {
        path: PathBuf,
        /// Volume level from 0.0 to 1.0
        #[arg(long)]
        volume: Option<f32>,
    },
    /// Play a catalogued track until it ends
    PlayTrack {
        id: i64,
        #[arg(long)]
        volume: Option<f32>,
    },
    /// Add a track to the catalog
    AddTrack {
        #[arg(long)]
        title: String,
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        artist: Option<String>,
        #[arg(long)]
        album: Option<String>,
        #[arg(long)]
        duration: Option<String>,
        #[arg(long)]
        bpm: Option<i64>,
        #[arg(long)]
        key: Option<String>,
    },
    /// List catalogued tracks
    Tracks,
    /// Store a cue point (seconds)
    AddCue {
        track: i64,
        time: f64,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// List cue points of a track
    Cues { track: i64 },
    /// Store a loop (seconds)
    AddLoop {
        track: i64,
        start: f64,
        end: f64,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// List loops of a track
    Loops { track: i64 },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let settings = AppSettings::load(&args.config)?;
    settings.validate()?;

    let log_path = (!args.stderr).then_some(settings.log_path.as_path());
    logger::init(log_path)?;
    log::info!("Starting megajam ({:?} mode)", settings.mode);

    match args.command {
        Command::Play { path, volume } => {
            play_to_end(&path, volume.unwrap_or(settings.playback.initial_volume))
        }
        Command::PlayTrack { id, volume } => {
            let db = DatabaseConnection::new(&settings.database_path)?;
            let path = DbOperations::resolve_track_path(&db, id)?;
            play_to_end(&path, volume.unwrap_or(settings.playback.initial_volume))
        }
        Command::AddTrack { title, path, artist, album, duration, bpm, key } => {
            let db = DatabaseConnection::new(&settings.database_path)?;
            let id = DbOperations::insert_track(
                &db,
                &NewTrack {
                    title,
                    artist,
                    album,
                    file_path: path.to_string_lossy().into_owned(),
                    duration,
                    bpm,
                    musical_key: key,
                },
            )?;
            println!("{}", id);
            Ok(())
        }
        Command::Tracks => {
            let db = DatabaseConnection::new(&settings.database_path)?;
            for track in DbOperations::get_all_tracks(&db)? {
                println!(
                    "{:>5}  {}  {}  {}  {}",
                    track.id,
                    track.title,
                    track.artist.as_deref().unwrap_or("-"),
                    track.bpm.map(|b| b.to_string()).unwrap_or_else(|| "-".to_string()),
                    track.file_path
                );
            }
            Ok(())
        }
        Command::AddCue { track, time, name } => {
            let db = DatabaseConnection::new(&settings.database_path)?;
            println!("{}", DbOperations::add_cue_point(&db, track, &name, time)?);
            Ok(())
        }
        Command::Cues { track } => {
            let db = DatabaseConnection::new(&settings.database_path)?;
            for cue in DbOperations::get_cue_points(&db, track)? {
                println!("{:>5}  {:>9.3}s  {}", cue.id, cue.time, cue.name);
            }
            Ok(())
        }
        Command::AddLoop { track, start, end, name } => {
            let db = DatabaseConnection::new(&settings.database_path)?;
            println!("{}", DbOperations::add_loop(&db, track, &name, start, end)?);
            Ok(())
        }
        Command::Loops { track } => {
            let db = DatabaseConnection::new(&settings.database_path)?;
            for l in DbOperations::get_loops(&db, track)? {
                println!("{:>5}  {:>9.3}s - {:>9.3}s  {}", l.id, l.start, l.end, l.name);
            }
            Ok(())
        }
    }
}

fn play_to_end(path: &Path, volume: f32) -> Result<()> {
    let sink = Arc::new(CpalSink::new());
    let session = PlaybackSession::open(path, sink)?;
    session.set_volume(volume)?;
    let done = session
        .take_completion()
        .context("completion signal already taken")?;

    session.play()?;
    let outcome = done.blocking_recv();
    session.close();

    match outcome {
        Ok(PlaybackOutcome::Finished) => Ok(()),
        Ok(PlaybackOutcome::Failed(reason)) => Err(anyhow::anyhow!("playback failed: {}", reason)),
        Err(_) => Err(anyhow::anyhow!("playback ended without a completion signal")),
    }
}
