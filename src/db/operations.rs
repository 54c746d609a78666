use anyhow::{anyhow, bail};
use rusqlite::{params, OptionalExtension, Row};
use std::path::PathBuf;

use crate::db::connection::DatabaseConnection;
use crate::db::models::{Crate, CuePoint, Loop, NewTrack, Playlist, Track};

const TRACK_COLUMNS: &str =
    "t.id, t.title, t.artist, t.album, t.file_path, t.duration, t.bpm, t.musical_key, t.date_added";

fn track_from_row(row: &Row<'_>) -> rusqlite::Result<Track> {
    Ok(Track {
        id: row.get(0)?,
        title: row.get(1)?,
        artist: row.get(2)?,
        album: row.get(3)?,
        file_path: row.get(4)?,
        duration: row.get(5)?,
        bpm: row.get(6)?,
        musical_key: row.get(7)?,
        date_added: row.get(8)?,
    })
}

/// Playlists and crates share one shape: a named, ordered set of tracks.
#[derive(Clone, Copy)]
enum Collection {
    Playlist,
    Crate,
}

impl Collection {
    fn table(self) -> &'static str {
        match self {
            Collection::Playlist => "playlists",
            Collection::Crate => "crates",
        }
    }

    fn link_table(self) -> &'static str {
        match self {
            Collection::Playlist => "playlist_tracks",
            Collection::Crate => "crate_tracks",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Collection::Playlist => "playlist_id",
            Collection::Crate => "crate_id",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Collection::Playlist => "Playlist",
            Collection::Crate => "Crate",
        }
    }
}

/// Database operations for the track catalog
pub struct DbOperations;

impl DbOperations {
    /// Insert a track, returning its id
    pub fn insert_track(db: &DatabaseConnection, track: &NewTrack) -> Result<i64, anyhow::Error> {
        if track.title.trim().is_empty() {
            bail!("Track title must not be empty");
        }
        if track.file_path.trim().is_empty() {
            bail!("Track path must not be empty");
        }

        let conn = db.get_connection();
        let conn = conn.lock();

        conn.execute(
            "INSERT INTO tracks (title, artist, album, file_path, duration, bpm, musical_key, date_added)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                track.title,
                track.artist,
                track.album,
                track.file_path,
                track.duration,
                track.bpm,
                track.musical_key,
                chrono::Utc::now().timestamp(),
            ],
        )?;

        let id = conn.last_insert_rowid();
        log::debug!("Catalogued track {} at {}", id, track.file_path);
        Ok(id)
    }

    pub fn get_track(db: &DatabaseConnection, track_id: i64) -> Result<Option<Track>, anyhow::Error> {
        let conn = db.get_connection();
        let conn = conn.lock();

        let track = conn
            .query_row(
                &format!("SELECT {} FROM tracks t WHERE t.id = ?1", TRACK_COLUMNS),
                [track_id],
                track_from_row,
            )
            .optional()?;

        Ok(track)
    }

    /// Get all tracks
    pub fn get_all_tracks(db: &DatabaseConnection) -> Result<Vec<Track>, anyhow::Error> {
        let conn = db.get_connection();
        let conn = conn.lock();

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tracks t ORDER BY t.artist, t.title",
            TRACK_COLUMNS
        ))?;
        let tracks = stmt
            .query_map([], track_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(tracks)
    }

    /// Resolve a track id to the file a playback session should open
    pub fn resolve_track_path(db: &DatabaseConnection, track_id: i64) -> Result<PathBuf, anyhow::Error> {
        Self::get_track(db, track_id)?
            .map(|track| PathBuf::from(track.file_path))
            .ok_or_else(|| anyhow!("Track {} not found", track_id))
    }

    pub fn create_playlist(db: &DatabaseConnection, name: &str) -> Result<i64, anyhow::Error> {
        Self::create_collection(db, Collection::Playlist, name)
    }

    pub fn get_all_playlists(db: &DatabaseConnection) -> Result<Vec<Playlist>, anyhow::Error> {
        Ok(Self::list_collection(db, Collection::Playlist)?
            .into_iter()
            .map(|(id, name)| Playlist { id, name })
            .collect())
    }

    pub fn add_track_to_playlist(
        db: &DatabaseConnection,
        playlist_id: i64,
        track_id: i64,
    ) -> Result<(), anyhow::Error> {
        Self::add_to_collection(db, Collection::Playlist, playlist_id, track_id)
    }

    /// Remove a track from a playlist, closing the gap in positions
    pub fn remove_track_from_playlist(
        db: &DatabaseConnection,
        playlist_id: i64,
        track_id: i64,
    ) -> Result<(), anyhow::Error> {
        Self::remove_from_collection(db, Collection::Playlist, playlist_id, track_id)
    }

    pub fn get_playlist_tracks(db: &DatabaseConnection, playlist_id: i64) -> Result<Vec<Track>, anyhow::Error> {
        Self::collection_tracks(db, Collection::Playlist, playlist_id)
    }

    pub fn create_crate(db: &DatabaseConnection, name: &str) -> Result<i64, anyhow::Error> {
        Self::create_collection(db, Collection::Crate, name)
    }

    pub fn get_all_crates(db: &DatabaseConnection) -> Result<Vec<Crate>, anyhow::Error> {
        Ok(Self::list_collection(db, Collection::Crate)?
            .into_iter()
            .map(|(id, name)| Crate { id, name })
            .collect())
    }

    pub fn add_track_to_crate(db: &DatabaseConnection, crate_id: i64, track_id: i64) -> Result<(), anyhow::Error> {
        Self::add_to_collection(db, Collection::Crate, crate_id, track_id)
    }

    pub fn remove_track_from_crate(
        db: &DatabaseConnection,
        crate_id: i64,
        track_id: i64,
    ) -> Result<(), anyhow::Error> {
        Self::remove_from_collection(db, Collection::Crate, crate_id, track_id)
    }

    pub fn get_crate_tracks(db: &DatabaseConnection, crate_id: i64) -> Result<Vec<Track>, anyhow::Error> {
        Self::collection_tracks(db, Collection::Crate, crate_id)
    }

    /// Add a named cue point at `time` seconds
    pub fn add_cue_point(
        db: &DatabaseConnection,
        track_id: i64,
        name: &str,
        time: f64,
    ) -> Result<i64, anyhow::Error> {
        if !time.is_finite() || time < 0.0 {
            bail!("Cue time must be a non-negative number of seconds, got {}", time);
        }

        let conn = db.get_connection();
        let conn = conn.lock();
        conn.execute(
            "INSERT INTO cue_points (track_id, name, time_secs) VALUES (?1, ?2, ?3)",
            params![track_id, name, time],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Cue points of a track, earliest first
    pub fn get_cue_points(db: &DatabaseConnection, track_id: i64) -> Result<Vec<CuePoint>, anyhow::Error> {
        let conn = db.get_connection();
        let conn = conn.lock();

        let mut stmt = conn.prepare(
            "SELECT id, track_id, name, time_secs FROM cue_points WHERE track_id = ?1 ORDER BY time_secs, id",
        )?;
        let cues = stmt
            .query_map([track_id], |row| {
                Ok(CuePoint {
                    id: row.get(0)?,
                    track_id: row.get(1)?,
                    name: row.get(2)?,
                    time: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(cues)
    }

    /// Add a loop spanning `start..end` seconds
    pub fn add_loop(
        db: &DatabaseConnection,
        track_id: i64,
        name: &str,
        start: f64,
        end: f64,
    ) -> Result<i64, anyhow::Error> {
        if !start.is_finite() || !end.is_finite() || start < 0.0 {
            bail!("Loop bounds must be non-negative numbers of seconds");
        }
        if start >= end {
            bail!("Loop start ({}) must be less than end ({})", start, end);
        }

        let conn = db.get_connection();
        let conn = conn.lock();
        conn.execute(
            "INSERT INTO loops (track_id, name, start_secs, end_secs) VALUES (?1, ?2, ?3, ?4)",
            params![track_id, name, start, end],
        )?;

        Ok(conn.last_insert_rowid())
    }

    pub fn get_loops(db: &DatabaseConnection, track_id: i64) -> Result<Vec<Loop>, anyhow::Error> {
        let conn = db.get_connection();
        let conn = conn.lock();

        let mut stmt = conn.prepare(
            "SELECT id, track_id, name, start_secs, end_secs FROM loops WHERE track_id = ?1 ORDER BY start_secs, id",
        )?;
        let loops = stmt
            .query_map([track_id], |row| {
                Ok(Loop {
                    id: row.get(0)?,
                    track_id: row.get(1)?,
                    name: row.get(2)?,
                    start: row.get(3)?,
                    end: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(loops)
    }

    fn create_collection(db: &DatabaseConnection, kind: Collection, name: &str) -> Result<i64, anyhow::Error> {
        let conn = db.get_connection();
        let conn = conn.lock();

        let exists: bool = conn.query_row(
            &format!("SELECT COUNT(*) > 0 FROM {} WHERE name = ?1", kind.table()),
            [name],
            |row| row.get(0),
        )?;
        if exists {
            bail!("{} '{}' already exists", kind.label(), name);
        }

        conn.execute(
            &format!("INSERT INTO {} (name, date_created) VALUES (?1, ?2)", kind.table()),
            params![name, chrono::Utc::now().timestamp()],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn list_collection(db: &DatabaseConnection, kind: Collection) -> Result<Vec<(i64, String)>, anyhow::Error> {
        let conn = db.get_connection();
        let conn = conn.lock();

        let mut stmt = conn.prepare(&format!("SELECT id, name FROM {} ORDER BY name", kind.table()))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn add_to_collection(
        db: &DatabaseConnection,
        kind: Collection,
        collection_id: i64,
        track_id: i64,
    ) -> Result<(), anyhow::Error> {
        let conn = db.get_connection();
        let conn = conn.lock();

        let exists: bool = conn.query_row(
            &format!(
                "SELECT COUNT(*) > 0 FROM {} WHERE {} = ?1 AND track_id = ?2",
                kind.link_table(),
                kind.key()
            ),
            params![collection_id, track_id],
            |row| row.get(0),
        )?;
        if exists {
            bail!("Track already exists in {}", kind.label().to_lowercase());
        }

        let position: i64 = conn.query_row(
            &format!(
                "SELECT COALESCE(MAX(position), -1) + 1 FROM {} WHERE {} = ?1",
                kind.link_table(),
                kind.key()
            ),
            [collection_id],
            |row| row.get(0),
        )?;

        conn.execute(
            &format!(
                "INSERT INTO {} ({}, track_id, position) VALUES (?1, ?2, ?3)",
                kind.link_table(),
                kind.key()
            ),
            params![collection_id, track_id, position],
        )?;

        Ok(())
    }

    fn remove_from_collection(
        db: &DatabaseConnection,
        kind: Collection,
        collection_id: i64,
        track_id: i64,
    ) -> Result<(), anyhow::Error> {
        let conn = db.get_connection();
        let mut conn = conn.lock();
        let tx = conn.transaction()?;

        let position: Option<i64> = tx
            .query_row(
                &format!(
                    "SELECT position FROM {} WHERE {} = ?1 AND track_id = ?2",
                    kind.link_table(),
                    kind.key()
                ),
                params![collection_id, track_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(position) = position else {
            bail!("Track {} is not in {} {}", track_id, kind.label().to_lowercase(), collection_id);
        };

        tx.execute(
            &format!("DELETE FROM {} WHERE {} = ?1 AND track_id = ?2", kind.link_table(), kind.key()),
            params![collection_id, track_id],
        )?;
        tx.execute(
            &format!(
                "UPDATE {} SET position = position - 1 WHERE {} = ?1 AND position > ?2",
                kind.link_table(),
                kind.key()
            ),
            params![collection_id, position],
        )?;
        tx.commit()?;

        log::debug!("Removed track {} from {} {}", track_id, kind.label().to_lowercase(), collection_id);
        Ok(())
    }

    fn collection_tracks(
        db: &DatabaseConnection,
        kind: Collection,
        collection_id: i64,
    ) -> Result<Vec<Track>, anyhow::Error> {
        let conn = db.get_connection();
        let conn = conn.lock();

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tracks t
             INNER JOIN {} l ON t.id = l.track_id
             WHERE l.{} = ?1
             ORDER BY l.position",
            TRACK_COLUMNS,
            kind.link_table(),
            kind.key()
        ))?;
        let tracks = stmt
            .query_map([collection_id], track_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(tracks)
    }
}
