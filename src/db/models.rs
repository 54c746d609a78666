// Data models
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: i64,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub file_path: String,
    /// Display string such as "5:42"; informational only.
    pub duration: Option<String>,
    pub bpm: Option<i64>,
    pub musical_key: Option<String>,
    pub date_added: i64,
}

/// Fields supplied when adding a track to the catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTrack {
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub file_path: String,
    pub duration: Option<String>,
    pub bpm: Option<i64>,
    pub musical_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crate {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuePoint {
    pub id: i64,
    pub track_id: i64,
    pub name: String,
    /// Seconds from the start of the track.
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loop {
    pub id: i64,
    pub track_id: i64,
    pub name: String,
    pub start: f64,
    pub end: f64,
}
