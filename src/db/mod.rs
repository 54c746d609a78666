// Track catalog
// SQLite store of tracks, playlists, crates, cue points and loops

pub mod connection;
pub mod migrations;
pub mod models;
pub mod operations;

pub use connection::DatabaseConnection;
pub use operations::DbOperations;
