// megajam - playback core of a DJ deck
// Module declarations
pub mod audio;
pub mod db;
pub mod logger;
pub mod settings;

pub use audio::{
    CpalSink, MemorySink, OutputSink, PlaybackError, PlaybackOutcome, PlaybackSession, SessionId,
    StreamFormat,
};
pub use db::{DatabaseConnection, DbOperations};
pub use settings::AppSettings;
