// Audio playback module
// Uses Symphonia for decoding and cpal for output

pub mod decoder;
pub mod error;
pub mod gain;
pub mod output;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use error::PlaybackError;
pub use output::{CpalSink, MemorySink, OutputSink, SessionId, StreamFormat};
pub use session::{PlaybackOutcome, PlaybackSession};
