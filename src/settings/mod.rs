// Application settings
// JSON file with defaults for every field

#[allow(clippy::module_inception)]
pub mod settings;

pub use settings::{AppSettings, LayoutSettings, Mode, PlaybackSettings, SettingsError};
