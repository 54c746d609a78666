// Logging setup
// `log` macros everywhere, routed through env_logger to stderr or a log file
use std::fs::OpenOptions;
use std::path::Path;

use env_logger::{Builder, Env, Target};

/// Initialize the global logger. With a path, records are appended to that
/// file (its directory is created); otherwise they go to stderr.
/// `RUST_LOG` overrides the default `info` filter.
pub fn init(log_path: Option<&Path>) -> anyhow::Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    if let Some(path) = log_path {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.try_init()?;
    log::info!("Logger initialized");
    Ok(())
}
