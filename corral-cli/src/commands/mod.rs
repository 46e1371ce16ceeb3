//! CLI command implementations

pub mod hook;
pub mod run;
pub mod status;

pub use hook::HookArgs;
pub use run::RunArgs;
pub use status::StatusArgs;

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resolve a possibly relative directory against the current directory
pub(crate) fn absolute(dir: &Path) -> anyhow::Result<PathBuf> {
    if dir.is_absolute() {
        Ok(dir.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(dir))
    }
}

/// Running time rounded to whole seconds
pub(crate) fn format_elapsed(elapsed: Duration) -> String {
    humantime::format_duration(Duration::from_secs(elapsed.as_secs())).to_string()
}
