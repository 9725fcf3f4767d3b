//! Where a bot keeps its state files.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub queue: PathBuf,
    pub reviews: PathBuf,
    pub build: PathBuf,
}

impl StatePaths {
    /// `<dir>/<bot>.queue.json`, `<dir>/<bot>.reviews.json` and
    /// `<dir>/<bot>.build.json`, with the bot name made filesystem safe.
    pub fn new(state_dir: &Path, bot_name: &str) -> Self {
        let name = escape_bot_name(bot_name);
        Self {
            queue: state_dir.join(format!("{}.queue.json", name)),
            reviews: state_dir.join(format!("{}.reviews.json", name)),
            build: state_dir.join(format!("{}.build.json", name)),
        }
    }
}

/// Replace characters that are not valid in file names with `-`.
pub fn escape_bot_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' | ' ' => '-',
            other => other,
        })
        .collect()
}
