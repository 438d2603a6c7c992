//! I/O helpers: workspace layout, persistence, processes and filesystem watching.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub mod backup;
pub mod catalog;
pub mod checker;
pub mod config;
pub mod init;
pub mod process;
pub mod progress_store;
pub mod solution;
pub mod watcher;

/// Write `contents` to a sibling temp file, then rename it over `path`.
///
/// Readers observe either the previous file or the complete new one.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    let mut file = File::create(&tmp_path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp_path, path)
}
