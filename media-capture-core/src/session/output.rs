//! Output file naming.

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const RECORDING_PREFIX: &str = "testclip";
pub const IMAGE_PREFIX: &str = "img";

/// First usable directory of: Documents, My Documents, home, the current
/// directory, the temp directory.
pub fn default_directory() -> PathBuf {
    let home = env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from);
    let mut candidates = Vec::new();
    if let Some(home) = home {
        candidates.push(home.join("Documents"));
        candidates.push(home.join("My Documents"));
        candidates.push(home);
    }
    if let Ok(cwd) = env::current_dir() {
        candidates.push(cwd);
    }
    candidates
        .into_iter()
        .find(|dir| is_writable_dir(dir))
        .unwrap_or_else(env::temp_dir)
}

fn is_writable_dir(dir: &Path) -> bool {
    fs::metadata(dir)
        .map(|m| m.is_dir() && !m.permissions().readonly())
        .unwrap_or(false)
}

/// `dir/<prefix>_NNNN.<extension>` with NNNN one past the highest existing
/// sequence number for that prefix and extension. Once the numbering is
/// exhausted the lowest free number is used instead.
pub fn generate_file_name(dir: &Path, prefix: &str, extension: &str) -> PathBuf {
    let used: BTreeSet<u32> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| {
                    sequence_number(&entry.file_name().to_string_lossy(), prefix, extension)
                })
                .collect()
        })
        .unwrap_or_default();
    let next = match used.last() {
        None => 1,
        Some(&highest) => highest
            .checked_add(1)
            .or_else(|| (1..=u32::MAX).find(|n| !used.contains(n)))
            .unwrap_or(highest),
    };
    dir.join(format!("{}_{:04}.{}", prefix, next, extension))
}

fn sequence_number(file_name: &str, prefix: &str, extension: &str) -> Option<u32> {
    let stem = file_name
        .strip_prefix(prefix)?
        .strip_prefix('_')?
        .strip_suffix(extension)?
        .strip_suffix('.')?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}
