// src/util.rs

use anyhow::{Context, Result};
use std::path::Path;

/// Read a UTF-8 file into a String with a clear error message.
///
/// This is mainly used for:
/// - cumulusci.yml
/// - git metadata
/// - generated seed data
pub fn read_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file {:?}", path))
}

/// Ensure a directory exists (create it if missing).
///
/// This is used when:
/// - creating the keychain directory
/// - extracting job checkouts and dependencies
/// - writing workflow templates
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory {:?}", path))
}

/// Current unix time in whole seconds.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Shorten a value for table cells, appending an ellipsis when cut.
pub fn crop(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Mask a secret, leaving a short recognisable prefix.
pub fn mask(secret: &str) -> String {
    let prefix: String = secret.chars().take(7).collect();
    format!("{}...", prefix)
}
