use dirs::data_dir;
use once_cell::sync::Lazy;
use std::{fs, path::Path, path::PathBuf};

static DATA_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    let base = data_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    base.join("salsa-finder")
});

pub fn data_root() -> PathBuf {
    DATA_ROOT.clone()
}

pub fn database_path() -> PathBuf {
    data_root().join("salsa-finder.sqlite")
}

pub fn config_path() -> PathBuf {
    data_root().join("config.json")
}

pub fn ensure_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            tracing::warn!(path = ?parent, "failed to create parent directory: {err}");
        }
    }
}

/// Collapses runs of whitespace into single spaces.
pub fn clean_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cuts `input` to at most `max_chars` characters, appending `marker` when anything was dropped.
pub fn truncate_chars(input: &str, max_chars: usize, marker: &str) -> String {
    match input.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{marker}", &input[..cut]),
        None => input.to_string(),
    }
}
