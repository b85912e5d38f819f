//! Atomic JSON files on disk.
//!
//! `meta.json` and `index/index.json` are written through a `.tmp` sibling and
//! renamed into place so readers never observe a half-written file.

use std::io;
use std::path::Path;

/// Serialize `data` as pretty JSON and write it atomically.
///
/// Creates parent directories if they don't exist.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Write raw bytes to a `.tmp` sibling, then rename onto `path`.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load and deserialize JSON. `Ok(None)` when the file doesn't exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let value =
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}
