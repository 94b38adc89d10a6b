//! Persistence for the MRU prefetch hint file (§4.9, §9 "Prefetch timer").
//!
//! Supersedes the older timer-based directory-walk prefetch design: the MRU
//! is written out after every reconciliation (write-temp-then-rename, same
//! discipline as the disk cache's entries) and read back at startup to seed
//! a prefetch pass through the ordinary lookup path.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::module_key::ModuleKey;

#[derive(Serialize, Deserialize)]
struct MruStateFile {
    symbols: Vec<(String, String)>,
}

/// Reads the persisted key list, capped at `max_entries`. A missing file or
/// a parse failure is not fatal: logs and returns an empty list.
pub async fn read(path: &Path, max_entries: usize) -> Vec<ModuleKey> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            log::warn!("error reading MRU state file {}: {}", path.display(), e);
            return Vec::new();
        }
    };
    match serde_json::from_slice::<MruStateFile>(&bytes) {
        Ok(parsed) => parsed
            .symbols
            .into_iter()
            .take(max_entries)
            .map(|(lib, id)| ModuleKey::new(lib, id))
            .collect(),
        Err(e) => {
            log::warn!("error parsing MRU state file {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Persists `mru`, capped at `max_entries`, via write-temp-then-rename.
pub async fn write(path: &Path, mru: &[ModuleKey], max_entries: usize) {
    let state = MruStateFile {
        symbols: mru
            .iter()
            .take(max_entries)
            .map(|k| (k.lib_name.clone(), k.breakpad_id.clone()))
            .collect(),
    };
    let bytes = match serde_json::to_vec(&state) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("error serializing MRU state: {e}");
            return;
        }
    };
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        log::warn!("MRU state file path {} has no parent directory", path.display());
        return;
    };
    let temp = match tempfile::NamedTempFile::new_in(parent) {
        Ok(temp) => temp,
        Err(e) => {
            log::warn!("error creating temp file for MRU state: {e}");
            return;
        }
    };
    use std::io::Write;
    let mut temp = temp;
    if let Err(e) = temp.write_all(&bytes) {
        log::warn!("error writing MRU state temp file: {e}");
        return;
    }
    if let Err(e) = temp.persist(path) {
        log::warn!("error persisting MRU state file {}: {}", path.display(), e.error);
    }
}
