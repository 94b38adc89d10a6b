//! Module identity: `(libName, breakpadId)`, the key shared by both cache
//! tiers, the MRU list, and the on-disk filename encoding.

use std::path::PathBuf;

/// A loaded module, identified the way the client's memory map identifies it.
///
/// `lib_name` matches `[0-9a-zA-Z_+\-.]*`; empty means "frame not
/// attributable to any module" and is never looked up. `breakpad_id` is
/// conventionally a 33-character uppercase hex string (32-char signature +
/// lowercase-hex age), but this type does not enforce that shape beyond the
/// `@`-safety required for the disk filename encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleKey {
    pub lib_name: String,
    pub breakpad_id: String,
}

impl ModuleKey {
    pub fn new(lib_name: impl Into<String>, breakpad_id: impl Into<String>) -> Self {
        ModuleKey {
            lib_name: lib_name.into(),
            breakpad_id: breakpad_id.into(),
        }
    }

    /// A module is skipped rather than looked up when its `lib_name` is empty.
    pub fn is_attributable(&self) -> bool {
        !self.lib_name.is_empty()
    }

    /// `libName` must match this character class; empty is valid (and means
    /// "unattributable"). Neither component may contain `@`, the disk
    /// filename delimiter.
    pub fn is_well_formed(&self) -> bool {
        let lib_name_ok = self
            .lib_name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'+' | b'-' | b'.'));
        lib_name_ok && !self.breakpad_id.contains('@') && !self.lib_name.contains('@')
    }

    /// The on-disk filename for this key: `{breakpadId}@{libName}`.
    pub fn disk_file_name(&self) -> String {
        format!("{}@{}", self.breakpad_id, self.lib_name)
    }

    pub fn disk_path(&self, cache_dir: &std::path::Path) -> PathBuf {
        cache_dir.join(self.disk_file_name())
    }

    /// Splits a disk cache filename of the form `{breakpadId}@{libName}` back
    /// into a key. Returns `None` for names with no `@`, per §4.3.
    pub fn from_disk_file_name(file_name: &str) -> Option<Self> {
        let (breakpad_id, lib_name) = file_name.split_once('@')?;
        Some(ModuleKey::new(lib_name, breakpad_id))
    }

    /// The filename the fetcher pipeline looks for alongside this module:
    /// `libName` with a `.pdb` extension swapped for `.sym`, else `libName +
    /// ".sym"`.
    pub fn sym_file_name(&self) -> String {
        if let Some(stem) = self.lib_name.strip_suffix(".pdb") {
            format!("{stem}.sym")
        } else if self.lib_name.ends_with(".sym") {
            self.lib_name.clone()
        } else {
            format!("{}.sym", self.lib_name)
        }
    }
}

/// Normalizes a legacy (V1/V2) module descriptor into the current
/// `(libName, breakpadId)` shape.
///
/// `pdb_sig` is uppercased, with an optional `{8-4-4-4-12}` GUID wrapper
/// stripped and its hyphens removed; `pdb_age` is lowercased hex.
/// `breakpadId = pdbSig + pdbAge`.
///
/// Not wired up to the current V3/V4 request decoder (§9 Design Notes): kept
/// as a standalone, independently testable conversion in case a future client
/// generation needs it.
pub fn normalize_legacy_module(pdb_name: &str, pdb_sig: &str, pdb_age: &str) -> ModuleKey {
    let stripped = pdb_sig.trim();
    let stripped = stripped
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(stripped);
    let sig: String = stripped
        .chars()
        .filter(|c| *c != '-')
        .collect::<String>()
        .to_ascii_uppercase();
    let age = pdb_age.to_ascii_lowercase();
    ModuleKey::new(pdb_name, format!("{sig}{age}"))
}
