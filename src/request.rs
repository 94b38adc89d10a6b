//! C6: decodes and validates a symbolication request. Every validation
//! failure collapses to the same [`ValidationError`] — the HTTP layer maps
//! that to 400 without distinguishing which field was wrong (§4.6).
//!
//! Struct shape modeled on `samply-api/src/symbolicate/request_json.rs`:
//! serde's derived struct deserializer accepts a 2-element JSON array
//! positionally, so `memoryMap`'s `[libName, breakpadId]` pairs and each
//! stack's `[moduleIndex, offset]` pairs need no custom `Deserialize` impl.

use serde::Deserialize;

use crate::error::ValidationError;
use crate::module_key::ModuleKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V3,
    V4,
}

impl Version {
    /// §4.6: `includeKnownModulesInResponse` is derived, `true` iff `version >= 4`.
    pub fn includes_known_modules(self) -> bool {
        matches!(self, Version::V4)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StackEntry {
    pub module_index: i32,
    pub offset: u64,
}

#[derive(Debug)]
pub struct Request {
    pub version: Version,
    pub modules: Vec<ModuleKey>,
    pub stacks: Vec<Vec<StackEntry>>,
    pub forwarded: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRequest {
    version: i64,
    memory_map: Vec<(String, String)>,
    stacks: Vec<Vec<(i32, u64)>>,
    #[serde(default)]
    forwarded: Option<i64>,
}

/// Parses and validates a request body. Rejects unless `version` is 3 or 4
/// and `forwarded`, when present, is a non-negative integer. Empty `stacks`
/// and `memoryMap` are valid.
pub fn parse(body: &[u8]) -> Result<Request, ValidationError> {
    let raw: RawRequest = serde_json::from_slice(body).map_err(|_| ValidationError)?;

    let version = match raw.version {
        3 => Version::V3,
        4 => Version::V4,
        _ => return Err(ValidationError),
    };

    let forwarded = match raw.forwarded {
        None => 0,
        Some(f) if f >= 0 => f as u32,
        Some(_) => return Err(ValidationError),
    };

    let mut modules = Vec::with_capacity(raw.memory_map.len());
    for (lib_name, breakpad_id) in raw.memory_map {
        let module = ModuleKey::new(lib_name, breakpad_id);
        if !module.is_well_formed() {
            return Err(ValidationError);
        }
        modules.push(module);
    }

    let stacks = raw
        .stacks
        .into_iter()
        .map(|stack| {
            stack
                .into_iter()
                .map(|(module_index, offset)| StackEntry { module_index, offset })
                .collect()
        })
        .collect();

    Ok(Request {
        version,
        modules,
        stacks,
        forwarded,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_v4_request() {
        let body = br#"{
            "version": 4,
            "memoryMap": [["l.so", "ID1"]],
            "stacks": [[[0, 16], [-1, 66]]],
            "forwarded": 1
        }"#;
        let request = parse(body).unwrap();
        assert_eq!(request.version, Version::V4);
        assert_eq!(request.forwarded, 1);
        assert_eq!(request.modules, vec![ModuleKey::new("l.so", "ID1")]);
        assert_eq!(request.stacks[0][0].module_index, 0);
        assert_eq!(request.stacks[0][0].offset, 16);
        assert_eq!(request.stacks[0][1].module_index, -1);
    }

    #[test]
    fn parses_v3_request_without_forwarded() {
        let body = br#"{"version": 3, "memoryMap": [], "stacks": []}"#;
        let request = parse(body).unwrap();
        assert_eq!(request.version, Version::V3);
        assert_eq!(request.forwarded, 0);
        assert!(request.modules.is_empty());
        assert!(request.stacks.is_empty());
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let body = br#"{"version": 5, "memoryMap": [], "stacks": []}"#;
        assert!(parse(body).is_err());
    }

    #[test]
    fn negative_forwarded_is_rejected() {
        let body = br#"{"version": 4, "memoryMap": [], "stacks": [], "forwarded": -1}"#;
        assert!(parse(body).is_err());
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let body = br#"{"version": 4, "stacks": []}"#;
        assert!(parse(body).is_err());
    }

    #[test]
    fn not_json_is_rejected() {
        assert!(parse(b"not json").is_err());
    }

    #[test]
    fn lib_name_failing_character_class_is_rejected() {
        let body = br#"{"version": 4, "memoryMap": [["../../etc", "ID1"]], "stacks": []}"#;
        assert!(parse(body).is_err());
    }

    #[test]
    fn lib_name_with_at_sign_is_rejected() {
        let body = br#"{"version": 4, "memoryMap": [["lib@name", "ID1"]], "stacks": []}"#;
        assert!(parse(body).is_err());
    }

    #[test]
    fn well_formed_lib_name_is_accepted() {
        let body = br#"{"version": 4, "memoryMap": [["libxul.so", "ID1"]], "stacks": []}"#;
        assert!(parse(body).is_ok());
    }

    #[test]
    fn known_modules_derivation() {
        assert!(!Version::V3.includes_known_modules());
        assert!(Version::V4.includes_known_modules());
    }
}
