//! Breakpad symbol resolution engine: a tiered (memory + disk) cache of
//! parsed `.sym` tables, a multi-source fetch pipeline, and a per-request
//! symbolication algorithm with upstream-forwarding fallback.
//!
//! [`SymbolicationCore`] is the single entry point a front end needs: build
//! one from a [`Config`], then hand it request bodies via [`SymbolicationCore::handle_request`].

pub mod cache_manager;
pub mod config;
pub mod disk_cache;
pub mod error;
pub mod fetcher;
pub mod forwarder;
pub mod memory_cache;
pub mod module_key;
pub mod mru_state;
pub mod request;
pub mod symbol_table;
pub mod symbolicator;

use cache_manager::CacheManager;
use config::Config;
use error::{ConfigError, ValidationError};
use forwarder::Forwarder;
use request::Version;
use symbolicator::SymbolicationResult;

/// Owns the cache manager and, if configured, the upstream forwarder. This
/// is the whole of what a front end needs to turn a request body into a
/// response body.
pub struct SymbolicationCore {
    cache_manager: CacheManager,
    forwarder: Option<Forwarder>,
}

impl SymbolicationCore {
    pub async fn new(config: Config) -> Result<Self, ConfigError> {
        let forwarder = config
            .remote_symbol_server
            .clone()
            .map(|server| Forwarder::new(server, config.forward_timeout));
        let cache_manager = CacheManager::new(&config).await?;
        Ok(SymbolicationCore {
            cache_manager,
            forwarder,
        })
    }

    /// Parses `body`, symbolicates it, and returns the serialized response.
    /// The only failure mode is a malformed request (§4.6); everything past
    /// that point always produces a response, worst case full of
    /// `hex(offset)` placeholders.
    pub async fn handle_request(&self, body: &[u8]) -> Result<Vec<u8>, ValidationError> {
        let request = request::parse(body)?;
        let result = symbolicator::symbolicate(&request, &self.cache_manager, self.forwarder.as_ref()).await;
        Ok(serialize_response(request.version, &result))
    }
}

fn serialize_response(version: Version, result: &SymbolicationResult) -> Vec<u8> {
    let body = if version.includes_known_modules() {
        serde_json::json!({
            "symbolicatedStacks": result.symbolicated_stacks,
            "knownModules": result.known_modules,
        })
    } else {
        serde_json::json!(result.symbolicated_stacks)
    };
    serde_json::to_vec(&body).unwrap_or_else(|e| {
        log::error!("failed to serialize symbolication response: {e}");
        b"[]".to_vec()
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn v4_response_wraps_known_modules() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path().join("cache"));
        let core = SymbolicationCore::new(config).await.unwrap();

        let body = br#"{"version": 4, "memoryMap": [], "stacks": [[[-1, 4660]]]}"#;
        let response = core.handle_request(body).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&response).unwrap();
        assert_eq!(value["symbolicatedStacks"], serde_json::json!([["0x1234"]]));
        assert_eq!(value["knownModules"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn v3_response_is_a_bare_array() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path().join("cache"));
        let core = SymbolicationCore::new(config).await.unwrap();

        let body = br#"{"version": 3, "memoryMap": [], "stacks": [[[-1, 10]]]}"#;
        let response = core.handle_request(body).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&response).unwrap();
        assert_eq!(value, serde_json::json!([["0xa"]]));
    }

    #[tokio::test]
    async fn malformed_request_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path().join("cache"));
        let core = SymbolicationCore::new(config).await.unwrap();
        assert!(core.handle_request(b"not json").await.is_err());
    }
}
