//! C2: the fetcher pipeline. Locates a `(libName, breakpadId)` by trying
//! configured filesystem roots (`PathFetcher`), then configured HTTP stores
//! (`UrlFetcher`). Every failure at either stage is downgraded to a miss
//! (`None`) and logged — never propagated, so a transient failure can't
//! poison the cache (§4.2).

use std::io::Read;
use std::path::{Path, PathBuf};

use tokio::sync::{watch, Mutex};

use crate::error::FetchError;
use crate::module_key::ModuleKey;
use crate::symbol_table::{parse_symbol_file, SymbolTable};

/// Tries each configured filesystem root in order, per §4.2 PathFetcher:
/// `{root}/{libName}/{breakpadId}/{symFileName}`.
pub struct PathFetcher {
    roots: Vec<PathBuf>,
}

impl PathFetcher {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        PathFetcher { roots }
    }

    pub async fn fetch(&self, key: &ModuleKey) -> Option<SymbolTable> {
        let sym_file_name = key.sym_file_name();
        for root in &self.roots {
            let path = root.join(&key.lib_name).join(&key.breakpad_id).join(&sym_file_name);
            match fetch_from_path(&path).await {
                Ok(table) => {
                    log::debug!("found {:?} at {}", key, path.display());
                    return Some(table);
                }
                Err(e) => {
                    log::debug!("path fetch miss for {:?} at {}: {}", key, path.display(), e);
                }
            }
        }
        None
    }
}

async fn fetch_from_path(path: &Path) -> Result<SymbolTable, FetchError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| FetchError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_symbol_file(std::io::Cursor::new(bytes))?)
}

/// Tries each configured HTTP base URL in order, per §4.2 URLFetcher:
/// `{baseUrl}{libName}/{breakpadId}/{symFileName}`. Transparently decodes
/// gzip, x-gzip, and deflate (zlib first, falling back to raw deflate)
/// `Content-Encoding` responses.
pub struct UrlFetcher {
    base_urls: Vec<String>,
    client: reqwest::Client,
}

impl UrlFetcher {
    pub fn new(base_urls: Vec<String>, client: reqwest::Client) -> Self {
        UrlFetcher { base_urls, client }
    }

    pub async fn fetch(&self, key: &ModuleKey) -> Option<SymbolTable> {
        let sym_file_name = key.sym_file_name();
        for base in &self.base_urls {
            let url = format!("{base}{}/{}/{sym_file_name}", key.lib_name, key.breakpad_id);
            match self.fetch_from_url(&url).await {
                Ok(table) => {
                    log::debug!("found {:?} at {}", key, url);
                    return Some(table);
                }
                Err(e) => {
                    log::debug!("url fetch miss for {:?} at {}: {}", key, url, e);
                }
            }
        }
        None
    }

    async fn fetch_from_url(&self, url: &str) -> Result<SymbolTable, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: url.to_string(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        let encoding = response
            .headers()
            .get(reqwest::header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_ascii_lowercase());
        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::Http {
                url: url.to_string(),
                source,
            })?;
        let decoded = decode_body(encoding.as_deref(), &body)?;
        Ok(parse_symbol_file(std::io::Cursor::new(decoded))?)
    }
}

fn decode_body(encoding: Option<&str>, body: &[u8]) -> Result<Vec<u8>, FetchError> {
    match encoding {
        None => Ok(body.to_vec()),
        Some("gzip") | Some("x-gzip") => {
            let mut out = Vec::new();
            flate2::read::GzDecoder::new(body)
                .read_to_end(&mut out)
                .map_err(FetchError::Decompress)?;
            Ok(out)
        }
        Some("deflate") => {
            // Try zlib-wrapped deflate first, then fall back to raw deflate.
            let mut out = Vec::new();
            if flate2::read::ZlibDecoder::new(body)
                .read_to_end(&mut out)
                .is_ok()
            {
                return Ok(out);
            }
            out.clear();
            flate2::read::DeflateDecoder::new(body)
                .read_to_end(&mut out)
                .map_err(FetchError::Decompress)?;
            Ok(out)
        }
        Some(other) => Err(FetchError::UnsupportedEncoding(other.to_string())),
    }
}

/// The two fetchers tried in order: filesystem roots, then HTTP stores.
pub struct FetchPipeline {
    path_fetcher: PathFetcher,
    url_fetcher: UrlFetcher,
}

impl FetchPipeline {
    pub fn new(path_fetcher: PathFetcher, url_fetcher: UrlFetcher) -> Self {
        FetchPipeline {
            path_fetcher,
            url_fetcher,
        }
    }

    pub async fn fetch(&self, key: &ModuleKey) -> Option<SymbolTable> {
        if let Some(table) = self.path_fetcher.fetch(key).await {
            return Some(table);
        }
        self.url_fetcher.fetch(key).await
    }
}

/// Ensures only one in-flight fetch per key: the first caller for a cold key
/// performs the fetch, concurrent callers for the same key await the first
/// caller's outcome on a `tokio::sync::watch` channel. Required by §5 so a
/// thundering herd on a cold key doesn't trigger N parallel downloads.
///
/// A `watch::Receiver::changed()` compares against the last value the
/// receiver has observed rather than waiting for a wakeup that might already
/// have fired, so a waiter that subscribes after the leader has already sent
/// the result still observes it via `borrow()` — unlike a bare
/// `Notify`+`Mutex<Option<_>>` pair, there is no window where the result is
/// ready but the waiter's wait call has already missed the notification.
pub struct CoalescingFetcher {
    pipeline: FetchPipeline,
    in_flight: Mutex<std::collections::HashMap<ModuleKey, watch::Sender<Option<Option<SymbolTable>>>>>,
}

impl CoalescingFetcher {
    pub fn new(pipeline: FetchPipeline) -> Self {
        CoalescingFetcher {
            pipeline,
            in_flight: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub async fn fetch(&self, key: &ModuleKey) -> Option<SymbolTable> {
        let (mut rx, leader_tx) = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(tx) = in_flight.get(key) {
                (tx.subscribe(), None)
            } else {
                let (tx, rx) = watch::channel(None);
                in_flight.insert(key.clone(), tx);
                (rx, Some(key.clone()))
            }
        };

        if let Some(key) = leader_tx {
            let result = self.pipeline.fetch(&key).await;
            {
                let in_flight = self.in_flight.lock().await;
                if let Some(tx) = in_flight.get(&key) {
                    let _ = tx.send(Some(result.clone()));
                }
            }
            self.in_flight.lock().await.remove(&key);
            result
        } else {
            loop {
                if let Some(result) = rx.borrow_and_update().clone() {
                    return result;
                }
                if rx.changed().await.is_err() {
                    // Sender dropped without ever sending: treat as a miss
                    // rather than hanging forever.
                    return None;
                }
            }
        }
    }
}
