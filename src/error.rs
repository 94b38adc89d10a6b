//! Typed error surfaces for each component. Component boundaries absorb these
//! into the "success or miss" shapes described by the symbolication core's
//! error handling policy: most of these never leave their owning module.

use std::path::PathBuf;

/// C1. Only raised when the underlying byte stream itself fails; malformed
/// content (bad lines) is skipped and logged, never surfaced as an error.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("error reading symbol file stream: {0}")]
    Io(#[from] std::io::Error),
}

/// C2. Both fetchers convert every variant of this to a miss before it can
/// cross into the cache manager; kept concrete so each fetcher can log a
/// specific reason.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("I/O error opening {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("server at {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("unsupported Content-Encoding {0:?}")]
    UnsupportedEncoding(String),

    #[error("error decompressing response body: {0}")]
    Decompress(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// C3/C4. Disk and memory tier failures; callers downgrade every variant to
/// `None`, logging at `warn!` per the error handling design.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode cache entry at {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// C6. A single generic outcome: the validator never distinguishes malformed
/// requests from each other, they all map to HTTP 400 at the front end.
#[derive(thiserror::Error, Debug)]
#[error("malformed request")]
pub struct ValidationError;

/// C8. Swallowed by the symbolicator; a forward failure leaves the
/// placeholder names in place.
#[derive(thiserror::Error, Debug)]
pub enum ForwardError {
    #[error("request timed out")]
    Timeout,

    #[error("HTTP error talking to peer: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode peer response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("peer returned {got} symbols for {expected} requested frames")]
    LengthMismatch { expected: usize, got: usize },
}

/// Startup/config failures. The only error kind allowed to propagate out of
/// `main` as a real `Result`.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("maxMemCacheFiles ({mem}) must be <= maxDiskCacheFiles ({disk})")]
    MemCacheExceedsDiskCache { mem: usize, disk: usize },

    #[error("failed to create disk cache directory {path}: {source}")]
    DiskCacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
}
