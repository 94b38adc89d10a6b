//! Demonstration HTTP binary: wires [`symserv_core::SymbolicationCore`] to a
//! plain `hyper` 1 listener so the crate is runnable end-to-end. Routing and
//! request-size policy are intentionally minimal — this binary exists to
//! prove the core is usable, not to be a tested surface (§1, §2a).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use http_body_util::BodyExt;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use http_body_util::Full;
use tokio::net::TcpListener;

use symserv_core::config::Config;
use symserv_core::SymbolicationCore;

#[derive(Parser, Debug)]
#[command(name = "symservd", about = "Breakpad symbol resolution server")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Filesystem root searched by PathFetcher; may be repeated.
    #[arg(long = "symbol-path")]
    symbol_paths: Vec<PathBuf>,

    /// HTTP base URL searched by URLFetcher; may be repeated.
    #[arg(long = "symbol-url")]
    symbol_urls: Vec<String>,

    #[arg(long, default_value = "symcache")]
    disk_cache_path: PathBuf,

    #[arg(long, default_value_t = 10)]
    max_mem_cache_files: usize,

    #[arg(long, default_value_t = 100)]
    max_disk_cache_files: usize,

    /// Peer server to forward unresolved frames to; forwarding is disabled if absent.
    #[arg(long)]
    remote_symbol_server: Option<String>,

    /// Path to the persisted MRU prefetch hint file.
    #[arg(long)]
    mru_symbol_state_file: Option<PathBuf>,

    #[arg(long, default_value_t = 1000)]
    max_mru_symbols_persist: usize,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    env_logger::init();
    let args = Args::parse();

    let mut config = Config::new(args.disk_cache_path)
        .with_symbol_paths(args.symbol_paths)
        .with_symbol_urls(args.symbol_urls)
        .with_cache_limits(args.max_mem_cache_files, args.max_disk_cache_files)
        .with_remote_symbol_server(args.remote_symbol_server)
        .with_mru_state_file(args.mru_symbol_state_file, args.max_mru_symbols_persist);
    config.hostname = args.hostname;
    config.port_number = args.port;

    let addr: SocketAddr = match format!("{}:{}", config.hostname, config.port_number).parse() {
        Ok(addr) => addr,
        Err(e) => {
            log::error!("invalid bind address: {e}");
            return std::process::ExitCode::from(1);
        }
    };

    let core = match SymbolicationCore::new(config).await {
        Ok(core) => Arc::new(core),
        Err(e) => {
            log::error!("configuration error: {e}");
            return std::process::ExitCode::from(1);
        }
    };

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(source) => {
            let err = symserv_core::error::ConfigError::Bind { addr, source };
            log::error!("{err}");
            return std::process::ExitCode::from(1);
        }
    };
    log::info!("listening on {addr}");

    loop {
        let (stream, _) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("accept error: {e}");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let core = Arc::clone(&core);
        tokio::spawn(async move {
            let service = service_fn(move |req| handle(req, Arc::clone(&core)));
            if let Err(e) = hyper::server::conn::http1::Builder::new().serve_connection(io, service).await {
                log::debug!("connection error: {e}");
            }
        });
    }
}

async fn handle(req: Request<Incoming>, core: Arc<SymbolicationCore>) -> Result<Response<Full<Bytes>>, hyper::Error> {
    match (req.method(), req.uri().path()) {
        (&Method::POST, _) => {
            let body = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    log::warn!("failed to read request body: {e}");
                    return Ok(bad_request());
                }
            };
            match core.handle_request(&body).await {
                Ok(response_body) => Ok(json_response(response_body)),
                Err(_) => Ok(bad_request()),
            }
        }
        (&Method::GET, "/") => Ok(Response::new(Full::new(Bytes::from_static(
            b"POST a symbolication request body to this endpoint",
        )))),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::new()))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))),
    }
}

fn json_response(body: Vec<u8>) -> Response<Full<Bytes>> {
    Response::builder()
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

fn bad_request() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .body(Full::new(Bytes::from_static(b"malformed request")))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}
