//! Storage-node daemon: a `hyper::service::Service` exposing the chunk
//! PUT/GET/HEAD/DELETE surface plus `HEAD /ping` and `GET /health`.
//!
//! Uses the plain `hyper::Server` + `make_service_fn` daemon shape from
//! `proxmox-restore-daemon/src/main.rs`, without the
//! `proxmox_rest_server`/ticket-auth machinery those daemons layer on top:
//! this surface carries no user sessions, so that stack would add nothing
//! (see DESIGN.md).

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Context, Error};
use cds_api_types::{CdsError, ChunkId, ErrorBody};
use cds_datastore::ChunkStore;
use http::{Method, Request, Response, StatusCode};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Server};

fn error_response(err: &CdsError) -> Response<Body> {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::to_vec(&ErrorBody::from(err)).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .expect("static response is well formed")
}

fn empty(status: StatusCode) -> Response<Body> {
    Response::builder().status(status).body(Body::empty()).expect("static response is well formed")
}

async fn handle(store: Arc<ChunkStore>, request: Request<Body>) -> Result<Response<Body>, Infallible> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = match (&method, path.as_str()) {
        (&Method::HEAD, "/ping") => handle_ping(&store),
        (&Method::GET, "/health") => handle_health(&store),
        (&Method::GET, "/version") => handle_version(),
        (&Method::PUT, path) if path.starts_with("/chunk/") => handle_put(&store, &path[7..], request).await,
        (&Method::GET, path) if path.starts_with("/chunk/") => handle_get(&store, &path[7..]),
        (&Method::HEAD, path) if path.starts_with("/chunk/") => handle_head(&store, &path[7..]),
        (&Method::DELETE, path) if path.starts_with("/chunk/") => handle_delete(&store, &path[7..]),
        _ => empty(StatusCode::NOT_FOUND),
    };
    Ok(response)
}

fn parse_chunk_id(raw: &str) -> Result<ChunkId, Response<Body>> {
    ChunkId::parse(raw).map_err(|err| error_response(&CdsError::BadRequest(err.to_string())))
}

async fn handle_put(store: &ChunkStore, raw_id: &str, request: Request<Body>) -> Response<Body> {
    let chunk_id = match parse_chunk_id(raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let expected_hash: Option<cds_api_types::ContentHash> = request
        .headers()
        .get("x-chunk-checksum")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok());

    let body = match hyper::body::to_bytes(request.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => return error_response(&CdsError::Transient(err.to_string())),
    };
    if body.len() > store.max_payload_size() as usize {
        return empty(StatusCode::PAYLOAD_TOO_LARGE);
    }

    match store.put(&chunk_id, &body, expected_hash.as_ref()) {
        Ok(outcome) => {
            let status = if outcome.created { StatusCode::CREATED } else { StatusCode::OK };
            Response::builder()
                .status(status)
                .header("location", format!("/chunk/{chunk_id}"))
                .header("etag", outcome.hash.to_hex())
                .header("x-chunk-size", outcome.size)
                .body(Body::empty())
                .expect("static response is well formed")
        }
        Err(err) => error_response(&err),
    }
}

fn handle_get(store: &ChunkStore, raw_id: &str) -> Response<Body> {
    let chunk_id = match parse_chunk_id(raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match store.get(&chunk_id) {
        Ok((bytes, hash)) => {
            let location = store.head(&chunk_id).ok();
            let mut builder = Response::builder()
                .status(StatusCode::OK)
                .header("content-length", bytes.len())
                .header("etag", hash.to_hex());
            if let Some(location) = location {
                builder = builder.header("x-superblock-id", location.superblock_id);
            }
            builder.body(Body::from(bytes)).expect("static response is well formed")
        }
        Err(err) => error_response(&err),
    }
}

fn handle_head(store: &ChunkStore, raw_id: &str) -> Response<Body> {
    let chunk_id = match parse_chunk_id(raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match store.head(&chunk_id) {
        Ok(location) => Response::builder()
            .status(StatusCode::OK)
            .header("content-length", location.length)
            .header("x-superblock-id", location.superblock_id)
            .body(Body::empty())
            .expect("static response is well formed"),
        Err(err) => error_response(&err),
    }
}

fn handle_delete(store: &ChunkStore, raw_id: &str) -> Response<Body> {
    let chunk_id = match parse_chunk_id(raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match store.delete(&chunk_id) {
        Ok(()) => empty(StatusCode::NO_CONTENT),
        Err(err) => error_response(&err),
    }
}

fn handle_ping(store: &ChunkStore) -> Response<Body> {
    let info = store.probe();
    Response::builder()
        .status(StatusCode::OK)
        .header("x-node-id", info.node_id)
        .header("x-disk-usage-percent", info.disk_usage_fraction)
        .header("x-chunk-count", info.chunk_count)
        .body(Body::empty())
        .expect("static response is well formed")
}

fn handle_version() -> Response<Body> {
    let body = serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    });
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("static response is well formed")
}

fn handle_health(store: &ChunkStore) -> Response<Body> {
    let report = store.health();
    let status = if report.status == cds_api_types::HealthStatus::Critical {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    let body = serde_json::to_vec(&report).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .expect("static response is well formed")
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    cds_tools::logging::init_logging("info");

    let config_path = std::env::var("CDS_STORAGE_CONFIG").ok().map(std::path::PathBuf::from);
    let config = cds_config::StorageNodeConfig::load(config_path.as_deref())?;
    let bind_addr = config.bind_addr;
    log::info!("storage node '{}' starting, data dir {:?}", config.node_id, config.data_dir);

    let store = Arc::new(ChunkStore::open(&config).context("failed to open chunk store")?);

    let make_service = make_service_fn(move |_conn| {
        let store = store.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(store.clone(), req))) }
    });

    let server = Server::bind(&bind_addr).serve(make_service);
    log::info!("storage node listening on {bind_addr}");

    if let Err(err) = server.with_graceful_shutdown(shutdown_signal()).await {
        log::error!("server error: {err}");
    }
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    log::info!("shutdown signal received, flushing index");
}
