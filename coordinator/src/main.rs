//! Coordinator daemon: the catalog's JSON request surface, including the
//! chunk-placement commit protocol's prepare phase (quorum head-requests
//! against candidate storage nodes).
//!
//! Grounded on the same plain `hyper::Server` daemon shape as the storage
//! node (see `storage-node/src/main.rs`); the prepare phase's outbound HEAD
//! requests reuse a single `hyper::Client<HttpConnector>`, the same
//! connector the storage node's own client code is built on.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Error};
use cds_api_types::{
    CdsError, ChunkId, CommitRequest, ErrorBody, Heartbeat, NodeId, NodeRegistration, SetOverrideRequest,
};
use cds_catalog::Catalog;
use http::{Method, Request, StatusCode};
use hyper::client::HttpConnector;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Client, Response, Server};

fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(bytes))
        .expect("static response is well formed")
}

fn error_response(err: &CdsError) -> Response<Body> {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, &ErrorBody::from(err))
}

fn empty(status: StatusCode) -> Response<Body> {
    Response::builder().status(status).body(Body::empty()).expect("static response is well formed")
}

fn not_found() -> Response<Body> {
    empty(StatusCode::NOT_FOUND)
}

async fn read_json<T: serde::de::DeserializeOwned>(request: Request<Body>) -> Result<T, Response<Body>> {
    let bytes = hyper::body::to_bytes(request.into_body())
        .await
        .map_err(|err| error_response(&CdsError::Transient(err.to_string())))?;
    serde_json::from_slice(&bytes).map_err(|err| error_response(&CdsError::BadRequest(err.to_string())))
}

/// Issues the prepare-phase HEAD requests for a commit: one per candidate
/// node (replicated mode: the chunk itself; erasure mode: that node's
/// fragment), bounded by `T_probe`. A non-confirmation (timeout, error, or
/// non-200 response) is treated as a failure for that node but does not
/// abort the request-handler.
async fn confirm_presence(
    client: &Client<HttpConnector>,
    catalog: &Catalog,
    request: &CommitRequest,
    deadline: Duration,
) -> Result<Vec<NodeId>, Error> {
    use cds_api_types::RedundancyMode;

    let targets: Vec<(NodeId, ChunkId)> = match request.redundancy_mode {
        RedundancyMode::Replicated => {
            let chunk_id = ChunkId::derive(request.stream_id, request.sequence_num);
            request.node_ids.iter().map(|n| (n.clone(), chunk_id.clone())).collect()
        }
        RedundancyMode::Erasure => {
            let chunk_id = ChunkId::derive(request.stream_id, request.sequence_num);
            request
                .fragment_metadata
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(|f| (f.node_id.clone(), chunk_id.fragment_storage_id(f.fragment_index)))
                .collect()
        }
    };

    let mut confirmed = Vec::new();
    for (node_id, target_chunk_id) in targets {
        let Some(url) = catalog.node_summary(&node_id)?.map(|n| n.url) else {
            log::warn!("prepare: node '{node_id}' not registered, treating as non-confirming");
            continue;
        };
        let uri = format!("{}/chunk/{target_chunk_id}", url.trim_end_matches('/'));
        let head = match Request::head(&uri).body(Body::empty()) {
            Ok(head) => head,
            Err(_) => continue,
        };
        match tokio::time::timeout(deadline, client.request(head)).await {
            Ok(Ok(response)) if response.status() == StatusCode::OK => confirmed.push(node_id),
            Ok(Ok(response)) => log::debug!("prepare: {node_id} returned {}", response.status()),
            Ok(Err(err)) => log::debug!("prepare: {node_id} unreachable: {err}"),
            Err(_) => log::debug!("prepare: {node_id} timed out after {deadline:?}"),
        }
    }
    Ok(confirmed)
}

async fn handle_commit(
    catalog: &Catalog,
    client: &Client<HttpConnector>,
    deadline: Duration,
    request: CommitRequest,
) -> Response<Body> {
    let chunk_id = ChunkId::derive(request.stream_id, request.sequence_num);
    let ballot = match catalog.begin_proposal(&chunk_id) {
        Ok(ballot) => ballot,
        Err(err) => return error_response(&CdsError::Fatal(err.to_string())),
    };

    let confirmed = match confirm_presence(client, catalog, &request, deadline).await {
        Ok(confirmed) => confirmed,
        Err(err) => return error_response(&CdsError::Transient(err.to_string())),
    };

    match catalog.commit_proposal(&request, ballot, &confirmed) {
        Ok(outcome) => json_response(StatusCode::OK, &outcome),
        Err(err) => error_response(&err),
    }
}

async fn handle(
    catalog: Arc<Catalog>,
    client: Arc<Client<HttpConnector>>,
    prepare_deadline: Duration,
    request: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

    let response = match (&method, segments.as_slice()) {
        (&Method::GET, ["version"]) => json_response(
            StatusCode::OK,
            &serde_json::json!({
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            }),
        ),
        (&Method::POST, ["streams"]) => match read_json(request).await {
            Ok(body) => match catalog.create_stream(&body) {
                Ok(summary) => json_response(StatusCode::CREATED, &summary),
                Err(err) => error_response(&CdsError::Fatal(err.to_string())),
            },
            Err(response) => response,
        },
        (&Method::GET, ["streams"]) => match catalog.list_streams() {
            Ok(streams) => json_response(StatusCode::OK, &streams),
            Err(err) => error_response(&CdsError::Fatal(err.to_string())),
        },
        (&Method::GET, ["streams", raw_id]) => with_stream_id(raw_id, |id| match catalog.get_stream(&id) {
            Ok(Some(summary)) => json_response(StatusCode::OK, &summary),
            Ok(None) => not_found(),
            Err(err) => error_response(&CdsError::Fatal(err.to_string())),
        }),
        (&Method::DELETE, ["streams", raw_id]) => with_stream_id(raw_id, |id| match catalog.delete_stream(&id) {
            Ok(locations) => json_response(
                StatusCode::OK,
                &locations
                    .into_iter()
                    .map(|(c, n)| format!("{c}@{n}"))
                    .collect::<Vec<_>>(),
            ),
            Err(err) => error_response(&err),
        }),
        (&Method::GET, ["streams", raw_id, "manifest"]) => with_stream_id(raw_id, |id| {
            let _ = catalog.record_stream_access(&id);
            match catalog.get_manifest(&id) {
                Ok(Some(manifest)) => json_response(StatusCode::OK, &manifest),
                Ok(None) => not_found(),
                Err(err) => error_response(&CdsError::Fatal(err.to_string())),
            }
        }),
        (&Method::GET, ["streams", raw_id, "redundancy"]) => with_stream_id(raw_id, |id| {
            match catalog.recommend_redundancy(&id) {
                Ok(Some(recommendation)) => json_response(StatusCode::OK, &recommendation),
                Ok(None) => not_found(),
                Err(err) => error_response(&CdsError::Fatal(err.to_string())),
            }
        }),
        (&Method::POST, ["redundancy", "override", raw_id]) => {
            let body: Result<SetOverrideRequest, Response<Body>> = read_json(request).await;
            with_stream_id(raw_id, |id| match body {
                Ok(body) => match catalog.set_redundancy_override(&id, body.mode) {
                    Ok(()) => empty(StatusCode::NO_CONTENT),
                    Err(err) => error_response(&err),
                },
                Err(response) => response,
            })
        }
        (&Method::DELETE, ["redundancy", "override", raw_id]) => {
            with_stream_id(raw_id, |id| match catalog.clear_redundancy_override(&id) {
                Ok(()) => empty(StatusCode::NO_CONTENT),
                Err(err) => error_response(&err),
            })
        }
        (&Method::GET, ["redundancy", "overhead"]) => match catalog.storage_overhead_report() {
            Ok(report) => json_response(StatusCode::OK, &report),
            Err(err) => error_response(&CdsError::Fatal(err.to_string())),
        },
        (&Method::POST, ["nodes"]) => match read_json::<NodeRegistration>(request).await {
            Ok(registration) => match catalog.register_node(&registration) {
                Ok(()) => empty(StatusCode::CREATED),
                Err(err) => error_response(&CdsError::Fatal(err.to_string())),
            },
            Err(response) => response,
        },
        (&Method::POST, ["nodes", raw_id, "heartbeat"]) => {
            let body: Result<Heartbeat, Response<Body>> = read_json(request).await;
            with_node_id(raw_id, |_| match body {
                Ok(heartbeat) => match catalog.heartbeat(&heartbeat) {
                    Ok(()) => empty(StatusCode::NO_CONTENT),
                    Err(err) => error_response(&err),
                },
                Err(response) => response,
            })
        }
        (&Method::GET, ["nodes"]) => match catalog.list_nodes() {
            Ok(nodes) => json_response(StatusCode::OK, &nodes),
            Err(err) => error_response(&CdsError::Fatal(err.to_string())),
        },
        (&Method::GET, ["nodes", "healthy"]) => match catalog.list_healthy_nodes() {
            Ok(nodes) => json_response(StatusCode::OK, &nodes),
            Err(err) => error_response(&CdsError::Fatal(err.to_string())),
        },
        (&Method::GET, ["nodes", raw_id]) => with_node_id(raw_id, |id| match catalog.node_summary(&id) {
            Ok(Some(summary)) => json_response(StatusCode::OK, &summary),
            Ok(None) => not_found(),
            Err(err) => error_response(&CdsError::Fatal(err.to_string())),
        }),
        (&Method::POST, ["chunks", "commit"]) => match read_json::<CommitRequest>(request).await {
            Ok(commit_request) => handle_commit(&catalog, &client, prepare_deadline, commit_request).await,
            Err(response) => response,
        },
        (&Method::GET, ["chunks", raw_id]) => with_chunk_id(raw_id, |id| match catalog.get_chunk_locations(&id) {
            Ok(Some(locations)) => json_response(StatusCode::OK, &locations),
            Ok(None) => not_found(),
            Err(err) => error_response(&CdsError::Fatal(err.to_string())),
        }),
        (&Method::GET, ["chunks", raw_id, "fragments"]) => {
            with_chunk_id(raw_id, |id| match catalog.get_fragment_listing(&id) {
                Ok(fragments) => json_response(StatusCode::OK, &fragments),
                Err(err) => error_response(&CdsError::Fatal(err.to_string())),
            })
        }
        (&Method::GET, ["chunks", raw_id, "proposal"]) => {
            with_chunk_id(raw_id, |id| match catalog.get_proposal_state(&id) {
                Ok(Some(state)) => json_response(StatusCode::OK, &state),
                Ok(None) => not_found(),
                Err(err) => error_response(&CdsError::Fatal(err.to_string())),
            })
        }
        _ => not_found(),
    };
    Ok(response)
}

fn with_stream_id(raw: &str, f: impl FnOnce(cds_api_types::StreamId) -> Response<Body>) -> Response<Body> {
    match raw.parse() {
        Ok(id) => f(id),
        Err(err) => error_response(&CdsError::BadRequest(err.to_string())),
    }
}

fn with_node_id(raw: &str, f: impl FnOnce(NodeId) -> Response<Body>) -> Response<Body> {
    match NodeId::parse(raw) {
        Ok(id) => f(id),
        Err(err) => error_response(&CdsError::BadRequest(err.to_string())),
    }
}

fn with_chunk_id(raw: &str, f: impl FnOnce(ChunkId) -> Response<Body>) -> Response<Body> {
    match ChunkId::parse(raw) {
        Ok(id) => f(id),
        Err(err) => error_response(&CdsError::BadRequest(err.to_string())),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    cds_tools::logging::init_logging("info");

    let config_path = std::env::var("CDS_COORDINATOR_CONFIG").ok().map(std::path::PathBuf::from);
    let config = cds_config::CoordinatorConfig::load(config_path.as_deref())?;
    let bind_addr = config.bind_addr;
    let prepare_deadline = Duration::from_secs_f64(config.prepare_probe_timeout_secs);
    let database_path = config.database_path.clone();

    let catalog = Arc::new(Catalog::open(&database_path, config).context("failed to open catalog")?);
    let client = Arc::new(Client::builder().build_http());

    let make_service = make_service_fn(move |_conn| {
        let catalog = catalog.clone();
        let client = client.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                handle(catalog.clone(), client.clone(), prepare_deadline, req)
            }))
        }
    });

    let server = Server::bind(&bind_addr).serve(make_service);
    log::info!("coordinator listening on {bind_addr}");

    if let Err(err) = server.with_graceful_shutdown(shutdown_signal()).await {
        log::error!("server error: {err}");
    }
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    log::info!("shutdown signal received");
}
