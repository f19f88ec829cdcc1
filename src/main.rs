//! File drop server binary.
//!
//! Lists, uploads, downloads and renames files below a single data
//! directory. The main entry point parses configuration, opens the data
//! root, builds the Axum router and serves it until a shutdown signal.

mod archive;
mod config;
mod error;
mod files;
mod http;
mod logging;
mod matcher;
mod storage;
mod upload;
mod version;

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span, warn};

use crate::config::{Args, SHUTDOWN_GRACE_SECS};
use crate::http::build_cors_layer;
use crate::storage::{PathPolicy, Storage};

shadow!(build);

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let policy = if args.confine_paths {
        PathPolicy::Confined
    } else {
        warn!("path confinement disabled: `..` segments may resolve outside the data directory");
        PathPolicy::Lenient
    };
    let storage = Arc::new(Storage::open(PathBuf::from(&args.data_dir), policy).await?);
    info!(
        root = %storage.root_path().display(),
        policy = ?storage.policy(),
        "data directory ready"
    );

    let upload_limit = match args.max_upload_size {
        0 => DefaultBodyLimit::disable(),
        size => DefaultBodyLimit::max(usize::try_from(size).unwrap_or(usize::MAX)),
    };
    let api = Router::new()
        .route("/files", get(files::list_files))
        .route("/files/upload", post(upload::upload_file).layer(upload_limit))
        .route("/files/download", get(files::download_file))
        .route("/files/rename", post(files::rename_file))
        .route("/version", get(version::get_version_info));

    let mut app = Router::new()
        .nest("/api/v1", api)
        .layer(middleware::from_fn(http::add_response_time))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(CatchPanicLayer::custom(http::handle_panic))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let forwarded_ip = request
                        .headers()
                        .get("x-forwarded-for")
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.split(',').next().unwrap_or("").trim().to_string());
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.to_string());
                    let client_ip = forwarded_ip
                        .or(connect_ip)
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage));

    if let Some(cors_layer) = build_cors_layer(&args.cors_origins) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!("service is running at http://{}", addr);
    tokio::spawn(shutdown_signal(handle.clone()));
    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    info!("shut down");
    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("received termination signal, shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}
