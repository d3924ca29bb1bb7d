#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the JWST import orchestrator.
//!
//! Exposes the import job lifecycle over REST: start, poll, cancel, and
//! resume imports, import from files already on disk, and inspect
//! transfers the archive-processing engine can resume. Catalog records
//! are persisted to a JSON snapshot at `JWST_CATALOG_PATH`.

mod handlers;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use jwst_archive::HttpArchiveEngine;
use jwst_catalog::{FileCatalogStore, LocalStorage, LogThumbnailQueue};
use jwst_import::{ImportConfig, ImportOrchestrator, JobRegistry, SystemClock};

/// Default engine URL when `JWST_ENGINE_URL` is unset.
pub const DEFAULT_ENGINE_URL: &str = "http://127.0.0.1:8000";

/// Default catalog snapshot path when `JWST_CATALOG_PATH` is unset.
pub const DEFAULT_CATALOG_PATH: &str = "data/catalog.json";

/// How often expired jobs are swept when a retention window is set.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared application state.
pub struct AppState {
    /// Import orchestrator driving every job.
    pub orchestrator: ImportOrchestrator,
}

/// Registers the `/api` routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/import", web::post().to(handlers::start_import))
            .route(
                "/import-progress/{job_id}",
                web::get().to(handlers::import_progress),
            )
            .route("/import/jobs", web::get().to(handlers::list_jobs))
            .route(
                "/import/cancel/{job_id}",
                web::post().to(handlers::cancel_import),
            )
            .route(
                "/import/resume/{job_id}",
                web::post().to(handlers::resume_import),
            )
            .route(
                "/import/from-existing/{obs_id}",
                web::post().to(handlers::import_from_existing),
            )
            .route(
                "/import/check-files/{obs_id}",
                web::get().to(handlers::check_files),
            )
            .route("/import/resumable", web::get().to(handlers::list_resumable)),
    );
}

/// Builds the orchestrator from `JWST_*` environment variables.
///
/// # Errors
///
/// Returns an `std::io::Error` if the engine URL is invalid or the
/// catalog snapshot cannot be opened.
pub async fn orchestrator_from_env() -> std::io::Result<ImportOrchestrator> {
    let config = ImportConfig::from_env();

    let engine_url =
        std::env::var("JWST_ENGINE_URL").unwrap_or_else(|_| DEFAULT_ENGINE_URL.to_string());
    log::info!("Using archive engine at {engine_url}");
    let engine = HttpArchiveEngine::new(&engine_url).map_err(std::io::Error::other)?;

    let catalog_path = std::env::var("JWST_CATALOG_PATH")
        .map_or_else(|_| PathBuf::from(DEFAULT_CATALOG_PATH), PathBuf::from);
    log::info!("Opening catalog snapshot {}...", catalog_path.display());
    let store = FileCatalogStore::open(&catalog_path)
        .await
        .map_err(std::io::Error::other)?;

    log::info!(
        "Download root {} (poll interval {:?}, primary source {}, fallback {})",
        config.download_root.display(),
        config.poll_interval,
        config.primary_source,
        config
            .fallback_source
            .map_or_else(|| "none".to_string(), |s| s.to_string())
    );

    let registry = Arc::new(JobRegistry::new(Arc::new(SystemClock), config.max_jobs));
    let storage = LocalStorage::new(config.download_root.clone());
    Ok(ImportOrchestrator::new(
        registry,
        Arc::new(engine),
        Arc::new(store),
        Arc::new(storage),
        Arc::new(LogThumbnailQueue),
        config,
    ))
}

/// Starts the JWST import API server.
///
/// Builds the orchestrator, starts the retention sweeper if configured,
/// and runs the Actix-Web HTTP server. The caller is responsible for
/// providing the async runtime (e.g. via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the orchestrator cannot be built
/// or the HTTP server fails to bind or encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let orchestrator = orchestrator_from_env().await?;
    if let Some(retention) = orchestrator.config().job_retention {
        log::info!("Sweeping finished jobs older than {retention:?}");
    }
    let sweeper = orchestrator.spawn_sweeper(SWEEP_INTERVAL);

    let state = web::Data::new(AppState { orchestrator });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    let result = HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    result
}
