//! HTTP handler functions for the JWST import API.

use actix_web::{HttpResponse, web};
use jwst_import::ImportError;
use jwst_import_models::ImportRequest;
use jwst_server_models::{
    ApiError, ApiHealth, ApiResumableTransfer, CancelResponse, CheckFilesResponse,
    ResumableResponse, ResumeResponse, StartImportResponse,
};

use crate::AppState;

/// Maps an orchestrator error onto an HTTP response.
///
/// Validation and state-conflict errors are the caller's fault (400);
/// unknown jobs and missing files are 404; engine failures are 502.
fn error_response(e: &ImportError) -> HttpResponse {
    let body = ApiError {
        error: e.to_string(),
    };
    match e {
        ImportError::Validation(_)
        | ImportError::NotResumable { .. }
        | ImportError::AlreadyComplete { .. }
        | ImportError::AlreadyRunning { .. }
        | ImportError::CancelRefused { .. } => HttpResponse::BadRequest().json(body),
        ImportError::JobNotFound { .. } | ImportError::NoFiles { .. } => {
            HttpResponse::NotFound().json(body)
        }
        ImportError::Archive(_) => {
            log::error!("Archive engine call failed: {e}");
            HttpResponse::BadGateway().json(body)
        }
        ImportError::EmptyDownload
        | ImportError::Cancelled
        | ImportError::Catalog(_)
        | ImportError::Io(_) => {
            log::error!("Import request failed: {e}");
            HttpResponse::InternalServerError().json(ApiError {
                error: "Internal error".to_string(),
            })
        }
    }
}

/// `GET /api/health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `POST /api/import`
///
/// Accepts an import and returns immediately. Outcomes are observed by
/// polling `/api/import-progress/{jobId}`.
pub async fn start_import(
    state: web::Data<AppState>,
    body: web::Json<ImportRequest>,
) -> HttpResponse {
    match state.orchestrator.start_import(body.into_inner()) {
        Ok(started) => HttpResponse::Ok().json(StartImportResponse {
            job_id: started.job_id,
            obs_id: started.obs_id,
        }),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/import-progress/{jobId}`
pub async fn import_progress(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    let job_id = path.into_inner();
    state.orchestrator.status(&job_id).map_or_else(
        || error_response(&ImportError::JobNotFound { job_id }),
        |job| HttpResponse::Ok().json(job),
    )
}

/// `GET /api/import/jobs`
///
/// Lists every job the registry holds, newest first.
pub async fn list_jobs(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.orchestrator.jobs())
}

/// `POST /api/import/cancel/{jobId}`
pub async fn cancel_import(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let job_id = path.into_inner();
    match state.orchestrator.cancel(&job_id) {
        Ok(()) => HttpResponse::Ok().json(CancelResponse {
            job_id,
            message: "Import cancelled".to_string(),
        }),
        Err(e) => error_response(&e),
    }
}

/// `POST /api/import/resume/{jobId}`
///
/// Accepts a local job id, an engine transfer id, or an observation id.
pub async fn resume_import(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    match state.orchestrator.resume(&path.into_inner()).await {
        Ok(resumed) => HttpResponse::Ok().json(ResumeResponse {
            message: format!("Import resumed ({})", resumed.mode),
            mode: resumed.mode.to_string(),
            job_id: resumed.job_id,
            obs_id: resumed.obs_id,
        }),
        Err(e) => error_response(&e),
    }
}

/// `POST /api/import/from-existing/{obsId}`
pub async fn import_from_existing(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    match state.orchestrator.import_from_existing(&path.into_inner()).await {
        Ok(started) => HttpResponse::Ok().json(StartImportResponse {
            job_id: started.job_id,
            obs_id: started.obs_id,
        }),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/import/check-files/{obsId}`
pub async fn check_files(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    match state.orchestrator.check_files(&path.into_inner()).await {
        Ok(check) => HttpResponse::Ok().json(CheckFilesResponse {
            exists: check.exists,
            file_count: check.file_count,
        }),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/import/resumable`
pub async fn list_resumable(state: web::Data<AppState>) -> HttpResponse {
    match state.orchestrator.list_resumable().await {
        Ok(jobs) => HttpResponse::Ok().json(ResumableResponse {
            jobs: jobs.into_iter().map(ApiResumableTransfer::from).collect(),
        }),
        Err(e) => error_response(&e),
    }
}
