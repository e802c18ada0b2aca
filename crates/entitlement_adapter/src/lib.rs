#![forbid(unsafe_code)]

pub mod config;
pub mod error;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderName, Method, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use entitlement_engines::license::LicenseAuthority;
use entitlement_engines::trial::TrialStartError;
use entitlement_kernel_contracts::experiment::ExperimentName;
use entitlement_kernel_contracts::license::{LicenseCheckSource, LicenseKey};
use entitlement_kernel_contracts::project::PathHash;
use entitlement_kernel_contracts::sync::LocalStatePayload;
use entitlement_kernel_contracts::{Clock, ClientVersion, MachineId};
use entitlement_os::legacy::{self, LegacyTier};
use entitlement_os::EntitlementService;
use entitlement_storage::KvStore;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::AdapterConfig;
pub use error::ApiError;

pub const CLIENT_VERSION_HEADER: &str = "x-clouvel-version";
pub const CLIENT_NAME_HEADER: &str = "x-clouvel-client";

#[derive(Clone)]
pub struct AppState {
    service: Arc<EntitlementService>,
    min_client_version: ClientVersion,
}

impl AppState {
    pub fn new(service: EntitlementService) -> Self {
        let min_client_version = service.config().min_client_version;
        Self {
            service: Arc::new(service),
            min_client_version,
        }
    }

    pub fn from_parts(
        config: &AdapterConfig,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        authority: Arc<dyn LicenseAuthority>,
    ) -> Self {
        Self::new(EntitlementService::new(
            config.entitlement,
            store,
            clock,
            authority,
        ))
    }
}

pub fn router(state: AppState) -> Router {
    let v2 = Router::new()
        .route("/api/v2/sync", post(sync))
        .route("/api/v2/trial/start", post(trial_start))
        .route("/api/v2/project/register", post(project_register))
        .route("/api/v2/meeting/consume", post(meeting_consume))
        .route("/api/v2/experiment/assign", post(experiment_assign))
        .route("/api/v2/heartbeat", post(heartbeat))
        .route("/api/v2/check", get(check));

    let v3 = Router::new()
        .route("/api/manager", post(legacy_manager))
        .route("/api/ship", post(legacy_ship))
        .route("/api/trial/status", get(legacy_trial_status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_client_version,
        ));

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .merge(v2)
        .merge(v3)
        .fallback(not_found)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(CLIENT_NAME_HEADER),
            HeaderName::from_static(CLIENT_VERSION_HEADER),
        ])
}

/// Runs a store-backed call off the async workers; the license authority
/// client blocks on network I/O.
async fn run_blocking<T, F>(state: &AppState, call: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&EntitlementService) -> Result<T, ApiError> + Send + 'static,
{
    let service = state.service.clone();
    tokio::task::spawn_blocking(move || call(&service)).await?
}

fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|_| ApiError::InvalidJson)
}

fn require_machine_id(body: &Value) -> Result<MachineId, ApiError> {
    body.get("machine_id")
        .and_then(Value::as_str)
        .and_then(|raw| MachineId::new(raw).ok())
        .ok_or(ApiError::Validation("machine_id required"))
}

fn non_empty_str<'a>(body: &'a Value, field: &str) -> Option<&'a str> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
}

/// `license_key` and `licenseKey` are accepted interchangeably.
fn license_key_field(body: &Value) -> Option<&str> {
    non_empty_str(body, "license_key").or_else(|| non_empty_str(body, "licenseKey"))
}

async fn sync(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let body = parse_body(&body)?;
    let machine_id = require_machine_id(&body)?;
    let license_key = LicenseKey::parse(license_key_field(&body));
    let local = body
        .get("local_state")
        .map(LocalStatePayload::from_json_lenient)
        .unwrap_or_default()
        .into_legacy();
    let out = run_blocking(&state, move |service| {
        Ok(service.sync(&machine_id, license_key.as_ref(), &local)?)
    })
    .await?;
    Ok(Json(out).into_response())
}

async fn trial_start(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let body = parse_body(&body)?;
    let machine_id = require_machine_id(&body)?;
    let started = run_blocking(&state, move |service| {
        service.trial_start(&machine_id).map_err(|err| match err {
            TrialStartError::AlreadyStarted(status) => ApiError::TrialAlreadyStarted(status),
            TrialStartError::Storage(err) => err.into(),
        })
    })
    .await?;
    Ok(Json(started).into_response())
}

async fn project_register(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body = parse_body(&body)?;
    let machine_id = require_machine_id(&body)?;
    let path_hash = non_empty_str(&body, "path_hash")
        .and_then(|raw| PathHash::new(raw).ok())
        .ok_or(ApiError::Validation("path_hash required"))?;
    let registration = run_blocking(&state, move |service| {
        Ok(service.register_project(&machine_id, &path_hash)?)
    })
    .await?;
    Ok(Json(registration).into_response())
}

async fn meeting_consume(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body = parse_body(&body)?;
    let machine_id = require_machine_id(&body)?;
    let license_key = LicenseKey::parse(license_key_field(&body));
    let project_hash = non_empty_str(&body, "project_hash").and_then(|raw| PathHash::new(raw).ok());
    let decision = run_blocking(&state, move |service| {
        Ok(service.consume_meeting(&machine_id, license_key.as_ref(), project_hash.as_ref())?)
    })
    .await?;
    Ok(Json(decision).into_response())
}

async fn experiment_assign(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body = parse_body(&body)?;
    let machine_id = require_machine_id(&body)?;
    let experiment = non_empty_str(&body, "experiment")
        .and_then(|raw| ExperimentName::new(raw).ok())
        .ok_or(ApiError::Validation("experiment name required"))?;
    let assignment = run_blocking(&state, move |service| {
        Ok(service.assign_experiment(&machine_id, &experiment)?)
    })
    .await?;
    Ok(Json(assignment).into_response())
}

async fn heartbeat(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let body = parse_body(&body)?;
    let key = LicenseKey::parse(license_key_field(&body))
        .ok_or(ApiError::Validation("license_key required"))?;
    let outcome = run_blocking(&state, move |service| Ok(service.heartbeat(&key)?)).await?;
    Ok(match outcome {
        Some(ok) => Json(ok).into_response(),
        None => Json(json!({ "valid": false, "error": "validation_failed" })).into_response(),
    })
}

#[derive(Debug, Deserialize)]
struct CheckParams {
    key: Option<String>,
}

async fn check(
    State(state): State<AppState>,
    Query(params): Query<CheckParams>,
) -> Result<Response, ApiError> {
    let key = LicenseKey::parse(params.key.as_deref())
        .ok_or(ApiError::Validation("key param required"))?;
    let outcome = run_blocking(&state, move |service| Ok(service.check(&key)?)).await?;
    let source = match outcome.source {
        LicenseCheckSource::Cache => "cache",
        LicenseCheckSource::Fresh => "fresh",
    };
    Ok(match outcome.record {
        Some(record) => Json(json!({
            "valid": record.valid,
            "tier": record.tier,
            "source": source,
        }))
        .into_response(),
        None => Json(json!({
            "valid": false,
            "source": source,
            "error": "validation_failed",
        }))
        .into_response(),
    })
}

async fn require_client_version(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(CLIENT_VERSION_HEADER)
        .and_then(|v| v.to_str().ok());
    match legacy::check_client_version(header, &state.min_client_version) {
        Ok(_) => next.run(request).await,
        Err(upgrade) => {
            tracing::debug!(client_version = header.unwrap_or(""), "legacy client refused");
            ApiError::UpgradeRequired(upgrade).into_response()
        }
    }
}

fn legacy_tier(body: &Value) -> LegacyTier {
    LegacyTier::from_license_key(license_key_field(body))
}

async fn legacy_manager(body: Bytes) -> Result<Response, ApiError> {
    let body = parse_body(&body)?;
    let topic = body.get("topic").and_then(Value::as_str);
    Ok(Json(legacy::manager_feedback(topic, legacy_tier(&body))).into_response())
}

async fn legacy_ship(body: Bytes) -> Result<Response, ApiError> {
    let body = parse_body(&body)?;
    Ok(Json(legacy::ship_decision(legacy_tier(&body))).into_response())
}

async fn legacy_trial_status() -> Response {
    Json(legacy::free_tier_status()).into_response()
}

async fn health(State(state): State<AppState>) -> Response {
    Json(legacy::service_health(&state.min_client_version)).into_response()
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}
