use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::{Parser, ValueEnum};
use segment_catalog_api::{parse_intervals, AccessPolicy, SegmentCatalogApi, API_CONTRACT_VERSION};
use segment_catalog_core::{
    CatalogError, DataSource, DataSourceListing, ListDataSourcesOptions, RequesterIdentity,
    Segment, SegmentListing,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");
const IDENTITY_HEADER: &str = "x-catalog-identity";

#[derive(Debug, Clone)]
struct ServiceState {
    api: SegmentCatalogApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Flags are presence-based: `?full` and `?full=false` both set the flag.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataSourceFlags {
    full: Option<String>,
    include_disabled: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SegmentFlags {
    full: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "segment-catalog-service")]
#[command(about = "Local HTTP service for the segment catalog")]
struct Args {
    #[arg(long, default_value = "./segment_catalog.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4010")]
    bind: SocketAddr,
    /// YAML access policy; every read is allowed when omitted.
    #[arg(long)]
    policy: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl ServiceError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
    }
}

impl From<CatalogError> for ServiceError {
    fn from(err: CatalogError) -> Self {
        let status = match &err {
            CatalogError::DataSourceNotFound(_) | CatalogError::SegmentNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            CatalogError::Forbidden(_) => StatusCode::FORBIDDEN,
            CatalogError::Validation(_) => StatusCode::BAD_REQUEST,
            CatalogError::Inventory(_) | CatalogError::Resolver(_) | CatalogError::Authorization(_) => {
                error!(error = %err, "catalog collaborator failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn init_logging(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_writer(std::io::stderr)).init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
    }
}

fn identity(state: &ServiceState, headers: &HeaderMap) -> RequesterIdentity {
    let principal = headers.get(IDENTITY_HEADER).and_then(|value| value.to_str().ok());
    state.api.identity(principal)
}

/// Run catalog work off the async runtime; `SQLite` access is blocking.
async fn run_blocking<T, F>(task: F) -> Result<T, ServiceError>
where
    F: FnOnce() -> Result<T, CatalogError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(result) => result.map_err(ServiceError::from),
        Err(err) => Err(ServiceError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("catalog task failed: {err}"),
        )),
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/metadata/datasources", get(list_data_sources))
        .route("/v1/metadata/datasources/:name", get(get_data_source))
        .route("/v1/metadata/datasources/:name/segments", get(list_segments).post(resolve_segments))
        .route("/v1/metadata/datasources/:name/segments/:segment_id", get(get_segment))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_format);

    let mut api = SegmentCatalogApi::new(args.db.clone());
    if let Some(policy_path) = &args.policy {
        let policy = AccessPolicy::load(policy_path)?;
        info!(
            policy = %policy_path.display(),
            principals = policy.principals.len(),
            "loaded access policy"
        );
        api = api.with_policy(&policy);
    }
    api.migrate(false).context("failed to migrate catalog database")?;

    let state = ServiceState { api };
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(bind = %args.bind, db = %args.db.display(), "segment catalog service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn list_data_sources(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Query(flags): Query<DataSourceFlags>,
) -> Result<Json<ServiceEnvelope<DataSourceListing>>, ServiceError> {
    let identity = identity(&state, &headers);
    let options = ListDataSourcesOptions {
        full: flags.full.is_some(),
        include_disabled: flags.include_disabled.is_some(),
    };
    let listing = run_blocking(move || state.api.list_data_sources(&identity, options)).await?;
    Ok(Json(envelope(listing)))
}

async fn get_data_source(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<ServiceEnvelope<DataSource>>, ServiceError> {
    let identity = identity(&state, &headers);
    let data_source = run_blocking(move || state.api.get_data_source(&identity, &name)).await?;
    Ok(Json(envelope(data_source)))
}

async fn list_segments(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Query(flags): Query<SegmentFlags>,
) -> Result<Json<ServiceEnvelope<SegmentListing>>, ServiceError> {
    let identity = identity(&state, &headers);
    let full = flags.full.is_some();
    let listing = run_blocking(move || state.api.list_segments(&identity, &name, full)).await?;
    Ok(Json(envelope(listing)))
}

async fn resolve_segments(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Query(flags): Query<SegmentFlags>,
    Json(raw_intervals): Json<Vec<String>>,
) -> Result<Json<ServiceEnvelope<SegmentListing>>, ServiceError> {
    let identity = identity(&state, &headers);
    let full = flags.full.is_some();
    let intervals = parse_intervals(&raw_intervals)?;
    let listing =
        run_blocking(move || state.api.resolve_segments(&identity, &name, &intervals, full))
            .await?;
    Ok(Json(envelope(listing)))
}

async fn get_segment(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path((name, segment_id)): Path<(String, String)>,
) -> Result<Json<ServiceEnvelope<Segment>>, ServiceError> {
    let identity = identity(&state, &headers);
    let segment =
        run_blocking(move || state.api.get_segment(&identity, &name, &segment_id)).await?;
    Ok(Json(envelope(segment)))
}
