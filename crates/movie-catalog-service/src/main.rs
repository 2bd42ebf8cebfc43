use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::header::{ALLOW, CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::{Parser, ValueEnum};
use movie_catalog_api::{
    decode, encode, ApiError, CreateMovieRequest, Envelope, MoviesApi, UpdateMovieRequest,
    MAX_BODY_BYTES,
};
use movie_catalog_core::Movie;
use movie_catalog_store_sqlite::SqliteMovieStore;
use serde::Serialize;
use tracing::Instrument;

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

const NOT_FOUND_MESSAGE: &str = "the requested resource could not be found";
const SERVER_ERROR_MESSAGE: &str =
    "the server encountered a problem and could not process your request";
const SERVER_ERROR_BODY: &str =
    "{\n  \"error\": \"the server encountered a problem and could not process your request\"\n}\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "movie-catalog-service")]
#[command(about = "JSON HTTP service for the movie catalog")]
struct Args {
    #[arg(long, env = "MOVIES_DB", default_value = "./movies.sqlite3")]
    db: PathBuf,
    #[arg(long, env = "MOVIES_BIND", default_value = "127.0.0.1:4000")]
    bind: SocketAddr,
    #[arg(long, env = "MOVIES_ENV", value_enum, default_value_t = Environment::Development)]
    env: Environment,
    /// Upper bound on each store operation, in milliseconds.
    #[arg(long, env = "MOVIES_STORE_TIMEOUT_MS", default_value_t = 3_000)]
    store_timeout_ms: u64,
}

#[derive(Debug, Clone)]
struct ServiceState {
    api: MoviesApi,
    environment: Environment,
}

#[derive(Debug, Clone, Serialize)]
struct SystemInfo {
    environment: &'static str,
    version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    system_info: SystemInfo,
}

#[derive(Debug)]
struct ServiceError(ApiError);

impl From<ApiError> for ServiceError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, envelope) = match &self.0 {
            ApiError::MalformedBody(_) | ApiError::EmptyBody => {
                (StatusCode::BAD_REQUEST, Envelope::error_message(&self.0.to_string()))
            }
            ApiError::Validation(errors) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Envelope::error_fields(errors))
            }
            ApiError::RecordNotFound => {
                (StatusCode::NOT_FOUND, Envelope::error_message(NOT_FOUND_MESSAGE))
            }
            ApiError::EditConflict => {
                tracing::debug!("rejected write due to edit conflict");
                (StatusCode::CONFLICT, Envelope::error_message(&self.0.to_string()))
            }
            ApiError::StoreUnavailable(_) | ApiError::Internal(_) => {
                tracing::error!(error = %self.0, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, Envelope::error_message(SERVER_ERROR_MESSAGE))
            }
        };
        write_json(status, &envelope, HeaderMap::new())
    }
}

/// Encode `envelope` with the given status and extra headers.
fn write_json(status: StatusCode, envelope: &Envelope, headers: HeaderMap) -> Response {
    match encode(envelope) {
        Ok(body) => {
            let mut response = (status, [(CONTENT_TYPE, "application/json")], body).into_response();
            response.headers_mut().extend(headers);
            response
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to encode response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(CONTENT_TYPE, "application/json")],
                SERVER_ERROR_BODY,
            )
                .into_response()
        }
    }
}

fn write_movie(
    status: StatusCode,
    movie: &Movie,
    headers: HeaderMap,
) -> Result<Response, ServiceError> {
    let envelope = Envelope::new("movie", movie)?;
    Ok(write_json(status, &envelope, headers))
}

/// Path ids that do not parse as a positive integer are treated as unknown records.
fn parse_id(raw: &str) -> Result<i64, ApiError> {
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ApiError::RecordNotFound),
    }
}

async fn read_body(body: Body) -> Result<Vec<u8>, ApiError> {
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES).await.map_err(|_| {
        ApiError::MalformedBody(format!("body must not be larger than {MAX_BODY_BYTES} bytes"))
    })?;
    Ok(bytes.to_vec())
}

/// Run a store-backed operation on the blocking pool.
async fn run_blocking<T, F>(op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|err| ApiError::Internal(format!("store task failed: {err}")))?
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/healthcheck", get(healthcheck))
        .route("/v1/movies", post(create_movie))
        .route("/v1/movies/:id", get(show_movie).put(update_movie).delete(delete_movie))
        .fallback(not_found)
        .layer(middleware::from_fn(request_context))
        .with_state(state)
}

/// Attach method and path to every event logged while serving a request, and
/// give bare 405 responses the standard error envelope.
async fn request_context(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let span =
        tracing::info_span!("request", method = %method, path = %request.uri().path());
    let response = next.run(request).instrument(span).await;

    if response.status() != StatusCode::METHOD_NOT_ALLOWED
        || response.headers().contains_key(CONTENT_TYPE)
    {
        return response;
    }

    let message = format!("the {method} method is not supported for this resource");
    let mut headers = HeaderMap::new();
    if let Some(allow) = response.headers().get(ALLOW) {
        headers.insert(ALLOW, allow.clone());
    }
    write_json(StatusCode::METHOD_NOT_ALLOWED, &Envelope::error_message(&message), headers)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let store =
        SqliteMovieStore::open(args.db.clone(), Duration::from_millis(args.store_timeout_ms))?;
    let schema = store.schema_status()?;
    tracing::info!(
        db = %args.db.display(),
        schema_version = schema.current_version,
        "database ready"
    );

    let state = ServiceState { api: MoviesApi::new(Arc::new(store)), environment: args.env };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(addr = %args.bind, env = args.env.as_str(), "starting server");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn healthcheck(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "available",
        system_info: SystemInfo {
            environment: state.environment.as_str(),
            version: SERVICE_VERSION,
        },
    })
}

async fn not_found() -> ServiceError {
    ServiceError(ApiError::RecordNotFound)
}

async fn create_movie(
    State(state): State<ServiceState>,
    body: Body,
) -> Result<Response, ServiceError> {
    let request: CreateMovieRequest = decode(&read_body(body).await?)?;
    let movie = run_blocking(move || state.api.create_movie(request)).await?;

    let mut headers = HeaderMap::new();
    let location = HeaderValue::from_str(&format!("/v1/movies/{}", movie.id))
        .map_err(|err| ApiError::Internal(format!("invalid location header: {err}")))?;
    headers.insert(LOCATION, location);
    write_movie(StatusCode::CREATED, &movie, headers)
}

async fn show_movie(
    State(state): State<ServiceState>,
    Path(raw_id): Path<String>,
) -> Result<Response, ServiceError> {
    let id = parse_id(&raw_id)?;
    let movie = run_blocking(move || state.api.show_movie(id)).await?;
    write_movie(StatusCode::OK, &movie, HeaderMap::new())
}

async fn update_movie(
    State(state): State<ServiceState>,
    Path(raw_id): Path<String>,
    body: Body,
) -> Result<Response, ServiceError> {
    let id = parse_id(&raw_id)?;
    let request: UpdateMovieRequest = decode(&read_body(body).await?)?;
    let movie = run_blocking(move || state.api.update_movie(id, request)).await?;
    write_movie(StatusCode::OK, &movie, HeaderMap::new())
}

async fn delete_movie(
    State(state): State<ServiceState>,
    Path(raw_id): Path<String>,
) -> Result<Response, ServiceError> {
    let id = parse_id(&raw_id)?;
    run_blocking(move || state.api.delete_movie(id)).await?;
    let envelope = Envelope::new("message", &"movie successfully deleted")?;
    Ok(write_json(StatusCode::OK, &envelope, HeaderMap::new()))
}
