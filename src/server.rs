//! REST API and live event stream for the catalog UI.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/health` | Health check with database status |
//! | `GET`  | `/api/sites` | All sites, newest first |
//! | `GET`  | `/api/sites/optimized` | One page of a status bucket, with search |
//! | `GET`  | `/api/sites/initial` | First page of the `general` bucket |
//! | `POST` | `/api/sites/import` | Run the extraction pipeline over `{content}` |
//! | `GET` `PUT` `DELETE` | `/api/sites/{id}` | Read, partially update, delete |
//! | `PUT`  | `/api/sites/{id}/move` | Change status bucket |
//! | `PUT`  | `/api/sites/{id}/comment` | Set comment |
//! | `PUT`  | `/api/sites/{id}/credentials` | Set login and password |
//! | `PUT`  | `/api/sites/{id}/prefix` | Set prefix tag |
//! | `GET` `POST` | `/api/prefixes` | List, create |
//! | `PUT` `DELETE` | `/api/prefixes/{name}` | Rename or recolor, delete |
//! | `GET`  | `/api/stats` | Live per-status counts |
//! | `GET`  | `/api/stats/cached` | Counts memoized for `server.stats_cache_ttl_ms` |
//! | `GET`  | `/api/events` | Server-Sent Events stream of catalog changes |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "site not found: 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `internal` (500).
//!
//! Every write invalidates the stats cache and publishes an event.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use site_catalog_core::models::{
    CatalogStats, Credentials, InstitutionRecord, Prefix, Site, SiteStatus,
};

use crate::config::Config;
use crate::db;
use crate::events::{Broadcaster, CatalogEvent};
use crate::import::{import_content, ImportOutcome};
use crate::migrate;
use crate::sqlite_catalog::{PrefixWrite, SitePage, SiteQuery, SiteUpdate, SqliteCatalog};
use crate::stats::StatsCache;

/// Raw dumps are large; the default 2 MB body limit is far too small.
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Upper bound for `limit` on paginated listings.
const MAX_PAGE_SIZE: i64 = 1000;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    catalog: Arc<SqliteCatalog>,
    events: Broadcaster,
    stats: Arc<StatsCache>,
}

impl AppState {
    /// Bookkeeping after any write: drop cached counts and notify clients.
    fn changed(&self, event: CatalogEvent) {
        self.stats.invalidate();
        self.events.publish(event);
    }
}

/// Start the HTTP server on `[server].bind`. Runs migrations first and
/// shuts down gracefully on Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let state = AppState {
        config: Arc::new(config.clone()),
        catalog: Arc::new(SqliteCatalog::new(pool)),
        events: Broadcaster::new(),
        stats: Arc::new(StatsCache::new(config.server.stats_cache_ttl())),
    };
    let catalog = state.catalog.clone();

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "site catalog listening");
    println!("Site catalog listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    catalog.close().await;
    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/sites", get(handle_list_sites))
        .route("/api/sites/optimized", get(handle_sites_page))
        .route("/api/sites/initial", get(handle_sites_initial))
        .route("/api/sites/import", post(handle_import))
        .route(
            "/api/sites/{id}",
            get(handle_get_site)
                .put(handle_update_site)
                .delete(handle_delete_site),
        )
        .route("/api/sites/{id}/move", put(handle_move_site))
        .route("/api/sites/{id}/comment", put(handle_set_comment))
        .route("/api/sites/{id}/credentials", put(handle_set_credentials))
        .route("/api/sites/{id}/prefix", put(handle_set_prefix))
        .route(
            "/api/prefixes",
            get(handle_list_prefixes).post(handle_create_prefix),
        )
        .route(
            "/api/prefixes/{name}",
            put(handle_update_prefix).delete(handle_delete_prefix),
        )
        .route("/api/stats", get(handle_stats))
        .route("/api/stats/cached", get(handle_stats_cached))
        .route("/api/events", get(handle_events))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Unexpected failures surface as 500 and are logged.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = %err, "request failed");
        internal(err.to_string())
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn conflict(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "conflict",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

/// Unwrap a JSON body, reporting malformed input in the error contract
/// instead of axum's plain-text rejection.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

fn parse_site_id(raw: &str) -> Result<i64, AppError> {
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(bad_request(format!("invalid site id: {}", raw))),
    }
}

#[derive(Serialize)]
struct SuccessResponse {
    success: bool,
    #[serde(rename = "sitesUpdated", skip_serializing_if = "Option::is_none")]
    sites_updated: Option<u64>,
}

// ============ GET /api/health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    timestamp: String,
    database: &'static str,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = if state.catalog.ping().await {
        "connected"
    } else {
        "disconnected"
    };
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
        database,
    })
}

// ============ Site listings ============

async fn handle_list_sites(State(state): State<AppState>) -> Result<Json<Vec<Site>>, AppError> {
    Ok(Json(state.catalog.list_sites().await?))
}

#[derive(Deserialize)]
struct PageParams {
    status: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
    search: Option<String>,
}

async fn handle_sites_page(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<SitePage>, AppError> {
    let status = match params.status.as_deref() {
        Some(raw) => raw
            .parse::<SiteStatus>()
            .map_err(|e| bad_request(e.to_string()))?,
        None => SiteStatus::General,
    };

    let query = SiteQuery {
        status,
        page: params.page.unwrap_or(1).max(1),
        limit: params
            .limit
            .unwrap_or(state.config.server.page_size)
            .clamp(1, MAX_PAGE_SIZE),
        search: params.search,
    };

    Ok(Json(state.catalog.page_sites(&query).await?))
}

async fn handle_sites_initial(State(state): State<AppState>) -> Result<Json<Vec<Site>>, AppError> {
    let query = SiteQuery {
        status: SiteStatus::General,
        page: 1,
        limit: state.config.server.page_size,
        search: None,
    };
    Ok(Json(state.catalog.page_sites(&query).await?.sites))
}

// ============ POST /api/sites/import ============

#[derive(Deserialize)]
struct ImportRequest {
    content: String,
}

#[derive(Serialize)]
struct ImportCounts {
    added: u64,
    duplicates: u64,
    errors: u64,
}

/// Body of an import reply. A fatal catalog error still carries the counts
/// for the batches that committed, with `success: false` and `fatal` set.
#[derive(Serialize)]
struct ImportResponse {
    success: bool,
    results: ImportCounts,
    sites: Vec<InstitutionRecord>,
    processed: u64,
    total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    fatal: Option<String>,
}

fn import_reply(outcome: &ImportOutcome) -> (StatusCode, Json<ImportResponse>) {
    let report = &outcome.report;
    let status = if report.fatal.is_some() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };

    let body = ImportResponse {
        success: report.fatal.is_none(),
        results: ImportCounts {
            added: report.result.added,
            duplicates: report.result.skipped,
            errors: report.result.failed,
        },
        sites: outcome.added_records(),
        processed: report.processed,
        total: report.total,
        fatal: report.fatal.clone(),
    };
    (status, Json(body))
}

async fn handle_import(
    State(state): State<AppState>,
    body: Result<Json<ImportRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ImportResponse>), AppError> {
    let request = json_body(body)?;
    if request.content.trim().is_empty() {
        return Err(bad_request("content must not be empty"));
    }

    let options = state.config.import.feed_options();
    let outcome = import_content(state.catalog.as_ref(), request.content, &options).await?;
    let report = &outcome.report;

    info!(
        unique = outcome.extraction.stats.unique,
        added = report.result.added,
        skipped = report.result.skipped,
        failed = report.result.failed,
        "import request processed"
    );

    if report.result.added > 0 {
        state.changed(CatalogEvent::sites_updated("import", report.result.added));
    }

    if let Some(fatal) = &report.fatal {
        error!(
            error = %fatal,
            processed = report.processed,
            total = report.total,
            "import aborted"
        );
    }

    Ok(import_reply(&outcome))
}

// ============ Single site ============

async fn handle_get_site(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Site>, AppError> {
    let site_id = parse_site_id(&id)?;
    state
        .catalog
        .get_site(site_id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("site not found: {}", site_id)))
}

/// Shared path for every single-site mutation.
async fn update_and_publish(
    state: &AppState,
    id: &str,
    update: SiteUpdate,
) -> Result<Json<Site>, AppError> {
    let site_id = parse_site_id(id)?;
    if matches!(&update.name, Some(name) if name.trim().is_empty()) {
        return Err(bad_request("name must not be empty"));
    }

    let site = state
        .catalog
        .update_site(site_id, &update)
        .await?
        .ok_or_else(|| not_found(format!("site not found: {}", site_id)))?;

    state.changed(CatalogEvent::SiteUpdated { site: site.clone() });
    Ok(Json(site))
}

async fn handle_update_site(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<SiteUpdate>, JsonRejection>,
) -> Result<Json<Site>, AppError> {
    let update = json_body(body)?;
    if update.is_empty() {
        return Err(bad_request("no updatable fields in request body"));
    }
    update_and_publish(&state, &id, update).await
}

#[derive(Deserialize)]
struct MoveRequest {
    status: String,
}

async fn handle_move_site(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<MoveRequest>, JsonRejection>,
) -> Result<Json<Site>, AppError> {
    let request = json_body(body)?;
    let status = request
        .status
        .parse::<SiteStatus>()
        .map_err(|e| bad_request(e.to_string()))?;
    let update = SiteUpdate {
        status: Some(status),
        ..SiteUpdate::default()
    };
    update_and_publish(&state, &id, update).await
}

#[derive(Deserialize)]
struct CommentRequest {
    #[serde(default)]
    comment: String,
}

async fn handle_set_comment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<CommentRequest>, JsonRejection>,
) -> Result<Json<Site>, AppError> {
    let request = json_body(body)?;
    let update = SiteUpdate {
        comment: Some(request.comment),
        ..SiteUpdate::default()
    };
    update_and_publish(&state, &id, update).await
}

async fn handle_set_credentials(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<Site>, AppError> {
    let credentials = json_body(body)?;
    let update = SiteUpdate {
        credentials: Some(credentials),
        ..SiteUpdate::default()
    };
    update_and_publish(&state, &id, update).await
}

#[derive(Deserialize)]
struct PrefixTagRequest {
    #[serde(default)]
    prefix: String,
}

async fn handle_set_prefix(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<PrefixTagRequest>, JsonRejection>,
) -> Result<Json<Site>, AppError> {
    let request = json_body(body)?;
    let update = SiteUpdate {
        prefix: Some(request.prefix),
        ..SiteUpdate::default()
    };
    update_and_publish(&state, &id, update).await
}

async fn handle_delete_site(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    let site_id = parse_site_id(&id)?;
    if !state.catalog.delete_site(site_id).await? {
        return Err(not_found(format!("site not found: {}", site_id)));
    }
    state.changed(CatalogEvent::sites_updated("delete", 1));
    Ok(Json(SuccessResponse {
        success: true,
        sites_updated: None,
    }))
}

// ============ Prefixes ============

async fn handle_list_prefixes(
    State(state): State<AppState>,
) -> Result<Json<Vec<Prefix>>, AppError> {
    Ok(Json(state.catalog.list_prefixes().await?))
}

#[derive(Deserialize)]
struct PrefixRequest {
    name: Option<String>,
    color: Option<String>,
}

async fn handle_create_prefix(
    State(state): State<AppState>,
    body: Result<Json<PrefixRequest>, JsonRejection>,
) -> Result<Json<Prefix>, AppError> {
    let request = json_body(body)?;
    let name = request.name.as_deref().map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(bad_request("prefix name must not be empty"));
    }
    let prefix = Prefix {
        name: name.to_string(),
        color: request.color.unwrap_or_default(),
    };

    match state.catalog.create_prefix(&prefix).await? {
        PrefixWrite::Done { prefix, .. } => {
            state.events.publish(CatalogEvent::PrefixesUpdated {});
            Ok(Json(prefix))
        }
        PrefixWrite::Taken => Err(conflict(format!("prefix already exists: {}", prefix.name))),
        PrefixWrite::Missing => Err(internal("prefix vanished during create")),
    }
}

async fn handle_update_prefix(
    State(state): State<AppState>,
    Path(old_name): Path<String>,
    body: Result<Json<PrefixRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, AppError> {
    let request = json_body(body)?;
    let new_name = request.name.as_deref().map(str::trim);
    if new_name == Some("") {
        return Err(bad_request("prefix name must not be empty"));
    }

    match state
        .catalog
        .update_prefix(&old_name, new_name, request.color.as_deref())
        .await?
    {
        PrefixWrite::Done { sites_updated, .. } => {
            state.events.publish(CatalogEvent::PrefixesUpdated {});
            if sites_updated > 0 {
                state.changed(CatalogEvent::sites_updated("prefix", sites_updated));
            }
            Ok(Json(SuccessResponse {
                success: true,
                sites_updated: Some(sites_updated),
            }))
        }
        PrefixWrite::Missing => Err(not_found(format!("prefix not found: {}", old_name))),
        PrefixWrite::Taken => Err(conflict(format!(
            "prefix already exists: {}",
            new_name.unwrap_or_default()
        ))),
    }
}

async fn handle_delete_prefix(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    let cleared = state
        .catalog
        .delete_prefix(&name)
        .await?
        .ok_or_else(|| not_found(format!("prefix not found: {}", name)))?;

    state.events.publish(CatalogEvent::PrefixesUpdated {});
    if cleared > 0 {
        state.changed(CatalogEvent::sites_updated("prefix", cleared));
    }
    Ok(Json(SuccessResponse {
        success: true,
        sites_updated: Some(cleared),
    }))
}

// ============ Stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<CatalogStats>, AppError> {
    Ok(Json(state.catalog.stats().await?))
}

async fn handle_stats_cached(
    State(state): State<AppState>,
) -> Result<Json<CatalogStats>, AppError> {
    if let Some(stats) = state.stats.get() {
        return Ok(Json(stats));
    }
    let generation = state.stats.generation();
    let stats = state.catalog.stats().await?;
    state.stats.put(stats, generation);
    Ok(Json(stats))
}

// ============ GET /api/events ============

async fn handle_events(State(state): State<AppState>) -> impl IntoResponse {
    state.events.sse()
}
