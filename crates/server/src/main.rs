use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use server_api::{
    attach_access_key, count_dynamic_access_keys, create_access_key, create_dynamic_access_key,
    detach_access_key, get_dynamic_access_key, list_attached_access_keys,
    list_dynamic_access_keys, list_unattached_access_keys, remove_dynamic_access_key,
    update_dynamic_access_key, ApiContext, PageLimits,
};
use shared::{
    domain::{AccessKeyId, DynamicAccessKeyId},
    error::{ApiError, ErrorCode},
    protocol::{
        AccessKeySummary, CountDynamicAccessKeysQuery, CountResponse, DynamicAccessKeyDraft,
        DynamicAccessKeySummary, ListDynamicAccessKeysQuery, NewAccessKey,
    },
};
use storage::Storage;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, prepare_database_url};

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

type HttpError = (StatusCode, Json<ApiError>);

const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = ApiContext {
        storage,
        limits: PageLimits {
            page_size: settings.page_size,
            max_page_size: settings.max_page_size,
        },
    };

    let app = build_router(Arc::new(AppState { api }));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, page_size = settings.page_size, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/dynamic-access-keys",
            get(http_list_dynamic_access_keys).post(http_create_dynamic_access_key),
        )
        .route("/dynamic-access-keys/count", get(http_count_dynamic_access_keys))
        .route(
            "/dynamic-access-keys/:id",
            get(http_get_dynamic_access_key)
                .put(http_update_dynamic_access_key)
                .delete(http_remove_dynamic_access_key),
        )
        .route(
            "/dynamic-access-keys/:id/access-keys",
            get(http_list_attached_access_keys),
        )
        .route(
            "/dynamic-access-keys/:id/access-keys/:access_key_id",
            put(http_attach_access_key).delete(http_detach_access_key),
        )
        .route("/access-keys", post(http_create_access_key))
        .route("/access-keys/unattached", get(http_list_unattached_access_keys))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(error) => {
            error!(error = %format!("{error:#}"), "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

async fn http_list_dynamic_access_keys(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListDynamicAccessKeysQuery>,
) -> Result<Json<Vec<DynamicAccessKeySummary>>, HttpError> {
    let keys = list_dynamic_access_keys(&state.api, &q)
        .await
        .map_err(api_failure)?;
    Ok(Json(keys))
}

async fn http_count_dynamic_access_keys(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CountDynamicAccessKeysQuery>,
) -> Result<Json<CountResponse>, HttpError> {
    let count = count_dynamic_access_keys(&state.api, &q)
        .await
        .map_err(api_failure)?;
    Ok(Json(count))
}

async fn http_get_dynamic_access_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<DynamicAccessKeySummary>, HttpError> {
    let key = get_dynamic_access_key(&state.api, DynamicAccessKeyId(id))
        .await
        .map_err(api_failure)?;
    Ok(Json(key))
}

async fn http_create_dynamic_access_key(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<DynamicAccessKeyDraft>,
) -> Result<(StatusCode, Json<DynamicAccessKeySummary>), HttpError> {
    let key = create_dynamic_access_key(&state.api, draft)
        .await
        .map_err(api_failure)?;
    Ok((StatusCode::CREATED, Json(key)))
}

async fn http_update_dynamic_access_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(draft): Json<DynamicAccessKeyDraft>,
) -> Result<Json<DynamicAccessKeySummary>, HttpError> {
    let key = update_dynamic_access_key(&state.api, DynamicAccessKeyId(id), draft)
        .await
        .map_err(api_failure)?;
    Ok(Json(key))
}

async fn http_remove_dynamic_access_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, HttpError> {
    remove_dynamic_access_key(&state.api, DynamicAccessKeyId(id))
        .await
        .map_err(api_failure)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_list_attached_access_keys(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<AccessKeySummary>>, HttpError> {
    let keys = list_attached_access_keys(&state.api, DynamicAccessKeyId(id))
        .await
        .map_err(api_failure)?;
    Ok(Json(keys))
}

async fn http_list_unattached_access_keys(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AccessKeySummary>>, HttpError> {
    let keys = list_unattached_access_keys(&state.api)
        .await
        .map_err(api_failure)?;
    Ok(Json(keys))
}

async fn http_create_access_key(
    State(state): State<Arc<AppState>>,
    Json(new_key): Json<NewAccessKey>,
) -> Result<(StatusCode, Json<AccessKeySummary>), HttpError> {
    let key = create_access_key(&state.api, new_key)
        .await
        .map_err(api_failure)?;
    Ok((StatusCode::CREATED, Json(key)))
}

async fn http_attach_access_key(
    State(state): State<Arc<AppState>>,
    Path((id, access_key_id)): Path<(i64, i64)>,
) -> Result<Json<AccessKeySummary>, HttpError> {
    let key = attach_access_key(
        &state.api,
        DynamicAccessKeyId(id),
        AccessKeyId(access_key_id),
    )
    .await
    .map_err(api_failure)?;
    Ok(Json(key))
}

async fn http_detach_access_key(
    State(state): State<Arc<AppState>>,
    Path((id, access_key_id)): Path<(i64, i64)>,
) -> Result<StatusCode, HttpError> {
    detach_access_key(
        &state.api,
        DynamicAccessKeyId(id),
        AccessKeyId(access_key_id),
    )
    .await
    .map_err(api_failure)?;
    Ok(StatusCode::NO_CONTENT)
}

fn api_failure(err: ApiError) -> HttpError {
    let status = match err.code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
