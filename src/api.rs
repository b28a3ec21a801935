use crate::backend::Backend;
use crate::catalog::autocomplete::{
    AutocompleteRequest, EntitySelector, ExtraFilters, Resolution, placeholder, resolve,
};
use crate::catalog::filters::FilterSet;
use crate::catalog::listings::{self, ListingCard};
use crate::catalog::publish::{
    ImageUpload, PublishError, PublishErrorKind, PublishForm, PublishReceipt, Publisher,
};
use crate::config::MarketConfig;
use crate::idempotency::ReceiptCache;
use crate::models::{ApiError, Category, ListingView};
use crate::security::{AuthContext, SessionGate, TokenBuckets, require_session};
use crate::session::SessionStore;
use crate::supabase::SupabaseError;
use crate::supabase::auth::Session;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Extension, Path, Query, RawQuery, State},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn Backend>,
    pub sessions: Arc<SessionStore>,
    pub publisher: Publisher,
    pub market: MarketConfig,
    pub receipts: Arc<ReceiptCache>,
    pub openapi: Arc<Value>,
    pub prometheus: PrometheusHandle,
}

pub fn load_openapi() -> Value {
    serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or_else(|_| json!({"openapi": "3.0.3"}))
}

pub fn router(state: AppState, limiter: TokenBuckets, body_limit: usize) -> Router {
    let gate = SessionGate::new(state.sessions.clone(), limiter);
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/auth/logout", post(logout))
        .route("/auth/session", get(current_session))
        .route("/me/listings", get(my_listings).post(publish_listing))
        .route_layer(middleware::from_fn_with_state(gate, require_session));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/categories", get(categories))
        .route("/listings", get(browse))
        .route("/listings/recent", get(recent))
        .route("/listings/{id}", get(listing_detail))
        .route("/autocomplete", get(autocomplete))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "bicimarket-api",
    }))
}

fn presented_key_matches(headers: &HeaderMap, header_name: &str, env_key: &str) -> bool {
    let Ok(expected) = std::env::var(env_key) else {
        return true;
    };
    headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|presented| presented == expected)
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    if !presented_key_matches(&headers, "X-Docs-Key", "OPENAPI_KEY") {
        return Err(AppError::Unauthorized("docs"));
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Bicimarket API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#,
    )
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !presented_key_matches(&headers, "X-Metrics-Key", "METRICS_KEY") {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus.render(),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<Session>, AppError> {
    crate::metrics::inc_requests("/auth/login");
    let session = state
        .sessions
        .sign_in(payload.email.trim(), &payload.password)
        .await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<Session>, AppError> {
    crate::metrics::inc_requests("/auth/refresh");
    Ok(Json(state.sessions.refresh(&payload.refresh_token).await?))
}

async fn logout(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<StatusCode, AppError> {
    crate::metrics::inc_requests("/auth/logout");
    state.sessions.sign_out(&context.access_token).await?;
    info!(target = "bicimarket.api", user_id = %context.user.id, "signed out");
    Ok(StatusCode::NO_CONTENT)
}

async fn current_session(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Json<Value> {
    let expires_at = state
        .sessions
        .current(&context.access_token)
        .and_then(|entry| entry.expires_at);
    Json(json!({
        "user": context.user,
        "expires_at": expires_at,
    }))
}

async fn categories(State(state): State<AppState>) -> Result<Json<Vec<Category>>, AppError> {
    crate::metrics::inc_requests("/categories");
    Ok(Json(listings::categories(state.backend.as_ref()).await?))
}

#[derive(Debug, Serialize)]
struct BrowseResponse {
    filters: FilterSet,
    /// Canonical query string for sharing this view.
    query: String,
    listings: Vec<ListingCard>,
}

/// Browse listings. Accepts the same query string that
/// [`FilterSet::to_query_string`] produces.
async fn browse(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Json<BrowseResponse>, AppError> {
    crate::metrics::inc_requests("/listings");
    let filters = FilterSet::from_query_string(raw.as_deref().unwrap_or_default());
    let found =
        listings::browse(state.backend.as_ref(), &filters, state.market.listings_limit).await?;
    Ok(Json(BrowseResponse {
        query: filters.to_query_string(),
        filters,
        listings: found,
    }))
}

async fn recent(State(state): State<AppState>) -> Result<Json<Vec<ListingCard>>, AppError> {
    crate::metrics::inc_requests("/listings/recent");
    Ok(Json(
        listings::recent(state.backend.as_ref(), state.market.recent_limit).await?,
    ))
}

async fn listing_detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ListingView>, AppError> {
    crate::metrics::inc_requests("/listings/{id}");
    listings::detail(state.backend.as_ref(), id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("listing"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AutocompleteParams {
    entity: Option<EntitySelector>,
    q: String,
    /// Comma separated.
    selected: String,
    brand_name: String,
    model_name: String,
    brand_id: Option<i64>,
    single: bool,
    allow_other: bool,
}

fn comma_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

impl From<AutocompleteParams> for AutocompleteRequest {
    fn from(params: AutocompleteParams) -> Self {
        AutocompleteRequest {
            entity: params.entity,
            query: params.q,
            selected: comma_list(&params.selected),
            filters: ExtraFilters {
                brand_name: comma_list(&params.brand_name),
                model_name: comma_list(&params.model_name),
                brand_id: params.brand_id,
            },
            single: params.single,
            allow_other: params.allow_other,
            brand_id: params.brand_id,
        }
    }
}

#[derive(Debug, Serialize)]
struct AutocompleteResponse {
    #[serde(flatten)]
    resolution: Resolution,
    placeholder: &'static str,
}

async fn autocomplete(
    State(state): State<AppState>,
    Query(params): Query<AutocompleteParams>,
) -> Json<AutocompleteResponse> {
    crate::metrics::inc_requests("/autocomplete");
    let request = AutocompleteRequest::from(params);
    let resolution = resolve(
        state.backend.as_ref(),
        &request,
        state.market.autocomplete_limit,
    )
    .await;
    Json(AutocompleteResponse {
        resolution,
        placeholder: placeholder(request.entity, false),
    })
}

async fn my_listings(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<Vec<ListingCard>>, AppError> {
    crate::metrics::inc_requests("/me/listings");
    Ok(Json(
        listings::for_user(state.backend.as_ref(), context.user.id).await?,
    ))
}

#[derive(Debug, Deserialize)]
struct ImagePayload {
    file_name: String,
    #[serde(default)]
    content_type: Option<String>,
    /// Base64, optionally as a `data:` URL.
    data: String,
}

impl ImagePayload {
    fn decode(self) -> Result<ImageUpload, AppError> {
        let data = self.data;
        let (declared, encoded) = match data.strip_prefix("data:") {
            Some(rest) => match rest.split_once(',') {
                Some((meta, encoded)) => (meta.split(';').next().map(str::to_string), encoded),
                None => (None, rest),
            },
            None => (None, data.as_str()),
        };
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| AppError::BadRequest {
                code: "images",
                detail: format!("{} is not valid base64", self.file_name),
            })?;
        Ok(ImageUpload {
            file_name: self.file_name,
            content_type: self.content_type.or(declared),
            bytes,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PublishRequest {
    #[serde(flatten)]
    form: PublishForm,
    #[serde(default)]
    images: Vec<ImagePayload>,
}

/// Publish a listing as the signed-in user.
///
/// Replays with the same `Idempotency-Key` return the stored receipt with
/// `200` instead of creating a second listing.
async fn publish_listing(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    headers: HeaderMap,
    Json(payload): Json<PublishRequest>,
) -> Result<(StatusCode, Json<PublishReceipt>), AppError> {
    crate::metrics::inc_requests("/me/listings:post");
    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    if let Some(key) = &idempotency_key
        && let Some(existing) = state.receipts.get(context.user.id, key).await
    {
        return Ok((StatusCode::OK, Json(existing)));
    }

    let images = payload
        .images
        .into_iter()
        .map(ImagePayload::decode)
        .collect::<Result<Vec<_>, _>>()?;
    let mut form = payload.form;
    let receipt = state
        .publisher
        .publish(&mut form, images, context.user.id, &context.access_token)
        .await?;

    if let Some(key) = &idempotency_key {
        state.receipts.put(context.user.id, key, &receipt).await;
    }
    Ok((StatusCode::CREATED, Json(receipt)))
}

#[derive(Debug)]
pub enum AppError {
    Publish(PublishError),
    Backend(SupabaseError),
    BadRequest { code: &'static str, detail: String },
    NotFound(&'static str),
    Unauthorized(&'static str),
}

impl From<PublishError> for AppError {
    fn from(value: PublishError) -> Self {
        Self::Publish(value)
    }
}

impl From<SupabaseError> for AppError {
    fn from(value: SupabaseError) -> Self {
        Self::Backend(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match self {
            AppError::Publish(err) => {
                let status = match err.kind() {
                    PublishErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PublishErrorKind::Upload | PublishErrorKind::Persistence => {
                        StatusCode::BAD_GATEWAY
                    }
                };
                (status, err.stage().to_string(), Some(err.detail().to_string()))
            }
            AppError::Backend(err) if err.is_unauthorized() => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".to_string(),
                Some(err.to_string()),
            ),
            AppError::Backend(err) => {
                warn!(target = "bicimarket.api", error = %err, "backend request failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "backend_unavailable".to_string(),
                    Some(err.to_string()),
                )
            }
            AppError::BadRequest { code, detail } => {
                (StatusCode::BAD_REQUEST, code.to_string(), Some(detail))
            }
            AppError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what}_not_found"), None),
            AppError::Unauthorized(what) => {
                (StatusCode::UNAUTHORIZED, format!("{what}_unauthorized"), None)
            }
        };
        (status, Json(ApiError { error, detail })).into_response()
    }
}
