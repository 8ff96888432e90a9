use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Path, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use sog_auth::access::{self, AccessError, SoOperation};
use sog_auth::pdp::{HttpPdp, HttpPdpConfig, PolicyDecisionPoint};
use sog_auth::{AuthError, Authenticator, IdmClient, IdmConfig, Principal};
use sog_contracts::{
    epoch_ms_now, ActuationSpec, ErrorKind, RequestError, SecurityMeta, ServiceObject, StreamSpec,
    Subscription, SubscriptionTarget,
};
use sog_queue::mem::MemoryQueue;
use sog_queue::nats::{NatsQueue, NatsQueueConfig};
use sog_queue::{Queue, QueueError};
use sog_store::http::{DocStoreClient, DocStoreConfig, SearchClient, SearchConfig};
use sog_store::mem::MemoryBackend;
use sog_store::{Index, IndexError, Store, StoreError};

use crate::config::{AuthMode, BackendMode, GatewayConfig, QueueMode, StartupError};

mod ingest;
mod retrieve;

const SERVER_NAME: &str = "api.sog";

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    store: Arc<dyn Store>,
    index: Arc<dyn Index>,
    queue: Arc<dyn Queue>,
    authenticator: Authenticator,
    pdp: Arc<dyn PolicyDecisionPoint>,
}

type ApiError = (StatusCode, Json<ErrorBody>);

impl AppState {
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn Store>,
        index: Arc<dyn Index>,
        queue: Arc<dyn Queue>,
        authenticator: Authenticator,
        pdp: Arc<dyn PolicyDecisionPoint>,
    ) -> Self {
        Self {
            config,
            store,
            index,
            queue,
            authenticator,
            pdp,
        }
    }

    pub async fn from_config(config: GatewayConfig) -> Result<Self, StartupError> {
        let (store, index): (Arc<dyn Store>, Arc<dyn Index>) = match config.backend_mode {
            BackendMode::Memory => {
                let backend = MemoryBackend::new();
                (Arc::new(backend.clone()), Arc::new(backend))
            }
            BackendMode::Http => {
                let store_url = config.store_url.clone().ok_or_else(|| StartupError {
                    code: "ERR_MISSING_CONFIG",
                    message: "http backend mode requires SOG_STORE_URL".to_string(),
                })?;
                let search_url = config.search_url.clone().ok_or_else(|| StartupError {
                    code: "ERR_MISSING_CONFIG",
                    message: "http backend mode requires SOG_SEARCH_URL".to_string(),
                })?;

                let store = DocStoreClient::new(DocStoreConfig {
                    base_url: store_url,
                    timeout: Duration::from_millis(config.store_timeout_ms),
                })
                .map_err(|_| StartupError {
                    code: "ERR_STORE_UNAVAILABLE",
                    message: "failed to initialize document-store client".to_string(),
                })?;
                let search = SearchClient::new(SearchConfig {
                    base_url: search_url,
                    timeout: Duration::from_millis(config.search_timeout_ms),
                })
                .map_err(|_| StartupError {
                    code: "ERR_SEARCH_UNAVAILABLE",
                    message: "failed to initialize search client".to_string(),
                })?;

                (Arc::new(store), Arc::new(search))
            }
        };

        let queue: Arc<dyn Queue> = match config.queue_mode {
            QueueMode::Memory => Arc::new(MemoryQueue::new()),
            QueueMode::Nats => {
                let url = config.nats_url.clone().ok_or_else(|| StartupError {
                    code: "ERR_MISSING_CONFIG",
                    message: "nats queue mode requires SOG_NATS_URL".to_string(),
                })?;
                let nats = NatsQueue::connect(NatsQueueConfig {
                    url,
                    connect_timeout: Duration::from_millis(config.nats_connect_timeout_ms),
                    publish_timeout: Duration::from_millis(config.nats_publish_timeout_ms),
                })
                .await
                .map_err(|err| StartupError {
                    code: "ERR_QUEUE_UNAVAILABLE",
                    message: format!("failed to connect queue transport: {}", err),
                })?;
                Arc::new(nats)
            }
        };

        let authenticator = match config.auth_mode {
            AuthMode::Local => Authenticator::Local,
            AuthMode::Idm => {
                let base_url = config.idm_url.clone().ok_or_else(|| StartupError {
                    code: "ERR_MISSING_CONFIG",
                    message: "idm auth mode requires SOG_IDM_URL".to_string(),
                })?;
                let client = IdmClient::new(IdmConfig {
                    base_url,
                    timeout: Duration::from_millis(config.idm_timeout_ms),
                })
                .map_err(|err| StartupError {
                    code: "ERR_IDM_UNAVAILABLE",
                    message: format!("failed to initialize identity client: {}", err),
                })?;
                Authenticator::Idm(client)
            }
        };

        let pdp: Arc<dyn PolicyDecisionPoint> = Arc::new(
            HttpPdp::new(HttpPdpConfig {
                base_url: config.pdp_url.clone(),
                timeout: Duration::from_millis(config.pdp_timeout_ms),
            })
            .map_err(|_| StartupError {
                code: "ERR_PDP_UNAVAILABLE",
                message: "failed to initialize policy client".to_string(),
            })?,
        );

        Ok(Self::new(config, store, index, queue, authenticator, pdp))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/", post(create_so).get(list_sos))
        .route("/{so_id}", get(get_so).put(update_so).delete(delete_so))
        .route("/{so_id}/streams", get(list_streams))
        .route(
            "/{so_id}/streams/{stream_id}",
            axum::routing::put(ingest::put_stream_data)
                .get(retrieve::list_stream_data)
                .delete(delete_stream_data),
        )
        .route(
            "/{so_id}/streams/{stream_id}/lastUpdate",
            get(retrieve::last_update),
        )
        .route(
            "/{so_id}/streams/{stream_id}/search",
            post(retrieve::search_stream_data),
        )
        .route(
            "/{so_id}/streams/{stream_id}/subscriptions",
            post(create_subscription).get(list_subscriptions),
        )
        .route(
            "/subscriptions/{subs_id}",
            get(get_subscription).delete(delete_subscription),
        )
        .route("/{so_id}/actuations", get(list_actuations))
        .route(
            "/{so_id}/actuations/{actuation}",
            post(ingest::launch_actuation)
                .get(get_actuation_status)
                .put(ingest::update_actuation_status),
        )
        .layer(middleware::from_fn(response_envelope))
        .with_state(state)
}

// Stamps the Server/Date headers every response carries and records the
// request in the metrics registry.
async fn response_envelope(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let mut response = next.run(req).await;

    crate::metrics::observe_http_request(
        &route,
        method.as_str(),
        response.status().as_u16(),
        started.elapsed(),
    );

    let headers = response.headers_mut();
    headers.insert(header::SERVER, HeaderValue::from_static(SERVER_NAME));
    if let Ok(value) = HeaderValue::from_str(&http_date_now()) {
        headers.insert(header::DATE, value);
    }

    response
}

fn http_date_now() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ReadyzResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, bool>,
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();

    let store_ready = state.store.get_so("readyz-probe").await.is_ok();
    checks.insert("store", store_ready);

    let index_ready = state
        .index
        .update_ids("readyz-probe", "readyz-probe")
        .await
        .is_ok();
    checks.insert("index", index_ready);

    let all_ready = checks.values().all(|ok| *ok);
    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyzResponse {
            status: if all_ready { "ready" } else { "not_ready" },
            checks,
        }),
    )
}

async fn metrics() -> impl IntoResponse {
    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateSoRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    streams: BTreeMap<String, StreamSpec>,
    #[serde(default)]
    actuations: Vec<ActuationSpec>,
    #[serde(default)]
    security: Option<SecurityMeta>,
}

async fn create_so(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let principal = require_principal(&state, &headers).await?;

    if body.trim().is_empty() {
        return Err(api_error(RequestError::bad_request("no data in the request")));
    }

    let req: CreateSoRequest = serde_json::from_str(&body)
        .map_err(|_| api_error(RequestError::bad_request("invalid JSON body")))?;

    let now = epoch_ms_now();
    let so = ServiceObject {
        id: Ulid::new().to_string(),
        owner_id: principal.id.clone(),
        name: req.name,
        description: req.description,
        streams: req.streams,
        actuations: req.actuations,
        security: req.security.unwrap_or(SecurityMeta::OwnerOnly),
        created_at: now,
        updated_at: now,
    };

    state.store.put_so(&so).await.map_err(store_failure)?;

    tracing::info!(so_id = %so.id, principal_id = %principal.id, "gateway.create_so");

    let location = format!("/{}", so.id);
    Ok(created_at_location(&location, Json(so)))
}

#[derive(Debug, Serialize)]
struct SoListingResponse {
    objects: Vec<String>,
}

async fn list_sos(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = require_principal(&state, &headers).await?;

    let objects = state
        .store
        .so_ids_for_owner(&principal.id)
        .await
        .map_err(store_failure)?;

    Ok(Json(SoListingResponse { objects }).into_response())
}

async fn get_so(
    State(state): State<AppState>,
    Path(so_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = require_principal(&state, &headers).await?;
    let so = load_so(&state, &so_id).await?;
    require_so_access(&state, &principal, &so, SoOperation::Read).await?;

    Ok(Json(so).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateSoRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    streams: Option<BTreeMap<String, StreamSpec>>,
    #[serde(default)]
    actuations: Option<Vec<ActuationSpec>>,
    #[serde(default)]
    security: Option<SecurityMeta>,
}

async fn update_so(
    State(state): State<AppState>,
    Path(so_id): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let principal = require_principal(&state, &headers).await?;
    let mut so = load_so(&state, &so_id).await?;
    require_so_access(&state, &principal, &so, SoOperation::Write).await?;

    if body.trim().is_empty() {
        return Err(api_error(RequestError::bad_request("no data in the request")));
    }
    let req: UpdateSoRequest = serde_json::from_str(&body)
        .map_err(|_| api_error(RequestError::bad_request("invalid JSON body")))?;

    if let Some(name) = req.name {
        so.name = Some(name);
    }
    if let Some(description) = req.description {
        so.description = Some(description);
    }
    if let Some(streams) = req.streams {
        so.streams = streams;
    }
    if let Some(actuations) = req.actuations {
        so.actuations = actuations;
    }
    if let Some(security) = req.security {
        so.security = security;
    }
    so.updated_at = epoch_ms_now();

    state.store.put_so(&so).await.map_err(store_failure)?;

    tracing::info!(so_id = %so.id, principal_id = %principal.id, "gateway.update_so");

    Ok(Json(so).into_response())
}

async fn delete_so(
    State(state): State<AppState>,
    Path(so_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = require_principal(&state, &headers).await?;
    let so = load_so(&state, &so_id).await?;
    require_so_access(&state, &principal, &so, SoOperation::Delete).await?;

    let purged = purge_so_updates(&state, &so.id).await?;
    let subscriptions = purge_subscriptions(&state, &so.id).await?;

    state.store.delete_so(&so.id).await.map_err(store_failure)?;

    tracing::info!(
        so_id = %so.id,
        principal_id = %principal.id,
        purged_updates = purged,
        purged_subscriptions = subscriptions,
        "gateway.delete_so"
    );

    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Serialize)]
struct StreamEntry {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
}

async fn list_streams(
    State(state): State<AppState>,
    Path(so_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = require_principal(&state, &headers).await?;
    let so = load_so(&state, &so_id).await?;
    require_so_access(&state, &principal, &so, SoOperation::Read).await?;

    if so.streams.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let streams = so
        .streams
        .into_iter()
        .map(|(name, spec)| StreamEntry {
            name,
            description: spec.description,
            unit: spec.unit,
        })
        .collect::<Vec<_>>();

    Ok(Json(serde_json::json!({ "streams": streams })).into_response())
}

async fn delete_stream_data(
    State(state): State<AppState>,
    Path((so_id, stream_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = require_principal(&state, &headers).await?;
    let so = load_so(&state, &so_id).await?;
    require_so_access(&state, &principal, &so, SoOperation::Delete).await?;

    let purged = purge_stream_updates(&state, &so.id, &stream_id).await?;

    tracing::info!(
        so_id = %so.id,
        stream_id = %stream_id,
        purged_updates = purged,
        "gateway.delete_stream_data"
    );

    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateSubscriptionRequest {
    #[serde(default)]
    callback: Option<String>,
    #[serde(default)]
    destination: Option<String>,
}

async fn create_subscription(
    State(state): State<AppState>,
    Path((so_id, stream_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let principal = require_principal(&state, &headers).await?;

    if body.trim().is_empty() {
        return Err(api_error(RequestError::bad_request("no data in the request")));
    }

    let so = load_so(&state, &so_id).await?;
    require_so_access(&state, &principal, &so, SoOperation::Subscribe).await?;

    // Source stream must exist at creation time (existence, not liveness):
    // either declared on the SO, or implicitly created by a prior ingest.
    if !so.declares_stream(&stream_id) {
        let indexed = state
            .index
            .update_ids(&so.id, &stream_id)
            .await
            .map_err(index_failure)?;
        if indexed.is_empty() {
            return Err(api_error(RequestError::not_found("the stream was not found")));
        }
    }

    let req: CreateSubscriptionRequest = serde_json::from_str(&body)
        .map_err(|_| api_error(RequestError::bad_request("invalid JSON body")))?;

    let target = match (req.callback, req.destination) {
        (Some(url), None) => SubscriptionTarget::Callback { url },
        (None, Some(dest_so_id)) => SubscriptionTarget::ServiceObject { so_id: dest_so_id },
        _ => {
            return Err(api_error(RequestError::bad_request(
                "subscription requires exactly one of callback or destination",
            )))
        }
    };

    let subscription = Subscription {
        id: Ulid::new().to_string(),
        so_id: so.id.clone(),
        stream_id: stream_id.clone(),
        owner_id: principal.id.clone(),
        target,
        created_at: epoch_ms_now(),
    };

    state
        .store
        .put_subscription(&subscription)
        .await
        .map_err(store_failure)?;

    tracing::info!(
        so_id = %so.id,
        stream_id = %stream_id,
        subscription_id = %subscription.id,
        "gateway.create_subscription"
    );

    let location = format!(
        "/{}/streams/{}/subscriptions/{}",
        so.id, stream_id, subscription.id
    );
    Ok(created_at_location(&location, Json(subscription)))
}

async fn list_subscriptions(
    State(state): State<AppState>,
    Path((so_id, stream_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = require_principal(&state, &headers).await?;
    let so = load_so(&state, &so_id).await?;
    require_so_access(&state, &principal, &so, SoOperation::Read).await?;

    let ids = state
        .index
        .subscription_ids_for_stream(&so.id, &stream_id)
        .await
        .map_err(index_failure)?;

    let mut subscriptions = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(subscription) = state
            .store
            .get_subscription(&id)
            .await
            .map_err(store_failure)?
        {
            subscriptions.push(subscription);
        }
    }

    if subscriptions.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    Ok(Json(serde_json::json!({ "subscriptions": subscriptions })).into_response())
}

async fn get_subscription(
    State(state): State<AppState>,
    Path(subs_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = require_principal(&state, &headers).await?;

    let subscription = state
        .store
        .get_subscription(&subs_id)
        .await
        .map_err(store_failure)?
        .ok_or_else(|| api_error(RequestError::not_found("the Subscription was not found")))?;

    let so = load_so(&state, &subscription.so_id).await?;
    require_so_access(&state, &principal, &so, SoOperation::Read).await?;

    Ok(Json(subscription).into_response())
}

async fn delete_subscription(
    State(state): State<AppState>,
    Path(subs_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = require_principal(&state, &headers).await?;

    let subscription = state
        .store
        .get_subscription(&subs_id)
        .await
        .map_err(store_failure)?
        .ok_or_else(|| api_error(RequestError::not_found("the Subscription was not found")))?;

    let so = load_so(&state, &subscription.so_id).await?;
    require_so_access(&state, &principal, &so, SoOperation::Delete).await?;

    state
        .store
        .delete_subscription(&subscription.id)
        .await
        .map_err(store_failure)?;

    tracing::info!(
        subscription_id = %subscription.id,
        so_id = %so.id,
        "gateway.delete_subscription"
    );

    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn list_actuations(
    State(state): State<AppState>,
    Path(so_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = require_principal(&state, &headers).await?;
    let so = load_so(&state, &so_id).await?;
    require_so_access(&state, &principal, &so, SoOperation::Read).await?;

    Ok(Json(serde_json::json!({ "actuations": so.actuations })).into_response())
}

async fn get_actuation_status(
    State(state): State<AppState>,
    Path((so_id, actuation_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = require_principal(&state, &headers).await?;
    let so = load_so(&state, &so_id).await?;
    require_so_access(&state, &principal, &so, SoOperation::Read).await?;

    let actuation = state
        .store
        .get_actuation(&actuation_id)
        .await
        .map_err(store_failure)?
        .filter(|actuation| actuation.so_id == so.id)
        .ok_or_else(|| api_error(RequestError::not_found("the Actuation was not found")))?;

    Ok(Json(actuation).into_response())
}

async fn require_principal(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Principal, ApiError> {
    state
        .authenticator
        .resolve_identity(headers)
        .await
        .map_err(auth_failure)
}

async fn load_so(state: &AppState, so_id: &str) -> Result<ServiceObject, ApiError> {
    state
        .store
        .get_so(so_id)
        .await
        .map_err(store_failure)?
        .ok_or_else(|| api_error(RequestError::not_found("the Service Object was not found")))
}

async fn require_so_access(
    state: &AppState,
    principal: &Principal,
    so: &ServiceObject,
    operation: SoOperation,
) -> Result<(), ApiError> {
    access::authorize_so(state.pdp.as_ref(), principal, so, operation)
        .await
        .map_err(access_failure)
}

async fn purge_stream_updates(
    state: &AppState,
    so_id: &str,
    stream_id: &str,
) -> Result<usize, ApiError> {
    let ids = state
        .index
        .update_ids(so_id, stream_id)
        .await
        .map_err(index_failure)?;

    for id in &ids {
        state.store.delete_data(id).await.map_err(store_failure)?;
    }

    Ok(ids.len())
}

async fn purge_so_updates(state: &AppState, so_id: &str) -> Result<usize, ApiError> {
    let ids = state
        .index
        .update_ids_for_so(so_id)
        .await
        .map_err(index_failure)?;

    for id in &ids {
        state.store.delete_data(id).await.map_err(store_failure)?;
    }

    Ok(ids.len())
}

async fn purge_subscriptions(state: &AppState, so_id: &str) -> Result<usize, ApiError> {
    let ids = state
        .index
        .subscription_ids_for_so(so_id)
        .await
        .map_err(index_failure)?;

    for id in &ids {
        state
            .store
            .delete_subscription(id)
            .await
            .map_err(store_failure)?;
    }

    Ok(ids.len())
}

fn created_at_location(location: &str, body: impl IntoResponse) -> Response {
    let mut response = (StatusCode::CREATED, body).into_response();
    if let Ok(value) = HeaderValue::from_str(location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(err: RequestError) -> ApiError {
    (
        status_for(err.kind),
        Json(ErrorBody {
            code: err.kind.code(),
            message: err.message,
        }),
    )
}

fn auth_failure(err: AuthError) -> ApiError {
    match err.code {
        "ERR_AUTH_UNAVAILABLE" => {
            tracing::warn!(error = %err, "gateway.identity_error");
            api_error(RequestError::internal("identity service unavailable"))
        }
        _ => api_error(RequestError::unauthenticated(err.message)),
    }
}

fn access_failure(err: AccessError) -> ApiError {
    match err {
        AccessError::Denied => api_error(RequestError::forbidden(
            "operation not allowed on the Service Object",
        )),
        AccessError::Pdp(err) => {
            tracing::warn!(error = %err, "gateway.pdp_error");
            api_error(RequestError::internal("policy engine unavailable"))
        }
    }
}

fn store_failure(err: StoreError) -> ApiError {
    tracing::warn!(error = %err, "gateway.store_error");
    api_error(RequestError::internal("document store unavailable"))
}

fn index_failure(err: IndexError) -> ApiError {
    tracing::warn!(error = %err, "gateway.index_error");
    api_error(RequestError::internal("search index unavailable"))
}

fn queue_failure(err: QueueError) -> ApiError {
    tracing::warn!(error = %err, "gateway.queue_error");
    api_error(RequestError::internal("queue transport failure"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_expected_statuses() {
        assert_eq!(status_for(ErrorKind::BadRequest), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::Unauthenticated), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(ErrorKind::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::Conflict), StatusCode::CONFLICT);
        assert_eq!(
            status_for(ErrorKind::Internal),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn http_date_is_rfc7231_shaped() {
        let date = http_date_now();
        assert!(date.ends_with(" GMT"));
        assert_eq!(date.matches(':').count(), 2);
    }

    #[test]
    fn subscription_request_rejects_unknown_fields() {
        let err = serde_json::from_str::<CreateSubscriptionRequest>(
            r#"{"callback": "http://sink.example", "delay": 5}"#,
        );
        assert!(err.is_err());
    }
}
