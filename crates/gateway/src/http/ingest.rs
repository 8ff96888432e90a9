use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use sog_auth::access::SoOperation;
use sog_contracts::{
    epoch_ms_now, Actuation, DataItem, OpId, RequestError, SecurityMeta,
    ACTUATION_STATUS_CREATED, ACTUATION_STATUS_DISPATCHED,
};
use sog_queue::Delivery;

use super::{
    api_error, created_at_location, load_so, queue_failure, require_principal, require_so_access,
    store_failure, ApiError, AppState,
};

const ITEM_SECURITY_HEADER: &str = "x-sog-item-security";

// Ingest one stream update. The enqueue is attempted first but the store is
// authoritative: a clean queue rejection degrades the response body while the
// write still succeeds.
pub(super) async fn put_stream_data(
    State(state): State<AppState>,
    Path((so_id, stream_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let principal = require_principal(&state, &headers).await?;

    if body.trim().is_empty() {
        return Err(api_error(RequestError::bad_request("no data in the request")));
    }
    let payload: serde_json::Value = serde_json::from_str(&body)
        .map_err(|_| api_error(RequestError::bad_request("invalid JSON body")))?;
    let security = parse_item_security(&headers)?;

    let so = load_so(&state, &so_id).await?;
    require_so_access(&state, &principal, &so, SoOperation::Write).await?;

    let now = epoch_ms_now();
    let item = DataItem {
        id: Ulid::new().to_string(),
        so_id: so.id.clone(),
        stream_id: stream_id.clone(),
        payload: payload.clone(),
        timestamp: now,
        security,
    };
    let op_id = Ulid::new().to_string();

    let envelope = serde_json::json!({
        "opid": op_id,
        "soid": so.id,
        "streamid": stream_id,
        "su": payload,
    });

    let delivery = state
        .queue
        .publish(&state.config.updates_subject, &envelope)
        .await
        .map_err(queue_failure)?;

    let degraded = delivery == Delivery::Rejected;
    if degraded {
        crate::metrics::inc_degraded_accept();
        crate::metrics::inc_enqueue_failure(&state.config.updates_subject);
        tracing::warn!(
            so_id = %so.id,
            stream_id = %stream_id,
            op_id = %op_id,
            "gateway.ingest_degraded"
        );
    }

    state.store.put_data(&item).await.map_err(store_failure)?;
    state
        .store
        .put_op_id(&OpId {
            id: op_id.clone(),
            expires_at: now + op_id_ttl_ms(&state),
        })
        .await
        .map_err(store_failure)?;

    tracing::info!(
        so_id = %so.id,
        stream_id = %stream_id,
        item_id = %item.id,
        op_id = %op_id,
        security = item.security.as_label(),
        degraded,
        "gateway.ingest_data"
    );

    let body = if degraded {
        serde_json::json!({ "message": "stored but not queued" })
    } else {
        payload
    };

    Ok((StatusCode::ACCEPTED, Json(body)).into_response())
}

// Launch an actuation. Unlike stream ingestion there is no degraded mode:
// the record only makes sense once a downstream actuator can observe it, so
// a rejected enqueue fails the whole request.
pub(super) async fn launch_actuation(
    State(state): State<AppState>,
    Path((so_id, actuation_name)): Path<(String, String)>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let principal = require_principal(&state, &headers).await?;

    let so = load_so(&state, &so_id).await?;
    require_so_access(&state, &principal, &so, SoOperation::Actuate).await?;

    if !so.declares_actuation(&actuation_name) {
        return Err(api_error(RequestError::not_found(
            "the actuation is not declared by the Service Object",
        )));
    }

    // Device payloads arrive as JSON when they parse, opaque text otherwise.
    let action = if body.trim().is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body))
    };

    let now = epoch_ms_now();
    let mut actuation = Actuation {
        id: Ulid::new().to_string(),
        so_id: so.id.clone(),
        name: actuation_name.clone(),
        action,
        status: ACTUATION_STATUS_CREATED.to_string(),
        status_detail: None,
        issued_by: principal.id.clone(),
        created_at: now,
        updated_at: now,
    };
    let op_id = Ulid::new().to_string();

    let envelope = serde_json::json!({
        "soid": so.id,
        "id": actuation.id,
        "name": actuation.name,
        "action": actuation.action,
    });

    match state
        .queue
        .publish(&state.config.actuations_subject, &envelope)
        .await
    {
        Ok(Delivery::Accepted) => {}
        Ok(Delivery::Rejected) => {
            crate::metrics::inc_enqueue_failure(&state.config.actuations_subject);
            tracing::warn!(
                so_id = %so.id,
                actuation = %actuation.name,
                "gateway.actuation_rejected"
            );
            return Err(api_error(RequestError::internal(
                "actuation dispatch was not accepted by the queue",
            )));
        }
        Err(err) => return Err(queue_failure(err)),
    }

    actuation.status = ACTUATION_STATUS_DISPATCHED.to_string();
    actuation.updated_at = epoch_ms_now();

    state
        .store
        .put_actuation(&actuation)
        .await
        .map_err(store_failure)?;
    state
        .store
        .put_op_id(&OpId {
            id: op_id.clone(),
            expires_at: now + op_id_ttl_ms(&state),
        })
        .await
        .map_err(store_failure)?;

    tracing::info!(
        so_id = %so.id,
        actuation = %actuation.name,
        actuation_id = %actuation.id,
        op_id = %op_id,
        "gateway.launch_actuation"
    );

    let location = format!("/{}/actuations/{}", so.id, actuation.id);
    Ok(created_at_location(
        &location,
        Json(serde_json::json!({
            "message": "actuation submitted",
            "id": actuation.id,
        })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateActuationRequest {
    status: String,
    #[serde(default)]
    detail: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ActuationStatusResponse {
    id: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
    updated_at: i64,
}

// Inbound leg of the actuation lifecycle: the device (or any authorized
// caller) overwrites the free-form status. Last write wins, no transition
// graph is enforced, and the queue is not involved.
pub(super) async fn update_actuation_status(
    State(state): State<AppState>,
    Path((so_id, actuation_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let principal = require_principal(&state, &headers).await?;

    if body.trim().is_empty() {
        return Err(api_error(RequestError::bad_request("no data in the request")));
    }
    let req: UpdateActuationRequest = serde_json::from_str(&body)
        .map_err(|_| api_error(RequestError::bad_request("invalid JSON body")))?;

    let so = load_so(&state, &so_id).await?;
    require_so_access(&state, &principal, &so, SoOperation::Actuate).await?;

    let mut actuation = state
        .store
        .get_actuation(&actuation_id)
        .await
        .map_err(store_failure)?
        .filter(|actuation| actuation.so_id == so.id)
        .ok_or_else(|| api_error(RequestError::not_found("the Actuation was not found")))?;

    actuation.status = req.status;
    actuation.status_detail = req.detail;
    actuation.updated_at = epoch_ms_now();

    state
        .store
        .put_actuation(&actuation)
        .await
        .map_err(store_failure)?;

    tracing::info!(
        so_id = %so.id,
        actuation_id = %actuation.id,
        status = %actuation.status,
        "gateway.update_actuation_status"
    );

    Ok((
        StatusCode::CREATED,
        Json(ActuationStatusResponse {
            id: actuation.id,
            status: actuation.status,
            detail: actuation.status_detail,
            updated_at: actuation.updated_at,
        }),
    )
        .into_response())
}

fn op_id_ttl_ms(state: &AppState) -> i64 {
    i64::try_from(state.config.op_id_ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}

// Security metadata rides an optional header next to the opaque payload.
// An absent header means no restriction.
fn parse_item_security(headers: &HeaderMap) -> Result<SecurityMeta, ApiError> {
    let Some(raw) = headers.get(ITEM_SECURITY_HEADER) else {
        return Ok(SecurityMeta::Public);
    };

    let raw = raw
        .to_str()
        .map_err(|_| invalid_item_security())?
        .trim();

    match raw {
        "" | "public" => Ok(SecurityMeta::Public),
        "owner_only" => Ok(SecurityMeta::OwnerOnly),
        other => {
            let token = other
                .strip_prefix("policy:")
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .ok_or_else(invalid_item_security)?;
            Ok(SecurityMeta::PolicyRef {
                policy: token.to_string(),
            })
        }
    }
}

fn invalid_item_security() -> ApiError {
    api_error(RequestError::bad_request(
        "x-sog-item-security must be public, owner_only, or policy:<token>",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_security_header_means_no_restriction() {
        let headers = HeaderMap::new();
        assert_eq!(
            parse_item_security(&headers).unwrap(),
            SecurityMeta::Public
        );
    }

    #[test]
    fn security_header_parses_all_variants() {
        let mut headers = HeaderMap::new();
        headers.insert(ITEM_SECURITY_HEADER, "owner_only".parse().unwrap());
        assert_eq!(
            parse_item_security(&headers).unwrap(),
            SecurityMeta::OwnerOnly
        );

        headers.insert(ITEM_SECURITY_HEADER, "policy: tok-9 ".parse().unwrap());
        assert_eq!(
            parse_item_security(&headers).unwrap(),
            SecurityMeta::PolicyRef {
                policy: "tok-9".to_string()
            }
        );
    }

    #[test]
    fn malformed_security_header_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(ITEM_SECURITY_HEADER, "secret".parse().unwrap());
        let (status, _) = parse_item_security(&headers).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        headers.insert(ITEM_SECURITY_HEADER, "policy:".parse().unwrap());
        let (status, _) = parse_item_security(&headers).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
