use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use sog_auth::access::{self, AuthorizationStrategy, DecisionCache, SoOperation};
use sog_contracts::{epoch_ms_now, DataItem, RequestError, SearchCriteria, ServiceObject};
use sog_queue::Delivery;

use super::{
    api_error, index_failure, load_so, require_principal, require_so_access, store_failure,
    ApiError, AppState,
};

// List every update visible to the caller, ascending by time. Under the
// per-item strategy the coarse SO check is skipped: visibility is decided
// record by record against one request-scoped cache, and denied items are
// dropped silently rather than failing the listing.
pub(super) async fn list_stream_data(
    State(state): State<AppState>,
    Path((so_id, stream_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = require_principal(&state, &headers).await?;
    let so = load_so(&state, &so_id).await?;

    if state.config.authz_strategy == AuthorizationStrategy::CoarseOnly {
        require_so_access(&state, &principal, &so, SoOperation::Read).await?;
    }

    let ids = state
        .index
        .update_ids(&so.id, &stream_id)
        .await
        .map_err(index_failure)?;

    let mut cache = DecisionCache::new();
    let mut items = Vec::new();
    let mut disclosures = Vec::new();

    for id in ids {
        let Some(item) = state.store.get_data(&id).await.map_err(store_failure)? else {
            continue;
        };

        match state.config.authz_strategy {
            AuthorizationStrategy::CoarseOnly => {
                if principal.id != so.owner_id {
                    disclosures.push((item.clone(), principal.id.clone()));
                }
                items.push(item);
            }
            AuthorizationStrategy::PerItem => {
                match access::authorize_item(
                    state.pdp.as_ref(),
                    &principal,
                    &so.owner_id,
                    &item.id,
                    &item.security,
                    &mut cache,
                )
                .await
                {
                    Ok(decision) if decision.allowed => {
                        if decision.acting_user_id != so.owner_id {
                            disclosures.push((item.clone(), decision.acting_user_id));
                        }
                        items.push(item);
                    }
                    Ok(_) => crate::metrics::inc_item_filtered(),
                    Err(err) => {
                        crate::metrics::inc_item_filtered();
                        tracing::warn!(
                            item_id = %item.id,
                            error = %err,
                            "gateway.item_authorization_failed"
                        );
                    }
                }
            }
        }
    }

    emit_disclosures(&state, &so, &stream_id, &disclosures).await;

    if items.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    Ok(Json(serde_json::json!({ "updates": items })).into_response())
}

// Latest visible item. A denial answers no-content, not forbidden: the
// existence of a newer update the caller cannot see is not disclosed.
pub(super) async fn last_update(
    State(state): State<AppState>,
    Path((so_id, stream_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = require_principal(&state, &headers).await?;
    let so = load_so(&state, &so_id).await?;

    if state.config.authz_strategy == AuthorizationStrategy::CoarseOnly {
        require_so_access(&state, &principal, &so, SoOperation::Read).await?;
    }

    let Some(timestamp) = state
        .index
        .last_update_timestamp(&so.id, &stream_id)
        .await
        .map_err(index_failure)?
    else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    let Some(item) = state
        .store
        .get_data_by_timestamp(&so.id, &stream_id, timestamp)
        .await
        .map_err(store_failure)?
    else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    let acting_user = match state.config.authz_strategy {
        AuthorizationStrategy::CoarseOnly => principal.id.clone(),
        AuthorizationStrategy::PerItem => {
            let mut cache = DecisionCache::new();
            match access::authorize_item(
                state.pdp.as_ref(),
                &principal,
                &so.owner_id,
                &item.id,
                &item.security,
                &mut cache,
            )
            .await
            {
                Ok(decision) if decision.allowed => decision.acting_user_id,
                Ok(_) => return Ok(StatusCode::NO_CONTENT.into_response()),
                Err(err) => {
                    tracing::warn!(
                        item_id = %item.id,
                        error = %err,
                        "gateway.item_authorization_failed"
                    );
                    return Ok(StatusCode::NO_CONTENT.into_response());
                }
            }
        }
    };

    if acting_user != so.owner_id {
        emit_disclosures(&state, &so, &stream_id, &[(item.clone(), acting_user)]).await;
    }

    Ok(Json(item).into_response())
}

// Filtered query. Authorization stays coarse-only on this entry point: the
// criteria are evaluated by the search collaborator and results pass through
// the store without a per-item pass.
pub(super) async fn search_stream_data(
    State(state): State<AppState>,
    Path((so_id, stream_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let principal = require_principal(&state, &headers).await?;
    let so = load_so(&state, &so_id).await?;
    require_so_access(&state, &principal, &so, SoOperation::Read).await?;

    let criteria: SearchCriteria = if body.trim().is_empty() {
        SearchCriteria::default()
    } else {
        serde_json::from_str(&body)
            .map_err(|_| api_error(RequestError::bad_request("invalid search criteria")))?
    };

    let ids = state
        .index
        .search_update_ids(&so.id, &stream_id, &criteria)
        .await
        .map_err(index_failure)?;

    let mut items = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(item) = state.store.get_data(&id).await.map_err(store_failure)? {
            items.push(item);
        }
    }

    if items.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    Ok(Json(serde_json::json!({ "updates": items })).into_response())
}

// Post-disclosure hook. One policy applies on every read path: provenance
// emission never vetoes a response, failures are logged and swallowed.
async fn emit_disclosures(
    state: &AppState,
    so: &ServiceObject,
    stream_id: &str,
    disclosures: &[(DataItem, String)],
) {
    for (item, destination) in disclosures {
        let event = serde_json::json!({
            "soid": so.id,
            "streamid": stream_id,
            "id": item.id,
            "source_owner": so.owner_id,
            "destination": destination,
            "su": item.payload,
            "at": epoch_ms_now(),
        });

        match state
            .queue
            .publish(&state.config.provenance_subject, &event)
            .await
        {
            Ok(Delivery::Accepted) => {}
            Ok(Delivery::Rejected) => {
                crate::metrics::inc_enqueue_failure(&state.config.provenance_subject);
                tracing::warn!(item_id = %item.id, "gateway.provenance_rejected");
            }
            Err(err) => {
                crate::metrics::inc_enqueue_failure(&state.config.provenance_subject);
                tracing::warn!(
                    item_id = %item.id,
                    error = %err,
                    "gateway.provenance_emit_failed"
                );
            }
        }
    }
}
