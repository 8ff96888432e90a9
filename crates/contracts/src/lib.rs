use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub mod canonical;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SecurityMeta {
    Public,
    OwnerOnly,
    PolicyRef { policy: String },
}

impl SecurityMeta {
    pub fn as_label(&self) -> &'static str {
        match self {
            SecurityMeta::Public => "public",
            SecurityMeta::OwnerOnly => "owner_only",
            SecurityMeta::PolicyRef { .. } => "policy_ref",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuationSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceObject {
    pub id: String,
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub streams: BTreeMap<String, StreamSpec>,
    #[serde(default)]
    pub actuations: Vec<ActuationSpec>,
    pub security: SecurityMeta,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ServiceObject {
    pub fn declares_stream(&self, stream_id: &str) -> bool {
        self.streams.contains_key(stream_id)
    }

    pub fn declares_actuation(&self, name: &str) -> bool {
        self.actuations.iter().any(|a| a.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataItem {
    pub id: String,
    pub so_id: String,
    pub stream_id: String,
    pub payload: serde_json::Value,
    pub timestamp: i64,
    pub security: SecurityMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTarget {
    Callback { url: String },
    ServiceObject { so_id: String },
}

impl SubscriptionTarget {
    pub fn so_id(&self) -> Option<&str> {
        match self {
            SubscriptionTarget::Callback { .. } => None,
            SubscriptionTarget::ServiceObject { so_id } => Some(so_id.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub so_id: String,
    pub stream_id: String,
    pub owner_id: String,
    pub target: SubscriptionTarget,
    pub created_at: i64,
}

pub const ACTUATION_STATUS_CREATED: &str = "created";
pub const ACTUATION_STATUS_DISPATCHED: &str = "dispatched";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actuation {
    pub id: String,
    pub so_id: String,
    pub name: String,
    pub action: serde_json::Value,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<serde_json::Value>,
    pub issued_by: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpId {
    pub id: String,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchCriteria {
    #[serde(default)]
    pub time_from: Option<i64>,
    #[serde(default)]
    pub time_to: Option<i64>,
    #[serde(default)]
    pub last_n: Option<usize>,
}

impl SearchCriteria {
    pub fn matches_timestamp(&self, timestamp: i64) -> bool {
        if let Some(from) = self.time_from {
            if timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.time_to {
            if timestamp > to {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Unauthenticated,
    Forbidden,
    NotFound,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "ERR_BAD_REQUEST",
            ErrorKind::Unauthenticated => "ERR_UNAUTHENTICATED",
            ErrorKind::Forbidden => "ERR_FORBIDDEN",
            ErrorKind::NotFound => "ERR_NOT_FOUND",
            ErrorKind::Conflict => "ERR_CONFLICT",
            ErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    pub fn retryable(self) -> bool {
        matches!(self, ErrorKind::Internal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RequestError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::BadRequest,
            message: message.into(),
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Unauthenticated,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Forbidden,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Conflict,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Internal,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for RequestError {}

pub fn epoch_ms_now() -> i64 {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    duration.as_millis().min(i64::MAX as u128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_meta_serializes_with_kind_tag() {
        let public = serde_json::to_value(&SecurityMeta::Public).expect("serialize public");
        assert_eq!(public, serde_json::json!({"kind": "public"}));

        let policy = serde_json::to_value(&SecurityMeta::PolicyRef {
            policy: "tok-1".to_string(),
        })
        .expect("serialize policy ref");
        assert_eq!(
            policy,
            serde_json::json!({"kind": "policy_ref", "policy": "tok-1"})
        );

        let parsed: SecurityMeta =
            serde_json::from_value(serde_json::json!({"kind": "owner_only"}))
                .expect("parse owner_only");
        assert_eq!(parsed, SecurityMeta::OwnerOnly);
    }

    #[test]
    fn service_object_declarations() {
        let mut streams = BTreeMap::new();
        streams.insert(
            "temp".to_string(),
            StreamSpec {
                description: None,
                unit: Some("celsius".to_string()),
            },
        );

        let so = ServiceObject {
            id: "so-1".to_string(),
            owner_id: "alice".to_string(),
            name: Some("thermo1".to_string()),
            description: None,
            streams,
            actuations: vec![ActuationSpec {
                name: "reset".to_string(),
                description: None,
            }],
            security: SecurityMeta::OwnerOnly,
            created_at: 1,
            updated_at: 1,
        };

        assert!(so.declares_stream("temp"));
        assert!(!so.declares_stream("humidity"));
        assert!(so.declares_actuation("reset"));
        assert!(!so.declares_actuation("reboot"));
    }

    #[test]
    fn search_criteria_bounds_are_inclusive() {
        let criteria = SearchCriteria {
            time_from: Some(10),
            time_to: Some(20),
            last_n: None,
        };

        assert!(!criteria.matches_timestamp(9));
        assert!(criteria.matches_timestamp(10));
        assert!(criteria.matches_timestamp(20));
        assert!(!criteria.matches_timestamp(21));
    }

    #[test]
    fn search_criteria_rejects_unknown_fields() {
        let err = serde_json::from_value::<SearchCriteria>(
            serde_json::json!({"time_from": 1, "value_gt": 2}),
        );
        assert!(err.is_err());
    }

    #[test]
    fn error_kinds_map_to_stable_codes() {
        assert_eq!(ErrorKind::NotFound.code(), "ERR_NOT_FOUND");
        assert_eq!(ErrorKind::Forbidden.code(), "ERR_FORBIDDEN");
        assert!(ErrorKind::Internal.retryable());
        assert!(!ErrorKind::BadRequest.retryable());

        let err = RequestError::not_found("the Service Object was not found");
        assert_eq!(
            err.to_string(),
            "ERR_NOT_FOUND: the Service Object was not found"
        );
    }
}
