use std::time::Duration;

use http::header;
use http::HeaderMap;
use serde::Deserialize;

pub mod access;
pub mod pdp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct AuthError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AuthError {}

// Credential resolution. Local mode trusts the bearer token as the principal
// id and only exists for loopback development; idm mode introspects the token
// against the identity service.
#[derive(Clone)]
pub enum Authenticator {
    Local,
    Idm(IdmClient),
}

impl Authenticator {
    pub async fn resolve_identity(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let token = bearer_token(headers)?;

        match self {
            Authenticator::Local => Ok(Principal { id: token }),
            Authenticator::Idm(client) => client.introspect(&token).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdmConfig {
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct IdmClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct IntrospectResponse {
    active: bool,
    #[serde(default)]
    user_id: Option<String>,
}

impl IdmClient {
    pub fn new(config: IdmConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|_| AuthError {
                code: "ERR_AUTH_UNAVAILABLE",
                message: "failed to initialize identity client".to_string(),
            })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub async fn introspect(&self, token: &str) -> Result<Principal, AuthError> {
        let resp = self
            .http
            .post(format!("{}/v1/token/introspect", self.base_url))
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .map_err(|_| AuthError {
                code: "ERR_AUTH_UNAVAILABLE",
                message: "identity service unreachable".to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(AuthError {
                code: "ERR_AUTH_UNAVAILABLE",
                message: format!("identity service returned status {}", resp.status()),
            });
        }

        let decoded = resp
            .json::<IntrospectResponse>()
            .await
            .map_err(|_| AuthError {
                code: "ERR_AUTH_UNAVAILABLE",
                message: "identity service returned an invalid response".to_string(),
            })?;

        let user_id = decoded
            .user_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        match (decoded.active, user_id) {
            (true, Some(id)) => Ok(Principal { id }),
            _ => Err(AuthError {
                code: "ERR_AUTH_INVALID",
                message: "credential was rejected by the identity service".to_string(),
            }),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let authz = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError {
            code: "ERR_AUTH_REQUIRED",
            message: "missing Authorization header".to_string(),
        })?;

    let token = authz
        .strip_prefix("Bearer ")
        .or_else(|| authz.strip_prefix("bearer "))
        .ok_or_else(|| AuthError {
            code: "ERR_AUTH_INVALID",
            message: "Authorization must be a Bearer token".to_string(),
        })?;

    if token.trim().is_empty() {
        return Err(AuthError {
            code: "ERR_AUTH_INVALID",
            message: "Bearer token is empty".to_string(),
        });
    }

    Ok(token.trim().to_string())
}
