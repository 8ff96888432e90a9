use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct DecisionInput<'a> {
    pub principal_id: &'a str,
    pub target: &'a str,
    pub operation: &'a str,
    pub policy: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PdpDecision {
    pub allow: bool,
    #[serde(default)]
    pub acting_user_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug)]
pub enum PdpError {
    Timeout,
    Http(reqwest::Error),
    BadStatus(reqwest::StatusCode),
    InvalidResponse,
}

impl std::fmt::Display for PdpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PdpError::Timeout => write!(f, "PDP request timed out"),
            PdpError::Http(err) => write!(f, "PDP HTTP error: {}", err),
            PdpError::BadStatus(status) => write!(f, "PDP returned status {}", status),
            PdpError::InvalidResponse => write!(f, "PDP returned invalid JSON response"),
        }
    }
}

impl std::error::Error for PdpError {}

impl From<reqwest::Error> for PdpError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            PdpError::Timeout
        } else {
            PdpError::Http(value)
        }
    }
}

#[async_trait]
pub trait PolicyDecisionPoint: Send + Sync {
    async fn decide(&self, input: &DecisionInput<'_>) -> Result<PdpDecision, PdpError>;
}

#[derive(Debug, Clone)]
pub struct HttpPdpConfig {
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Deserialize)]
struct PdpDataResponse<T> {
    result: T,
}

// HTTP policy-decision client. Decisions are never cached here: per-item
// memoization lives in the request-scoped DecisionCache, and nothing may
// survive the request that produced it.
#[derive(Clone)]
pub struct HttpPdp {
    base_url: String,
    http: reqwest::Client,
}

impl HttpPdp {
    pub fn new(config: HttpPdpConfig) -> Result<Self, PdpError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(PdpError::Http)?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn decision_url(&self) -> String {
        format!("{}/v1/data/sog/authz/decision", self.base_url)
    }
}

#[async_trait]
impl PolicyDecisionPoint for HttpPdp {
    async fn decide(&self, input: &DecisionInput<'_>) -> Result<PdpDecision, PdpError> {
        let resp = self
            .http
            .post(self.decision_url())
            .json(&serde_json::json!({
                "input": {
                    "principal_id": input.principal_id,
                    "target": input.target,
                    "operation": input.operation,
                    "policy": input.policy,
                }
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(PdpError::BadStatus(resp.status()));
        }

        let decoded = resp
            .json::<PdpDataResponse<PdpDecision>>()
            .await
            .map_err(|_| PdpError::InvalidResponse)?;

        Ok(decoded.result)
    }
}
