use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use sog_auth::access::AuthorizationStrategy;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub auth_mode: AuthMode,
    pub idm_url: Option<String>,
    pub idm_timeout_ms: u64,
    pub pdp_url: String,
    pub pdp_timeout_ms: u64,
    pub authz_strategy: AuthorizationStrategy,
    pub backend_mode: BackendMode,
    pub store_url: Option<String>,
    pub store_timeout_ms: u64,
    pub search_url: Option<String>,
    pub search_timeout_ms: u64,
    pub queue_mode: QueueMode,
    pub nats_url: Option<String>,
    pub nats_connect_timeout_ms: u64,
    pub nats_publish_timeout_ms: u64,
    pub updates_subject: String,
    pub actuations_subject: String,
    pub provenance_subject: String,
    pub op_id_ttl_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Local,
    Idm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    Memory,
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    Memory,
    Nats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl GatewayConfig {
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("SOG_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                let file_kv = parse_env_file(config_path)?;
                merged.extend(file_kv);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let bind_addr = parse_socket_addr(
            kv.get("SOG_BIND_ADDR"),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            "SOG_BIND_ADDR",
        )?;

        let auth_mode = parse_auth_mode(kv.get("SOG_AUTH_MODE"))?;

        let dev_allow_nonlocal_bind =
            parse_bool(kv.get("SOG_DEV_ALLOW_NONLOCAL_BIND")).unwrap_or(false);

        if !bind_addr.ip().is_loopback() && auth_mode != AuthMode::Idm {
            if dev_allow_nonlocal_bind && is_unspecified_ip(bind_addr.ip()) {
                // Explicit dev-only escape hatch for docker compose / local containers.
            } else {
                return Err(StartupError {
                    code: "ERR_NONLOCAL_BIND_REQUIRES_AUTH",
                    message: "non-local bind requires idm auth mode; refuse startup".to_string(),
                });
            }
        }

        let idm_url = optional_nonempty(kv, "SOG_IDM_URL");
        if auth_mode == AuthMode::Idm && idm_url.is_none() {
            return Err(StartupError {
                code: "ERR_MISSING_CONFIG",
                message: "idm auth mode requires SOG_IDM_URL".to_string(),
            });
        }
        let idm_timeout_ms = parse_u64(kv.get("SOG_IDM_TIMEOUT_MS"), 2000, "SOG_IDM_TIMEOUT_MS")?;

        let pdp_url = require_nonempty(kv, "SOG_PDP_URL")?;
        let pdp_timeout_ms = parse_u64(kv.get("SOG_PDP_TIMEOUT_MS"), 200, "SOG_PDP_TIMEOUT_MS")?;

        let authz_strategy = parse_authz_strategy(kv.get("SOG_AUTHZ_STRATEGY"))?;

        let backend_mode = parse_backend_mode(kv.get("SOG_BACKEND_MODE"))?;
        let store_url = optional_nonempty(kv, "SOG_STORE_URL");
        let search_url = optional_nonempty(kv, "SOG_SEARCH_URL");
        if backend_mode == BackendMode::Http {
            if store_url.is_none() {
                return Err(StartupError {
                    code: "ERR_MISSING_CONFIG",
                    message: "http backend mode requires SOG_STORE_URL".to_string(),
                });
            }
            if search_url.is_none() {
                return Err(StartupError {
                    code: "ERR_MISSING_CONFIG",
                    message: "http backend mode requires SOG_SEARCH_URL".to_string(),
                });
            }
        }
        let store_timeout_ms =
            parse_u64(kv.get("SOG_STORE_TIMEOUT_MS"), 2000, "SOG_STORE_TIMEOUT_MS")?;
        let search_timeout_ms =
            parse_u64(kv.get("SOG_SEARCH_TIMEOUT_MS"), 2000, "SOG_SEARCH_TIMEOUT_MS")?;

        let queue_mode = parse_queue_mode(kv.get("SOG_QUEUE_MODE"))?;
        let nats_url = optional_nonempty(kv, "SOG_NATS_URL");
        if queue_mode == QueueMode::Nats && nats_url.is_none() {
            return Err(StartupError {
                code: "ERR_MISSING_CONFIG",
                message: "nats queue mode requires SOG_NATS_URL".to_string(),
            });
        }
        let nats_connect_timeout_ms = parse_u64(
            kv.get("SOG_NATS_CONNECT_TIMEOUT_MS"),
            5000,
            "SOG_NATS_CONNECT_TIMEOUT_MS",
        )?;
        let nats_publish_timeout_ms = parse_u64(
            kv.get("SOG_NATS_PUBLISH_TIMEOUT_MS"),
            2000,
            "SOG_NATS_PUBLISH_TIMEOUT_MS",
        )?;

        let updates_subject = nonempty_or(kv, "SOG_UPDATES_SUBJECT", "sog.updates");
        let actuations_subject = nonempty_or(kv, "SOG_ACTUATIONS_SUBJECT", "sog.actuations");
        let provenance_subject = nonempty_or(kv, "SOG_PROVENANCE_SUBJECT", "sog.provenance");

        let op_id_ttl_secs = parse_u64(kv.get("SOG_OPID_TTL_SECS"), 3600, "SOG_OPID_TTL_SECS")?;
        if op_id_ttl_secs == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "SOG_OPID_TTL_SECS must be >= 1".to_string(),
            });
        }

        Ok(Self {
            bind_addr,
            auth_mode,
            idm_url,
            idm_timeout_ms,
            pdp_url,
            pdp_timeout_ms,
            authz_strategy,
            backend_mode,
            store_url,
            store_timeout_ms,
            search_url,
            search_timeout_ms,
            queue_mode,
            nats_url,
            nats_connect_timeout_ms,
            nats_publish_timeout_ms,
            updates_subject,
            actuations_subject,
            provenance_subject,
            op_id_ttl_secs,
        })
    }
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;

    let mut kv = HashMap::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| StartupError {
            code: "ERR_CONFIG_FILE_PARSE",
            message: format!("invalid config line {} (expected KEY=VALUE)", idx + 1),
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(StartupError {
                code: "ERR_CONFIG_FILE_PARSE",
                message: format!("invalid config line {} (empty key)", idx + 1),
            });
        }

        let value = strip_quotes(value.trim());
        kv.insert(key.to_string(), value);
    }

    Ok(kv)
}

fn strip_quotes(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return s[1..bytes.len() - 1].to_string();
        }
    }
    s.to_string()
}

fn require_nonempty(
    kv: &HashMap<String, String>,
    key: &'static str,
) -> Result<String, StartupError> {
    optional_nonempty(kv, key).ok_or_else(|| StartupError {
        code: "ERR_MISSING_CONFIG",
        message: format!("missing required config key {}", key),
    })
}

fn optional_nonempty(kv: &HashMap<String, String>, key: &str) -> Option<String> {
    kv.get(key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn nonempty_or(kv: &HashMap<String, String>, key: &str, default: &str) -> String {
    optional_nonempty(kv, key).unwrap_or_else(|| default.to_string())
}

fn parse_socket_addr(
    value: Option<&String>,
    default: SocketAddr,
    key: &'static str,
) -> Result<SocketAddr, StartupError> {
    match value {
        None => Ok(default),
        Some(v) => v.parse::<SocketAddr>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a valid host:port socket address", key),
        }),
    }
}

fn parse_u64(value: Option<&String>, default: u64, key: &'static str) -> Result<u64, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.parse::<u64>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_bool(value: Option<&String>) -> Option<bool> {
    let value = value.map(|v| v.trim()).filter(|v| !v.is_empty())?;

    match value {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

fn parse_auth_mode(value: Option<&String>) -> Result<AuthMode, StartupError> {
    let mode = value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("local");

    match mode {
        "local" => Ok(AuthMode::Local),
        "idm" => Ok(AuthMode::Idm),
        _ => Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "SOG_AUTH_MODE must be local or idm".to_string(),
        }),
    }
}

fn parse_authz_strategy(value: Option<&String>) -> Result<AuthorizationStrategy, StartupError> {
    let strategy = value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("per-item");

    match strategy {
        "per-item" => Ok(AuthorizationStrategy::PerItem),
        "coarse-only" => Ok(AuthorizationStrategy::CoarseOnly),
        _ => Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "SOG_AUTHZ_STRATEGY must be per-item or coarse-only".to_string(),
        }),
    }
}

fn parse_backend_mode(value: Option<&String>) -> Result<BackendMode, StartupError> {
    let mode = value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("memory");

    match mode {
        "memory" => Ok(BackendMode::Memory),
        "http" => Ok(BackendMode::Http),
        _ => Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "SOG_BACKEND_MODE must be memory or http".to_string(),
        }),
    }
}

fn parse_queue_mode(value: Option<&String>) -> Result<QueueMode, StartupError> {
    let mode = value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("memory");

    match mode {
        "memory" => Ok(QueueMode::Memory),
        "nats" => Ok(QueueMode::Nats),
        _ => Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "SOG_QUEUE_MODE must be memory or nats".to_string(),
        }),
    }
}

fn is_unspecified_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_unspecified(),
        IpAddr::V6(v6) => v6.is_unspecified(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_ok_env() -> HashMap<String, String> {
        HashMap::from([(
            "SOG_PDP_URL".to_string(),
            "http://localhost:8181".to_string(),
        )])
    }

    #[test]
    fn minimal_env_yields_dev_defaults() {
        let config = GatewayConfig::from_kv(&minimal_ok_env()).expect("minimal config loads");
        assert_eq!(config.auth_mode, AuthMode::Local);
        assert_eq!(config.backend_mode, BackendMode::Memory);
        assert_eq!(config.queue_mode, QueueMode::Memory);
        assert_eq!(config.authz_strategy, AuthorizationStrategy::PerItem);
        assert_eq!(config.updates_subject, "sog.updates");
        assert!(config.bind_addr.ip().is_loopback());
    }

    #[test]
    fn non_local_bind_without_idm_auth_fails() {
        let mut env = minimal_ok_env();
        env.insert("SOG_BIND_ADDR".to_string(), "0.0.0.0:8080".to_string());
        let err = GatewayConfig::from_kv(&env).unwrap_err();
        assert_eq!(err.code, "ERR_NONLOCAL_BIND_REQUIRES_AUTH");
    }

    #[test]
    fn idm_mode_requires_idm_url() {
        let mut env = minimal_ok_env();
        env.insert("SOG_AUTH_MODE".to_string(), "idm".to_string());
        let err = GatewayConfig::from_kv(&env).unwrap_err();
        assert_eq!(err.code, "ERR_MISSING_CONFIG");
    }

    #[test]
    fn http_backend_requires_collaborator_urls() {
        let mut env = minimal_ok_env();
        env.insert("SOG_BACKEND_MODE".to_string(), "http".to_string());
        env.insert(
            "SOG_STORE_URL".to_string(),
            "http://localhost:8091".to_string(),
        );
        let err = GatewayConfig::from_kv(&env).unwrap_err();
        assert_eq!(err.code, "ERR_MISSING_CONFIG");
        assert!(err.message.contains("SOG_SEARCH_URL"));
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let mut env = minimal_ok_env();
        env.insert("SOG_AUTHZ_STRATEGY".to_string(), "both".to_string());
        let err = GatewayConfig::from_kv(&env).unwrap_err();
        assert_eq!(err.code, "ERR_INVALID_CONFIG");
    }
}
