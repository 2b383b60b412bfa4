//! Runtime configuration, loaded from environment variables (spec §4.10, §6).

use crate::{ConfigError, OrchestratorError, OrchestratorResult};
use std::time::Duration;

/// Master configuration struct for the orchestrator process.
///
/// Mirrors the environment variables documented in spec §6: everything has a
/// default except `llm_api_key`, which is required and fails startup hard if
/// absent.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// API key for the configured LLM provider. Required.
    pub llm_api_key: String,
    /// Model identifier passed to the LLM provider.
    pub llm_model: String,
    /// Requests-per-minute ceiling enforced by the LLM client's rate limiter.
    pub llm_requests_per_minute: u32,

    /// Root directory for persisted workflow templates.
    pub store_root: String,

    /// Default time-to-live for a newly created permission request.
    pub permission_default_ttl: Duration,

    /// Soft per-session deadline; exceeding it triggers the same unwind path
    /// as an explicit cancellation (§5).
    pub session_deadline: Duration,

    /// Minimum severity of `tracing` events emitted.
    pub log_level: LogLevel,

    /// Size of the per-process capability invocation worker pool (§5).
    pub capability_pool_size: usize,

    /// Bind address for the session WebSocket server.
    pub server_bind_addr: String,

    /// Capacity of the broadcast/queue channels backing the session protocol.
    pub ws_broadcast_capacity: usize,
}

/// Logging verbosity, mirrored onto a `tracing_subscriber::EnvFilter` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl RuntimeConfig {
    /// Build configuration from environment variables.
    ///
    /// Environment variables (spec §6):
    /// - `LLM_API_KEY` (required)
    /// - `LLM_MODEL` (default: `claude-3-5-sonnet-latest`)
    /// - `LLM_REQUESTS_PER_MINUTE` (default: 50)
    /// - `STORE_ROOT` (default: `./workflows`)
    /// - `PERMISSION_DEFAULT_TTL_SECONDS` (default: 300)
    /// - `SESSION_DEADLINE_SECONDS` (default: 900)
    /// - `LOG_LEVEL` (default: info)
    /// - `CAPABILITY_POOL_SIZE` (default: 64)
    /// - `SERVER_BIND_ADDR` (default: `127.0.0.1:8787`)
    /// - `WS_BROADCAST_CAPACITY` (default: 1000)
    pub fn from_env() -> OrchestratorResult<Self> {
        let llm_api_key =
            std::env::var("LLM_API_KEY").map_err(|_| ConfigError::MissingRequired {
                field: "LLM_API_KEY".to_string(),
            })?;

        let llm_model =
            std::env::var("LLM_MODEL").unwrap_or_else(|_| "claude-3-5-sonnet-latest".to_string());

        let llm_requests_per_minute = parse_env_or("LLM_REQUESTS_PER_MINUTE", 50u32)?;
        let store_root = std::env::var("STORE_ROOT").unwrap_or_else(|_| "./workflows".to_string());
        let permission_default_ttl =
            Duration::from_secs(parse_env_or("PERMISSION_DEFAULT_TTL_SECONDS", 300u64)?);
        let session_deadline =
            Duration::from_secs(parse_env_or("SESSION_DEADLINE_SECONDS", 900u64)?);

        let log_level = match std::env::var("LOG_LEVEL") {
            Ok(raw) => LogLevel::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                field: "LOG_LEVEL".to_string(),
                value: raw.clone(),
                reason: "expected one of debug, info, warn, error".to_string(),
            })?,
            Err(_) => LogLevel::Info,
        };

        let capability_pool_size = parse_env_or("CAPABILITY_POOL_SIZE", 64usize)?;
        let server_bind_addr =
            std::env::var("SERVER_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8787".to_string());
        let ws_broadcast_capacity = parse_env_or("WS_BROADCAST_CAPACITY", 1000usize)?;

        let config = Self {
            llm_api_key,
            llm_model,
            llm_requests_per_minute,
            store_root,
            permission_default_ttl,
            session_deadline,
            log_level,
            capability_pool_size,
            server_bind_addr,
            ws_broadcast_capacity,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate numeric fields are in sane ranges. Called by `from_env`, but
    /// exposed so tests can exercise hand-built configs too.
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.llm_api_key.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "LLM_API_KEY".to_string(),
            }
            .into());
        }
        if self.llm_requests_per_minute == 0 {
            return Err(ConfigError::InvalidValue {
                field: "LLM_REQUESTS_PER_MINUTE".to_string(),
                value: self.llm_requests_per_minute.to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.capability_pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "CAPABILITY_POOL_SIZE".to_string(),
                value: self.capability_pool_size.to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.session_deadline.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "SESSION_DEADLINE_SECONDS".to_string(),
                value: format!("{:?}", self.session_deadline),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn parse_env_or<T>(key: &str, default: T) -> OrchestratorResult<T>
where
    T: std::str::FromStr,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().map_err(|_| {
            OrchestratorError::from(ConfigError::InvalidValue {
                field: key.to_string(),
                value: raw,
                reason: "failed to parse".to_string(),
            })
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn base_env() {
        std::env::remove_var("LLM_API_KEY");
        std::env::remove_var("LLM_REQUESTS_PER_MINUTE");
        std::env::remove_var("LOG_LEVEL");
        std::env::remove_var("SESSION_DEADLINE_SECONDS");
    }

    #[test]
    fn missing_api_key_fails_hard() {
        let _guard = ENV_LOCK.lock().unwrap();
        base_env();
        let result = RuntimeConfig::from_env();
        assert!(matches!(
            result,
            Err(OrchestratorError::Config(ConfigError::MissingRequired { .. }))
        ));
    }

    #[test]
    fn defaults_apply_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        base_env();
        std::env::set_var("LLM_API_KEY", "test-key");
        let config = RuntimeConfig::from_env().expect("should load with only the key set");
        assert_eq!(config.llm_requests_per_minute, 50);
        assert_eq!(config.store_root, "./workflows");
        assert_eq!(config.log_level, LogLevel::Info);
        std::env::remove_var("LLM_API_KEY");
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        base_env();
        std::env::set_var("LLM_API_KEY", "test-key");
        std::env::set_var("LOG_LEVEL", "verbose");
        let result = RuntimeConfig::from_env();
        assert!(result.is_err());
        std::env::remove_var("LLM_API_KEY");
        std::env::remove_var("LOG_LEVEL");
    }

    #[test]
    fn zero_requests_per_minute_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        base_env();
        std::env::set_var("LLM_API_KEY", "test-key");
        std::env::set_var("LLM_REQUESTS_PER_MINUTE", "0");
        let result = RuntimeConfig::from_env();
        assert!(result.is_err());
        std::env::remove_var("LLM_API_KEY");
        std::env::remove_var("LLM_REQUESTS_PER_MINUTE");
    }
}
