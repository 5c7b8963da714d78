// Application configuration.
// Logging can be switched off only in development builds.

use crate::peer::types::IceServerConfig;
use crate::session::registry::Role;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

#[cfg(debug_assertions)]
pub mod dev {
    // Flip to false to silence logging entirely in debug builds.
    pub const ENABLE_LOGGING: bool = true;
    pub const DEFAULT_FILTER: &str = "consult_call_lib=debug,webrtc=warn";
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = false;
    pub const DEFAULT_FILTER: &str = "consult_call_lib=info,webrtc=error";
}

/// Default wait before a disconnected/failed ICE connection ends the call.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Default time a call may stay unanswered in Calling/Incoming.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CallConfig {
    pub signaling_url: String,
    pub auth_token: Option<String>,
    pub session_id: String,
    pub user_id: String,
    pub user_name: String,
    pub role: Role,
    /// Empty means the built-in public STUN servers.
    pub ice_servers: Vec<IceServerConfig>,
    pub grace_period_secs: u64,
    /// `None` keeps an unanswered call ringing forever.
    pub call_timeout_secs: Option<u64>,
    pub log_filter: Option<String>,
    pub lookup_url: Option<String>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://127.0.0.1:5000/signaling".into(),
            auth_token: None,
            session_id: String::new(),
            user_id: String::new(),
            user_name: String::new(),
            role: Role::Requester,
            ice_servers: Vec::new(),
            grace_period_secs: DEFAULT_GRACE_PERIOD.as_secs(),
            call_timeout_secs: Some(DEFAULT_CALL_TIMEOUT.as_secs()),
            log_filter: None,
            lookup_url: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl CallConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Overrides fields from `CONSULT_*` environment variables.
    pub fn apply_env(mut self) -> Self {
        self.apply_vars(|key| std::env::var(key).ok());
        self
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("CONSULT_SIGNALING_URL") {
            self.signaling_url = v;
        }
        if let Some(v) = var("CONSULT_AUTH_TOKEN") {
            self.auth_token = Some(v);
        }
        if let Some(v) = var("CONSULT_SESSION_ID") {
            self.session_id = v;
        }
        if let Some(v) = var("CONSULT_USER_ID") {
            self.user_id = v;
        }
        if let Some(v) = var("CONSULT_USER_NAME") {
            self.user_name = v;
        }
        if let Some(v) = var("CONSULT_ROLE") {
            match v.parse() {
                Ok(role) => self.role = role,
                Err(_) => tracing::warn!("ignoring unknown CONSULT_ROLE `{}`", v),
            }
        }
        if let Some(v) = var("CONSULT_LOG") {
            self.log_filter = Some(v);
        }
        if let Some(v) = var("CONSULT_LOOKUP_URL") {
            self.lookup_url = Some(v);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_id.trim().is_empty() {
            return Err(ConfigError::Invalid("session_id is required".into()));
        }
        if self.user_id.trim().is_empty() {
            return Err(ConfigError::Invalid("user_id is required".into()));
        }
        crate::peer::ice::validate_ice_servers(&self.ice_servers).map_err(ConfigError::Invalid)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: CallConfig =
            serde_json::from_str(r#"{"session_id":"s-1","user_id":"u-1","role":"helper"}"#)
                .unwrap();
        assert_eq!(cfg.role, Role::Helper);
        assert_eq!(cfg.grace_period(), DEFAULT_GRACE_PERIOD);
        assert_eq!(cfg.call_timeout(), Some(DEFAULT_CALL_TIMEOUT));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("CONSULT_SESSION_ID", "abc"),
            ("CONSULT_ROLE", "helper"),
            ("CONSULT_AUTH_TOKEN", "t0k"),
        ]
        .into_iter()
        .collect();
        let mut cfg = CallConfig::default();
        cfg.apply_vars(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.session_id, "abc");
        assert_eq!(cfg.role, Role::Helper);
        assert_eq!(cfg.auth_token.as_deref(), Some("t0k"));
    }

    #[test]
    fn turn_without_credentials_is_rejected() {
        let cfg = CallConfig {
            session_id: "s".into(),
            user_id: "u".into(),
            ice_servers: vec![IceServerConfig {
                id: "t".into(),
                r#type: "turn".into(),
                url: "turn.example.org:3478".into(),
                username: None,
                credential: None,
            }],
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }
}
