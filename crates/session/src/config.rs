use std::time::Duration;

use recruit_core::timer::DEFAULT_WARNING_THRESHOLDS_SECS;
use recruit_signaling::reconnect::ReconnectPolicy;
use recruit_signaling::{RelayConfig, Role};

/// Default debounce window for draft auto-save.
pub const DEFAULT_AUTOSAVE_DEBOUNCE_SECS: u64 = 30;

/// Default backend request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} is required")]
    Missing { var: &'static str },

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Session configuration loaded from environment variables.
///
/// Every field except the backend URL has a default suitable for local
/// development.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// REST backend base URL, without a trailing slash.
    pub backend_url: String,
    /// Signaling relay WebSocket URL. Interviews only.
    pub signaling_url: Option<String>,
    /// Bearer token for the REST backend.
    pub api_token: Option<String>,
    pub autosave_debounce: Duration,
    /// Remaining-time thresholds that raise a warning.
    pub warning_thresholds_secs: Vec<u64>,
    /// Automatic rejoins per session after a peer failure.
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub request_timeout: Duration,
}

impl SessionConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default  |
    /// |---------------------------|----------|
    /// | `BACKEND_URL`             | required |
    /// | `SIGNALING_URL`           | unset    |
    /// | `API_TOKEN`               | unset    |
    /// | `AUTOSAVE_DEBOUNCE_SECS`  | `30`     |
    /// | `WARNING_THRESHOLDS_SECS` | `300,60` |
    /// | `RECONNECT_ATTEMPTS`      | `1`      |
    /// | `RECONNECT_DELAY_MS`      | `0`      |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend_url = var("BACKEND_URL")
            .ok_or(ConfigError::Missing { var: "BACKEND_URL" })?
            .trim_end_matches('/')
            .to_string();

        let autosave_debounce_secs = parse_or(
            "AUTOSAVE_DEBOUNCE_SECS",
            var("AUTOSAVE_DEBOUNCE_SECS"),
            DEFAULT_AUTOSAVE_DEBOUNCE_SECS,
        )?;

        let warning_thresholds_secs = match var("WARNING_THRESHOLDS_SECS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<u64>().map_err(|e| ConfigError::Invalid {
                        var: "WARNING_THRESHOLDS_SECS",
                        value: raw.clone(),
                        reason: e.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => DEFAULT_WARNING_THRESHOLDS_SECS.to_vec(),
        };

        let reconnect_attempts = parse_or("RECONNECT_ATTEMPTS", var("RECONNECT_ATTEMPTS"), 1)?;
        let reconnect_delay_ms = parse_or("RECONNECT_DELAY_MS", var("RECONNECT_DELAY_MS"), 0)?;
        let request_timeout_secs = parse_or(
            "REQUEST_TIMEOUT_SECS",
            var("REQUEST_TIMEOUT_SECS"),
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;

        Ok(Self {
            backend_url,
            signaling_url: var("SIGNALING_URL"),
            api_token: var("API_TOKEN"),
            autosave_debounce: Duration::from_secs(autosave_debounce_secs),
            warning_thresholds_secs,
            reconnect_attempts,
            reconnect_delay: Duration::from_millis(reconnect_delay_ms),
            request_timeout: Duration::from_secs(request_timeout_secs),
        })
    }

    /// Defaults pointed at `backend_url`.
    pub fn with_backend(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            signaling_url: None,
            api_token: None,
            autosave_debounce: Duration::from_secs(DEFAULT_AUTOSAVE_DEBOUNCE_SECS),
            warning_thresholds_secs: DEFAULT_WARNING_THRESHOLDS_SECS.to_vec(),
            reconnect_attempts: 1,
            reconnect_delay: Duration::ZERO,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Rejoin budget for the signaling relay.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_attempts,
            delay: self.reconnect_delay,
        }
    }

    pub fn relay_config(&self, role: Role) -> RelayConfig {
        RelayConfig {
            reconnect: self.reconnect_policy(),
            ..RelayConfig::new(role)
        }
    }
}

fn parse_or<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<SessionConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SessionConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("BACKEND_URL", "http://localhost:3000/api/")]).unwrap();
        assert_eq!(config.backend_url, "http://localhost:3000/api");
        assert_eq!(config.autosave_debounce, Duration::from_secs(30));
        assert_eq!(config.warning_thresholds_secs, vec![300, 60]);
        assert_eq!(config.reconnect_attempts, 1);
        assert_eq!(config.reconnect_delay, Duration::ZERO);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.signaling_url.is_none());
        assert!(config.api_token.is_none());
    }

    #[test]
    fn overrides_parse() {
        let config = load(&[
            ("BACKEND_URL", "https://api.example.com"),
            ("SIGNALING_URL", "wss://relay.example.com/ws"),
            ("API_TOKEN", "tok"),
            ("AUTOSAVE_DEBOUNCE_SECS", "5"),
            ("WARNING_THRESHOLDS_SECS", "600, 120,30"),
            ("RECONNECT_ATTEMPTS", "0"),
            ("RECONNECT_DELAY_MS", "250"),
        ])
        .unwrap();
        assert_eq!(config.signaling_url.as_deref(), Some("wss://relay.example.com/ws"));
        assert_eq!(config.api_token.as_deref(), Some("tok"));
        assert_eq!(config.autosave_debounce, Duration::from_secs(5));
        assert_eq!(config.warning_thresholds_secs, vec![600, 120, 30]);
        assert_eq!(config.reconnect_attempts, 0);
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
    }

    #[test]
    fn reconnect_settings_reach_relay_budget() {
        use recruit_core::connection::PeerStatus;
        use recruit_signaling::{RelayAction, RelayState};

        let config = load(&[
            ("BACKEND_URL", "http://x"),
            ("RECONNECT_ATTEMPTS", "2"),
            ("RECONNECT_DELAY_MS", "500"),
        ])
        .unwrap();
        let relay = config.relay_config(Role::Callee);
        assert_eq!(relay.role, Role::Callee);
        assert_eq!(relay.reconnect.max_attempts, 2);
        assert_eq!(relay.reconnect.delay, Duration::from_millis(500));

        let config = load(&[("BACKEND_URL", "http://x"), ("RECONNECT_ATTEMPTS", "0")]).unwrap();
        let mut state = RelayState::new("me", Role::Callee, config.reconnect_policy());
        state.join("room");
        let actions = state.on_peer_status(PeerStatus::Failed);
        assert_matches!(&actions[..], [RelayAction::Publish(_), RelayAction::Fatal(_)]);
    }

    #[test]
    fn missing_backend_url() {
        assert_matches!(load(&[]), Err(ConfigError::Missing { var: "BACKEND_URL" }));
        assert_matches!(
            load(&[("BACKEND_URL", "  ")]),
            Err(ConfigError::Missing { .. })
        );
    }

    #[test]
    fn invalid_number_names_the_variable() {
        assert_matches!(
            load(&[("BACKEND_URL", "http://x"), ("AUTOSAVE_DEBOUNCE_SECS", "soon")]),
            Err(ConfigError::Invalid { var: "AUTOSAVE_DEBOUNCE_SECS", .. })
        );
        assert_matches!(
            load(&[("BACKEND_URL", "http://x"), ("WARNING_THRESHOLDS_SECS", "300,a")]),
            Err(ConfigError::Invalid { var: "WARNING_THRESHOLDS_SECS", .. })
        );
    }
}
