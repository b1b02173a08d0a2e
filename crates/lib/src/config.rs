//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.agent-relay/config.json`) and environment.
//! Environment variables override file values. [`Config::resolve`] validates the result into
//! [`RelaySettings`]; a missing required value is a startup error.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Public-cloud authority used when none is configured.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Scope of the agent service in the public cloud.
pub const DEFAULT_AGENT_SCOPE: &str = "https://api.powerplatform.com/.default";

/// Agent service API version sent with every conversation call.
pub const DEFAULT_API_VERSION: &str = "2022-03-01-preview";

const ENVIRONMENT_HOST_SUFFIX: &str = "environment.api.powerplatform.com";

/// Top-level application config, as read from the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Identity provider (OBO client credentials).
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Downstream agent service.
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Bind, port, timeout and CORS settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port for HTTP (default 7071).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Whole-request deadline in seconds, covering exchange and the downstream stream.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Origins allowed to call the relay from a browser. `"*"` allows any origin.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

/// OBO client registration. Secrets are usually supplied via environment instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityConfig {
    /// Application (client) id of the relay. Overridden by AGENT_RELAY_CLIENT_ID.
    pub client_id: Option<String>,
    /// Client secret. Overridden by AGENT_RELAY_CLIENT_SECRET.
    pub client_secret: Option<String>,
    /// Directory (tenant) id. Overridden by AGENT_RELAY_TENANT_ID.
    pub tenant_id: Option<String>,
    /// Authority host (default https://login.microsoftonline.com). Overridden by AGENT_RELAY_AUTHORITY.
    pub authority: Option<String>,
    /// Scope requested for the downstream token. Overridden by AGENT_RELAY_SCOPE.
    pub scope: Option<String>,
    /// Timeout for one token endpoint round trip, in seconds (default 30).
    pub timeout_secs: Option<u64>,
}

/// Agent service location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Environment id hosting the agent; used to derive the service host. Overridden by AGENT_RELAY_ENVIRONMENT_ID.
    pub environment_id: Option<String>,
    /// Schema name of the agent. Overridden by AGENT_RELAY_SCHEMA_NAME.
    pub schema_name: Option<String>,
    /// Base URL of the agent service; when set, takes precedence over the environment id. Overridden by AGENT_RELAY_AGENT_ENDPOINT.
    pub endpoint: Option<String>,
    /// API version query parameter (default 2022-03-01-preview).
    pub api_version: Option<String>,
}

fn default_port() -> u16 {
    7071
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            request_timeout_secs: default_request_timeout_secs(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// True when any origin may call the relay.
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o.trim() == "*")
    }
}

/// Why the configuration could not be turned into [`RelaySettings`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {field} (set {env} or {field} in the config file)")]
    Missing {
        field: &'static str,
        env: &'static str,
    },
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Validated identity-provider settings.
#[derive(Clone)]
pub struct IdentitySettings {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    pub authority: String,
    pub scope: String,
    pub timeout: Duration,
}

impl IdentitySettings {
    /// OAuth 2.0 v2 token endpoint for the configured tenant.
    pub fn token_endpoint(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

impl fmt::Debug for IdentitySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentitySettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("tenant_id", &self.tenant_id)
            .field("authority", &self.authority)
            .field("scope", &self.scope)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Validated agent-service settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    /// Service root, without trailing slash.
    pub base_url: String,
    pub schema_name: String,
    pub api_version: String,
}

/// Everything the relay needs at runtime, validated.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub server: ServerConfig,
    pub identity: IdentitySettings,
    pub agent: AgentSettings,
}

/// First non-empty value of an environment variable or a configured string, trimmed.
fn setting(
    env: &dyn Fn(&str) -> Option<String>,
    name: &str,
    configured: Option<&String>,
) -> Option<String> {
    env(name)
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            configured
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

fn required(
    env: &dyn Fn(&str) -> Option<String>,
    name: &'static str,
    field: &'static str,
    configured: Option<&String>,
) -> Result<String, ConfigError> {
    setting(env, name, configured).ok_or(ConfigError::Missing { field, env: name })
}

/// Derive the agent service root from an environment id: dashes removed, lower-cased, and the
/// last two characters split off as their own host label.
pub fn environment_base_url(environment_id: &str) -> Result<String, ConfigError> {
    let normalized: String = environment_id
        .trim()
        .chars()
        .filter(|c| *c != '-')
        .collect::<String>()
        .to_lowercase();
    if normalized.len() < 3 || !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ConfigError::Invalid {
            field: "agent.environmentId",
            reason: format!("{:?} is not an environment id", environment_id),
        });
    }
    let (prefix, suffix) = normalized.split_at(normalized.len() - 2);
    Ok(format!("https://{}.{}.{}", prefix, suffix, ENVIRONMENT_HOST_SUFFIX))
}

impl Config {
    /// Resolve against the process environment.
    pub fn resolve(&self) -> Result<RelaySettings, ConfigError> {
        self.resolve_with(&|name: &str| std::env::var(name).ok())
    }

    /// Resolve using `env` as the environment lookup. Environment values win over file values.
    pub fn resolve_with(
        &self,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<RelaySettings, ConfigError> {
        let id = &self.identity;
        let identity = IdentitySettings {
            client_id: required(env, "AGENT_RELAY_CLIENT_ID", "identity.clientId", id.client_id.as_ref())?,
            client_secret: required(
                env,
                "AGENT_RELAY_CLIENT_SECRET",
                "identity.clientSecret",
                id.client_secret.as_ref(),
            )?,
            tenant_id: required(env, "AGENT_RELAY_TENANT_ID", "identity.tenantId", id.tenant_id.as_ref())?,
            authority: setting(env, "AGENT_RELAY_AUTHORITY", id.authority.as_ref())
                .unwrap_or_else(|| DEFAULT_AUTHORITY.to_string()),
            scope: setting(env, "AGENT_RELAY_SCOPE", id.scope.as_ref())
                .unwrap_or_else(|| DEFAULT_AGENT_SCOPE.to_string()),
            timeout: Duration::from_secs(id.timeout_secs.unwrap_or(30).max(1)),
        };

        let agent = &self.agent;
        let schema_name = required(
            env,
            "AGENT_RELAY_SCHEMA_NAME",
            "agent.schemaName",
            agent.schema_name.as_ref(),
        )?;
        let base_url = match setting(env, "AGENT_RELAY_AGENT_ENDPOINT", agent.endpoint.as_ref()) {
            Some(endpoint) => {
                if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                    return Err(ConfigError::Invalid {
                        field: "agent.endpoint",
                        reason: format!("{} is not an http(s) URL", endpoint),
                    });
                }
                endpoint.trim_end_matches('/').to_string()
            }
            None => {
                let environment_id = required(
                    env,
                    "AGENT_RELAY_ENVIRONMENT_ID",
                    "agent.environmentId",
                    agent.environment_id.as_ref(),
                )?;
                environment_base_url(&environment_id)?
            }
        };
        let api_version = agent
            .api_version
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

        Ok(RelaySettings {
            server: self.server.clone(),
            identity,
            agent: AgentSettings {
                base_url,
                schema_name,
                api_version,
            },
        })
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("AGENT_RELAY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".agent-relay").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, the default path, or AGENT_RELAY_CONFIG_PATH. Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
