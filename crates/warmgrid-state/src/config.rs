//! Process-wide pool configuration.
//!
//! Loaded once at startup from environment variables and immutable for the
//! process lifetime; changing any value requires a restart.

use std::time::Duration;

use thiserror::Error;

use crate::types::UnitTemplate;

/// Errors raised while loading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Pool provisioner configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Number of warm units the replenisher maintains.
    pub target_pool_size: u32,
    /// Namespace all managed units live in.
    pub namespace: String,
    /// Template for every unit this provisioner creates.
    pub template: UnitTemplate,
    /// Period of the replenisher loop.
    pub replenish_interval: Duration,
    /// Upper bound on how long a session request may wait for an
    /// on-demand creation before the API answers 504.
    pub on_demand_timeout: Duration,
    /// Base URL for per-session endpoints; the session endpoint is
    /// `{endpoint_base}/ws/{session_id}`.
    pub endpoint_base: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            target_pool_size: 4,
            namespace: "warmgrid".to_string(),
            template: UnitTemplate::default(),
            replenish_interval: Duration::from_secs(5),
            on_demand_timeout: Duration::from_secs(60),
            endpoint_base: "ws://localhost:8080".to_string(),
        }
    }
}

impl PoolConfig {
    /// Load configuration from process environment variables.
    ///
    /// Recognized variables: `POOL_SIZE`, `NAMESPACE`,
    /// `REPLENISH_INTERVAL_SECONDS`, `ON_DEMAND_TIMEOUT_SECONDS`,
    /// `UNIT_IMAGE`, `UNIT_PORT`, `UNIT_CPU_REQUEST`, `UNIT_CPU_LIMIT`,
    /// `UNIT_MEMORY_REQUEST`, `UNIT_MEMORY_LIMIT`, `ENDPOINT_BASE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// `from_env` routes through here; tests pass a closure over a map so
    /// they never touch process-global environment state.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let target_pool_size = parse_var(&lookup, "POOL_SIZE", defaults.target_pool_size)?;
        let namespace = lookup("NAMESPACE").unwrap_or(defaults.namespace);
        let replenish_interval = Duration::from_secs(parse_var(
            &lookup,
            "REPLENISH_INTERVAL_SECONDS",
            defaults.replenish_interval.as_secs(),
        )?);
        let on_demand_timeout = Duration::from_secs(parse_var(
            &lookup,
            "ON_DEMAND_TIMEOUT_SECONDS",
            defaults.on_demand_timeout.as_secs(),
        )?);
        let endpoint_base = lookup("ENDPOINT_BASE").unwrap_or(defaults.endpoint_base);

        let image = lookup("UNIT_IMAGE")
            .map(|image| ensure_tag(&image))
            .unwrap_or(defaults.template.image);
        let port = parse_var(&lookup, "UNIT_PORT", defaults.template.port)?;

        let template = UnitTemplate {
            image,
            port,
            cpu_request: lookup("UNIT_CPU_REQUEST").unwrap_or(defaults.template.cpu_request),
            cpu_limit: lookup("UNIT_CPU_LIMIT").unwrap_or(defaults.template.cpu_limit),
            memory_request: lookup("UNIT_MEMORY_REQUEST")
                .unwrap_or(defaults.template.memory_request),
            memory_limit: lookup("UNIT_MEMORY_LIMIT").unwrap_or(defaults.template.memory_limit),
        };

        Ok(Self {
            target_pool_size,
            namespace,
            template,
            replenish_interval,
            on_demand_timeout,
            endpoint_base,
        })
    }

    /// Endpoint handed to a session's client.
    pub fn session_endpoint(&self, session_id: &str) -> String {
        format!("{}/ws/{}", self.endpoint_base.trim_end_matches('/'), session_id)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Append `:latest` when the image reference carries no tag.
fn ensure_tag(image: &str) -> String {
    // A ':' after the last '/' is a tag; anywhere earlier it is a registry port.
    let name = image.rsplit('/').next().unwrap_or(image);
    if name.contains(':') {
        image.to_string()
    } else {
        format!("{image}:latest")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from<'a>(map: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |var| map.get(var).map(|v| v.to_string())
    }

    #[test]
    fn defaults_when_env_empty() {
        let config = PoolConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, PoolConfig::default());
    }

    #[test]
    fn reads_all_variables() {
        let vars = HashMap::from([
            ("POOL_SIZE", "8"),
            ("NAMESPACE", "sessions"),
            ("REPLENISH_INTERVAL_SECONDS", "10"),
            ("ON_DEMAND_TIMEOUT_SECONDS", "30"),
            ("UNIT_IMAGE", "registry.local:5000/worker"),
            ("UNIT_PORT", "9000"),
            ("UNIT_CPU_REQUEST", "100m"),
            ("UNIT_CPU_LIMIT", "200m"),
            ("UNIT_MEMORY_REQUEST", "128Mi"),
            ("UNIT_MEMORY_LIMIT", "256Mi"),
            ("ENDPOINT_BASE", "wss://sessions.example.com"),
        ]);
        let config = PoolConfig::from_lookup(lookup_from(&vars)).unwrap();

        assert_eq!(config.target_pool_size, 8);
        assert_eq!(config.namespace, "sessions");
        assert_eq!(config.replenish_interval, Duration::from_secs(10));
        assert_eq!(config.on_demand_timeout, Duration::from_secs(30));
        assert_eq!(config.template.image, "registry.local:5000/worker:latest");
        assert_eq!(config.template.port, 9000);
        assert_eq!(config.template.memory_limit, "256Mi");
        assert_eq!(config.endpoint_base, "wss://sessions.example.com");
    }

    #[test]
    fn invalid_pool_size_is_rejected() {
        let vars = HashMap::from([("POOL_SIZE", "not-a-number")]);
        let err = PoolConfig::from_lookup(lookup_from(&vars)).unwrap_err();
        assert!(err.to_string().contains("POOL_SIZE"));
    }

    #[test]
    fn image_tag_preserved() {
        assert_eq!(ensure_tag("worker:v3"), "worker:v3");
        assert_eq!(ensure_tag("worker"), "worker:latest");
        // Registry port is not a tag.
        assert_eq!(
            ensure_tag("registry.local:5000/worker"),
            "registry.local:5000/worker:latest"
        );
    }

    #[test]
    fn session_endpoint_joins_cleanly() {
        let mut config = PoolConfig::default();
        config.endpoint_base = "wss://example.com/".to_string();
        assert_eq!(
            config.session_endpoint("abc123"),
            "wss://example.com/ws/abc123"
        );
    }
}
