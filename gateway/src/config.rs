use std::time::Duration;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Immutable process configuration, read once at startup.
///
/// Endpoints for the backend fleet are required; everything else falls back
/// to the defaults documented on each field.
#[derive(Clone, Debug)]
pub struct Config {
    /// GATEWAY_HOST, default 0.0.0.0
    pub host: String,
    /// GATEWAY_PORT, default 8080
    pub port: u16,

    /// AUTH_SERVICE_URL (required)
    pub auth_service_url: Url,
    /// PROJECT_SERVICE_URL (required)
    pub project_service_url: Url,
    /// BUILDER_DOCUMENT_URL (required)
    pub builder_document_url: Url,
    /// BUILDER_RELATIONAL_URL (required)
    pub builder_relational_url: Url,
    /// BUILDER_DOCUMENT_DEDICATED_URL, defaults to the shared document URL
    pub builder_document_dedicated_url: Option<Url>,
    /// BUILDER_RELATIONAL_DEDICATED_URL, defaults to the shared relational URL
    pub builder_relational_dedicated_url: Option<Url>,

    /// SERVERLESS_BASE_URL, default http://functions.internal
    pub serverless_base_url: Url,
    /// CONTAINER_BASE_DOMAIN, default containers.internal
    pub container_base_domain: String,
    /// WORKFLOW_BASE_URL, default http://workflows.internal
    pub workflow_base_url: Url,

    /// ADMISSION_LIMIT, default 5000
    pub admission_limit: usize,
    /// RESULT_CACHE_TTL_SECS, default 15
    pub result_cache_ttl: Duration,
    /// BINDING_CACHE_TTL_SECS, default 10
    pub binding_cache_ttl: Duration,
    /// DEFAULT_PAGE_LIMIT, default 10
    pub default_page_limit: u32,
    /// AUDIT_QUEUE_SIZE, default 1024
    pub audit_queue_size: usize,

    /// AUTH_TIMEOUT_SECS, default 5
    pub auth_timeout: Duration,
    /// BUILDER_TIMEOUT_SECS, default 4
    pub builder_timeout: Duration,
    /// BULK_WRITE_TIMEOUT_SECS, default 30
    pub bulk_write_timeout: Duration,

    /// STATSD_HOST + STATSD_PORT (default 8125); metrics are disabled when
    /// the host is unset.
    pub statsd: Option<(String, u16)>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup, so tests can supply
    /// a map instead of mutating the process environment.
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let statsd = match lookup("STATSD_HOST") {
            Some(host) => Some((host, parse_or(lookup, "STATSD_PORT", 8125)?)),
            None => None,
        };

        Ok(Config {
            host: lookup("GATEWAY_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(lookup, "GATEWAY_PORT", 8080)?,

            auth_service_url: required_url(lookup, "AUTH_SERVICE_URL")?,
            project_service_url: required_url(lookup, "PROJECT_SERVICE_URL")?,
            builder_document_url: required_url(lookup, "BUILDER_DOCUMENT_URL")?,
            builder_relational_url: required_url(lookup, "BUILDER_RELATIONAL_URL")?,
            builder_document_dedicated_url: optional_url(lookup, "BUILDER_DOCUMENT_DEDICATED_URL")?,
            builder_relational_dedicated_url: optional_url(
                lookup,
                "BUILDER_RELATIONAL_DEDICATED_URL",
            )?,

            serverless_base_url: url_or(lookup, "SERVERLESS_BASE_URL", "http://functions.internal")?,
            container_base_domain: lookup("CONTAINER_BASE_DOMAIN")
                .unwrap_or_else(|| "containers.internal".to_string()),
            workflow_base_url: url_or(lookup, "WORKFLOW_BASE_URL", "http://workflows.internal")?,

            admission_limit: parse_or(lookup, "ADMISSION_LIMIT", 5000)?,
            result_cache_ttl: Duration::from_secs(parse_or(lookup, "RESULT_CACHE_TTL_SECS", 15)?),
            binding_cache_ttl: Duration::from_secs(parse_or(lookup, "BINDING_CACHE_TTL_SECS", 10)?),
            default_page_limit: parse_or(lookup, "DEFAULT_PAGE_LIMIT", 10)?,
            audit_queue_size: parse_or(lookup, "AUDIT_QUEUE_SIZE", 1024)?,

            auth_timeout: Duration::from_secs(parse_or(lookup, "AUTH_TIMEOUT_SECS", 5)?),
            builder_timeout: Duration::from_secs(parse_or(lookup, "BUILDER_TIMEOUT_SECS", 4)?),
            bulk_write_timeout: Duration::from_secs(parse_or(
                lookup,
                "BULK_WRITE_TIMEOUT_SECS",
                30,
            )?),

            statsd,
        })
    }
}

fn required_url(lookup: &dyn Fn(&str) -> Option<String>, key: &'static str) -> Result<Url, ConfigError> {
    let value = lookup(key).ok_or(ConfigError::Missing(key))?;
    Url::parse(&value).map_err(|_| ConfigError::Invalid { key, value })
}

fn optional_url(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<Url>, ConfigError> {
    match lookup(key) {
        Some(value) => Url::parse(&value)
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(None),
    }
}

fn url_or(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &'static str,
    default: &str,
) -> Result<Url, ConfigError> {
    match lookup(key) {
        Some(value) => Url::parse(&value).map_err(|_| ConfigError::Invalid { key, value }),
        None => Url::parse(default).map_err(|_| ConfigError::Invalid {
            key,
            value: default.to_string(),
        }),
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(map: &HashMap<&str, &str>) -> impl Fn(&str) -> Option<String> {
        let owned: HashMap<String, String> = map
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| owned.get(key).cloned()
    }

    fn minimal() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("AUTH_SERVICE_URL", "http://auth.internal"),
            ("PROJECT_SERVICE_URL", "http://projects.internal"),
            ("BUILDER_DOCUMENT_URL", "http://builder-doc.internal"),
            ("BUILDER_RELATIONAL_URL", "http://builder-rel.internal"),
        ])
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(&lookup_from(&minimal())).unwrap();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.admission_limit, 5000);
        assert_eq!(config.result_cache_ttl, Duration::from_secs(15));
        assert_eq!(config.default_page_limit, 10);
        assert_eq!(config.auth_timeout, Duration::from_secs(5));
        assert_eq!(config.bulk_write_timeout, Duration::from_secs(30));
        assert!(config.statsd.is_none());
        assert!(config.builder_document_dedicated_url.is_none());
    }

    #[test]
    fn test_missing_critical_key_names_the_key() {
        let mut env = minimal();
        env.remove("BUILDER_DOCUMENT_URL");

        let err = Config::from_lookup(&lookup_from(&env)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("BUILDER_DOCUMENT_URL")));
        assert!(err.to_string().contains("BUILDER_DOCUMENT_URL"));
    }

    #[test]
    fn test_invalid_value_names_the_key() {
        let mut env = minimal();
        env.insert("GATEWAY_PORT", "not_a_port");

        let err = Config::from_lookup(&lookup_from(&env)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "GATEWAY_PORT",
                ..
            }
        ));
    }

    #[test]
    fn test_overrides() {
        let mut env = minimal();
        env.insert("ADMISSION_LIMIT", "2");
        env.insert("RESULT_CACHE_TTL_SECS", "1");
        env.insert("STATSD_HOST", "statsd.internal");

        let config = Config::from_lookup(&lookup_from(&env)).unwrap();
        assert_eq!(config.admission_limit, 2);
        assert_eq!(config.result_cache_ttl, Duration::from_secs(1));
        assert_eq!(config.statsd, Some(("statsd.internal".to_string(), 8125)));
    }
}
