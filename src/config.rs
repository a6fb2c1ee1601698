use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::SpannerMiddlewareError;

/// User agent reported to the backing client.
pub const USER_AGENT: &str = concat!("spanner-middleware/", env!("CARGO_PKG_VERSION"));

/// Grammar for a connection descriptor:
/// `[host/]projects/<project>/instances/<instance>[/databases/<database>][?|;]key=value[;key=value...]`
static DESCRIPTOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ^
        (?:(?P<host>[\w.-]+(?::\d+)?)/)?
        projects/(?P<project>(?:[a-z0-9.:-]+|DEFAULT_PROJECT_ID))
        (?:
            /instances/(?P<instance>[a-z0-9-]+)
            (?:/databases/(?P<database>[a-z0-9_-]+))?
        )?
        (?:[?;](?P<params>.*))?
        $",
    )
    .expect("descriptor grammar is valid")
});

/// Parsed form of a connection descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Optional endpoint override (host[:port]).
    pub host: Option<String>,
    pub project: String,
    pub instance: Option<String>,
    pub database: Option<String>,
    /// Every `key=value` parameter with keys lowercased. Unknown keys are
    /// preserved but ignored by this layer.
    pub params: HashMap<String, String>,
}

impl ConnectorConfig {
    /// Parse a descriptor string.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for text not matching the grammar or for
    /// parameter entries without a `=`.
    pub fn parse(descriptor: &str) -> Result<Self, SpannerMiddlewareError> {
        let captures = DESCRIPTOR_RE.captures(descriptor).ok_or_else(|| {
            SpannerMiddlewareError::invalid_argument(format!(
                "invalid connection string: {descriptor}"
            ))
        })?;
        let params = parse_params(captures.name("params").map_or("", |m| m.as_str()))?;
        Ok(Self {
            host: captures.name("host").map(|m| m.as_str().to_string()),
            project: captures["project"].to_string(),
            instance: captures.name("instance").map(|m| m.as_str().to_string()),
            database: captures.name("database").map(|m| m.as_str().to_string()),
            params,
        })
    }

    /// Fully qualified database name.
    ///
    /// # Errors
    /// Returns `InvalidArgument` when the descriptor did not name an
    /// instance and database.
    pub fn database_name(&self) -> Result<String, SpannerMiddlewareError> {
        match (&self.instance, &self.database) {
            (Some(instance), Some(database)) => Ok(format!(
                "projects/{}/instances/{}/databases/{}",
                self.project, instance, database
            )),
            _ => Err(SpannerMiddlewareError::invalid_argument(
                "connection string must name a project, instance, and database",
            )),
        }
    }

    /// Look up a parameter by case-insensitive key.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    /// Boolean parameter. Unparseable values are ignored, like the rest of
    /// the recognized parameters: only `true`/`false`/`1`/`0` (any case)
    /// count.
    #[must_use]
    pub fn param_bool(&self, key: &str) -> Option<bool> {
        match self.param(key)?.to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }

    #[must_use]
    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.param(key)?.parse().ok()
    }

    #[must_use]
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.param(key)?.parse().ok()
    }
}

fn parse_params(
    params: &str,
) -> Result<HashMap<String, String>, SpannerMiddlewareError> {
    let mut map = HashMap::new();
    for entry in params.split(';') {
        // Tolerate empty entries, e.g. a trailing ';'.
        if entry.is_empty() {
            continue;
        }
        let (key, value) = entry.split_once('=').ok_or_else(|| {
            SpannerMiddlewareError::invalid_argument(format!(
                "invalid connection property: {entry}"
            ))
        })?;
        map.insert(key.to_ascii_lowercase(), value.to_string());
    }
    Ok(map)
}

/// Options forwarded to the client factory.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Endpoint override; the factory's default endpoint when absent.
    pub endpoint: Option<String>,
    /// Path to a credentials file; ambient credentials when absent.
    pub credentials_file: Option<String>,
    /// Disable TLS and authentication. Only for local test backends.
    pub plaintext: bool,
    pub user_agent: String,
}

/// Session pool sizing, forwarded verbatim to the backing client.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionPoolConfig {
    pub min_sessions: Option<u64>,
    pub max_sessions: Option<u64>,
    pub write_sessions: Option<f64>,
}

/// Everything derived from one descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorOptions {
    pub config: ConnectorConfig,
    pub client_options: ClientOptions,
    pub pool_config: SessionPoolConfig,
    pub retry_aborts_internally: bool,
}

impl ConnectorOptions {
    /// Parse a descriptor and extract the recognized parameters.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for malformed descriptors.
    pub fn parse(descriptor: &str) -> Result<Self, SpannerMiddlewareError> {
        let config = ConnectorConfig::parse(descriptor)?;
        let client_options = ClientOptions {
            endpoint: config.host.clone(),
            credentials_file: config.param("credentials").map(str::to_string),
            plaintext: config.param_bool("useplaintext").unwrap_or(false),
            user_agent: USER_AGENT.to_string(),
        };
        let pool_config = SessionPoolConfig {
            min_sessions: config.param_u64("minsessions"),
            max_sessions: config.param_u64("maxsessions"),
            write_sessions: config.param_f64("writesessions"),
        };
        let retry_aborts_internally = config.param_bool("retryabortsinternally").unwrap_or(true);
        Ok(Self {
            config,
            client_options,
            pool_config,
            retry_aborts_internally,
        })
    }
}
