// Copyright 2025 Tributary Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Adapter configuration.
//!
//! The receive adapter is configured entirely through environment variables set
//! by the controller that deploys it. [`EnvConfig`] mirrors those variables one
//! to one; [`AdapterConfig`] is the validated, immutable form the rest of the
//! crate works with.
//!
//! | Variable | Required | Default |
//! |----------|----------|---------|
//! | `MONGODB_CREDENTIALS` | yes | |
//! | `MONGODB_DATABASE` | yes | |
//! | `MONGODB_COLLECTION` | no | whole database |
//! | `MONGODB_UPDATE_LOOKUP` | no | `true` |
//! | `CE_SOURCE_PREFIX` | yes | |
//! | `CE_SOURCE_TEMPLATE` | no | [`DEFAULT_SOURCE_TEMPLATE`] |
//! | `K_SINK` | yes | |
//! | `K_SINK_TIMEOUT_SECS` | no | `30` |
//! | `K_CE_OVERRIDES` | no | no extensions |
//! | `NAME`, `NAMESPACE` | no | |
//! | `METRICS_ADDR` | no | exporter disabled |
//!
//! # Example
//!
//! ```rust
//! use tributary_core::config::AdapterConfig;
//!
//! let config = AdapterConfig::builder()
//!     .database("shop")
//!     .collection("orders")
//!     .credentials_path("/etc/mongodb-credentials")
//!     .sink("http://broker-ingress.default.svc.cluster.local")
//!     .source_prefix("mongodb://prod")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.collection.as_deref(), Some("orders"));
//! ```

use crate::watch_level::WatchLevel;
use envconfig::Envconfig;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default envelope source format.
pub const DEFAULT_SOURCE_TEMPLATE: &str = "{prefix}/databases/{database}/collections/{collection}";

/// Name of the file holding the connection string inside the credentials directory.
pub const CREDENTIALS_URI_FILE: &str = "URI";

const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(30);

/// Attribute names defined by the CloudEvents specification; extensions may not shadow them.
const RESERVED_ATTRIBUTES: &[&str] = &[
    "id",
    "source",
    "specversion",
    "type",
    "datacontenttype",
    "dataschema",
    "subject",
    "time",
    "data",
];

/// Errors raised while building an [`AdapterConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable is missing or could not be parsed
    #[error("Environment error: {0}")]
    Env(#[from] envconfig::Error),

    /// A required setting was not provided
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    /// A setting was provided but is not usable
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    /// `K_CE_OVERRIDES` is not valid JSON
    #[error("Invalid CloudEvent overrides: {0}")]
    Overrides(#[source] serde_json::Error),
}

/// Errors raised while reading the MongoDB connection string.
#[derive(Debug, Error)]
pub enum CredentialsError {
    /// The `URI` file could not be read
    #[error("Unable to read MongoDB URI from {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The `URI` file exists but holds no connection string
    #[error("MongoDB URI file {path} is empty")]
    Empty { path: PathBuf },
}

/// Raw environment of the receive adapter.
#[derive(Debug, Envconfig)]
pub struct EnvConfig {
    #[envconfig(from = "MONGODB_CREDENTIALS")]
    pub credentials_path: String,

    #[envconfig(from = "MONGODB_DATABASE")]
    pub database: String,

    #[envconfig(from = "MONGODB_COLLECTION")]
    pub collection: Option<String>,

    #[envconfig(from = "MONGODB_UPDATE_LOOKUP", default = "true")]
    pub update_lookup: bool,

    #[envconfig(from = "CE_SOURCE_PREFIX")]
    pub source_prefix: String,

    #[envconfig(from = "CE_SOURCE_TEMPLATE")]
    pub source_template: Option<String>,

    #[envconfig(from = "K_SINK")]
    pub sink: String,

    #[envconfig(from = "K_SINK_TIMEOUT_SECS", default = "30")]
    pub sink_timeout_secs: u64,

    #[envconfig(from = "K_CE_OVERRIDES")]
    pub ce_overrides: Option<String>,

    #[envconfig(from = "NAME")]
    pub name: Option<String>,

    #[envconfig(from = "NAMESPACE")]
    pub namespace: Option<String>,

    #[envconfig(from = "METRICS_ADDR")]
    pub metrics_addr: Option<String>,
}

/// CloudEvent attribute overrides applied to every outgoing event.
///
/// Parsed from the `K_CE_OVERRIDES` JSON document, e.g.
/// `{"extensions": {"team": "payments"}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CloudEventOverrides {
    /// Extension attributes added to each event
    #[serde(default)]
    pub extensions: BTreeMap<String, String>,
}

impl CloudEventOverrides {
    /// Parses and validates overrides from their JSON form.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or an extension name is not a
    /// valid, non-reserved CloudEvents attribute name.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let overrides: Self = serde_json::from_str(json).map_err(ConfigError::Overrides)?;
        overrides.validate()?;
        Ok(overrides)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for name in self.extensions.keys() {
            let well_formed = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
            if !well_formed {
                return Err(ConfigError::Invalid {
                    name: "K_CE_OVERRIDES",
                    reason: format!("extension name `{name}` must be lowercase alphanumeric"),
                });
            }
            if RESERVED_ATTRIBUTES.contains(&name.as_str()) {
                return Err(ConfigError::Invalid {
                    name: "K_CE_OVERRIDES",
                    reason: format!("extension name `{name}` is a reserved attribute"),
                });
            }
        }
        Ok(())
    }
}

/// Validated adapter configuration.
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Database to watch
    pub database: String,

    /// Collection to watch; `None` watches the whole database
    pub collection: Option<String>,

    /// Directory holding the `URI` credentials file
    pub credentials_path: PathBuf,

    /// Destination of delivered events
    pub sink: Url,

    /// Prefix of the envelope source
    pub source_prefix: String,

    /// Source format with `{prefix}`, `{database}` and `{collection}` placeholders
    pub source_template: String,

    /// Extension attributes copied onto every event
    pub overrides: CloudEventOverrides,

    /// Per-request timeout of the sink client
    pub sink_timeout: Duration,

    /// Ask the server for the full document on update events
    pub full_document_on_update: bool,

    /// Name of the owning source resource
    pub name: Option<String>,

    /// Namespace of the owning source resource
    pub namespace: Option<String>,

    /// Listen address of the metrics exporter
    pub metrics_addr: Option<SocketAddr>,
}

impl AdapterConfig {
    /// Creates a new builder for `AdapterConfig`.
    #[must_use]
    pub fn builder() -> AdapterConfigBuilder {
        AdapterConfigBuilder::default()
    }

    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::try_from(EnvConfig::init_from_env()?)
    }

    /// Loads the configuration from an explicit variable map.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value is invalid.
    pub fn from_env_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::try_from(EnvConfig::init_from_hashmap(vars)?)
    }

    /// Returns the watch scope selected by this configuration.
    #[must_use]
    pub fn watch_level(&self) -> WatchLevel {
        match &self.collection {
            Some(collection) => WatchLevel::Collection(collection.clone()),
            None => WatchLevel::Database,
        }
    }

    /// Returns the path of the file holding the connection string.
    #[must_use]
    pub fn credentials_file(&self) -> PathBuf {
        self.credentials_path.join(CREDENTIALS_URI_FILE)
    }
}

impl TryFrom<EnvConfig> for AdapterConfig {
    type Error = ConfigError;

    fn try_from(env: EnvConfig) -> Result<Self, Self::Error> {
        let mut builder = AdapterConfig::builder()
            .database(env.database)
            .credentials_path(env.credentials_path)
            .sink(env.sink)
            .source_prefix(env.source_prefix)
            .sink_timeout(Duration::from_secs(env.sink_timeout_secs))
            .full_document_on_update(env.update_lookup);

        if let Some(collection) = env.collection {
            builder = builder.collection(collection);
        }
        if let Some(template) = env.source_template {
            builder = builder.source_template(template);
        }
        if let Some(json) = env.ce_overrides.filter(|json| !json.trim().is_empty()) {
            builder = builder.overrides(CloudEventOverrides::from_json(&json)?);
        }
        if let Some(name) = env.name {
            builder = builder.name(name);
        }
        if let Some(namespace) = env.namespace {
            builder = builder.namespace(namespace);
        }
        if let Some(addr) = env.metrics_addr.filter(|addr| !addr.is_empty()) {
            let addr = addr.parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::Invalid {
                    name: "METRICS_ADDR",
                    reason: e.to_string(),
                }
            })?;
            builder = builder.metrics_addr(addr);
        }

        builder.build()
    }
}

/// Builder for `AdapterConfig`.
#[derive(Debug, Default)]
pub struct AdapterConfigBuilder {
    database: Option<String>,
    collection: Option<String>,
    credentials_path: Option<PathBuf>,
    sink: Option<String>,
    source_prefix: Option<String>,
    source_template: Option<String>,
    overrides: CloudEventOverrides,
    sink_timeout: Option<Duration>,
    full_document_on_update: Option<bool>,
    name: Option<String>,
    namespace: Option<String>,
    metrics_addr: Option<SocketAddr>,
}

impl AdapterConfigBuilder {
    /// Sets the database to watch.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Restricts the watch to one collection. An empty name watches the whole database.
    #[must_use]
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Sets the directory holding the `URI` credentials file.
    #[must_use]
    pub fn credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = Some(path.into());
        self
    }

    /// Sets the sink URL.
    #[must_use]
    pub fn sink(mut self, sink: impl Into<String>) -> Self {
        self.sink = Some(sink.into());
        self
    }

    /// Sets the envelope source prefix.
    #[must_use]
    pub fn source_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.source_prefix = Some(prefix.into());
        self
    }

    /// Overrides the envelope source format.
    #[must_use]
    pub fn source_template(mut self, template: impl Into<String>) -> Self {
        self.source_template = Some(template.into());
        self
    }

    /// Sets the CloudEvent overrides.
    #[must_use]
    pub fn overrides(mut self, overrides: CloudEventOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Sets the per-request sink timeout.
    #[must_use]
    pub fn sink_timeout(mut self, timeout: Duration) -> Self {
        self.sink_timeout = Some(timeout);
        self
    }

    /// Enables or disables the full-document lookup for update events.
    #[must_use]
    pub fn full_document_on_update(mut self, enabled: bool) -> Self {
        self.full_document_on_update = Some(enabled);
        self
    }

    /// Sets the owning resource name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the owning resource namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Enables the metrics exporter on the given address.
    #[must_use]
    pub fn metrics_addr(mut self, addr: SocketAddr) -> Self {
        self.metrics_addr = Some(addr);
        self
    }

    /// Builds the `AdapterConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is missing, the database name is
    /// empty, the sink is not an absolute http(s) URL or the timeout is zero.
    pub fn build(self) -> Result<AdapterConfig, ConfigError> {
        let database = self.database.ok_or(ConfigError::Missing("database"))?;
        if database.trim().is_empty() {
            return Err(ConfigError::Invalid {
                name: "database",
                reason: "must not be empty".to_string(),
            });
        }

        let credentials_path = self
            .credentials_path
            .ok_or(ConfigError::Missing("credentials_path"))?;
        let source_prefix = self
            .source_prefix
            .ok_or(ConfigError::Missing("source_prefix"))?;

        let sink = self.sink.ok_or(ConfigError::Missing("sink"))?;
        let sink = parse_sink(&sink)?;

        let sink_timeout = self.sink_timeout.unwrap_or(DEFAULT_SINK_TIMEOUT);
        if sink_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: "sink_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }

        let source_template = self
            .source_template
            .filter(|template| !template.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SOURCE_TEMPLATE.to_string());

        self.overrides.validate()?;

        Ok(AdapterConfig {
            database,
            collection: self.collection.filter(|c| !c.is_empty()),
            credentials_path,
            sink,
            source_prefix,
            source_template,
            overrides: self.overrides,
            sink_timeout,
            full_document_on_update: self.full_document_on_update.unwrap_or(true),
            name: self.name,
            namespace: self.namespace,
            metrics_addr: self.metrics_addr,
        })
    }
}

fn parse_sink(sink: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(sink).map_err(|e| ConfigError::Invalid {
        name: "sink",
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ConfigError::Invalid {
            name: "sink",
            reason: format!("unsupported scheme `{scheme}`"),
        }),
    }
}

/// Reads the MongoDB connection string from `<dir>/URI`.
///
/// Trailing whitespace (such as the newline most secret tooling appends) is stripped.
///
/// # Errors
///
/// Returns an error if the file cannot be read or holds an empty string.
pub async fn read_connection_uri(dir: &Path) -> Result<String, CredentialsError> {
    let path = dir.join(CREDENTIALS_URI_FILE);
    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| CredentialsError::Unreadable {
            path: path.clone(),
            source,
        })?;

    let uri = raw.trim_end();
    if uri.is_empty() {
        return Err(CredentialsError::Empty { path });
    }

    Ok(uri.to_string())
}
