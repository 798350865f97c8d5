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

//! Adapter bootstrap.
//!
//! [`Adapter`] wires configuration, credentials, the MongoDB client, the change
//! source, the mapper and the sink together and runs one [`StreamConsumer`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tributary_core::adapter::Adapter;
//! use tributary_core::config::AdapterConfig;
//! use tributary_core::sink::MockSink;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AdapterConfig::from_env()?;
//! let adapter = Adapter::new(config, Arc::new(MockSink::new()));
//!
//! let cancel = CancellationToken::new();
//! let stats = adapter.start(cancel).await?;
//! println!("delivered {} events", stats.delivered);
//! # Ok(())
//! # }
//! ```

use crate::config::{read_connection_uri, AdapterConfig, ConfigError, CredentialsError};
use crate::consumer::{ConsumerStats, StreamConsumer};
use crate::envelope::{EventMapper, EventTypeMap};
use crate::metrics::{self, AdapterStatus};
use crate::sink::{EventSink, SinkError};
use crate::stream::{ChangeSource, ChangeStreamConfig, MongoChangeSource, StreamError};
use mongodb::Client;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Fatal adapter errors.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The connection string could not be read
    #[error("Credentials error: {0}")]
    Credentials(#[from] CredentialsError),

    /// The MongoDB client could not be created
    #[error("MongoDB client error: {0}")]
    Client(#[source] mongodb::error::Error),

    /// The change stream could not be opened
    #[error("Change stream error: {0}")]
    Stream(#[from] StreamError),

    /// The sink could not be created
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

/// The receive adapter.
pub struct Adapter {
    config: AdapterConfig,
    mapper: EventMapper,
    sink: Arc<dyn EventSink>,
}

impl Adapter {
    /// Creates an adapter with the default event type table.
    #[must_use]
    pub fn new(config: AdapterConfig, sink: Arc<dyn EventSink>) -> Self {
        let mapper = EventMapper::new(&config, EventTypeMap::default());
        Self {
            config,
            mapper,
            sink,
        }
    }

    /// Replaces the event type table.
    #[must_use]
    pub fn with_event_types(mut self, types: EventTypeMap) -> Self {
        self.mapper = EventMapper::new(&self.config, types);
        self
    }

    /// Returns the adapter configuration.
    #[must_use]
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Connects to MongoDB and consumes the configured change stream until it
    /// closes or `cancel` fires.
    ///
    /// The client is shut down before returning, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials cannot be read, the client cannot be
    /// created or the change stream cannot be opened.
    #[instrument(skip_all, fields(database = %self.config.database))]
    pub async fn start(&self, cancel: CancellationToken) -> Result<ConsumerStats, AdapterError> {
        let level = self.config.watch_level();
        info!(
            name = self.config.name.as_deref().unwrap_or_default(),
            namespace = self.config.namespace.as_deref().unwrap_or_default(),
            watch = %level,
            sink = %self.config.sink,
            "Starting receive adapter"
        );

        let uri = read_connection_uri(&self.config.credentials_path)
            .await
            .inspect_err(|e| {
                error!(error = %e, "Failed to read MongoDB credentials");
                metrics::set_adapter_status(AdapterStatus::Error);
            })?;

        let client = Client::with_uri_str(&uri).await.map_err(|e| {
            error!(error = %e, "Failed to create MongoDB client");
            metrics::set_adapter_status(AdapterStatus::Error);
            AdapterError::Client(e)
        })?;

        let stream_config = ChangeStreamConfig::builder()
            .full_document_update_lookup(self.config.full_document_on_update)
            .build()?;
        let source =
            MongoChangeSource::new(&client, &self.config.database, &level, stream_config);

        let result = self.run_with_source(&source, cancel).await;

        drop(source);
        client.shutdown().await;
        info!("MongoDB client shut down");

        result
    }

    /// Runs the consumer loop against any change source.
    ///
    /// The sink is closed before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the change stream cannot be opened.
    pub async fn run_with_source(
        &self,
        source: &dyn ChangeSource,
        cancel: CancellationToken,
    ) -> Result<ConsumerStats, AdapterError> {
        metrics::set_adapter_status(AdapterStatus::Running);

        let mut consumer = StreamConsumer::new(self.mapper.clone(), Arc::clone(&self.sink));
        let result = consumer.run(source, &cancel).await;

        if let Err(e) = self.sink.close().await {
            warn!(error = %e, "Failed to close sink");
        }

        match result {
            Ok(stats) => {
                metrics::set_adapter_status(AdapterStatus::Stopped);
                Ok(stats)
            }
            Err(e) => {
                metrics::set_adapter_status(AdapterStatus::Error);
                Err(AdapterError::Stream(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MockSink;
    use crate::stream::ScriptedSource;
    use std::fs;

    fn config(credentials: &std::path::Path) -> AdapterConfig {
        AdapterConfig::builder()
            .database("db")
            .credentials_path(credentials)
            .sink("http://sink")
            .source_prefix("CEPrefix")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_credentials_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = Adapter::new(config(dir.path()), Arc::new(MockSink::new()));

        let result = adapter.start(CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(AdapterError::Credentials(CredentialsError::Unreadable { .. }))
        ));
    }

    #[tokio::test]
    async fn test_empty_credentials_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("URI"), "  \n").unwrap();
        let adapter = Adapter::new(config(dir.path()), Arc::new(MockSink::new()));

        let result = adapter.start(CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(AdapterError::Credentials(CredentialsError::Empty { .. }))
        ));
    }

    #[tokio::test]
    async fn test_invalid_uri_is_a_client_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("URI"), "not-a-mongodb-uri\n").unwrap();
        let adapter = Adapter::new(config(dir.path()), Arc::new(MockSink::new()));

        let result = adapter.start(CancellationToken::new()).await;
        assert!(matches!(result, Err(AdapterError::Client(_))));
    }

    #[tokio::test]
    async fn test_run_with_source_closes_sink() {
        let sink = Arc::new(MockSink::new());
        let adapter = Adapter::new(config(std::path::Path::new("/creds")), sink.clone());
        let source = ScriptedSource::new(Vec::new());

        let stats = adapter
            .run_with_source(&source, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.received, 0);
        assert_eq!(sink.close_count(), 1);
        assert_eq!(source.close_count(), 1);
    }
}
