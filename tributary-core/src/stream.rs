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

//! Change stream sources and cursors.
//!
//! The consumer loop reads changes through two small traits:
//!
//! - [`ChangeSource`] opens a stream. It is selected once at startup and never
//!   changes afterwards.
//! - [`ChangeCursor`] is the open stream. [`ChangeCursor::advance`] is the
//!   single suspension point of the loop: it blocks until a record is ready,
//!   the stream ends, the transport fails or the cancellation token fires.
//!
//! [`MongoChangeSource`] implements both over the MongoDB driver. Records are
//! pulled as [`RawDocumentBuf`] so that a record that cannot be materialized
//! into a [`Document`] fails on its own, through [`ChangeCursor::decode`],
//! without terminating the stream.
//!
//! [`ScriptedSource`] replays a fixed list of steps and is used to test the
//! loop without a server.
//!
//! # Example
//!
//! ```rust,no_run
//! use tributary_core::stream::{Advance, ChangeSource, ChangeStreamConfig, MongoChangeSource};
//! use tributary_core::watch_level::WatchLevel;
//! use tokio_util::sync::CancellationToken;
//! use mongodb::Client;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let client = Client::with_uri_str("mongodb://localhost:27017/?replicaSet=rs0").await?;
//! let source = MongoChangeSource::new(
//!     &client,
//!     "shop",
//!     &WatchLevel::Collection("orders".to_string()),
//!     ChangeStreamConfig::default(),
//! );
//!
//! let cancel = CancellationToken::new();
//! let mut cursor = source.watch().await?;
//! while let Advance::Ready = cursor.advance(&cancel).await {
//!     println!("{:?}", cursor.decode()?);
//! }
//! cursor.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::watch_level::WatchLevel;
use async_trait::async_trait;
use bson::{Document, RawDocumentBuf};
use futures::StreamExt;
use mongodb::{
    change_stream::ChangeStream,
    error::{Error as MongoError, ErrorKind as MongoErrorKind},
    options::{ChangeStreamOptions, FullDocumentType},
    Client, Collection, Database,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Errors that open or terminate a change stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// MongoDB connection or command error
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        /// MongoDB error code
        code: Option<i32>,
        /// MongoDB error labels (e.g., "NetworkError")
        labels: Vec<String>,
    },

    /// Change stream history is no longer available (error code 286)
    #[error("Change stream history lost (code {code})")]
    HistoryLost { code: i32 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<MongoError> for StreamError {
    fn from(err: MongoError) -> Self {
        Self::from_mongo_error(err)
    }
}

impl StreamError {
    /// Creates a StreamError from a MongoDB error with proper classification.
    pub fn from_mongo_error(err: MongoError) -> Self {
        let code = match err.kind.as_ref() {
            MongoErrorKind::Command(cmd_err) => Some(cmd_err.code),
            _ => None,
        };

        if code == Some(286) {
            return Self::HistoryLost { code: 286 };
        }

        let labels: Vec<String> = err.labels().iter().cloned().collect();

        Self::Connection {
            message: err.to_string(),
            source: Some(Box::new(err)),
            code,
            labels,
        }
    }

    /// Returns true if the failure is transient (failover, network blip).
    ///
    /// Only reported in logs; the adapter never reconnects on its own.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { code, labels, .. } => {
                if labels.iter().any(|l| {
                    l == "RetryableWriteError"
                        || l == "TransientTransactionError"
                        || l == "NetworkError"
                }) {
                    return true;
                }

                matches!(
                    code,
                    Some(
                        6 |     // HostUnreachable
                        7 |     // HostNotFound
                        89 |    // NetworkTimeout
                        91 |    // ShutdownInProgress
                        10107 | // NotPrimary
                        11600 | // InterruptedAtShutdown
                        11602 | // InterruptedDueToReplStateChange
                        13435 | // NotPrimaryNoSecondaryOk
                        13436 | // NotPrimaryOrSecondary
                        43      // CursorNotFound
                    )
                )
            }
            Self::HistoryLost { .. } | Self::Configuration(_) => false,
        }
    }

    /// Returns the error category for metrics/logging.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::HistoryLost { .. } => "history_lost",
            Self::Configuration(_) => "configuration",
        }
    }
}

/// Per-record cursor errors. These never terminate the stream.
#[derive(Debug, Error)]
pub enum CursorError {
    /// The raw record could not be materialized into a document
    #[error("Malformed change record: {0}")]
    Malformed(String),

    /// `decode` was called without a current record
    #[error("No current record")]
    NoCurrent,
}

/// Outcome of [`ChangeCursor::advance`].
#[derive(Debug)]
pub enum Advance {
    /// A record is ready; read it with [`ChangeCursor::decode`]
    Ready,

    /// The cancellation token fired
    Cancelled,

    /// The stream ended normally
    Exhausted,

    /// The transport failed
    Terminated(StreamError),
}

impl Advance {
    /// Returns the label used for the stream-closed metric, or `None` for [`Advance::Ready`].
    #[must_use]
    pub fn close_reason(&self) -> Option<&'static str> {
        match self {
            Self::Ready => None,
            Self::Cancelled => Some("cancelled"),
            Self::Exhausted => Some("exhausted"),
            Self::Terminated(_) => Some("terminated"),
        }
    }
}

/// An open change stream.
#[async_trait]
pub trait ChangeCursor: Send {
    /// Waits for the next record.
    ///
    /// Cancellation is observed before and while waiting, never in the middle of
    /// handing out a record.
    async fn advance(&mut self, cancel: &CancellationToken) -> Advance;

    /// Materializes the record made current by the last [`Advance::Ready`].
    ///
    /// # Errors
    ///
    /// Returns [`CursorError::Malformed`] if the raw bytes are not a valid
    /// document, or [`CursorError::NoCurrent`] if no record is current.
    fn decode(&self) -> Result<Document, CursorError>;

    /// Releases the cursor. Calling it more than once is harmless.
    async fn close(&mut self) -> Result<(), CursorError>;
}

/// Opens change streams.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Opens a new stream starting from "now".
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the watch request.
    async fn watch(&self) -> Result<Box<dyn ChangeCursor>, StreamError>;

    /// Returns a short description of what is watched, for logs.
    fn describe(&self) -> String;
}

/// Options for opening MongoDB change streams.
///
/// Streams are always opened without an aggregation pipeline, so every change is delivered.
///
/// ```rust
/// use tributary_core::stream::ChangeStreamConfig;
///
/// let config = ChangeStreamConfig::builder()
///     .full_document_update_lookup(false)
///     .batch_size(100)
///     .build()
///     .unwrap();
/// assert_eq!(config.batch_size, Some(100));
/// ```
#[derive(Debug, Clone)]
pub struct ChangeStreamConfig {
    /// Whether to look up the full document for update operations
    pub full_document_on_update: bool,

    /// Batch size for fetching events
    pub batch_size: Option<u32>,
}

impl Default for ChangeStreamConfig {
    fn default() -> Self {
        Self {
            full_document_on_update: true,
            batch_size: None,
        }
    }
}

impl ChangeStreamConfig {
    /// Creates a new builder for configuring a change stream.
    #[must_use]
    pub fn builder() -> ChangeStreamConfigBuilder {
        ChangeStreamConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `batch_size` is zero.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.batch_size == Some(0) {
            return Err(StreamError::Configuration(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    fn to_mongo_options(&self) -> ChangeStreamOptions {
        let mut options = ChangeStreamOptions::default();

        if self.full_document_on_update {
            options.full_document = Some(FullDocumentType::UpdateLookup);
        }
        options.batch_size = self.batch_size;

        options
    }
}

/// Builder for [`ChangeStreamConfig`].
#[derive(Debug, Default)]
pub struct ChangeStreamConfigBuilder {
    full_document_on_update: Option<bool>,
    batch_size: Option<u32>,
}

impl ChangeStreamConfigBuilder {
    /// Enables or disables the full-document lookup for updates. Enabled by default.
    #[must_use]
    pub fn full_document_update_lookup(mut self, enabled: bool) -> Self {
        self.full_document_on_update = Some(enabled);
        self
    }

    /// Sets the batch size for fetching events from MongoDB.
    #[must_use]
    pub fn batch_size(mut self, size: u32) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::Configuration` if validation fails.
    pub fn build(self) -> Result<ChangeStreamConfig, StreamError> {
        let config = ChangeStreamConfig {
            full_document_on_update: self.full_document_on_update.unwrap_or(true),
            batch_size: self.batch_size,
        };

        config.validate()?;
        Ok(config)
    }
}

enum WatchTarget {
    Collection(Collection<Document>),
    Database(Database),
}

/// Change source backed by the MongoDB driver.
pub struct MongoChangeSource {
    target: WatchTarget,
    config: ChangeStreamConfig,
}

impl MongoChangeSource {
    /// Selects the collection- or database-scoped source for `level`.
    #[must_use]
    pub fn new(
        client: &Client,
        database: &str,
        level: &WatchLevel,
        config: ChangeStreamConfig,
    ) -> Self {
        let db = client.database(database);
        let target = match level {
            WatchLevel::Collection(name) => WatchTarget::Collection(db.collection(name)),
            WatchLevel::Database => WatchTarget::Database(db),
        };

        Self { target, config }
    }
}

#[async_trait]
impl ChangeSource for MongoChangeSource {
    async fn watch(&self) -> Result<Box<dyn ChangeCursor>, StreamError> {
        let options = self.config.to_mongo_options();

        info!(source = %self.describe(), "Opening change stream");

        let stream = match &self.target {
            WatchTarget::Collection(collection) => collection.watch().with_options(options).await?,
            WatchTarget::Database(database) => database.watch().with_options(options).await?,
        };

        Ok(Box::new(MongoCursor {
            stream: Some(stream.with_type::<RawDocumentBuf>()),
            current: None,
        }))
    }

    fn describe(&self) -> String {
        match &self.target {
            WatchTarget::Collection(collection) => {
                let ns = collection.namespace();
                format!("collection {}.{}", ns.db, ns.coll)
            }
            WatchTarget::Database(database) => format!("database {}", database.name()),
        }
    }
}

struct MongoCursor {
    stream: Option<ChangeStream<RawDocumentBuf>>,
    current: Option<RawDocumentBuf>,
}

#[async_trait]
impl ChangeCursor for MongoCursor {
    async fn advance(&mut self, cancel: &CancellationToken) -> Advance {
        self.current = None;
        let Some(stream) = self.stream.as_mut() else {
            return Advance::Exhausted;
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Advance::Cancelled,
            next = stream.next() => match next {
                Some(Ok(raw)) => {
                    self.current = Some(raw);
                    Advance::Ready
                }
                Some(Err(e)) => Advance::Terminated(StreamError::from_mongo_error(e)),
                None => Advance::Exhausted,
            },
        }
    }

    fn decode(&self) -> Result<Document, CursorError> {
        self.current
            .as_ref()
            .ok_or(CursorError::NoCurrent)?
            .to_document()
            .map_err(|e| CursorError::Malformed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), CursorError> {
        // Dropping the driver stream kills the server-side cursor.
        if self.stream.take().is_some() {
            debug!("Change stream cursor released");
        }
        self.current = None;
        Ok(())
    }
}

/// One step replayed by a [`ScriptedSource`].
#[derive(Debug)]
pub enum ScriptStep {
    /// Hand out a record
    Record(Document),

    /// Hand out a record whose materialization fails with the given message
    Malformed(String),

    /// Terminate the stream with an error
    Fail(StreamError),
}

#[derive(Debug, Default)]
struct ScriptCounters {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// In-memory change source for testing.
///
/// Replays its steps once, in order, to the first cursor it opens. Once the
/// script runs out the cursor reports [`Advance::Exhausted`], or blocks until
/// cancelled when built with [`ScriptedSource::hold_open`].
///
/// ```rust
/// use tributary_core::stream::{ScriptStep, ScriptedSource};
/// use bson::doc;
///
/// let source = ScriptedSource::new(vec![
///     ScriptStep::Record(doc! { "operationType": "insert" }),
///     ScriptStep::Malformed("truncated".to_string()),
/// ]);
/// assert_eq!(source.close_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct ScriptedSource {
    steps: Mutex<Option<VecDeque<ScriptStep>>>,
    hold_open: bool,
    fail_open: bool,
    counters: Arc<ScriptCounters>,
}

impl ScriptedSource {
    /// Creates a source that replays `steps`.
    #[must_use]
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(Some(steps.into())),
            ..Self::default()
        }
    }

    /// Creates a source that replays one record per document.
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = Document>) -> Self {
        Self::new(records.into_iter().map(ScriptStep::Record).collect())
    }

    /// Keeps the stream open after the last step until the token is cancelled.
    #[must_use]
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Makes [`ChangeSource::watch`] fail.
    #[must_use]
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Returns how many cursors were opened.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Returns how many cursors were closed.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChangeSource for ScriptedSource {
    async fn watch(&self) -> Result<Box<dyn ChangeCursor>, StreamError> {
        if self.fail_open {
            return Err(StreamError::Connection {
                message: "simulated open failure".to_string(),
                source: None,
                code: None,
                labels: Vec::new(),
            });
        }

        let steps = self
            .steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();
        self.counters.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(ScriptedCursor {
            steps,
            current: None,
            hold_open: self.hold_open,
            closed: false,
            counters: Arc::clone(&self.counters),
        }))
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

struct ScriptedCursor {
    steps: VecDeque<ScriptStep>,
    current: Option<Result<Document, String>>,
    hold_open: bool,
    closed: bool,
    counters: Arc<ScriptCounters>,
}

#[async_trait]
impl ChangeCursor for ScriptedCursor {
    async fn advance(&mut self, cancel: &CancellationToken) -> Advance {
        self.current = None;
        if cancel.is_cancelled() {
            return Advance::Cancelled;
        }
        if self.closed {
            return Advance::Exhausted;
        }

        match self.steps.pop_front() {
            Some(ScriptStep::Record(doc)) => {
                self.current = Some(Ok(doc));
                Advance::Ready
            }
            Some(ScriptStep::Malformed(reason)) => {
                self.current = Some(Err(reason));
                Advance::Ready
            }
            Some(ScriptStep::Fail(err)) => Advance::Terminated(err),
            None if self.hold_open => {
                cancel.cancelled().await;
                Advance::Cancelled
            }
            None => Advance::Exhausted,
        }
    }

    fn decode(&self) -> Result<Document, CursorError> {
        match &self.current {
            Some(Ok(doc)) => Ok(doc.clone()),
            Some(Err(reason)) => Err(CursorError::Malformed(reason.clone())),
            None => Err(CursorError::NoCurrent),
        }
    }

    async fn close(&mut self) -> Result<(), CursorError> {
        if !self.closed {
            self.closed = true;
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_config_defaults() {
        let config = ChangeStreamConfig::default();
        assert!(config.full_document_on_update);
        assert_eq!(config.batch_size, None);

        let options = config.to_mongo_options();
        assert!(matches!(
            options.full_document,
            Some(FullDocumentType::UpdateLookup)
        ));
    }

    #[test]
    fn test_config_rejects_zero_batch_size() {
        let result = ChangeStreamConfig::builder().batch_size(0).build();
        assert!(matches!(result, Err(StreamError::Configuration(_))));
    }

    #[test]
    fn test_lookup_can_be_disabled() {
        let config = ChangeStreamConfig::builder()
            .full_document_update_lookup(false)
            .build()
            .unwrap();
        assert!(config.to_mongo_options().full_document.is_none());
    }

    #[test]
    fn test_error_classification() {
        let transient = StreamError::Connection {
            message: "not primary".to_string(),
            source: None,
            code: Some(10107),
            labels: Vec::new(),
        };
        assert!(transient.is_retryable());
        assert_eq!(transient.category(), "connection");

        let labelled = StreamError::Connection {
            message: "reset".to_string(),
            source: None,
            code: None,
            labels: vec!["NetworkError".to_string()],
        };
        assert!(labelled.is_retryable());

        assert!(!StreamError::HistoryLost { code: 286 }.is_retryable());
        assert_eq!(StreamError::HistoryLost { code: 286 }.category(), "history_lost");
    }

    #[tokio::test]
    async fn test_scripted_cursor_replays_steps() {
        let source = ScriptedSource::new(vec![
            ScriptStep::Record(doc! { "n": 1 }),
            ScriptStep::Malformed("bad bytes".to_string()),
        ]);
        let cancel = CancellationToken::new();
        let mut cursor = source.watch().await.unwrap();

        assert!(matches!(cursor.advance(&cancel).await, Advance::Ready));
        assert_eq!(cursor.decode().unwrap(), doc! { "n": 1 });

        assert!(matches!(cursor.advance(&cancel).await, Advance::Ready));
        assert!(matches!(cursor.decode(), Err(CursorError::Malformed(_))));

        assert!(matches!(cursor.advance(&cancel).await, Advance::Exhausted));
        assert!(matches!(cursor.decode(), Err(CursorError::NoCurrent)));

        cursor.close().await.unwrap();
        cursor.close().await.unwrap();
        assert_eq!(source.open_count(), 1);
        assert_eq!(source.close_count(), 1);
    }

    #[tokio::test]
    async fn test_held_cursor_waits_for_cancellation() {
        let source = ScriptedSource::new(Vec::new()).hold_open();
        let cancel = CancellationToken::new();
        let mut cursor = source.watch().await.unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        assert!(matches!(cursor.advance(&cancel).await, Advance::Cancelled));
    }

    #[test]
    fn test_close_reasons() {
        assert_eq!(Advance::Ready.close_reason(), None);
        assert_eq!(Advance::Cancelled.close_reason(), Some("cancelled"));
        assert_eq!(Advance::Exhausted.close_reason(), Some("exhausted"));
        assert_eq!(
            Advance::Terminated(StreamError::Configuration("x".to_string())).close_reason(),
            Some("terminated")
        );
    }
}
