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

//! Stream consumer loop.
//!
//! [`StreamConsumer`] pulls one record at a time from a [`ChangeSource`],
//! decodes it, maps it to an envelope and hands it to the [`EventSink`].
//!
//! ```text
//! Idle ──watch()──▶ Open ──▶ Consuming ──end / error / cancel──▶ Closed
//!   │                                                              ▲
//!   └──────────────────────── watch() failed ──────────────────────┘
//! ```
//!
//! A record that fails at any stage is logged, counted and skipped; it never
//! stops the loop. Only the stream itself ending, failing or being cancelled
//! moves the consumer to `Closed`, and the cursor is released on every one of
//! those paths.

use crate::envelope::EventMapper;
use crate::event::decode_change;
use crate::metrics::{self, ErrorCategory, Timer};
use crate::sink::{DeliveryResult, EventSink};
use crate::stream::{Advance, ChangeSource, CursorError, StreamError};
use bson::Document;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Lifecycle state of a [`StreamConsumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Created, stream not opened yet
    Idle,
    /// Stream opened
    Open,
    /// Pulling records
    Consuming,
    /// Stream released; terminal
    Closed,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Open => "open",
            Self::Consuming => "consuming",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why the stream closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The cancellation token fired
    Cancelled,
    /// The stream ended normally
    Exhausted,
    /// The transport failed; holds the error message
    Terminated(String),
}

/// Counters of one consumer run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Records pulled from the stream
    pub received: u64,

    /// Events acknowledged by the sink
    pub delivered: u64,

    /// Events the sink did not accept
    pub undelivered: u64,

    /// Records that could not be materialized or decoded
    pub decode_failures: u64,

    /// Changes that could not be mapped to an event
    pub mapping_failures: u64,

    /// Set once the stream has closed
    pub closed_by: Option<CloseReason>,
}

impl ConsumerStats {
    /// Returns the number of records dropped before or during delivery.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.undelivered + self.decode_failures + self.mapping_failures
    }
}

/// Pulls, decodes, maps and delivers change records, one at a time.
pub struct StreamConsumer {
    mapper: EventMapper,
    sink: Arc<dyn EventSink>,
    state: ConsumerState,
}

impl StreamConsumer {
    /// Creates an idle consumer.
    #[must_use]
    pub fn new(mapper: EventMapper, sink: Arc<dyn EventSink>) -> Self {
        Self {
            mapper,
            sink,
            state: ConsumerState::Idle,
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Opens the stream and consumes it until it closes.
    ///
    /// A consumer runs once; calling `run` again after it returned is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be opened. Everything that happens
    /// after the stream is open, including transport failures, ends the run
    /// normally and is reported through [`ConsumerStats::closed_by`].
    #[instrument(skip_all, fields(source = %source.describe()))]
    pub async fn run(
        &mut self,
        source: &dyn ChangeSource,
        cancel: &CancellationToken,
    ) -> Result<ConsumerStats, StreamError> {
        if self.state != ConsumerState::Idle {
            return Err(StreamError::Configuration(format!(
                "consumer cannot be restarted (state: {})",
                self.state
            )));
        }

        let mut cursor = match source.watch().await {
            Ok(cursor) => cursor,
            Err(e) => {
                self.state = ConsumerState::Closed;
                error!(error = %e, category = e.category(), "Failed to open change stream");
                return Err(e);
            }
        };
        self.state = ConsumerState::Open;
        info!("Change stream opened");

        self.state = ConsumerState::Consuming;
        let mut stats = ConsumerStats::default();

        let outcome = loop {
            match cursor.advance(cancel).await {
                Advance::Ready => {
                    stats.received += 1;
                    metrics::increment_changes_received();
                    let raw = cursor.decode();
                    self.process(raw, &mut stats).await;
                }
                closed => break closed,
            }
        };

        if let Err(e) = cursor.close().await {
            warn!(error = %e, "Failed to close change stream cursor");
        }
        self.state = ConsumerState::Closed;

        if let Some(reason) = outcome.close_reason() {
            metrics::increment_stream_closed(reason);
        }
        let closed_by = match outcome {
            Advance::Cancelled => {
                info!("Change stream consumer cancelled");
                CloseReason::Cancelled
            }
            Advance::Terminated(e) => {
                warn!(
                    error = %e,
                    category = e.category(),
                    retryable = e.is_retryable(),
                    "Change stream terminated"
                );
                CloseReason::Terminated(e.to_string())
            }
            Advance::Exhausted | Advance::Ready => {
                info!("Change stream exhausted");
                CloseReason::Exhausted
            }
        };
        stats.closed_by = Some(closed_by);

        info!(
            received = stats.received,
            delivered = stats.delivered,
            undelivered = stats.undelivered,
            decode_failures = stats.decode_failures,
            mapping_failures = stats.mapping_failures,
            "Change stream consumer stopped"
        );

        Ok(stats)
    }

    async fn process(&self, raw: Result<Document, CursorError>, stats: &mut ConsumerStats) {
        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => {
                stats.decode_failures += 1;
                metrics::increment_events_failed(ErrorCategory::Cursor);
                warn!(error = %e, "Skipping unreadable change record");
                return;
            }
        };

        let change = match decode_change(&raw) {
            Ok(change) => change,
            Err(e) => {
                stats.decode_failures += 1;
                metrics::increment_events_failed(ErrorCategory::Decode);
                warn!(field = e.field(), error = %e, "Skipping malformed change record");
                return;
            }
        };

        let event = match self.mapper.map_to_event(&change) {
            Ok(event) => event,
            Err(e) => {
                stats.mapping_failures += 1;
                metrics::increment_events_failed(ErrorCategory::Mapping);
                warn!(
                    operation = %change.operation,
                    collection = change.collection_name(),
                    error = %e,
                    "Failed to create event from change"
                );
                return;
            }
        };

        let sink_type = self.sink.metadata().sink_type;
        let result = {
            let _timer = Timer::new(sink_type.as_str(), metrics::record_delivery_duration);
            self.sink.send(&event).await
        };

        match result {
            DeliveryResult::Delivered => {
                stats.delivered += 1;
                metrics::increment_events_delivered(
                    change.collection_name(),
                    change.operation.as_str(),
                );
                metrics::record_event_payload_bytes(event.data.len());
                debug!(
                    id = %event.id,
                    event_type = %event.event_type,
                    collection = change.collection_name(),
                    "Event delivered"
                );
            }
            DeliveryResult::Undelivered(reason) => {
                stats.undelivered += 1;
                metrics::increment_events_undelivered(&sink_type);
                warn!(
                    id = %event.id,
                    event_type = %event.event_type,
                    reason = %reason,
                    "Event not delivered"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterConfig;
    use crate::envelope::EventTypeMap;
    use crate::sink::MockSink;
    use crate::stream::{ScriptStep, ScriptedSource};
    use bson::doc;

    fn mapper() -> EventMapper {
        let config = AdapterConfig::builder()
            .database("db")
            .credentials_path("/creds")
            .sink("http://sink")
            .source_prefix("CEPrefix")
            .build()
            .unwrap();
        EventMapper::new(&config, EventTypeMap::default())
    }

    fn record(id: &str, operation: &str) -> Document {
        doc! {
            "_id": { "_data": id },
            "ns": { "db": "db", "coll": "coll" },
            "operationType": operation,
            "documentKey": { "_id": id },
            "fullDocument": { "_id": id },
        }
    }

    #[tokio::test]
    async fn test_consumer_states() {
        let sink = Arc::new(MockSink::new());
        let mut consumer = StreamConsumer::new(mapper(), sink);
        assert_eq!(consumer.state(), ConsumerState::Idle);

        let source = ScriptedSource::from_records(vec![record("a", "insert")]);
        let stats = consumer
            .run(&source, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(consumer.state(), ConsumerState::Closed);
        assert_eq!(stats.closed_by, Some(CloseReason::Exhausted));

        let again = consumer.run(&source, &CancellationToken::new()).await;
        assert!(matches!(again, Err(StreamError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_cursor_error_is_counted_as_decode_failure() {
        let sink = Arc::new(MockSink::new());
        let mut consumer = StreamConsumer::new(mapper(), sink.clone());
        let source = ScriptedSource::new(vec![
            ScriptStep::Malformed("truncated".to_string()),
            ScriptStep::Record(record("b", "delete")),
        ]);

        let stats = consumer
            .run(&source, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.received, 2);
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(sink.delivered_count(), 1);
    }

    #[tokio::test]
    async fn test_open_failure_closes_consumer() {
        let sink = Arc::new(MockSink::new());
        let mut consumer = StreamConsumer::new(mapper(), sink.clone());
        let source = ScriptedSource::new(Vec::new()).failing_open();

        let result = consumer.run(&source, &CancellationToken::new()).await;

        assert!(result.is_err());
        assert_eq!(consumer.state(), ConsumerState::Closed);
        assert_eq!(source.close_count(), 0);
        assert_eq!(sink.attempts(), 0);
    }

    #[test]
    fn test_stats_failures() {
        let stats = ConsumerStats {
            undelivered: 1,
            decode_failures: 2,
            mapping_failures: 3,
            ..ConsumerStats::default()
        };
        assert_eq!(stats.failures(), 6);
    }
}
