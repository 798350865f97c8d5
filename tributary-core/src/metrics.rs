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

//! Metrics instrumentation for the receive adapter.
//!
//! Metrics go through the `metrics` facade; nothing is recorded until the
//! binary installs an exporter (Prometheus in `tributary-adapter`).
//!
//! # Naming Conventions
//!
//! All metrics follow Prometheus naming conventions: a `tributary_` prefix,
//! snake case, a unit suffix where one applies and `_total` on counters.
//!
//! # Labels
//!
//! - **collection**: MongoDB collection name (low cardinality)
//! - **operation**: change operation type
//! - **sink\_type**: sink type identifier such as "http"
//! - **stage**: processing stage where a record was dropped
//! - **reason**: why the stream closed
//!
//! Never use document ids, change ids or error messages as labels.
//!
//! # Examples
//!
//! ```rust
//! use tributary_core::metrics::{self, ErrorCategory};
//!
//! metrics::increment_changes_received();
//! metrics::increment_events_delivered("orders", "insert");
//! metrics::increment_events_failed(ErrorCategory::Decode);
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric name prefix for all Tributary metrics.
#[doc(hidden)]
pub const METRIC_PREFIX: &str = "tributary";

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Total number of raw change records pulled from the stream.
///
/// Type: Counter
#[doc(hidden)]
pub const CHANGES_RECEIVED_TOTAL: &str = "tributary_changes_received_total";

/// Total number of events acknowledged by the sink.
///
/// Type: Counter
/// Labels: collection, operation
#[doc(hidden)]
pub const EVENTS_DELIVERED_TOTAL: &str = "tributary_events_delivered_total";

/// Total number of events the sink did not accept.
///
/// Type: Counter
/// Labels: sink_type
const EVENTS_UNDELIVERED_TOTAL: &str = "tributary_events_undelivered_total";

/// Total number of records dropped before delivery.
///
/// Type: Counter
/// Labels: stage
const EVENTS_FAILED_TOTAL: &str = "tributary_events_failed_total";

/// Time taken by a single delivery attempt.
///
/// Type: Histogram
/// Labels: sink_type
/// Unit: seconds
const DELIVERY_DURATION_SECONDS: &str = "tributary_delivery_duration_seconds";

/// Size of the JSON payload of delivered events.
///
/// Type: Histogram
/// Unit: bytes
const EVENT_PAYLOAD_BYTES: &str = "tributary_event_payload_bytes";

/// Total number of times the change stream closed.
///
/// Type: Counter
/// Labels: reason
const STREAM_CLOSED_TOTAL: &str = "tributary_stream_closed_total";

/// Current adapter status (0=stopped, 1=running, 2=error).
///
/// Type: Gauge
/// Unit: status code
const ADAPTER_STATUS: &str = "tributary_adapter_status";

// ============================================================================
// Initialization
// ============================================================================

/// Initializes metric descriptions for documentation and introspection.
///
/// Call once at startup, after the exporter is installed.
pub fn init_metrics() {
    describe_counter!(
        CHANGES_RECEIVED_TOTAL,
        "Total number of raw change records pulled from the change stream"
    );

    describe_counter!(
        EVENTS_DELIVERED_TOTAL,
        "Total number of events acknowledged by the sink"
    );

    describe_counter!(
        EVENTS_UNDELIVERED_TOTAL,
        "Total number of events the sink did not accept"
    );

    describe_counter!(
        EVENTS_FAILED_TOTAL,
        "Total number of change records dropped before delivery"
    );

    describe_counter!(
        STREAM_CLOSED_TOTAL,
        "Total number of times the change stream closed"
    );

    describe_histogram!(
        DELIVERY_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time taken by a single delivery attempt"
    );

    describe_histogram!(
        EVENT_PAYLOAD_BYTES,
        metrics::Unit::Bytes,
        "Size of the JSON payload of delivered events"
    );

    describe_gauge!(
        ADAPTER_STATUS,
        "Current adapter status: 0=stopped, 1=running, 2=error"
    );
}

// ============================================================================
// Counter Metrics
// ============================================================================

/// Increments the count of raw records pulled from the stream.
pub fn increment_changes_received() {
    counter!(CHANGES_RECEIVED_TOTAL).increment(1);
}

/// Increments the count of delivered events.
///
/// # Arguments
///
/// * `collection` - MongoDB collection name
/// * `operation` - Operation type: "insert", "update", "delete", "replace"
pub fn increment_events_delivered(collection: &str, operation: &str) {
    counter!(EVENTS_DELIVERED_TOTAL, "collection" => collection.to_string(), "operation" => operation.to_string())
        .increment(1);
}

/// Increments the count of events the sink did not accept.
pub fn increment_events_undelivered(sink_type: &str) {
    counter!(EVENTS_UNDELIVERED_TOTAL, "sink_type" => sink_type.to_string()).increment(1);
}

/// Increments the count of records dropped at the given stage.
pub fn increment_events_failed(stage: ErrorCategory) {
    counter!(EVENTS_FAILED_TOTAL, "stage" => stage.as_str()).increment(1);
}

/// Increments the count of stream closures for the given reason.
pub fn increment_stream_closed(reason: &'static str) {
    counter!(STREAM_CLOSED_TOTAL, "reason" => reason).increment(1);
}

// ============================================================================
// Histogram Metrics
// ============================================================================

/// Records the duration of one delivery attempt.
pub fn record_delivery_duration(duration: Duration, sink_type: &str) {
    histogram!(DELIVERY_DURATION_SECONDS, "sink_type" => sink_type.to_string())
        .record(duration.as_secs_f64());
}

/// Records the payload size of a delivered event.
pub fn record_event_payload_bytes(bytes: usize) {
    histogram!(EVENT_PAYLOAD_BYTES).record(bytes as f64);
}

// ============================================================================
// Gauge Metrics
// ============================================================================

/// Sets the current adapter status.
pub fn set_adapter_status(status: AdapterStatus) {
    gauge!(ADAPTER_STATUS).set(f64::from(status as u8));
}

// ============================================================================
// Label Types
// ============================================================================

/// Adapter status values for the status gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AdapterStatus {
    /// Adapter is stopped.
    Stopped = 0,
    /// Adapter is consuming the stream.
    Running = 1,
    /// Adapter stopped on a fatal error.
    Error = 2,
}

/// Stage at which a record was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Raw bytes could not be materialized into a document
    Cursor,
    /// The document is not a well-formed change record
    Decode,
    /// The change could not be turned into an event
    Mapping,
}

impl ErrorCategory {
    /// Returns the stage as a static string for metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cursor => "cursor",
            Self::Decode => "decode",
            Self::Mapping => "mapping",
        }
    }
}

// ============================================================================
// Metric Helper Utilities
// ============================================================================

/// Records the elapsed time through a callback when dropped.
///
/// ```rust
/// use tributary_core::metrics::{self, Timer};
///
/// {
///     let _timer = Timer::new("http", metrics::record_delivery_duration);
///     // ... deliver ...
/// }
/// ```
pub struct Timer<F>
where
    F: FnOnce(Duration, &str),
{
    start: std::time::Instant,
    label: String,
    record_fn: Option<F>,
}

impl<F> Timer<F>
where
    F: FnOnce(Duration, &str),
{
    /// Creates a new timer that will record the duration when dropped.
    pub fn new(label: impl Into<String>, record_fn: F) -> Self {
        Self {
            start: std::time::Instant::now(),
            label: label.into(),
            record_fn: Some(record_fn),
        }
    }
}

impl<F> Drop for Timer<F>
where
    F: FnOnce(Duration, &str),
{
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        if let Some(record_fn) = self.record_fn.take() {
            record_fn(duration, &self.label);
        }
    }
}
