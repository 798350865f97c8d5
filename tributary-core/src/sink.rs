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

//! Event Sink Trait
//!
//! An [`EventSink`] is the delivery boundary of the adapter: it accepts one
//! envelope at a time and reports whether the receiver accepted it.
//!
//! Delivery is at-most-once. A sink never retries on its own and never raises an
//! error for a failed send; it returns [`DeliveryResult::Undelivered`] with a
//! human-readable reason, which the consumer loop logs before moving on.
//!
//! # Implementing a sink
//!
//! ```rust
//! use tributary_core::envelope::EventEnvelope;
//! use tributary_core::sink::{DeliveryResult, EventSink, SinkMetadata};
//! use async_trait::async_trait;
//!
//! /// Prints every event to stdout
//! pub struct StdoutSink;
//!
//! #[async_trait]
//! impl EventSink for StdoutSink {
//!     async fn send(&self, event: &EventEnvelope) -> DeliveryResult {
//!         println!("{} {}", event.event_type, event.data_as_str().unwrap_or_default());
//!         DeliveryResult::Delivered
//!     }
//!
//!     fn metadata(&self) -> SinkMetadata {
//!         SinkMetadata::new("Stdout", "stdout")
//!     }
//! }
//! ```

use crate::envelope::EventEnvelope;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    /// The receiver acknowledged the event
    Delivered,

    /// The event was not accepted; the reason is meant for logs
    Undelivered(String),
}

impl DeliveryResult {
    /// Returns true if the event was delivered.
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Errors raised while building or shutting down a sink.
///
/// Delivery failures are not errors; see [`DeliveryResult`].
#[derive(Error, Debug)]
pub enum SinkError {
    /// The sink configuration is invalid
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Human-readable error message
        message: String,
        /// The configuration parameter that was invalid
        parameter: Option<String>,
    },

    /// The underlying client could not be created or released
    #[error("Client error: {message}")]
    ClientError {
        /// Human-readable error message
        message: String,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SinkError {
    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>, parameter: Option<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
            parameter,
        }
    }

    /// Creates a client error from an underlying error.
    #[must_use]
    pub fn client(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::ClientError {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }
}

/// Metadata about a sink, used in logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkMetadata {
    /// Human-readable sink name (e.g., "HTTP")
    pub name: String,

    /// Sink type identifier (e.g., "http")
    pub sink_type: String,

    /// Additional sink-specific metadata
    pub properties: HashMap<String, String>,
}

impl SinkMetadata {
    /// Creates new metadata with required fields.
    #[must_use]
    pub fn new(name: impl Into<String>, sink_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sink_type: sink_type.into(),
            properties: HashMap::new(),
        }
    }

    /// Adds a custom property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Delivery boundary for mapped events.
///
/// Implementations must be `Send + Sync`; the consumer loop holds a shared
/// reference for its whole lifetime and calls [`send`](EventSink::send) once
/// per record, never concurrently.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Delivers one envelope.
    ///
    /// Must not retry. Transport failures and rejections are reported as
    /// [`DeliveryResult::Undelivered`].
    async fn send(&self, event: &EventEnvelope) -> DeliveryResult;

    /// Returns metadata about this sink.
    fn metadata(&self) -> SinkMetadata;

    /// Releases resources held by the sink.
    ///
    /// The default implementation does nothing.
    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// In-memory sink for testing.
///
/// Records every envelope it receives and can be told to reject some or all of them.
///
/// ```rust
/// # use tributary_core::sink::{EventSink, MockSink};
/// let sink = MockSink::new().with_failures();
/// assert_eq!(sink.delivered_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct MockSink {
    state: Mutex<MockState>,
    fail_all: bool,
    fail_event_types: Vec<String>,
}

#[derive(Debug, Default)]
struct MockState {
    delivered: Vec<EventEnvelope>,
    attempts: usize,
    close_count: usize,
}

impl MockSink {
    /// Creates a new mock sink that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the mock to reject every event.
    #[must_use]
    pub fn with_failures(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// Configures the mock to reject events of the given type.
    #[must_use]
    pub fn rejecting(mut self, event_type: impl Into<String>) -> Self {
        self.fail_event_types.push(event_type.into());
        self
    }

    /// Returns a copy of every delivered envelope, in delivery order.
    #[must_use]
    pub fn events(&self) -> Vec<EventEnvelope> {
        self.state().delivered.clone()
    }

    /// Returns the number of delivered envelopes.
    #[must_use]
    pub fn delivered_count(&self) -> usize {
        self.state().delivered.len()
    }

    /// Returns the number of send calls, delivered or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.state().attempts
    }

    /// Returns the number of times close was called.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.state().close_count
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EventSink for MockSink {
    async fn send(&self, event: &EventEnvelope) -> DeliveryResult {
        let mut state = self.state();
        state.attempts += 1;

        if self.fail_all || self.fail_event_types.contains(&event.event_type) {
            return DeliveryResult::Undelivered("simulated delivery failure".to_string());
        }

        state.delivered.push(event.clone());
        DeliveryResult::Delivered
    }

    fn metadata(&self) -> SinkMetadata {
        SinkMetadata::new("MockSink", "mock")
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.state().close_count += 1;
        Ok(())
    }
}
