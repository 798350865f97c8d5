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

//! Console Sink Example
//!
//! Runs the receive adapter against a local MongoDB and prints every event
//! envelope instead of posting it. Useful for checking what a sink would
//! receive.
//!
//! # Prerequisites
//!
//! Start MongoDB (replica set required for change streams):
//! ```bash
//! docker run -d --name mongodb -p 27017:27017 \
//!   mongo:7.0 --replSet rs0
//!
//! # Initialize replica set
//! docker exec mongodb mongosh --eval "rs.initiate()"
//! ```
//!
//! Write the connection string where the adapter expects it:
//! ```bash
//! mkdir -p /tmp/mongodb-credentials
//! echo "mongodb://localhost:27017/?replicaSet=rs0&directConnection=true" \
//!   > /tmp/mongodb-credentials/URI
//! ```
//!
//! # Running the Example
//!
//! ```bash
//! MONGODB_CREDENTIALS=/tmp/mongodb-credentials \
//! MONGODB_DATABASE=testdb \
//! CE_SOURCE_PREFIX=example \
//! K_SINK=http://localhost:8080 \
//!   cargo run --package tributary-core --example console_sink
//! ```
//!
//! # Generate Test Data
//!
//! In another terminal:
//! ```bash
//! docker exec mongodb mongosh testdb --eval '
//!   db.users.insertOne({name: "Alice", email: "alice@example.com", age: 30})
//! '
//! ```

use async_trait::async_trait;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use tributary_core::envelope::EventEnvelope;
use tributary_core::sink::{DeliveryResult, EventSink, SinkError, SinkMetadata};
use tributary_core::{Adapter, AdapterConfig};

/// Sink that logs envelopes and accepts all of them
#[derive(Debug, Default)]
struct ConsoleSink {
    event_count: AtomicUsize,
}

#[async_trait]
impl EventSink for ConsoleSink {
    async fn send(&self, event: &EventEnvelope) -> DeliveryResult {
        let count = self.event_count.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            count,
            id = %event.id,
            source = %event.source,
            event_type = %event.event_type,
            subject = event.subject.as_deref().unwrap_or("-"),
            "Event received"
        );
        info!(data = event.data_as_str().unwrap_or("<binary>"), "   Data");
        DeliveryResult::Delivered
    }

    fn metadata(&self) -> SinkMetadata {
        SinkMetadata::new("Console", "console")
    }

    async fn close(&self) -> Result<(), SinkError> {
        info!(
            events = self.event_count.load(Ordering::Relaxed),
            "Console sink closed"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tributary_core=debug")),
        )
        .init();

    let config = AdapterConfig::from_env()?;
    info!(watch = %config.watch_level(), "Configuration loaded");

    let adapter = Adapter::new(config, Arc::new(ConsoleSink::default()));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
        }
        on_signal.cancel();
    });

    let stats = adapter.start(cancel).await?;
    info!(
        received = stats.received,
        delivered = stats.delivered,
        closed_by = ?stats.closed_by,
        "Adapter stopped"
    );

    Ok(())
}
