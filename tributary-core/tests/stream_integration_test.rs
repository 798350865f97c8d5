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

//! Integration tests against a real MongoDB replica set.
//!
//! Change streams need a replica set. Start one locally, e.g.
//!
//! ```bash
//! docker run -d -p 27017:27017 mongo:7 --replSet rs0
//! docker exec <container> mongosh --eval 'rs.initiate()'
//! ```
//!
//! then run the ignored tests:
//!
//! ```bash
//! MONGODB_URI="mongodb://localhost:27017/?replicaSet=rs0&directConnection=true" \
//!     cargo test --package tributary-core --test stream_integration_test -- --ignored
//! ```

use bson::doc;
use mongodb::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tributary_core::config::AdapterConfig;
use tributary_core::consumer::{CloseReason, StreamConsumer};
use tributary_core::envelope::{EventMapper, EventTypeMap, DOCUMENT_UPDATE_TYPE};
use tributary_core::sink::MockSink;
use tributary_core::stream::{ChangeStreamConfig, MongoChangeSource};
use tributary_core::watch_level::WatchLevel;

fn mongodb_uri() -> String {
    std::env::var("MONGODB_URI").unwrap_or_else(|_| {
        "mongodb://localhost:27017/?replicaSet=rs0&directConnection=true".to_string()
    })
}

async fn consume_one_insert(level: WatchLevel) -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::with_uri_str(&mongodb_uri()).await?;
    let database = "tributary_it";
    let collection = client
        .database(database)
        .collection::<bson::Document>("orders");
    collection.drop().await.ok();
    client
        .database(database)
        .create_collection("orders")
        .await?;

    let config = AdapterConfig::builder()
        .database(database)
        .credentials_path("/unused")
        .sink("http://unused")
        .source_prefix("it")
        .build()?;
    let sink = Arc::new(MockSink::new());
    let mut consumer = StreamConsumer::new(
        EventMapper::new(&config, EventTypeMap::default()),
        sink.clone(),
    );
    let source = MongoChangeSource::new(&client, database, &level, ChangeStreamConfig::default());

    let cancel = CancellationToken::new();
    let writer = {
        let cancel = cancel.clone();
        let sink = sink.clone();
        let collection = collection.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            collection
                .insert_one(doc! { "_id": "order-1", "total": 42 })
                .await
                .unwrap();
            for _ in 0..100 {
                if sink.delivered_count() > 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            cancel.cancel();
        })
    };

    let stats = tokio::time::timeout(Duration::from_secs(30), consumer.run(&source, &cancel))
        .await??;
    writer.await?;

    assert_eq!(stats.closed_by, Some(CloseReason::Cancelled));
    assert_eq!(stats.delivered, 1);
    let event = &sink.events()[0];
    assert_eq!(event.event_type, DOCUMENT_UPDATE_TYPE);
    assert_eq!(event.source, "it/databases/tributary_it/collections/orders");
    assert_eq!(event.subject.as_deref(), Some("order-1"));
    assert_eq!(event.data_as_str(), Some(r#"{"_id":"order-1","total":42}"#));

    drop(source);
    client.shutdown().await;
    Ok(())
}

#[tokio::test]
#[ignore] // Requires a MongoDB replica set
async fn test_collection_stream_delivers_insert() -> Result<(), Box<dyn std::error::Error>> {
    consume_one_insert(WatchLevel::Collection("orders".to_string())).await
}

#[tokio::test]
#[ignore] // Requires a MongoDB replica set
async fn test_database_stream_delivers_insert() -> Result<(), Box<dyn std::error::Error>> {
    consume_one_insert(WatchLevel::Database).await
}
