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

//! CloudEvent envelopes and the change-to-event mapper.
//!
//! [`EventMapper`] turns a decoded [`ChangeObject`] into an [`EventEnvelope`]
//! ready for delivery. Mapping is pure: the same change always produces a
//! byte-identical envelope.
//!
//! ```rust
//! use tributary_core::config::AdapterConfig;
//! use tributary_core::envelope::{EventMapper, EventTypeMap, DOCUMENT_DELETE_TYPE};
//! use tributary_core::event::decode_change;
//! use bson::doc;
//!
//! let config = AdapterConfig::builder()
//!     .database("db")
//!     .credentials_path("/creds")
//!     .sink("http://sink")
//!     .source_prefix("CEPrefix")
//!     .build()
//!     .unwrap();
//! let mapper = EventMapper::new(&config, EventTypeMap::default());
//!
//! let change = decode_change(&doc! {
//!     "_id": { "_data": "ID" },
//!     "ns": { "db": "db", "coll": "coll" },
//!     "operationType": "delete",
//!     "documentKey": { "_id": "docID" },
//! })
//! .unwrap();
//!
//! let event = mapper.map_to_event(&change).unwrap();
//! assert_eq!(event.event_type, DOCUMENT_DELETE_TYPE);
//! assert_eq!(event.source, "CEPrefix/databases/db/collections/coll");
//! assert_eq!(event.data, br#"{"_id":"docID"}"#);
//! ```

use crate::config::AdapterConfig;
use crate::event::{ChangeObject, OperationType};
use bson::Bson;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// CloudEvents specification version emitted by the adapter.
pub const SPEC_VERSION: &str = "1.0";

/// Content type of every envelope payload.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Event type for inserted, updated and replaced documents.
pub const DOCUMENT_UPDATE_TYPE: &str = "dev.knative.sources.mongodb.document.update";

/// Event type for deleted documents.
pub const DOCUMENT_DELETE_TYPE: &str = "dev.knative.sources.mongodb.document.delete";

/// Errors raised while mapping a change to an envelope.
#[derive(Debug, Error)]
pub enum MappingError {
    /// No event type is registered for the operation
    #[error("no event type registered for operation `{operation}`")]
    UnrecognizedOperation { operation: String },

    /// The payload could not be rendered as JSON
    #[error("failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A CloudEvents 1.0 envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Hex SHA-256 of the change identifier
    pub id: String,

    /// Origin of the event
    pub source: String,

    /// Event type from the [`EventTypeMap`]
    pub event_type: String,

    /// JSON-encoded payload
    pub data: Vec<u8>,

    /// Always [`SPEC_VERSION`]
    pub spec_version: String,

    /// Always [`JSON_CONTENT_TYPE`]
    pub data_content_type: String,

    /// `_id` of the affected document, when it has a string form
    pub subject: Option<String>,

    /// Extension attributes
    pub extensions: BTreeMap<String, String>,
}

impl EventEnvelope {
    /// Returns the payload as a UTF-8 string, if it is valid UTF-8.
    #[must_use]
    pub fn data_as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

/// Immutable lookup table from operation type to event type.
///
/// Operations absent from the table cannot be mapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTypeMap {
    types: HashMap<OperationType, String>,
}

impl EventTypeMap {
    /// Creates an empty table.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// Registers an event type for an operation, replacing any previous entry.
    #[must_use]
    pub fn with(mut self, operation: OperationType, event_type: impl Into<String>) -> Self {
        self.types.insert(operation, event_type.into());
        self
    }

    /// Returns the event type registered for an operation.
    #[must_use]
    pub fn get(&self, operation: &OperationType) -> Option<&str> {
        self.types.get(operation).map(String::as_str)
    }

    /// Returns the number of registered operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if no operation is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Default for EventTypeMap {
    fn default() -> Self {
        Self::empty()
            .with(OperationType::Insert, DOCUMENT_UPDATE_TYPE)
            .with(OperationType::Update, DOCUMENT_UPDATE_TYPE)
            .with(OperationType::Replace, DOCUMENT_UPDATE_TYPE)
            .with(OperationType::Delete, DOCUMENT_DELETE_TYPE)
    }
}

/// Maps decoded changes to envelopes.
///
/// Built once at startup; holds only immutable settings.
#[derive(Debug, Clone)]
pub struct EventMapper {
    database: String,
    source_prefix: String,
    source_template: String,
    extensions: BTreeMap<String, String>,
    types: EventTypeMap,
}

impl EventMapper {
    /// Creates a mapper from the adapter configuration and an event type table.
    #[must_use]
    pub fn new(config: &AdapterConfig, types: EventTypeMap) -> Self {
        Self {
            database: config.database.clone(),
            source_prefix: config.source_prefix.clone(),
            source_template: config.source_template.clone(),
            extensions: config.overrides.extensions.clone(),
            types,
        }
    }

    /// Maps a change to its envelope.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::UnrecognizedOperation`] if the operation has no
    /// registered event type, or [`MappingError::Serialization`] if the payload
    /// cannot be encoded.
    pub fn map_to_event(&self, change: &ChangeObject) -> Result<EventEnvelope, MappingError> {
        let event_type = self.types.get(&change.operation).ok_or_else(|| {
            MappingError::UnrecognizedOperation {
                operation: change.operation.to_string(),
            }
        })?;

        let payload = Bson::Document(change.payload.clone()).into_relaxed_extjson();
        let data = serde_json::to_vec(&sorted(payload))?;

        Ok(EventEnvelope {
            id: envelope_id(&change.id),
            source: self.render_source(change),
            event_type: event_type.to_string(),
            data,
            spec_version: SPEC_VERSION.to_string(),
            data_content_type: JSON_CONTENT_TYPE.to_string(),
            subject: change.document_id().and_then(subject_of),
            extensions: self.extensions.clone(),
        })
    }

    fn render_source(&self, change: &ChangeObject) -> String {
        let database = if change.database_name().is_empty() {
            &self.database
        } else {
            change.database_name()
        };

        self.source_template
            .replace("{prefix}", &self.source_prefix)
            .replace("{database}", database)
            .replace("{collection}", change.collection_name())
    }
}

/// Lowercase hex SHA-256 of a change identifier.
#[must_use]
pub fn envelope_id(change_id: &str) -> String {
    hex::encode(Sha256::digest(change_id.as_bytes()))
}

fn subject_of(id: &Bson) -> Option<String> {
    match id {
        Bson::String(s) => Some(s.clone()),
        Bson::ObjectId(oid) => Some(oid.to_hex()),
        _ => None,
    }
}

// Object keys are re-emitted in lexical order at every depth.
fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, sorted(v))).collect();
            Value::Object(ordered.into_iter().collect::<Map<String, Value>>())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CloudEventOverrides;
    use crate::event::Namespace;
    use bson::{doc, oid::ObjectId, Document};

    fn config() -> AdapterConfig {
        AdapterConfig::builder()
            .database("db")
            .credentials_path("/creds")
            .sink("http://sink")
            .source_prefix("CEPrefix")
            .build()
            .unwrap()
    }

    fn change(operation: &str, payload: Document) -> ChangeObject {
        ChangeObject {
            id: "ID".to_string(),
            operation: OperationType::from(operation),
            namespace: Namespace::new("db", "coll"),
            payload,
        }
    }

    #[test]
    fn test_insert_maps_to_update_type() {
        let mapper = EventMapper::new(&config(), EventTypeMap::default());
        let event = mapper
            .map_to_event(&change("insert", doc! { "_id": "docID", "key1": "value1" }))
            .unwrap();

        assert_eq!(event.event_type, DOCUMENT_UPDATE_TYPE);
        assert_eq!(event.source, "CEPrefix/databases/db/collections/coll");
        assert_eq!(event.id, envelope_id("ID"));
        assert_eq!(event.data_as_str(), Some(r#"{"_id":"docID","key1":"value1"}"#));
        assert_eq!(event.subject.as_deref(), Some("docID"));
        assert_eq!(event.spec_version, "1.0");
        assert_eq!(event.data_content_type, "application/json");
    }

    #[test]
    fn test_unknown_operation_is_rejected() {
        let mapper = EventMapper::new(&config(), EventTypeMap::default());
        let err = mapper
            .map_to_event(&change("NOTvalid", doc! { "_id": "docID" }))
            .unwrap_err();

        assert!(matches!(
            err,
            MappingError::UnrecognizedOperation { ref operation } if operation == "NOTvalid"
        ));
    }

    #[test]
    fn test_injected_table_replaces_defaults() {
        let types = EventTypeMap::empty().with(OperationType::Drop, "example.collection.dropped");
        let mapper = EventMapper::new(&config(), types);

        assert!(mapper
            .map_to_event(&change("insert", doc! { "_id": 1 }))
            .is_err());
        let event = mapper.map_to_event(&change("drop", doc! {})).unwrap();
        assert_eq!(event.event_type, "example.collection.dropped");
        assert_eq!(event.subject, None);
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let mapper = EventMapper::new(&config(), EventTypeMap::default());
        let change = change("update", doc! { "_id": "a", "n": 1, "nested": { "z": 1, "a": 2 } });

        assert_eq!(
            mapper.map_to_event(&change).unwrap(),
            mapper.map_to_event(&change).unwrap()
        );
    }

    #[test]
    fn test_payload_keys_are_sorted() {
        let mapper = EventMapper::new(&config(), EventTypeMap::default());
        let event = mapper
            .map_to_event(&change(
                "insert",
                doc! { "zeta": 1, "_id": "x", "alpha": { "y": true, "b": false } },
            ))
            .unwrap();

        assert_eq!(
            event.data_as_str(),
            Some(r#"{"_id":"x","alpha":{"b":false,"y":true},"zeta":1}"#)
        );
    }

    #[test]
    fn test_source_falls_back_to_configured_database() {
        let mapper = EventMapper::new(&config(), EventTypeMap::default());
        let mut change = change("delete", doc! { "_id": "docID" });
        change.namespace = Namespace::new("", "coll");

        let event = mapper.map_to_event(&change).unwrap();
        assert_eq!(event.source, "CEPrefix/databases/db/collections/coll");
    }

    #[test]
    fn test_custom_source_template_and_extensions() {
        let mut overrides = CloudEventOverrides::default();
        overrides
            .extensions
            .insert("team".to_string(), "payments".to_string());

        let config = AdapterConfig::builder()
            .database("db")
            .credentials_path("/creds")
            .sink("http://sink")
            .source_prefix("mongodb://prod")
            .source_template("{prefix}/{database}.{collection}")
            .overrides(overrides)
            .build()
            .unwrap();
        let mapper = EventMapper::new(&config, EventTypeMap::default());

        let event = mapper
            .map_to_event(&change("insert", doc! { "_id": 7 }))
            .unwrap();
        assert_eq!(event.source, "mongodb://prod/db.coll");
        assert_eq!(event.extensions.get("team").map(String::as_str), Some("payments"));
    }

    #[test]
    fn test_object_id_subject() {
        let oid = ObjectId::new();
        let mapper = EventMapper::new(&config(), EventTypeMap::default());
        let event = mapper
            .map_to_event(&change("replace", doc! { "_id": oid }))
            .unwrap();

        assert_eq!(event.subject, Some(oid.to_hex()));
    }

    #[test]
    fn test_envelope_id_is_sha256_hex() {
        assert_eq!(
            envelope_id(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(envelope_id("ID").len(), 64);
    }
}
