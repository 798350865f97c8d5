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

//! Tests for change record decoding.

use bson::{doc, Document};
use tributary_core::event::{decode_change, DecodeError, Namespace, OperationType};

fn record(operation: &str) -> Document {
    doc! {
        "ns": { "coll": "coll", "db": "db" },
        "_id": { "_data": "ID", "clusterTime": "" },
        "documentKey": { "_id": "docID" },
        "fullDocument": { "_id": "docID", "key1": "value1" },
        "operationType": operation,
    }
}

fn without(mut raw: Document, path: &str) -> Document {
    match path.split_once('.') {
        Some((parent, child)) => {
            let mut inner = raw.get_document(parent).unwrap().clone();
            inner.remove(child);
            raw.insert(parent, inner);
        }
        None => {
            raw.remove(path);
        }
    }
    raw
}

#[test]
fn test_each_missing_field_is_named() {
    for field in ["ns", "ns.coll", "_id", "_id._data", "operationType", "fullDocument"] {
        let raw = without(record("insert"), field);
        assert_eq!(
            decode_change(&raw),
            Err(DecodeError::MissingField { field }),
            "removing {field}"
        );
    }

    let raw = without(record("delete"), "documentKey");
    assert_eq!(
        decode_change(&raw),
        Err(DecodeError::MissingField {
            field: "documentKey"
        })
    );
}

#[test]
fn test_wrong_shapes_are_missing_fields() {
    let cases: Vec<(&str, Document)> = vec![
        ("ns", doc! { "ns": "db.coll" }),
        ("ns.coll", doc! { "ns": { "coll": 5 } }),
        ("_id._data", doc! { "_id": { "_data": 42 } }),
        ("operationType", doc! { "operationType": { "op": "insert" } }),
        ("fullDocument", doc! { "fullDocument": "not-a-doc" }),
    ];

    for (field, patch) in cases {
        let mut raw = record("insert");
        for (key, value) in patch {
            raw.insert(key, value);
        }
        let err = decode_change(&raw).unwrap_err();
        assert_eq!(err.field(), field);
    }
}

#[test]
fn test_delete_payload_ignores_full_document() {
    let mut raw = record("delete");
    raw.remove("fullDocument");

    let change = decode_change(&raw).unwrap();
    assert!(change.operation.is_delete());
    assert_eq!(change.payload, doc! { "_id": "docID" });
}

#[test]
fn test_update_and_replace_use_full_document() {
    for op in ["update", "replace"] {
        let change = decode_change(&record(op)).unwrap();
        assert!(change.operation.is_data_modification());
        assert_eq!(change.payload, doc! { "_id": "docID", "key1": "value1" });
    }
}

#[test]
fn test_unknown_operation_decodes() {
    let change = decode_change(&record("NOTvalid")).unwrap();

    assert_eq!(change.operation, OperationType::Unknown("NOTvalid".to_string()));
    assert_eq!(change.namespace, Namespace::new("db", "coll"));
    assert_eq!(change.namespace.path(), "db/coll");
}

#[test]
fn test_document_id() {
    let change = decode_change(&record("insert")).unwrap();
    assert_eq!(change.document_id(), Some(&bson::Bson::String("docID".into())));
}
