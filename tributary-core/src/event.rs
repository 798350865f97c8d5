//! MongoDB Change Record Decoding
//!
//! This module turns the loosely-typed document handed out by a MongoDB change
//! stream into a strongly-typed [`ChangeObject`]. Decoding is all-or-nothing:
//! every required field is checked for presence and shape, and the first one
//! that fails is reported by its dotted path.
//!
//! # Consumed fields
//!
//! | Field | Required | Notes |
//! |-------|----------|-------|
//! | `ns.coll` | yes | collection of origin |
//! | `ns.db` | no | database of origin |
//! | `_id._data` | yes | opaque change identifier |
//! | `operationType` | yes | any string; unknown values are preserved |
//! | `documentKey` | on delete | becomes the payload of delete changes |
//! | `fullDocument` | otherwise | becomes the payload of every other change |
//!
//! # Examples
//!
//! ```rust
//! use tributary_core::event::{decode_change, OperationType};
//! use bson::doc;
//!
//! let raw = doc! {
//!     "_id": { "_data": "8263A1" },
//!     "ns": { "db": "shop", "coll": "orders" },
//!     "operationType": "delete",
//!     "documentKey": { "_id": "order-1" },
//! };
//!
//! let change = decode_change(&raw).unwrap();
//! assert_eq!(change.operation, OperationType::Delete);
//! assert_eq!(change.collection_name(), "orders");
//! assert_eq!(change.payload, doc! { "_id": "order-1" });
//! ```

use bson::{Bson, Document};
use std::fmt;
use thiserror::Error;

/// Error returned when a raw change record cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A required field is absent or does not have the expected BSON type.
    ///
    /// `field` is the dotted path of the offending field, e.g. `ns.coll`.
    #[error("change record is missing field `{field}` (absent or wrong type)")]
    MissingField { field: &'static str },
}

impl DecodeError {
    /// Returns the dotted path of the field that failed to decode.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::MissingField { field } => field,
        }
    }

    const fn missing(field: &'static str) -> Self {
        Self::MissingField { field }
    }
}

/// MongoDB change stream operation types.
///
/// The `Unknown` variant keeps the original string so that operation types
/// introduced by newer servers survive decoding and can be reported verbatim
/// when no event type is registered for them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum OperationType {
    /// A document was inserted into a collection
    Insert,

    /// A document was updated in place
    Update,

    /// A document was replaced entirely
    Replace,

    /// A document was deleted from a collection
    Delete,

    /// The change stream was invalidated (collection dropped, renamed, etc.)
    Invalidate,

    /// A collection was dropped
    Drop,

    /// A database was dropped
    DropDatabase,

    /// A collection was renamed
    Rename,

    /// Any other operation type string
    Unknown(String),
}

impl OperationType {
    /// Returns the wire name of this operation type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Invalidate => "invalidate",
            Self::Drop => "drop",
            Self::DropDatabase => "dropDatabase",
            Self::Rename => "rename",
            Self::Unknown(op) => op,
        }
    }

    /// Returns true if this operation writes document state (insert, update, replace).
    #[inline]
    #[must_use]
    pub fn is_data_modification(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Replace)
    }

    /// Returns true for delete operations.
    #[inline]
    #[must_use]
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete)
    }

    /// Returns true if this is an unknown operation type.
    #[inline]
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

impl From<&str> for OperationType {
    fn from(op: &str) -> Self {
        match op {
            "insert" => Self::Insert,
            "update" => Self::Update,
            "replace" => Self::Replace,
            "delete" => Self::Delete,
            "invalidate" => Self::Invalidate,
            "drop" => Self::Drop,
            "dropDatabase" => Self::DropDatabase,
            "rename" => Self::Rename,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MongoDB namespace (database + collection).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    /// Database name; empty when the change record did not carry `ns.db`
    pub database: String,

    /// Collection name
    pub collection: String,
}

impl Namespace {
    /// Creates a new namespace from database and collection names.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Returns the namespace as a `database/collection` path.
    #[must_use]
    pub fn path(&self) -> String {
        format!("{}/{}", self.database, self.collection)
    }
}

/// A decoded change notification.
///
/// Built fresh for every raw record by [`decode_change`], handed to the event
/// mapper and then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeObject {
    /// Opaque change identifier taken from `_id._data`
    pub id: String,

    /// Type of operation that occurred
    pub operation: OperationType,

    /// Namespace where the operation occurred
    pub namespace: Namespace,

    /// `documentKey` for deletes, `fullDocument` for everything else
    pub payload: Document,
}

impl ChangeObject {
    /// Returns the collection name.
    #[inline]
    #[must_use]
    pub fn collection_name(&self) -> &str {
        &self.namespace.collection
    }

    /// Returns the database name.
    #[inline]
    #[must_use]
    pub fn database_name(&self) -> &str {
        &self.namespace.database
    }

    /// Returns the `_id` of the affected document, if the payload carries one.
    pub fn document_id(&self) -> Option<&Bson> {
        self.payload.get("_id")
    }
}

/// Decodes a raw change stream document into a [`ChangeObject`].
///
/// # Errors
///
/// Returns [`DecodeError::MissingField`] naming the first required field that
/// is absent or has the wrong type. No partial result is ever produced.
pub fn decode_change(raw: &Document) -> Result<ChangeObject, DecodeError> {
    let ns = raw
        .get_document("ns")
        .map_err(|_| DecodeError::missing("ns"))?;
    let collection = ns
        .get_str("coll")
        .map_err(|_| DecodeError::missing("ns.coll"))?;
    let database = ns.get_str("db").unwrap_or_default();

    let change_id = raw
        .get_document("_id")
        .map_err(|_| DecodeError::missing("_id"))?;
    let id = change_id
        .get_str("_data")
        .map_err(|_| DecodeError::missing("_id._data"))?;

    let operation = OperationType::from(
        raw.get_str("operationType")
            .map_err(|_| DecodeError::missing("operationType"))?,
    );

    let payload_field = if operation.is_delete() {
        "documentKey"
    } else {
        "fullDocument"
    };
    let payload = raw
        .get_document(payload_field)
        .map_err(|_| DecodeError::missing(payload_field))?;

    Ok(ChangeObject {
        id: id.to_string(),
        operation,
        namespace: Namespace::new(database, collection),
        payload: payload.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn valid_record(operation: &str) -> Document {
        doc! {
            "ns": { "coll": "coll", "db": "db" },
            "_id": { "_data": "ID", "clusterTime": "" },
            "documentKey": { "_id": "docID" },
            "fullDocument": { "_id": "docID", "key1": "value1" },
            "operationType": operation,
        }
    }

    #[test]
    fn test_decode_insert_uses_full_document() {
        let change = decode_change(&valid_record("insert")).unwrap();

        assert_eq!(change.id, "ID");
        assert_eq!(change.operation, OperationType::Insert);
        assert_eq!(change.namespace, Namespace::new("db", "coll"));
        assert_eq!(change.payload, doc! { "_id": "docID", "key1": "value1" });
    }

    #[test]
    fn test_decode_delete_uses_document_key() {
        let change = decode_change(&valid_record("delete")).unwrap();

        assert_eq!(change.operation, OperationType::Delete);
        assert_eq!(change.payload, doc! { "_id": "docID" });
    }

    #[test]
    fn test_decode_without_db_keeps_empty_database() {
        let mut raw = valid_record("insert");
        raw.insert("ns", doc! { "coll": "coll" });

        let change = decode_change(&raw).unwrap();
        assert_eq!(change.database_name(), "");
        assert_eq!(change.collection_name(), "coll");
    }

    #[test]
    fn test_decode_wrong_type_is_reported_as_missing() {
        let mut raw = valid_record("insert");
        raw.insert("_id", "not-a-document");

        assert_eq!(
            decode_change(&raw),
            Err(DecodeError::MissingField { field: "_id" })
        );
    }

    #[test]
    fn test_operation_type_round_trip_names() {
        for op in [
            "insert",
            "update",
            "replace",
            "delete",
            "invalidate",
            "drop",
            "dropDatabase",
            "rename",
        ] {
            let parsed = OperationType::from(op);
            assert!(!parsed.is_unknown(), "{op} should be known");
            assert_eq!(parsed.as_str(), op);
        }

        let unknown = OperationType::from("NOTvalid");
        assert_eq!(unknown, OperationType::Unknown("NOTvalid".to_string()));
        assert_eq!(unknown.to_string(), "NOTvalid");
    }
}
