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

//! Watch scope of the change stream.
//!
//! The adapter watches exactly one data source, chosen once at startup:
//!
//! - **Collection**: a single collection of the configured database
//!   (`MONGODB_COLLECTION` is set and non-empty).
//! - **Database**: every collection of the configured database, including
//!   collections created after the stream was opened.
//!
//! ```rust
//! use tributary_core::watch_level::WatchLevel;
//!
//! let level = WatchLevel::Collection("orders".to_string());
//! assert_eq!(level.collection(), Some("orders"));
//! assert_eq!(WatchLevel::default(), WatchLevel::Database);
//! ```

/// Defines which data source the change stream is opened on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WatchLevel {
    /// Watch one collection.
    ///
    /// Uses MongoDB's `collection.watch()` API.
    Collection(String),

    /// Watch all collections in the database.
    ///
    /// Uses MongoDB's `db.watch()` API; requires a replica set.
    #[default]
    Database,
}

impl WatchLevel {
    /// Returns `true` if this is collection-level watching.
    #[must_use]
    pub fn is_collection(&self) -> bool {
        matches!(self, Self::Collection(_))
    }

    /// Returns `true` if this is database-level watching.
    #[must_use]
    pub fn is_database(&self) -> bool {
        matches!(self, Self::Database)
    }

    /// Returns the watched collection, if any.
    #[must_use]
    pub fn collection(&self) -> Option<&str> {
        match self {
            Self::Collection(name) => Some(name),
            Self::Database => None,
        }
    }

    /// Returns a human-readable description of the watch level.
    ///
    /// ```rust
    /// use tributary_core::watch_level::WatchLevel;
    ///
    /// assert_eq!(WatchLevel::Collection("users".into()).description(), "collection users");
    /// assert_eq!(WatchLevel::Database.description(), "database");
    /// ```
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::Collection(name) => format!("collection {name}"),
            Self::Database => "database".to_string(),
        }
    }
}

impl std::fmt::Display for WatchLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Collection(name) => write!(f, "Collection({name})"),
            Self::Database => write!(f, "Database"),
        }
    }
}
