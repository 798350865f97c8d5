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

//! HTTP sink delivering CloudEvents in binary content mode.
//!
//! Each envelope becomes one `POST` to the configured URL. The payload is sent
//! as the request body and every attribute travels as a `ce-` header:
//!
//! | Header | Value |
//! |--------|-------|
//! | `content-type` | `data_content_type` |
//! | `ce-specversion` | `spec_version` |
//! | `ce-id` | `id` |
//! | `ce-source` | `source` |
//! | `ce-type` | `event_type` |
//! | `ce-subject` | `subject`, when present |
//! | `ce-<name>` | one per extension |
//!
//! Attribute values are percent-encoded: bytes outside printable ASCII, space,
//! `"` and `%` are escaped, so non-ASCII and control characters survive the trip.
//!
//! Any 2xx response counts as delivered. Everything else, including
//! transport errors and timeouts, is reported as undelivered; the sink never
//! retries.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tributary_sinks::http::{HttpSink, HttpSinkConfig};
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HttpSinkConfig::builder()
//!     .url("http://broker-ingress.knative-eventing.svc.cluster.local/default/default")
//!     .timeout(Duration::from_secs(10))
//!     .build()?;
//!
//! let sink = HttpSink::new(config)?;
//! # Ok(())
//! # }
//! ```

mod config;
mod sink;

pub use config::{HttpSinkConfig, HttpSinkConfigBuilder};
pub use sink::HttpSink;
