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

//! Tributary Sinks - Event Sink Implementations
//!
//! This crate provides the [`EventSink`](tributary_core::sink::EventSink)
//! implementations used by the Tributary receive adapter.
//!
//! # Available Sinks
//!
//! - **HTTP**: CloudEvents over HTTP in binary content mode
//!
//! # Features
//!
//! - `http` - HTTP sink (default)
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tributary_sinks::http::{HttpSink, HttpSinkConfig};
//! use tributary_core::sink::EventSink;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let sink = HttpSink::new(
//!     HttpSinkConfig::builder()
//!         .url("http://localhost:8080")
//!         .build()?,
//! )?;
//! assert_eq!(sink.metadata().sink_type, "http");
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "http")]
pub mod http;
