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

//! HTTP sink implementation.

use super::config::HttpSinkConfig;
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::{debug, info};
use tributary_core::envelope::EventEnvelope;
use tributary_core::sink::{DeliveryResult, EventSink, SinkError, SinkMetadata};

/// Bytes escaped in `ce-` header values: everything outside U+0021..U+007E, plus `"` and `%`.
/// Non-ASCII characters are always escaped as their UTF-8 bytes.
const HEADER_VALUE: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'%');

fn header_value(value: &str) -> String {
    utf8_percent_encode(value, HEADER_VALUE).to_string()
}

/// Delivers envelopes to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: Client,
    config: HttpSinkConfig,
}

impl HttpSink {
    /// Creates a new HTTP sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built (for instance when
    /// the TLS backend fails to initialize).
    pub fn new(config: HttpSinkConfig) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(SinkError::client)?;

        info!(url = %config.url, timeout = ?config.timeout, "HTTP sink created");

        Ok(Self { client, config })
    }

    /// Returns the sink configuration.
    #[must_use]
    pub fn config(&self) -> &HttpSinkConfig {
        &self.config
    }
}

#[async_trait]
impl EventSink for HttpSink {
    async fn send(&self, event: &EventEnvelope) -> DeliveryResult {
        let mut request = self
            .client
            .post(self.config.url.clone())
            .header(CONTENT_TYPE, event.data_content_type.as_str())
            .header("ce-specversion", header_value(&event.spec_version))
            .header("ce-id", header_value(&event.id))
            .header("ce-source", header_value(&event.source))
            .header("ce-type", header_value(&event.event_type));

        if let Some(subject) = &event.subject {
            request = request.header("ce-subject", header_value(subject));
        }
        for (name, value) in &event.extensions {
            request = request.header(format!("ce-{name}"), header_value(value));
        }

        match request.body(event.data.clone()).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(id = %event.id, status = %response.status(), "Sink accepted event");
                DeliveryResult::Delivered
            }
            Ok(response) => {
                DeliveryResult::Undelivered(format!("sink responded with {}", response.status()))
            }
            Err(e) if e.is_timeout() => DeliveryResult::Undelivered(format!(
                "request timed out after {:?}",
                self.config.timeout
            )),
            Err(e) => DeliveryResult::Undelivered(format!("request failed: {e}")),
        }
    }

    fn metadata(&self) -> SinkMetadata {
        SinkMetadata::new("HTTP", "http").with_property("url", self.config.url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_value_escaping() {
        assert_eq!(header_value("CEPrefix/databases/db"), "CEPrefix/databases/db");
        assert_eq!(header_value("a\nb"), "a%0Ab");
        assert_eq!(header_value("café"), "caf%C3%A9");
        assert_eq!(header_value("50% \"off\""), "50%25%20%22off%22");
    }
}
