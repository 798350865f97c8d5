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

//! Configuration for the HTTP sink.

use std::time::Duration;
use tributary_core::config::AdapterConfig;
use tributary_core::sink::SinkError;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_USER_AGENT: &str = concat!("tributary/", env!("CARGO_PKG_VERSION"));

/// Configuration for [`HttpSink`](super::HttpSink).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSinkConfig {
    /// Target URL of every request
    pub url: Url,

    /// Per-request timeout, including connect
    pub timeout: Duration,

    /// `user-agent` header value
    pub user_agent: String,
}

impl HttpSinkConfig {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> HttpSinkConfigBuilder {
        HttpSinkConfigBuilder::default()
    }

    /// Builds the sink configuration from the adapter configuration.
    #[must_use]
    pub fn from_adapter_config(config: &AdapterConfig) -> Self {
        Self {
            url: config.sink.clone(),
            timeout: config.sink_timeout,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Builder for [`HttpSinkConfig`].
#[derive(Debug, Default)]
pub struct HttpSinkConfigBuilder {
    url: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl HttpSinkConfigBuilder {
    /// Sets the target URL (required).
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the per-request timeout.
    ///
    /// Default: 30 seconds
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overrides the `user-agent` header.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is missing, unparsable or not http(s), or if
    /// the timeout is zero.
    pub fn build(self) -> Result<HttpSinkConfig, SinkError> {
        let raw = self
            .url
            .ok_or_else(|| SinkError::configuration("url is required", Some("url".into())))?;
        let url = Url::parse(&raw).map_err(|e| {
            SinkError::configuration(format!("invalid url `{raw}`: {e}"), Some("url".into()))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SinkError::configuration(
                format!("unsupported scheme `{}`", url.scheme()),
                Some("url".into()),
            ));
        }

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        if timeout.is_zero() {
            return Err(SinkError::configuration(
                "timeout must be greater than zero",
                Some("timeout".into()),
            ));
        }

        Ok(HttpSinkConfig {
            url,
            timeout,
            user_agent: self
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        })
    }
}
