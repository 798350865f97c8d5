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

//! Tributary receive adapter.
//!
//! Watches the configured MongoDB collection or database and publishes every
//! change as a CloudEvent to `K_SINK`. Configuration comes from the environment
//! (see `tributary_core::config`).
//!
//! Exit status:
//!
//! - `0` when the process is stopped by SIGINT/SIGTERM or the stream ends
//! - `1` on a fatal startup error, or when the change stream fails

use metrics_exporter_prometheus::PrometheusBuilder;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use tributary_core::config::AdapterConfig;
use tributary_core::consumer::{CloseReason, ConsumerStats};
use tributary_core::metrics;
use tributary_core::{Adapter, AdapterError};
use tributary_sinks::http::{HttpSink, HttpSinkConfig};

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    match run().await {
        Ok(stats) => match stats.closed_by {
            Some(CloseReason::Terminated(reason)) => {
                error!(%reason, "Change stream failed; exiting");
                ExitCode::FAILURE
            }
            _ => {
                info!(delivered = stats.delivered, "Receive adapter stopped");
                ExitCode::SUCCESS
            }
        },
        Err(e) => {
            error!(error = %e, "Receive adapter failed to start");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ConsumerStats, AdapterError> {
    let config = AdapterConfig::from_env()?;

    if let Some(addr) = config.metrics_addr {
        match PrometheusBuilder::new().with_http_listener(addr).install() {
            Ok(()) => info!(%addr, "Prometheus metrics listener started"),
            Err(e) => warn!(error = %e, "Failed to install Prometheus exporter; metrics disabled"),
        }
    }
    metrics::init_metrics();

    let sink = HttpSink::new(HttpSinkConfig::from_adapter_config(&config))?;
    let adapter = Adapter::new(config, Arc::new(sink));

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    adapter.start(cancel).await
}

async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }

    cancel.cancel();
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tributary_core=info,tributary_sinks=info"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true);

    if json {
        builder.json().init();
    } else {
        builder.with_line_number(true).init();
    }
}
