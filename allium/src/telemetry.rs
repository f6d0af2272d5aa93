// Copyright (c) 2024 Botho Foundation

//! Tracing setup for routers embedding this crate.
//!
//! Console logging is always installed. When enabled, spans are also exported
//! over OTLP so the send and receive paths of several routers can be followed
//! in one collector.
//!
//! ```toml
//! [telemetry]
//! enabled = true
//! endpoint = "http://localhost:4317"
//! service_name = "allium-router"
//! sampling_rate = 0.1
//! level = "debug"
//! ```
//!
//! `RUST_LOG`, when set, overrides `level`.

use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime,
    trace::{RandomIdGenerator, Sampler, Tracer},
    Resource,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Whether OTLP export is enabled
    pub enabled: bool,
    /// OTLP endpoint (gRPC)
    pub endpoint: String,
    /// Service name for traces
    pub service_name: String,
    /// Sampling rate (0.0 to 1.0)
    pub sampling_rate: f64,
    /// Default log filter, e.g. `info` or `allium=debug`
    pub level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:4317".to_string(),
            service_name: "allium-router".to_string(),
            sampling_rate: 1.0,
            level: "info".to_string(),
        }
    }
}

impl TelemetryConfig {
    fn sampler(&self) -> Sampler {
        if self.sampling_rate >= 1.0 {
            Sampler::AlwaysOn
        } else if self.sampling_rate <= 0.0 {
            Sampler::AlwaysOff
        } else {
            Sampler::TraceIdRatioBased(self.sampling_rate)
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

/// Install the global subscriber.
///
/// Returns a guard when OTLP export is enabled; hold it for the life of the
/// process so pending spans are flushed on shutdown. Fails if a global
/// subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> Result<Option<TelemetryGuard>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(config.filter());

    if config.enabled {
        let tracer = init_otlp_tracer(config)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .with(telemetry_layer)
            .try_init()
            .context("Failed to install tracing subscriber")?;

        tracing::info!(
            endpoint = %config.endpoint,
            service = %config.service_name,
            sampling_rate = config.sampling_rate,
            "OpenTelemetry tracing enabled"
        );

        Ok(Some(TelemetryGuard))
    } else {
        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .context("Failed to install tracing subscriber")?;

        Ok(None)
    }
}

fn init_otlp_tracer(config: &TelemetryConfig) -> Result<Tracer> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(config.endpoint.clone());

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            opentelemetry_sdk::trace::config()
                .with_sampler(config.sampler())
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", config.service_name.clone()),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .install_batch(runtime::Tokio)
        .context("Failed to install OTLP tracer")
}

/// Flushes pending spans when dropped.
#[derive(Debug)]
pub struct TelemetryGuard;

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        opentelemetry::global::shutdown_tracer_provider();
    }
}
