use crate::model::ClassifierStatus;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use serde::Deserialize;
use std::time::{Duration, Instant};

#[derive(Debug, Deserialize, Default, Clone)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

fn default_transport() -> String {
    "http".into()
}

fn default_endpoint() -> String {
    "http://localhost:8428/opentelemetry/v1/metrics".into()
}

/// Build and register a global meter provider.
/// For gRPC transport, requires an active tokio runtime context.
pub fn init_meter_provider(config: &MetricsConfig) -> Option<SdkMeterProvider> {
    if !config.enabled {
        return None;
    }

    let resource = Resource::builder_empty()
        .with_attributes([KeyValue::new("service.name", "tutorlens")])
        .build();

    let exporter = match config.transport.as_str() {
        "grpc" => opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(&config.endpoint)
            .with_protocol(Protocol::Grpc)
            .with_timeout(Duration::from_secs(5))
            .build(),
        _ => opentelemetry_otlp::MetricExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(&config.endpoint)
            .with_timeout(Duration::from_secs(5))
            .build(),
    }
    .map_err(|e| log::warn!("metrics {} exporter: {e}", config.transport))
    .ok()?;

    let provider = SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(resource)
        .build();

    opentelemetry::global::set_meter_provider(provider.clone());
    Some(provider)
}

/// Count one classifier pipeline outcome. No-op until a provider is installed.
pub fn record_classifier_run(status: ClassifierStatus) {
    opentelemetry::global::meter("tutorlens")
        .u64_counter("tutorlens_classifier_runs_total")
        .build()
        .add(1, &[KeyValue::new("status", status.as_str())]);
}

pub fn record_query(tool: &str, start: Instant) {
    let meter = opentelemetry::global::meter("tutorlens");
    meter
        .u64_counter("tutorlens_queries_total")
        .build()
        .add(1, &[KeyValue::new("tool", tool.to_string())]);
    meter
        .f64_histogram("tutorlens_query_duration_seconds")
        .build()
        .record(
            start.elapsed().as_secs_f64(),
            &[KeyValue::new("tool", tool.to_string())],
        );
}
