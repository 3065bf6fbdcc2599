//! Log output and optional OTLP trace export.
//!
//! Spans created through `tracing` (including the per-request span from
//! `TraceLayer`) are exported over OTLP when `OtelConfig::enabled` is set.
//! Export failures never stop the service: the error is logged and the
//! process keeps running with local logs only.

use crate::config::OtelConfig;
use anyhow::{Result, anyhow, bail};
use opentelemetry::{
    KeyValue, global,
    propagation::TextMapCompositePropagator,
    trace::TracerProvider as _,
};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    Resource,
    propagation::{BaggagePropagator, TraceContextPropagator},
    runtime,
    trace::{BatchSpanProcessor, Sampler, TracerProvider},
};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "info,tower_http=info,sqlx=warn";

/// Keeps the tracer provider alive; call [`Telemetry::shutdown`] to flush.
pub struct Telemetry {
    tracer_provider: Option<TracerProvider>,
}

impl Telemetry {
    pub fn shutdown(self) {
        if let Some(provider) = self.tracer_provider {
            if let Err(err) = provider.shutdown() {
                tracing::warn!("failed to flush trace exporter: {}", err);
            }
        }
    }
}

/// Install the global subscriber: `RUST_LOG` filter, pretty or JSON output,
/// plus the OpenTelemetry layer when export is configured.
pub fn init(log_json: bool, otel: &OtelConfig) -> Result<Telemetry> {
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let fmt_layer = if log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let (tracer_provider, export_error) = match tracer_provider(otel) {
        Ok(provider) => (provider, None),
        Err(err) => (None, Some(err)),
    };
    let otel_layer = tracer_provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(otel.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    match (&tracer_provider, export_error) {
        (_, Some(err)) => tracing::error!(error = %err, "trace export disabled"),
        (Some(_), None) => tracing::info!(
            endpoint = otel.endpoint.as_deref().unwrap_or_default(),
            protocol = %otel.protocol,
            sampler = otel.sampler.as_deref().unwrap_or("parentbased_always_on"),
            "trace export configured"
        ),
        (None, None) => tracing::debug!("trace export not configured"),
    }

    Ok(Telemetry { tracer_provider })
}

fn tracer_provider(cfg: &OtelConfig) -> Result<Option<TracerProvider>> {
    if !cfg.enabled {
        return Ok(None);
    }

    let exporter = match cfg.protocol.as_str() {
        "grpc" => {
            let mut builder = SpanExporter::builder().with_tonic();
            if let Some(endpoint) = &cfg.endpoint {
                builder = builder.with_endpoint(endpoint.clone());
            }
            builder.build()
        }
        "http/protobuf" => {
            let mut builder = SpanExporter::builder().with_http();
            if let Some(endpoint) = &cfg.endpoint {
                builder = builder.with_endpoint(endpoint.clone());
            }
            builder.build()
        }
        other => bail!("unsupported OTLP protocol: {}", other),
    }
    .map_err(|err| anyhow!("building OTLP span exporter: {}", err))?;

    let provider = TracerProvider::builder()
        .with_span_processor(BatchSpanProcessor::builder(exporter, runtime::Tokio).build())
        .with_sampler(sampler(cfg.sampler.as_deref(), cfg.sampler_arg.as_deref()))
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            cfg.service_name.clone(),
        )]))
        .build();
    global::set_tracer_provider(provider.clone());
    Ok(Some(provider))
}

/// Map `OTEL_TRACES_SAMPLER` / `OTEL_TRACES_SAMPLER_ARG` to a sampler.
/// Unknown or missing names sample everything under the parent's decision.
fn sampler(name: Option<&str>, arg: Option<&str>) -> Sampler {
    let ratio = || {
        arg.and_then(|v| v.trim().parse::<f64>().ok())
            .unwrap_or(1.0)
            .clamp(0.0, 1.0)
    };
    match name {
        Some("always_on") => Sampler::AlwaysOn,
        Some("always_off") => Sampler::AlwaysOff,
        Some("traceidratio") => Sampler::TraceIdRatioBased(ratio()),
        Some("parentbased_always_off") => Sampler::ParentBased(Box::new(Sampler::AlwaysOff)),
        Some("parentbased_traceidratio") => {
            Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(ratio())))
        }
        _ => Sampler::ParentBased(Box::new(Sampler::AlwaysOn)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampler_names_follow_otel_conventions() {
        assert!(matches!(sampler(Some("always_off"), None), Sampler::AlwaysOff));
        assert!(matches!(sampler(Some("always_on"), None), Sampler::AlwaysOn));
        assert!(matches!(
            sampler(Some("traceidratio"), Some("0.25")),
            Sampler::TraceIdRatioBased(r) if r == 0.25
        ));
        assert!(matches!(
            sampler(Some("traceidratio"), Some("7")),
            Sampler::TraceIdRatioBased(r) if r == 1.0
        ));

        match sampler(Some("parentbased_traceidratio"), Some("bogus")) {
            Sampler::ParentBased(inner) => {
                assert!(matches!(*inner, Sampler::TraceIdRatioBased(r) if r == 1.0))
            }
            _ => panic!("expected a parent-based sampler"),
        }
        match sampler(None, None) {
            Sampler::ParentBased(inner) => assert!(matches!(*inner, Sampler::AlwaysOn)),
            _ => panic!("expected a parent-based sampler"),
        }
    }

    #[test]
    fn disabled_export_builds_no_provider() {
        let cfg = OtelConfig {
            enabled: false,
            endpoint: None,
            protocol: "grpc".into(),
            service_name: "document-api".into(),
            sampler: None,
            sampler_arg: None,
        };
        assert!(tracer_provider(&cfg).unwrap().is_none());
    }

    #[test]
    fn unknown_protocols_are_rejected() {
        let cfg = OtelConfig {
            enabled: true,
            endpoint: Some("http://collector:4317".into()),
            protocol: "carrier-pigeon".into(),
            service_name: "document-api".into(),
            sampler: None,
            sampler_arg: None,
        };
        let err = tracer_provider(&cfg).unwrap_err();
        assert!(err.to_string().contains("carrier-pigeon"));
    }
}
