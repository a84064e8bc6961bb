//! Provides helper functions for initializing logging, trace export and metrics.
use std::time::Duration;

use anyhow::Result;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{metrics::MeterProvider, runtime, trace, Resource};
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter, Layer, Registry};

/// Format of log lines written to stdout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Compact human readable lines.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Handle to the installed telemetry pipelines.
///
/// Call [`Telemetry::shutdown`] before exiting so buffered spans and metrics are flushed.
pub struct Telemetry {
    meter_provider: Option<MeterProvider>,
}

impl Telemetry {
    /// Flush and stop all exporters.
    pub fn shutdown(self) -> Result<()> {
        global::shutdown_tracer_provider();
        if let Some(meter_provider) = self.meter_provider {
            meter_provider.shutdown()?;
        }
        Ok(())
    }
}

fn resource(service_name: &'static str) -> Resource {
    Resource::new(vec![
        KeyValue::new(
            "hostname",
            gethostname::gethostname()
                .into_string()
                .unwrap_or_else(|_| "unknown".to_owned()),
        ),
        KeyValue::new("service.name", service_name),
    ])
}

/// Initialize logging, and when an OTLP endpoint is provided, trace and metric export.
pub fn init(
    service_name: &'static str,
    log_format: LogFormat,
    otlp_endpoint: Option<String>,
) -> Result<Telemetry> {
    // Default to INFO if no env is specified
    let log_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;
    let logger: Box<dyn Layer<Registry> + Send + Sync> = match log_format {
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .compact()
            .with_filter(log_filter)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_filter(log_filter)
            .boxed(),
    };

    let mut layers = vec![logger];
    let mut meter_provider = None;

    if let Some(endpoint) = otlp_endpoint {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint.clone()),
            )
            .with_trace_config(trace::config().with_resource(resource(service_name)))
            .install_batch(runtime::Tokio)?;

        let provider = opentelemetry_otlp::new_pipeline()
            .metrics(runtime::Tokio)
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint),
            )
            .with_resource(resource(service_name))
            .with_period(Duration::from_secs(10))
            .build()?;
        global::set_meter_provider(provider.clone());
        meter_provider = Some(provider);

        let otlp_filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env()?;
        layers.push(
            tracing_opentelemetry::layer()
                .with_tracer(tracer)
                .with_filter(otlp_filter)
                .boxed(),
        );
    }

    #[cfg(feature = "tokio-console")]
    {
        let console_filter = EnvFilter::builder().parse("tokio=trace,runtime=trace")?;
        layers.push(
            console_subscriber::spawn()
                .with_filter(console_filter)
                .boxed(),
        );
    }

    let collector = Registry::default().with(layers);
    tracing::subscriber::set_global_default(collector)?;

    Ok(Telemetry { meter_provider })
}
