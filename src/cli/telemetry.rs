//! Log output and optional OTLP trace export.
//!
//! Logs always go to stderr through `tracing-subscriber`. Spans are also
//! exported over OTLP/gRPC when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

use anyhow::{Context, Result, anyhow};
use base64ct::{Base64, Encoding};
use once_cell::sync::OnceCell;
use opentelemetry::{
    KeyValue, global, propagation::TextMapCompositePropagator, trace::TracerProvider as _,
};
use opentelemetry_otlp::{Compression, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
};
use std::{env::var, time::Duration};
use tonic::{
    metadata::{Ascii, Binary, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{Level, debug};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};
use ulid::Ulid;

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

const ENV_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const ENV_HEADERS: &str = "OTEL_EXPORTER_OTLP_HEADERS";
const ENV_PROTOCOL: &str = "OTEL_EXPORTER_OTLP_PROTOCOL";
const ENV_INSTANCE_ID: &str = "OTEL_SERVICE_INSTANCE_ID";

const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

/// Exporter settings taken from the standard `OTEL_*` variables.
#[derive(Debug)]
struct OtlpSettings {
    endpoint: String,
    metadata: MetadataMap,
    instance_id: String,
}

impl OtlpSettings {
    fn from_env() -> Result<Option<Self>> {
        let Ok(endpoint) = var(ENV_ENDPOINT) else {
            return Ok(None);
        };

        if let Ok(protocol) = var(ENV_PROTOCOL)
            && protocol != "grpc"
        {
            debug!("{ENV_PROTOCOL}='{protocol}' ignored: only 'grpc' is supported");
        }

        let metadata = match var(ENV_HEADERS) {
            Ok(headers) => metadata(&headers)?,
            Err(_) => MetadataMap::new(),
        };

        Ok(Some(Self {
            endpoint: with_scheme(&endpoint),
            metadata,
            instance_id: var(ENV_INSTANCE_ID).unwrap_or_else(|_| Ulid::new().to_string()),
        }))
    }

    /// Host to verify against when the endpoint is https.
    fn tls_host(&self) -> Option<&str> {
        self.endpoint
            .strip_prefix("https://")
            .and_then(|rest| rest.split(['/', ':']).next())
            .filter(|host| !host.is_empty())
    }
}

/// `k1=v1,k2=v2` into gRPC metadata. Keys ending in `-bin` carry base64 values.
fn metadata(headers: &str) -> Result<MetadataMap> {
    let mut map = MetadataMap::new();

    for (key, value) in headers
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim()))
    {
        if key.ends_with("-bin") {
            let bytes = Base64::decode_vec(value)
                .map_err(|e| anyhow!("failed to base64-decode value for key {key}: {e}"))?;
            let name = MetadataKey::<Binary>::from_bytes(key.as_bytes())
                .map_err(|e| anyhow!("invalid binary metadata key {key}: {e}"))?;
            map.insert_bin(name, MetadataValue::from_bytes(&bytes));
        } else {
            let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
                .map_err(|e| anyhow!("invalid metadata key {key}: {e}"))?;
            let value: MetadataValue<Ascii> = value
                .parse()
                .map_err(|e| anyhow!("invalid metadata value for key {key}: {e}"))?;
            map.insert(name, value);
        }
    }

    Ok(map)
}

/// Bare `host:port` endpoints are assumed to be TLS.
fn with_scheme(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint.trim_end_matches('/'))
    }
}

fn init_tracer(settings: OtlpSettings) -> Result<Tracer> {
    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&settings.endpoint)
        .with_compression(Compression::Gzip)
        .with_timeout(EXPORT_TIMEOUT);

    if let Some(host) = settings.tls_host() {
        builder = builder.with_tls_config(
            ClientTlsConfig::new()
                .domain_name(host.to_string())
                .with_native_roots(),
        );
    }

    if !settings.metadata.is_empty() {
        builder = builder.with_metadata(settings.metadata);
    }

    let exporter = builder
        .build()
        .with_context(|| format!("Failed to build OTLP exporter for {}", settings.endpoint))?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder_empty()
                .with_attributes(vec![
                    KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                    KeyValue::new("service.instance.id", settings.instance_id),
                ])
                .build(),
        )
        .build();

    let _ = TRACER_PROVIDER.set(provider.clone());

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    Ok(provider.tracer(env!("CARGO_PKG_NAME")))
}

/// Install the global subscriber. `None` logs errors only.
///
/// # Errors
///
/// Returns an error if the OTLP settings are invalid or a subscriber is
/// already installed.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false)
        .pretty();

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity_level.unwrap_or(Level::ERROR).into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?);

    let registry = Registry::default().with(fmt_layer).with(filter);

    match OtlpSettings::from_env()? {
        Some(settings) => {
            let tracer = init_tracer(settings)?;
            tracing::subscriber::set_global_default(
                registry.with(tracing_opentelemetry::layer().with_tracer(tracer)),
            )?;
        }
        None => tracing::subscriber::set_global_default(registry)?,
    }

    Ok(())
}

/// Flush pending spans. No-op when the exporter was never started.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("shutting down tracer provider");
        let _ = provider.shutdown();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn metadata_from_header_list() {
        assert!(metadata("").unwrap().is_empty());

        let map = metadata("Authorization = Bearer abc , trace-bin=YmluYXJ5,malformed").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("authorization").unwrap(), "Bearer abc");
        assert!(map.get_bin("trace-bin").is_some());
    }

    #[test]
    fn metadata_value_may_contain_equals() {
        let map = metadata("authorization=Basic dXNlcjpwYXNz==").unwrap();
        assert_eq!(map.get("authorization").unwrap(), "Basic dXNlcjpwYXNz==");
    }

    #[test]
    fn metadata_rejects_bad_base64() {
        let err = metadata("custom-bin=not-valid-base64!!!").unwrap_err();
        assert!(err.to_string().contains("failed to base64-decode"));
    }

    #[test]
    fn endpoint_scheme_defaults_to_https() {
        assert_eq!(with_scheme("http://localhost:4317"), "http://localhost:4317");
        assert_eq!(with_scheme("localhost:4317"), "https://localhost:4317");
        assert_eq!(
            with_scheme("api.example.com:4317/"),
            "https://api.example.com:4317"
        );
    }

    #[test]
    fn settings_from_env() {
        temp_env::with_vars(
            [
                (ENV_ENDPOINT, Some("otel.example.com:4317")),
                (ENV_HEADERS, Some("x-team=gatehouse")),
                (ENV_INSTANCE_ID, Some("node-1")),
            ],
            || {
                let settings = OtlpSettings::from_env().unwrap().unwrap();
                assert_eq!(settings.endpoint, "https://otel.example.com:4317");
                assert_eq!(settings.tls_host(), Some("otel.example.com"));
                assert_eq!(settings.instance_id, "node-1");
                assert_eq!(settings.metadata.len(), 1);
            },
        );

        temp_env::with_var_unset(ENV_ENDPOINT, || {
            assert!(OtlpSettings::from_env().unwrap().is_none());
        });

        temp_env::with_var(ENV_ENDPOINT, Some("http://localhost:4317"), || {
            let settings = OtlpSettings::from_env().unwrap().unwrap();
            assert_eq!(settings.tls_host(), None);
        });
    }

    #[test]
    fn shutdown_without_provider_is_noop() {
        shutdown_tracer();
    }
}
