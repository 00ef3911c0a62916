use opentelemetry::trace::TraceError;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use opentelemetry_semantic_conventions::resource::SERVICE_NAME;
use crate::config::settings::Tracer;

/// Instrumentation scope used by the request handlers.
pub const TRACER_NAME: &str = "liveness-engine";

pub fn init_tracer_provider(tracer: &Tracer, service_name: &str) -> Result<TracerProvider, TraceError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&tracer.uri)
        .build()?;

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(service_resource(service_name))
        .build())
}

fn service_resource(service_name: &str) -> Resource {
    Resource::new(vec![KeyValue::new(SERVICE_NAME, service_name.to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::{Key, Value};

    #[test]
    fn test_service_resource_names_service() {
        let resource = service_resource("liveness-engine");
        assert_eq!(resource.get(Key::new(SERVICE_NAME)), Some(Value::from("liveness-engine")));
    }
}
