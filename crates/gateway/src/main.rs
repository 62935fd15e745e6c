use common::TelemetryGuard;
use gateway::{
    AppState, config::get_configuration, logging::setup_logging, router, run_server,
};
use inference::{Orchestrator, backend::ort::OrtBackend};
use std::sync::Arc;

const SERVICE_NAME: &str = "varroa-api";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = get_configuration()?;

    let _telemetry = match config.otel_endpoint.as_deref() {
        Some(endpoint) => Some(TelemetryGuard::init(
            SERVICE_NAME,
            endpoint,
            config.log_level.as_str(),
            config.environment,
        )?),
        None => {
            setup_logging(&config);
            None
        }
    };

    let params = config.detection_params();
    tracing::info!(
        environment = config.environment.as_str(),
        weights_path = %params.weights_path,
        input_size = params.input_size,
        confidence_threshold = params.confidence_threshold,
        decode_failure = ?config.decode_failure,
        "Starting varroa detection API"
    );

    let orchestrator = Arc::new(
        Orchestrator::<OrtBackend>::new(config.ort_options(), config.decode_failure)
            .with_class_name(config.class_name.clone()),
    );

    if config.preload_model {
        let warm = orchestrator.clone();
        let weights_path = params.weights_path.clone();
        // A failed preload is cached; uploads then get 500 instead of the process exiting.
        let loaded = tokio::task::spawn_blocking(move || warm.warm_up(&weights_path)).await?;
        if let Err(e) = loaded {
            tracing::error!(error = %e, "Model preload failed");
        }
    }

    let state = AppState::new(
        orchestrator,
        params,
        config.max_concurrent_inferences,
        config.queue_timeout(),
    );
    let app = router(
        state,
        config.max_body_bytes,
        config.max_in_flight_requests,
    );

    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    run_server(listener, app).await?;

    Ok(())
}
