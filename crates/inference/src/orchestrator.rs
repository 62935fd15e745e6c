use crate::{
    adapter,
    backend::DetectorBackend,
    decode::{DecodeError, decode_image},
    detection::{Detection, VARROA_CLASS_NAME},
    params::{DetectionParams, ParamsError},
};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use serde::Deserialize;
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Instant;
use thiserror::Error;

/// What to report when the upload cannot be decoded as an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeFailurePolicy {
    /// Treat the upload as containing no detections.
    #[default]
    Empty,
    /// Fail the request with [`DetectError::Decode`].
    Reject,
}

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("Model initialization failed: {0}")]
    ModelUnavailable(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("Invalid detection parameters: {0}")]
    InvalidParams(#[from] ParamsError),
    #[error("Inference failed: {0:#}")]
    Inference(anyhow::Error),
}

/// The loaded detector. Created once, never dropped while the orchestrator
/// lives.
struct ModelHandle<B> {
    backend: Mutex<B>,
    weights_path: String,
}

struct DetectionMetrics {
    duration: Histogram<f64>,
    requests: Counter<u64>,
    detections: Counter<u64>,
    decode_failures: Counter<u64>,
}

impl DetectionMetrics {
    fn new(meter_name: &'static str) -> Self {
        let meter = global::meter(meter_name);
        let latency_buckets = [
            0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0,
        ];
        Self {
            duration: meter
                .f64_histogram("detection_inference_duration_seconds")
                .with_description("Time spent in the detector for one upload")
                .with_unit("s")
                .with_boundaries(latency_buckets.to_vec())
                .build(),
            requests: meter
                .u64_counter("detection_requests_total")
                .with_description("Uploads handed to the orchestrator")
                .build(),
            detections: meter
                .u64_counter("detection_boxes_total")
                .with_description("Total detections returned")
                .build(),
            decode_failures: meter
                .u64_counter("detection_decode_failures_total")
                .with_description("Uploads that could not be decoded as images")
                .build(),
        }
    }
}

/// Owns the model lifecycle and turns uploaded bytes into detections.
///
/// The model is loaded on the first call to [`Orchestrator::detect`]. Callers
/// racing on that first call block until the single load finishes and then
/// share the same handle. A failed load is remembered: every later call gets
/// [`DetectError::ModelUnavailable`] without another attempt.
///
/// Inference calls are serialized on one lock since backends need `&mut`
/// access to their session.
pub struct Orchestrator<B: DetectorBackend> {
    handle: OnceLock<Result<ModelHandle<B>, String>>,
    options: B::Options,
    decode_policy: DecodeFailurePolicy,
    class_name: String,
    metrics: DetectionMetrics,
}

impl<B: DetectorBackend> Orchestrator<B> {
    pub fn new(options: B::Options, decode_policy: DecodeFailurePolicy) -> Self {
        Self {
            handle: OnceLock::new(),
            options,
            decode_policy,
            class_name: VARROA_CLASS_NAME.to_string(),
            metrics: DetectionMetrics::new("inference"),
        }
    }

    pub fn with_class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = class_name.into();
        self
    }

    /// `true` once a load has succeeded.
    pub fn is_loaded(&self) -> bool {
        matches!(self.handle.get(), Some(Ok(_)))
    }

    /// Load the model now instead of on the first request.
    pub fn warm_up(&self, weights_path: &str) -> Result<(), DetectError> {
        self.model(weights_path).map(|_| ())
    }

    fn model(&self, weights_path: &str) -> Result<&ModelHandle<B>, DetectError> {
        let handle = self.handle.get_or_init(|| {
            tracing::info!(weights_path, "Loading detection model");
            let start = Instant::now();

            match B::load_model(weights_path, &self.options) {
                Ok(backend) => {
                    tracing::info!(
                        weights_path,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Detection model ready"
                    );
                    Ok(ModelHandle {
                        backend: Mutex::new(backend),
                        weights_path: weights_path.to_string(),
                    })
                }
                Err(e) => {
                    tracing::error!(weights_path, error = %e, "Failed to load detection model");
                    Err(format!("{e:#}"))
                }
            }
        });

        let model = handle
            .as_ref()
            .map_err(|e| DetectError::ModelUnavailable(e.clone()))?;

        if model.weights_path != weights_path {
            tracing::debug!(
                loaded = %model.weights_path,
                requested = weights_path,
                "Model already loaded from a different path, reusing it"
            );
        }

        Ok(model)
    }

    /// Detect objects in an encoded image.
    ///
    /// An empty upload yields no detections. An undecodable one yields no
    /// detections or [`DetectError::Decode`], depending on the
    /// [`DecodeFailurePolicy`].
    #[tracing::instrument(skip_all, fields(bytes = image_bytes.len()))]
    pub fn detect(
        &self,
        image_bytes: &[u8],
        params: &DetectionParams,
    ) -> Result<Vec<Detection>, DetectError> {
        params.validate()?;
        let model = self.model(&params.weights_path)?;

        self.metrics.requests.add(1, &[]);

        if image_bytes.is_empty() {
            tracing::debug!("Empty upload, nothing to detect");
            return Ok(Vec::new());
        }

        let image = match decode_image(image_bytes) {
            Ok(image) => image,
            Err(e) => {
                self.metrics.decode_failures.add(1, &[]);
                return match self.decode_policy {
                    DecodeFailurePolicy::Empty => {
                        tracing::warn!(error = %e, "Upload is not a decodable image, reporting no detections");
                        Ok(Vec::new())
                    }
                    DecodeFailurePolicy::Reject => Err(e.into()),
                };
            }
        };

        let start = Instant::now();
        let detections = {
            // A panic inside a previous inference leaves the backend usable
            let mut backend = model
                .backend
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            adapter::infer(&mut *backend, &image, params, &self.class_name)
                .map_err(DetectError::Inference)?
        };
        let elapsed = start.elapsed();

        self.metrics.duration.record(
            elapsed.as_secs_f64(),
            &[KeyValue::new("input_size", params.input_size as i64)],
        );
        self.metrics.detections.add(detections.len() as u64, &[]);

        tracing::info!(
            width = image.width(),
            height = image.height(),
            detections = detections.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Detection complete"
        );

        Ok(detections)
    }
}
