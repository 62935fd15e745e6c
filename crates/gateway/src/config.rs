use crate::weights::resolve_weights_path;
use common::Environment;
use inference::{
    DecodeFailurePolicy, DetectionParams, VARROA_CLASS_NAME,
    backend::ort::{ExecutionProvider, OrtOptions},
    params::{
        DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_INPUT_SIZE, DEFAULT_IOU_THRESHOLD,
        DEFAULT_MAX_DETECTIONS,
    },
};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const LOCAL_WEIGHTS_PATH: &str = "model/weights/best.onnx";
pub const DEPLOYMENT_WEIGHTS_PATH: &str = "/app/model/weights/best.onnx";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub log_level: LogLevel,
    pub environment: Environment,

    pub host: IpAddr,
    pub port: u16,
    pub max_body_bytes: usize,
    /// Requests handled at once across all routes.
    pub max_in_flight_requests: usize,
    pub max_concurrent_inferences: usize,
    pub queue_timeout_ms: u64,

    /// Explicit weights file. When unset, see [`Config::resolve_weights_path`].
    pub weights_path: Option<String>,
    pub local_weights_path: String,
    pub default_weights_path: String,

    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
    pub max_detections: usize,
    pub class_name: String,
    pub decode_failure: DecodeFailurePolicy,

    pub execution_provider: ExecutionProvider,
    pub intra_threads: usize,
    /// Load the model at startup instead of on the first upload.
    pub preload_model: bool,

    pub otel_endpoint: Option<String>,
}

impl Config {
    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    pub fn resolve_weights_path(&self) -> PathBuf {
        resolve_weights_path(
            self.weights_path.as_deref(),
            Path::new(&self.local_weights_path),
            Path::new(&self.default_weights_path),
        )
    }

    pub fn detection_params(&self) -> DetectionParams {
        DetectionParams {
            confidence_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
            input_size: self.input_size,
            max_detections: self.max_detections,
            weights_path: self.resolve_weights_path().to_string_lossy().into_owned(),
        }
    }

    pub fn ort_options(&self) -> OrtOptions {
        OrtOptions {
            provider: self.execution_provider,
            intra_threads: self.intra_threads,
        }
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.max_concurrent_inferences == 0 {
            return Err(config::ConfigError::Message(
                "max_concurrent_inferences must be positive".to_string(),
            ));
        }
        if self.max_in_flight_requests == 0 {
            return Err(config::ConfigError::Message(
                "max_in_flight_requests must be positive".to_string(),
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(config::ConfigError::Message(
                "max_body_bytes must be positive".to_string(),
            ));
        }
        if self.class_name.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "class_name must not be empty".to_string(),
            ));
        }

        self.detection_params()
            .validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    build_configuration(None)
}

/// Build the configuration from defaults and `VARROA_*` variables.
///
/// `overrides` replaces the process environment as the variable source.
pub fn build_configuration(
    overrides: Option<config::Map<String, String>>,
) -> Result<Config, config::ConfigError> {
    let config = config::Config::builder()
        .set_default("log_level", "info")?
        .set_default("environment", "development")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8750)?
        .set_default("max_body_bytes", 64 * 1024 * 1024)?
        .set_default("max_in_flight_requests", 256)?
        .set_default("max_concurrent_inferences", 4)?
        .set_default("queue_timeout_ms", 120_000)?
        .set_default("local_weights_path", LOCAL_WEIGHTS_PATH)?
        .set_default("default_weights_path", DEPLOYMENT_WEIGHTS_PATH)?
        .set_default("confidence_threshold", DEFAULT_CONFIDENCE_THRESHOLD as f64)?
        .set_default("iou_threshold", DEFAULT_IOU_THRESHOLD as f64)?
        .set_default("input_size", DEFAULT_INPUT_SIZE as i64)?
        .set_default("max_detections", DEFAULT_MAX_DETECTIONS as i64)?
        .set_default("class_name", VARROA_CLASS_NAME)?
        .set_default("decode_failure", "empty")?
        .set_default("execution_provider", "cpu")?
        .set_default("intra_threads", 4)?
        .set_default("preload_model", false)?
        .add_source(
            config::Environment::with_prefix("VARROA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(overrides),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;
    config.validate()?;

    Ok(config)
}
