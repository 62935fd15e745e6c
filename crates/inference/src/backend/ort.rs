use super::DetectorBackend;
use crate::{
    detection::ResultGroup,
    params::DetectionParams,
    processing::{post::PostProcessor, pre::PreProcessor},
};
use image::RgbImage;
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    #[default]
    Cpu,
    Cuda,
}

#[derive(Debug, Clone)]
pub struct OrtOptions {
    pub provider: ExecutionProvider,
    pub intra_threads: usize,
}

impl Default for OrtOptions {
    fn default() -> Self {
        Self {
            provider: ExecutionProvider::Cpu,
            intra_threads: 4,
        }
    }
}

/// YOLO detector running on ONNX Runtime.
pub struct OrtBackend {
    session: Session,
    preprocessor: PreProcessor,
}

impl DetectorBackend for OrtBackend {
    type Options = OrtOptions;

    fn load_model(path: &str, options: &OrtOptions) -> anyhow::Result<Self> {
        // Initialize ORT environment (idempotent)
        let _ = ort::init().commit();

        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(options.intra_threads)?;

        match options.provider {
            ExecutionProvider::Cuda => {
                tracing::info!("Initializing ONNX Runtime with CUDA execution provider");
                // Registration failure falls back to CPU
                builder = builder.with_execution_providers([
                    ort::execution_providers::CUDAExecutionProvider::default()
                        .with_device_id(0)
                        .build(),
                ])?;
            }
            ExecutionProvider::Cpu => {
                tracing::info!("Initializing ONNX Runtime with CPU execution provider");
            }
        }

        let session = builder.commit_from_file(path)?;

        tracing::info!(path, "Model loaded");
        Ok(Self {
            session,
            preprocessor: PreProcessor::new(crate::params::DEFAULT_INPUT_SIZE),
        })
    }

    fn infer(
        &mut self,
        image: &RgbImage,
        params: &DetectionParams,
    ) -> anyhow::Result<Vec<ResultGroup>> {
        let (input, transform) = self.preprocessor.preprocess(image, params.input_size)?;

        let outputs = {
            let _infer_span = tracing::info_span!("model_inference").entered();
            self.session
                .run(ort::inputs![TensorRef::from_array_view(input.view())?])?
        };

        let output = outputs[0].try_extract_array::<f32>()?;

        PostProcessor::from_params(params).parse_detections(&output, &transform)
    }
}
