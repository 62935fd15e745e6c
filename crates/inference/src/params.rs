use thiserror::Error;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.1;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;
pub const DEFAULT_INPUT_SIZE: u32 = 6016;
pub const DEFAULT_MAX_DETECTIONS: usize = 2000;
/// Largest accepted model input side. The letterbox buffer is `side² × 3` bytes.
pub const MAX_INPUT_SIZE: u32 = 8192;

#[derive(Error, Debug, PartialEq)]
pub enum ParamsError {
    #[error("confidence threshold {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f32),
    #[error("IoU threshold {0} is outside [0, 1]")]
    IouOutOfRange(f32),
    #[error("input size must be positive")]
    ZeroInputSize,
    #[error("input size {0} exceeds the maximum of {max}", max = MAX_INPUT_SIZE)]
    InputSizeTooLarge(u32),
    #[error("max detections must be positive")]
    ZeroMaxDetections,
    #[error("weights path is empty")]
    EmptyWeightsPath,
}

/// Tunables handed to the detector for a single request.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionParams {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Side of the square model input, in pixels.
    pub input_size: u32,
    pub max_detections: usize,
    pub weights_path: String,
}

impl DetectionParams {
    /// Service defaults for the given weights file.
    pub fn new(weights_path: impl Into<String>) -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            input_size: DEFAULT_INPUT_SIZE,
            max_detections: DEFAULT_MAX_DETECTIONS,
            weights_path: weights_path.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ParamsError::ConfidenceOutOfRange(self.confidence_threshold));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(ParamsError::IouOutOfRange(self.iou_threshold));
        }
        if self.input_size == 0 {
            return Err(ParamsError::ZeroInputSize);
        }
        if self.input_size > MAX_INPUT_SIZE {
            return Err(ParamsError::InputSizeTooLarge(self.input_size));
        }
        if self.max_detections == 0 {
            return Err(ParamsError::ZeroMaxDetections);
        }
        if self.weights_path.is_empty() {
            return Err(ParamsError::EmptyWeightsPath);
        }
        Ok(())
    }
}
