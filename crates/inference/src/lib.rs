pub mod adapter;
pub mod backend;
pub mod decode;
pub mod detection;
pub mod orchestrator;
pub mod params;
pub mod processing;

// Re-export commonly used types for convenience
pub use backend::DetectorBackend;
pub use decode::DecodeError;
pub use detection::{Detection, RawBox, ResultGroup, VARROA_CLASS_NAME};
pub use orchestrator::{DecodeFailurePolicy, DetectError, Orchestrator};
pub use params::{DetectionParams, ParamsError};
