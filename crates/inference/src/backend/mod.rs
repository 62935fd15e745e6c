use crate::{detection::ResultGroup, params::DetectionParams};
use image::RgbImage;

#[cfg(feature = "ort-backend")]
pub mod ort;

/// A loadable object detector.
///
/// Implementations receive a decoded RGB image and return one
/// [`ResultGroup`] per image they processed internally. Groups may be empty.
/// `infer` takes `&mut self`; callers sharing a backend across threads must
/// serialize access.
pub trait DetectorBackend: Send {
    /// Backend-specific load settings (execution provider, threads, ...).
    type Options: Send + Sync;

    fn load_model(path: &str, options: &Self::Options) -> anyhow::Result<Self>
    where
        Self: Sized;

    fn infer(
        &mut self,
        image: &RgbImage,
        params: &DetectionParams,
    ) -> anyhow::Result<Vec<ResultGroup>>;
}
