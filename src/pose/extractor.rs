use anyhow::Result;
use image::RgbImage;

use super::landmark::LandmarkFrame;

/// Single-person pose estimator.
///
/// `Ok(None)` means no body was found in the image. Implementations are
/// driven from one worker thread at a time and hold model state, so each
/// session owns its own instance; dropping it releases the model.
pub trait PoseExtractor: Send + 'static {
    fn detect(&mut self, image: &RgbImage) -> Result<Option<LandmarkFrame>>;
}

/// Creates one [`PoseExtractor`] per session.
///
/// Called on a worker thread, since loading a model can take a while.
pub trait ExtractorFactory: Send + Sync + 'static {
    fn create(&self) -> Result<Box<dyn PoseExtractor>>;
}
