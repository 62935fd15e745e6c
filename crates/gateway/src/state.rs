use inference::{DetectionParams, DetectorBackend, Orchestrator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Shared by every request handler. The orchestrator (and the model it
/// owns) is the only cross-request state.
pub struct AppState<B: DetectorBackend> {
    pub orchestrator: Arc<Orchestrator<B>>,
    pub params: Arc<DetectionParams>,
    /// Bounds how many uploads may be in the detection stage at once.
    pub inference_permits: Arc<Semaphore>,
    /// How long an upload waits for a permit before the server reports busy.
    pub queue_timeout: Duration,
}

impl<B: DetectorBackend> AppState<B> {
    pub fn new(
        orchestrator: Arc<Orchestrator<B>>,
        params: DetectionParams,
        max_concurrent_inferences: usize,
        queue_timeout: Duration,
    ) -> Self {
        Self {
            orchestrator,
            params: Arc::new(params),
            inference_permits: Arc::new(Semaphore::new(max_concurrent_inferences)),
            queue_timeout,
        }
    }
}

// Manual impl: deriving would require `B: Clone`.
impl<B: DetectorBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
            params: self.params.clone(),
            inference_permits: self.inference_permits.clone(),
            queue_timeout: self.queue_timeout,
        }
    }
}
