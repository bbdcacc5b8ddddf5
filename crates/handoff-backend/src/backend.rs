//! The inference capability shared by local and remote back ends

use std::future::Future;
use std::sync::Arc;

use image::RgbImage;

use handoff_core::{BackendError, Pose};

/// Given an image, return zero-or-one hand pose, or fail.
///
/// Implementations must not retain the image past the call and must not
/// block forever: remote back ends enforce a call timeout, local back ends
/// finish within a frame budget.
pub trait InferenceBackend: Send + Sync + 'static {
    /// Detect a hand in `image`
    fn detect(&self, image: &RgbImage) -> impl Future<Output = Result<Pose, BackendError>> + Send;

    /// Release any connection held by the back end
    fn close(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

impl<B: InferenceBackend> InferenceBackend for Arc<B> {
    fn detect(&self, image: &RgbImage) -> impl Future<Output = Result<Pose, BackendError>> + Send {
        (**self).detect(image)
    }

    fn close(&self) -> impl Future<Output = ()> + Send {
        (**self).close()
    }
}
