//! Server-side adapter from detect requests to a back end

use handoff_core::BackendError;
use handoff_transport::FrameHandler;
use handoff_wire::{DetectRequest, ResponseBody, Status};

use crate::{decode_image, InferenceBackend};

/// Serves detect requests with the wrapped back end.
///
/// "No hand" travels as 63 zeros; a bad image or a failing back end travels
/// as an error status, never as zeros.
pub struct DetectionService<B> {
    backend: B,
}

impl<B: InferenceBackend> DetectionService<B> {
    pub fn new(backend: B) -> Self {
        DetectionService { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: InferenceBackend> FrameHandler for DetectionService<B> {
    async fn handle(&self, request: DetectRequest) -> ResponseBody {
        let image = match decode_image(&request.image) {
            Ok(image) => image,
            Err(e) => {
                tracing::debug!(request_id = request.request_id, error = %e, "undecodable image");
                return ResponseBody::error(Status::DecodeFailure, e.to_string());
            }
        };

        match self.backend.detect(&image).await {
            Ok(pose) => {
                tracing::trace!(request_id = request.request_id, hand = pose.is_present(), "detect ok");
                ResponseBody::Landmarks(pose)
            }
            Err(err) => {
                tracing::warn!(request_id = request.request_id, error = %err, "detect failed");
                let status = match &err {
                    BackendError::DecodeFailure(_) => Status::DecodeFailure,
                    BackendError::Unavailable(_) => Status::Unavailable,
                    BackendError::Timeout | BackendError::TransportFailure(_) => Status::Internal,
                };
                ResponseBody::error(status, err.to_string())
            }
        }
    }
}
