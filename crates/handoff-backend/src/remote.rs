//! Remote back end: JPEG frames over the detect RPC

use image::RgbImage;

use handoff_core::{BackendError, Pose, RemoteConfig};
use handoff_transport::RpcChannel;

use crate::{encode_jpeg, InferenceBackend};

/// Inference on the remote service through one RPC channel
#[derive(Debug)]
pub struct RemoteBackend {
    channel: RpcChannel,
    jpeg_quality: u8,
}

impl RemoteBackend {
    pub fn new(channel: RpcChannel, jpeg_quality: u8) -> Self {
        RemoteBackend {
            channel,
            jpeg_quality,
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        Self::new(RpcChannel::from_config(config), config.jpeg_quality)
    }

    pub fn channel(&self) -> &RpcChannel {
        &self.channel
    }
}

impl InferenceBackend for RemoteBackend {
    async fn detect(&self, image: &RgbImage) -> Result<Pose, BackendError> {
        let jpeg = encode_jpeg(image, self.jpeg_quality)?;
        let pose = self.channel.detect(jpeg).await?;
        Ok(pose)
    }

    async fn close(&self) {
        self.channel.close().await;
    }
}

/// Creates fresh remote back ends.
///
/// The controller opens a new one on every promote so a connection left
/// broken while degraded is never reused.
pub trait RemoteConnector: Send + Sync + 'static {
    type Backend: InferenceBackend;

    fn open(&self) -> Self::Backend;
}

/// Opens [`RemoteBackend`]s for the configured endpoint
#[derive(Clone, Debug)]
pub struct RpcConnector {
    config: RemoteConfig,
}

impl RpcConnector {
    pub fn new(config: RemoteConfig) -> Self {
        RpcConnector { config }
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

impl RemoteConnector for RpcConnector {
    type Backend = RemoteBackend;

    fn open(&self) -> RemoteBackend {
        tracing::debug!(endpoint = %self.config.endpoint, "opening remote channel");
        RemoteBackend::from_config(&self.config)
    }
}
