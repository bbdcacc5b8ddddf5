//! Detect RPC client channel
//!
//! The channel connects lazily on the first call and reuses the connection
//! for later calls. Any transport fault (I/O error, protocol violation,
//! timeout) marks the channel broken: every later call fails fast, and the
//! owner is expected to replace the channel with a fresh one.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use handoff_core::{HandoffError, HandoffResult, Pose, RemoteConfig};
use handoff_wire::{DetectRequest, FrameHeader, Message, HEADER_SIZE};

/// Client side of the detect RPC
pub struct RpcChannel {
    /// `host:port` of the inference service
    endpoint: String,
    connect_timeout: Duration,
    /// Deadline for one complete call, connect included
    call_timeout: Duration,
    max_message_bytes: usize,
    /// Open connection, if any
    stream: Mutex<Option<TcpStream>>,
    next_request_id: AtomicU32,
    broken: AtomicBool,
}

impl RpcChannel {
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration, call_timeout: Duration) -> Self {
        RpcChannel {
            endpoint: endpoint.into(),
            connect_timeout,
            call_timeout,
            max_message_bytes: handoff_wire::MAX_PAYLOAD_SIZE,
            stream: Mutex::new(None),
            next_request_id: AtomicU32::new(1),
            broken: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        let mut channel = Self::new(
            config.endpoint.clone(),
            config.connect_timeout,
            config.call_timeout,
        );
        channel.max_message_bytes = config.max_message_bytes.min(handoff_wire::MAX_PAYLOAD_SIZE);
        channel
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// True once a transport fault has occurred
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// Send one JPEG image and wait for the landmark response
    pub async fn detect(&self, jpeg: Bytes) -> HandoffResult<Pose> {
        if self.is_broken() {
            return Err(HandoffError::ChannelBroken);
        }
        if jpeg.len() > self.max_message_bytes {
            return Err(HandoffError::PayloadTooLarge {
                size: jpeg.len(),
                max: self.max_message_bytes,
            });
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let frame = DetectRequest::new(request_id, jpeg).encode()?;

        match timeout(self.call_timeout, self.exchange(request_id, &frame)).await {
            Ok(Ok(pose)) => Ok(pose),
            Ok(Err(err)) => {
                if is_transport_fault(&err) {
                    self.mark_broken(&err).await;
                }
                Err(err)
            }
            Err(_) => {
                let err = HandoffError::Timeout;
                self.mark_broken(&err).await;
                Err(err)
            }
        }
    }

    /// Drop the connection; later calls fail with `ChannelBroken`
    pub async fn close(&self) {
        self.broken.store(true, Ordering::SeqCst);
        if self.stream.lock().await.take().is_some() {
            tracing::debug!(endpoint = %self.endpoint, "rpc channel closed");
        }
    }

    async fn exchange(&self, request_id: u32, frame: &[u8]) -> HandoffResult<Pose> {
        let mut guard = self.stream.lock().await;

        if guard.is_none() {
            let stream = self.connect().await?;
            *guard = Some(stream);
        }
        let stream = guard
            .as_mut()
            .ok_or_else(|| HandoffError::TransportError("connection missing".into()))?;

        stream
            .write_all(frame)
            .await
            .map_err(|e| HandoffError::TransportError(e.to_string()))?;

        let mut header_buf = [0u8; HEADER_SIZE];
        stream
            .read_exact(&mut header_buf)
            .await
            .map_err(|e| HandoffError::TransportError(e.to_string()))?;
        let header = FrameHeader::parse(&header_buf)?;
        if header.payload_len as usize > self.max_message_bytes {
            return Err(HandoffError::PayloadTooLarge {
                size: header.payload_len as usize,
                max: self.max_message_bytes,
            });
        }

        let mut payload = vec![0u8; header.payload_len as usize];
        stream
            .read_exact(&mut payload)
            .await
            .map_err(|e| HandoffError::TransportError(e.to_string()))?;

        match Message::from_parts(&header, Bytes::from(payload))? {
            Message::Response(response) => {
                if response.request_id != request_id {
                    return Err(HandoffError::RequestIdMismatch {
                        expected: request_id,
                        actual: response.request_id,
                    });
                }
                response.body.into_result()
            }
            Message::Request(_) => Err(HandoffError::InvalidWireFormat(
                "service sent a request frame".into(),
            )),
        }
    }

    async fn connect(&self) -> HandoffResult<TcpStream> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(self.endpoint.as_str()))
            .await
            .map_err(|_| HandoffError::Timeout)?
            .map_err(|e| HandoffError::ConnectionFailed(e.to_string()))?;

        stream
            .set_nodelay(true)
            .map_err(|e| HandoffError::TransportError(e.to_string()))?;

        tracing::debug!(endpoint = %self.endpoint, "rpc channel connected");
        Ok(stream)
    }

    async fn mark_broken(&self, err: &HandoffError) {
        if !self.broken.swap(true, Ordering::SeqCst) {
            tracing::warn!(endpoint = %self.endpoint, error = %err, "rpc channel broken");
        }
        self.stream.lock().await.take();
    }
}

/// Errors after which the connection state is unknown
fn is_transport_fault(err: &HandoffError) -> bool {
    !matches!(
        err,
        HandoffError::RemoteDecodeFailure(_)
            | HandoffError::RemoteInternal(_)
            | HandoffError::RemoteUnavailable(_)
            | HandoffError::RemoteRejected(_)
    )
}

impl std::fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChannel")
            .field("endpoint", &self.endpoint)
            .field("call_timeout", &self.call_timeout)
            .field("broken", &self.is_broken())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handoff_core::{HandPose, LANDMARK_VALUES};
    use handoff_wire::{DetectResponse, Status};
    use tokio::net::TcpListener;

    /// Answer every request on one connection with `respond(request_id)`
    async fn spawn_responder<F>(respond: F) -> String
    where
        F: Fn(u32) -> Option<DetectResponse> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            loop {
                let mut header = [0u8; HEADER_SIZE];
                if stream.read_exact(&mut header).await.is_err() {
                    return;
                }
                let header = FrameHeader::parse(&header).unwrap();
                let mut payload = vec![0u8; header.payload_len as usize];
                stream.read_exact(&mut payload).await.unwrap();
                match respond(header.request_id) {
                    Some(response) => {
                        let bytes = response.encode().unwrap();
                        stream.write_all(&bytes).await.unwrap();
                    }
                    None => {
                        // Never answer
                        tokio::time::sleep(Duration::from_secs(60)).await;
                    }
                }
            }
        });
        addr
    }

    fn hand() -> Pose {
        let values: Vec<f32> = (0..LANDMARK_VALUES).map(|i| 0.1 + i as f32 * 0.01).collect();
        Pose::Hand(HandPose::from_values(&values).unwrap())
    }

    #[tokio::test]
    async fn test_detect_roundtrip() {
        let expected = hand();
        let reply = expected.clone();
        let addr = spawn_responder(move |id| Some(DetectResponse::landmarks(id, reply.clone()))).await;

        let channel = RpcChannel::new(addr, Duration::from_secs(1), Duration::from_secs(3));
        let pose = channel.detect(Bytes::from_static(b"jpeg")).await.unwrap();
        assert_eq!(pose, expected);

        // Connection is reused for the next call
        let again = channel.detect(Bytes::from_static(b"jpeg")).await.unwrap();
        assert_eq!(again, expected);
        assert!(!channel.is_broken());
    }

    #[tokio::test]
    async fn test_status_error_keeps_channel() {
        let addr = spawn_responder(|id| Some(DetectResponse::error(id, Status::DecodeFailure, "bad image"))).await;

        let channel = RpcChannel::new(addr, Duration::from_secs(1), Duration::from_secs(3));
        let result = channel.detect(Bytes::from_static(b"garbage")).await;

        assert!(matches!(result, Err(HandoffError::RemoteDecodeFailure(_))));
        assert!(!channel.is_broken());
    }

    #[tokio::test]
    async fn test_timeout_breaks_channel() {
        let addr = spawn_responder(|_| None).await;

        let channel = RpcChannel::new(addr, Duration::from_secs(1), Duration::from_millis(200));
        let result = channel.detect(Bytes::from_static(b"jpeg")).await;
        assert!(matches!(result, Err(HandoffError::Timeout)));
        assert!(channel.is_broken());

        let next = channel.detect(Bytes::from_static(b"jpeg")).await;
        assert!(matches!(next, Err(HandoffError::ChannelBroken)));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let channel = RpcChannel::new(addr, Duration::from_millis(500), Duration::from_secs(1));
        let result = channel.detect(Bytes::from_static(b"jpeg")).await;

        assert!(matches!(result, Err(HandoffError::ConnectionFailed(_))));
        assert!(channel.is_broken());
    }

    #[tokio::test]
    async fn test_mismatched_request_id() {
        let addr = spawn_responder(|id| Some(DetectResponse::landmarks(id + 100, Pose::Absent))).await;

        let channel = RpcChannel::new(addr, Duration::from_secs(1), Duration::from_secs(3));
        let result = channel.detect(Bytes::from_static(b"jpeg")).await;
        assert!(matches!(result, Err(HandoffError::RequestIdMismatch { .. })));
    }

    #[tokio::test]
    async fn test_closed_channel_fails_fast() {
        let channel = RpcChannel::new("127.0.0.1:9", Duration::from_secs(1), Duration::from_secs(1));
        channel.close().await;
        assert!(matches!(
            channel.detect(Bytes::from_static(b"jpeg")).await,
            Err(HandoffError::ChannelBroken)
        ));
    }
}
