//! Detect RPC server
//!
//! One task per connection, many requests per connection, and a semaphore
//! bounding how many requests run inference at once. Shutdown stops the
//! accept loop, lets every connection finish the request it is serving and
//! joins all connection tasks before returning.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use handoff_core::{HandoffError, HandoffResult};
use handoff_wire::{DetectRequest, DetectResponse, FrameHeader, Message, ResponseBody, Status, HEADER_SIZE};

/// Server-side detect logic
pub trait FrameHandler: Send + Sync + 'static {
    /// Produce the response body for one request
    fn handle(&self, request: DetectRequest) -> impl Future<Output = ResponseBody> + Send;
}

/// Counters reported when the server stops
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub connections: u64,
    pub requests: u64,
    pub error_responses: u64,
}

#[derive(Default)]
struct Counters {
    connections: AtomicU64,
    requests: AtomicU64,
    error_responses: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ServerStats {
        ServerStats {
            connections: self.connections.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            error_responses: self.error_responses.load(Ordering::Relaxed),
        }
    }
}

/// Bound listener ready to serve
pub struct RpcServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    max_concurrent: usize,
}

impl RpcServer {
    /// Bind to a local address
    pub async fn bind(addr: &str, max_concurrent: usize) -> HandoffResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HandoffError::TransportError(e.to_string()))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| HandoffError::TransportError(e.to_string()))?;

        Ok(RpcServer {
            listener,
            local_addr,
            max_concurrent: max_concurrent.max(1),
        })
    }

    /// Get local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until `shutdown` turns true (or its sender is dropped)
    pub async fn serve<H: FrameHandler>(
        self,
        handler: Arc<H>,
        mut shutdown: watch::Receiver<bool>,
    ) -> HandoffResult<ServerStats> {
        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let counters = Arc::new(Counters::default());
        let mut connections = JoinSet::new();

        tracing::info!(addr = %self.local_addr, max_concurrent = self.max_concurrent, "detect service listening");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            counters.connections.fetch_add(1, Ordering::Relaxed);
                            tracing::info!(%peer, "client connected");
                            connections.spawn(serve_connection(
                                stream,
                                peer,
                                Arc::clone(&handler),
                                Arc::clone(&permits),
                                Arc::clone(&counters),
                                shutdown.clone(),
                            ));
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "connection task panicked");
                    }
                }
            }
        }

        tracing::info!(open = connections.len(), "detect service draining connections");
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "connection task panicked");
            }
        }

        let stats = counters.snapshot();
        tracing::info!(?stats, "detect service stopped");
        Ok(stats)
    }
}

async fn serve_connection<H: FrameHandler>(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<H>,
    permits: Arc<Semaphore>,
    counters: Arc<Counters>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%peer, error = %e, "set_nodelay failed");
    }

    loop {
        if *shutdown.borrow() {
            break;
        }

        let mut header_buf = [0u8; HEADER_SIZE];
        let read = tokio::select! {
            read = stream.read_exact(&mut header_buf) => read,
            _ = shutdown.changed() => break,
        };
        if read.is_err() {
            // Peer closed the connection
            break;
        }

        let header = match FrameHeader::parse(&header_buf) {
            Ok(header) => header,
            Err(e) => {
                // Framing is lost; answer once and drop the connection
                tracing::warn!(%peer, error = %e, "malformed request header");
                counters.error_responses.fetch_add(1, Ordering::Relaxed);
                let reply = DetectResponse::error(0, Status::InvalidRequest, e.to_string());
                let _ = write_response(&mut stream, &reply).await;
                break;
            }
        };

        let mut payload = vec![0u8; header.payload_len as usize];
        let read = tokio::select! {
            read = stream.read_exact(&mut payload) => read,
            _ = shutdown.changed() => {
                tracing::debug!(%peer, "shutdown while request was still arriving");
                break;
            }
        };
        if let Err(e) = read {
            tracing::debug!(%peer, error = %e, "connection closed mid-request");
            break;
        }

        let request = match Message::from_parts(&header, Bytes::from(payload)) {
            Ok(Message::Request(request)) => request,
            Ok(Message::Response(_)) | Err(_) => {
                counters.error_responses.fetch_add(1, Ordering::Relaxed);
                let reply = DetectResponse::error(header.request_id, Status::InvalidRequest, "expected a detect request");
                let _ = write_response(&mut stream, &reply).await;
                break;
            }
        };

        counters.requests.fetch_add(1, Ordering::Relaxed);
        let request_id = request.request_id;

        let body = match permits.acquire().await {
            Ok(_permit) => handler.handle(request).await,
            Err(_) => ResponseBody::error(Status::Unavailable, "service shutting down"),
        };
        if matches!(body, ResponseBody::Error { .. }) {
            counters.error_responses.fetch_add(1, Ordering::Relaxed);
        }

        let reply = DetectResponse {
            request_id,
            body,
        };
        if let Err(e) = write_response(&mut stream, &reply).await {
            tracing::debug!(%peer, error = %e, "failed to write response");
            break;
        }
    }

    tracing::info!(%peer, "client disconnected");
}

async fn write_response(stream: &mut TcpStream, response: &DetectResponse) -> HandoffResult<()> {
    let bytes = response.encode()?;
    stream
        .write_all(&bytes)
        .await
        .map_err(|e| HandoffError::TransportError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use handoff_core::{HandPose, Pose, LANDMARK_VALUES};

    use crate::RpcChannel;

    /// Answers "no hand" for tiny payloads, a hand otherwise
    struct SizeHandler;

    impl FrameHandler for SizeHandler {
        async fn handle(&self, request: DetectRequest) -> ResponseBody {
            if request.image.len() < 4 {
                return ResponseBody::error(Status::DecodeFailure, "image too small");
            }
            if request.image.len() < 8 {
                return ResponseBody::Landmarks(Pose::Absent);
            }
            let values = [0.25f32; LANDMARK_VALUES];
            ResponseBody::Landmarks(Pose::Hand(HandPose::from_values(&values).unwrap()))
        }
    }

    async fn start() -> (SocketAddr, watch::Sender<bool>, tokio::task::JoinHandle<HandoffResult<ServerStats>>) {
        let server = RpcServer::bind("127.0.0.1:0", 4).await.unwrap();
        let addr = server.local_addr();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(server.serve(Arc::new(SizeHandler), rx));
        (addr, tx, handle)
    }

    #[tokio::test]
    async fn test_serves_landmarks_and_errors() {
        let (addr, shutdown, handle) = start().await;
        let channel = RpcChannel::new(addr.to_string(), Duration::from_secs(1), Duration::from_secs(3));

        let hand = channel.detect(Bytes::from_static(b"0123456789")).await.unwrap();
        assert!(hand.is_present());

        let absent = channel.detect(Bytes::from_static(b"01234")).await.unwrap();
        assert_eq!(absent, Pose::Absent);

        let bad = channel.detect(Bytes::from_static(b"01")).await;
        assert!(matches!(bad, Err(HandoffError::RemoteDecodeFailure(_))));

        drop(channel);
        shutdown.send(true).unwrap();
        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.requests, 3);
        assert_eq!(stats.error_responses, 1);
    }

    #[tokio::test]
    async fn test_shutdown_with_idle_connection() {
        let (addr, shutdown, handle) = start().await;
        let channel = RpcChannel::new(addr.to_string(), Duration::from_secs(1), Duration::from_secs(3));
        channel.detect(Bytes::from_static(b"01234")).await.unwrap();

        // Connection stays open while the server shuts down
        shutdown.send(true).unwrap();
        let stats = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
        assert_eq!(stats.requests, 1);
    }

    #[tokio::test]
    async fn test_stalled_upload_does_not_block_shutdown() {
        let (addr, shutdown, handle) = start().await;

        let bytes = DetectRequest::new(9, vec![7u8; 100]).encode().unwrap();

        // Header and a tenth of the image, then nothing
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&bytes[..HEADER_SIZE + 10]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown.send(true).unwrap();
        let stats = tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.requests, 0);
        drop(stream);
    }

    #[tokio::test]
    async fn test_garbage_header_gets_invalid_request() {
        let (addr, shutdown, handle) = start().await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&[0xFFu8; HEADER_SIZE]).await.unwrap();

        let mut header = [0u8; HEADER_SIZE];
        stream.read_exact(&mut header).await.unwrap();
        let header = FrameHeader::parse(&header).unwrap();
        assert_eq!(header.status, Status::InvalidRequest);

        shutdown.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
