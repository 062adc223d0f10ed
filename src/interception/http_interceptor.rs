// src/interception/http_interceptor.rs
//! Plain HTTP forward proxy driving the stream interceptor
//!
//! Clients send absolute-form requests (`GET http://host/path HTTP/1.1`);
//! the proxy forwards them upstream and streams the response back. Responses
//! flagged as streams by [`StreamInterceptor::on_response_headers`] get their
//! body swapped for the tee'd reader. TLS interception is not handled here.

use crate::interception::flow::Flow;
use crate::interception::stream_interceptor::{BodyReader, StreamInterceptor};
use crate::utils::config::ProxyConfig;
use crate::utils::errors::{Result, TapError};
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{self, HeaderMap, HeaderName};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::convert::Infallible;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, error, info, warn};

/// Response body type produced by the proxy
pub type ProxyBody = UnsyncBoxBody<Bytes, io::Error>;

/// Read size when turning a tapped reader back into body frames
const BODY_FRAME_CAPACITY: usize = 32 * 1024;

/// Headers meaningful for a single connection only
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// HTTP forward proxy
pub struct HttpInterceptor {
    config: ProxyConfig,
    interceptor: Arc<StreamInterceptor>,
    http_client: Client<HttpConnector, Incoming>,
}

impl HttpInterceptor {
    /// Create a new proxy around `interceptor`
    pub fn new(config: ProxyConfig, interceptor: Arc<StreamInterceptor>) -> Self {
        let http_client = Client::builder(TokioExecutor::new()).build_http();

        Self {
            config,
            interceptor,
            http_client,
        }
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|e| TapError::ProxyFailed(format!("Failed to bind proxy: {}", e)))
    }

    /// Bind and serve until the task is dropped
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!("Proxy listening on {}", local_addr);

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let proxy = Arc::clone(&self);

                    tokio::spawn(async move {
                        debug!("Accepted connection from {}", addr);

                        let io = TokioIo::new(stream);

                        let service = service_fn(move |req| {
                            let proxy = Arc::clone(&proxy);
                            async move { Ok::<_, Infallible>(proxy.handle_request(req).await) }
                        });

                        if let Err(e) = http1::Builder::new()
                            .serve_connection(io, service)
                            .await
                        {
                            debug!("Connection from {} ended with error: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Handle one proxied request
    async fn handle_request(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        if req.method() == Method::CONNECT {
            warn!("CONNECT to {} refused: tunnelling is not supported", req.uri());
            return error_response(
                StatusCode::NOT_IMPLEMENTED,
                "CONNECT tunnelling is not supported",
            );
        }

        if req.uri().scheme().is_none() || req.uri().authority().is_none() {
            warn!("Rejecting origin-form request for {}", req.uri());
            return error_response(StatusCode::BAD_REQUEST, "Proxy requests need an absolute URI");
        }

        let method = req.method().clone();
        let uri = req.uri().clone();
        debug!("Intercepted request: {} {}", method, uri);

        let (mut parts, body) = req.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        if self.config.log_headers {
            log_headers("Request", &method, &uri, &parts.headers);
        }

        let response = match self
            .http_client
            .request(Request::from_parts(parts, body))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("Upstream request {} {} failed: {}", method, uri, e);
                return error_response(StatusCode::BAD_GATEWAY, "Failed to reach upstream");
            }
        };

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        if self.config.log_headers {
            log_headers("Response", &method, &uri, &parts.headers);
        }

        let mut flow = Flow::new(method, uri, parts.status, parts.headers.clone());
        self.interceptor.on_response_headers(&mut flow);

        if !flow.stream {
            return Response::from_parts(parts, body.map_err(io::Error::other).boxed_unsync());
        }

        let reader: BodyReader = Box::new(body_reader(body));
        let reader = self
            .interceptor
            .stream_response_modifier(&mut flow, Some(reader))
            .await;

        Response::from_parts(parts, reader_body(reader))
    }
}

/// Expose an upstream body as a byte reader
fn body_reader(body: Incoming) -> impl AsyncRead + Send + Unpin + 'static {
    StreamReader::new(body.into_data_stream().map_err(io::Error::other))
}

/// Turn a byte reader back into a streaming body, one frame per read
fn reader_body(reader: BodyReader) -> ProxyBody {
    let frames = ReaderStream::with_capacity(reader, BODY_FRAME_CAPACITY).map_ok(Frame::data);
    StreamBody::new(frames).boxed_unsync()
}

fn error_response(status: StatusCode, message: &'static str) -> Response<ProxyBody> {
    let body = Full::new(Bytes::from_static(message.as_bytes()))
        .map_err(|never| match never {})
        .boxed_unsync();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove("proxy-connection");
    headers.remove("keep-alive");
}

fn log_headers(direction: &str, method: &Method, uri: &Uri, headers: &HeaderMap) {
    debug!("{}: {} {}", direction, method, uri);
    for (name, value) in headers {
        if let Ok(val_str) = value.to_str() {
            debug!("  {}: {}", name, val_str);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::sink::SinkAllocator;
    use crate::recording::supervisor::NoopObserver;
    use crate::recording::tee::TeeOptions;
    use crate::utils::config::StorageConfig;
    use http_body_util::Empty;
    use hyper::header::{CONTENT_TYPE, HOST};
    use std::net::SocketAddr;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::net::TcpStream;

    const SSE_BODY: &[u8] = b"data: a\n\ndata: b\n\n";

    async fn spawn_upstream() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let service = service_fn(|req: Request<Incoming>| async move {
                        let (content_type, body): (&str, &'static [u8]) = match req.uri().path() {
                            "/v1/stream" => ("text/event-stream", SSE_BODY),
                            _ => ("application/json", b"{\"ok\":true}"),
                        };
                        let response = Response::builder()
                            .header(CONTENT_TYPE, content_type)
                            .body(Full::new(Bytes::from_static(body)))
                            .unwrap();
                        Ok::<_, Infallible>(response)
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        addr
    }

    async fn spawn_proxy(root: &Path) -> SocketAddr {
        let allocator = SinkAllocator::new(&StorageConfig {
            output_dir: root.to_path_buf(),
            ..Default::default()
        });
        let interceptor = Arc::new(StreamInterceptor::new(
            allocator,
            TeeOptions::default(),
            Arc::new(NoopObserver),
        ));
        let config = ProxyConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            log_headers: true,
        };

        let proxy = Arc::new(HttpInterceptor::new(config, interceptor));
        let listener = proxy.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(proxy.serve(listener));
        addr
    }

    async fn send(
        proxy: SocketAddr,
        method: Method,
        target: &str,
        host: &str,
    ) -> (StatusCode, HeaderMap, Bytes) {
        let stream = TcpStream::connect(proxy).await.unwrap();
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .unwrap();
        tokio::spawn(conn);

        let request = Request::builder()
            .method(method)
            .uri(target)
            .header(HOST, host)
            .body(Empty::<Bytes>::new())
            .unwrap();

        let response = sender.send_request(request).await.unwrap();
        let (parts, body) = response.into_parts();
        let body = body.collect().await.unwrap().to_bytes();
        (parts.status, parts.headers, body)
    }

    async fn wait_for_capture(root: &Path, len: usize) -> Vec<u8> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok(mut entries) = std::fs::read_dir(root) {
                if let Some(Ok(entry)) = entries.next() {
                    let data = std::fs::read(entry.path()).unwrap();
                    if data.len() >= len {
                        return data;
                    }
                }
            }
            assert!(tokio::time::Instant::now() < deadline, "capture file never completed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_event_stream_is_forwarded_and_captured() {
        let dir = tempdir().unwrap();
        let upstream = spawn_upstream().await;
        let proxy = spawn_proxy(dir.path()).await;

        let url = format!("http://{}/v1/stream", upstream);
        let (status, headers, body) = send(proxy, Method::GET, &url, &upstream.to_string()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "text/event-stream");
        assert_eq!(&body[..], SSE_BODY);

        let captured = wait_for_capture(dir.path(), SSE_BODY.len()).await;
        assert_eq!(captured, SSE_BODY);
    }

    #[tokio::test]
    async fn test_json_is_forwarded_without_capture() {
        let dir = tempdir().unwrap();
        let upstream = spawn_upstream().await;
        let proxy = spawn_proxy(dir.path()).await;

        let url = format!("http://{}/v1/models", upstream);
        let (status, _, body) = send(proxy, Method::GET, &url, &upstream.to_string()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"{\"ok\":true}");
        let captured = std::fs::read_dir(dir.path()).map(|d| d.count()).unwrap_or(0);
        assert_eq!(captured, 0);
    }

    #[tokio::test]
    async fn test_origin_form_is_rejected() {
        let dir = tempdir().unwrap();
        let proxy = spawn_proxy(dir.path()).await;

        let (status, _, _) = send(proxy, Method::GET, "/v1/stream", "localhost").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_bad_gateway() {
        let dir = tempdir().unwrap();
        let proxy = spawn_proxy(dir.path()).await;

        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = closed.local_addr().unwrap();
        drop(closed);

        let url = format!("http://{}/v1/stream", addr);
        let (status, _, _) = send(proxy, Method::GET, &url, &addr.to_string()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, "keep-alive".parse().unwrap());
        headers.insert(header::TRANSFER_ENCODING, "chunked".parse().unwrap());
        headers.insert("proxy-connection", "keep-alive".parse().unwrap());
        headers.insert(CONTENT_TYPE, "text/event-stream".parse().unwrap());

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(CONTENT_TYPE));
    }
}
