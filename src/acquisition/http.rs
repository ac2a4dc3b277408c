//! Minimal HTTP/1 GET over hyper, either direct or through a forward proxy

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::header::{CONNECTION, HOST, USER_AGENT};
use hyper::{Request, StatusCode};
use tokio::net::TcpStream;
use tracing::debug;
use url::Url;

use crate::error::{Result, ReelError};
use crate::models::Proxy;

const CLIENT_USER_AGENT: &str = concat!("proxyreel/", env!("CARGO_PKG_VERSION"));

/// Response status and fully collected body
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// GET `url`, optionally through `via`
///
/// Through a proxy the request line carries the absolute URL; directly it
/// carries the origin-form path. Only plain `http` targets are supported.
pub async fn get(url: &Url, via: Option<&Proxy>, timeout: Duration) -> Result<HttpResponse> {
    get_as(url, via, None, timeout).await
}

/// [`get`] with an explicit `User-Agent`
pub async fn get_as(
    url: &Url,
    via: Option<&Proxy>,
    user_agent: Option<&str>,
    timeout: Duration,
) -> Result<HttpResponse> {
    if url.scheme() != "http" {
        return Err(ReelError::UnsupportedProtocol(format!(
            "{} (only http targets are supported)",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| ReelError::Http(format!("{} has no host", url)))?;
    let port = url.port_or_known_default().unwrap_or(80);
    let host_header = match url.port() {
        Some(p) => format!("{}:{}", host, p),
        None => host.to_string(),
    };

    let (connect_addr, request_uri) = match via {
        Some(proxy) => (proxy.host_port().to_string(), url.to_string()),
        None => {
            let mut path = url.path().to_string();
            if let Some(query) = url.query() {
                path.push('?');
                path.push_str(query);
            }
            (format!("{}:{}", host, port), path)
        }
    };

    let user_agent = user_agent.unwrap_or(CLIENT_USER_AGENT);
    tokio::time::timeout(
        timeout,
        send(&connect_addr, &request_uri, &host_header, user_agent),
    )
    .await
    .map_err(|_| ReelError::Timeout)?
}

async fn send(
    connect_addr: &str,
    request_uri: &str,
    host_header: &str,
    user_agent: &str,
) -> Result<HttpResponse> {
    let stream = TcpStream::connect(connect_addr)
        .await
        .map_err(|e| ReelError::ProxyConnectionFailed(format!("TCP connect failed: {}", e)))?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| ReelError::ProxyConnectionFailed(format!("Handshake failed: {}", e)))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Connection ended: {}", e);
        }
    });

    let request = Request::builder()
        .method("GET")
        .uri(request_uri)
        .header(HOST, host_header)
        .header(USER_AGENT, user_agent)
        .header(CONNECTION, "close")
        .body(Empty::<Bytes>::new())?;

    let response = sender.send_request(request).await?;
    let (parts, body) = response.into_parts();
    let body = body.collect().await?.to_bytes();

    Ok(HttpResponse {
        status: parts.status,
        body,
    })
}

#[cfg(test)]
pub(crate) mod test_server {
    //! Tiny canned-response HTTP server for tests

    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    pub struct TestServer {
        pub addr: SocketAddr,
        pub hits: Arc<AtomicUsize>,
        pub requests: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    impl TestServer {
        pub fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    /// Serve `status` with `body` to every connection
    pub async fn spawn(status: u16, body: &'static str) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let hits_clone = hits.clone();
        let requests_clone = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                hits_clone.fetch_add(1, Ordering::SeqCst);
                let requests = requests_clone.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    requests
                        .lock()
                        .push(String::from_utf8_lossy(&buf[..n]).into_owned());
                    let response = format!(
                        "HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        TestServer {
            addr,
            hits,
            requests,
        }
    }
}
