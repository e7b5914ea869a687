use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::header::{HeaderMap, HOST};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::rt::TokioIo;
#[cfg(test)] use mockall::automock;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::config::JpipConfig;
use crate::error::{JpipError, Result};
use crate::util::io::NetStream;

/// One JPIP exchange as seen by the session logic: status, headers, body.
/// Redirects are never followed - a redirect status fails the exchange.
#[derive(Debug)]
pub struct JpipHttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The wire side of the JPIP client, separated out so session logic can be
/// tested against a scripted double.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait JpipTransport: Send + Sync {
    /// Issues `GET <base-path>?<query>` and returns the raw exchange result.
    async fn get(&self, query: &str) -> Result<JpipHttpResponse>;

    /// Opens the raw auxiliary socket to the server host on the given port.
    async fn open_aux_channel(&self, port: u16) -> Result<Box<dyn NetStream>>;
}

/// hyper-based transport. Every request runs over a fresh connection; JPIP
/// session continuity lives in the query parameters, not the connection.
pub struct HyperJpipTransport {
    host: String,
    port: u16,
    path: String,
    config: Arc<JpipConfig>,
}

impl HyperJpipTransport {
    pub fn from_url(url: &str, config: Arc<JpipConfig>) -> Result<HyperJpipTransport> {
        let uri: Uri = url
            .parse()
            .map_err(|e| JpipError::violation(format!("invalid server url {:?}: {}", url, e)))?;

        match uri.scheme_str() {
            Some("http") | None => {}
            Some(other) => {
                return Err(JpipError::violation(format!("unsupported url scheme {:?}, only http is spoken", other)));
            }
        }
        let host = uri
            .host()
            .ok_or_else(|| JpipError::violation(format!("server url {:?} has no host", url)))?
            .to_string();

        Ok(HyperJpipTransport {
            host,
            port: uri.port_u16().unwrap_or(80),
            path: if uri.path().is_empty() { "/".to_string() } else { uri.path().to_string() },
            config,
        })
    }

    async fn connect(&self, port: u16) -> Result<TcpStream> {
        match timeout(self.config.connect_timeout, TcpStream::connect((self.host.as_str(), port))).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(JpipError::Timeout(self.config.connect_timeout)),
        }
    }

    fn authority(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        }
        else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

#[async_trait]
impl JpipTransport for HyperJpipTransport {
    async fn get(&self, query: &str) -> Result<JpipHttpResponse> {
        let stream = self.connect(self.port).await?;
        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("http connection wound down with error: {}", e);
            }
        });

        let uri = if query.is_empty() {
            self.path.clone()
        }
        else {
            format!("{}?{}", self.path, query)
        };
        trace!("GET {}", uri);

        let request = Request::builder()
            .method(Method::GET)
            .uri(uri.as_str())
            .header(HOST, self.authority())
            .body(Empty::<Bytes>::new())
            .map_err(|e| JpipError::violation(format!("unbuildable request for {:?}: {}", uri, e)))?;

        let response = match timeout(self.config.read_timeout, sender.send_request(request)).await {
            Ok(result) => result?,
            Err(_) => return Err(JpipError::Timeout(self.config.read_timeout)),
        };

        let (parts, body) = response.into_parts();
        let body = match timeout(self.config.read_timeout, body.collect()).await {
            Ok(collected) => collected?.to_bytes(),
            Err(_) => return Err(JpipError::Timeout(self.config.read_timeout)),
        };
        if body.len() > self.config.max_stream_len {
            return Err(JpipError::violation(format!(
                "response body exceeds configured maximum of {} bytes",
                self.config.max_stream_len
            )));
        }

        Ok(JpipHttpResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    async fn open_aux_channel(&self, port: u16) -> Result<Box<dyn NetStream>> {
        Ok(Box::new(self.connect(port).await?))
    }
}

#[cfg(test)]
mod test {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    async fn canned_server(response: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut byte = [0u8; 1];
            while !request.ends_with(b"\r\n\r\n") {
                socket.read_exact(&mut byte).await.unwrap();
                request.push(byte[0]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        port
    }

    #[tokio::test]
    async fn test_get_returns_status_headers_and_body() {
        let port = canned_server(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: image/jpp-stream\r\n\
             JPIP-fsiz: 512,512\r\n\
             Content-Length: 4\r\n\
             \r\n\
             DATA",
        )
        .await;

        let config = Arc::new(JpipConfig::new("127.0.0.1:1"));
        let transport =
            HyperJpipTransport::from_url(&format!("http://127.0.0.1:{}/jpip", port), config).unwrap();

        let response = transport.get("fsiz=512,512&cnew=http").await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.headers.get("jpip-fsiz").unwrap(), "512,512");
        assert_eq!(response.body.as_ref(), b"DATA");
    }

    #[tokio::test]
    async fn test_redirect_is_not_followed() {
        let port = canned_server(
            "HTTP/1.1 302 Found\r\n\
             Location: http://elsewhere.example/\r\n\
             Content-Length: 0\r\n\
             \r\n",
        )
        .await;

        let config = Arc::new(JpipConfig::new("127.0.0.1:1"));
        let transport =
            HyperJpipTransport::from_url(&format!("http://127.0.0.1:{}/jpip", port), config).unwrap();

        // the transport reports the redirect as-is; the session layer treats
        // any non-success status as a failed exchange
        let response = transport.get("").await.unwrap();
        assert_eq!(response.status, StatusCode::FOUND);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let config = Arc::new(JpipConfig::new("127.0.0.1:1"));
        // bind-then-drop to get a port nothing listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let transport =
            HyperJpipTransport::from_url(&format!("http://127.0.0.1:{}/jpip", port), config).unwrap();
        let result = transport.get("").await;
        assert!(matches!(result, Err(JpipError::ConnectionRefused(_))));
    }

    #[test]
    fn test_https_is_rejected() {
        let config = Arc::new(JpipConfig::new("127.0.0.1:1"));
        let result = HyperJpipTransport::from_url("https://server.example/jpip", config);
        assert!(matches!(result, Err(JpipError::ProtocolViolation(_))));
    }
}
