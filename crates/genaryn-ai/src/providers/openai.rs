//! OpenAI-compatible Chat Completions transport

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

use crate::{
    error::{Error, Result},
    providers::ChatTransport,
    transport::PendingRequest,
    types::{ChatRequest, EndpointConfig},
};

/// HTTP transport for any endpoint speaking the OpenAI streaming format
pub struct OpenAICompatTransport {
    client: reqwest::Client,
    endpoint: EndpointConfig,
    headers: HeaderMap,
}

impl OpenAICompatTransport {
    /// Create a transport for `endpoint`.
    ///
    /// No timeout is configured; callers cancel through the returned
    /// [`PendingRequest`].
    pub fn new(endpoint: EndpointConfig) -> Result<Self> {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    /// Create with a preconfigured client
    pub fn with_client(client: reqwest::Client, endpoint: EndpointConfig) -> Result<Self> {
        if endpoint.url.trim().is_empty() {
            return Err(Error::InvalidConfig("endpoint url is empty".to_string()));
        }
        if endpoint.model.trim().is_empty() {
            return Err(Error::InvalidConfig("model is empty".to_string()));
        }

        let headers = build_headers(&endpoint)?;
        Ok(Self {
            client,
            endpoint,
            headers,
        })
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }
}

fn build_headers(endpoint: &EndpointConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

    if let Some(ref key) = endpoint.api_key {
        let value = HeaderValue::from_str(&format!("Bearer {}", key))
            .map_err(|_| Error::InvalidApiKey)?;
        headers.insert(AUTHORIZATION, value);
    }

    for (key, value) in &endpoint.headers {
        let name = key
            .parse::<HeaderName>()
            .map_err(|e| Error::InvalidConfig(format!("header name {:?}: {}", key, e)))?;
        let value = value
            .parse::<HeaderValue>()
            .map_err(|e| Error::InvalidConfig(format!("header {:?}: {}", key, e)))?;
        headers.insert(name, value);
    }

    Ok(headers)
}

#[async_trait]
impl ChatTransport for OpenAICompatTransport {
    fn model(&self) -> &str {
        &self.endpoint.model
    }

    async fn open(&self, request: &ChatRequest) -> Result<PendingRequest> {
        let body = serde_json::to_vec(request)?;
        let request_builder = self
            .client
            .post(&self.endpoint.url)
            .headers(self.headers.clone())
            .body(body);

        tracing::debug!(
            url = %self.endpoint.url,
            model = %request.model,
            messages = request.messages.len(),
            "Opening completion stream"
        );

        let chunks = stream! {
            let response = match request_builder.send().await {
                Ok(response) => response,
                Err(e) => {
                    yield Err(Error::Http(e));
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                yield Err(Error::api(status.as_u16(), text));
                return;
            }

            let mut body = response.bytes_stream();
            while let Some(item) = body.next().await {
                match item {
                    Ok(bytes) => yield Ok(bytes),
                    Err(e) => {
                        yield Err(Error::Http(e));
                        return;
                    }
                }
            }
        };

        Ok(PendingRequest::from_chunks(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode;
    use crate::stream::{StreamError, StreamEvent};
    use crate::transport::{Termination, TransportEvent};
    use crate::types::{ChatMessage, Role, StreamOptions};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the raw request
    async fn serve_once(status_line: &'static str, body: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/v1/chat/completions", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];

            let header_end = loop {
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0, "client closed before sending headers");
                raw.extend_from_slice(&buf[..n]);
                if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };

            let head = String::from_utf8_lossy(&raw[..header_end]).to_lowercase();
            let content_length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .map(|v| v.trim().parse::<usize>().unwrap())
                .unwrap_or(0);
            while raw.len() < header_end + content_length {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "{}\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n{}",
                status_line, body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();

            String::from_utf8_lossy(&raw).into_owned()
        });

        (url, handle)
    }

    fn request() -> ChatRequest {
        ChatRequest::new(
            "gpt-oss-120b",
            vec![ChatMessage::new(Role::User, "status report")],
            StreamOptions::default(),
        )
    }

    #[test]
    fn test_rejects_empty_url() {
        let result = OpenAICompatTransport::new(EndpointConfig::new("", "m"));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_bad_header() {
        let mut endpoint = EndpointConfig::new("http://localhost/v1/chat/completions", "m");
        endpoint.headers.insert("bad header".into(), "x".into());
        let result = OpenAICompatTransport::new(endpoint);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_streams_completion_over_http() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Sitrep: \"}}]}\n\n",
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"all quiet.\"}}]}\n\n",
            "data: [DONE]\n\n",
        )
        .to_string();
        let (url, server) = serve_once("HTTP/1.1 200 OK", body).await;

        let transport =
            OpenAICompatTransport::new(EndpointConfig::new(url, "gpt-oss-120b").with_api_key("sk-test"))
                .unwrap();
        let pending = transport.open(&request()).await.unwrap();
        let events: Vec<StreamEvent> = decode(pending).events.collect().await;

        assert_eq!(
            events,
            vec![
                StreamEvent::delta("Sitrep: "),
                StreamEvent::delta("all quiet."),
                StreamEvent::done(),
            ]
        );

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /v1/chat/completions"));
        assert!(raw.to_lowercase().contains("authorization: bearer sk-test"));
        let body_start = raw.find("\r\n\r\n").unwrap() + 4;
        let sent: serde_json::Value = serde_json::from_str(&raw[body_start..]).unwrap();
        assert_eq!(sent["stream"], true);
        assert_eq!(sent["model"], "gpt-oss-120b");
        assert_eq!(sent["messages"][0]["content"], "status report");
    }

    #[tokio::test]
    async fn test_error_status_is_network_error() {
        let (url, server) =
            serve_once("HTTP/1.1 500 Internal Server Error", "upstream down".to_string()).await;
        let transport = OpenAICompatTransport::new(EndpointConfig::new(url, "m")).unwrap();
        let mut pending = transport.open(&request()).await.unwrap();

        match pending.next().await {
            Some(TransportEvent::End(Termination::NetworkError(Error::Api { status, message }))) => {
                assert_eq!(status, 500);
                assert_eq!(message, "upstream down");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = format!("http://{}/v1/chat/completions", addr);
        let transport = OpenAICompatTransport::new(EndpointConfig::new(url, "m")).unwrap();
        let pending = transport.open(&request()).await.unwrap();
        let events: Vec<StreamEvent> = decode(pending).events.collect().await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            StreamEvent::Error { error: StreamError::Network(_) }
        ));
    }
}
