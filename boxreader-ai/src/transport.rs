use std::io::Read;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::AnnotateError;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub api_key: String,
    pub body: Vec<u8>,
}

/// Status line and headers arrive first; the body follows chunk by chunk.
pub struct HttpResponse {
    pub status: u16,
    pub content_type: String,
    pub body: mpsc::Receiver<Result<Bytes, AnnotateError>>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_event_stream(&self) -> bool {
        self.content_type.contains("text/event-stream")
    }

    /// Collects the remaining body as (lossy) UTF-8.
    pub async fn text(mut self) -> Result<String, AnnotateError> {
        let mut raw = Vec::new();
        while let Some(chunk) = self.body.recv().await {
            raw.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}

#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AnnotateError>;
}

const READ_CHUNK: usize = 4096;

/// Blocking `ureq` client driven from the blocking thread pool.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UreqTransport {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(15))
            .timeout_read(Duration::from_secs(120))
            .build();
        Self { agent }
    }
}

#[async_trait]
impl CompletionTransport for UreqTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AnnotateError> {
        let (head_tx, head_rx) = oneshot::channel();
        let (chunk_tx, chunk_rx) = mpsc::channel(32);
        let agent = self.agent.clone();

        tokio::task::spawn_blocking(move || {
            let result = agent
                .post(&request.url)
                .set("Content-Type", "application/json")
                .set("Authorization", &format!("Bearer {}", request.api_key))
                .send_bytes(&request.body);
            let response = match result {
                Ok(response) => response,
                // non-success statuses still carry a body worth showing
                Err(ureq::Error::Status(_, response)) => response,
                Err(err) => {
                    let _ = head_tx.send(Err(AnnotateError::Transport(err.to_string())));
                    return;
                }
            };
            let status = response.status();
            let content_type = response
                .header("content-type")
                .unwrap_or_default()
                .to_string();
            debug!(status, %content_type, "completion response headers");
            if head_tx.send(Ok((status, content_type))).is_err() {
                return;
            }

            let mut reader = response.into_reader();
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if chunk_tx
                            .blocking_send(Ok(Bytes::copy_from_slice(&buf[..n])))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = chunk_tx.blocking_send(Err(AnnotateError::Stream(err.to_string())));
                        break;
                    }
                }
            }
        });

        let (status, content_type) = head_rx
            .await
            .map_err(|_| AnnotateError::Transport("transport worker stopped".to_string()))??;
        Ok(HttpResponse {
            status,
            content_type,
            body: chunk_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn body_text_is_collected_from_chunks() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Bytes::from_static(b"hel"))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"lo"))).await.unwrap();
        drop(tx);
        let response = HttpResponse {
            status: 200,
            content_type: "application/json; charset=utf-8".to_string(),
            body: rx,
        };
        assert!(response.is_success());
        assert!(!response.is_event_stream());
        assert_eq!(response.text().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn body_errors_surface_from_text() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Err(AnnotateError::Stream("reset".to_string())))
            .await
            .unwrap();
        drop(tx);
        let response = HttpResponse {
            status: 500,
            content_type: String::new(),
            body: rx,
        };
        assert!(!response.is_success());
        assert_eq!(
            response.text().await,
            Err(AnnotateError::Stream("reset".to_string()))
        );
    }
}
