use ollama_rs::Ollama;
use ollama_rs::error::OllamaError;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};

use crate::error::EmbedError;
use crate::provider::{EmbeddingProvider, ensure_count};

/// Embeddings served by a local Ollama instance (`/api/embed`).
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: Ollama,
    model: String,
}

impl OllamaEmbedder {
    #[must_use]
    pub fn new(base_url: &str, model: String) -> Self {
        let (host, port) = parse_host_port(base_url);
        Self {
            client: Ollama::new(host, port),
            model,
        }
    }
}

impl EmbeddingProvider for OllamaEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = GenerateEmbeddingsRequest::new(
            self.model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );

        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(map_ollama_error)?;

        ensure_count("ollama", texts.len(), response.embeddings.len())?;
        Ok(response.embeddings)
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "ollama"
    }
}

/// Transport failures are retryable; anything the server answered is not.
fn map_ollama_error(e: OllamaError) -> EmbedError {
    match e {
        OllamaError::ReqwestError(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
            EmbedError::Unavailable(format!("Ollama request failed: {e}"))
        }
        OllamaError::ReqwestError(e) => {
            EmbedError::Other(format!("Ollama embedding request failed: {e}"))
        }
        other => EmbedError::Other(format!("Ollama embedding request failed: {other}")),
    }
}

fn parse_host_port(url: &str) -> (String, u16) {
    let url = url.trim_end_matches('/');
    if let Some(colon_pos) = url.rfind(':') {
        let port_str = &url[colon_pos + 1..];
        if let Ok(port) = port_str.parse::<u16>() {
            let host = url[..colon_pos].to_string();
            return (host, port);
        }
    }
    (url.to_string(), 11434)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_host_port_with_port() {
        let (host, port) = parse_host_port("http://localhost:11434");
        assert_eq!(host, "http://localhost");
        assert_eq!(port, 11434);
    }

    #[test]
    fn parse_host_port_without_port() {
        let (host, port) = parse_host_port("http://localhost");
        assert_eq!(host, "http://localhost");
        assert_eq!(port, 11434);
    }

    #[test]
    fn parse_host_port_trailing_slash() {
        let (host, port) = parse_host_port("http://localhost:8080/");
        assert_eq!(host, "http://localhost");
        assert_eq!(port, 8080);
    }

    #[test]
    fn parse_host_port_invalid_port_falls_back() {
        let (host, port) = parse_host_port("http://localhost:notaport");
        assert_eq!(host, "http://localhost:notaport");
        assert_eq!(port, 11434);
    }

    #[test]
    fn model_is_reported() {
        let e = OllamaEmbedder::new("http://localhost:11434", "nomic-embed-text".into());
        assert_eq!(e.model(), "nomic-embed-text");
        assert_eq!(e.name(), "ollama");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        let e = OllamaEmbedder::new("http://127.0.0.1:1", "embed".into());
        let err = e.embed_batch(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, EmbedError::Unavailable(_)), "{err}");
        assert!(err.is_transient());
    }

    #[test]
    fn server_errors_are_not_transient() {
        let err = map_ollama_error(OllamaError::Other("model not found".into()));
        assert!(matches!(err, EmbedError::Other(_)));
        assert!(!err.is_transient());
    }
}
