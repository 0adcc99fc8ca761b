//! Local generative model access with streamed completions.
//!
//! Unlike the embedder, the generator never auto-loads: model pulls are large
//! and explicitly user-initiated. [`Generator::load`] verifies the local
//! runtime is reachable and pulls the model while forwarding progress events;
//! an unreachable runtime fails with the generator-unavailable kind and the
//! holder stays unloaded.
//!
//! Completions are streamed: [`Generator::stream`] returns a channel of
//! string deltas that the QA pipeline folds into the in-progress answer. The
//! sequence ends normally when the runtime reports completion, or with a
//! generation error mid-way (the partial answer stays visible to the caller).

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::GeneratorConfig;
use crate::error::{EngineError, Result};
use crate::models::ChatMessage;

/// Progress event emitted while the generative model loads.
#[derive(Debug, Clone)]
pub struct LoadProgress {
    /// Fraction in `[0, 1]`.
    pub fraction: f32,
    pub text: String,
}

/// A generative model runtime.
#[async_trait]
pub trait GeneratorBackend: Send + Sync {
    /// Prepare `model` for use, reporting download progress.
    async fn load(
        &self,
        model: &str,
        on_progress: &(dyn Fn(LoadProgress) + Send + Sync),
    ) -> Result<()>;

    /// Start one streaming chat completion. Deltas arrive on the returned
    /// receiver in generation order; the channel closes on completion.
    async fn stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<mpsc::Receiver<Result<String>>>;
}

// ============ Ollama backend ============

/// Generation via a local Ollama runtime (`/api/pull`, `/api/chat`).
pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
}

impl OllamaGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            // Generation has no overall deadline; the runtime completes or
            // fails on its own.
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| EngineError::GeneratorUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl GeneratorBackend for OllamaGenerator {
    async fn load(
        &self,
        model: &str,
        on_progress: &(dyn Fn(LoadProgress) + Send + Sync),
    ) -> Result<()> {
        self.client
            .get(format!("{}/api/version", self.url))
            .timeout(Duration::from_secs(3))
            .send()
            .await
            .map_err(|e| {
                EngineError::GeneratorUnavailable(format!(
                    "model runtime unreachable at {}: {}",
                    self.url, e
                ))
            })?;

        let response = self
            .client
            .post(format!("{}/api/pull", self.url))
            .json(&serde_json::json!({"model": model, "stream": true}))
            .send()
            .await
            .map_err(|e| EngineError::GeneratorUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(EngineError::GeneratorUnavailable(format!(
                "model pull failed ({}): {}",
                status, body_text
            )));
        }

        let mut body = response.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();
        while let Some(piece) = body.next().await {
            let piece = piece.map_err(|e| EngineError::GeneratorUnavailable(e.to_string()))?;
            buf.extend_from_slice(&piece);
            for line in drain_lines(&mut buf) {
                let json: serde_json::Value = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
                    return Err(EngineError::GeneratorUnavailable(err.to_string()));
                }
                on_progress(pull_progress(&json));
            }
        }

        Ok(())
    }

    async fn stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<mpsc::Receiver<Result<String>>> {
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": true,
            "options": {"temperature": temperature},
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Generate(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(EngineError::Generate(format!(
                "chat request failed ({}): {}",
                status, body_text
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut buf: Vec<u8> = Vec::new();
            'read: while let Some(piece) = body.next().await {
                let piece = match piece {
                    Ok(p) => p,
                    Err(e) => {
                        let _ = tx.send(Err(EngineError::Generate(e.to_string()))).await;
                        return;
                    }
                };
                buf.extend_from_slice(&piece);
                for line in drain_lines(&mut buf) {
                    let json: serde_json::Value = match serde_json::from_str(&line) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
                        let _ = tx.send(Err(EngineError::Generate(err.to_string()))).await;
                        return;
                    }
                    if let Some(delta) = chat_delta(&json) {
                        if !delta.is_empty() && tx.send(Ok(delta)).await.is_err() {
                            return;
                        }
                    }
                    if json.get("done").and_then(|d| d.as_bool()) == Some(true) {
                        break 'read;
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Pop complete `\n`-terminated lines off the front of the byte buffer.
fn drain_lines(buf: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        let text = String::from_utf8_lossy(&line).trim().to_string();
        if !text.is_empty() {
            lines.push(text);
        }
    }
    lines
}

/// Extract the text delta from one chat stream line.
fn chat_delta(json: &serde_json::Value) -> Option<String> {
    json.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
}

/// Map one pull-stream line to a progress event.
fn pull_progress(json: &serde_json::Value) -> LoadProgress {
    let text = json
        .get("status")
        .and_then(|s| s.as_str())
        .unwrap_or("loading")
        .to_string();
    let fraction = match (
        json.get("completed").and_then(|v| v.as_f64()),
        json.get("total").and_then(|v| v.as_f64()),
    ) {
        (Some(completed), Some(total)) if total > 0.0 => (completed / total) as f32,
        _ => 0.0,
    };
    LoadProgress {
        fraction: fraction.clamp(0.0, 1.0),
        text,
    }
}

// ============ Lazy holder ============

/// Lazily-loaded generator. Holds the model id once loading succeeds; the
/// engine (single task actor) is the only mutator.
pub struct Generator {
    config: GeneratorConfig,
    backend: Arc<dyn GeneratorBackend>,
    loaded: Option<String>,
}

impl Generator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let backend = Arc::new(OllamaGenerator::new(&config)?);
        Ok(Self::with_backend(config, backend))
    }

    pub fn with_backend(config: GeneratorConfig, backend: Arc<dyn GeneratorBackend>) -> Self {
        Self {
            config,
            backend,
            loaded: None,
        }
    }

    pub fn ready(&self) -> bool {
        self.loaded.is_some()
    }

    /// Load `model` (or the configured default), forwarding progress events.
    /// On failure the holder stays unloaded.
    pub async fn load(
        &mut self,
        model: Option<&str>,
        on_progress: &(dyn Fn(LoadProgress) + Send + Sync),
    ) -> Result<()> {
        let model = model.unwrap_or(&self.config.model).to_string();
        self.backend.load(&model, on_progress).await?;
        tracing::info!(model = %model, "generator loaded");
        self.loaded = Some(model);
        Ok(())
    }

    /// Start one streaming completion with the loaded model.
    pub async fn stream(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<mpsc::Receiver<Result<String>>> {
        let model = self.loaded.as_deref().ok_or(EngineError::GeneratorNotReady)?;
        self.backend.stream(model, messages, temperature).await
    }

    /// Temperature for the requested grounding mode.
    pub fn temperature(&self, strict: bool) -> f32 {
        if strict {
            self.config.temperature_strict
        } else {
            self.config.temperature_default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_lines_handles_partial_tail() {
        let mut buf = b"{\"a\":1}\n{\"b\":2}\n{\"c\"".to_vec();
        let lines = drain_lines(&mut buf);
        assert_eq!(lines, vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);
        assert_eq!(buf, b"{\"c\"".to_vec());
    }

    #[test]
    fn chat_delta_reads_message_content() {
        let json = serde_json::json!({"message": {"role": "assistant", "content": "안녕"}, "done": false});
        assert_eq!(chat_delta(&json), Some("안녕".to_string()));
        assert_eq!(chat_delta(&serde_json::json!({"done": true})), None);
    }

    #[test]
    fn pull_progress_fraction() {
        let json = serde_json::json!({"status": "pulling", "completed": 50, "total": 200});
        let p = pull_progress(&json);
        assert!((p.fraction - 0.25).abs() < 1e-6);
        assert_eq!(p.text, "pulling");
    }

    struct ScriptedBackend {
        deltas: Vec<&'static str>,
    }

    #[async_trait]
    impl GeneratorBackend for ScriptedBackend {
        async fn load(
            &self,
            _model: &str,
            on_progress: &(dyn Fn(LoadProgress) + Send + Sync),
        ) -> Result<()> {
            on_progress(LoadProgress {
                fraction: 1.0,
                text: "ready".to_string(),
            });
            Ok(())
        }

        async fn stream(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _temperature: f32,
        ) -> Result<mpsc::Receiver<Result<String>>> {
            let (tx, rx) = mpsc::channel(8);
            let deltas: Vec<String> = self.deltas.iter().map(|d| d.to_string()).collect();
            tokio::spawn(async move {
                for d in deltas {
                    if tx.send(Ok(d)).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn stream_requires_load() {
        let generator = Generator::with_backend(
            GeneratorConfig::default(),
            Arc::new(ScriptedBackend { deltas: vec![] }),
        );
        let err = generator
            .stream(&[ChatMessage::user("hi")], 0.5)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::GeneratorNotReady));
    }

    #[tokio::test]
    async fn deltas_arrive_in_order() {
        let mut generator = Generator::with_backend(
            GeneratorConfig::default(),
            Arc::new(ScriptedBackend {
                deltas: vec!["a", "b", "c"],
            }),
        );
        generator.load(None, &|_| {}).await.unwrap();
        assert!(generator.ready());

        let mut rx = generator.stream(&[ChatMessage::user("hi")], 0.5).await.unwrap();
        let mut answer = String::new();
        while let Some(delta) = rx.recv().await {
            answer.push_str(&delta.unwrap());
        }
        assert_eq!(answer, "abc");
    }

    #[test]
    fn temperature_per_mode() {
        let generator = Generator::with_backend(
            GeneratorConfig::default(),
            Arc::new(ScriptedBackend { deltas: vec![] }),
        );
        assert!((generator.temperature(true) - 0.2).abs() < 1e-6);
        assert!((generator.temperature(false) - 0.5).abs() < 1e-6);
    }
}
