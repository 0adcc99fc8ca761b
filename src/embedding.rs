//! Embedding backends and the lazy embedder holder.
//!
//! Two backends cover the supported runtimes:
//! - **ollama**: `POST /api/embed` on a local Ollama instance, which uses the
//!   GPU when the runtime has one.
//! - **local**: in-process `fastembed` encoder on the CPU; no network calls
//!   after the model download.
//!
//! Provider `auto` probes the Ollama runtime first and falls back to the
//! local CPU encoder, so embedding keeps working on machines without a model
//! runtime. Every vector leaving this module is L2-normalized, which lets the
//! retrieval layer compute cosine similarity as a plain dot product.
//!
//! [`Embedder`] wraps a backend in a lazy holder: the first call loads the
//! model, concurrent callers wait on the same load, a failed load leaves the
//! holder unloaded so the next call retries, and at most one embedding call
//! is in flight at a time.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{EngineError, Result};

/// A loaded embedding model.
///
/// `embed` returns exactly one vector per input, in input order. Vectors are
/// not required to be normalized; the holder takes care of that.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

// ============ Ollama backend ============

/// Embedding via a local Ollama runtime (`/api/embed`).
pub struct OllamaEmbedding {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedding {
    /// Connects to the runtime, verifying it is reachable first so that
    /// provider `auto` can fall back cleanly.
    pub async fn probe(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Embed(e.to_string()))?;

        let version_url = format!("{}/api/version", config.url);
        client
            .get(&version_url)
            .timeout(Duration::from_secs(3))
            .send()
            .await
            .map_err(|e| {
                EngineError::Embed(format!(
                    "Ollama runtime unreachable at {}: {}",
                    config.url, e
                ))
            })?;

        Ok(Self {
            client,
            url: config.url.clone(),
            model: config.model.clone(),
            dims: config.dims,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbedding {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Embed(format!("Ollama connection error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(EngineError::Embed(format!(
                "Ollama API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Embed(e.to_string()))?;
        parse_ollama_embeddings(&json)
    }
}

fn parse_ollama_embeddings(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            EngineError::Embed("invalid Ollama response: missing embeddings array".to_string())
        })?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| {
                EngineError::Embed("invalid Ollama response: embedding is not an array".to_string())
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }
    Ok(result)
}

// ============ Local (fastembed) backend ============

/// In-process CPU embedding via fastembed. The model is downloaded once and
/// cached; embedding afterwards is fully offline.
#[cfg(feature = "local-embeddings")]
pub struct LocalEmbedding {
    model_name: String,
    dims: usize,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalEmbedding {
    pub async fn load(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config.model.clone();
        let fastembed_model = local_model_for(&model_name)?;

        let model = tokio::task::spawn_blocking(move || {
            fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(fastembed_model).with_show_download_progress(false),
            )
        })
        .await
        .map_err(|e| EngineError::Embed(e.to_string()))?
        .map_err(|e| EngineError::Embed(format!("failed to load local embedding model: {}", e)))?;

        Ok(Self {
            model_name,
            dims: config.dims,
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
fn local_model_for(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        other => Err(EngineError::Embed(format!(
            "unknown local embedding model: '{}'. Supported: multilingual-e5-small, \
             multilingual-e5-base, multilingual-e5-large, all-minilm-l6-v2",
            other
        ))),
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl EmbeddingBackend for LocalEmbedding {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.model.clone();
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|_| EngineError::Embed("embedding model lock poisoned".to_string()))?;
            guard
                .embed(texts, None)
                .map_err(|e| EngineError::Embed(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| EngineError::Embed(e.to_string()))?
    }
}

/// Instantiate the backend selected by the configuration.
async fn create_backend(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingBackend>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaEmbedding::probe(config).await?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalEmbedding::load(config).await?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(EngineError::Embed(
            "local embedding provider requires the local-embeddings feature".to_string(),
        )),
        "auto" => match OllamaEmbedding::probe(config).await {
            Ok(backend) => Ok(Arc::new(backend)),
            #[cfg(feature = "local-embeddings")]
            Err(e) => {
                tracing::info!("falling back to local CPU embeddings: {}", e);
                Ok(Arc::new(LocalEmbedding::load(config).await?))
            }
            #[cfg(not(feature = "local-embeddings"))]
            Err(e) => Err(e),
        },
        other => Err(EngineError::Embed(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ Lazy holder ============

/// Lazily-loaded embedder shared by ingestion, QA, and re-indexing.
///
/// The backend is created on first use under an async lock: concurrent
/// callers deduplicate into a single load, and the same lock serializes
/// embedding calls so at most one is in flight. A failed load leaves the
/// holder unloaded, so the next call retries.
pub struct Embedder {
    config: EmbeddingConfig,
    state: tokio::sync::Mutex<Option<Arc<dyn EmbeddingBackend>>>,
    ready: AtomicBool,
}

impl Embedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config,
            state: tokio::sync::Mutex::new(None),
            ready: AtomicBool::new(false),
        }
    }

    /// Holder that skips loading entirely; used by tests to inject a stub.
    pub fn with_backend(config: EmbeddingConfig, backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self {
            config,
            state: tokio::sync::Mutex::new(Some(backend)),
            ready: AtomicBool::new(true),
        }
    }

    /// Whether a backend has been loaded successfully.
    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Load the backend if it is not loaded yet.
    pub async fn ensure(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        if guard.is_none() {
            let backend = create_backend(&self.config).await?;
            tracing::debug!(model = backend.model_name(), "embedding model loaded");
            *guard = Some(backend);
            self.ready.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Embed a batch of texts into unit-norm vectors, one per input, in
    /// input order. Loads the backend on first call.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut guard = self.state.lock().await;
        let backend = match guard.as_ref() {
            Some(backend) => backend.clone(),
            None => {
                let backend = create_backend(&self.config).await?;
                tracing::debug!(model = backend.model_name(), "embedding model loaded");
                *guard = Some(backend.clone());
                self.ready.store(true, Ordering::SeqCst);
                backend
            }
        };

        let mut vectors = backend.embed(texts).await?;
        if vectors.len() != texts.len() {
            return Err(EngineError::Embed(format!(
                "got {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        for vec in &mut vectors {
            l2_normalize(vec);
        }
        Ok(vectors)
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Embed("empty embedding response".to_string()))
    }
}

// ============ Vector utilities ============

/// Scale a vector to unit L2 norm in place. Zero vectors are left unchanged.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

/// Dot product. For unit-norm vectors this equals cosine similarity.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`] back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn normalize_produces_unit_norm() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn dot_of_unit_vectors_is_cosine() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert_eq!(dot(&a, &a), 1.0);
        assert_eq!(dot(&a, &b), 0.0);
    }

    #[test]
    fn ollama_response_parsing() {
        let json = serde_json::json!({"embeddings": [[1.0, 2.0], [3.0, 4.0]]});
        let vecs = parse_ollama_embeddings(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);

        let bad = serde_json::json!({"error": "no model"});
        assert!(parse_ollama_embeddings(&bad).is_err());
    }

    struct CountingBackend;

    #[async_trait]
    impl EmbeddingBackend for CountingBackend {
        fn model_name(&self) -> &str {
            "stub"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![3.0, 4.0]).collect())
        }
    }

    #[tokio::test]
    async fn holder_normalizes_backend_output() {
        let embedder = Embedder::with_backend(
            crate::config::EmbeddingConfig::default(),
            Arc::new(CountingBackend),
        );
        let vecs = embedder
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vecs.len(), 2);
        for v in vecs {
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-6);
        }
    }
}
