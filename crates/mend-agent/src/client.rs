//! Cached generation client
//!
//! Every caller in the pipeline (query formulation, incrementality judgment,
//! patch generation) goes through [`GenerationClient::query`].

use crate::backend::{GenerationBackend, HttpBackend};
use crate::cache::ResponseCache;
use crate::types::GenerationRequest;
use mend_core::config::GenerationConfig;
use mend_core::fail_open::fail_open;
use mend_core::{MendError, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// File name of the persisted cache inside the state directory
pub const CACHE_FILE: &str = "generation_cache.json";

pub struct GenerationClient {
    backend: Arc<dyn GenerationBackend>,
    model: String,
    cache: ResponseCache,
    timeout: Duration,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn GenerationBackend>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            backend,
            model: model.into(),
            cache: ResponseCache::new(),
            timeout,
        }
    }

    /// Replace the in-memory cache (e.g. with one loaded from disk)
    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self
    }

    /// HTTP-backed client, with its cache under `state_dir` when persistence is on
    pub async fn from_config(config: &GenerationConfig, state_dir: &Path) -> Result<Self> {
        let backend = HttpBackend::from_config(config)?;
        let client = Self::new(
            Arc::new(backend),
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        );

        if config.persist_cache {
            Ok(client.with_cache(ResponseCache::load(state_dir.join(CACHE_FILE)).await))
        } else {
            Ok(client)
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Generate text for `prompt`, trimmed of surrounding whitespace
    ///
    /// A cached answer for the same prompt and temperature is returned
    /// without contacting the backend. Failures are never cached.
    #[instrument(skip(self, prompt), fields(backend = %self.backend.name()))]
    pub async fn query(&self, prompt: &str, max_tokens: usize, temperature: f32) -> Result<String> {
        if let Some(hit) = self.cache.get(prompt, temperature) {
            debug!("Generation cache hit");
            return Ok(hit);
        }

        let request = GenerationRequest::single(&self.model, prompt, max_tokens, temperature);
        let response = tokio::time::timeout(self.timeout, self.backend.generate(&request))
            .await
            .map_err(|_| MendError::Timeout(self.timeout.as_secs()))??;

        let text = response.trim().to_string();
        if text.is_empty() {
            return Err(MendError::Generation("Empty response".to_string()));
        }

        self.cache.insert(prompt, temperature, text.clone());
        fail_open("persist_generation_cache", self.cache.persist().await);

        Ok(text)
    }
}
