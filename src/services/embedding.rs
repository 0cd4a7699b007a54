use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use tracing::debug;

use crate::services::providers::{Provider, ProviderError};

/// Number of embedding calls allowed in flight at once.
const MAX_CONCURRENT: usize = 4;
const MAX_RETRIES: usize = 3;

/// Façade over provider embedding calls: bounded concurrency and retry with
/// exponential backoff. One chunk per call keeps no operation CPU-bound for
/// longer than a single embedding.
#[derive(Clone)]
pub struct EmbeddingService {
    semaphore: Arc<Semaphore>,
}

impl EmbeddingService {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT)),
        }
    }

    pub async fn embed_one(
        &self,
        provider: &Provider,
        model: &str,
        text: &str,
    ) -> Result<Vec<f32>, ProviderError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("embedding semaphore closed");

        let input = [text.to_string()];
        let strategy = ExponentialBackoff::from_millis(100).take(MAX_RETRIES - 1);
        let vectors = Retry::spawn(strategy, || async {
            provider.embed(model, &input).await.map_err(|e| {
                debug!("embedding attempt failed for model {}: {}", model, e);
                e
            })
        })
        .await?;

        vectors
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("no embeddings returned".to_string()))
    }
}

impl Default for EmbeddingService {
    fn default() -> Self {
        Self::new()
    }
}
