use async_trait::async_trait;

use crate::models::chat::SearchHit;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("web search unavailable: {0}")]
    Unavailable(String),
}

/// External web-search collaborator: a function from query to scored
/// snippets. The daemon ships without a fetcher; the desktop shell injects
/// one, and tests use a stub.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError>;
}

/// Default collaborator when no fetcher is configured: logs and returns
/// nothing, so chats proceed without augmentation.
pub struct DisabledSearch;

#[async_trait]
impl WebSearch for DisabledSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        tracing::warn!("web search requested but no fetcher is configured: {}", query);
        Ok(Vec::new())
    }
}
