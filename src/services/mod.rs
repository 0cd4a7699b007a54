pub mod embedding;
pub mod local;
pub mod openai;
pub mod providers;
pub mod web_search;

pub use embedding::EmbeddingService;
pub use providers::{ChatDelta, ChatMessage, ChatStreamRequest, Provider, ProviderError};
pub use web_search::{DisabledSearch, WebSearch};
