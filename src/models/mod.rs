pub mod chat;
pub mod manager;
pub mod rag;
pub mod supplier;

pub use chat::{ConversationConfig, TurnEntry};
pub use manager::{InstallJob, InstallStatus};
pub use rag::{Document, DocumentMeta, KnowledgeBase, ParseStatus};
pub use supplier::{Capabilities, ModelEntry, Supplier};
