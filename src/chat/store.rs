use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::chat::{ConversationConfig, TurnEntry};
use crate::services::ChatMessage;
use crate::storage::ObjectStore;

const CONTEXT_DIR: &str = "context";

fn config_path(context_id: &str) -> String {
    format!("{}/{}/config.json", CONTEXT_DIR, context_id)
}

fn history_path(context_id: &str) -> String {
    format!("{}/{}/history.json", CONTEXT_DIR, context_id)
}

/// Persisted conversations and their turn logs. Appends are always a
/// (user, assistant) pair; regeneration truncation is the only operation
/// that shortens a log.
pub struct ChatStore {
    store: Arc<ObjectStore>,
}

impl ChatStore {
    pub fn new(store: Arc<ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        title: &str,
        model: &str,
        parameters: &str,
        supplier_name: &str,
    ) -> Result<ConversationConfig, AppError> {
        let config = ConversationConfig::new(title, model, parameters, supplier_name);
        self.store
            .write(&config_path(&config.context_id), &config)
            .await?;
        info!("conversation {} created", config.context_id);
        Ok(config)
    }

    pub async fn list(&self) -> Vec<ConversationConfig> {
        let mut configs = Vec::new();
        for entry in self.store.list(CONTEXT_DIR).await {
            if let Some(config) = self
                .store
                .read_as::<ConversationConfig>(&config_path(&entry))
                .await
            {
                configs.push(config);
            }
        }
        configs.sort_by(|a, b| b.create_time.cmp(&a.create_time));
        configs
    }

    pub async fn get(&self, context_id: &str) -> Result<ConversationConfig, AppError> {
        self.store
            .read_as::<ConversationConfig>(&config_path(context_id))
            .await
            .ok_or_else(|| AppError::NotFound(format!("conversation {}", context_id)))
    }

    /// Full ordered turn log. Conversations persist their history even after
    /// the supplier they reference is removed.
    pub async fn history(&self, context_id: &str) -> Result<Vec<TurnEntry>, AppError> {
        self.get(context_id).await?;
        Ok(self
            .store
            .read_as::<Vec<TurnEntry>>(&history_path(context_id))
            .await
            .unwrap_or_default())
    }

    /// The most recently created conversation with its history, used to
    /// restore the UI at startup.
    pub async fn latest(&self) -> Option<(ConversationConfig, Vec<TurnEntry>)> {
        let config = self.list().await.into_iter().next()?;
        let history = self
            .store
            .read_as::<Vec<TurnEntry>>(&history_path(&config.context_id))
            .await
            .unwrap_or_default();
        Some((config, history))
    }

    pub async fn remove(&self, context_id: &str) -> Result<(), AppError> {
        self.get(context_id).await?;
        self.store
            .remove_tree(&format!("{}/{}", CONTEXT_DIR, context_id))
            .await?;
        info!("conversation {} removed", context_id);
        Ok(())
    }

    pub async fn modify_title(&self, context_id: &str, title: &str) -> Result<(), AppError> {
        let mut config = self.get(context_id).await?;
        config.title = title.to_string();
        self.store
            .write(&config_path(context_id), &config)
            .await
            .map_err(Into::into)
    }

    /// Append a completed (user, assistant) pair. When `regenerate_id`
    /// matches an entry, the log is truncated at and after that entry first;
    /// entries before it are untouched.
    pub async fn append_turn(
        &self,
        context_id: &str,
        user: TurnEntry,
        assistant: TurnEntry,
        regenerate_id: Option<Uuid>,
    ) -> Result<(), AppError> {
        let mut history = self.history(context_id).await?;
        if let Some(rid) = regenerate_id {
            if let Some(pos) = history.iter().position(|e| e.id == rid) {
                history.truncate(pos);
            }
        }
        history.push(user);
        history.push(assistant);
        self.store
            .write(&history_path(context_id), &history)
            .await
            .map_err(Into::into)
    }

    /// Build the upstream message list: the newest history entries whose
    /// summed character count fits half the context length, oldest dropped
    /// first, then the current user content (never counted against the
    /// budget).
    pub fn assemble_context(
        history: &[TurnEntry],
        current_user_content: &str,
        context_length: usize,
    ) -> Vec<ChatMessage> {
        let budget = context_length / 2;
        let mut kept = 0usize;
        let mut total = 0usize;
        for entry in history.iter().rev() {
            let len = entry.content.chars().count();
            if total + len > budget {
                break;
            }
            total += len;
            kept += 1;
        }

        let mut messages: Vec<ChatMessage> = history[history.len() - kept..]
            .iter()
            .map(|e| ChatMessage {
                role: e.role.clone(),
                content: e.content.clone(),
            })
            .collect();
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: current_user_content.to_string(),
        });
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chat_store(dir: &TempDir) -> ChatStore {
        ChatStore::new(Arc::new(ObjectStore::new(dir.path()).unwrap()))
    }

    #[tokio::test]
    async fn test_create_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let chats = chat_store(&dir);

        let created = chats
            .create("a title that is far too long to keep", "m", "7b", "s1")
            .await
            .unwrap();
        let fetched = chats.get(&created.context_id).await.unwrap();
        assert_eq!(fetched.title.chars().count(), 18);
        assert_eq!(fetched.model, created.model);
        assert_eq!(fetched.supplier_name, "s1");
    }

    #[tokio::test]
    async fn test_history_keeps_turn_parity() {
        let dir = TempDir::new().unwrap();
        let chats = chat_store(&dir);
        let config = chats.create("t", "m", "7b", "s1").await.unwrap();

        for i in 0..3 {
            chats
                .append_turn(
                    &config.context_id,
                    TurnEntry::user(&format!("q{}", i)),
                    TurnEntry::assistant(&format!("a{}", i)),
                    None,
                )
                .await
                .unwrap();
        }

        let history = chats.history(&config.context_id).await.unwrap();
        assert_eq!(history.len() % 2, 0);
        for (i, entry) in history.iter().enumerate() {
            let expected = if i % 2 == 0 { "user" } else { "assistant" };
            assert_eq!(entry.role, expected);
        }
    }

    #[tokio::test]
    async fn test_regeneration_truncates_tail_only() {
        let dir = TempDir::new().unwrap();
        let chats = chat_store(&dir);
        let config = chats.create("t", "m", "7b", "s1").await.unwrap();
        let id = &config.context_id;

        chats
            .append_turn(id, TurnEntry::user("q0"), TurnEntry::assistant("a0"), None)
            .await
            .unwrap();
        chats
            .append_turn(id, TurnEntry::user("q1"), TurnEntry::assistant("a1"), None)
            .await
            .unwrap();

        let history = chats.history(id).await.unwrap();
        let regen_target = history[3].id;

        chats
            .append_turn(
                id,
                TurnEntry::user("q1"),
                TurnEntry::assistant("a1-redo"),
                Some(regen_target),
            )
            .await
            .unwrap();

        let after = chats.history(id).await.unwrap();
        assert_eq!(after.len(), 4);
        // Entries before the regenerated one are unchanged.
        assert_eq!(after[0].id, history[0].id);
        assert_eq!(after[1].id, history[1].id);
        assert_eq!(after[3].content, "a1-redo");
    }

    #[tokio::test]
    async fn test_remove_unknown_is_not_found() {
        let dir = TempDir::new().unwrap();
        let chats = chat_store(&dir);
        let err = chats.remove("missing").await.unwrap_err();
        assert_eq!(err.code(), 404);
    }

    #[test]
    fn test_context_budget_holds() {
        let history: Vec<TurnEntry> = (0..10)
            .flat_map(|i| {
                vec![
                    TurnEntry::user(&"u".repeat(100 + i)),
                    TurnEntry::assistant(&"a".repeat(100 + i)),
                ]
            })
            .collect();

        for context_length in [300usize, 600, 1200, 100_000] {
            let assembled = ChatStore::assemble_context(&history, "current", context_length);
            let history_chars: usize = assembled[..assembled.len() - 1]
                .iter()
                .map(|m| m.content.chars().count())
                .sum();
            assert!(history_chars <= context_length / 2);
            // The current user turn is always present and last.
            assert_eq!(assembled.last().unwrap().content, "current");
        }
    }

    #[test]
    fn test_context_drops_oldest_first() {
        let history = vec![
            TurnEntry::user("old question"),
            TurnEntry::assistant("old answer"),
            TurnEntry::user("new question"),
            TurnEntry::assistant("new answer"),
        ];
        // Budget fits only the newest pair.
        let assembled = ChatStore::assemble_context(&history, "now", 44);
        assert_eq!(assembled.len(), 3);
        assert_eq!(assembled[0].content, "new question");
        assert_eq!(assembled[1].content, "new answer");
    }

    #[test]
    fn test_context_with_empty_history() {
        let assembled = ChatStore::assemble_context(&[], "hello", 1000);
        assert_eq!(assembled.len(), 1);
        assert_eq!(assembled[0].role, "user");
    }
}
