use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

/// Maximum length of an auto-generated conversation title, in characters.
pub const TITLE_MAX_CHARS: usize = 18;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationConfig {
    pub context_id: String,
    pub title: String,
    pub model: String,
    pub parameters: String,
    #[serde(rename = "supplierName")]
    pub supplier_name: String,
    pub create_time: i64,
}

impl ConversationConfig {
    pub fn new(title: &str, model: &str, parameters: &str, supplier_name: &str) -> Self {
        Self {
            context_id: Uuid::new_v4().to_string(),
            title: truncate_title(title),
            model: model.to_string(),
            parameters: parameters.to_string(),
            supplier_name: supplier_name.to_string(),
            create_time: chrono::Utc::now().timestamp(),
        }
    }
}

/// Char-boundary-safe truncation for conversation titles.
pub fn truncate_title(raw: &str) -> String {
    raw.chars().take(TITLE_MAX_CHARS).collect()
}

/// One entry of a conversation's turn log. Entries alternate user then
/// assistant; a (user, assistant) pair is always appended together.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TurnEntry {
    pub id: Uuid,
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub doc_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    #[schema(value_type = Object)]
    pub tool_calls: Value,
    pub create_time: i64,
    pub create_at: String,
    /// Coarse token proxy: the character count of `content`.
    pub tokens: usize,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    #[schema(value_type = Object)]
    pub stat: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_result: Vec<SearchHit>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub search_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub search_query: String,
}

impl TurnEntry {
    pub fn user(content: &str) -> Self {
        Self::bare("user", content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::bare("assistant", content)
    }

    fn bare(role: &str, content: &str) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4(),
            role: role.to_string(),
            content: content.to_string(),
            reasoning: None,
            doc_files: Vec::new(),
            images: Vec::new(),
            tool_calls: Value::Null,
            create_time: now.timestamp(),
            create_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            tokens: content.chars().count(),
            stat: Value::Null,
            search_result: Vec::new(),
            search_type: String::new(),
            search_query: String::new(),
        }
    }
}

/// A scored snippet returned by the web-search collaborator and attached to
/// the assistant entry that used it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(default)]
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_truncation() {
        assert_eq!(truncate_title("hello"), "hello");
        let long = "a".repeat(40);
        assert_eq!(truncate_title(&long).chars().count(), TITLE_MAX_CHARS);
    }

    #[test]
    fn test_title_truncation_is_char_aware() {
        let cjk = "你好世界".repeat(10);
        let title = truncate_title(&cjk);
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS);
    }

    #[test]
    fn test_tokens_counts_chars() {
        let entry = TurnEntry::user("héllo");
        assert_eq!(entry.tokens, 5);
    }

    #[test]
    fn test_turn_entry_roundtrip() {
        let entry = TurnEntry::assistant("answer");
        let json = serde_json::to_string(&entry).unwrap();
        let back: TurnEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, entry.id);
        assert_eq!(back.role, "assistant");
        assert_eq!(back.tokens, 6);
    }
}
