use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Characters of parsed text kept as a document abstract.
pub const ABSTRACT_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct KnowledgeBase {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "supplierName")]
    pub embedding_supplier: String,
    pub embedding_model: String,
    /// Fixed once the first chunk has been embedded.
    #[serde(default)]
    pub dimension: Option<usize>,
    pub create_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ParseStatus {
    Pending,
    Parsing,
    Parsed,
    Failed,
}

impl ParseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ParseStatus::Parsed | ParseStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Document {
    pub id: Uuid,
    pub file_name: String,
    pub source_path: String,
    pub status: ParseStatus,
    #[serde(default)]
    pub chunk_count: usize,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub create_time: i64,
    pub update_time: i64,
}

fn default_enabled() -> bool {
    true
}

impl Document {
    pub fn pending(source_path: &str) -> Self {
        let now = chrono::Utc::now().timestamp();
        let file_name = std::path::Path::new(source_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(source_path)
            .to_string();
        Self {
            id: Uuid::new_v4(),
            file_name,
            source_path: source_path.to_string(),
            status: ParseStatus::Pending,
            chunk_count: 0,
            abstract_text: String::new(),
            failure: None,
            enabled: true,
            create_time: now,
            update_time: now,
        }
    }
}

/// On-disk record for one document: metadata plus its chunk texts. The
/// embedding vectors live separately in the base's `vectors.bin`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub document: Document,
    #[serde(default)]
    pub chunks: Vec<ChunkMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub chunk_id: u64,
    pub ordinal: usize,
    pub text: String,
    pub offset: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_document_takes_file_name() {
        let doc = Document::pending("/tmp/reports/q3-notes.md");
        assert_eq!(doc.file_name, "q3-notes.md");
        assert_eq!(doc.status, ParseStatus::Pending);
        assert!(doc.enabled);
    }

    #[test]
    fn test_parse_status_terminal() {
        assert!(!ParseStatus::Pending.is_terminal());
        assert!(!ParseStatus::Parsing.is_terminal());
        assert!(ParseStatus::Parsed.is_terminal());
        assert!(ParseStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ParseStatus::Parsing).unwrap(),
            "\"parsing\""
        );
    }
}
