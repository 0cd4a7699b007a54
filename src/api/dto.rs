use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::chat::SendRequest;
use crate::error::AppError;

// ==================== index ====================

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetLanguageRequest {
    pub language: String,
}

// ==================== chat ====================

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateChatRequest {
    #[serde(default)]
    pub title: String,
    pub model: String,
    #[serde(default)]
    pub parameters: String,
    #[serde(rename = "supplierName")]
    pub supplier_name: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ContextIdRequest {
    pub context_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ModifyTitleRequest {
    pub context_id: String,
    pub title: String,
}

/// Body of `POST /chat/chat`. Field names follow the desktop client's wire
/// protocol.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ChatRequest {
    pub model: String,
    #[serde(default)]
    pub parameters: String,
    #[serde(default)]
    pub context_id: String,
    #[serde(rename = "supplierName")]
    pub supplier_name: String,
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub rag_list: Vec<String>,
    #[serde(default)]
    pub temp_chat: bool,
    pub user_content: String,
    #[serde(default)]
    pub doc_files: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub regenerate_id: Option<String>,
}

impl ChatRequest {
    pub fn into_send_request(self) -> Result<SendRequest, AppError> {
        let regenerate_id = match self.regenerate_id.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(Uuid::parse_str(raw).map_err(|_| {
                AppError::InvalidRequest(format!("regenerate_id {} is not a valid id", raw))
            })?),
        };
        Ok(SendRequest {
            model: self.model,
            parameters: self.parameters,
            context_id: self.context_id,
            supplier_name: self.supplier_name,
            search: self.search,
            rag_list: self.rag_list,
            temp_chat: self.temp_chat,
            user_content: self.user_content,
            doc_files: self.doc_files,
            images: self.images,
            regenerate_id,
        })
    }
}

// ==================== suppliers ====================

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddSupplierRequest {
    #[serde(rename = "supplierName", default)]
    pub supplier_name: String,
    #[serde(default)]
    pub title: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SupplierNameRequest {
    #[serde(rename = "supplierName")]
    pub supplier_name: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetSupplierStatusRequest {
    #[serde(rename = "supplierName")]
    pub supplier_name: String,
    pub enabled: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetSupplierConfigRequest {
    #[serde(rename = "supplierName")]
    pub supplier_name: String,
    #[serde(default)]
    pub title: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddModelRequest {
    #[serde(rename = "supplierName")]
    pub supplier_name: String,
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub parameters: String,
    #[serde(default)]
    pub capabilities: crate::models::supplier::Capabilities,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ModelRefRequest {
    #[serde(rename = "supplierName")]
    pub supplier_name: String,
    pub model: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetModelStatusRequest {
    #[serde(rename = "supplierName")]
    pub supplier_name: String,
    pub model: String,
    pub enabled: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetModelTitleRequest {
    #[serde(rename = "supplierName")]
    pub supplier_name: String,
    pub model: String,
    pub title: String,
}

// ==================== rag ====================

#[derive(Debug, Deserialize, ToSchema)]
pub struct RagConfigRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "supplierName")]
    pub supplier_name: String,
    pub model: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RagNameRequest {
    pub name: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UploadDocRequest {
    pub name: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DocContentQuery {
    pub name: String,
    pub doc_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RemoveDocQuery {
    pub name: String,
    /// Comma-separated document ids.
    pub doc_ids: String,
}

impl RemoveDocQuery {
    pub fn ids(&self) -> Result<Vec<Uuid>, AppError> {
        self.doc_ids
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| {
                Uuid::parse_str(s.trim())
                    .map_err(|_| AppError::InvalidRequest(format!("bad document id {}", s)))
            })
            .collect()
    }
}

// ==================== manager ====================

#[derive(Debug, Deserialize, ToSchema)]
pub struct InstallModelRequest {
    pub name: String,
    #[serde(default)]
    pub parameters: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InstallManagerRequest {
    pub manager_name: String,
}

// ==================== share ====================

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateShareRequest {
    pub context_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GetShareRequest {
    pub share_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_defaults() {
        let req: ChatRequest = serde_json::from_str(
            r#"{"model": "m", "supplierName": "s", "user_content": "hi"}"#,
        )
        .unwrap();
        assert!(req.context_id.is_empty());
        assert!(req.rag_list.is_empty());
        assert!(!req.temp_chat);
        assert!(req.into_send_request().unwrap().regenerate_id.is_none());
    }

    #[test]
    fn test_bad_regenerate_id_rejected() {
        let req: ChatRequest = serde_json::from_str(
            r#"{"model": "m", "supplierName": "s", "user_content": "hi", "regenerate_id": "nope"}"#,
        )
        .unwrap();
        assert!(req.into_send_request().is_err());
    }

    #[test]
    fn test_remove_doc_query_parses_csv() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let query = RemoveDocQuery {
            name: "kb".to_string(),
            doc_ids: format!("{},{}", a, b),
        };
        assert_eq!(query.ids().unwrap(), vec![a, b]);
    }
}
