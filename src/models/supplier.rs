use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Reserved name of the supplier backed by the managed local runtime.
pub const LOCAL_SUPPLIER: &str = "local";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Supplier {
    #[serde(rename = "supplierName")]
    pub supplier_name: String,
    pub title: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub models: Vec<ModelEntry>,
}

fn default_enabled() -> bool {
    true
}

impl Supplier {
    pub fn is_local(&self) -> bool {
        self.supplier_name == LOCAL_SUPPLIER
    }

    pub fn find_model(&self, name: &str) -> Option<&ModelEntry> {
        self.models.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelEntry {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub parameters: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ModelEntry {
    pub fn chat(name: &str, parameters: &str) -> Self {
        Self {
            name: name.to_string(),
            title: name.to_string(),
            parameters: parameters.to_string(),
            capabilities: Capabilities {
                chat: true,
                ..Capabilities::default()
            },
            enabled: true,
        }
    }

    /// `name:parameters` tag identifying a local runtime artifact.
    pub fn artifact_tag(&self) -> String {
        if self.parameters.is_empty() {
            self.name.clone()
        } else {
            format!("{}:{}", self.name, self.parameters)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema)]
pub struct Capabilities {
    #[serde(default)]
    pub chat: bool,
    #[serde(default)]
    pub embedding: bool,
    #[serde(default)]
    pub vision: bool,
    #[serde(default)]
    pub tools: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_tag() {
        let m = ModelEntry::chat("qwen3", "8b");
        assert_eq!(m.artifact_tag(), "qwen3:8b");

        let bare = ModelEntry::chat("qwen3", "");
        assert_eq!(bare.artifact_tag(), "qwen3");
    }

    #[test]
    fn test_supplier_deserialize_defaults() {
        let s: Supplier = serde_json::from_str(
            r#"{"supplierName": "s1", "title": "S1", "base_url": "http://x"}"#,
        )
        .unwrap();
        assert!(s.enabled);
        assert!(s.models.is_empty());
        assert!(s.api_key.is_empty());
    }
}
