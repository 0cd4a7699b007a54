use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::supplier::{ModelEntry, Supplier, LOCAL_SUPPLIER};
use crate::services::providers::Provider;
use crate::storage::ObjectStore;

const SUPPLIERS_DIR: &str = "suppliers";

/// Length of generated supplier names.
const GENERATED_NAME_LEN: usize = 10;

/// A model flattened across suppliers, as the UI consumes it.
#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct FlatModel {
    #[serde(rename = "supplierName")]
    pub supplier_name: String,
    pub model: String,
    pub parameters: String,
    pub title: String,
    pub capabilities: crate::models::supplier::Capabilities,
}

/// Registry of model suppliers: a façade over the object store with an
/// in-memory cache invalidated on every write. All operations hold the one
/// registry mutex and are short.
pub struct SupplierRegistry {
    store: Arc<ObjectStore>,
    cache: Mutex<Option<HashMap<String, Supplier>>>,
    probe_timeout: Duration,
}

impl SupplierRegistry {
    pub fn new(store: Arc<ObjectStore>, probe_timeout: Duration) -> Self {
        Self {
            store,
            cache: Mutex::new(None),
            probe_timeout,
        }
    }

    fn file(name: &str) -> String {
        format!("{}/{}.json", SUPPLIERS_DIR, name)
    }

    async fn load(&self) -> HashMap<String, Supplier> {
        let mut cache = self.cache.lock().await;
        if let Some(map) = cache.as_ref() {
            return map.clone();
        }
        let mut map = HashMap::new();
        for file in self.store.list(SUPPLIERS_DIR).await {
            let Some(name) = file.strip_suffix(".json") else {
                continue;
            };
            if let Some(supplier) = self.store.read_as::<Supplier>(&Self::file(name)).await {
                map.insert(supplier.supplier_name.clone(), supplier);
            }
        }
        *cache = Some(map.clone());
        map
    }

    async fn persist(&self, supplier: &Supplier) -> Result<(), AppError> {
        self.store
            .write(&Self::file(&supplier.supplier_name), supplier)
            .await?;
        let mut cache = self.cache.lock().await;
        if let Some(map) = cache.as_mut() {
            map.insert(supplier.supplier_name.clone(), supplier.clone());
        }
        Ok(())
    }

    pub async fn list_suppliers(&self) -> Vec<Supplier> {
        let mut suppliers: Vec<Supplier> = self.load().await.into_values().collect();
        suppliers.sort_by(|a, b| a.supplier_name.cmp(&b.supplier_name));
        suppliers
    }

    /// Add a supplier. A random alphanumeric name is generated when the
    /// caller leaves `supplier_name` empty; explicit duplicates conflict.
    pub async fn add_supplier(&self, mut cfg: Supplier) -> Result<Supplier, AppError> {
        let existing = self.load().await;
        if cfg.supplier_name.is_empty() {
            loop {
                let candidate: String = Uuid::new_v4()
                    .simple()
                    .to_string()
                    .chars()
                    .take(GENERATED_NAME_LEN)
                    .collect();
                if !existing.contains_key(&candidate) {
                    cfg.supplier_name = candidate;
                    break;
                }
            }
        } else if existing.contains_key(&cfg.supplier_name) {
            return Err(AppError::Conflict(format!(
                "supplier {} already exists",
                cfg.supplier_name
            )));
        }
        if cfg.supplier_name == LOCAL_SUPPLIER && existing.contains_key(LOCAL_SUPPLIER) {
            return Err(AppError::Conflict("local supplier already exists".into()));
        }
        if cfg.title.is_empty() {
            cfg.title = cfg.supplier_name.clone();
        }
        self.persist(&cfg).await?;
        info!("supplier {} added", cfg.supplier_name);
        Ok(cfg)
    }

    /// Remove a supplier and its models. Conversation history referencing it
    /// is never touched.
    pub async fn remove_supplier(&self, name: &str) -> Result<(), AppError> {
        self.get_supplier_config(name).await?;
        self.store.remove(&Self::file(name)).await?;
        let mut cache = self.cache.lock().await;
        if let Some(map) = cache.as_mut() {
            map.remove(name);
        }
        info!("supplier {} removed", name);
        Ok(())
    }

    pub async fn set_supplier_status(&self, name: &str, enabled: bool) -> Result<(), AppError> {
        let mut supplier = self.get_supplier_config(name).await?;
        supplier.enabled = enabled;
        self.persist(&supplier).await
    }

    pub async fn get_supplier_config(&self, name: &str) -> Result<Supplier, AppError> {
        self.load()
            .await
            .remove(name)
            .ok_or_else(|| AppError::NotFound(format!("supplier {}", name)))
    }

    /// Replace mutable fields; the name and model list stay as stored.
    pub async fn set_supplier_config(&self, cfg: Supplier) -> Result<(), AppError> {
        let mut supplier = self.get_supplier_config(&cfg.supplier_name).await?;
        supplier.title = cfg.title;
        supplier.base_url = cfg.base_url;
        supplier.api_key = cfg.api_key;
        self.persist(&supplier).await
    }

    /// Probe the supplier endpoint. `None` means reachable; otherwise a
    /// human-readable reason. No side effects.
    pub async fn check_supplier_config(&self, name: &str) -> Result<Option<String>, AppError> {
        let supplier = self.get_supplier_config(name).await?;
        let provider = Provider::for_supplier(&supplier, self.probe_timeout);
        match provider.probe().await {
            Ok(()) => Ok(None),
            Err(e) => Ok(Some(e.to_string())),
        }
    }

    pub async fn list_models(&self, supplier: &str) -> Result<Vec<ModelEntry>, AppError> {
        Ok(self.get_supplier_config(supplier).await?.models)
    }

    pub async fn add_model(&self, supplier: &str, model: ModelEntry) -> Result<(), AppError> {
        let mut cfg = self.get_supplier_config(supplier).await?;
        if cfg.find_model(&model.name).is_some() {
            return Err(AppError::Conflict(format!(
                "model {} already exists on {}",
                model.name, supplier
            )));
        }
        cfg.models.push(model);
        self.persist(&cfg).await
    }

    pub async fn remove_model(&self, supplier: &str, model: &str) -> Result<(), AppError> {
        let mut cfg = self.get_supplier_config(supplier).await?;
        let before = cfg.models.len();
        cfg.models.retain(|m| m.name != model);
        if cfg.models.len() == before {
            return Err(AppError::NotFound(format!("model {}", model)));
        }
        self.persist(&cfg).await
    }

    pub async fn set_model_status(
        &self,
        supplier: &str,
        model: &str,
        enabled: bool,
    ) -> Result<(), AppError> {
        self.update_model(supplier, model, |m| m.enabled = enabled)
            .await
    }

    pub async fn set_model_title(
        &self,
        supplier: &str,
        model: &str,
        title: &str,
    ) -> Result<(), AppError> {
        let title = title.to_string();
        self.update_model(supplier, model, move |m| m.title = title.clone())
            .await
    }

    async fn update_model(
        &self,
        supplier: &str,
        model: &str,
        apply: impl FnOnce(&mut ModelEntry),
    ) -> Result<(), AppError> {
        let mut cfg = self.get_supplier_config(supplier).await?;
        let entry = cfg
            .models
            .iter_mut()
            .find(|m| m.name == model)
            .ok_or_else(|| AppError::NotFound(format!("model {}", model)))?;
        apply(entry);
        self.persist(&cfg).await
    }

    /// Embedding-capable models flattened across enabled suppliers.
    pub async fn list_embedding_models(&self) -> Vec<FlatModel> {
        self.flatten(|m| m.capabilities.embedding).await
    }

    /// Chat-capable models flattened across enabled suppliers, as shown in
    /// the chat model picker.
    pub async fn list_chat_models(&self) -> Vec<FlatModel> {
        self.flatten(|m| m.capabilities.chat).await
    }

    async fn flatten(&self, keep: impl Fn(&ModelEntry) -> bool) -> Vec<FlatModel> {
        let mut flat = Vec::new();
        for supplier in self.list_suppliers().await {
            if !supplier.enabled {
                continue;
            }
            for model in &supplier.models {
                if model.enabled && keep(model) {
                    flat.push(FlatModel {
                        supplier_name: supplier.supplier_name.clone(),
                        model: model.name.clone(),
                        parameters: model.parameters.clone(),
                        title: model.title.clone(),
                        capabilities: model.capabilities,
                    });
                }
            }
        }
        flat
    }

    /// Resolve a send target. A supplier that is not configured (typically
    /// removed after the conversation was created) is an invalid request;
    /// an unknown model on a configured supplier is not found; disabled
    /// either way conflicts.
    pub async fn resolve(
        &self,
        supplier_name: &str,
        model: &str,
    ) -> Result<(Supplier, ModelEntry), AppError> {
        let supplier = self
            .load()
            .await
            .remove(supplier_name)
            .ok_or_else(|| {
                AppError::InvalidRequest(format!("supplier {} is not configured", supplier_name))
            })?;
        if !supplier.enabled {
            return Err(AppError::Conflict(format!(
                "supplier {} is disabled",
                supplier_name
            )));
        }
        let entry = supplier
            .find_model(model)
            .ok_or_else(|| AppError::NotFound(format!("model {}", model)))?
            .clone();
        if !entry.enabled {
            return Err(AppError::Conflict(format!("model {} is disabled", model)));
        }
        Ok((supplier, entry))
    }

    /// Create or update the local supplier so its base URL tracks the
    /// managed runtime.
    pub async fn ensure_local_supplier(&self, base_url: &str) -> Result<(), AppError> {
        let mut supplier = match self.get_supplier_config(LOCAL_SUPPLIER).await {
            Ok(s) => s,
            Err(AppError::NotFound(_)) => Supplier {
                supplier_name: LOCAL_SUPPLIER.to_string(),
                title: "Local models".to_string(),
                base_url: String::new(),
                api_key: String::new(),
                enabled: true,
                models: Vec::new(),
            },
            Err(e) => return Err(e),
        };
        supplier.base_url = base_url.to_string();
        self.persist(&supplier).await
    }

    /// Mirror the installed-artifact list into the local supplier's models.
    pub async fn sync_local_models(&self, models: Vec<ModelEntry>) -> Result<(), AppError> {
        let mut supplier = self.get_supplier_config(LOCAL_SUPPLIER).await?;
        supplier.models = models;
        self.persist(&supplier).await
    }

    pub async fn add_local_model(&self, model: ModelEntry) -> Result<(), AppError> {
        let mut supplier = self.get_supplier_config(LOCAL_SUPPLIER).await?;
        supplier.models.retain(|m| m.artifact_tag() != model.artifact_tag());
        supplier.models.push(model);
        self.persist(&supplier).await
    }

    pub async fn remove_local_model(&self, name: &str, parameters: &str) -> Result<(), AppError> {
        let mut supplier = self.get_supplier_config(LOCAL_SUPPLIER).await?;
        supplier
            .models
            .retain(|m| !(m.name == name && m.parameters == parameters));
        self.persist(&supplier).await
    }
}
