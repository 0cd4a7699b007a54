pub mod chunker;
pub mod worker;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::rag::{
    ChunkMeta, Document, DocumentMeta, KnowledgeBase, ParseStatus, ABSTRACT_CHARS,
};
use crate::registry::SupplierRegistry;
use crate::services::providers::Provider;
use crate::services::EmbeddingService;
use crate::storage::{ObjectStore, VectorIndex, VectorRow};

const RAG_DIR: &str = "rag";

#[derive(Clone)]
pub struct RagSettings {
    pub chunk_chars: usize,
    pub top_k: usize,
    pub global_limit: usize,
    pub embed_timeout: Duration,
}

/// On-disk manifest of one knowledge base: the base record plus the chunk id
/// allocator.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BaseManifest {
    #[serde(flatten)]
    base: KnowledgeBase,
    #[serde(default)]
    next_chunk_id: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievedSnippet {
    pub base: String,
    pub doc_id: Uuid,
    pub score: f32,
    pub text: String,
}

/// RAG pipeline façade: knowledge base and document CRUD, the ingest queue
/// feeding the parse worker, and query-time retrieval.
pub struct RagService {
    store: Arc<ObjectStore>,
    registry: Arc<SupplierRegistry>,
    embeddings: EmbeddingService,
    indexes: RwLock<HashMap<String, Arc<VectorIndex>>>,
    worker_tx: mpsc::Sender<()>,
    settings: RagSettings,
}

fn manifest_path(base: &str) -> String {
    format!("{}/{}/manifest.json", RAG_DIR, base)
}

fn docs_dir(base: &str) -> String {
    format!("{}/{}/docs", RAG_DIR, base)
}

fn meta_path(base: &str, doc_id: Uuid) -> String {
    format!("{}/{}/docs/{}.meta", RAG_DIR, base, doc_id)
}

impl RagService {
    /// Load persisted bases, recover documents left mid-parse by a crash,
    /// and rebuild the cosine indexes. Returns the service plus the receiver
    /// the parse worker consumes.
    pub async fn open(
        store: Arc<ObjectStore>,
        registry: Arc<SupplierRegistry>,
        settings: RagSettings,
    ) -> Result<(Arc<Self>, mpsc::Receiver<()>), AppError> {
        let (worker_tx, worker_rx) = mpsc::channel(64);
        let service = Arc::new(Self {
            store,
            registry,
            embeddings: EmbeddingService::new(),
            indexes: RwLock::new(HashMap::new()),
            worker_tx,
            settings,
        });

        for base in service.base_names().await {
            // A document stuck in `parsing` means the previous process died
            // mid-parse; hand it back to the worker.
            for mut meta in service.doc_metas(&base).await {
                if meta.document.status == ParseStatus::Parsing {
                    meta.document.status = ParseStatus::Pending;
                    meta.document.update_time = chrono::Utc::now().timestamp();
                    let _ = service
                        .store
                        .write(&meta_path(&base, meta.document.id), &meta)
                        .await;
                }
            }
            if let Ok(manifest) = service.load_manifest(&base).await {
                if let Some(dim) = manifest.base.dimension {
                    service.ensure_index(&base, dim).await?;
                }
            }
        }
        Ok((service, worker_rx))
    }

    async fn base_names(&self) -> Vec<String> {
        self.store
            .list(RAG_DIR)
            .await
            .into_iter()
            .filter(|name| self.store.abs(&format!("{}/{}", RAG_DIR, name)).is_dir())
            .collect()
    }

    async fn load_manifest(&self, base: &str) -> Result<BaseManifest, AppError> {
        self.store
            .read_as::<BaseManifest>(&manifest_path(base))
            .await
            .ok_or_else(|| AppError::NotFound(format!("knowledge base {}", base)))
    }

    async fn save_manifest(&self, manifest: &BaseManifest) -> Result<(), AppError> {
        self.store
            .write(&manifest_path(&manifest.base.name), manifest)
            .await
            .map_err(Into::into)
    }

    async fn doc_metas(&self, base: &str) -> Vec<DocumentMeta> {
        let mut metas = Vec::new();
        for file in self.store.list(&docs_dir(base)).await {
            if !file.ends_with(".meta") {
                continue;
            }
            if let Some(meta) = self
                .store
                .read_as::<DocumentMeta>(&format!("{}/{}", docs_dir(base), file))
                .await
            {
                metas.push(meta);
            }
        }
        metas
    }

    async fn validate_embedding_model(&self, supplier: &str, model: &str) -> Result<(), AppError> {
        let cfg = self
            .registry
            .get_supplier_config(supplier)
            .await
            .map_err(|_| {
                AppError::InvalidRequest(format!("embedding supplier {} is not configured", supplier))
            })?;
        let entry = cfg.find_model(model).ok_or_else(|| {
            AppError::InvalidRequest(format!("embedding model {} not found on {}", model, supplier))
        })?;
        if !entry.capabilities.embedding {
            return Err(AppError::InvalidRequest(format!(
                "model {} has no embedding capability",
                model
            )));
        }
        Ok(())
    }

    pub async fn create_rag(
        &self,
        name: &str,
        description: &str,
        supplier: &str,
        model: &str,
    ) -> Result<KnowledgeBase, AppError> {
        if name.is_empty() {
            return Err(AppError::InvalidRequest("knowledge base name is required".into()));
        }
        if self.load_manifest(name).await.is_ok() {
            return Err(AppError::Conflict(format!("knowledge base {} already exists", name)));
        }
        self.validate_embedding_model(supplier, model).await?;

        let manifest = BaseManifest {
            base: KnowledgeBase {
                name: name.to_string(),
                description: description.to_string(),
                embedding_supplier: supplier.to_string(),
                embedding_model: model.to_string(),
                dimension: None,
                create_time: chrono::Utc::now().timestamp(),
            },
            next_chunk_id: 0,
        };
        self.save_manifest(&manifest).await?;
        info!("knowledge base {} created", name);
        Ok(manifest.base)
    }

    /// Update a base's description or embedding model. Switching the
    /// embedding model once documents are parsed would orphan every stored
    /// vector, so it is rejected.
    pub async fn modify_rag(
        &self,
        name: &str,
        description: &str,
        supplier: &str,
        model: &str,
    ) -> Result<(), AppError> {
        let mut manifest = self.load_manifest(name).await?;
        let model_changed =
            manifest.base.embedding_supplier != supplier || manifest.base.embedding_model != model;
        if model_changed {
            let any_parsed = self
                .doc_metas(name)
                .await
                .iter()
                .any(|m| m.document.status == ParseStatus::Parsed);
            if any_parsed {
                return Err(AppError::Conflict(
                    "embedding model cannot change while parsed documents exist".into(),
                ));
            }
            self.validate_embedding_model(supplier, model).await?;
            manifest.base.embedding_supplier = supplier.to_string();
            manifest.base.embedding_model = model.to_string();
            manifest.base.dimension = None;
        }
        manifest.base.description = description.to_string();
        self.save_manifest(&manifest).await
    }

    pub async fn remove_rag(&self, name: &str) -> Result<(), AppError> {
        self.load_manifest(name).await?;
        self.indexes.write().await.remove(name);
        self.store
            .remove_tree(&format!("{}/{}", RAG_DIR, name))
            .await?;
        info!("knowledge base {} removed", name);
        Ok(())
    }

    pub async fn list_rag(&self) -> Vec<KnowledgeBase> {
        let mut bases = Vec::new();
        for name in self.base_names().await {
            if let Ok(manifest) = self.load_manifest(&name).await {
                bases.push(manifest.base);
            }
        }
        bases.sort_by(|a, b| a.name.cmp(&b.name));
        bases
    }

    /// Create `pending` records and nudge the worker. The records are
    /// visible to `list_docs` as soon as this returns.
    pub async fn upload_doc(
        &self,
        base: &str,
        paths: &[String],
    ) -> Result<Vec<Document>, AppError> {
        self.load_manifest(base).await?;
        if paths.is_empty() {
            return Err(AppError::InvalidRequest("no document paths given".into()));
        }
        let mut docs = Vec::new();
        for path in paths {
            let doc = Document::pending(path);
            let meta = DocumentMeta {
                document: doc.clone(),
                chunks: Vec::new(),
            };
            self.store.write(&meta_path(base, doc.id), &meta).await?;
            docs.push(doc);
        }
        let _ = self.worker_tx.try_send(());
        Ok(docs)
    }

    pub async fn list_docs(&self, base: &str) -> Result<Vec<Document>, AppError> {
        self.load_manifest(base).await?;
        let mut docs: Vec<Document> = self
            .doc_metas(base)
            .await
            .into_iter()
            .map(|m| m.document)
            .collect();
        docs.sort_by(|a, b| {
            a.create_time
                .cmp(&b.create_time)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });
        Ok(docs)
    }

    pub async fn get_doc_content(&self, base: &str, doc_id: Uuid) -> Result<DocumentMeta, AppError> {
        self.load_manifest(base).await?;
        self.store
            .read_as::<DocumentMeta>(&meta_path(base, doc_id))
            .await
            .ok_or_else(|| AppError::NotFound(format!("document {}", doc_id)))
    }

    /// Remove documents: chunks leave the index and persisted embeddings;
    /// the metadata file goes last.
    pub async fn remove_doc(&self, base: &str, doc_ids: &[Uuid]) -> Result<(), AppError> {
        self.load_manifest(base).await?;
        let index = self.indexes.read().await.get(base).cloned();
        for &doc_id in doc_ids {
            if let Some(index) = &index {
                index
                    .remove_document(doc_id)
                    .await
                    .map_err(|e| AppError::StorageFailure(e.to_string()))?;
            }
            self.store.remove(&meta_path(base, doc_id)).await?;
        }
        Ok(())
    }

    async fn chunk_texts(&self, base: &str) -> HashMap<u64, String> {
        let mut texts = HashMap::new();
        for meta in self.doc_metas(base).await {
            for chunk in meta.chunks {
                texts.insert(chunk.chunk_id, chunk.text);
            }
        }
        texts
    }

    async fn ensure_index(&self, base: &str, dim: usize) -> Result<Arc<VectorIndex>, AppError> {
        if let Some(index) = self.indexes.read().await.get(base) {
            return Ok(index.clone());
        }
        let texts = self.chunk_texts(base).await;
        let path = self.store.abs(&format!("{}/{}/vectors.bin", RAG_DIR, base));
        let index = Arc::new(
            VectorIndex::open(path, dim, &texts)
                .map_err(|e| AppError::StorageFailure(e.to_string()))?,
        );
        self.indexes
            .write()
            .await
            .insert(base.to_string(), index.clone());
        Ok(index)
    }

    /// Query-time retrieval: one query embedding per embedding model,
    /// per-base top-k, then a global re-sort and cap.
    pub async fn retrieve(
        &self,
        rag_list: &[String],
        query: &str,
    ) -> Result<Vec<RetrievedSnippet>, AppError> {
        let mut embedded: HashMap<(String, String), Vec<f32>> = HashMap::new();
        let mut snippets = Vec::new();

        for base in rag_list {
            let manifest = match self.load_manifest(base).await {
                Ok(m) => m,
                Err(_) => {
                    warn!("chat referenced unknown knowledge base {}", base);
                    continue;
                }
            };
            let Some(dim) = manifest.base.dimension else {
                continue;
            };

            let key = (
                manifest.base.embedding_supplier.clone(),
                manifest.base.embedding_model.clone(),
            );
            let query_vector = match embedded.get(&key) {
                Some(v) => v.clone(),
                None => {
                    let supplier = self
                        .registry
                        .get_supplier_config(&manifest.base.embedding_supplier)
                        .await?;
                    let provider = Provider::for_supplier(&supplier, self.settings.embed_timeout);
                    let vector = self
                        .embeddings
                        .embed_one(&provider, &manifest.base.embedding_model, query)
                        .await?;
                    embedded.insert(key, vector.clone());
                    vector
                }
            };
            if query_vector.len() != dim {
                warn!(
                    "query embedding dimension {} does not match base {} ({})",
                    query_vector.len(),
                    base,
                    dim
                );
                continue;
            }

            let enabled: HashSet<Uuid> = self
                .doc_metas(base)
                .await
                .iter()
                .filter(|m| m.document.enabled && m.document.status == ParseStatus::Parsed)
                .map(|m| m.document.id)
                .collect();
            let index = self.ensure_index(base, dim).await?;
            for hit in index.query(&query_vector, self.settings.top_k, &enabled).await {
                snippets.push(RetrievedSnippet {
                    base: base.clone(),
                    doc_id: hit.doc_id,
                    score: hit.score,
                    text: hit.text,
                });
            }
        }

        snippets.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        snippets.truncate(self.settings.global_limit);
        Ok(snippets)
    }

    /// Render retrieved snippets into the prompt preamble given to the
    /// model.
    pub fn format_preamble(snippets: &[RetrievedSnippet]) -> String {
        let mut out = String::from(
            "Answer with the help of the following reference snippets from the user's knowledge bases.\n",
        );
        for (i, snippet) in snippets.iter().enumerate() {
            out.push_str(&format!("[{}] ({}) {}\n", i + 1, snippet.base, snippet.text));
        }
        out
    }

    // ---- parse worker internals ----

    /// Oldest pending document across all bases, by upload time.
    pub(crate) async fn oldest_pending(&self) -> Option<(String, Uuid)> {
        let mut best: Option<(i64, String, Uuid)> = None;
        for base in self.base_names().await {
            for meta in self.doc_metas(&base).await {
                if meta.document.status != ParseStatus::Pending {
                    continue;
                }
                let candidate = (meta.document.create_time, base.clone(), meta.document.id);
                if best
                    .as_ref()
                    .map(|(t, _, _)| candidate.0 < *t)
                    .unwrap_or(true)
                {
                    best = Some(candidate);
                }
            }
        }
        best.map(|(_, base, id)| (base, id))
    }

    /// Advance one document through parse → embed → persist. Any error marks
    /// the document `failed` and never propagates to the worker loop.
    pub(crate) async fn process_document(&self, base: &str, doc_id: Uuid) {
        let path = meta_path(base, doc_id);
        let Some(mut meta) = self.store.read_as::<DocumentMeta>(&path).await else {
            return;
        };
        meta.document.status = ParseStatus::Parsing;
        meta.document.update_time = chrono::Utc::now().timestamp();
        if let Err(e) = self.store.write(&path, &meta).await {
            warn!("failed to mark document {} parsing: {}", doc_id, e);
            return;
        }

        match self.parse_and_embed(base, &mut meta).await {
            Ok(()) => {
                meta.document.status = ParseStatus::Parsed;
                meta.document.failure = None;
                info!(
                    "document {} parsed into {} chunks",
                    meta.document.file_name, meta.document.chunk_count
                );
            }
            Err(reason) => {
                warn!("document {} failed: {}", meta.document.file_name, reason);
                meta.document.status = ParseStatus::Failed;
                meta.document.failure = Some(reason);
            }
        }
        meta.document.update_time = chrono::Utc::now().timestamp();
        if let Err(e) = self.store.write(&path, &meta).await {
            warn!("failed to finalise document {}: {}", doc_id, e);
        }
    }

    async fn parse_and_embed(&self, base: &str, meta: &mut DocumentMeta) -> Result<(), String> {
        let mut manifest = self.load_manifest(base).await.map_err(|e| e.to_string())?;
        let content = std::fs::read_to_string(&meta.document.source_path)
            .map_err(|e| format!("cannot read {}: {}", meta.document.source_path, e))?;

        let chunks = chunker::chunk_file(
            &meta.document.file_name,
            &content,
            self.settings.chunk_chars,
        );
        meta.document.abstract_text = content.chars().take(ABSTRACT_CHARS).collect();
        meta.document.chunk_count = chunks.len();
        if chunks.is_empty() {
            meta.chunks = Vec::new();
            return Ok(());
        }

        let supplier = self
            .registry
            .get_supplier_config(&manifest.base.embedding_supplier)
            .await
            .map_err(|e| e.to_string())?;
        let provider = Provider::for_supplier(&supplier, self.settings.embed_timeout);

        let mut rows = Vec::with_capacity(chunks.len());
        let mut chunk_metas = Vec::with_capacity(chunks.len());
        for (ordinal, chunk) in chunks.iter().enumerate() {
            let vector = self
                .embeddings
                .embed_one(&provider, &manifest.base.embedding_model, &chunk.text)
                .await
                .map_err(|e| e.to_string())?;
            match manifest.base.dimension {
                None => manifest.base.dimension = Some(vector.len()),
                Some(dim) if dim != vector.len() => {
                    return Err(format!(
                        "embedding dimension {} does not match base dimension {}",
                        vector.len(),
                        dim
                    ));
                }
                Some(_) => {}
            }
            let chunk_id = manifest.next_chunk_id + ordinal as u64;
            rows.push(VectorRow {
                chunk_id,
                doc_id: meta.document.id,
                vector,
                text: chunk.text.clone(),
            });
            chunk_metas.push(ChunkMeta {
                chunk_id,
                ordinal,
                text: chunk.text.clone(),
                offset: chunk.offset,
            });
        }

        manifest.next_chunk_id += chunks.len() as u64;
        self.save_manifest(&manifest).await.map_err(|e| e.to_string())?;

        let dim = manifest.base.dimension.expect("dimension set above");
        let index = self
            .ensure_index(base, dim)
            .await
            .map_err(|e| e.to_string())?;
        index.append(rows).await.map_err(|e| e.to_string())?;

        meta.chunks = chunk_metas;
        Ok(())
    }
}
