use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Bytes per persisted row: chunk id, owning document id, then the vector.
fn row_size(dim: usize) -> usize {
    8 + 16 + dim * 4
}

#[derive(Debug, Clone)]
pub struct VectorRow {
    pub chunk_id: u64,
    pub doc_id: Uuid,
    pub vector: Vec<f32>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: u64,
    pub doc_id: Uuid,
    pub score: f32,
    pub text: String,
}

/// Flat cosine index over one knowledge base. Rows are held in memory and
/// persisted to an append-only `vectors.bin`; the manifest carries the
/// embedding dimension. Only the parse worker appends; removal rewrites the
/// file compacted.
pub struct VectorIndex {
    path: PathBuf,
    dim: usize,
    rows: RwLock<Vec<VectorRow>>,
}

impl VectorIndex {
    /// Load the persisted file, joining chunk texts by id. Orphan rows (no
    /// surviving chunk text) and a trailing partial record from a crashed
    /// append are dropped, and the file is rewritten compacted when anything
    /// was dropped. Running this again is a no-op.
    pub fn open(
        path: impl Into<PathBuf>,
        dim: usize,
        texts: &HashMap<u64, String>,
    ) -> Result<Self, std::io::Error> {
        let path = path.into();
        let (rows, dirty) = load_rows(&path, dim, texts)?;
        if dirty {
            write_all_rows(&path, &rows)?;
            info!("compacted vector file {}", path.display());
        }
        Ok(Self {
            path,
            dim,
            rows: RwLock::new(rows),
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn append(&self, new_rows: Vec<VectorRow>) -> Result<(), std::io::Error> {
        let mut rows = self.rows.write().await;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for row in &new_rows {
            debug_assert_eq!(row.vector.len(), self.dim);
            file.write_all(&encode_row(row))?;
        }
        file.sync_data()?;
        rows.extend(new_rows);
        Ok(())
    }

    /// Drop all rows of a document from memory and disk. Returns the number
    /// of rows removed.
    pub async fn remove_document(&self, doc_id: Uuid) -> Result<usize, std::io::Error> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|r| r.doc_id != doc_id);
        let removed = before - rows.len();
        if removed > 0 {
            write_all_rows(&self.path, &rows)?;
        }
        Ok(removed)
    }

    /// Cosine top-k over enabled documents, ties broken by lower chunk id.
    pub async fn query(
        &self,
        query_vector: &[f32],
        k: usize,
        enabled_docs: &HashSet<Uuid>,
    ) -> Vec<ScoredChunk> {
        let rows = self.rows.read().await;
        let mut scored: Vec<ScoredChunk> = rows
            .iter()
            .filter(|r| enabled_docs.contains(&r.doc_id))
            .map(|r| ScoredChunk {
                chunk_id: r.chunk_id,
                doc_id: r.doc_id,
                score: cosine_similarity(query_vector, &r.vector),
                text: r.text.clone(),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        scored.truncate(k);
        scored
    }

}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn encode_row(row: &VectorRow) -> Vec<u8> {
    let mut buf = Vec::with_capacity(row_size(row.vector.len()));
    buf.extend_from_slice(&row.chunk_id.to_le_bytes());
    buf.extend_from_slice(row.doc_id.as_bytes());
    for v in &row.vector {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

fn load_rows(
    path: &Path,
    dim: usize,
    texts: &HashMap<u64, String>,
) -> Result<(Vec<VectorRow>, bool), std::io::Error> {
    let mut bytes = Vec::new();
    match std::fs::File::open(path) {
        Ok(mut f) => {
            f.read_to_end(&mut bytes)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), false)),
        Err(e) => return Err(e),
    }

    let size = row_size(dim);
    let mut rows = Vec::new();
    let mut dirty = bytes.len() % size != 0;
    if dirty {
        warn!(
            "vector file {} has a partial trailing record, truncating",
            path.display()
        );
    }
    for rec in bytes.chunks_exact(size) {
        let chunk_id = u64::from_le_bytes(rec[0..8].try_into().expect("record sliced"));
        let doc_id = Uuid::from_slice(&rec[8..24]).expect("record sliced");
        let vector: Vec<f32> = rec[24..]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        match texts.get(&chunk_id) {
            Some(text) => rows.push(VectorRow {
                chunk_id,
                doc_id,
                vector,
                text: text.clone(),
            }),
            None => dirty = true,
        }
    }
    Ok((rows, dirty))
}

fn write_all_rows(path: &Path, rows: &[VectorRow]) -> Result<(), std::io::Error> {
    let tmp = path.with_extension("bin.tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        for row in rows {
            file.write_all(&encode_row(row))?;
        }
        file.sync_data()?;
    }
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(chunk_id: u64, doc_id: Uuid, vector: Vec<f32>) -> VectorRow {
        VectorRow {
            chunk_id,
            doc_id,
            vector,
            text: format!("chunk {}", chunk_id),
        }
    }

    fn texts_for(rows: &[VectorRow]) -> HashMap<u64, String> {
        rows.iter()
            .map(|r| (r.chunk_id, r.text.clone()))
            .collect()
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_mismatched_dims() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_append_query_ranks_by_cosine() {
        let dir = TempDir::new().unwrap();
        let doc = Uuid::new_v4();
        let index = VectorIndex::open(dir.path().join("vectors.bin"), 3, &HashMap::new()).unwrap();

        index
            .append(vec![
                row(0, doc, vec![1.0, 0.0, 0.0]),
                row(1, doc, vec![0.0, 1.0, 0.0]),
                row(2, doc, vec![0.7, 0.7, 0.0]),
            ])
            .await
            .unwrap();

        let enabled: HashSet<Uuid> = [doc].into_iter().collect();
        let hits = index.query(&[1.0, 0.0, 0.0], 2, &enabled).await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, 0);
        assert_eq!(hits[1].chunk_id, 2);
    }

    #[tokio::test]
    async fn test_query_is_deterministic_and_breaks_ties_low_id() {
        let dir = TempDir::new().unwrap();
        let doc = Uuid::new_v4();
        let index = VectorIndex::open(dir.path().join("vectors.bin"), 2, &HashMap::new()).unwrap();
        index
            .append(vec![
                row(5, doc, vec![1.0, 0.0]),
                row(3, doc, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let enabled: HashSet<Uuid> = [doc].into_iter().collect();
        let first = index.query(&[1.0, 0.0], 2, &enabled).await;
        let second = index.query(&[1.0, 0.0], 2, &enabled).await;
        assert_eq!(first[0].chunk_id, 3);
        assert_eq!(
            first.iter().map(|h| h.chunk_id).collect::<Vec<_>>(),
            second.iter().map(|h| h.chunk_id).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_disabled_documents_are_skipped() {
        let dir = TempDir::new().unwrap();
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        let index = VectorIndex::open(dir.path().join("vectors.bin"), 2, &HashMap::new()).unwrap();
        index
            .append(vec![
                row(0, doc_a, vec![1.0, 0.0]),
                row(1, doc_b, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let enabled: HashSet<Uuid> = [doc_b].into_iter().collect();
        let hits = index.query(&[1.0, 0.0], 10, &enabled).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, doc_b);
    }

    #[tokio::test]
    async fn test_remove_document_compacts_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors.bin");
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        let rows = vec![
            row(0, doc_a, vec![1.0, 0.0]),
            row(1, doc_b, vec![0.0, 1.0]),
            row(2, doc_a, vec![0.5, 0.5]),
        ];
        let texts = texts_for(&rows);

        let index = VectorIndex::open(&path, 2, &HashMap::new()).unwrap();
        index.append(rows).await.unwrap();
        let removed = index.remove_document(doc_a).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(index.len().await, 1);

        // Reload from disk: only doc_b's row survives.
        let reloaded = VectorIndex::open(&path, 2, &texts).unwrap();
        let enabled: HashSet<Uuid> = [doc_a, doc_b].into_iter().collect();
        let hits = reloaded.query(&[0.0, 1.0], 10, &enabled).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, doc_b);
    }

    #[tokio::test]
    async fn test_open_truncates_partial_trailing_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors.bin");
        let doc = Uuid::new_v4();
        let rows = vec![row(0, doc, vec![1.0, 0.0])];
        let texts = texts_for(&rows);
        {
            let index = VectorIndex::open(&path, 2, &HashMap::new()).unwrap();
            index.append(rows).await.unwrap();
        }
        // Simulate a crash mid-append.
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xde, 0xad, 0xbe]).unwrap();
        drop(file);

        let reloaded = VectorIndex::open(&path, 2, &texts).unwrap();
        assert_eq!(reloaded.len().await, 1);
    }
}
