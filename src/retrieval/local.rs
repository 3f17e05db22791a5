//! Local Vector Index - 프로세스 내 폴백 벡터 인덱스
//!
//! 외부 벡터 DB를 사용할 수 없을 때 쓰는 brute-force 코사인 검색 인덱스입니다.
//! 검색 비용은 컬렉션 크기에 선형(O(n·d))이며, 이것이 성능 상한입니다.
//! 컬렉션 당 코퍼스가 제한적이라는 전제에서 ANN 구조 없이도 정확합니다.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{QueryError, QueryResult};

use super::vector::{
    cosine_similarity, BackendKind, ChunkId, SearchResult, VectorEntry, VectorStore,
};

/// 저장된 청크
#[derive(Debug, Clone)]
struct StoredChunk {
    chunk_id: ChunkId,
    sequence: u32,
    text: String,
    embedding: Vec<f32>,
}

/// 컬렉션 하나의 청크 집합
///
/// `chunks`는 삽입 순서를 유지하며 동점 시 앞선 청크가 이깁니다.
#[derive(Debug, Default)]
struct CollectionIndex {
    dimension: Option<usize>,
    chunks: Vec<StoredChunk>,
    positions: HashMap<ChunkId, usize>,
}

#[derive(Debug, Default)]
struct IndexState {
    collections: HashMap<String, CollectionIndex>,
    generations: HashMap<String, u64>,
}

// ============================================================================
// LocalVectorIndex
// ============================================================================

/// 인메모리 벡터 인덱스
pub struct LocalVectorIndex {
    state: RwLock<IndexState>,
}

impl LocalVectorIndex {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(IndexState::default()),
        }
    }

    /// 컬렉션 세대 카운터 (삭제 시 증가)
    pub async fn generation(&self, collection: &str) -> u64 {
        let state = self.state.read().await;
        state.generations.get(collection).copied().unwrap_or(0)
    }
}

impl Default for LocalVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for LocalVectorIndex {
    async fn upsert(&self, entry: VectorEntry) -> QueryResult<()> {
        if entry.embedding.is_empty() {
            return Err(QueryError::InvalidArgument(
                "embedding must not be empty".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        let index = state
            .collections
            .entry(entry.collection.clone())
            .or_default();

        // 컬렉션 내 모든 청크는 같은 차원
        match index.dimension {
            Some(dim) if dim != entry.embedding.len() => {
                return Err(QueryError::InvalidArgument(format!(
                    "embedding dimension {} does not match collection '{}' dimension {}",
                    entry.embedding.len(),
                    entry.collection,
                    dim
                )));
            }
            Some(_) => {}
            None => index.dimension = Some(entry.embedding.len()),
        }

        let stored = StoredChunk {
            chunk_id: entry.chunk_id.clone(),
            sequence: entry.sequence,
            text: entry.text,
            embedding: entry.embedding,
        };

        // 교체 시 원래 삽입 위치 유지
        if let Some(&pos) = index.positions.get(&entry.chunk_id) {
            index.chunks[pos] = stored;
        } else {
            index.positions.insert(entry.chunk_id, index.chunks.len());
            index.chunks.push(stored);
        }

        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> QueryResult<usize> {
        let mut state = self.state.write().await;
        let removed = state
            .collections
            .remove(collection)
            .map(|index| index.chunks.len())
            .unwrap_or(0);

        *state
            .generations
            .entry(collection.to_string())
            .or_insert(0) += 1;

        tracing::debug!(
            "Local index: deleted collection '{}' ({} chunks)",
            collection,
            removed
        );
        Ok(removed)
    }

    async fn search(
        &self,
        collection: &str,
        query_embedding: &[f32],
        k: usize,
    ) -> QueryResult<Vec<SearchResult>> {
        if k == 0 {
            return Err(QueryError::InvalidArgument(
                "k must be greater than 0".to_string(),
            ));
        }

        let state = self.state.read().await;
        let index = match state.collections.get(collection) {
            Some(index) if !index.chunks.is_empty() => index,
            _ => return Ok(vec![]),
        };

        if index.dimension != Some(query_embedding.len()) {
            return Err(QueryError::InvalidArgument(format!(
                "query dimension {} does not match collection '{}' dimension {:?}",
                query_embedding.len(),
                collection,
                index.dimension
            )));
        }

        let mut scored: Vec<(usize, f32)> = index
            .chunks
            .iter()
            .enumerate()
            .map(|(pos, chunk)| (pos, cosine_similarity(query_embedding, &chunk.embedding)))
            .collect();

        // 안정 정렬: 동점이면 삽입 순서 유지
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(pos, score)| {
                let chunk = &index.chunks[pos];
                SearchResult {
                    chunk_id: chunk.chunk_id.clone(),
                    sequence: chunk.sequence,
                    text: chunk.text.clone(),
                    score,
                }
            })
            .collect())
    }

    async fn count(&self, collection: &str) -> QueryResult<usize> {
        let state = self.state.read().await;
        Ok(state
            .collections
            .get(collection)
            .map(|index| index.chunks.len())
            .unwrap_or(0))
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(collection: &str, sequence: u32, text: &str, embedding: Vec<f32>) -> VectorEntry {
        VectorEntry::new(collection, sequence, text.to_string(), embedding)
    }

    #[tokio::test]
    async fn test_search_empty_collection() {
        let index = LocalVectorIndex::new();
        let results = index.search("missing", &[1.0, 0.0], 3).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_search_rejects_zero_k() {
        let index = LocalVectorIndex::new();
        let result = index.search("any", &[1.0], 0).await;
        assert!(matches!(result, Err(QueryError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let index = LocalVectorIndex::new();
        index.upsert(entry("c", 0, "x-axis", vec![1.0, 0.0])).await.unwrap();
        index.upsert(entry("c", 1, "y-axis", vec![0.0, 1.0])).await.unwrap();
        index.upsert(entry("c", 2, "diagonal", vec![1.0, 1.0])).await.unwrap();

        let results = index.search("c", &[0.9, 0.1], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text, "x-axis");
        assert_eq!(results[1].text, "diagonal");
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_ties_broken_by_insertion_order() {
        let index = LocalVectorIndex::new();
        index.upsert(entry("c", 0, "first", vec![1.0, 0.0])).await.unwrap();
        index.upsert(entry("c", 1, "second", vec![2.0, 0.0])).await.unwrap();
        index.upsert(entry("c", 2, "third", vec![3.0, 0.0])).await.unwrap();

        let results = index.search("c", &[1.0, 0.0], 3).await.unwrap();
        let texts: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_in_place() {
        let index = LocalVectorIndex::new();
        let mut e = entry("c", 0, "v1", vec![1.0, 0.0]);
        index.upsert(e.clone()).await.unwrap();
        index.upsert(entry("c", 1, "other", vec![1.0, 0.0])).await.unwrap();

        e.text = "v2".to_string();
        index.upsert(e).await.unwrap();

        assert_eq!(index.count("c").await.unwrap(), 2);
        let results = index.search("c", &[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results[0].text, "v2");
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let index = LocalVectorIndex::new();
        index.upsert(entry("c", 0, "a", vec![1.0, 0.0])).await.unwrap();

        let bad = index.upsert(entry("c", 1, "b", vec![1.0, 0.0, 0.0])).await;
        assert!(matches!(bad, Err(QueryError::InvalidArgument(_))));

        let bad_query = index.search("c", &[1.0], 1).await;
        assert!(matches!(bad_query, Err(QueryError::InvalidArgument(_))));

        // 다른 컬렉션은 독립적인 차원
        index.upsert(entry("d", 0, "a", vec![1.0, 0.0, 0.0])).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_collection_bumps_generation() {
        let index = LocalVectorIndex::new();
        index.upsert(entry("c", 0, "a", vec![1.0])).await.unwrap();
        index.upsert(entry("c", 1, "b", vec![1.0])).await.unwrap();
        index.upsert(entry("keep", 0, "k", vec![1.0])).await.unwrap();
        assert_eq!(index.generation("c").await, 0);

        let removed = index.delete_collection("c").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(index.generation("c").await, 1);
        assert_eq!(index.count("c").await.unwrap(), 0);
        assert_eq!(index.count("keep").await.unwrap(), 1);

        // 없는 컬렉션 삭제도 세대 증가
        assert_eq!(index.delete_collection("c").await.unwrap(), 0);
        assert_eq!(index.generation("c").await, 2);
    }
}
