//! Vector Store - 벡터 저장소 트레이트 및 유틸리티
//!
//! 컬렉션 단위로 청크 임베딩을 저장하고 top-k 유사도 검색을 제공합니다.
//! 로컬 폴백 인덱스와 외부 벡터 DB(LanceDB)가 같은 트레이트를 구현합니다.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::QueryResult;

// ============================================================================
// Types
// ============================================================================

/// 청크 식별자 (불투명 토큰)
///
/// 컬렉션, 순번, 텍스트로부터 결정적으로 생성되므로
/// 같은 청크를 다시 upsert하면 중복 대신 교체됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(String);

impl ChunkId {
    pub fn derive(collection: &str, sequence: u32, text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(collection.as_bytes());
        hasher.update([0u8]);
        hasher.update(sequence.to_le_bytes());
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ChunkId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ChunkId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 벡터 엔트리 (저장용)
#[derive(Debug, Clone)]
pub struct VectorEntry {
    /// 소속 컬렉션
    pub collection: String,
    /// 청크 ID
    pub chunk_id: ChunkId,
    /// 청크 순번 (0-based)
    pub sequence: u32,
    /// 청크 텍스트
    pub text: String,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
}

impl VectorEntry {
    /// 순번/텍스트로부터 ID를 파생하여 생성
    pub fn new(collection: &str, sequence: u32, text: String, embedding: Vec<f32>) -> Self {
        Self {
            collection: collection.to_string(),
            chunk_id: ChunkId::derive(collection, sequence, &text),
            sequence,
            text,
            embedding,
        }
    }
}

/// 검색 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// 청크 ID
    pub chunk_id: ChunkId,
    /// 청크 순번
    pub sequence: u32,
    /// 청크 텍스트
    pub text: String,
    /// 유사도 스코어 (높을수록 유사)
    pub score: f32,
}

/// 백엔드 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// 외부 벡터 DB
    External,
    /// 프로세스 내 폴백 인덱스
    Local,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::External => f.write_str("external"),
            BackendKind::Local => f.write_str("local"),
        }
    }
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 벡터 저장소의 공통 인터페이스입니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 단일 청크 삽입 또는 교체
    async fn upsert(&self, entry: VectorEntry) -> QueryResult<()>;

    /// 배치 upsert (기본 구현: 순차 호출)
    async fn upsert_batch(&self, entries: Vec<VectorEntry>) -> QueryResult<usize> {
        let count = entries.len();
        for entry in entries {
            self.upsert(entry).await?;
        }
        Ok(count)
    }

    /// 컬렉션의 모든 청크 삭제, 삭제된 개수 반환
    async fn delete_collection(&self, collection: &str) -> QueryResult<usize>;

    /// 컬렉션 내 top-k 유사도 검색 (내림차순)
    ///
    /// 빈 컬렉션은 빈 목록, `k == 0`은 `InvalidArgument`
    async fn search(
        &self,
        collection: &str,
        query_embedding: &[f32],
        k: usize,
    ) -> QueryResult<Vec<SearchResult>>;

    /// 컬렉션 청크 개수
    async fn count(&self, collection: &str) -> QueryResult<usize>;

    /// 백엔드 종류
    fn kind(&self) -> BackendKind;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 영벡터면 0.0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) - -1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_mismatch() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_chunk_id_deterministic() {
        let a = ChunkId::derive("resume", 0, "Go, Rust");
        let b = ChunkId::derive("resume", 0, "Go, Rust");
        let c = ChunkId::derive("resume", 1, "Go, Rust");
        let d = ChunkId::derive("other", 0, "Go, Rust");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.as_str().len(), 24);
        assert!(a
            .as_str()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_backend_kind_display() {
        assert_eq!(BackendKind::External.to_string(), "external");
        assert_eq!(BackendKind::Local.to_string(), "local");
        assert_eq!(serde_json::to_string(&BackendKind::Local).unwrap(), "\"local\"");
    }
}
