//! 임베딩 모듈 - 텍스트 벡터화 협력자
//!
//! 질의 노드는 임베딩을 직접 계산하지 않고 `EmbeddingProvider`에 위임합니다.
//!
//! - `GeminiEmbedding`: Gemini HTTP API (rate limit + 429 백오프)
//! - `HashingEmbedding`: 오프라인용 결정적 feature-hashing 임베딩
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder(&EmbeddingConfig::default())?;
//! let vector = embedder.embed("Hello, world!", EmbedTask::Query).await?;
//! ```

mod gemini;
mod hashing;

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::error::{QueryError, QueryResult};

pub use gemini::{get_api_key, has_api_key, GeminiEmbedding};
pub use hashing::HashingEmbedding;

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 768;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 용도 (검색 품질을 위해 문서/질의를 구분하는 프로바이더가 있음)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedTask {
    /// 저장할 청크
    Document,
    /// 검색 질의
    Query,
}

/// 임베딩 프로바이더 트레이트
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str, task: EmbedTask) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String], task: EmbedTask) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text, task).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Configuration
// ============================================================================

/// 임베딩 프로바이더 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    Hashing,
    Gemini,
}

impl FromStr for EmbedderKind {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hashing" | "hash" | "local" => Ok(EmbedderKind::Hashing),
            "gemini" => Ok(EmbedderKind::Gemini),
            other => Err(QueryError::InvalidConfig(format!(
                "unknown embedder '{}' (expected 'hashing' or 'gemini')",
                other
            ))),
        }
    }
}

/// 임베딩 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbeddingConfig {
    pub provider: EmbedderKind,
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbedderKind::Hashing,
            dimension: DEFAULT_DIMENSION,
        }
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 맞는 임베딩 프로바이더 생성
pub fn create_embedder(config: &EmbeddingConfig) -> QueryResult<Arc<dyn EmbeddingProvider>> {
    let embedder: Arc<dyn EmbeddingProvider> = match config.provider {
        EmbedderKind::Hashing => Arc::new(HashingEmbedding::new(config.dimension)?),
        EmbedderKind::Gemini => {
            if !has_api_key() {
                return Err(QueryError::InvalidConfig(
                    "GEMINI_API_KEY or GOOGLE_AI_API_KEY not set".to_string(),
                ));
            }
            let embedder = GeminiEmbedding::from_env_with_dimension(config.dimension)
                .map_err(|e| QueryError::InvalidConfig(format!("{:#}", e)))?;
            Arc::new(embedder)
        }
    };

    tracing::info!(
        "Using {} embedding (dimension: {})",
        embedder.name(),
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedder_kind_parse() {
        assert_eq!("gemini".parse::<EmbedderKind>().unwrap(), EmbedderKind::Gemini);
        assert_eq!(" Hashing ".parse::<EmbedderKind>().unwrap(), EmbedderKind::Hashing);
        assert!(matches!(
            "openai".parse::<EmbedderKind>(),
            Err(QueryError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_create_default_embedder() {
        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.dimension(), DEFAULT_DIMENSION);
        let batch = embedder
            .embed_batch(&["a b".to_string(), "c".to_string()], EmbedTask::Document)
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
    }
}
