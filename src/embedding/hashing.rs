//! Feature-hashing 임베딩 (오프라인/테스트용)
//!
//! 소문자 토큰을 SHA-256으로 해시해 버킷에 ±1을 누적하고 L2 정규화합니다.
//! 의미 유사도는 없지만 단어가 겹칠수록 코사인 유사도가 높아지며 결정적입니다.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{QueryError, QueryResult};

use super::{EmbedTask, EmbeddingProvider};

/// 결정적 bag-of-words 해싱 임베딩
#[derive(Debug, Clone)]
pub struct HashingEmbedding {
    dimension: usize,
}

impl HashingEmbedding {
    pub fn new(dimension: usize) -> QueryResult<Self> {
        if dimension == 0 {
            return Err(QueryError::InvalidConfig(
                "embedding dimension must be greater than 0".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    /// 동기 임베딩 계산
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            // 부호 비트로 해시 충돌 편향 완화
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

/// 영숫자 토큰 추출 (소문자)
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedding {
    async fn embed(&self, text: &str, _task: EmbedTask) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "feature-hashing"
    }
}
