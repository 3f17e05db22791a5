//! Text Chunking Module
//!
//! 임베딩/검색용 슬라이딩 윈도우 텍스트 분할을 제공합니다.
//! 윈도우는 문자(char) 단위로 겹치며 입력 전체를 빈틈없이 덮습니다.
//! 각 청크의 앞 `overlap` 문자를 제거하고 이어 붙이면 원문이 그대로 복원됩니다.

use serde::Serialize;

use crate::error::{QueryError, QueryResult};

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkConfig {
    /// 최대 청크 크기 (문자 수)
    pub max_characters: usize,
    /// 오버랩 크기 (문자 수)
    pub overlap_characters: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_characters: 512,
            overlap_characters: 64,
        }
    }
}

impl ChunkConfig {
    /// `max > 0`, `0 <= overlap < max` 검증
    pub fn validate(&self) -> QueryResult<()> {
        if self.max_characters == 0 {
            return Err(QueryError::InvalidConfig(
                "chunk max_size must be greater than 0".to_string(),
            ));
        }
        if self.overlap_characters >= self.max_characters {
            return Err(QueryError::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than max_size ({})",
                self.overlap_characters, self.max_characters
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;
}

// ============================================================================
// SlidingWindowChunker
// ============================================================================

/// 고정 크기 슬라이딩 윈도우 청커
///
/// 생성 시점에 설정을 검증하므로 `chunk`는 실패하지 않습니다.
#[derive(Debug, Clone)]
pub struct SlidingWindowChunker {
    config: ChunkConfig,
}

impl SlidingWindowChunker {
    /// 설정으로 생성 (잘못된 설정은 `InvalidConfig`)
    pub fn new(config: ChunkConfig) -> QueryResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }
}

impl Chunker for SlidingWindowChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        windows(
            text,
            self.config.max_characters,
            self.config.overlap_characters,
        )
    }
}

// ============================================================================
// Functions
// ============================================================================

/// 텍스트를 겹치는 윈도우로 분할
///
/// # Arguments
/// * `text` - 분할할 텍스트
/// * `max_size` - 청크 당 최대 문자 수 (> 0)
/// * `overlap` - 인접 청크 간 중첩 문자 수 (< max_size)
///
/// # Returns
/// 청크 목록. 빈 입력은 빈 목록 (에러 아님)
pub fn chunk_text(text: &str, max_size: usize, overlap: usize) -> QueryResult<Vec<String>> {
    ChunkConfig {
        max_characters: max_size,
        overlap_characters: overlap,
    }
    .validate()?;

    Ok(windows(text, max_size, overlap))
}

/// 청크 목록에서 원문 복원 (첫 청크 이후 각 청크의 앞 `overlap` 문자 제거)
pub fn reassemble(chunks: &[String], overlap: usize) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            out.push_str(chunk);
        } else {
            out.extend(chunk.chars().skip(overlap));
        }
    }
    out
}

/// 검증된 파라미터로 윈도우 생성
fn windows(text: &str, max_size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![];
    }

    // 문자 경계 바이트 오프셋 (마지막에 text.len() 추가)
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let char_count = bounds.len();
    bounds.push(text.len());

    let step = max_size - overlap;
    let mut chunks = Vec::with_capacity(char_count / step + 1);
    let mut start = 0;

    loop {
        let end = (start + max_size).min(char_count);
        chunks.push(text[bounds[start]..bounds[end]].to_string());

        if end >= char_count {
            break;
        }
        start += step;
    }

    chunks
}

// ============================================================================
// Tests
// ============================================================================
