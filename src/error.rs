//! 에러 타입 - 질의 노드 공통 에러 분류
//!
//! 호출자에게 노출되는 에러는 모두 `QueryError`로 수렴합니다.
//! 외부 협력자(HTTP 임베딩, LanceDB) 내부는 `anyhow`를 쓰고
//! 트레이트 경계에서 이 분류로 변환합니다.

use serde::Serialize;
use thiserror::Error;

pub type QueryResult<T> = Result<T, QueryError>;

/// 질의 노드 에러
///
/// 하나의 계산 결과를 여러 대기자가 공유하므로 `Clone`이어야 합니다.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// 잘못된 청킹/캐시 설정 (재시도 없음)
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// 잘못된 질의 파라미터
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// 임베딩 생성 실패
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// 벡터 저장소 검색 실패 (일시적)
    #[error("Search unavailable: {0}")]
    SearchUnavailable(String),

    /// 파일 접근 권한 없음 (협력자 발생, 그대로 전달)
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// 복호화 실패 (협력자 발생, 그대로 전달)
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// 계산 태스크 패닉 등 내부 오류
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryError {
    /// 에러 종류 태그 (snake_case, 안정적)
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::InvalidConfig(_) => "invalid_config",
            QueryError::InvalidArgument(_) => "invalid_argument",
            QueryError::EmbeddingUnavailable(_) => "embedding_unavailable",
            QueryError::SearchUnavailable(_) => "search_unavailable",
            QueryError::AccessDenied(_) => "access_denied",
            QueryError::DecryptionFailed(_) => "decryption_failed",
            QueryError::Internal(_) => "internal_error",
        }
    }

    /// 재시도할 가치가 있는 에러인지
    pub fn is_transient(&self) -> bool {
        matches!(self, QueryError::SearchUnavailable(_))
    }

    /// 임베딩 협력자 에러 변환
    pub fn embedding(err: anyhow::Error) -> Self {
        QueryError::EmbeddingUnavailable(format!("{:#}", err))
    }

    /// 벡터 저장소 I/O·연결 에러 변환
    ///
    /// 차원 불일치 같은 영구적 에러에는 쓰지 않습니다 (`InvalidArgument`).
    pub fn search(err: anyhow::Error) -> Self {
        QueryError::SearchUnavailable(format!("{:#}", err))
    }

    /// 사용자 노출용 구조화 에러
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// 구조화된 에러 응답 본문
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}
