//! 노드 설정 - 환경변수(.env 포함)에서 로드

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::cache::CacheConfig;
use crate::embedding::{EmbedderKind, EmbeddingConfig};
use crate::error::{QueryError, QueryResult};
use crate::retrieval::{ChunkConfig, StoreConfig};

/// 기본 top-k
pub const DEFAULT_TOP_K: usize = 3;

const ENV_CHUNK_SIZE: &str = "QUERY_NODE_CHUNK_SIZE";
const ENV_CHUNK_OVERLAP: &str = "QUERY_NODE_CHUNK_OVERLAP";
const ENV_CACHE_MAX_ENTRIES: &str = "QUERY_NODE_CACHE_MAX_ENTRIES";
const ENV_CACHE_TTL_SECS: &str = "QUERY_NODE_CACHE_TTL_SECS";
const ENV_LANCE_URI: &str = "QUERY_NODE_LANCE_URI";
const ENV_CONNECT_TIMEOUT_MS: &str = "QUERY_NODE_CONNECT_TIMEOUT_MS";
const ENV_EMBEDDER: &str = "QUERY_NODE_EMBEDDER";
const ENV_EMBEDDING_DIM: &str = "QUERY_NODE_EMBEDDING_DIM";
const ENV_SEARCH_BACKOFF_MS: &str = "QUERY_NODE_SEARCH_BACKOFF_MS";
const ENV_TOP_K: &str = "QUERY_NODE_TOP_K";

/// 데이터 디렉토리 경로 (~/.data-query-node/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".data-query-node")
}

// ============================================================================
// RetryPolicy
// ============================================================================

/// 일시적 검색 실패 재시도 정책 (1회 재시도)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    /// 재시도 전 대기 시간
    #[serde(rename = "search_backoff_ms", with = "duration_millis")]
    pub search_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            search_backoff: Duration::from_millis(200),
        }
    }
}

/// `Duration`을 밀리초 정수로 직렬화 (`#[serde(with = ...)]`용)
pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

// ============================================================================
// NodeConfig
// ============================================================================

/// 질의 노드 전체 설정
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    pub chunk: ChunkConfig,
    pub cache: CacheConfig,
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
    pub retry: RetryPolicy,
    pub default_top_k: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = get_data_dir();
        Self {
            store: StoreConfig::with_data_dir(&data_dir),
            data_dir,
            chunk: ChunkConfig::default(),
            cache: CacheConfig::default(),
            embedding: EmbeddingConfig::default(),
            retry: RetryPolicy::default(),
            default_top_k: DEFAULT_TOP_K,
        }
    }
}

impl NodeConfig {
    /// 외부 벡터 DB 없이 동작하는 설정 (테스트/데모용)
    pub fn local() -> Self {
        Self {
            store: StoreConfig::local_only(),
            ..Self::default()
        }
    }

    /// `.env` 로드 후 프로세스 환경변수에서 설정 구성
    pub fn from_env() -> QueryResult<Self> {
        if dotenvy::dotenv().is_err() {
            tracing::debug!("No .env file found, using process environment");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 임의의 변수 조회 함수로 설정 구성
    pub fn from_lookup<F>(lookup: F) -> QueryResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var(ENV_CHUNK_SIZE) {
            config.chunk.max_characters = parse(ENV_CHUNK_SIZE, &v)?;
        }
        if let Some(v) = var(ENV_CHUNK_OVERLAP) {
            config.chunk.overlap_characters = parse(ENV_CHUNK_OVERLAP, &v)?;
        }

        if let Some(v) = var(ENV_CACHE_MAX_ENTRIES) {
            config.cache.max_entries = parse(ENV_CACHE_MAX_ENTRIES, &v)?;
        }
        if let Some(v) = var(ENV_CACHE_TTL_SECS) {
            let secs: u64 = parse(ENV_CACHE_TTL_SECS, &v)?;
            // 0이면 TTL 비활성
            config.cache.ttl = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(v) = var(ENV_LANCE_URI) {
            config.store.lance_uri = if v.trim().eq_ignore_ascii_case("none") {
                None
            } else {
                Some(v.trim().to_string())
            };
        }
        if let Some(v) = var(ENV_CONNECT_TIMEOUT_MS) {
            config.store.connect_timeout = Duration::from_millis(parse(ENV_CONNECT_TIMEOUT_MS, &v)?);
        }

        if let Some(v) = var(ENV_EMBEDDER) {
            config.embedding.provider = v.parse::<EmbedderKind>()?;
        }
        if let Some(v) = var(ENV_EMBEDDING_DIM) {
            config.embedding.dimension = parse(ENV_EMBEDDING_DIM, &v)?;
        }

        if let Some(v) = var(ENV_SEARCH_BACKOFF_MS) {
            config.retry.search_backoff = Duration::from_millis(parse(ENV_SEARCH_BACKOFF_MS, &v)?);
        }
        if let Some(v) = var(ENV_TOP_K) {
            config.default_top_k = parse(ENV_TOP_K, &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// 설정 검증
    pub fn validate(&self) -> QueryResult<()> {
        self.chunk.validate()?;
        self.cache.validate()?;
        if self.embedding.dimension == 0 {
            return Err(QueryError::InvalidConfig(
                "embedding dimension must be greater than 0".to_string(),
            ));
        }
        if self.default_top_k == 0 {
            return Err(QueryError::InvalidConfig(format!(
                "{} must be greater than 0",
                ENV_TOP_K
            )));
        }
        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> QueryResult<T> {
    value.trim().parse::<T>().map_err(|_| {
        QueryError::InvalidConfig(format!("{}: invalid value '{}'", key, value))
    })
}
