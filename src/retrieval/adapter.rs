//! Vector Store Adapter - 백엔드 선택기
//!
//! 생성 시점에 한 번만 외부 벡터 DB 연결을 시도하고,
//! 타임아웃이나 연결 실패 시 로컬 인덱스로 폴백하여 수명 동안 유지합니다.
//! 호출 단위 재시도-후-폴백은 하지 않으므로 컬렉션은 항상 같은 백엔드에 머뭅니다.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::QueryResult;

use super::lance::LanceVectorStore;
use super::local::LocalVectorIndex;
use super::vector::{BackendKind, SearchResult, VectorEntry, VectorStore};

// ============================================================================
// Store Configuration
// ============================================================================

/// 벡터 저장소 설정
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreConfig {
    /// 외부 LanceDB URI (`None`이면 외부 백엔드 비활성)
    pub lance_uri: Option<String>,
    /// 외부 백엔드 연결 타임아웃
    #[serde(rename = "connect_timeout_ms", with = "crate::config::duration_millis")]
    pub connect_timeout: Duration,
}

impl StoreConfig {
    /// 데이터 디렉토리 아래 기본 LanceDB 경로 사용
    pub fn with_data_dir(data_dir: &std::path::Path) -> Self {
        let path: PathBuf = data_dir.join("vectors.lance");
        Self {
            lance_uri: Some(path.to_string_lossy().into_owned()),
            ..Self::local_only()
        }
    }

    /// 외부 백엔드 없이 로컬 인덱스만 사용
    pub fn local_only() -> Self {
        Self {
            lance_uri: None,
            connect_timeout: Duration::from_millis(3000),
        }
    }
}

// ============================================================================
// VectorStoreAdapter
// ============================================================================

/// 외부/로컬 백엔드를 하나의 인터페이스로 통합
///
/// 선택 상태는 생성 후 읽기 전용입니다.
#[derive(Clone)]
pub struct VectorStoreAdapter {
    backend: Arc<dyn VectorStore>,
    kind: BackendKind,
}

impl VectorStoreAdapter {
    /// 설정에 따라 LanceDB 연결을 시도하고 실패 시 로컬 폴백
    pub async fn from_config(config: &StoreConfig) -> Self {
        match &config.lance_uri {
            Some(uri) => {
                let uri = uri.clone();
                Self::select(
                    async move {
                        let store = LanceVectorStore::connect(&uri).await?;
                        tracing::info!("Connected to LanceDB at {}", store.uri());
                        Ok(Box::new(store) as Box<dyn VectorStore>)
                    },
                    config.connect_timeout,
                )
                .await
            }
            None => {
                tracing::info!("External vector store disabled, using local index");
                Self::local()
            }
        }
    }

    /// 외부 백엔드 연결 future를 타임아웃 안에서 한 번 시도
    ///
    /// 실패는 에러가 아니라 degradation 이벤트로 로깅됩니다.
    pub async fn select<F>(external: F, timeout: Duration) -> Self
    where
        F: Future<Output = anyhow::Result<Box<dyn VectorStore>>>,
    {
        match tokio::time::timeout(timeout, external).await {
            Ok(Ok(store)) => Self {
                backend: Arc::from(store),
                kind: BackendKind::External,
            },
            Ok(Err(e)) => {
                tracing::warn!(
                    backend = "local",
                    "External vector store unavailable, degrading to local index: {:#}",
                    e
                );
                Self::local()
            }
            Err(_) => {
                tracing::warn!(
                    backend = "local",
                    "External vector store connection timed out after {:?}, degrading to local index",
                    timeout
                );
                Self::local()
            }
        }
    }

    /// 로컬 인덱스 어댑터
    pub fn local() -> Self {
        Self {
            backend: Arc::new(LocalVectorIndex::new()),
            kind: BackendKind::Local,
        }
    }

    /// 선택된 백엔드 종류 (관측용)
    pub fn backend_kind(&self) -> BackendKind {
        self.kind
    }
}

impl std::fmt::Debug for VectorStoreAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStoreAdapter")
            .field("kind", &self.kind)
            .finish()
    }
}

#[async_trait]
impl VectorStore for VectorStoreAdapter {
    async fn upsert(&self, entry: VectorEntry) -> QueryResult<()> {
        self.backend.upsert(entry).await
    }

    async fn upsert_batch(&self, entries: Vec<VectorEntry>) -> QueryResult<usize> {
        self.backend.upsert_batch(entries).await
    }

    async fn delete_collection(&self, collection: &str) -> QueryResult<usize> {
        self.backend.delete_collection(collection).await
    }

    async fn search(
        &self,
        collection: &str,
        query_embedding: &[f32],
        k: usize,
    ) -> QueryResult<Vec<SearchResult>> {
        self.backend.search(collection, query_embedding, k).await
    }

    async fn count(&self, collection: &str) -> QueryResult<usize> {
        self.backend.count(collection).await
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }
}

// ============================================================================
// Tests
// ============================================================================
