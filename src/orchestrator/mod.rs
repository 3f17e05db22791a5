//! Query Orchestrator - 수집(ingest) + 캐시된 유사도 검색
//!
//! 요청 흐름:
//! ```text
//! RECEIVED → ENSURE_INGESTED → CACHE_LOOKUP → HIT → DONE
//!                                           → MISS → VECTOR_SEARCH → RANK → CACHE_STORE → DONE
//! ```
//!
//! 같은 요청 안에서 `ensure_ingested`가 끝나고 캐시 무효화가 반영된 뒤에
//! 캐시 조회가 진행됩니다. 수집 직렬화는 컬렉션 단위이며 전역 락은 없습니다.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::access::{content_hash, ContentSource, FileRef};
use crate::cache::{normalize_query, CacheStats, ResultCache};
use crate::config::{NodeConfig, RetryPolicy};
use crate::embedding::{create_embedder, EmbedTask, EmbeddingProvider};
use crate::error::{QueryError, QueryResult};
use crate::retrieval::{
    BackendKind, ChunkId, Chunker, SearchResult, SlidingWindowChunker, VectorEntry, VectorStore,
    VectorStoreAdapter,
};

/// 로컬 질의 기본 컬렉션
pub const LOCAL_COLLECTION: &str = "local_default";

// ============================================================================
// Types
// ============================================================================

/// 순위가 매겨진 검색 구절 (답변 생성기에 전달)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPassage {
    /// 1부터 시작하는 순위
    pub rank: usize,
    pub chunk_id: ChunkId,
    pub sequence: u32,
    pub text: String,
    pub score: f32,
}

impl RankedPassage {
    fn from_results(results: Vec<SearchResult>) -> Vec<Self> {
        results
            .into_iter()
            .enumerate()
            .map(|(i, r)| RankedPassage {
                rank: i + 1,
                chunk_id: r.chunk_id,
                sequence: r.sequence,
                text: r.text,
                score: r.score,
            })
            .collect()
    }
}

/// 수집 결과 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    /// 새로 청킹/임베딩/저장됨
    Ingested,
    /// 내용 해시가 같아 건너뜀
    Unchanged,
}

/// 수집 결과
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub collection: String,
    pub status: IngestStatus,
    pub content_hash: String,
    /// 저장된 청크 수 (`Unchanged`면 0)
    pub chunks: usize,
    pub ingested_at: DateTime<Utc>,
}

/// 파일 질의 응답
#[derive(Debug, Clone, Serialize)]
pub struct FileQueryResponse {
    pub data: Vec<RankedPassage>,
    pub owner: String,
    pub file_id: u64,
    pub file_url: String,
    pub file_hash: String,
}

/// 노드 통계
#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
    pub backend_kind: BackendKind,
    pub embedder: String,
    pub collections: usize,
    pub cache_size: usize,
    pub hit_rate: f64,
    pub cache: CacheStats,
}

// ============================================================================
// QueryOrchestrator
// ============================================================================

/// 질의 오케스트레이터
pub struct QueryOrchestrator {
    store: VectorStoreAdapter,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: SlidingWindowChunker,
    cache: ResultCache<Vec<RankedPassage>>,
    retry: RetryPolicy,
    default_top_k: usize,
    /// collection → 마지막으로 수집한 내용 해시
    ingested: RwLock<HashMap<String, String>>,
    ingest_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl QueryOrchestrator {
    /// 설정으로부터 저장소 어댑터와 임베딩 프로바이더를 구성
    pub async fn from_config(config: &NodeConfig) -> QueryResult<Self> {
        config.validate()?;
        let embedder = create_embedder(&config.embedding)?;
        let store = VectorStoreAdapter::from_config(&config.store).await;
        Self::new(store, embedder, config)
    }

    pub fn new(
        store: VectorStoreAdapter,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &NodeConfig,
    ) -> QueryResult<Self> {
        if config.default_top_k == 0 {
            return Err(QueryError::InvalidConfig(
                "default top_k must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            store,
            embedder,
            chunker: SlidingWindowChunker::new(config.chunk)?,
            cache: ResultCache::new(config.cache.clone())?,
            retry: config.retry,
            default_top_k: config.default_top_k,
            ingested: RwLock::new(HashMap::new()),
            ingest_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.store.backend_kind()
    }

    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    pub fn cache(&self) -> &ResultCache<Vec<RankedPassage>> {
        &self.cache
    }

    fn ingest_lock(&self, collection: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .ingest_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(collection.to_string()).or_default())
    }

    /// 다른 작업이 쓰고 있지 않은 수집 락 제거
    fn release_ingest_lock(&self, collection: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        drop(lock);
        let mut locks = self
            .ingest_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks
            .get(collection)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(collection);
        }
    }

    /// 컬렉션이 주어진 해시의 내용으로 수집되어 있는지
    pub async fn is_ingested(&self, collection: &str, hash: &str) -> bool {
        self.ingested
            .read()
            .await
            .get(collection)
            .is_some_and(|h| h == hash)
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// 내용이 바뀌었거나 처음이면 청킹 → 임베딩 → 저장 → 캐시 무효화
    pub async fn ensure_ingested(&self, collection: &str, content: &str) -> QueryResult<IngestOutcome> {
        if collection.trim().is_empty() {
            return Err(QueryError::InvalidArgument(
                "collection name is required".to_string(),
            ));
        }
        if content.trim().is_empty() {
            return Err(QueryError::InvalidArgument("content is required".to_string()));
        }

        let hash = content_hash(content.as_bytes());
        let lock = self.ingest_lock(collection);
        let outcome = {
            let _guard = lock.lock().await;
            self.ingest_locked(collection, content, hash).await
        };
        self.release_ingest_lock(collection, lock);
        outcome
    }

    /// 컬렉션 수집 락을 잡은 상태에서 호출
    async fn ingest_locked(
        &self,
        collection: &str,
        content: &str,
        hash: String,
    ) -> QueryResult<IngestOutcome> {
        if self.is_ingested(collection, &hash).await {
            tracing::debug!("Collection '{}' unchanged, skipping ingestion", collection);
            return Ok(IngestOutcome {
                collection: collection.to_string(),
                status: IngestStatus::Unchanged,
                content_hash: hash,
                chunks: 0,
                ingested_at: Utc::now(),
            });
        }

        let chunks = self.chunker.chunk(content);
        let embeddings = self
            .embedder
            .embed_batch(&chunks, EmbedTask::Document)
            .await
            .map_err(QueryError::embedding)?;
        if embeddings.len() != chunks.len() {
            return Err(QueryError::EmbeddingUnavailable(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        let entries: Vec<VectorEntry> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (text, embedding))| VectorEntry::new(collection, i as u32, text, embedding))
            .collect();

        let replaced = self.store.delete_collection(collection).await;
        let stored = match replaced {
            Ok(_) => self.store.upsert_batch(entries).await,
            Err(e) => Err(e),
        };

        // 실패해도 저장소가 바뀌었을 수 있으므로 해시를 지우고 캐시를 무효화
        let stored = match stored {
            Ok(count) => count,
            Err(e) => {
                self.ingested.write().await.remove(collection);
                self.cache.invalidate(collection);
                return Err(e);
            }
        };

        self.ingested
            .write()
            .await
            .insert(collection.to_string(), hash.clone());
        let generation = self.cache.invalidate(collection);

        tracing::info!(
            "Ingested {} chunks into '{}' ({} backend, cache generation {})",
            stored,
            collection,
            self.store.backend_kind(),
            generation
        );

        Ok(IngestOutcome {
            collection: collection.to_string(),
            status: IngestStatus::Ingested,
            content_hash: hash,
            chunks: stored,
            ingested_at: Utc::now(),
        })
    }

    // ========================================================================
    // Answering
    // ========================================================================

    /// 캐시를 거친 top-k 검색
    pub async fn answer(
        &self,
        collection: &str,
        query: &str,
        k: usize,
    ) -> QueryResult<Arc<Vec<RankedPassage>>> {
        validate_query(query, k)?;

        let store = self.store.clone();
        let embedder = Arc::clone(&self.embedder);
        let retry = self.retry;
        let owned_collection = collection.to_string();
        // 같은 캐시 키의 호출은 같은 임베딩 입력을 씀
        let normalized = normalize_query(query);

        self.cache
            .get_or_compute(collection, query, k, move || async move {
                search_passages(store, embedder, retry, owned_collection, normalized, k).await
            })
            .await
    }

    /// `ensure_ingested` + `answer`
    pub async fn query(
        &self,
        collection: &str,
        content: &str,
        question: &str,
        k: usize,
    ) -> QueryResult<Arc<Vec<RankedPassage>>> {
        validate_query(question, k)?;
        self.ensure_ingested(collection, content).await?;
        self.answer(collection, question, k).await
    }

    /// 기본 컬렉션(`local_default`)과 기본 k를 쓰는 로컬 질의
    pub async fn query_local(
        &self,
        content: &str,
        question: &str,
        k: Option<usize>,
    ) -> QueryResult<Arc<Vec<RankedPassage>>> {
        let k = k.unwrap_or(self.default_top_k);
        self.query(LOCAL_COLLECTION, content, question, k).await
    }

    /// 파일 참조 해석 → (필요 시) 내용 가져오기 → 질의
    ///
    /// 접근/복호화 에러는 그대로 전달되며 재시도하지 않습니다.
    pub async fn query_file(
        &self,
        source: &dyn ContentSource,
        file: &FileRef,
        question: &str,
        k: usize,
    ) -> QueryResult<FileQueryResponse> {
        validate_query(question, k)?;

        let record = source.resolve(file).await?;
        let collection = record.collection();

        if !self.is_ingested(&collection, &record.file_hash).await {
            let content = source.fetch(&record).await?;
            self.ensure_ingested(&collection, &content).await?;
        }

        let data = self.answer(&collection, question, k).await?;
        tracing::info!("Processed query for {} ({})", file, record.url);

        Ok(FileQueryResponse {
            data: data.as_ref().clone(),
            owner: record.owner,
            file_id: record.file_id,
            file_url: record.url,
            file_hash: record.file_hash,
        })
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// 컬렉션의 인덱스와 캐시를 모두 초기화
    ///
    /// # Returns
    /// 저장소에서 삭제된 청크 수
    pub async fn invalidate(&self, collection: &str) -> QueryResult<usize> {
        let lock = self.ingest_lock(collection);
        let result = {
            let _guard = lock.lock().await;
            match self.store.delete_collection(collection).await {
                Ok(removed) => {
                    self.ingested.write().await.remove(collection);
                    Ok((removed, self.cache.invalidate(collection)))
                }
                Err(e) => Err(e),
            }
        };
        self.release_ingest_lock(collection, lock);

        let (removed, generation) = result?;

        tracing::info!(
            "Invalidated '{}': {} chunks removed (cache generation {})",
            collection,
            removed,
            generation
        );
        Ok(removed)
    }

    pub async fn stats(&self) -> NodeStats {
        let cache = self.cache.stats();
        NodeStats {
            backend_kind: self.store.backend_kind(),
            embedder: self.embedder.name().to_string(),
            collections: self.ingested.read().await.len(),
            cache_size: cache.entries,
            hit_rate: cache.hit_rate,
            cache,
        }
    }
}

impl std::fmt::Debug for QueryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOrchestrator")
            .field("store", &self.store)
            .field("embedder", &self.embedder.name())
            .field("chunker", &self.chunker)
            .field("default_top_k", &self.default_top_k)
            .finish()
    }
}

fn validate_query(query: &str, k: usize) -> QueryResult<()> {
    if query.trim().is_empty() {
        return Err(QueryError::InvalidArgument("query is required".to_string()));
    }
    if k == 0 {
        return Err(QueryError::InvalidArgument(
            "k must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// 캐시 미스 시 계산: 질의 임베딩 → 검색 (일시적 실패는 1회 재시도)
async fn search_passages(
    store: VectorStoreAdapter,
    embedder: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
    collection: String,
    query: String,
    k: usize,
) -> QueryResult<Vec<RankedPassage>> {
    let embedding = embedder
        .embed(&query, EmbedTask::Query)
        .await
        .map_err(QueryError::embedding)?;

    let results = match store.search(&collection, &embedding, k).await {
        Ok(results) => results,
        Err(e) if e.is_transient() => {
            tracing::warn!(
                "Search on '{}' failed ({}), retrying in {:?}",
                collection,
                e,
                retry.search_backoff
            );
            tokio::time::sleep(retry.search_backoff).await;
            store.search(&collection, &embedding, k).await?
        }
        Err(e) => return Err(e),
    };

    Ok(RankedPassage::from_results(results))
}

// ============================================================================
// Tests
// ============================================================================
