//! data-query-node - 캐시된 벡터 검색 질의 노드
//!
//! 텍스트를 청킹/임베딩하여 벡터 저장소(LanceDB, 실패 시 로컬 인덱스)에 넣고,
//! 컬렉션 단위로 무효화되는 single-flight 결과 캐시를 거쳐 top-k 구절을 반환합니다.

pub mod access;
pub mod cache;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod orchestrator;
pub mod retrieval;

// Re-exports
pub use access::{collection_for_file, ContentSource, FileRecord, FileRef, LocalFileSource};
pub use cache::{normalize_query, CacheConfig, CacheStats, ResultCache};
pub use config::{get_data_dir, NodeConfig, RetryPolicy};
pub use embedding::{
    create_embedder, get_api_key, has_api_key, EmbedTask, EmbeddingConfig, EmbeddingProvider,
    GeminiEmbedding, HashingEmbedding,
};
pub use error::{ErrorBody, QueryError, QueryResult};
pub use orchestrator::{
    FileQueryResponse, IngestOutcome, IngestStatus, NodeStats, QueryOrchestrator, RankedPassage,
};
pub use retrieval::{
    chunk_text, BackendKind, ChunkConfig, LocalVectorIndex, SearchResult, StoreConfig,
    VectorEntry, VectorStore, VectorStoreAdapter,
};
