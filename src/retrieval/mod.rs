//! Retrieval 모듈 - 청킹 + 벡터 저장소
//!
//! - Chunker: 겹치는 슬라이딩 윈도우 텍스트 분할
//! - Local: 프로세스 내 brute-force 폴백 인덱스
//! - Lance: 외부 벡터 DB (LanceDB)
//! - Adapter: 시작 시 한 번 백엔드를 선택하는 통합 인터페이스

mod adapter;
mod chunker;
mod lance;
mod local;
mod vector;

// Re-exports
pub use adapter::{StoreConfig, VectorStoreAdapter};
pub use chunker::{chunk_text, reassemble, ChunkConfig, Chunker, SlidingWindowChunker};
pub use lance::LanceVectorStore;
pub use local::LocalVectorIndex;
pub use vector::{
    cosine_similarity, BackendKind, ChunkId, SearchResult, VectorEntry, VectorStore,
};
