//! 질의 노드 통합 시나리오

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use data_query_node::{
    chunk_text, retrieval::reassemble, BackendKind, CacheConfig, ChunkConfig, EmbeddingProvider,
    FileRef, HashingEmbedding, LocalFileSource, LocalVectorIndex, NodeConfig, QueryOrchestrator,
    ResultCache, StoreConfig, VectorEntry, VectorStore, VectorStoreAdapter,
};
use tempfile::TempDir;

fn small_chunks() -> NodeConfig {
    let mut config = NodeConfig::local();
    config.chunk = ChunkConfig {
        max_characters: 16,
        overlap_characters: 4,
    };
    config
}

fn embedder() -> Arc<dyn EmbeddingProvider> {
    Arc::new(HashingEmbedding::new(64).unwrap())
}

fn local_node() -> QueryOrchestrator {
    QueryOrchestrator::new(VectorStoreAdapter::local(), embedder(), &small_chunks()).unwrap()
}

#[tokio::test]
async fn resume_reingest_drops_stale_results() {
    let node = local_node();

    let first = node
        .query("resume", "Go, Rust, distributed systems", "What languages?", 2)
        .await
        .unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(node.cache().generation("resume"), 1);

    let second = node
        .query("resume", "Python, Django and Tailwind CSS", "What languages?", 2)
        .await
        .unwrap();
    assert_eq!(second.len(), 2);
    assert_eq!(node.cache().generation("resume"), 2);

    let old_ids: HashSet<_> = first.iter().map(|p| p.chunk_id.clone()).collect();
    assert!(second.iter().all(|p| !old_ids.contains(&p.chunk_id)));
    assert_ne!(first, second);
}

#[tokio::test]
async fn forced_external_failure_falls_back_to_local() {
    let adapter = VectorStoreAdapter::select(
        async { Err(anyhow::anyhow!("milvus: connection refused")) },
        Duration::from_millis(100),
    )
    .await;
    assert_eq!(adapter.backend_kind(), BackendKind::Local);

    adapter
        .upsert(VectorEntry::new("c", 0, "rust".to_string(), vec![1.0, 0.0, 0.0]))
        .await
        .unwrap();
    adapter
        .upsert(VectorEntry::new("c", 1, "go".to_string(), vec![0.0, 1.0, 0.0]))
        .await
        .unwrap();

    let results = adapter.search("c", &[0.9, 0.1, 0.0], 2).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].text, "rust");

    let node = QueryOrchestrator::new(adapter, embedder(), &small_chunks()).unwrap();
    assert_eq!(node.stats().await.backend_kind, BackendKind::Local);
}

#[tokio::test]
async fn equivalent_queries_share_cache_entry() {
    let node = local_node();
    let content = "Go, Rust, distributed systems";

    node.query("resume", content, "What languages?", 2).await.unwrap();
    node.query("resume", content, "  WHAT   languages?\n", 2)
        .await
        .unwrap();

    let stats = node.stats().await;
    assert_eq!(stats.cache.misses, 1);
    assert_eq!(stats.cache.hits, 1);
    assert!((stats.hit_rate - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn empty_collection_search_is_not_an_error() {
    let index = LocalVectorIndex::new();
    assert!(index.search("nothing", &[1.0, 0.0], 5).await.unwrap().is_empty());

    let node = local_node();
    assert!(node.answer("never-ingested", "anything", 3).await.unwrap().is_empty());
}

#[test]
fn chunks_reassemble_to_original() {
    let texts = [
        "",
        "a",
        "Go, Rust, distributed systems",
        "한국어와 English가 섞인 문장입니다. 🦀 crab!",
    ];
    for text in texts {
        for max in 1..12 {
            for overlap in 0..max {
                let chunks = chunk_text(text, max, overlap).unwrap();
                assert_eq!(reassemble(&chunks, overlap), text);
                assert!(chunks.iter().all(|c| c.chars().count() <= max));
            }
        }
    }
    assert!(chunk_text("abc", 4, 4).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_requests_compute_once() {
    let cache: ResultCache<Vec<u32>> = ResultCache::new(CacheConfig {
        max_entries: 8,
        ttl: None,
    })
    .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .get_or_compute("resume", "What languages?", 2, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(vec![1, 2])
                    })
                    .await
            })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        assert_eq!(*result.unwrap().unwrap(), vec![1, 2]);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn file_query_end_to_end() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("profile.txt"),
        "Abi builds AI agents with Python, Django and React.",
    )
    .unwrap();
    let source = LocalFileSource::new(dir.path(), "0xabi").unwrap();
    let node = local_node();

    let response = node
        .query_file(&source, &FileRef::Url("profile.txt".to_string()), "Python", 2)
        .await
        .unwrap();
    assert_eq!(response.owner, "0xabi");
    assert_eq!(response.file_id, 1);
    assert_eq!(response.data.len(), 2);
    assert!(response.data[0].text.contains("Python"));

    let by_id = node
        .query_file(&source, &FileRef::Id(1), "Python", 2)
        .await
        .unwrap();
    assert_eq!(by_id.data, response.data);
    assert_eq!(by_id.file_hash, response.file_hash);

    let denied = node
        .query_file(&source, &FileRef::Id(99), "Python", 2)
        .await
        .unwrap_err();
    assert_eq!(denied.kind(), "access_denied");
}

#[tokio::test]
async fn lance_backend_end_to_end() {
    let dir = TempDir::new().unwrap();
    let mut config = small_chunks();
    config.store = StoreConfig::with_data_dir(dir.path());

    let adapter = VectorStoreAdapter::from_config(&config.store).await;
    assert_eq!(adapter.backend_kind(), BackendKind::External);

    let node = QueryOrchestrator::new(adapter, embedder(), &config).unwrap();
    let first = node
        .query("resume", "Go, Rust, distributed systems", "Rust", 2)
        .await
        .unwrap();
    assert_eq!(first.len(), 2);
    assert!(first[0].text.contains("Rust"));

    let removed = node.invalidate("resume").await.unwrap();
    assert_eq!(removed, 3);
    assert!(node.answer("resume", "Rust", 2).await.unwrap().is_empty());
}
