//! Result Cache - 질의 결과 캐시
//!
//! `(collection, normalized_query, k)` → 결과를 메모이즈합니다.
//!
//! - 무효화: 컬렉션 세대 카운터를 증가시키고, 다음 조회 때 저장된 세대와 비교 (lazy)
//! - 축출: 최대 엔트리 수 기준 LRU, 선택적 TTL
//! - single-flight: 같은 키의 동시 호출은 하나의 계산을 공유
//!
//! 계산은 별도 태스크로 실행되므로, 호출자가 대기를 포기해도(타임아웃/drop)
//! 계산은 끝까지 진행되어 남은 대기자와 이후 호출자를 위해 캐시를 채웁니다.
//! 내부 락은 O(1)/O(log n) 장부 작업 동안만 잡히며 계산 중에는 잡히지 않습니다.
//!
//! ## 질의 정규화
//! 캐시 키용 질의는 앞뒤 공백 제거, 내부 연속 공백을 한 칸으로 축약,
//! 소문자 변환(`str::to_lowercase`) 순으로 정규화합니다.
//! 예: `"  What   LANGUAGES? "` → `"what languages?"`
//!
//! 소문자 변환일 뿐 유니코드 case folding은 아닙니다.
//! `"STRASSE"`와 `"Straße"`는 서로 다른 키가 됩니다.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::time::Instant;

use crate::error::{QueryError, QueryResult};

// ============================================================================
// Configuration
// ============================================================================

/// 캐시 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheConfig {
    /// 최대 엔트리 수 (> 0)
    pub max_entries: usize,
    /// 엔트리 수명 (`None`이면 만료 없음)
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            ttl: Some(Duration::from_secs(600)),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> QueryResult<()> {
        if self.max_entries == 0 {
            return Err(QueryError::InvalidConfig(
                "cache max_entries must be greater than 0".to_string(),
            ));
        }
        if self.ttl == Some(Duration::ZERO) {
            return Err(QueryError::InvalidConfig(
                "cache ttl must be positive (use None to disable)".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Keys
// ============================================================================

/// 캐시 키
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub collection: String,
    pub query: String,
    pub k: usize,
}

impl CacheKey {
    pub fn new(collection: &str, query: &str, k: usize) -> Self {
        Self {
            collection: collection.to_string(),
            query: normalize_query(query),
            k,
        }
    }
}

/// 캐시 키용 질의 정규화 (trim + 공백 축약 + 소문자, case folding 아님)
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ============================================================================
// Internal State
// ============================================================================

struct CacheEntry<V> {
    value: Arc<V>,
    generation: u64,
    created_at: Instant,
    last_access: Instant,
    access_seq: u64,
}

type FlightFuture<V> = Shared<BoxFuture<'static, QueryResult<Arc<V>>>>;

/// 진행 중인 계산
struct Flight<V> {
    id: u64,
    generation: u64,
    future: FlightFuture<V>,
}

struct CacheState<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    /// access_seq → key (가장 작은 값이 LRU)
    recency: BTreeMap<u64, CacheKey>,
    generations: HashMap<String, u64>,
    in_flight: HashMap<CacheKey, Flight<V>>,
    next_seq: u64,
    next_flight: u64,
    hits: u64,
    misses: u64,
    coalesced: u64,
    evictions: u64,
}

impl<V> CacheState<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            generations: HashMap::new(),
            in_flight: HashMap::new(),
            next_seq: 0,
            next_flight: 0,
            hits: 0,
            misses: 0,
            coalesced: 0,
            evictions: 0,
        }
    }

    fn generation(&self, collection: &str) -> u64 {
        self.generations.get(collection).copied().unwrap_or(0)
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn is_live(entry: &CacheEntry<V>, generation: u64, now: Instant, ttl: Option<Duration>) -> bool {
        entry.generation == generation
            && ttl.map_or(true, |ttl| now.duration_since(entry.created_at) < ttl)
    }

    fn remove_entry(&mut self, key: &CacheKey) {
        if let Some(old) = self.entries.remove(key) {
            self.recency.remove(&old.access_seq);
        }
    }

    /// 무효화된 세대나 만료된 엔트리를 모두 제거
    ///
    /// # Returns
    /// 제거된 엔트리 수
    fn purge_dead(&mut self, now: Instant, ttl: Option<Duration>) -> usize {
        let dead: Vec<(CacheKey, u64)> = self
            .entries
            .iter()
            .filter(|(key, entry)| {
                !Self::is_live(entry, self.generation(&key.collection), now, ttl)
            })
            .map(|(key, entry)| (key.clone(), entry.access_seq))
            .collect();

        for (key, seq) in &dead {
            self.entries.remove(key);
            self.recency.remove(seq);
        }
        dead.len()
    }

    fn live_count(&self, now: Instant, ttl: Option<Duration>) -> usize {
        self.entries
            .iter()
            .filter(|(key, entry)| {
                Self::is_live(entry, self.generation(&key.collection), now, ttl)
            })
            .count()
    }

    /// 살아있는 엔트리 조회 + LRU 갱신. 무효/만료 엔트리는 제거
    fn lookup(&mut self, key: &CacheKey, now: Instant, ttl: Option<Duration>) -> Option<Arc<V>> {
        let generation = self.generation(&key.collection);
        let (live, old_seq) = {
            let entry = self.entries.get(key)?;
            (Self::is_live(entry, generation, now, ttl), entry.access_seq)
        };

        if !live {
            self.remove_entry(key);
            return None;
        }

        let seq = self.bump_seq();
        self.recency.remove(&old_seq);
        self.recency.insert(seq, key.clone());

        let entry = self.entries.get_mut(key)?;
        entry.access_seq = seq;
        entry.last_access = now;
        Some(Arc::clone(&entry.value))
    }

    /// 계산 결과 저장. 계산 도중 세대가 바뀌었으면 저장하지 않음
    ///
    /// 용량이 찼으면 죽은 엔트리부터 정리하고, 그래도 부족할 때만 LRU 축출
    fn store(
        &mut self,
        key: CacheKey,
        value: Arc<V>,
        generation: u64,
        max_entries: usize,
        ttl: Option<Duration>,
    ) {
        if self.generation(&key.collection) != generation {
            tracing::debug!(
                "Discarding stale result for collection '{}' (generation {})",
                key.collection,
                generation
            );
            return;
        }

        self.remove_entry(&key);

        let now = Instant::now();
        if self.entries.len() >= max_entries {
            let purged = self.purge_dead(now, ttl);
            if purged > 0 {
                tracing::debug!("Purged {} dead cache entries", purged);
            }
        }

        while self.entries.len() >= max_entries {
            match self.recency.pop_first() {
                Some((_, victim)) => {
                    self.entries.remove(&victim);
                    self.evictions += 1;
                }
                None => break,
            }
        }

        let seq = self.bump_seq();
        self.recency.insert(seq, key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                value,
                generation,
                created_at: now,
                last_access: now,
                access_seq: seq,
            },
        );
    }
}

fn lock<V>(state: &Mutex<CacheState<V>>) -> MutexGuard<'_, CacheState<V>> {
    // 장부 작업 중 패닉이 나도 상태는 일관적이므로 poison 무시
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 계산 태스크 종료 시(성공/실패/패닉) in-flight 표시 제거
struct FlightGuard<V> {
    state: Arc<Mutex<CacheState<V>>>,
    key: CacheKey,
    id: u64,
}

impl<V> Drop for FlightGuard<V> {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        if state.in_flight.get(&self.key).map(|f| f.id) == Some(self.id) {
            state.in_flight.remove(&self.key);
        }
    }
}

// ============================================================================
// Stats
// ============================================================================

/// 캐시 통계
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// 살아있는 엔트리 수 (무효화/만료되어 아직 정리되지 않은 것은 제외)
    pub entries: usize,
    pub max_entries: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    /// 진행 중 계산에 합류한 호출 수
    pub coalesced: u64,
    pub evictions: u64,
    /// hits / (hits + misses + coalesced), 조회가 없으면 0.0
    pub hit_rate: f64,
}

// ============================================================================
// ResultCache
// ============================================================================

/// 컬렉션 단위 무효화를 지원하는 single-flight LRU 캐시
///
/// 복제본은 같은 내부 상태를 공유합니다.
pub struct ResultCache<V> {
    config: CacheConfig,
    state: Arc<Mutex<CacheState<V>>>,
}

impl<V> Clone for ResultCache<V> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<V> ResultCache<V>
where
    V: Send + Sync + 'static,
{
    /// 설정 검증 후 생성
    pub fn new(config: CacheConfig) -> QueryResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: Arc::new(Mutex::new(CacheState::new())),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// 캐시 조회, 미스 시 `compute`를 정확히 한 번 실행하여 저장
    ///
    /// 같은 키의 동시 호출은 진행 중인 계산을 기다립니다.
    /// 실패한 계산은 캐시에 남지 않으며 대기자 모두에게 같은 에러가 전달됩니다.
    /// tokio 런타임 안에서 호출해야 합니다.
    pub async fn get_or_compute<F, Fut>(
        &self,
        collection: &str,
        query: &str,
        k: usize,
        compute: F,
    ) -> QueryResult<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = QueryResult<V>> + Send + 'static,
    {
        let key = CacheKey::new(collection, query, k);

        let flight = {
            let mut state = lock(&self.state);

            if let Some(value) = state.lookup(&key, Instant::now(), self.config.ttl) {
                state.hits += 1;
                tracing::debug!("Cache hit: {}/{:?} (k={})", key.collection, key.query, k);
                return Ok(value);
            }

            let generation = state.generation(collection);
            let joinable = state
                .in_flight
                .get(&key)
                .filter(|f| f.generation == generation)
                .map(|f| f.future.clone());

            match joinable {
                Some(future) => {
                    state.coalesced += 1;
                    tracing::debug!("Joining in-flight computation for {}/{:?}", key.collection, key.query);
                    future
                }
                None => {
                    state.misses += 1;
                    tracing::debug!("Cache miss: {}/{:?} (k={})", key.collection, key.query, k);
                    // compute()는 future만 만들 뿐 이 캐시를 다시 잠그면 안 됨
                    self.start_flight(&mut state, key, generation, compute())
                }
            }
        };

        flight.await
    }

    /// 계산 태스크 생성 및 in-flight 등록 (락 보유 상태에서 호출)
    fn start_flight<Fut>(
        &self,
        state: &mut CacheState<V>,
        key: CacheKey,
        generation: u64,
        computation: Fut,
    ) -> FlightFuture<V>
    where
        Fut: Future<Output = QueryResult<V>> + Send + 'static,
    {
        state.next_flight += 1;
        let id = state.next_flight;

        let guard = FlightGuard {
            state: Arc::clone(&self.state),
            key: key.clone(),
            id,
        };
        let max_entries = self.config.max_entries;
        let ttl = self.config.ttl;

        let handle = tokio::spawn(async move {
            let result = computation.await.map(Arc::new);
            if let Ok(value) = &result {
                let mut state = lock(&guard.state);
                state.store(guard.key.clone(), Arc::clone(value), generation, max_entries, ttl);
            }
            drop(guard);
            result
        });

        let future: BoxFuture<'static, QueryResult<Arc<V>>> = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(QueryError::Internal(format!(
                    "cache computation task failed: {}",
                    e
                ))),
            }
        }
        .boxed();

        let shared = future.shared();
        state.in_flight.insert(
            key,
            Flight {
                id,
                generation,
                future: shared.clone(),
            },
        );
        shared
    }

    /// 컬렉션 무효화 (세대 증가, 물리 삭제는 다음 조회 때)
    ///
    /// # Returns
    /// 새 세대 번호
    pub fn invalidate(&self, collection: &str) -> u64 {
        let mut state = lock(&self.state);
        let generation = state
            .generations
            .entry(collection.to_string())
            .or_insert(0);
        *generation += 1;
        let current = *generation;
        tracing::debug!("Invalidated cache for '{}' (generation {})", collection, current);
        current
    }

    /// 현재 컬렉션 세대
    pub fn generation(&self, collection: &str) -> u64 {
        lock(&self.state).generation(collection)
    }

    /// 살아있는 엔트리 존재 여부 (LRU 순서는 건드리지 않음)
    pub fn contains(&self, collection: &str, query: &str, k: usize) -> bool {
        let key = CacheKey::new(collection, query, k);
        let state = lock(&self.state);
        let generation = state.generation(collection);
        state
            .entries
            .get(&key)
            .map(|e| CacheState::is_live(e, generation, Instant::now(), self.config.ttl))
            .unwrap_or(false)
    }

    /// 물리적으로 보관 중인 엔트리 수 (무효화 후 아직 정리되지 않은 것 포함)
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 마지막 접근 이후 경과 시간
    pub fn idle_for(&self, collection: &str, query: &str, k: usize) -> Option<Duration> {
        let key = CacheKey::new(collection, query, k);
        let state = lock(&self.state);
        state
            .entries
            .get(&key)
            .map(|e| Instant::now().duration_since(e.last_access))
    }

    pub fn stats(&self) -> CacheStats {
        let state = lock(&self.state);
        let lookups = state.hits + state.misses + state.coalesced;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            state.hits as f64 / lookups as f64
        };

        CacheStats {
            entries: state.live_count(Instant::now(), self.config.ttl),
            max_entries: self.config.max_entries,
            in_flight: state.in_flight.len(),
            hits: state.hits,
            misses: state.misses,
            coalesced: state.coalesced,
            evictions: state.evictions,
            hit_rate,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache(max_entries: usize, ttl: Option<Duration>) -> ResultCache<Vec<u32>> {
        ResultCache::new(CacheConfig { max_entries, ttl }).unwrap()
    }

    async fn fill(cache: &ResultCache<Vec<u32>>, query: &str, value: u32) {
        cache
            .get_or_compute("c", query, 1, move || async move { Ok(vec![value]) })
            .await
            .unwrap();
    }

    fn explode() -> QueryResult<Vec<u32>> {
        panic!("compute exploded")
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("  What   LANGUAGES? "), "what languages?");
        assert_eq!(normalize_query("a\tb\nc"), "a b c");
        assert_eq!(normalize_query("   "), "");
    }

    #[test]
    fn test_invalid_config() {
        assert!(ResultCache::<u32>::new(CacheConfig { max_entries: 0, ttl: None }).is_err());
        assert!(ResultCache::<u32>::new(CacheConfig {
            max_entries: 1,
            ttl: Some(Duration::ZERO)
        })
        .is_err());
    }

    #[tokio::test]
    async fn test_hit_skips_compute() {
        let cache = cache(10, None);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let value = cache
                .get_or_compute("c", "q", 2, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1, 2])
                })
                .await
                .unwrap();
            assert_eq!(*value, vec![1, 2]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_normalized_queries_share_entry() {
        let cache = cache(10, None);
        fill(&cache, "What languages?", 7).await;

        let value = cache
            .get_or_compute("c", "  what LANGUAGES?  ", 1, || async { Ok(vec![0]) })
            .await
            .unwrap();
        assert_eq!(*value, vec![7]);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_k_is_part_of_key() {
        let cache = cache(10, None);
        fill(&cache, "q", 1).await;
        let value = cache
            .get_or_compute("c", "q", 2, || async { Ok(vec![2]) })
            .await
            .unwrap();
        assert_eq!(*value, vec![2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_concurrent_callers() {
        let cache = cache(10, None);
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_compute("c", "slow", 3, move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            Ok(vec![4, 5, 6])
                        })
                        .await
                })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(*result.unwrap().unwrap(), vec![4, 5, 6]);
        }
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits + stats.coalesced, 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_do_not_block() {
        let cache = cache(10, None);

        let blocked = cache.clone();
        let _pending = tokio::spawn(async move {
            blocked
                .get_or_compute("c", "stuck", 1, || async {
                    futures::future::pending::<()>().await;
                    Ok(vec![0])
                })
                .await
        });
        tokio::task::yield_now().await;

        let other = tokio::time::timeout(
            Duration::from_secs(1),
            cache.get_or_compute("c", "free", 1, || async { Ok(vec![1]) }),
        )
        .await;
        assert_eq!(*other.unwrap().unwrap(), vec![1]);

        let other_collection = tokio::time::timeout(
            Duration::from_secs(1),
            cache.get_or_compute("d", "stuck", 1, || async { Ok(vec![2]) }),
        )
        .await;
        assert_eq!(*other_collection.unwrap().unwrap(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_caller_does_not_cancel_computation() {
        let cache = cache(10, None);
        let calls = Arc::new(AtomicUsize::new(0));

        let first = {
            let calls = Arc::clone(&calls);
            tokio::time::timeout(
                Duration::from_millis(10),
                cache.get_or_compute("c", "q", 1, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(vec![9])
                }),
            )
            .await
        };
        assert!(first.is_err(), "first caller should time out");

        // 진행 중인 계산에 합류
        let calls2 = Arc::clone(&calls);
        let second = cache
            .get_or_compute("c", "q", 1, move || async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(vec![0])
            })
            .await
            .unwrap();
        assert_eq!(*second, vec![9]);

        // 이후 호출은 캐시 히트
        let third = cache
            .get_or_compute("c", "q", 1, || async { Ok(vec![0]) })
            .await
            .unwrap();
        assert_eq!(*third, vec![9]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_computation_completes_without_waiters() {
        let cache = cache(10, None);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(1),
            cache.get_or_compute("c", "q", 1, || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(vec![3])
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(!cache.contains("c", "q", 1));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.contains("c", "q", 1));
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_failed_compute_not_cached() {
        let cache = cache(10, None);

        let err = cache
            .get_or_compute("c", "q", 1, || async {
                Err(QueryError::SearchUnavailable("backend down".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "search_unavailable");
        assert!(cache.is_empty());
        assert_eq!(cache.stats().in_flight, 0);

        let value = cache
            .get_or_compute("c", "q", 1, || async { Ok(vec![1]) })
            .await
            .unwrap();
        assert_eq!(*value, vec![1]);
    }

    #[tokio::test]
    async fn test_panicking_compute_surfaces_internal_error() {
        let cache = cache(10, None);

        let err = cache
            .get_or_compute("c", "q", 1, || async { explode() })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "internal_error");
        assert_eq!(cache.stats().in_flight, 0);

        let value = cache
            .get_or_compute("c", "q", 1, || async { Ok(vec![5]) })
            .await
            .unwrap();
        assert_eq!(*value, vec![5]);
    }

    #[tokio::test]
    async fn test_invalidate_forces_miss() {
        let cache = cache(10, Some(Duration::from_secs(3600)));
        fill(&cache, "q", 1).await;
        fill(&cache, "other", 1).await;
        assert!(cache.contains("c", "q", 1));

        assert_eq!(cache.invalidate("c"), 1);
        assert!(!cache.contains("c", "q", 1));

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let value = cache
            .get_or_compute("c", "q", 1, move || async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(vec![2])
            })
            .await
            .unwrap();
        assert_eq!(*value, vec![2]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_is_collection_scoped() {
        let cache = cache(10, None);
        fill(&cache, "q", 1).await;
        cache
            .get_or_compute("d", "q", 1, || async { Ok(vec![1]) })
            .await
            .unwrap();

        cache.invalidate("c");
        assert!(!cache.contains("c", "q", 1));
        assert!(cache.contains("d", "q", 1));
        assert_eq!(cache.generation("c"), 1);
        assert_eq!(cache.generation("d"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_of_invalidated_generation_not_stored() {
        let cache = cache(10, None);

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute("c", "q", 1, || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(vec![1])
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        cache.invalidate("c");

        // 무효화 이후 호출은 오래된 계산에 합류하지 않음
        let fresh = cache
            .get_or_compute("c", "q", 1, || async { Ok(vec![2]) })
            .await
            .unwrap();
        assert_eq!(*fresh, vec![2]);

        // 오래된 계산의 대기자는 자기 결과를 받음
        assert_eq!(*pending.await.unwrap().unwrap(), vec![1]);

        let current = cache
            .get_or_compute("c", "q", 1, || async { Ok(vec![3]) })
            .await
            .unwrap();
        assert_eq!(*current, vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = cache(10, Some(Duration::from_secs(1)));
        fill(&cache, "q", 1).await;
        assert!(cache.contains("c", "q", 1));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(cache.contains("c", "q", 1));

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(!cache.contains("c", "q", 1));

        let value = cache
            .get_or_compute("c", "q", 1, || async { Ok(vec![2]) })
            .await
            .unwrap();
        assert_eq!(*value, vec![2]);
    }

    #[tokio::test]
    async fn test_lru_eviction_order() {
        let cache = cache(3, None);
        fill(&cache, "a", 1).await;
        fill(&cache, "b", 2).await;
        fill(&cache, "c", 3).await;

        // a 접근 → LRU 순서: b, c, a
        fill(&cache, "a", 0).await;

        fill(&cache, "d", 4).await;
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("c", "b", 1));
        assert!(cache.contains("c", "a", 1));
        assert!(cache.contains("c", "c", 1));
        assert!(cache.contains("c", "d", 1));

        fill(&cache, "e", 5).await;
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("c", "c", 1));
        assert!(cache.contains("c", "a", 1));

        let stats = cache.stats();
        assert_eq!(stats.evictions, 2);
        assert!(stats.entries <= stats.max_entries);
    }

    #[tokio::test]
    async fn test_capacity_never_exceeded() {
        let cache = cache(4, None);
        for i in 0..50u32 {
            fill(&cache, &format!("q{}", i), i).await;
            assert!(cache.len() <= 4);
        }
        assert_eq!(cache.stats().evictions, 46);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_updates_last_access() {
        let cache = cache(4, None);
        fill(&cache, "q", 1).await;

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.idle_for("c", "q", 1), Some(Duration::from_secs(5)));

        fill(&cache, "q", 1).await;
        assert_eq!(cache.idle_for("c", "q", 1), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_dead_entries_make_room_before_lru() {
        let cache = cache(2, None);
        cache
            .get_or_compute("live", "x", 1, || async { Ok(vec![1]) })
            .await
            .unwrap();
        cache
            .get_or_compute("dead", "q", 1, || async { Ok(vec![2]) })
            .await
            .unwrap();

        cache.invalidate("dead");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().entries, 1);

        cache
            .get_or_compute("live", "y", 1, || async { Ok(vec![3]) })
            .await
            .unwrap();

        assert!(cache.contains("live", "x", 1));
        assert!(cache.contains("live", "y", 1));
        assert_eq!(cache.len(), 2);
        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_make_room_before_lru() {
        let cache = cache(2, Some(Duration::from_secs(1)));
        fill(&cache, "old", 1).await;
        tokio::time::advance(Duration::from_millis(800)).await;
        fill(&cache, "recent", 2).await;
        tokio::time::advance(Duration::from_millis(300)).await;

        assert_eq!(cache.stats().entries, 1);
        fill(&cache, "new", 3).await;

        assert!(cache.contains("c", "recent", 1));
        assert!(cache.contains("c", "new", 1));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_normalize_is_lowercase_not_case_folding() {
        assert_eq!(normalize_query("STRASSE"), "strasse");
        assert_eq!(normalize_query("Straße"), "straße");
        assert_ne!(
            CacheKey::new("c", "STRASSE", 1),
            CacheKey::new("c", "Straße", 1)
        );
    }
}
