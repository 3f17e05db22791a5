//! LanceDB Vector Store - 외부 벡터 DB 백엔드
//!
//! 컬렉션마다 별도 테이블을 두므로 컬렉션별로 임베딩 차원이 달라도 됩니다.
//! 테이블 차원과 맞지 않는 쓰기/검색은 LanceDB 호출 전에 `InvalidArgument`로 거절합니다.
//! 거리 척도는 코사인이며 스코어는 `1 - distance`로 변환합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::table::Table;
use lancedb::DistanceType;
use sha2::{Digest, Sha256};

use crate::error::{QueryError, QueryResult};

use super::vector::{BackendKind, ChunkId, SearchResult, VectorEntry, VectorStore};

/// 컬렉션 테이블 이름 접두사
const TABLE_PREFIX: &str = "chunks";

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
pub struct LanceVectorStore {
    db: Connection,
    uri: String,
}

impl LanceVectorStore {
    /// LanceDB 연결 후 응답 여부까지 확인
    ///
    /// # Arguments
    /// * `uri` - 로컬 `.lance` 디렉토리 경로 또는 LanceDB URI
    pub async fn connect(uri: &str) -> Result<Self> {
        // 로컬 경로면 부모 디렉토리 생성
        if !uri.contains("://") {
            if let Some(parent) = Path::new(uri).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .context("Failed to create LanceDB directory")?;
                }
            }
        }

        let db = lancedb::connect(uri)
            .execute()
            .await
            .with_context(|| format!("Failed to connect to LanceDB at {}", uri))?;

        // 연결 probe
        db.table_names()
            .execute()
            .await
            .context("LanceDB did not respond to table listing")?;

        Ok(Self {
            db,
            uri: uri.to_string(),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// 청크 테이블 스키마 생성
    fn create_schema(dimension: i32) -> Schema {
        Schema::new(vec![
            Field::new("collection", DataType::Utf8, false),
            Field::new("chunk_id", DataType::Utf8, false),
            Field::new("sequence", DataType::Int32, false),
            Field::new("chunk_text", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ])
    }

    /// 엔트리들을 Arrow RecordBatch로 변환
    fn entries_to_batch(entries: &[&VectorEntry]) -> Result<RecordBatch> {
        let first = entries
            .first()
            .ok_or_else(|| anyhow::anyhow!("Cannot create batch from empty entries"))?;
        let dimension = first.embedding.len();

        let collections: Vec<&str> = entries.iter().map(|e| e.collection.as_str()).collect();
        let chunk_ids: Vec<&str> = entries.iter().map(|e| e.chunk_id.as_str()).collect();
        let sequences: Vec<i32> = entries.iter().map(|e| e.sequence as i32).collect();
        let texts: Vec<&str> = entries.iter().map(|e| e.text.as_str()).collect();

        let embeddings_flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        let batch = RecordBatch::try_new(
            Arc::new(Self::create_schema(dimension as i32)),
            vec![
                Arc::new(StringArray::from(collections)),
                Arc::new(StringArray::from(chunk_ids)),
                Arc::new(Int32Array::from(sequences)),
                Arc::new(StringArray::from(texts)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")?;

        Ok(batch)
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self, name: &str) -> Result<bool> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")?;
        Ok(names.iter().any(|n| n == name))
    }

    async fn open_table(&self, collection: &str) -> Result<Option<Table>> {
        let name = table_name(collection);
        if !self.table_exists(&name).await? {
            return Ok(None);
        }
        let table = self
            .db
            .open_table(&name)
            .execute()
            .await
            .with_context(|| format!("Failed to open table for collection '{}'", collection))?;
        Ok(Some(table))
    }

    /// 테이블 스키마의 임베딩 차원
    async fn table_dimension(table: &Table) -> Result<usize> {
        let schema = table.schema().await.context("Failed to read table schema")?;
        let field = schema
            .field_with_name("embedding")
            .context("Missing embedding column")?;
        match field.data_type() {
            DataType::FixedSizeList(_, size) => Ok((*size).max(0) as usize),
            other => anyhow::bail!("Unexpected embedding column type: {}", other),
        }
    }

    /// 한 컬렉션의 엔트리 쓰기. 같은 chunk_id를 지운 뒤 추가 (upsert)
    async fn write_group(
        &self,
        collection: &str,
        table: Option<Table>,
        entries: &[&VectorEntry],
    ) -> Result<()> {
        let batch = Self::entries_to_batch(entries)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match table {
            Some(table) => {
                let ids: Vec<String> = entries
                    .iter()
                    .map(|e| sql_literal(e.chunk_id.as_str()))
                    .collect();
                let filter = format!("chunk_id IN ({})", ids.join(", "));
                table
                    .delete(&filter)
                    .await
                    .context("Failed to delete replaced chunks")?;
                table
                    .add(batches)
                    .execute()
                    .await
                    .context("Failed to add chunks to table")?;
            }
            None => {
                self.db
                    .create_table(table_name(collection), batches)
                    .execute()
                    .await
                    .with_context(|| {
                        format!("Failed to create table for collection '{}'", collection)
                    })?;
                tracing::debug!(
                    "Created LanceDB table for '{}' ({} dims)",
                    collection,
                    entries.first().map_or(0, |e| e.embedding.len())
                );
            }
        }

        Ok(())
    }

    /// 컬렉션별로 묶어 차원 검증 후 쓰기
    async fn write_entries(&self, entries: &[VectorEntry]) -> QueryResult<usize> {
        let mut groups: BTreeMap<&str, Vec<&VectorEntry>> = BTreeMap::new();
        for entry in entries {
            groups.entry(entry.collection.as_str()).or_default().push(entry);
        }

        for (collection, group) in groups {
            let dimension = batch_dimension(collection, &group)?;
            let table = self.open_table(collection).await.map_err(QueryError::search)?;
            if let Some(table) = &table {
                let expected = Self::table_dimension(table)
                    .await
                    .map_err(QueryError::search)?;
                check_dimension(collection, expected, dimension)?;
            }
            self.write_group(collection, table, &group)
                .await
                .map_err(QueryError::search)?;
        }

        Ok(entries.len())
    }

    async fn search_table(
        table: &Table,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        let stream = table
            .vector_search(query_embedding.to_vec())
            .context("Failed to create vector search")?
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = stream.try_collect().await?;
        let mut results = Vec::new();

        for batch in batches {
            let chunk_ids = string_column(&batch, "chunk_id")?;
            let texts = string_column(&batch, "chunk_text")?;
            let sequences = batch
                .column_by_name("sequence")
                .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing sequence column"))?;
            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                results.push(SearchResult {
                    chunk_id: ChunkId::from(chunk_ids.value(i)),
                    sequence: sequences.value(i).max(0) as u32,
                    text: texts.value(i).to_string(),
                    score: 1.0 - distances.value(i),
                });
            }
        }

        // 배치 경계를 넘어 내림차순 보장
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(k);

        Ok(results)
    }

    async fn delete_inner(&self, collection: &str) -> Result<usize> {
        let table = match self.open_table(collection).await? {
            Some(table) => table,
            None => return Ok(0),
        };

        let before = table
            .count_rows(None)
            .await
            .context("Failed to count rows before drop")?;
        drop(table);

        self.db
            .drop_table(table_name(collection))
            .await
            .with_context(|| format!("Failed to drop table for collection '{}'", collection))?;

        Ok(before)
    }

    async fn count_inner(&self, collection: &str) -> Result<usize> {
        match self.open_table(collection).await? {
            Some(table) => table.count_rows(None).await.context("Failed to count rows"),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn upsert(&self, entry: VectorEntry) -> QueryResult<()> {
        self.write_entries(std::slice::from_ref(&entry))
            .await
            .map(|_| ())
    }

    async fn upsert_batch(&self, entries: Vec<VectorEntry>) -> QueryResult<usize> {
        self.write_entries(&entries).await
    }

    async fn delete_collection(&self, collection: &str) -> QueryResult<usize> {
        self.delete_inner(collection)
            .await
            .map_err(QueryError::search)
    }

    async fn search(
        &self,
        collection: &str,
        query_embedding: &[f32],
        k: usize,
    ) -> QueryResult<Vec<SearchResult>> {
        if k == 0 {
            return Err(QueryError::InvalidArgument(
                "k must be greater than 0".to_string(),
            ));
        }

        let table = match self.open_table(collection).await.map_err(QueryError::search)? {
            Some(table) => table,
            None => return Ok(vec![]),
        };
        let expected = Self::table_dimension(&table)
            .await
            .map_err(QueryError::search)?;
        check_dimension(collection, expected, query_embedding.len())?;

        Self::search_table(&table, query_embedding, k)
            .await
            .map_err(QueryError::search)
    }

    async fn count(&self, collection: &str) -> QueryResult<usize> {
        self.count_inner(collection)
            .await
            .map_err(QueryError::search)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::External
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 컬렉션 테이블 이름 (`chunks_` + SHA-256 앞 12바이트 hex)
///
/// 컬렉션 이름에는 테이블 이름으로 쓸 수 없는 문자가 올 수 있으므로 해시를 씁니다.
fn table_name(collection: &str) -> String {
    let digest = Sha256::digest(collection.as_bytes());
    format!("{}_{}", TABLE_PREFIX, hex::encode(&digest[..12]))
}

/// 배치 안 임베딩 차원이 모두 같고 0이 아닌지 검증
fn batch_dimension(collection: &str, entries: &[&VectorEntry]) -> QueryResult<usize> {
    let dimension = entries.first().map_or(0, |e| e.embedding.len());
    if dimension == 0 {
        return Err(QueryError::InvalidArgument(format!(
            "empty embedding for collection '{}'",
            collection
        )));
    }
    if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dimension) {
        return Err(QueryError::InvalidArgument(format!(
            "embedding dimension mismatch in batch for '{}': {} vs {}",
            collection,
            bad.embedding.len(),
            dimension
        )));
    }
    Ok(dimension)
}

fn check_dimension(collection: &str, expected: usize, actual: usize) -> QueryResult<()> {
    if expected != actual {
        return Err(QueryError::InvalidArgument(format!(
            "embedding dimension {} does not match collection '{}' ({})",
            actual, collection, expected
        )));
    }
    Ok(())
}

/// SQL 문자열 리터럴 (작은따옴표 이스케이프)
fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

// ============================================================================
// Tests
// ============================================================================
