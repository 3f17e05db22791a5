//! Access 모듈 - 파일 권한/복호화 협력자
//!
//! 파일 참조(id 또는 URL)를 `FileRecord`로 해석하고 평문 내용을 공급합니다.
//! 실패는 `AccessDenied` / `DecryptionFailed`로 표면화되며 코어는 재시도하지 않습니다.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::error::{QueryError, QueryResult};

/// 파일 컬렉션 이름 접두사
pub const COLLECTION_PREFIX: &str = "query_";

/// 파일 해시에서 컬렉션 이름 생성
pub fn collection_for_file(file_hash: &str) -> String {
    format!("{}{}", COLLECTION_PREFIX, file_hash)
}

/// 내용 해시 (SHA-256 hex)
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// ============================================================================
// Types
// ============================================================================

/// 파일 참조
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRef {
    Id(u64),
    Url(String),
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileRef::Id(id) => write!(f, "file #{}", id),
            FileRef::Url(url) => write!(f, "{}", url),
        }
    }
}

/// 권한 레지스트리의 파일 메타데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub file_id: u64,
    pub owner: String,
    pub url: String,
    pub file_hash: String,
}

impl FileRecord {
    pub fn collection(&self) -> String {
        collection_for_file(&self.file_hash)
    }
}

/// 콘텐츠 공급자 트레이트
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// 파일 참조를 레코드로 해석
    async fn resolve(&self, file: &FileRef) -> QueryResult<FileRecord>;

    /// 권한 확인 후 평문 내용 반환
    async fn fetch(&self, record: &FileRecord) -> QueryResult<String>;
}

// ============================================================================
// LocalFileSource
// ============================================================================

/// 루트 디렉토리 아래 파일을 공급하는 로컬 구현
///
/// URL은 루트 기준 상대 경로 또는 `file://` 접두사 경로입니다.
/// 처음 해석된 파일에 순서대로 id가 부여됩니다.
#[derive(Debug)]
pub struct LocalFileSource {
    root: PathBuf,
    owner: String,
    files: RwLock<BTreeMap<u64, PathBuf>>,
}

impl LocalFileSource {
    /// 루트 디렉토리로 생성 (존재하지 않으면 `InvalidConfig`)
    pub fn new(root: impl AsRef<Path>, owner: impl Into<String>) -> QueryResult<Self> {
        let root = std::fs::canonicalize(root.as_ref()).map_err(|e| {
            QueryError::InvalidConfig(format!(
                "file source root {}: {}",
                root.as_ref().display(),
                e
            ))
        })?;
        Ok(Self {
            root,
            owner: owner.into(),
            files: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 파일 등록 (이미 등록된 경로면 기존 id)
    pub async fn register(&self, url: &str) -> QueryResult<u64> {
        let path = self.confine(url).await?;
        let mut files = self.files.write().await;
        if let Some((id, _)) = files.iter().find(|(_, p)| **p == path) {
            return Ok(*id);
        }
        let id = files.keys().next_back().map_or(1, |last| last + 1);
        files.insert(id, path);
        Ok(id)
    }

    /// 경로가 루트를 벗어나면 `AccessDenied`
    async fn confine(&self, url: &str) -> QueryResult<PathBuf> {
        let relative = url.strip_prefix("file://").unwrap_or(url);
        let candidate = self.root.join(relative.trim_start_matches('/'));

        let resolved = tokio::fs::canonicalize(&candidate).await.map_err(|e| {
            QueryError::AccessDenied(format!("{}: {}", url, e))
        })?;
        if !resolved.starts_with(&self.root) {
            return Err(QueryError::AccessDenied(format!(
                "{} is outside the permitted root",
                url
            )));
        }
        Ok(resolved)
    }

    fn url_for(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        format!("file://{}", relative.to_string_lossy())
    }

    async fn path_for(&self, file_id: u64) -> QueryResult<PathBuf> {
        self.files.read().await.get(&file_id).cloned().ok_or_else(|| {
            QueryError::AccessDenied(format!("no permission record for file #{}", file_id))
        })
    }
}

#[async_trait]
impl ContentSource for LocalFileSource {
    async fn resolve(&self, file: &FileRef) -> QueryResult<FileRecord> {
        let file_id = match file {
            FileRef::Id(id) => *id,
            FileRef::Url(url) => self.register(url).await?,
        };
        let path = self.path_for(file_id).await?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| QueryError::AccessDenied(format!("{}: {}", path.display(), e)))?;

        Ok(FileRecord {
            file_id,
            owner: self.owner.clone(),
            url: self.url_for(&path),
            file_hash: content_hash(&bytes),
        })
    }

    async fn fetch(&self, record: &FileRecord) -> QueryResult<String> {
        let path = self.path_for(record.file_id).await?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| QueryError::AccessDenied(format!("{}: {}", path.display(), e)))?;

        if content_hash(&bytes) != record.file_hash {
            return Err(QueryError::DecryptionFailed(format!(
                "content of {} changed since it was resolved",
                record.url
            )));
        }

        String::from_utf8(bytes).map_err(|_| {
            QueryError::DecryptionFailed(format!("{} is not valid UTF-8 text", record.url))
        })
    }
}
