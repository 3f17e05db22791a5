//! Gemini 임베딩 프로바이더
//!
//! ref: https://ai.google.dev/gemini-api/docs/embeddings

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{EmbedTask, EmbeddingProvider};

/// Gemini 임베딩 API 엔드포인트 (gemini-embedding-001 - MRL 지원)
const GEMINI_EMBED_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:embedContent";

const MODEL_NAME: &str = "models/gemini-embedding-001";

/// 무료 티어: 60 RPM
const RATE_LIMIT_RPM: usize = 60;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
/// 429 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

/// MRL로 지원되는 출력 차원
const SUPPORTED_DIMENSIONS: [usize; 3] = [768, 1536, 3072];

// ============================================================================
// Rate Limiter
// ============================================================================

/// 슬라이딩 윈도우 rate limiter
#[derive(Debug)]
struct RateLimiter {
    sent: VecDeque<Instant>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            sent: VecDeque::with_capacity(max_requests),
            max_requests,
            window,
        }
    }

    /// 윈도우 안의 요청 수가 한도 미만이 될 때까지 대기 후 기록
    async fn acquire(&mut self) {
        loop {
            let now = Instant::now();
            while let Some(&oldest) = self.sent.front() {
                if now.duration_since(oldest) >= self.window {
                    self.sent.pop_front();
                } else {
                    break;
                }
            }

            if self.sent.len() < self.max_requests {
                self.sent.push_back(now);
                return;
            }

            if let Some(&oldest) = self.sent.front() {
                let wait = self.window.saturating_sub(now.duration_since(oldest));
                tracing::debug!("Embedding rate limit reached, waiting {:?}", wait);
                tokio::time::sleep(wait).await;
            }
        }
    }
}

// ============================================================================
// GeminiEmbedding
// ============================================================================

/// Google Gemini 임베딩 구현체
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    client: reqwest::Client,
    dimension: usize,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl GeminiEmbedding {
    /// 차원을 지정하여 생성 (768, 1536, 3072 중 선택)
    pub fn with_dimension(api_key: String, dimension: usize) -> Result<Self> {
        if !SUPPORTED_DIMENSIONS.contains(&dimension) {
            anyhow::bail!(
                "Invalid dimension: {}. Must be 768, 1536, or 3072",
                dimension
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            dimension,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
                RATE_LIMIT_RPM,
                RATE_LIMIT_WINDOW,
            ))),
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env_with_dimension(dimension: usize) -> Result<Self> {
        let api_key = get_api_key()?;
        Self::with_dimension(api_key, dimension)
    }

    fn request_for(&self, text: &str, task: EmbedTask) -> EmbedRequest {
        EmbedRequest {
            model: MODEL_NAME.to_string(),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type: task_type(task).to_string(),
            output_dimensionality: Some(self.dimension),
        }
    }
}

fn task_type(task: EmbedTask) -> &'static str {
    match task {
        EmbedTask::Document => "RETRIEVAL_DOCUMENT",
        EmbedTask::Query => "RETRIEVAL_QUERY",
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt))
}

/// Gemini API 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: String,
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

/// Gemini API 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

/// Gemini API 에러 응답
#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str, task: EmbedTask) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            anyhow::bail!("Cannot embed empty text");
        }

        let request = self.request_for(text, task);
        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=MAX_RETRIES {
            self.rate_limiter.lock().await.acquire().await;

            // API 키는 URL이 아닌 헤더로 전송
            let response = match self
                .client
                .post(GEMINI_EMBED_URL)
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send embedding request: {}", e));
                    if attempt < MAX_RETRIES {
                        tracing::warn!(
                            "Embedding request failed, retrying in {:?} (attempt {}/{})",
                            backoff(attempt),
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff(attempt)).await;
                    }
                    continue;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                let parsed: EmbedResponse =
                    serde_json::from_str(&body).context("Failed to parse embedding response")?;
                if parsed.embedding.values.len() != self.dimension {
                    anyhow::bail!(
                        "Gemini returned {} dimensions, expected {}",
                        parsed.embedding.values.len(),
                        self.dimension
                    );
                }
                return Ok(parsed.embedding.values);
            }

            if status.as_u16() == 429 {
                last_error = Some(anyhow::anyhow!("Rate limit exceeded (429)"));
                if attempt < MAX_RETRIES {
                    tracing::warn!(
                        "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                        backoff(attempt),
                        attempt + 1,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff(attempt)).await;
                }
                continue;
            }

            // 그 외 에러는 즉시 실패
            if let Ok(error) = serde_json::from_str::<GeminiError>(&body) {
                anyhow::bail!(
                    "Gemini API error ({}): {}",
                    error.error.status,
                    error.error.message
                );
            }
            anyhow::bail!("Gemini API error ({}): {}", status, body);
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Embedding failed after {} retries", MAX_RETRIES)))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "gemini-embedding-001"
    }
}

// ============================================================================
// API Key Management
// ============================================================================

const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"];

/// API 키 로드 (GEMINI_API_KEY > GOOGLE_AI_API_KEY)
pub fn get_api_key() -> Result<String> {
    for var in API_KEY_VARS {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                tracing::debug!("Using API key from {}", var);
                return Ok(key);
            }
        }
    }

    anyhow::bail!(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
    )
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    API_KEY_VARS
        .iter()
        .any(|var| std::env::var(var).map(|k| !k.is_empty()).unwrap_or(false))
}

// ============================================================================
// Tests
// ============================================================================
