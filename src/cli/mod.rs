//! CLI 모듈
//!
//! data-query-node CLI 명령어 정의 및 구현

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::access::{FileRef, LocalFileSource};
use crate::config::NodeConfig;
use crate::embedding::{has_api_key, EmbedderKind};
use crate::error::{ErrorBody, QueryError};
use crate::orchestrator::{IngestStatus, QueryOrchestrator, RankedPassage, LOCAL_COLLECTION};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "data-query-node")]
#[command(version, about = "캐시된 벡터 검색 질의 노드", long_about = None)]
pub struct Cli {
    /// 결과와 에러를 JSON으로 출력
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 텍스트 내용을 수집하고 질의
    Query {
        /// 질문
        question: String,

        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 내용을 읽을 파일 경로
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// 컬렉션 이름
        #[arg(short, long, default_value = LOCAL_COLLECTION)]
        collection: String,

        /// 결과 개수 (기본: QUERY_NODE_TOP_K)
        #[arg(short = 'k', long)]
        limit: Option<usize>,
    },

    /// 권한이 부여된 파일에 질의
    AskFile {
        /// 질문
        question: String,

        /// 파일 ID
        #[arg(long)]
        id: Option<u64>,

        /// 파일 URL (루트 기준 상대 경로 또는 file://)
        #[arg(short, long)]
        url: Option<String>,

        /// 파일 루트 디렉토리
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// 파일 소유자 표시
        #[arg(long, default_value = "local")]
        owner: String,

        /// 결과 개수 (기본: QUERY_NODE_TOP_K)
        #[arg(short = 'k', long)]
        limit: Option<usize>,
    },

    /// 대화형 질의
    Repl {
        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 내용을 읽을 파일 경로
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// 컬렉션 이름
        #[arg(short, long, default_value = LOCAL_COLLECTION)]
        collection: String,
    },

    /// 내장 프로필로 데모 실행
    Demo,

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let json = cli.json;
    let result = match cli.command {
        Commands::Query {
            question,
            text,
            file,
            collection,
            limit,
        } => cmd_query(&question, text, file, &collection, limit, json).await,
        Commands::AskFile {
            question,
            id,
            url,
            root,
            owner,
            limit,
        } => cmd_ask_file(&question, id, url, &root, &owner, limit, json).await,
        Commands::Repl {
            text,
            file,
            collection,
        } => cmd_repl(text, file, &collection).await,
        Commands::Demo => cmd_demo().await,
        Commands::Status => cmd_status(json).await,
    };

    if let Err(ref e) = result {
        if json {
            println!("{}", serde_json::to_string_pretty(&error_body(e))?);
        }
    }
    result
}

/// anyhow 에러를 구조화된 에러로 변환
fn error_body(err: &anyhow::Error) -> ErrorBody {
    match err.downcast_ref::<QueryError>() {
        Some(e) => e.to_body(),
        None => ErrorBody {
            kind: "internal_error",
            message: format!("{:#}", err),
        },
    }
}

async fn open_node() -> Result<QueryOrchestrator> {
    let config = NodeConfig::from_env()?;
    Ok(QueryOrchestrator::from_config(&config).await?)
}

/// --text 또는 --file 에서 내용 로드
async fn load_content(text: Option<String>, file: Option<PathBuf>) -> Result<String> {
    match (text, file) {
        (Some(text), _) => Ok(text),
        (None, Some(path)) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("파일 읽기 실패: {}", path.display())),
        (None, None) => bail!("--text 또는 --file 중 하나를 지정해야 합니다"),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 질의 명령어 (query)
async fn cmd_query(
    question: &str,
    text: Option<String>,
    file: Option<PathBuf>,
    collection: &str,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let content = load_content(text, file).await?;
    let node = open_node().await?;
    let k = limit.unwrap_or(node.default_top_k());

    let outcome = node.ensure_ingested(collection, &content).await?;
    if !json && outcome.status == IngestStatus::Ingested {
        println!(
            "[*] '{}' 수집 완료: {} 청크 ({})",
            collection,
            outcome.chunks,
            format_bytes(content.len())
        );
    }

    let passages = node.answer(collection, question, k).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "data": passages.as_ref() }))?
        );
    } else {
        print_passages(question, &passages);
    }
    Ok(())
}

/// 파일 질의 명령어 (ask-file)
#[allow(clippy::too_many_arguments)]
async fn cmd_ask_file(
    question: &str,
    id: Option<u64>,
    url: Option<String>,
    root: &Path,
    owner: &str,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let file = match (id, url) {
        (Some(id), _) => FileRef::Id(id),
        (None, Some(url)) => FileRef::Url(url),
        (None, None) => {
            return Err(QueryError::InvalidArgument("File ID or URL is required".to_string()).into())
        }
    };

    let source = LocalFileSource::new(root, owner)?;
    if let FileRef::Id(_) = file {
        // 로컬 소스는 루트 아래 파일을 정렬 순서대로 등록해 id를 부여
        register_all(&source).await?;
    }

    let node = open_node().await?;
    let k = limit.unwrap_or(node.default_top_k());
    let response = node.query_file(&source, &file, question, k).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("[OK] 파일 #{} ({})", response.file_id, response.file_url);
        println!("     소유자: {}", response.owner);
        println!("     해시: {}", response.file_hash);
        print_passages(question, &response.data);
    }
    Ok(())
}

/// 루트 디렉토리의 일반 파일을 이름 순으로 등록
async fn register_all(source: &LocalFileSource) -> Result<()> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(source.root())
        .await
        .with_context(|| format!("디렉토리 읽기 실패: {}", source.root().display()))?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    for name in names {
        source.register(&name).await?;
    }
    Ok(())
}

/// 대화형 명령어 (repl)
async fn cmd_repl(text: Option<String>, file: Option<PathBuf>, collection: &str) -> Result<()> {
    let content = load_content(text, file).await?;
    let node = open_node().await?;
    let k = node.default_top_k();

    let outcome = node.ensure_ingested(collection, &content).await?;
    println!(
        "[OK] '{}' 준비 완료 ({} 청크, {} 백엔드)",
        collection,
        outcome.chunks,
        node.backend_kind()
    );
    println!("질문을 입력하세요 ('help' 도움말, 'quit' 종료)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();

        match input {
            "" => continue,
            "quit" | ":quit" | ":q" => break,
            "help" | ":help" => print_repl_help(),
            ":stats" => {
                let stats = node.stats().await;
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
            ":invalidate" => {
                let removed = node.invalidate(collection).await?;
                println!("[OK] '{}' 초기화: {} 청크 삭제", collection, removed);
            }
            question => match node.query(collection, &content, question, k).await {
                Ok(passages) => print_passages(question, &passages),
                Err(e) => println!("[!] {} ({})", e, e.kind()),
            },
        }
    }

    println!("종료합니다.");
    Ok(())
}

fn print_repl_help() {
    println!("사용 가능한 명령:");
    println!("  <질문>        컬렉션에 질의");
    println!("  :stats        캐시/백엔드 통계");
    println!("  :invalidate   컬렉션 인덱스와 캐시 초기화 (다음 질의 때 재수집)");
    println!("  quit          종료");
}

// ============================================================================
// Demo
// ============================================================================

const DEMO_COLLECTION: &str = "demo_profile";

const DEMO_PROFILE: &str = "\
Hey! I'm Abishake, but everyone calls me Abi. \
I'm super passionate about AI, Web3, and Python, especially when it comes to building projects that mix creativity with tech. \
I love working on AI agents, Web3 integrations, and smart apps using Django, React, and Tailwind CSS. \
I mostly build everything solo, from the backend logic to the frontend UI, because I enjoy seeing an idea come alive end to end. \
Apart from coding, I love teaching; every week, I take Python full-stack classes at my college to help juniors learn programming in a simple and fun way. \
I always get excited exploring new tech, whether it's smart contracts, AI model integration, or voice-based AI systems. \
I like keeping my projects clean, modern, and interactive, with smooth animations and a touch of my own style. \
For me, tech isn't just about code; it's about creating something people can actually feel and enjoy using.";

const DEMO_QUESTIONS: [&str; 5] = [
    "What are my main skills and expertise?",
    "What technologies do I work with?",
    "Summarize my background and interests",
    "What are my programming languages?",
    "What are my main interests and passions?",
];

const DEMO_LOCAL_CONTENT: &str = "\
I am a passionate developer with expertise in Python, Django, React, and AI technologies. \
I love building full-stack applications and have experience with Web3 and blockchain development. \
My interests include machine learning, voice-based AI systems, and teaching programming. \
I enjoy working on creative projects that combine technology with real-world applications.";

/// 데모 명령어 (demo)
async fn cmd_demo() -> Result<()> {
    let node = open_node().await?;
    let k = node.default_top_k();

    println!("[*] 백엔드: {}", node.backend_kind());
    let outcome = node.ensure_ingested(DEMO_COLLECTION, DEMO_PROFILE).await?;
    println!("[OK] 데모 프로필 수집: {} 청크", outcome.chunks);

    let mut total = 0;
    let mut successful = 0;

    for (i, question) in DEMO_QUESTIONS.iter().enumerate() {
        println!("\n--- Query {} ---", i + 1);
        total += 1;
        match node.answer(DEMO_COLLECTION, question, k).await {
            Ok(passages) => {
                successful += 1;
                print_passages(question, &passages);
            }
            Err(e) => println!("[!] Query {} 실패: {}", i + 1, e),
        }
    }

    // 표기만 다른 같은 질문은 캐시 히트
    println!("\n[*] 정규화된 질문 재요청 (캐시 확인)");
    for question in DEMO_QUESTIONS {
        total += 1;
        let variant = format!("  {}  ", question.to_uppercase());
        if node.answer(DEMO_COLLECTION, &variant, k).await.is_ok() {
            successful += 1;
        }
    }

    println!("\n--- Local Content Query ---");
    total += 1;
    let question = "What are the main technologies and skills mentioned?";
    match node.query_local(DEMO_LOCAL_CONTENT, question, None).await {
        Ok(passages) => {
            successful += 1;
            print_passages(question, &passages);
        }
        Err(e) => println!("[!] 로컬 질의 실패: {}", e),
    }

    let stats = node.stats().await;
    println!("\n=== Demo Summary ===");
    println!("[*] 성공한 질의: {}/{}", successful, total);
    println!(
        "[*] 성공률: {:.1}%",
        successful as f64 / total as f64 * 100.0
    );
    println!(
        "[*] 캐시: {} 엔트리, 히트율 {:.1}%",
        stats.cache_size,
        stats.hit_rate * 100.0
    );

    if successful == 0 {
        bail!("데모 질의가 모두 실패했습니다");
    }
    Ok(())
}

// ============================================================================
// Status
// ============================================================================

/// 상태 명령어 (status)
async fn cmd_status(json: bool) -> Result<()> {
    let config = NodeConfig::from_env()?;

    if json {
        let node = QueryOrchestrator::from_config(&config).await?;
        let stats = node.stats().await;
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "config": config,
            "backend_kind": stats.backend_kind,
            "api_key": has_api_key(),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("data-query-node v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!(
        "[*] 청킹: {} 문자 / 오버랩 {}",
        config.chunk.max_characters, config.chunk.overlap_characters
    );
    match config.cache.ttl {
        Some(ttl) => println!(
            "[*] 캐시: 최대 {} 엔트리, TTL {}s",
            config.cache.max_entries,
            ttl.as_secs()
        ),
        None => println!("[*] 캐시: 최대 {} 엔트리, TTL 없음", config.cache.max_entries),
    }
    println!(
        "[*] 임베딩: {:?} ({} 차원)",
        config.embedding.provider, config.embedding.dimension
    );

    if config.embedding.provider == EmbedderKind::Gemini {
        if has_api_key() {
            println!("[OK] API 키: 설정됨");
        } else {
            println!("[!] API 키: 미설정");
            println!("    설정: export GEMINI_API_KEY=your-key");
        }
    }

    match &config.store.lance_uri {
        Some(uri) => println!("[*] 외부 벡터 DB: {}", uri),
        None => println!("[*] 외부 벡터 DB: 비활성"),
    }

    match QueryOrchestrator::from_config(&config).await {
        Ok(node) => println!("[OK] 선택된 백엔드: {}", node.backend_kind()),
        Err(e) => println!("[!] 노드 초기화 실패: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn print_passages(question: &str, passages: &[RankedPassage]) {
    if passages.is_empty() {
        println!("[!] '{}'에 대한 결과가 없습니다.", truncate_text(question, 40));
        return;
    }

    println!("[OK] '{}' 결과 ({} 건):", truncate_text(question, 40), passages.len());
    for passage in passages {
        println!(
            "  {}. [{:.3}] #{} {}",
            passage.rank,
            passage.score,
            passage.sequence,
            truncate_text(&passage.text, 80)
        );
    }
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
