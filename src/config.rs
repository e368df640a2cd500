use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::utils::retry::RetryPolicy;

/// 配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "SCAN_SORTER_CONFIG";
/// 未设置环境变量时尝试的默认配置文件
pub const DEFAULT_CONFIG_FILE: &str = "scan_sorter.toml";

/// OCR 引擎选择
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrEngineKind {
    /// 外部 `ocrmypdf` 进程
    Ocrmypdf,
    /// 只读取 PDF 自带的文字层
    TextLayer,
}

impl std::str::FromStr for OcrEngineKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ocrmypdf" => Ok(OcrEngineKind::Ocrmypdf),
            "text_layer" | "textlayer" | "text-layer" => Ok(OcrEngineKind::TextLayer),
            other => anyhow::bail!("未知的 OCR 引擎: {}", other),
        }
    }
}

/// 程序配置
///
/// 一次运行只使用一份配置，由入口函数创建后向下传递
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 扫描件输入目录
    pub intake_dir: PathBuf,
    /// 归档后的文档根目录（按类别分子目录）
    pub processed_dir: PathBuf,
    /// 原始扫描件归档目录
    pub archive_dir: PathBuf,
    /// 临时工作目录（每次运行建一个子目录）
    pub work_dir: PathBuf,
    /// 运行汇总报告目录
    pub summary_dir: PathBuf,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    pub llm_max_attempts: u32,
    pub llm_initial_backoff_ms: u64,
    pub llm_max_backoff_ms: u64,
    pub llm_timeout_secs: u64,
    // --- OCR 配置 ---
    pub ocr_engine: OcrEngineKind,
    pub ocr_command: String,
    pub ocr_language: String,
    pub ocr_timeout_secs: u64,
    // --- 并发与重试 ---
    pub max_concurrent_ocr: usize,
    pub max_concurrent_ordering: usize,
    pub filing_max_attempts: u32,
    /// 提示词中每页最多保留的字符数
    pub max_chars_per_page: usize,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            intake_dir: PathBuf::from("intake"),
            processed_dir: PathBuf::from("processed"),
            archive_dir: PathBuf::from("archive"),
            work_dir: PathBuf::from("work"),
            summary_dir: PathBuf::from("logs"),
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            llm_temperature: 0.1,
            llm_max_tokens: 4096,
            llm_max_attempts: 3,
            llm_initial_backoff_ms: 2_000,
            llm_max_backoff_ms: 30_000,
            llm_timeout_secs: 120,
            ocr_engine: OcrEngineKind::Ocrmypdf,
            ocr_command: "ocrmypdf".to_string(),
            ocr_language: "eng".to_string(),
            ocr_timeout_secs: 300,
            max_concurrent_ocr: 4,
            max_concurrent_ordering: 4,
            filing_max_attempts: 2,
            max_chars_per_page: 2_000,
            verbose_logging: false,
        }
    }
}

impl Config {
    /// 读取配置：TOML 文件（若存在）+ 环境变量覆盖
    pub fn load() -> Result<Self> {
        let explicit = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        let base = match explicit {
            Some(path) => Self::from_toml_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_toml_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        let config = base.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 只从环境变量读取（未设置的字段使用默认值）
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 从 TOML 文件读取，缺省字段使用默认值
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("无法解析配置文件: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn with_env_overrides(self) -> Self {
        Self {
            intake_dir: env_or("INTAKE_DIR", self.intake_dir),
            processed_dir: env_or("PROCESSED_DIR", self.processed_dir),
            archive_dir: env_or("ARCHIVE_DIR", self.archive_dir),
            work_dir: env_or("WORK_DIR", self.work_dir),
            summary_dir: env_or("SUMMARY_DIR", self.summary_dir),
            llm_api_key: env_or("LLM_API_KEY", self.llm_api_key),
            llm_api_base_url: env_or("LLM_API_BASE_URL", self.llm_api_base_url),
            llm_model_name: env_or("LLM_MODEL_NAME", self.llm_model_name),
            llm_temperature: env_or("LLM_TEMPERATURE", self.llm_temperature),
            llm_max_tokens: env_or("LLM_MAX_TOKENS", self.llm_max_tokens),
            llm_max_attempts: env_or("LLM_MAX_ATTEMPTS", self.llm_max_attempts),
            llm_initial_backoff_ms: env_or("LLM_INITIAL_BACKOFF_MS", self.llm_initial_backoff_ms),
            llm_max_backoff_ms: env_or("LLM_MAX_BACKOFF_MS", self.llm_max_backoff_ms),
            llm_timeout_secs: env_or("LLM_TIMEOUT_SECS", self.llm_timeout_secs),
            ocr_engine: env_or("OCR_ENGINE", self.ocr_engine),
            ocr_command: env_or("OCR_COMMAND", self.ocr_command),
            ocr_language: env_or("OCR_LANGUAGE", self.ocr_language),
            ocr_timeout_secs: env_or("OCR_TIMEOUT_SECS", self.ocr_timeout_secs),
            max_concurrent_ocr: env_or("MAX_CONCURRENT_OCR", self.max_concurrent_ocr),
            max_concurrent_ordering: env_or("MAX_CONCURRENT_ORDERING", self.max_concurrent_ordering),
            filing_max_attempts: env_or("FILING_MAX_ATTEMPTS", self.filing_max_attempts),
            max_chars_per_page: env_or("MAX_CHARS_PER_PAGE", self.max_chars_per_page),
            verbose_logging: env_or("VERBOSE_LOGGING", self.verbose_logging),
        }
    }

    /// 检查配置是否可用
    pub fn validate(&self) -> Result<()> {
        if self.llm_max_attempts == 0 || self.filing_max_attempts == 0 {
            anyhow::bail!("重试次数至少为 1");
        }
        if self.max_concurrent_ocr == 0 || self.max_concurrent_ordering == 0 {
            anyhow::bail!("并发数至少为 1");
        }
        if self.llm_timeout_secs == 0 || self.ocr_timeout_secs == 0 {
            anyhow::bail!("超时时间至少为 1 秒");
        }
        if self.intake_dir == self.processed_dir
            || self.intake_dir == self.archive_dir
            || self.processed_dir == self.archive_dir
        {
            anyhow::bail!("输入、归档、存档目录必须互不相同");
        }
        Ok(())
    }

    /// 模型调用的重试策略
    pub fn llm_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.llm_max_attempts,
            initial_backoff: Duration::from_millis(self.llm_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.llm_max_backoff_ms),
            timeout: Duration::from_secs(self.llm_timeout_secs),
        }
    }

    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr_timeout_secs)
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
