//! 错误类型
//!
//! 按作用域划分：
//! - 批次级（致命）：`IntakeError`、`GroupingError` → 汇总为 `PipelineError`
//! - 分组级（可降级）：`OrderingError`、`FilingError`
//! - 页面级（可降级）：`OcrError`
//! - 收尾：`ArchiveError`（只报告，不回滚）

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// 输入目录 / 合并阶段错误
#[derive(Debug, Error)]
pub enum IntakeError {
    /// 输入目录中没有 PDF（调用方应视为无事可做）
    #[error("输入目录中没有待处理的 PDF: {dir}")]
    IntakeEmpty { dir: PathBuf },

    /// 输入目录不存在
    #[error("输入目录不存在: {dir}")]
    DirectoryNotFound { dir: PathBuf },

    /// PDF 无法解析
    #[error("无法读取 PDF {path}: {source}")]
    UnreadablePdf {
        path: PathBuf,
        #[source]
        source: lopdf::Error,
    },

    /// 合并后的物理页数与页面记录不一致
    #[error("合并结果页数不一致: 记录 {expected} 页，工作文档 {actual} 页")]
    BatchDesync { expected: usize, actual: usize },

    /// 合并文档写出失败
    #[error("写入工作文档失败 ({path}): {source}")]
    WorkingDocument {
        path: PathBuf,
        #[source]
        source: lopdf::Error,
    },

    #[error("文件操作失败 ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// OCR 错误（页面级，降级为空文本）
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR 超时 ({secs} 秒)")]
    Timeout { secs: u64 },

    #[error("无法启动 OCR 程序 {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("OCR 程序退出码 {code:?}: {stderr}")]
    EngineFailed { code: Option<i32>, stderr: String },

    #[error("OCR 临时文件操作失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("OCR 输入/输出不是有效 PDF: {0}")]
    Pdf(#[from] lopdf::Error),
}

/// 分组结果违反划分不变量的具体情况
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionViolation {
    /// 模型没有返回任何分组
    NoGroups,
    /// 某个分组没有页面
    EmptyGroup { position: usize },
    /// 有页面没有被任何分组覆盖
    Missing(Vec<usize>),
    /// 有页面出现在多个分组（或同一分组中出现多次）
    Duplicate(Vec<usize>),
    /// 出现了本批次不存在的索引
    Unknown(Vec<i64>),
}

impl fmt::Display for PartitionViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionViolation::NoGroups => write!(f, "没有返回任何分组"),
            PartitionViolation::EmptyGroup { position } => {
                write!(f, "第 {} 个分组没有页面", position + 1)
            }
            PartitionViolation::Missing(indices) => write!(f, "缺少页面 {:?}", indices),
            PartitionViolation::Duplicate(indices) => write!(f, "页面重复 {:?}", indices),
            PartitionViolation::Unknown(indices) => write!(f, "未知页面 {:?}", indices),
        }
    }
}

/// 分组阶段错误（批次级，致命）
#[derive(Debug, Error)]
pub enum GroupingError {
    /// 模型返回的分组不是合法划分，不做任何修补
    #[error("分组结果无效: {0}")]
    GroupingInvalid(PartitionViolation),

    /// 重试耗尽仍无法得到可解析的结果
    #[error("分组服务不可用 (已尝试 {attempts} 次): {last_error}")]
    GroupingUnavailable { attempts: u32, last_error: String },
}

/// 排序阶段错误（分组级，回退到合并顺序）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderingError {
    #[error("排序结果格式错误: {0}")]
    Schema(String),

    #[error("排序结果不是分组页面的排列: 缺少 {missing:?}, 重复 {duplicate:?}, 越界 {foreign:?}")]
    NotBijection {
        missing: Vec<usize>,
        duplicate: Vec<usize>,
        foreign: Vec<i64>,
    },

    #[error("排序服务不可用 (已尝试 {attempts} 次): {last_error}")]
    Unavailable { attempts: u32, last_error: String },
}

/// 归档阶段错误（分组级，重试后报告）
#[derive(Debug, Error)]
pub enum FilingError {
    #[error("生成 PDF 失败: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("文件操作失败 ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("产物校验失败 ({path}): {reason}")]
    Validation { path: PathBuf, reason: String },

    #[error("页面索引 {0} 不在工作文档中")]
    PageOutOfRange(usize),

    #[error("无法为 {base} 找到不冲突的文件名")]
    NoFreeName { base: String },
}

/// 归档 / 清理错误（只报告）
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("归档 {path} 失败: {source}")]
    Move {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("清理临时目录 {path} 失败: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 批次级错误：运行终止于 `Failed`
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Intake(#[from] IntakeError),

    #[error(transparent)]
    Grouping(#[from] GroupingError),

    #[error("配置无效: {0}")]
    Config(String),

    #[error("所有 {count} 个分组均归档失败")]
    AllGroupsFailed { count: usize },
}

impl IntakeError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IntakeError::Io {
            path: path.into(),
            source,
        }
    }
}

impl FilingError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FilingError::Io {
            path: path.into(),
            source,
        }
    }
}

/// 批次级结果类型
pub type PipelineResult<T> = Result<T, PipelineError>;
