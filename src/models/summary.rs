//! 运行状态与运行汇总

use std::fmt::{self, Display, Write as _};
use std::path::PathBuf;

use crate::models::FiledDocument;

/// 单次运行的状态机
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Collecting,
    Merged,
    Ocred,
    Grouped,
    Ordering,
    Filing,
    Archiving,
    Done,
    Failed(String),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed(_))
    }
}

impl Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Collecting => write!(f, "Collecting"),
            RunState::Merged => write!(f, "Merged"),
            RunState::Ocred => write!(f, "OCRed"),
            RunState::Grouped => write!(f, "Grouped"),
            RunState::Ordering => write!(f, "Ordering"),
            RunState::Filing => write!(f, "Filing"),
            RunState::Archiving => write!(f, "Archiving"),
            RunState::Done => write!(f, "Done"),
            RunState::Failed(reason) => write!(f, "Failed({})", reason),
        }
    }
}

/// 回退到合并顺序的分组
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderFallback {
    pub group_id: usize,
    pub title: String,
    pub reason: String,
}

/// 归档失败的分组
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupFailure {
    pub group_id: usize,
    pub category: String,
    pub title: String,
    pub pages: Vec<usize>,
    pub reason: String,
}

/// 保留在输入目录的原件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// 运行汇总（用户可见）
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub state: RunState,
    pub total_pages: usize,
    pub filed: Vec<FiledDocument>,
    pub order_fallbacks: Vec<OrderFallback>,
    pub failed_groups: Vec<GroupFailure>,
    pub ocr_failed_pages: Vec<usize>,
    pub archived: Vec<PathBuf>,
    pub retained: Vec<RetainedFile>,
    pub archive_errors: Vec<String>,
}

impl RunSummary {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            state: RunState::Collecting,
            total_pages: 0,
            filed: Vec::new(),
            order_fallbacks: Vec::new(),
            failed_groups: Vec::new(),
            ocr_failed_pages: Vec::new(),
            archived: Vec::new(),
            retained: Vec::new(),
            archive_errors: Vec::new(),
        }
    }

    /// 所有已归档文档的页数之和
    pub fn pages_filed(&self) -> usize {
        self.filed.iter().map(|d| d.page_count).sum()
    }

    /// 渲染为 markdown
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "# 运行汇总 {}\n", self.run_id);
        let _ = writeln!(md, "- 状态: {}", self.state);
        let _ = writeln!(md, "- 页面总数: {}", self.total_pages);
        let _ = writeln!(md, "- 已归档页数: {}\n", self.pages_filed());

        let _ = writeln!(md, "## 已归档文档\n");
        if self.filed.is_empty() {
            let _ = writeln!(md, "（无）");
        }
        for doc in &self.filed {
            let _ = writeln!(
                md,
                "- [{}] {} / {}: {} 页 → `{}`",
                doc.group_id,
                doc.category,
                doc.title,
                doc.page_count,
                doc.output_pdf_path.display()
            );
        }

        if !self.order_fallbacks.is_empty() {
            let _ = writeln!(md, "\n## 保留原顺序的分组\n");
            for fb in &self.order_fallbacks {
                let _ = writeln!(md, "- [{}] {}: {}", fb.group_id, fb.title, fb.reason);
            }
        }

        if !self.failed_groups.is_empty() {
            let _ = writeln!(md, "\n## 归档失败的分组\n");
            for failure in &self.failed_groups {
                let _ = writeln!(
                    md,
                    "- [{}] {} / {} 页面 {:?}: {}",
                    failure.group_id,
                    failure.category,
                    failure.title,
                    failure.pages,
                    failure.reason
                );
            }
        }

        if !self.ocr_failed_pages.is_empty() {
            let _ = writeln!(md, "\n## OCR 失败的页面\n");
            let _ = writeln!(md, "{:?}", self.ocr_failed_pages);
        }

        let _ = writeln!(md, "\n## 原件\n");
        for path in &self.archived {
            let _ = writeln!(md, "- 已存档: `{}`", path.display());
        }
        for retained in &self.retained {
            let _ = writeln!(
                md,
                "- 保留: `{}` ({})",
                retained.path.display(),
                retained.reason
            );
        }
        for err in &self.archive_errors {
            let _ = writeln!(md, "- 错误: {}", err);
        }

        md
    }
}
