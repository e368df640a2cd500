use std::path::PathBuf;

/// 已归档文档（提交后不会再被覆盖）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiledDocument {
    pub group_id: usize,
    pub output_pdf_path: PathBuf,
    pub searchable_pdf_path: PathBuf,
    pub report_path: PathBuf,
    pub category: String,
    pub title: String,
    pub timestamp: String,
    /// 写入的页数（按页序）
    pub page_count: usize,
}
