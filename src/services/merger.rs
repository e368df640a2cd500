//! 合并服务
//!
//! 把输入目录中的所有 PDF 按文件名顺序合并为一份工作文档，
//! 并为每一页分配全局索引

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{info, warn};

use crate::error::IntakeError;
use crate::infrastructure::pdf;
use crate::models::{Batch, Page};

/// 工作文档文件名
pub const WORKING_PDF_NAME: &str = "merged.pdf";

/// 扫描输入目录，返回按文件名排序的 PDF 列表
pub async fn collect_intake(dir: &Path) -> Result<Vec<PathBuf>, IntakeError> {
    if !dir.exists() {
        return Err(IntakeError::DirectoryNotFound {
            dir: dir.to_path_buf(),
        });
    }

    let mut files = Vec::new();
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| IntakeError::io(dir, e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| IntakeError::io(dir, e))?
    {
        let path = entry.path();
        let is_pdf = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
        if is_pdf && path.is_file() {
            files.push(path);
        }
    }

    if files.is_empty() {
        return Err(IntakeError::IntakeEmpty {
            dir: dir.to_path_buf(),
        });
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// 合并器
pub struct Merger;

impl Merger {
    /// 合并输入文件，工作文档写入 `work_dir`
    ///
    /// 任一文件无法解析时整批失败，不跳过任何页面
    pub async fn merge(files: Vec<PathBuf>, work_dir: &Path) -> Result<Batch, IntakeError> {
        let mut documents = Vec::with_capacity(files.len());
        let mut pages = Vec::new();

        for path in &files {
            let bytes = fs::read(path).await.map_err(|e| IntakeError::io(path, e))?;
            let doc = pdf::load_pdf(&bytes).map_err(|source| IntakeError::UnreadablePdf {
                path: path.clone(),
                source,
            })?;

            let page_count = doc.get_pages().len();
            if page_count == 0 {
                warn!("⚠️ 文件没有页面: {}", path.display());
            }
            info!(
                "正在合并: {} ({} 页)",
                path.file_name().unwrap_or_default().to_string_lossy(),
                page_count
            );

            for origin_page_index in 0..page_count {
                let global_index = pages.len();
                pages.push(Page::new(path.clone(), origin_page_index, global_index));
            }
            documents.push(doc);
        }

        if pages.is_empty() {
            return Err(IntakeError::IntakeEmpty {
                dir: files
                    .first()
                    .and_then(|p| p.parent())
                    .map(Path::to_path_buf)
                    .unwrap_or_default(),
            });
        }

        let working_pdf = work_dir.join(WORKING_PDF_NAME);
        let mut merged =
            pdf::merge_documents(documents).map_err(|source| IntakeError::WorkingDocument {
                path: working_pdf.clone(),
                source,
            })?;
        let bytes = pdf::to_bytes(&mut merged).map_err(|source| IntakeError::WorkingDocument {
            path: working_pdf.clone(),
            source,
        })?;
        fs::write(&working_pdf, bytes)
            .await
            .map_err(|e| IntakeError::io(&working_pdf, e))?;

        let batch = Batch::new(pages, files, merged)?;
        info!("✓ 合并完成，共 {} 页", batch.len());
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::pdf::fixtures::{markers, sample_bytes};

    #[tokio::test]
    async fn test_collect_sorts_by_name_and_filters_pdf() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.pdf"), sample_bytes(&[600])).unwrap();
        std::fs::write(dir.path().join("a.PDF"), sample_bytes(&[601])).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let files = collect_intake(dir.path()).await.unwrap();

        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.PDF", "b.pdf"]);
    }

    #[tokio::test]
    async fn test_collect_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let result = collect_intake(dir.path()).await;
        assert!(matches!(result, Err(IntakeError::IntakeEmpty { .. })));
    }

    #[tokio::test]
    async fn test_collect_missing_dir() {
        let result = collect_intake(Path::new("/nonexistent/intake")).await;
        assert!(matches!(result, Err(IntakeError::DirectoryNotFound { .. })));
    }

    #[tokio::test]
    async fn test_merge_assigns_global_indices() {
        let intake = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let a = intake.path().join("a.pdf");
        let b = intake.path().join("b.pdf");
        std::fs::write(&a, sample_bytes(&[600, 601, 602])).unwrap();
        std::fs::write(&b, sample_bytes(&[603, 604])).unwrap();

        let batch = Merger::merge(vec![a.clone(), b.clone()], work.path())
            .await
            .unwrap();

        assert_eq!(batch.len(), 5);
        assert_eq!(batch.page(3).unwrap().origin_file(), b.as_path());
        assert_eq!(batch.page(3).unwrap().origin_page_index(), 0);
        assert_eq!(batch.page(2).unwrap().origin_page_index(), 2);
        assert_eq!(markers(batch.document()), vec![600, 601, 602, 603, 604]);
        assert!(work.path().join(WORKING_PDF_NAME).exists());
        assert_eq!(batch.indices_of_file(&a).len(), 3);
    }

    #[tokio::test]
    async fn test_merge_rejects_corrupt_file() {
        let intake = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let good = intake.path().join("a.pdf");
        let bad = intake.path().join("b.pdf");
        std::fs::write(&good, sample_bytes(&[600])).unwrap();
        std::fs::write(&bad, b"%PDF-1.4 truncated garbage").unwrap();

        let result = Merger::merge(vec![good, bad.clone()], work.path()).await;

        match result {
            Err(IntakeError::UnreadablePdf { path, .. }) => assert_eq!(path, bad),
            other => panic!("应当是 UnreadablePdf, 实际: {:?}", other.map(|b| b.len())),
        }
    }
}
