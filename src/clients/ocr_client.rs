//! OCR 客户端
//!
//! 输入是一页扫描件（单页 PDF），输出文本和可搜索的单页 PDF

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::Config;
use crate::error::OcrError;
use crate::infrastructure::pdf;
use crate::utils::truncate_text;

/// `ocrmypdf --skip-text` 跳过已有文字层的页面时写入 sidecar 的提示
const SKIPPED_MARKER: &str = "[OCR skipped on page";

/// OCR 输出
#[derive(Debug, Clone, Default)]
pub struct OcrOutput {
    pub text: String,
    /// 带文字层的单页 PDF
    pub searchable_layer: Vec<u8>,
}

/// OCR 引擎
///
/// 每页独立调用，不保留跨页状态
#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn recognize(&self, page_pdf: &[u8]) -> Result<OcrOutput, OcrError>;
}

/// 调用外部 `ocrmypdf` 进程
pub struct OcrMyPdfEngine {
    command: String,
    language: String,
}

impl OcrMyPdfEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            command: config.ocr_command.clone(),
            language: config.ocr_language.clone(),
        }
    }
}

#[async_trait]
impl OcrEngine for OcrMyPdfEngine {
    fn name(&self) -> &str {
        "ocrmypdf"
    }

    async fn recognize(&self, page_pdf: &[u8]) -> Result<OcrOutput, OcrError> {
        let scratch = tempfile::tempdir()?;
        let input = scratch.path().join("page.pdf");
        let output = scratch.path().join("page.ocr.pdf");
        let sidecar = scratch.path().join("page.txt");
        tokio::fs::write(&input, page_pdf).await?;

        debug!("运行 {} (语言: {})", self.command, self.language);

        let result = Command::new(&self.command)
            .arg("-l")
            .arg(&self.language)
            .arg("--skip-text")
            .arg("--output-type")
            .arg("pdf")
            .arg("--sidecar")
            .arg(&sidecar)
            .arg(&input)
            .arg(&output)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| OcrError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        if !result.status.success() {
            return Err(OcrError::EngineFailed {
                code: result.status.code(),
                stderr: truncate_text(String::from_utf8_lossy(&result.stderr).trim(), 500),
            });
        }

        let searchable_layer = tokio::fs::read(&output).await?;
        let sidecar_text = tokio::fs::read_to_string(&sidecar).await.unwrap_or_default();

        // 已有文字层的页面不会被识别，直接读取原文字层
        let text = if sidecar_text.contains(SKIPPED_MARKER) {
            extract_text_layer(page_pdf)?
        } else {
            sidecar_text
        };

        Ok(OcrOutput {
            text: text.trim().to_string(),
            searchable_layer,
        })
    }
}

/// 只读取 PDF 自带的文字层（适用于电子版文档）
#[derive(Debug, Default)]
pub struct TextLayerEngine;

#[async_trait]
impl OcrEngine for TextLayerEngine {
    fn name(&self) -> &str {
        "text_layer"
    }

    async fn recognize(&self, page_pdf: &[u8]) -> Result<OcrOutput, OcrError> {
        let text = extract_text_layer(page_pdf)?;
        Ok(OcrOutput {
            text: text.trim().to_string(),
            searchable_layer: page_pdf.to_vec(),
        })
    }
}

fn extract_text_layer(page_pdf: &[u8]) -> Result<String, OcrError> {
    let doc = pdf::load_pdf(page_pdf)?;
    let page_numbers: Vec<u32> = doc.get_pages().into_keys().collect();
    Ok(doc.extract_text(&page_numbers)?)
}
