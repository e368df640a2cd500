//! OCR 服务 - 业务能力层
//!
//! 逐页调用 OCR 引擎；单页失败只记录在该页上，不中断批次

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::clients::OcrEngine;
use crate::config::Config;
use crate::error::OcrError;
use crate::infrastructure::pdf;
use crate::models::{Batch, Page, PageOcr};
use crate::utils::truncate_text;

pub struct OcrService {
    engine: Arc<dyn OcrEngine>,
    timeout: Duration,
    max_concurrent: usize,
    verbose_logging: bool,
}

impl OcrService {
    pub fn new(engine: Arc<dyn OcrEngine>, config: &Config) -> Self {
        Self {
            engine,
            timeout: config.ocr_timeout(),
            max_concurrent: config.max_concurrent_ocr.max(1),
            verbose_logging: config.verbose_logging,
        }
    }

    /// 识别批次中所有页面，结果按全局索引排列
    pub async fn recognize_batch(&self, batch: &Batch) -> Vec<(usize, PageOcr)> {
        info!(
            "🔤 开始 OCR ({}，并发 {})，共 {} 页",
            self.engine.name(),
            self.max_concurrent,
            batch.len()
        );

        let results: Vec<(usize, PageOcr)> = stream::iter(batch.pages().iter().map(Page::global_index))
            .map(|global_index| async move {
                let outcome = match self.recognize_page(batch, global_index).await {
                    Ok(ocr) => ocr,
                    Err(e) => {
                        warn!("[第 {} 页] ⚠️ OCR 失败，按空文本继续: {}", global_index, e);
                        PageOcr::failed(e.to_string())
                    }
                };
                (global_index, outcome)
            })
            .buffered(self.max_concurrent)
            .collect()
            .await;

        let failed = results.iter().filter(|(_, ocr)| ocr.ocr_failed).count();
        if failed > 0 {
            warn!("⚠️ {} 页 OCR 失败", failed);
        }
        info!("✓ OCR 完成: 成功 {}/{}", results.len() - failed, results.len());

        results
    }

    async fn recognize_page(&self, batch: &Batch, global_index: usize) -> Result<PageOcr, OcrError> {
        let page_id = batch.page_object_id(global_index).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("页面 {} 不在工作文档中", global_index),
            )
        })?;
        let mut single = pdf::extract_pages(batch.document(), &[page_id])?;
        let page_pdf = pdf::to_bytes(&mut single)?;

        let output = tokio::time::timeout(self.timeout, self.engine.recognize(&page_pdf))
            .await
            .map_err(|_| OcrError::Timeout {
                secs: self.timeout.as_secs(),
            })??;

        if output.text.is_empty() {
            warn!("[第 {} 页] ⚠️ 没有识别出文字", global_index);
        } else if self.verbose_logging {
            info!("[第 {} 页] {}", global_index, truncate_text(&output.text, 80));
        }
        debug!("[第 {} 页] 识别 {} 字符", global_index, output.text.chars().count());

        Ok(PageOcr {
            text: output.text,
            searchable_layer: (!output.searchable_layer.is_empty())
                .then_some(output.searchable_layer),
            ocr_failed: false,
            error: None,
        })
    }
}
