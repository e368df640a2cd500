//! 页面存储：合并后的批次与页面记录

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use lopdf::{Document, ObjectId};

use crate::error::IntakeError;

/// 单页 OCR 结果
#[derive(Debug, Clone, Default)]
pub struct PageOcr {
    /// 识别出的文本（失败时为空）
    pub text: String,
    /// 可搜索的单页 PDF（失败时为空，归档时回退到原始页面）
    pub searchable_layer: Option<Vec<u8>>,
    pub ocr_failed: bool,
    pub error: Option<String>,
}

impl PageOcr {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            searchable_layer: None,
            ocr_failed: true,
            error: Some(error.into()),
        }
    }
}

/// 页面记录
///
/// 合并时创建，`global_index` 是跨阶段唯一可信的页面标识
#[derive(Debug, Clone)]
pub struct Page {
    origin_file: PathBuf,
    origin_page_index: usize,
    global_index: usize,
    ocr: Option<PageOcr>,
}

impl Page {
    pub fn new(origin_file: PathBuf, origin_page_index: usize, global_index: usize) -> Self {
        Self {
            origin_file,
            origin_page_index,
            global_index,
            ocr: None,
        }
    }

    pub fn origin_file(&self) -> &Path {
        &self.origin_file
    }

    /// 在原文件中的页码（从 0 开始）
    pub fn origin_page_index(&self) -> usize {
        self.origin_page_index
    }

    pub fn global_index(&self) -> usize {
        self.global_index
    }

    /// OCR 文本，未识别或失败时为空串
    pub fn text(&self) -> &str {
        self.ocr.as_ref().map(|o| o.text.as_str()).unwrap_or("")
    }

    pub fn ocr_failed(&self) -> bool {
        self.ocr.as_ref().map(|o| o.ocr_failed).unwrap_or(false)
    }

    pub fn searchable_layer(&self) -> Option<&[u8]> {
        self.ocr.as_ref().and_then(|o| o.searchable_layer.as_deref())
    }

    pub fn ocr(&self) -> Option<&PageOcr> {
        self.ocr.as_ref()
    }

    /// 原文件名（用于日志和报告）
    pub fn origin_name(&self) -> String {
        self.origin_file
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }
}

/// 一次运行的批次
///
/// 持有合并后的工作文档，页面 `global_index` 与工作文档的物理页序一一对应
#[derive(Debug)]
pub struct Batch {
    pages: Vec<Page>,
    intake_files: Vec<PathBuf>,
    document: Document,
    page_ids: Vec<ObjectId>,
}

impl Batch {
    /// 创建批次，并检查工作文档页数与页面记录一致
    pub fn new(
        pages: Vec<Page>,
        intake_files: Vec<PathBuf>,
        document: Document,
    ) -> Result<Self, IntakeError> {
        let page_ids: Vec<ObjectId> = document.get_pages().into_values().collect();
        if page_ids.len() != pages.len() {
            return Err(IntakeError::BatchDesync {
                expected: pages.len(),
                actual: page_ids.len(),
            });
        }
        if let Some((position, page)) = pages
            .iter()
            .enumerate()
            .find(|(position, page)| page.global_index != *position)
        {
            return Err(IntakeError::BatchDesync {
                expected: position,
                actual: page.global_index,
            });
        }

        Ok(Self {
            pages,
            intake_files,
            document,
            page_ids,
        })
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page(&self, global_index: usize) -> Option<&Page> {
        self.pages.get(global_index)
    }

    /// 全部页面索引
    pub fn index_set(&self) -> BTreeSet<usize> {
        (0..self.pages.len()).collect()
    }

    pub fn intake_files(&self) -> &[PathBuf] {
        &self.intake_files
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// 页面在工作文档中的对象 ID
    pub fn page_object_id(&self, global_index: usize) -> Option<ObjectId> {
        self.page_ids.get(global_index).copied()
    }

    /// 某个原文件贡献的所有页面索引
    pub fn indices_of_file(&self, file: &Path) -> BTreeSet<usize> {
        self.pages
            .iter()
            .filter(|p| p.origin_file == file)
            .map(|p| p.global_index)
            .collect()
    }

    /// 写入 OCR 结果，每页只写一次
    pub fn attach_ocr(&mut self, results: Vec<(usize, PageOcr)>) {
        for (global_index, ocr) in results {
            if let Some(page) = self.pages.get_mut(global_index) {
                if page.ocr.is_none() {
                    page.ocr = Some(ocr);
                }
            }
        }
    }

    /// OCR 失败的页面
    pub fn ocr_failed_indices(&self) -> Vec<usize> {
        self.pages
            .iter()
            .filter(|p| p.ocr_failed())
            .map(|p| p.global_index)
            .collect()
    }
}
