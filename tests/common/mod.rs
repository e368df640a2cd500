//! 集成测试共用的假实现和测试文档
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use scan_sorter::error::OcrError;
use scan_sorter::services::GROUPING_SYSTEM_PROMPT;
use scan_sorter::{ChatModel, Config, OcrEngine, OcrOutput};

/// 生成测试 PDF：每页的 MediaBox 宽度即该页的标记
pub fn scan_pdf(markers: &[i64]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });

    let mut kids = Vec::new();
    for marker in markers {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(24)]),
                Operation::new("Td", vec![Object::Integer(72), Object::Integer(700)]),
                Operation::new("Tj", vec![Object::string_literal(format!("Scan {}", marker))]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "Contents" => Object::Reference(content_id),
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(*marker),
                Object::Integer(842),
            ],
        });
        kids.push(Object::Reference(page_id));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => markers.len() as i64,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => Object::Reference(font_id) },
            },
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

fn marker_of(doc: &Document, page_id: ObjectId) -> i64 {
    doc.get_dictionary(page_id)
        .and_then(|page| page.get(b"MediaBox"))
        .and_then(Object::as_array)
        .and_then(|mediabox| mediabox[2].as_i64())
        .unwrap()
}

/// 按页序读取 PDF 文件中的标记
pub fn markers_in(path: &Path) -> Vec<i64> {
    let doc = Document::load(path).unwrap();
    doc.get_pages()
        .into_values()
        .map(|id| marker_of(&doc, id))
        .collect()
}

/// 目录下的文件名（排序后），目录不存在时为空
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// 测试目录布局
pub struct Workspace {
    pub root: tempfile::TempDir,
    pub config: Config,
}

impl Workspace {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let base = root.path();
        let config = Config {
            intake_dir: base.join("intake"),
            processed_dir: base.join("processed"),
            archive_dir: base.join("archive"),
            work_dir: base.join("work"),
            summary_dir: base.join("logs"),
            llm_max_attempts: 2,
            llm_initial_backoff_ms: 1,
            llm_max_backoff_ms: 2,
            llm_timeout_secs: 5,
            ocr_timeout_secs: 5,
            filing_max_attempts: 2,
            ..Config::default()
        };
        std::fs::create_dir_all(&config.intake_dir).unwrap();
        Self { root, config }
    }

    pub fn add_intake(&self, name: &str, markers: &[i64]) -> PathBuf {
        let path = self.config.intake_dir.join(name);
        std::fs::write(&path, scan_pdf(markers)).unwrap();
        path
    }

    pub fn category_dir(&self, category: &str) -> PathBuf {
        self.config.processed_dir.join(category)
    }
}

/// 按脚本回复的模型
///
/// 分组请求返回固定回复；排序请求按提示词中的 `page_indices` 匹配回复
pub struct ScriptedModel {
    grouping: String,
    ordering: Vec<(String, String)>,
    pub grouping_calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(grouping: &str) -> Self {
        Self {
            grouping: grouping.to_string(),
            ordering: Vec::new(),
            grouping_calls: AtomicUsize::new(0),
        }
    }

    /// `indices` 形如 `[2,3,4]`
    pub fn order(mut self, indices: &str, response: &str) -> Self {
        self.ordering
            .push((format!("page_indices: {}", indices), response.to_string()));
        self
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, system_message: &str, user_message: &str) -> anyhow::Result<String> {
        if system_message == GROUPING_SYSTEM_PROMPT {
            self.grouping_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(self.grouping.clone());
        }
        self.ordering
            .iter()
            .find(|(needle, _)| user_message.contains(needle.as_str()))
            .map(|(_, response)| response.clone())
            .ok_or_else(|| anyhow::anyhow!("没有匹配的脚本"))
    }
}

/// 把页面标记当作识别文本的 OCR 引擎
pub struct MarkerOcr;

#[async_trait]
impl OcrEngine for MarkerOcr {
    fn name(&self) -> &str {
        "marker"
    }

    async fn recognize(&self, page_pdf: &[u8]) -> Result<OcrOutput, OcrError> {
        let doc = Document::load_mem(page_pdf)?;
        let text = doc
            .get_pages()
            .into_values()
            .map(|id| format!("Scan {}", marker_of(&doc, id)))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(OcrOutput {
            text,
            searchable_layer: page_pdf.to_vec(),
        })
    }
}

pub const SCENARIO_GROUPING: &str = r#"```json
{"groups": [
  {"category": "Invoice", "title": "Acme", "pages": [0, 1]},
  {"category": "Travel", "title": "Boarding Pass", "pages": [2, 3, 4]}
]}
```"#;
