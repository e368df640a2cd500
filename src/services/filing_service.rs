//! 归档服务 - 业务能力层
//!
//! 把一个带页序的分组写成三件产物（PDF、可搜索 PDF、报告），
//! 先写暂存目录并校验，再以不覆盖的方式提交到 `processed/<类别>/`

use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use lopdf::Document;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::FilingError;
use crate::infrastructure::{link_no_clobber, pdf};
use crate::models::{Batch, FiledDocument, OrderSource, OrderedGroup};
use crate::workflow::RunCtx;

/// 类别 / 标题各自在文件名中的字节上限
pub const MAX_COMPONENT_BYTES: usize = 100;

/// 单个文件名的字节上限（常见文件系统均为 255 字节）
pub const MAX_FILE_NAME_BYTES: usize = 255;

/// 三件产物中最长的文件名后缀
const LONGEST_SUFFIX: &str = "_searchable.pdf";

/// 同名冲突时最多尝试的区分编号
const MAX_DISCRIMINATOR: u32 = 999;

/// 把类别 / 标题转换为文件名片段
///
/// 只保留字母数字，按单词首字母大写拼接，长度按字节截断在字符边界上；
/// 结果为空时返回 `Unknown`
pub fn sanitize_component(raw: &str) -> String {
    let mut out = String::new();
    for word in raw.split(|c: char| !c.is_alphanumeric()) {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.extend(chars);
        }
    }

    let out = truncate_to_bytes(&out, MAX_COMPONENT_BYTES);
    if out.is_empty() {
        "Unknown".to_string()
    } else {
        out.to_string()
    }
}

/// 拼出 `类别_标题_时间戳`
///
/// 加上最大区分编号和最长后缀后，文件名仍不超过 `MAX_FILE_NAME_BYTES`；
/// 超出时截短标题
pub fn file_stem(category: &str, title: &str, timestamp: &str) -> String {
    let reserved = LONGEST_SUFFIX.len()
        + format!("_{}", MAX_DISCRIMINATOR).len()
        + timestamp.len()
        + 2;
    let title_budget = MAX_FILE_NAME_BYTES
        .saturating_sub(reserved)
        .saturating_sub(category.len());
    format!(
        "{}_{}_{}",
        category,
        truncate_to_bytes(title, title_budget),
        timestamp
    )
}

fn truncate_to_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// 暂存目录中的三件产物
struct StagedTriple {
    output_pdf: PathBuf,
    searchable_pdf: PathBuf,
    report: PathBuf,
}

impl StagedTriple {
    fn in_dir(dir: &Path) -> Self {
        Self {
            output_pdf: dir.join("output.pdf"),
            searchable_pdf: dir.join("searchable.pdf"),
            report: dir.join("report.md"),
        }
    }

    fn paths(&self) -> [&Path; 3] {
        [&self.output_pdf, &self.searchable_pdf, &self.report]
    }
}

/// 归档器
pub struct Filer {
    processed_dir: PathBuf,
    max_attempts: u32,
}

impl Filer {
    pub fn new(config: &Config) -> Self {
        Self {
            processed_dir: config.processed_dir.clone(),
            max_attempts: config.filing_max_attempts.max(1),
        }
    }

    /// 归档一个分组，失败时按配置重试
    pub async fn file(
        &self,
        batch: &Batch,
        ordered: &OrderedGroup,
        ctx: &RunCtx,
    ) -> Result<FiledDocument, FilingError> {
        let group_id = ordered.group.group_id;
        let mut attempt = 1;
        loop {
            match self.try_file(batch, ordered, ctx, attempt).await {
                Ok(doc) => {
                    info!(
                        "[分组 {}] ✅ 已归档: {}",
                        group_id,
                        doc.output_pdf_path.display()
                    );
                    return Ok(doc);
                }
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        "[分组 {}] ⚠️ 第 {}/{} 次归档失败，重试: {}",
                        group_id, attempt, self.max_attempts, e
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_file(
        &self,
        batch: &Batch,
        ordered: &OrderedGroup,
        ctx: &RunCtx,
        attempt: u32,
    ) -> Result<FiledDocument, FilingError> {
        let group = &ordered.group;
        let stage_dir = ctx
            .staging_dir
            .join(format!("group_{}_attempt_{}", group.group_id, attempt));
        fs::create_dir_all(&stage_dir)
            .await
            .map_err(|e| FilingError::io(&stage_dir, e))?;

        let result = self.stage_and_commit(batch, ordered, ctx, &stage_dir).await;

        if let Err(e) = fs::remove_dir_all(&stage_dir).await {
            debug!("清理暂存目录失败 {}: {}", stage_dir.display(), e);
        }
        result
    }

    async fn stage_and_commit(
        &self,
        batch: &Batch,
        ordered: &OrderedGroup,
        ctx: &RunCtx,
        stage_dir: &Path,
    ) -> Result<FiledDocument, FilingError> {
        let group = &ordered.group;
        let page_count = ordered.ordered_indices.len();
        let staged = StagedTriple::in_dir(stage_dir);

        // 1. 按页序抽取原始页面
        let page_ids = ordered
            .ordered_indices
            .iter()
            .map(|&idx| batch.page_object_id(idx).ok_or(FilingError::PageOutOfRange(idx)))
            .collect::<Result<Vec<_>, _>>()?;
        let mut output = pdf::extract_pages(batch.document(), &page_ids)?;
        write_staged(&staged.output_pdf, pdf::to_bytes(&mut output)?).await?;

        // 2. 可搜索版本
        let mut searchable = build_searchable(batch, &ordered.ordered_indices)?;
        write_staged(&staged.searchable_pdf, pdf::to_bytes(&mut searchable)?).await?;

        // 3. 报告
        let report = build_report(batch, ordered, &ctx.timestamp);
        write_staged(&staged.report, report.into_bytes()).await?;

        // 4. 校验
        validate_pdf(&staged.output_pdf, page_count).await?;
        validate_pdf(&staged.searchable_pdf, page_count).await?;
        validate_non_empty(&staged.report).await?;

        // 5. 提交
        let category = sanitize_component(&group.category);
        let category_dir = self.processed_dir.join(&category);
        let base = file_stem(&category, &sanitize_component(&group.title), &ctx.timestamp);
        let [output_pdf_path, searchable_pdf_path, report_path] =
            commit_triple(&staged, &category_dir, &base).await?;

        Ok(FiledDocument {
            group_id: group.group_id,
            output_pdf_path,
            searchable_pdf_path,
            report_path,
            category: group.category.clone(),
            title: group.title.clone(),
            timestamp: ctx.timestamp.clone(),
            page_count,
        })
    }
}

async fn write_staged(path: &Path, bytes: Vec<u8>) -> Result<(), FilingError> {
    fs::write(path, bytes)
        .await
        .map_err(|e| FilingError::io(path, e))
}

/// 拼装可搜索版本：有 OCR 文字层的页面用文字层，否则用原始页面
fn build_searchable(batch: &Batch, ordered_indices: &[usize]) -> Result<Document, FilingError> {
    let mut pages = Vec::with_capacity(ordered_indices.len());
    for &idx in ordered_indices {
        let layer = batch
            .page(idx)
            .and_then(|p| p.searchable_layer())
            .and_then(|bytes| match pdf::load_pdf(bytes) {
                Ok(doc) => Some(doc),
                Err(e) => {
                    warn!("[第 {} 页] ⚠️ 文字层无法读取，使用原始页面: {}", idx, e);
                    None
                }
            });

        let single = match layer {
            Some(doc) => match pdf::page_ids(&doc).first() {
                Some(&first) => pdf::extract_pages(&doc, &[first])?,
                None => original_page(batch, idx)?,
            },
            None => original_page(batch, idx)?,
        };
        pages.push(single);
    }
    Ok(pdf::merge_documents(pages)?)
}

fn original_page(batch: &Batch, idx: usize) -> Result<Document, FilingError> {
    let page_id = batch
        .page_object_id(idx)
        .ok_or(FilingError::PageOutOfRange(idx))?;
    Ok(pdf::extract_pages(batch.document(), &[page_id])?)
}

/// 渲染单个文档的 markdown 报告
fn build_report(batch: &Batch, ordered: &OrderedGroup, timestamp: &str) -> String {
    let group = &ordered.group;
    let mut md = String::new();

    let _ = writeln!(md, "# {} / {}\n", group.category, group.title);
    let _ = writeln!(md, "- 类别: {}", group.category);
    let _ = writeln!(md, "- 标题: {}", group.title);
    let _ = writeln!(md, "- 时间: {}", timestamp);
    let _ = writeln!(md, "- 页数: {}", ordered.ordered_indices.len());
    let order_note = match &ordered.source {
        OrderSource::Model => "模型排序".to_string(),
        OrderSource::Trivial => "单页".to_string(),
        OrderSource::Fallback(reason) => format!("合并顺序（回退原因: {}）", reason),
    };
    let _ = writeln!(md, "- 页序: {}\n", order_note);

    let _ = writeln!(md, "## 来源\n");
    let _ = writeln!(md, "| 位置 | 全局页码 | 原文件 | 原页码 |");
    let _ = writeln!(md, "|---|---|---|---|");
    for (position, &idx) in ordered.ordered_indices.iter().enumerate() {
        if let Some(page) = batch.page(idx) {
            let _ = writeln!(
                md,
                "| {} | {} | {} | {} |",
                position + 1,
                idx,
                page.origin_name(),
                page.origin_page_index() + 1
            );
        }
    }

    let warnings: Vec<(usize, String)> = ordered
        .ordered_indices
        .iter()
        .filter_map(|&idx| {
            let page = batch.page(idx)?;
            if page.ocr_failed() {
                let reason = page
                    .ocr()
                    .and_then(|o| o.error.clone())
                    .unwrap_or_default();
                Some((idx, format!("OCR 失败: {}", reason)))
            } else if page.text().trim().is_empty() {
                Some((idx, "没有识别出文字".to_string()))
            } else {
                None
            }
        })
        .collect();
    if !warnings.is_empty() {
        let _ = writeln!(md, "\n## OCR 警告\n");
        for (idx, warning) in warnings {
            let _ = writeln!(md, "- 全局页码 {}: {}", idx, warning);
        }
    }

    let _ = writeln!(md, "\n## 页面文本\n");
    for (position, &idx) in ordered.ordered_indices.iter().enumerate() {
        let text = batch.page(idx).map(|p| p.text()).unwrap_or("");
        let _ = writeln!(md, "### 第 {} 页（全局页码 {}）\n", position + 1, idx);
        let _ = writeln!(md, "{}\n", text.trim());
    }

    md
}

async fn validate_non_empty(path: &Path) -> Result<u64, FilingError> {
    let size = fs::metadata(path)
        .await
        .map_err(|e| FilingError::io(path, e))?
        .len();
    if size == 0 {
        return Err(FilingError::Validation {
            path: path.to_path_buf(),
            reason: "文件大小为 0".to_string(),
        });
    }
    Ok(size)
}

async fn validate_pdf(path: &Path, expected_pages: usize) -> Result<(), FilingError> {
    validate_non_empty(path).await?;
    let bytes = fs::read(path).await.map_err(|e| FilingError::io(path, e))?;
    let doc = pdf::load_pdf(&bytes).map_err(|e| FilingError::Validation {
        path: path.to_path_buf(),
        reason: format!("无法打开: {}", e),
    })?;
    let actual = doc.get_pages().len();
    if actual != expected_pages {
        return Err(FilingError::Validation {
            path: path.to_path_buf(),
            reason: format!("页数 {} 与预期 {} 不符", actual, expected_pages),
        });
    }
    Ok(())
}

/// 为三件产物找一个都不存在的名字并提交
///
/// 任意一件链接失败时撤销已提交的部分
async fn commit_triple(
    staged: &StagedTriple,
    category_dir: &Path,
    base: &str,
) -> Result<[PathBuf; 3], FilingError> {
    fs::create_dir_all(category_dir)
        .await
        .map_err(|e| FilingError::io(category_dir, e))?;

    for n in 1..=MAX_DISCRIMINATOR {
        let stem = if n == 1 {
            base.to_string()
        } else {
            format!("{}_{}", base, n)
        };
        let targets = [
            category_dir.join(format!("{}.pdf", stem)),
            category_dir.join(format!("{}_searchable.pdf", stem)),
            category_dir.join(format!("{}.md", stem)),
        ];
        if targets.iter().any(|t| t.exists()) {
            continue;
        }

        match link_all(&staged.paths(), &targets).await {
            Ok(()) => return Ok(targets),
            Err((path, e)) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("目标已被占用，换下一个编号: {}", path.display());
            }
            Err((path, e)) => return Err(FilingError::io(path, e)),
        }
    }

    Err(FilingError::NoFreeName {
        base: base.to_string(),
    })
}

async fn link_all(sources: &[&Path; 3], targets: &[PathBuf; 3]) -> Result<(), (PathBuf, std::io::Error)> {
    let mut committed: Vec<&Path> = Vec::with_capacity(targets.len());
    for (src, dst) in sources.iter().zip(targets.iter()) {
        if let Err(e) = link_no_clobber(src, dst).await {
            for done in committed {
                if let Err(rm) = fs::remove_file(done).await {
                    warn!("⚠️ 撤销已提交文件失败 {}: {}", done.display(), rm);
                }
            }
            return Err((dst.clone(), e));
        }
        committed.push(dst.as_path());
    }
    Ok(())
}
