//! 批次处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责驱动一次运行的状态机。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：校验配置、创建模型客户端与 OCR 引擎
//! 2. **收集与合并**：扫描输入目录，合并为一个批次
//! 3. **OCR 与分组**：批次级阶段，失败即终止本次运行
//! 4. **排序与归档**：分组级阶段，单个分组失败不影响其他分组
//! 5. **存档与清理**：只移走完全归档的原件，删除临时文件
//! 6. **运行汇总**：写入 `summary_dir/run_<id>.md` 并输出统计
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单个分组的细节，委托给 `GroupFlow`
//! - **资源所有者**：唯一持有模型客户端和 OCR 引擎的模块

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;
use tracing::{error, info, warn};

use crate::clients::{ocr_engine_from_config, ChatModel, OcrEngine, OpenAiChatModel};
use crate::config::Config;
use crate::error::{IntakeError, PipelineError, PipelineResult};
use crate::models::{RetainedFile, RunState, RunSummary};
use crate::services::{cleanup, collect_intake, Archiver, GroupingService, Merger, OcrService};
use crate::utils::logging::{log_startup, log_transition, print_final_stats};
use crate::workflow::{GroupFlow, GroupResult, RunCtx};

/// 应用主结构
pub struct App {
    config: Config,
    model: Arc<dyn ChatModel>,
    ocr: Arc<dyn OcrEngine>,
}

impl App {
    /// 初始化应用
    pub fn initialize(config: Config) -> PipelineResult<Self> {
        config
            .validate()
            .map_err(|e| PipelineError::Config(format!("{:#}", e)))?;

        log_startup(&config);

        let model: Arc<dyn ChatModel> = Arc::new(OpenAiChatModel::new(&config));
        let ocr = ocr_engine_from_config(&config);
        info!("🔤 OCR 引擎: {}", ocr.name());

        Ok(Self { config, model, ocr })
    }

    /// 使用外部提供的模型和 OCR 引擎
    pub fn with_collaborators(
        config: Config,
        model: Arc<dyn ChatModel>,
        ocr: Arc<dyn OcrEngine>,
    ) -> Self {
        info!("🤖 模型: {}，🔤 OCR 引擎: {}", model.model_name(), ocr.name());
        Self { config, model, ocr }
    }

    /// 运行一次完整的批处理
    ///
    /// 输入目录为空或所有输入文件都没有页面时返回 `Ok(None)`；批次级失败返回 `Err`，此时输入目录保持不变
    pub async fn run(&self) -> PipelineResult<Option<RunSummary>> {
        let ctx = RunCtx::new(&self.config);
        let mut summary = RunSummary::new(ctx.run_id.clone());
        info!("{} 开始运行", ctx);

        // ========== Collecting ==========
        let files = match collect_intake(&self.config.intake_dir).await {
            Ok(files) => files,
            Err(IntakeError::IntakeEmpty { dir }) => {
                warn!("⚠️ 输入目录中没有待处理的 PDF ({})，本次无事可做", dir.display());
                return Ok(None);
            }
            Err(e) => return Err(self.fail(&mut summary, &ctx, e.into()).await),
        };
        info!("📥 找到 {} 个待处理文件", files.len());

        if let Err(e) = fs::create_dir_all(&ctx.work_dir).await {
            let err = IntakeError::io(&ctx.work_dir, e);
            return Err(self.fail(&mut summary, &ctx, err.into()).await);
        }

        let mut batch = match Merger::merge(files, &ctx.work_dir).await {
            Ok(batch) => batch,
            Err(IntakeError::IntakeEmpty { dir }) => {
                warn!("⚠️ 输入文件都没有页面 ({})，本次无事可做", dir.display());
                for err in cleanup(&[ctx.work_dir.as_path()]).await {
                    warn!("⚠️ {}", err);
                }
                return Ok(None);
            }
            Err(e) => return Err(self.fail(&mut summary, &ctx, e.into()).await),
        };
        summary.total_pages = batch.len();
        transition(&mut summary, RunState::Merged);

        // ========== OCR ==========
        let ocr_service = OcrService::new(Arc::clone(&self.ocr), &self.config);
        let ocr_results = ocr_service.recognize_batch(&batch).await;
        batch.attach_ocr(ocr_results);
        summary.ocr_failed_pages = batch.ocr_failed_indices();
        transition(&mut summary, RunState::Ocred);

        // ========== Grouping ==========
        let grouping = GroupingService::new(Arc::clone(&self.model), &self.config);
        let groups = match grouping.group(&batch).await {
            Ok(groups) => groups,
            Err(e) => return Err(self.fail(&mut summary, &ctx, e.into()).await),
        };
        transition(&mut summary, RunState::Grouped);

        // ========== Ordering ==========
        transition(&mut summary, RunState::Ordering);
        let flow = GroupFlow::new(Arc::clone(&self.model), &self.config);
        let group_count = groups.len();
        let ordered_groups = flow.order_all(&batch, groups).await;
        summary.order_fallbacks = ordered_groups
            .iter()
            .filter_map(|ordered| ordered.fallback_note())
            .collect();

        // ========== Filing ==========
        transition(&mut summary, RunState::Filing);
        let mut filed_indices = BTreeSet::new();
        for ordered in &ordered_groups {
            info!("📝 正在归档 {}", ordered.group);
            match flow.file(&batch, ordered, &ctx).await {
                GroupResult::Filed(document) => {
                    filed_indices.extend(ordered.group.members.iter().copied());
                    summary.filed.push(document);
                }
                GroupResult::Failed(failure) => summary.failed_groups.push(failure),
            }
        }

        if summary.filed.is_empty() {
            summary.retained = batch
                .intake_files()
                .iter()
                .map(|path| RetainedFile {
                    path: path.clone(),
                    reason: "所有分组均归档失败".to_string(),
                })
                .collect();
            let err = PipelineError::AllGroupsFailed { count: group_count };
            error!("❌ {}", err);
            return Err(self.fail(&mut summary, &ctx, err).await);
        }

        // ========== Archiving ==========
        transition(&mut summary, RunState::Archiving);
        let outcome = Archiver::new(&self.config)
            .archive(&batch, &filed_indices, &ctx)
            .await;
        summary.archived = outcome.archived;
        summary.retained = outcome.retained;
        summary
            .archive_errors
            .extend(outcome.errors.iter().map(|e| e.to_string()));

        drop(batch);
        self.cleanup_run(&mut summary, &ctx).await;

        transition(&mut summary, RunState::Done);
        self.write_summary(&summary).await;
        print_final_stats(&summary);

        Ok(Some(summary))
    }

    /// 批次级失败：记录状态、清理临时文件、写汇总
    async fn fail(&self, summary: &mut RunSummary, ctx: &RunCtx, err: PipelineError) -> PipelineError {
        error!("❌ 运行在 {} 阶段失败: {}", summary.state, err);
        transition(summary, RunState::Failed(err.to_string()));
        self.cleanup_run(summary, ctx).await;
        self.write_summary(summary).await;
        print_final_stats(summary);
        err
    }

    async fn cleanup_run(&self, summary: &mut RunSummary, ctx: &RunCtx) {
        let errors = cleanup(&[ctx.work_dir.as_path(), ctx.staging_dir.as_path()]).await;
        summary
            .archive_errors
            .extend(errors.iter().map(|e| e.to_string()));

        // 暂存根目录为空时一并移除
        if let Some(staging_root) = ctx.staging_dir.parent() {
            let _ = fs::remove_dir(staging_root).await;
        }
    }

    /// 写入运行汇总，失败只记录警告
    async fn write_summary(&self, summary: &RunSummary) -> Option<PathBuf> {
        let dir = &self.config.summary_dir;
        let path = dir.join(format!("run_{}.md", summary.run_id));

        let result = async {
            fs::create_dir_all(dir).await?;
            fs::write(&path, summary.to_markdown()).await
        }
        .await;

        match result {
            Ok(()) => {
                info!("🧾 运行汇总已写入: {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("⚠️ 写入运行汇总失败 {}: {}", path.display(), e);
                None
            }
        }
    }
}

fn transition(summary: &mut RunSummary, to: RunState) {
    if summary.state.is_terminal() {
        warn!("⚠️ 运行已结束于 {}，忽略切换到 {}", summary.state, to);
        return;
    }
    log_transition(&summary.state, &to);
    summary.state = to;
}
