//! 分组处理流程 - 流程层
//!
//! 核心职责：定义"一个分组"从排序到归档的处理流程
//!
//! 流程顺序：
//! 1. 排序（失败则回退到合并顺序）
//! 2. 抽页 → 暂存 → 校验 → 提交（失败则重试，仍失败则报告）

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{error, info};

use crate::clients::ChatModel;
use crate::config::Config;
use crate::models::{Batch, FiledDocument, Group, GroupFailure, OrderedGroup};
use crate::services::{Filer, OrderingService};
use crate::workflow::RunCtx;

/// 单个分组的归档结果
///
/// 页序回退由 `OrderedGroup::fallback_note` 单独记录，不依赖归档是否成功
#[derive(Debug, Clone)]
pub enum GroupResult {
    Filed(FiledDocument),
    Failed(GroupFailure),
}

/// 分组处理流程
///
/// - 不持有批次数据，只依赖业务能力（services）
/// - 一个分组的失败不影响其他分组
pub struct GroupFlow {
    ordering: OrderingService,
    filer: Filer,
    max_concurrent_ordering: usize,
}

impl GroupFlow {
    pub fn new(model: Arc<dyn ChatModel>, config: &Config) -> Self {
        Self {
            ordering: OrderingService::new(model, config),
            filer: Filer::new(config),
            max_concurrent_ordering: config.max_concurrent_ordering.max(1),
        }
    }

    /// 为所有分组求页序，结果与输入顺序一致
    pub async fn order_all(&self, batch: &Batch, groups: Vec<Group>) -> Vec<OrderedGroup> {
        info!(
            "🔢 开始排序 {} 个分组 (并发 {})",
            groups.len(),
            self.max_concurrent_ordering
        );
        stream::iter(groups)
            .map(|group| self.ordering.order(batch, group))
            .buffered(self.max_concurrent_ordering)
            .collect()
            .await
    }

    /// 归档一个已排序的分组
    pub async fn file(&self, batch: &Batch, ordered: &OrderedGroup, ctx: &RunCtx) -> GroupResult {
        let group = &ordered.group;
        match self.filer.file(batch, ordered, ctx).await {
            Ok(document) => GroupResult::Filed(document),
            Err(e) => {
                error!("[分组 {}] ❌ 归档失败: {}", group.group_id, e);
                GroupResult::Failed(GroupFailure {
                    group_id: group.group_id,
                    category: group.category.clone(),
                    title: group.title.clone(),
                    pages: ordered.ordered_indices.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}
