//! 排序服务 - 业务能力层
//!
//! 为单个分组求页序。任何失败都只影响本分组，回退到合并顺序

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::clients::ChatModel;
use crate::config::Config;
use crate::error::OrderingError;
use crate::models::{Batch, Group, OrderSource, OrderedGroup};
use crate::services::grouping_service::render_pages;
use crate::services::model_output::parse_structured;
use crate::utils::{call_with_retry, RetryPolicy};

pub const ORDERING_SYSTEM_PROMPT: &str = "你是一个文档整理助手。输入是同一份文档的若干扫描页面，\
页面顺序可能被打乱。请根据页码标记、上下文衔接和内容逻辑给出正确的阅读顺序。\
只能使用给定的页码，每个页码恰好出现一次。\
只返回 JSON，格式为 {\"ordered_pages\": [2, 0, 1]}";

#[derive(Debug, Deserialize)]
struct OrderingResponse {
    ordered_pages: Vec<i64>,
}

/// 校验 `proposed` 是否恰好是 `members` 的一个排列
pub fn validate_permutation(
    members: &BTreeSet<usize>,
    proposed: &[i64],
) -> Result<Vec<usize>, OrderingError> {
    let mut seen = BTreeSet::new();
    let mut duplicate = BTreeSet::new();
    let mut foreign = Vec::new();
    let mut ordered = Vec::with_capacity(proposed.len());

    for &idx in proposed {
        match usize::try_from(idx) {
            Ok(i) if members.contains(&i) => {
                if seen.insert(i) {
                    ordered.push(i);
                } else {
                    duplicate.insert(i);
                }
            }
            _ => foreign.push(idx),
        }
    }

    let missing: Vec<usize> = members.difference(&seen).copied().collect();
    if missing.is_empty() && duplicate.is_empty() && foreign.is_empty() {
        Ok(ordered)
    } else {
        Err(OrderingError::NotBijection {
            missing,
            duplicate: duplicate.into_iter().collect(),
            foreign,
        })
    }
}

/// 排序服务
pub struct OrderingService {
    model: Arc<dyn ChatModel>,
    policy: RetryPolicy,
    max_chars_per_page: usize,
}

impl OrderingService {
    pub fn new(model: Arc<dyn ChatModel>, config: &Config) -> Self {
        Self {
            model,
            policy: config.llm_retry_policy(),
            max_chars_per_page: config.max_chars_per_page,
        }
    }

    fn build_prompt(&self, batch: &Batch, group: &Group) -> String {
        let indices = group.merge_order();
        let page_indices = serde_json::to_string(&indices).unwrap_or_default();
        format!(
            "文档类别: {}\n文档标题: {}\npage_indices: {}\n\n请给出以下页面的正确顺序：\n\n{}",
            group.category,
            group.title,
            page_indices,
            render_pages(batch, indices.iter().copied(), self.max_chars_per_page)
        )
    }

    /// 为分组求页序，永不失败
    pub async fn order(&self, batch: &Batch, group: Group) -> OrderedGroup {
        if group.page_count() <= 1 {
            debug!("{} 单页分组，跳过排序", group);
            return OrderedGroup {
                ordered_indices: group.merge_order(),
                group,
                source: OrderSource::Trivial,
            };
        }

        match self.request_order(batch, &group).await {
            Ok(ordered_indices) => {
                info!("[分组 {}] ✓ 页序: {:?}", group.group_id, ordered_indices);
                OrderedGroup {
                    group,
                    ordered_indices,
                    source: OrderSource::Model,
                }
            }
            Err(reason) => {
                warn!(
                    "[分组 {}] ⚠️ 排序不可用，保留合并顺序: {}",
                    group.group_id, reason
                );
                OrderedGroup::fallback(group, reason)
            }
        }
    }

    async fn request_order(&self, batch: &Batch, group: &Group) -> Result<Vec<usize>, OrderingError> {
        let prompt = self.build_prompt(batch, group);
        let label = format!("[分组 {}] 排序", group.group_id);

        let model = &self.model;
        let prompt = &prompt;
        let proposed = call_with_retry(&self.policy, &label, move |_| async move {
            let raw = model.complete(ORDERING_SYSTEM_PROMPT, prompt).await?;
            parse_structured::<OrderingResponse>(&raw)
                .map(|response| response.ordered_pages)
                .map_err(|reason| anyhow::anyhow!(OrderingError::Schema(reason)))
        })
        .await
        .map_err(|exhausted| OrderingError::Unavailable {
            attempts: exhausted.attempts,
            last_error: exhausted.last_error,
        })?;

        validate_permutation(&group.members, &proposed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::pdf::fixtures::sample_bytes;
    use crate::services::merger::Merger;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn members(indices: &[usize]) -> BTreeSet<usize> {
        indices.iter().copied().collect()
    }

    /// 固定回复的模型：`None` 表示调用失败
    struct CannedModel {
        reply: Option<&'static str>,
        calls: AtomicU32,
    }

    impl CannedModel {
        fn new(reply: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatModel for CannedModel {
        fn model_name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, _system: &str, _user: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Some(reply) => Ok(reply.to_string()),
                None => anyhow::bail!("connection reset"),
            }
        }
    }

    fn fast_config() -> Config {
        Config {
            llm_max_attempts: 3,
            llm_initial_backoff_ms: 1,
            llm_max_backoff_ms: 2,
            llm_timeout_secs: 5,
            ..Config::default()
        }
    }

    async fn batch_of(markers: &[i64]) -> (tempfile::TempDir, Batch) {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.pdf");
        std::fs::write(&a, sample_bytes(markers)).unwrap();
        let batch = Merger::merge(vec![a], dir.path()).await.unwrap();
        (dir, batch)
    }

    fn group_of(indices: &[usize]) -> Group {
        Group {
            group_id: 0,
            category: "Travel".to_string(),
            title: "Boarding Pass".to_string(),
            members: members(indices),
        }
    }

    #[tokio::test]
    async fn test_model_order_is_used() {
        let (_dir, batch) = batch_of(&[600, 601, 602]).await;
        let model = CannedModel::new(Some(r#"{"ordered_pages": [2, 0, 1]}"#));
        let service = OrderingService::new(model.clone(), &fast_config());

        let ordered = service.order(&batch, group_of(&[0, 1, 2])).await;

        assert_eq!(ordered.ordered_indices, vec![2, 0, 1]);
        assert_eq!(ordered.source, OrderSource::Model);
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_failing_model_falls_back_after_retries() {
        let (_dir, batch) = batch_of(&[600, 601, 602]).await;
        let model = CannedModel::new(None);
        let service = OrderingService::new(model.clone(), &fast_config());

        let ordered = service.order(&batch, group_of(&[0, 1, 2])).await;

        assert_eq!(ordered.ordered_indices, vec![0, 1, 2]);
        match ordered.source {
            OrderSource::Fallback(OrderingError::Unavailable { attempts, last_error }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("connection reset"));
            }
            other => panic!("应当回退, 实际: {:?}", other),
        }
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn test_prose_reply_falls_back_after_retries() {
        let (_dir, batch) = batch_of(&[600, 601, 602]).await;
        let model = CannedModel::new(Some("The pages look fine in their current order."));
        let service = OrderingService::new(model.clone(), &fast_config());

        let ordered = service.order(&batch, group_of(&[1, 2])).await;

        assert_eq!(ordered.ordered_indices, vec![1, 2]);
        assert!(matches!(
            ordered.source,
            OrderSource::Fallback(OrderingError::Unavailable { attempts: 3, .. })
        ));
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn test_single_page_group_skips_model() {
        let (_dir, batch) = batch_of(&[600, 601]).await;
        let model = CannedModel::new(Some(r#"{"ordered_pages": [1]}"#));
        let service = OrderingService::new(model.clone(), &fast_config());

        let ordered = service.order(&batch, group_of(&[1])).await;

        assert_eq!(ordered.ordered_indices, vec![1]);
        assert_eq!(ordered.source, OrderSource::Trivial);
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_valid_permutation() {
        let ordered = validate_permutation(&members(&[2, 3, 4]), &[4, 2, 3]).unwrap();
        assert_eq!(ordered, vec![4, 2, 3]);
    }

    #[test]
    fn test_rejects_each_violation() {
        let group = members(&[2, 3, 4]);

        let err = validate_permutation(&group, &[4, 2]).unwrap_err();
        assert_eq!(
            err,
            OrderingError::NotBijection {
                missing: vec![3],
                duplicate: vec![],
                foreign: vec![],
            }
        );

        let err = validate_permutation(&group, &[4, 2, 3, 2]).unwrap_err();
        assert!(matches!(err, OrderingError::NotBijection { ref duplicate, .. } if duplicate == &vec![2]));

        let err = validate_permutation(&group, &[4, 2, 3, 0]).unwrap_err();
        assert!(matches!(err, OrderingError::NotBijection { ref foreign, .. } if foreign == &vec![0]));

        let err = validate_permutation(&group, &[4, -2, 3]).unwrap_err();
        assert!(matches!(
            err,
            OrderingError::NotBijection { ref foreign, ref missing, .. }
                if foreign == &vec![-2] && missing == &vec![2]
        ));
    }

    proptest! {
        #[test]
        fn prop_shuffled_members_are_accepted(
            ordered in proptest::collection::btree_set(0usize..200, 1..30)
                .prop_flat_map(|set| Just(set.into_iter().collect::<Vec<_>>()).prop_shuffle())
        ) {
            let group: BTreeSet<usize> = ordered.iter().copied().collect();
            let proposed: Vec<i64> = ordered.iter().map(|&i| i as i64).collect();
            prop_assert_eq!(validate_permutation(&group, &proposed), Ok(ordered));
        }

        #[test]
        fn prop_altered_length_is_rejected(
            set in proptest::collection::btree_set(0usize..200, 2..30),
            drop_last in any::<bool>(),
        ) {
            let mut proposed: Vec<i64> = set.iter().map(|&i| i as i64).collect();
            if drop_last {
                proposed.pop();
            } else {
                proposed.push(proposed[0]);
            }
            prop_assert!(validate_permutation(&set, &proposed).is_err());
        }
    }
}
