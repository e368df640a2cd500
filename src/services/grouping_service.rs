//! 分组服务 - 业务能力层
//!
//! 把整批页面文本交给模型，得到逻辑文档划分。
//! 模型输出先收敛为 `GroupingOutcome`，只有 `Ok` 才会进入下一阶段

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::clients::ChatModel;
use crate::config::Config;
use crate::error::{GroupingError, PartitionViolation};
use crate::models::{Batch, Group};
use crate::services::model_output::parse_structured;
use crate::utils::{call_with_retry, RetryPolicy};

pub const GROUPING_SYSTEM_PROMPT: &str = "你是一个文档分拣助手。输入是一批扫描页面的 OCR 文本，每页带有全局页码。\
你需要把这些页面划分为若干个逻辑文档（例如一张发票、一份合同、一张登机牌），\
并为每个文档给出类别（category）和标题（title）。\
每一页必须且只能属于一个文档，不要遗漏、不要重复、不要编造页码。\
只返回 JSON，格式为 {\"groups\": [{\"category\": \"...\", \"title\": \"...\", \"pages\": [0, 1]}]}";

#[derive(Debug, Deserialize)]
struct GroupingResponse {
    groups: Vec<GroupDto>,
}

#[derive(Debug, Deserialize)]
struct GroupDto {
    category: String,
    title: String,
    pages: Vec<i64>,
}

/// 模型分组结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupingOutcome {
    /// 通过结构与划分校验
    Ok(Vec<Group>),
    /// 回复无法解析为约定结构（可重试）
    SchemaError(String),
    /// 结构正确但不是合法划分（不重试、不修补）
    PartitionViolation(PartitionViolation),
}

/// 校验页码列表是否构成 `expected` 的一个划分
///
/// 检查顺序：无分组、空分组、未知页码、重复页码、缺失页码
pub fn validate_partition(
    page_lists: &[Vec<i64>],
    expected: &BTreeSet<usize>,
) -> Result<Vec<BTreeSet<usize>>, PartitionViolation> {
    if page_lists.is_empty() {
        return Err(PartitionViolation::NoGroups);
    }
    if let Some(position) = page_lists.iter().position(|pages| pages.is_empty()) {
        return Err(PartitionViolation::EmptyGroup { position });
    }

    let unknown: BTreeSet<i64> = page_lists
        .iter()
        .flatten()
        .copied()
        .filter(|&idx| usize::try_from(idx).map_or(true, |i| !expected.contains(&i)))
        .collect();
    if !unknown.is_empty() {
        return Err(PartitionViolation::Unknown(unknown.into_iter().collect()));
    }

    let mut seen = BTreeSet::new();
    let mut duplicate = BTreeSet::new();
    let mut sets = Vec::with_capacity(page_lists.len());
    for pages in page_lists {
        let mut members = BTreeSet::new();
        for &idx in pages {
            // 上面已排除负数与越界
            let idx = idx as usize;
            if !seen.insert(idx) {
                duplicate.insert(idx);
            }
            members.insert(idx);
        }
        sets.push(members);
    }
    if !duplicate.is_empty() {
        return Err(PartitionViolation::Duplicate(duplicate.into_iter().collect()));
    }

    let missing: Vec<usize> = expected.difference(&seen).copied().collect();
    if !missing.is_empty() {
        return Err(PartitionViolation::Missing(missing));
    }

    Ok(sets)
}

/// 解析并校验模型回复
pub fn parse_grouping_response(raw: &str, expected: &BTreeSet<usize>) -> GroupingOutcome {
    let response: GroupingResponse = match parse_structured(raw) {
        Ok(response) => response,
        Err(reason) => return GroupingOutcome::SchemaError(reason),
    };

    for (position, dto) in response.groups.iter().enumerate() {
        if dto.category.trim().is_empty() || dto.title.trim().is_empty() {
            return GroupingOutcome::SchemaError(format!(
                "第 {} 个分组缺少 category 或 title",
                position + 1
            ));
        }
    }

    let page_lists: Vec<Vec<i64>> = response.groups.iter().map(|g| g.pages.clone()).collect();
    match validate_partition(&page_lists, expected) {
        Ok(sets) => GroupingOutcome::Ok(
            response
                .groups
                .into_iter()
                .zip(sets)
                .enumerate()
                .map(|(group_id, (dto, members))| Group {
                    group_id,
                    category: dto.category.trim().to_string(),
                    title: dto.title.trim().to_string(),
                    members,
                })
                .collect(),
        ),
        Err(violation) => GroupingOutcome::PartitionViolation(violation),
    }
}

/// 渲染带页码的页面文本，单页超过 `max_chars` 时截断
pub(crate) fn render_pages(
    batch: &Batch,
    indices: impl IntoIterator<Item = usize>,
    max_chars: usize,
) -> String {
    let mut out = String::new();
    for idx in indices {
        let _ = writeln!(out, "=== Page {} ===", idx);
        let text = batch.page(idx).map(|p| p.text().trim()).unwrap_or("");
        if text.is_empty() {
            let _ = writeln!(out, "(空白页或 OCR 失败)");
        } else {
            let clipped: String = text.chars().take(max_chars).collect();
            let _ = writeln!(out, "{}", clipped);
        }
        out.push('\n');
    }
    out
}

/// 分组服务
pub struct GroupingService {
    model: Arc<dyn ChatModel>,
    policy: RetryPolicy,
    max_chars_per_page: usize,
}

impl GroupingService {
    pub fn new(model: Arc<dyn ChatModel>, config: &Config) -> Self {
        Self {
            model,
            policy: config.llm_retry_policy(),
            max_chars_per_page: config.max_chars_per_page,
        }
    }

    fn build_prompt(&self, batch: &Batch) -> String {
        let indices: Vec<usize> = batch.index_set().into_iter().collect();
        let page_indices = serde_json::to_string(&indices).unwrap_or_default();
        format!(
            "page_indices: {}\n\n请对以下 {} 页进行分组：\n\n{}",
            page_indices,
            indices.len(),
            render_pages(batch, indices.iter().copied(), self.max_chars_per_page)
        )
    }

    /// 对整批页面分组
    ///
    /// 调用失败或格式错误按策略重试；划分不合法立即失败
    pub async fn group(&self, batch: &Batch) -> Result<Vec<Group>, GroupingError> {
        info!("📑 正在请求模型分组 ({} 页)...", batch.len());

        let expected = batch.index_set();
        let prompt = self.build_prompt(batch);
        debug!("分组提示词 {} 字符", prompt.chars().count());

        let model = &self.model;
        let prompt = &prompt;
        let expected_ref = &expected;
        let result = call_with_retry(&self.policy, "📑 分组", move |_| async move {
            let raw = model.complete(GROUPING_SYSTEM_PROMPT, prompt).await?;
            match parse_grouping_response(&raw, expected_ref) {
                GroupingOutcome::SchemaError(reason) => {
                    anyhow::bail!("分组结果格式错误: {}", reason)
                }
                outcome => Ok(outcome),
            }
        })
        .await;

        match result {
            Ok(GroupingOutcome::Ok(groups)) => {
                info!("✓ 分组完成，共 {} 个文档", groups.len());
                for group in &groups {
                    info!("  {}", group);
                }
                Ok(groups)
            }
            Ok(GroupingOutcome::PartitionViolation(violation)) => {
                warn!("❌ 分组结果不是合法划分: {}", violation);
                Err(GroupingError::GroupingInvalid(violation))
            }
            Ok(GroupingOutcome::SchemaError(reason)) => Err(GroupingError::GroupingUnavailable {
                attempts: self.policy.max_attempts,
                last_error: reason,
            }),
            Err(exhausted) => Err(GroupingError::GroupingUnavailable {
                attempts: exhausted.attempts,
                last_error: exhausted.last_error,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn expected(n: usize) -> BTreeSet<usize> {
        (0..n).collect()
    }

    #[test]
    fn test_valid_partition() {
        let raw = r#"{"groups": [
            {"category": "Invoice", "title": "Acme", "pages": [0, 1]},
            {"category": "Travel", "title": "Boarding Pass", "pages": [2, 3, 4]}
        ]}"#;
        match parse_grouping_response(raw, &expected(5)) {
            GroupingOutcome::Ok(groups) => {
                assert_eq!(groups.len(), 2);
                assert_eq!(groups[1].group_id, 1);
                assert_eq!(groups[1].title, "Boarding Pass");
                assert_eq!(groups[1].merge_order(), vec![2, 3, 4]);
            }
            other => panic!("应当通过校验: {:?}", other),
        }
    }

    #[test]
    fn test_violations_are_classified() {
        let cases = [
            (r#"{"groups": []}"#, PartitionViolation::NoGroups),
            (
                r#"{"groups": [{"category": "A", "title": "a", "pages": []}]}"#,
                PartitionViolation::EmptyGroup { position: 0 },
            ),
            (
                r#"{"groups": [{"category": "A", "title": "a", "pages": [0, 1, 7]}]}"#,
                PartitionViolation::Unknown(vec![7]),
            ),
            (
                r#"{"groups": [{"category": "A", "title": "a", "pages": [0, -1, 1]}]}"#,
                PartitionViolation::Unknown(vec![-1]),
            ),
            (
                r#"{"groups": [{"category": "A", "title": "a", "pages": [0, 1]},
                               {"category": "B", "title": "b", "pages": [1]}]}"#,
                PartitionViolation::Duplicate(vec![1]),
            ),
            (
                r#"{"groups": [{"category": "A", "title": "a", "pages": [0]}]}"#,
                PartitionViolation::Missing(vec![1]),
            ),
        ];

        for (raw, violation) in cases {
            assert_eq!(
                parse_grouping_response(raw, &expected(2)),
                GroupingOutcome::PartitionViolation(violation),
                "输入: {}",
                raw
            );
        }
    }

    #[test]
    fn test_schema_errors() {
        assert!(matches!(
            parse_grouping_response("I cannot help with that", &expected(2)),
            GroupingOutcome::SchemaError(_)
        ));
        assert!(matches!(
            parse_grouping_response(r#"{"groups": [{"title": "a", "pages": [0, 1]}]}"#, &expected(2)),
            GroupingOutcome::SchemaError(_)
        ));
        assert!(matches!(
            parse_grouping_response(
                r#"{"groups": [{"category": " ", "title": "a", "pages": [0, 1]}]}"#,
                &expected(2)
            ),
            GroupingOutcome::SchemaError(_)
        ));
    }

    /// 随机生成 n 页的一个划分（按桶分配后去掉空桶）
    fn partition_strategy() -> impl Strategy<Value = (usize, Vec<Vec<i64>>)> {
        (1usize..40).prop_flat_map(|n| {
            proptest::collection::vec(0usize..5, n).prop_map(move |buckets| {
                let mut lists = vec![Vec::new(); 5];
                for (page, bucket) in buckets.into_iter().enumerate() {
                    lists[bucket].push(page as i64);
                }
                lists.retain(|l| !l.is_empty());
                (n, lists)
            })
        })
    }

    proptest! {
        #[test]
        fn prop_valid_partitions_pass((n, lists) in partition_strategy()) {
            let sets = validate_partition(&lists, &expected(n)).unwrap();
            let total: usize = sets.iter().map(|s| s.len()).sum();
            prop_assert_eq!(total, n);
        }

        #[test]
        fn prop_dropped_page_is_missing((n, mut lists) in partition_strategy(), pick in any::<prop::sample::Index>()) {
            let group = pick.index(lists.len());
            let dropped = lists[group].pop().unwrap();
            let result = validate_partition(&lists, &expected(n));
            if lists[group].is_empty() {
                prop_assert_eq!(result, Err(PartitionViolation::EmptyGroup { position: group }));
            } else {
                prop_assert_eq!(result, Err(PartitionViolation::Missing(vec![dropped as usize])));
            }
        }

        #[test]
        fn prop_repeated_page_is_duplicate((n, mut lists) in partition_strategy(), pick in any::<prop::sample::Index>()) {
            let page = pick.index(n) as i64;
            lists[0].push(page);
            let result = validate_partition(&lists, &expected(n));
            prop_assert_eq!(result, Err(PartitionViolation::Duplicate(vec![page as usize])));
        }

        #[test]
        fn prop_foreign_page_is_unknown((n, mut lists) in partition_strategy(), extra in 0i64..1000) {
            let foreign = n as i64 + extra;
            let last = lists.len() - 1;
            lists[last].push(foreign);
            let result = validate_partition(&lists, &expected(n));
            prop_assert_eq!(result, Err(PartitionViolation::Unknown(vec![foreign])));
        }
    }
}
