use std::collections::BTreeSet;
use std::fmt::Display;

use crate::error::OrderingError;
use crate::models::OrderFallback;

/// 逻辑文档分组
///
/// `group_id` 即其在分组列表中的位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub group_id: usize,
    pub category: String,
    pub title: String,
    pub members: BTreeSet<usize>,
}

impl Group {
    /// 合并顺序（即全局索引升序）
    pub fn merge_order(&self) -> Vec<usize> {
        self.members.iter().copied().collect()
    }

    pub fn page_count(&self) -> usize {
        self.members.len()
    }
}

impl Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[分组 {}] {} / {} ({} 页)",
            self.group_id,
            self.category,
            self.title,
            self.members.len()
        )
    }
}

/// 页序来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderSource {
    /// 模型给出的排列
    Model,
    /// 单页分组，无需排序
    Trivial,
    /// 模型结果不可用，保留合并顺序
    Fallback(OrderingError),
}

/// 带页序的分组
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedGroup {
    pub group: Group,
    /// `group.members` 的一个排列
    pub ordered_indices: Vec<usize>,
    pub source: OrderSource,
}

impl OrderedGroup {
    pub fn fallback(group: Group, reason: OrderingError) -> Self {
        Self {
            ordered_indices: group.merge_order(),
            group,
            source: OrderSource::Fallback(reason),
        }
    }

    /// 回退到合并顺序时，生成汇总中的说明（与归档结果无关）
    pub fn fallback_note(&self) -> Option<OrderFallback> {
        match &self.source {
            OrderSource::Fallback(reason) => Some(OrderFallback {
                group_id: self.group.group_id,
                title: self.group.title.clone(),
                reason: reason.to_string(),
            }),
            OrderSource::Model | OrderSource::Trivial => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_note_only_for_fallback() {
        let group = Group {
            group_id: 3,
            category: "Travel".to_string(),
            title: "Boarding Pass".to_string(),
            members: BTreeSet::from([4, 2]),
        };
        let fallback = OrderedGroup::fallback(group.clone(), OrderingError::Schema("prose".to_string()));
        let note = fallback.fallback_note().unwrap();
        assert_eq!(fallback.ordered_indices, vec![2, 4]);
        assert_eq!(note.group_id, 3);
        assert!(note.reason.contains("prose"));

        let trivial = OrderedGroup {
            ordered_indices: group.merge_order(),
            group,
            source: OrderSource::Trivial,
        };
        assert!(trivial.fallback_note().is_none());
    }
}
