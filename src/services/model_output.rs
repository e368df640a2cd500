//! 模型输出解析
//!
//! 把模型返回的原始文本收敛为一个 JSON 对象，再按类型反序列化

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").ok())
        .as_ref()
}

/// 取出回复中的 JSON 对象文本
///
/// 依次尝试：代码块内容、第一个 `{` 到最后一个 `}` 之间的内容
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let candidate = fence_regex()
        .and_then(|re| re.captures(raw))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw);

    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    (start < end).then(|| &candidate[start..=end])
}

/// 解析为指定结构，失败时返回可读的原因
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    let json = extract_json_object(raw).ok_or_else(|| "回复中没有 JSON 对象".to_string())?;
    serde_json::from_str(json).map_err(|e| format!("JSON 不符合约定结构: {}", e))
}
