//! 带超时与指数退避的重试

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// 重试策略
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 总尝试次数（包含第一次）
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// 单次调用超时
    pub timeout: Duration,
}

impl RetryPolicy {
    /// 第 `attempt` 次失败后的等待时间（attempt 从 1 开始）
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// 重试耗尽
#[derive(Debug, Clone)]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last_error: String,
}

/// 按策略反复执行 `op`，直到成功或次数耗尽
///
/// `op` 收到当前尝试序号（从 1 开始）；超时与 `Err` 都计为一次失败
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match tokio::time::timeout(policy.timeout, op(attempt)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                last_error = format!("{:#}", e);
            }
            Err(_) => {
                last_error = format!("调用超时 ({} 秒)", policy.timeout.as_secs());
            }
        }

        warn!(
            "{} 第 {}/{} 次尝试失败: {}",
            label, attempt, max_attempts, last_error
        );

        if attempt < max_attempts {
            tokio::time::sleep(policy.backoff_for(attempt)).await;
        }
    }

    Err(RetryExhausted {
        attempts: max_attempts,
        last_error,
    })
}
