//! 有界重试策略
//!
//! 部署报告成功后服务可能仍在启动，连接失败是预期情况：
//! 固定次数、固定间隔、每次尝试有短超时。

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{Result, ValidatorError};

/// 重试策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 最大尝试次数
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// 两次尝试之间的固定间隔
    #[serde(with = "humantime_serde", default = "default_backoff")]
    pub backoff: Duration,

    /// 单次尝试超时
    #[serde(with = "humantime_serde", default = "default_attempt_timeout")]
    pub attempt_timeout: Duration,
}

fn default_attempts() -> u32 {
    10
}

fn default_backoff() -> Duration {
    Duration::from_secs(15)
}

fn default_attempt_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff: default_backoff(),
            attempt_timeout: default_attempt_timeout(),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration, attempt_timeout: Duration) -> Self {
        Self { attempts, backoff, attempt_timeout }
    }

    /// 单次调用加超时
    pub async fn once<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.attempt_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ValidatorError::Timeout),
        }
    }

    /// 按策略重试，全部失败时返回每次尝试的诊断
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> std::result::Result<T, Vec<String>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut diagnostics = Vec::new();
        let attempts = self.attempts.max(1);

        for n in 1..=attempts {
            match self.once(attempt(n)).await {
                Ok(value) => {
                    debug!("{} 第 {} 次尝试成功", operation, n);
                    return Ok(value);
                }
                Err(e) => {
                    warn!("{} 第 {}/{} 次尝试失败: {}", operation, n, attempts, e);
                    diagnostics.push(format!("{} 第 {} 次尝试失败: {}", operation, n, e));
                }
            }
            if n < attempts {
                tokio::time::sleep(self.backoff).await;
            }
        }

        Err(diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let policy = RetryPolicy::new(5, Duration::from_secs(15), Duration::from_secs(10));
        let calls = AtomicU32::new(0);

        let result = policy
            .run("connect", |n| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(ValidatorError::Connection("refused".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(1));
        let started = tokio::time::Instant::now();

        let result: std::result::Result<(), _> = policy
            .run("connect", |_| async { Err(ValidatorError::Connection("refused".into())) })
            .await;

        let diagnostics = result.unwrap_err();
        assert_eq!(diagnostics.len(), 3);
        // 只在两次尝试之间等待
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout() {
        let policy = RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(5));
        let result: std::result::Result<(), _> = policy
            .run("connect", |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        let diagnostics = result.unwrap_err();
        assert!(diagnostics[0].contains("超时"));
    }

    #[test]
    fn test_humantime_config() {
        let policy: RetryPolicy =
            serde_yaml::from_str("attempts: 4\nbackoff: 30s\nattempt_timeout: 2s\n").unwrap();
        assert_eq!(policy.attempts, 4);
        assert_eq!(policy.backoff, Duration::from_secs(30));

        let default: RetryPolicy = serde_yaml::from_str("{}").unwrap();
        assert_eq!(default, RetryPolicy::default());
    }
}
