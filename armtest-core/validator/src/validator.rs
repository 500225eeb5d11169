//! 功能验证流程
//!
//! connect（有界重试）→ write → read-back → cleanup → probe-absent。
//! 无论前面的断言是否通过都会尝试删除探针数据。

use armtest_common::{Assertion, ValidationResult};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::probe::ServiceProbe;
use crate::retry::RetryPolicy;

/// 功能验证器
#[derive(Debug, Clone, Default)]
pub struct Validator {
    policy: RetryPolicy,
}

impl Validator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 对探针执行完整的验证流程
    pub async fn validate(&self, probe: &dyn ServiceProbe) -> ValidationResult {
        let started_at = Utc::now();
        info!("开始功能验证: {}", probe.name());

        let mut diagnostics = match self.policy.run("connect", |_| probe.connect()).await {
            Ok(()) => Vec::new(),
            Err(diagnostics) => {
                warn!("服务不可达，已重试 {} 次", self.policy.attempts);
                return ValidationResult::unreachable(diagnostics, started_at);
            }
        };

        let mut assertions = vec![Assertion::pass("connect")];
        let key = format!("armtest-probe-{}", Uuid::new_v4());
        let value = Uuid::new_v4().to_string();

        match self.policy.once(probe.write_probe(&key, &value)).await {
            Ok(()) => assertions.push(Assertion::pass("write")),
            Err(e) => {
                diagnostics.push(format!("写入失败: {}", e));
                assertions.push(Assertion::fail("write", e.to_string()));
            }
        }

        match self.policy.once(probe.read_probe(&key)).await {
            Ok(Some(read)) if read == value => assertions.push(Assertion::pass("read-back")),
            Ok(Some(read)) => assertions.push(Assertion::fail(
                "read-back",
                format!("期望 {} 实际 {}", value, read),
            )),
            Ok(None) => assertions.push(Assertion::fail("read-back", "探针数据不存在")),
            Err(e) => {
                diagnostics.push(format!("回读失败: {}", e));
                assertions.push(Assertion::fail("read-back", e.to_string()));
            }
        }

        match self.policy.once(probe.delete_probe(&key)).await {
            Ok(()) => assertions.push(Assertion::pass("cleanup")),
            Err(e) => {
                diagnostics.push(format!("删除探针数据失败: {}", e));
                assertions.push(Assertion::fail("cleanup", e.to_string()));
            }
        }

        match self.policy.once(probe.read_probe(&key)).await {
            Ok(None) => assertions.push(Assertion::pass("probe-absent")),
            Ok(Some(_)) => assertions.push(Assertion::fail("probe-absent", "删除后探针数据仍存在")),
            Err(e) => assertions.push(Assertion::fail("probe-absent", e.to_string())),
        }

        let result = ValidationResult::from_assertions(assertions, diagnostics, started_at);
        if result.pass {
            info!("功能验证通过: {}", probe.name());
        } else {
            warn!(
                "功能验证失败: {:?}",
                result.failed_assertions().map(|a| a.name.as_str()).collect::<Vec<_>>()
            );
        }
        result
    }
}
