//! 资源清理管理
//!
//! 根据租约（资源组 ↔ 部署记录 + 清理策略）决定删除哪些资源组。
//! 删除请求在 provider 侧异步执行，本地立即把记录标记为 CleanedUp 并记录请求时间。
//! 没有租约的资源组永远不会被删除。

use armtest_common::{CleanupPolicy, DeploymentState, MANAGED_BY_TAG, MANAGED_BY_VALUE};
use armtest_provider::DeploymentClient;
use armtest_storage::{DeploymentRecord, ResourceGroupLease, Storage};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{ExecutorError, Result};

/// 清理范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupTarget {
    Deployment(String),
    All,
}

/// 清理选项
#[derive(Debug, Clone)]
pub struct CleanupOptions {
    pub target: CleanupTarget,
    /// 忽略策略（仍然需要租约）
    pub force: bool,
    /// 只处理早于该时长的租约
    pub older_than: Option<Duration>,
    /// 只做决策，不删除
    pub dry_run: bool,
}

impl CleanupOptions {
    pub fn new(target: CleanupTarget) -> Self {
        Self {
            target,
            force: false,
            older_than: None,
            dry_run: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_older_than(mut self, older_than: Option<Duration>) -> Self {
        self.older_than = older_than;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// 解析 `30m`、`2h`、`3d`、`1w`
pub fn parse_age(raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw.trim())
        .map_err(|e| ExecutorError::Configuration(format!("无效的时长 {}: {}", raw, e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CleanupAction {
    Delete,
    Skip,
}

impl fmt::Display for CleanupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delete => write!(f, "delete"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

/// 单个租约的清理决策
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupDecision {
    pub resource_group: String,
    pub deployment_id: String,
    pub action: CleanupAction,
    pub reason: String,
}

impl CleanupDecision {
    fn delete(lease: &ResourceGroupLease, reason: impl Into<String>) -> Self {
        Self {
            resource_group: lease.resource_group.clone(),
            deployment_id: lease.deployment_id.clone(),
            action: CleanupAction::Delete,
            reason: reason.into(),
        }
    }

    fn skip(lease: &ResourceGroupLease, reason: impl Into<String>) -> Self {
        Self {
            resource_group: lease.resource_group.clone(),
            deployment_id: lease.deployment_id.clone(),
            action: CleanupAction::Skip,
            reason: reason.into(),
        }
    }
}

/// 清理汇总
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    pub total: usize,
    pub cleaned: usize,
    pub failed: usize,
    pub skipped: usize,
    pub decisions: Vec<CleanupDecision>,
}

impl CleanupSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// 按策略决定是否删除（不访问远端）
pub fn decide(lease: &ResourceGroupLease, options: &CleanupOptions, now: DateTime<Utc>) -> CleanupDecision {
    if lease.is_released() {
        return CleanupDecision::skip(lease, "已清理");
    }
    if lease.state.is_in_flight() {
        return CleanupDecision::skip(lease, format!("部署仍在远端进行 ({})", lease.state));
    }
    if !lease.state.is_terminal() {
        return CleanupDecision::skip(lease, format!("部署尚未提交 ({})", lease.state));
    }
    if let Some(min_age) = options.older_than {
        let age = lease.age(now);
        // 负年龄（时钟偏差）视为未达到
        if age.to_std().map(|a| a < min_age).unwrap_or(true) {
            return CleanupDecision::skip(
                lease,
                format!("创建于 {} 分钟前，未达到清理年龄", age.num_minutes()),
            );
        }
    }
    if options.force {
        return CleanupDecision::delete(lease, "强制清理");
    }
    if lease.policy == CleanupPolicy::OnSuccess && lease.validation_passed == Some(false) {
        return CleanupDecision::skip(lease, "功能验证未通过，保留资源组以便排查");
    }
    if lease.policy.permits(lease.state) {
        CleanupDecision::delete(lease, format!("策略 {} 允许删除 {} 部署", lease.policy, lease.state))
    } else {
        CleanupDecision::skip(lease, format!("策略 {} 保留 {} 部署", lease.policy, lease.state))
    }
}

/// 资源清理管理器
pub struct LifecycleManager {
    client: Arc<dyn DeploymentClient>,
    storage: Arc<Storage>,
    call_timeout: Duration,
}

impl LifecycleManager {
    pub fn new(client: Arc<dyn DeploymentClient>, storage: Arc<Storage>, call_timeout: Duration) -> Self {
        Self {
            client,
            storage,
            call_timeout,
        }
    }

    async fn leases(&self, target: &CleanupTarget) -> Result<Vec<DeploymentRecord>> {
        match target {
            CleanupTarget::Deployment(id) => Ok(vec![self.storage.deployments().load(id).await?]),
            CleanupTarget::All => Ok(self.storage.deployments().list().await?),
        }
    }

    /// 部署到达终态后按记录自身的策略清理
    pub async fn apply_policy(&self, deployment_id: &str) -> Result<CleanupSummary> {
        self.cleanup(&CleanupOptions::new(CleanupTarget::Deployment(deployment_id.to_string())))
            .await
    }

    /// 执行清理
    pub async fn cleanup(&self, options: &CleanupOptions) -> Result<CleanupSummary> {
        let records = self.leases(&options.target).await?;
        let now = Utc::now();
        let mut summary = CleanupSummary {
            total: records.len(),
            ..Default::default()
        };

        for record in records {
            let lease = record.lease();
            let mut decision = decide(&lease, options, now);
            debug!(
                "清理决策 {} ({}): {} - {}",
                lease.resource_group, lease.deployment_id, decision.action, decision.reason
            );

            if decision.action == CleanupAction::Skip || options.dry_run {
                if decision.action == CleanupAction::Skip {
                    summary.skipped += 1;
                }
                summary.decisions.push(decision);
                continue;
            }

            match self.execute(&lease, options.force).await {
                Ok(Executed::Deleted) => summary.cleaned += 1,
                Ok(Executed::AlreadyGone) => {
                    decision.reason = "资源组已不存在".to_string();
                    summary.cleaned += 1;
                }
                Ok(Executed::NotManaged) => {
                    decision.action = CleanupAction::Skip;
                    decision.reason = format!("资源组缺少 {}={} 标签", MANAGED_BY_TAG, MANAGED_BY_VALUE);
                    summary.skipped += 1;
                }
                Err(e) => {
                    warn!("删除资源组失败 {}: {}", lease.resource_group, e);
                    decision.reason = format!("删除失败: {}", e);
                    summary.failed += 1;
                }
            }
            summary.decisions.push(decision);
        }

        info!(
            "清理完成: 共 {}，已清理 {}，跳过 {}，失败 {}",
            summary.total, summary.cleaned, summary.skipped, summary.failed
        );
        Ok(summary)
    }

    async fn execute(&self, lease: &ResourceGroupLease, force: bool) -> Result<Executed> {
        let rg = &lease.resource_group;

        if !self.client.resource_group_exists(rg, self.call_timeout).await? {
            info!("资源组 {} 已不存在，标记为已清理", rg);
            self.mark_cleaned(&lease.deployment_id).await?;
            return Ok(Executed::AlreadyGone);
        }

        let tags = self.client.resource_group_tags(rg, self.call_timeout).await?;
        let managed = tags.get(MANAGED_BY_TAG).map(String::as_str) == Some(MANAGED_BY_VALUE);
        if !managed && !force {
            warn!("资源组 {} 不受本工具管理，跳过", rg);
            return Ok(Executed::NotManaged);
        }

        self.client.delete(rg, self.call_timeout).await?;
        self.mark_cleaned(&lease.deployment_id).await?;
        info!("已请求删除资源组: {} (部署 {})", rg, lease.deployment_id);
        Ok(Executed::Deleted)
    }

    async fn mark_cleaned(&self, id: &str) -> Result<()> {
        self.storage
            .deployments()
            .update(id, |record| {
                record.cleanup_requested_at = Some(Utc::now());
                record.transition(DeploymentState::CleanedUp)?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

enum Executed {
    Deleted,
    AlreadyGone,
    NotManaged,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(policy: CleanupPolicy, state: DeploymentState, age_minutes: i64) -> ResourceGroupLease {
        ResourceGroupLease {
            resource_group: "rg".into(),
            deployment_id: "dep".into(),
            policy,
            state,
            created_at: Utc::now() - chrono::Duration::minutes(age_minutes),
            cleanup_requested_at: None,
            validation_passed: None,
        }
    }

    fn all() -> CleanupOptions {
        CleanupOptions::new(CleanupTarget::All)
    }

    #[test]
    fn test_policy_decisions() {
        use CleanupPolicy::*;
        use DeploymentState::*;
        let now = Utc::now();
        let cases = [
            (Always, Succeeded, CleanupAction::Delete),
            (Always, Failed, CleanupAction::Delete),
            (OnSuccess, Succeeded, CleanupAction::Delete),
            (OnSuccess, Failed, CleanupAction::Skip),
            (OnFailure, Succeeded, CleanupAction::Skip),
            (OnFailure, Failed, CleanupAction::Delete),
            (Manual, Succeeded, CleanupAction::Skip),
            (Always, Polling, CleanupAction::Skip),
            (Always, CleanedUp, CleanupAction::Skip),
        ];
        for (policy, state, expected) in cases {
            assert_eq!(decide(&lease(policy, state, 5), &all(), now).action, expected, "{:?} {:?}", policy, state);
        }
    }

    #[test]
    fn test_force_overrides_policy_but_not_in_flight() {
        let now = Utc::now();
        let forced = all().with_force(true);
        let l = lease(CleanupPolicy::Manual, DeploymentState::Succeeded, 5);
        assert_eq!(decide(&l, &forced, now).action, CleanupAction::Delete);
        let l = lease(CleanupPolicy::Manual, DeploymentState::Polling, 5);
        assert_eq!(decide(&l, &forced, now).action, CleanupAction::Skip);
    }

    #[test]
    fn test_on_success_keeps_failed_validation() {
        let now = Utc::now();
        let mut l = lease(CleanupPolicy::OnSuccess, DeploymentState::Succeeded, 5);
        l.validation_passed = Some(false);
        assert_eq!(decide(&l, &all(), now).action, CleanupAction::Skip);

        l.validation_passed = Some(true);
        assert_eq!(decide(&l, &all(), now).action, CleanupAction::Delete);

        // always 策略不看验证结果
        l.policy = CleanupPolicy::Always;
        l.validation_passed = Some(false);
        assert_eq!(decide(&l, &all(), now).action, CleanupAction::Delete);
    }

    #[test]
    fn test_older_than() {
        let now = Utc::now();
        let options = all().with_older_than(Some(parse_age("2h").unwrap()));
        assert_eq!(
            decide(&lease(CleanupPolicy::Always, DeploymentState::Failed, 30), &options, now).action,
            CleanupAction::Skip
        );
        assert_eq!(
            decide(&lease(CleanupPolicy::Always, DeploymentState::Failed, 180), &options, now).action,
            CleanupAction::Delete
        );
    }

    #[test]
    fn test_parse_age() {
        assert_eq!(parse_age("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_age("3d").unwrap(), Duration::from_secs(3 * 86400));
        assert_eq!(parse_age("1w").unwrap(), Duration::from_secs(7 * 86400));
        assert!(parse_age("soon").is_err());
    }
}
