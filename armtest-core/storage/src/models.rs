use armtest_common::{
    CleanupPolicy, DeploymentState, ErrorClass, FailureReason, ValidationResult,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, StorageError};

/// 状态转换记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: DeploymentState,
    pub to: DeploymentState,
    pub at: DateTime<Utc>,
}

/// 最近一次错误分类
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub class: ErrorClass,
    /// 原始诊断，原样保留
    pub raw: String,
    /// 失败的部署操作（资源、类型、状态码、消息）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_operations: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(class: ErrorClass, raw: impl Into<String>) -> Self {
        Self {
            class,
            raw: raw.into(),
            failed_operations: Vec::new(),
            recorded_at: Utc::now(),
        }
    }
}

/// 部署记录
///
/// 由编排器独占写入；状态只能沿状态机单调前进。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployment_id: String,
    pub scenario: String,
    pub resource_group: String,
    pub deployment_name: String,
    pub template: PathBuf,
    pub region: String,

    pub state: DeploymentState,
    #[serde(default)]
    pub history: Vec<StateTransition>,

    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_polled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub error: Option<ErrorRecord>,
    #[serde(default)]
    pub failure: Option<FailureReason>,

    #[serde(default)]
    pub parameters_file: Option<PathBuf>,
    #[serde(default)]
    pub connection_file: Option<PathBuf>,
    #[serde(default)]
    pub validations: Vec<ValidationResult>,

    pub cleanup_policy: CleanupPolicy,
    #[serde(default)]
    pub cleanup_requested_at: Option<DateTime<Utc>>,
}

impl DeploymentRecord {
    pub fn new(
        deployment_id: impl Into<String>,
        scenario: impl Into<String>,
        resource_group: impl Into<String>,
        deployment_name: impl Into<String>,
        template: impl Into<PathBuf>,
        region: impl Into<String>,
        cleanup_policy: CleanupPolicy,
    ) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            scenario: scenario.into(),
            resource_group: resource_group.into(),
            deployment_name: deployment_name.into(),
            template: template.into(),
            region: region.into(),
            state: DeploymentState::Pending,
            history: Vec::new(),
            created_at: Utc::now(),
            submitted_at: None,
            last_polled_at: None,
            completed_at: None,
            error: None,
            failure: None,
            parameters_file: None,
            connection_file: None,
            validations: Vec::new(),
            cleanup_policy,
            cleanup_requested_at: None,
        }
    }

    /// 沿状态机前进一步，非法转换返回错误且不修改记录
    pub fn transition(&mut self, to: DeploymentState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(StorageError::InvalidTransition {
                id: self.deployment_id.clone(),
                from: self.state,
                to,
            });
        }

        let now = Utc::now();
        self.history.push(StateTransition { from: self.state, to, at: now });
        self.state = to;

        match to {
            DeploymentState::Submitted => self.submitted_at = Some(now),
            DeploymentState::Succeeded | DeploymentState::Failed => self.completed_at = Some(now),
            _ => {}
        }
        Ok(())
    }

    /// 转入 Failed 并记录原因
    pub fn fail(&mut self, reason: FailureReason) -> Result<()> {
        self.transition(DeploymentState::Failed)?;
        self.failure = Some(reason);
        Ok(())
    }

    /// 观察到的状态路径（含初始 Pending）
    pub fn state_path(&self) -> Vec<DeploymentState> {
        let mut path = vec![self
            .history
            .first()
            .map(|t| t.from)
            .unwrap_or(self.state)];
        path.extend(self.history.iter().map(|t| t.to));
        path
    }

    /// 从创建到完成（或到现在）的耗时
    pub fn elapsed(&self) -> Duration {
        self.completed_at.unwrap_or_else(Utc::now) - self.created_at
    }

    pub fn latest_validation(&self) -> Option<&ValidationResult> {
        self.validations.last()
    }

    /// 资源组租约视图
    pub fn lease(&self) -> ResourceGroupLease {
        ResourceGroupLease {
            resource_group: self.resource_group.clone(),
            deployment_id: self.deployment_id.clone(),
            policy: self.cleanup_policy,
            state: self.state,
            created_at: self.created_at,
            cleanup_requested_at: self.cleanup_requested_at,
            validation_passed: self.latest_validation().map(|v| v.pass),
        }
    }
}

/// 资源组租约：资源组与部署记录的归属关系及清理策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroupLease {
    pub resource_group: String,
    pub deployment_id: String,
    pub policy: CleanupPolicy,
    pub state: DeploymentState,
    pub created_at: DateTime<Utc>,
    pub cleanup_requested_at: Option<DateTime<Utc>>,
    /// 最近一次功能验证结果，未验证为 `None`
    #[serde(default)]
    pub validation_passed: Option<bool>,
}

impl ResourceGroupLease {
    pub fn is_released(&self) -> bool {
        self.state == DeploymentState::CleanedUp
    }

    /// 租约年龄
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }
}
