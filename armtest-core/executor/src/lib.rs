//! armtest 执行器
//!
//! 部署生命周期编排与验证引擎：
//! 场景注册 → 参数生成 → 预检/提交/对账 → 状态监控 → 输出提取 → 功能验证 → 资源清理。
//! 每次状态转换都写入状态存储。

pub mod classifier;
pub mod extractor;
pub mod lifecycle;
pub mod monitor;
pub mod naming;
pub mod orchestrator;
pub mod parameters;
pub mod password;
pub mod runner;
pub mod scenario;
pub mod settings;
pub mod template;

pub use classifier::ErrorClassifier;
pub use extractor::{ConnectionExtractor, OutputMapping};
pub use lifecycle::{CleanupAction, CleanupDecision, CleanupOptions, CleanupSummary, CleanupTarget, LifecycleManager};
pub use monitor::{CollectingRenderer, Monitor, MonitorHandle, ProgressEvent, ProgressRenderer};
pub use naming::DeploymentNames;
pub use orchestrator::{DryRunOutcome, Orchestrator, SubmitOutcome};
pub use parameters::{ParameterGenerator, ParameterSet, RunContext};
pub use password::PasswordStrategy;
pub use runner::{DeploymentOutcome, DeploymentRunner, RunOptions};
pub use scenario::{Scenario, ScenarioConfig, ScenarioRegistry};
pub use settings::Settings;
pub use template::{ParamSpec, ParamType, TemplateSchema};

use armtest_common::{FailureReason, ValidationFailure, ValidationResult};
use armtest_provider::ProviderError;
use armtest_storage::StorageError;
use armtest_validator::ValidatorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("权限不足: 缺少操作 '{action}' 的权限")]
    AuthorizationDenied { action: String, raw: String },

    #[error("模板无效: {0}")]
    TemplateInvalid(String),

    #[error("远端部署失败: {0}")]
    RemoteFailure(String),

    #[error("部署轮询超时")]
    Timeout,

    #[error("部署已取消（远端操作可能仍在继续）")]
    Cancelled,

    #[error("部署输出缺少字段: {field}")]
    OutputShapeMismatch { field: String },

    #[error("服务不可达: {0}")]
    Unreachable(String),

    #[error("功能验证失败: {0}")]
    ValidationAssertionFailed(String),

    #[error("未知错误: {raw}")]
    Unknown { raw: String },

    #[error("部署客户端错误: {0}")]
    Provider(#[from] ProviderError),

    #[error("存储错误: {0}")]
    Storage(#[from] StorageError),

    #[error("验证器错误: {0}")]
    Validator(#[from] ValidatorError),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    SerdeError(String),
}

impl ExecutorError {
    /// 由未通过的验证结果构造，通过时返回 `None`
    pub fn from_validation(result: &ValidationResult) -> Option<Self> {
        if result.pass {
            return None;
        }
        let detail = result
            .failed_assertions()
            .map(|a| match &a.detail {
                Some(detail) => format!("{}: {}", a.name, detail),
                None => a.name.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        Some(match result.reason {
            Some(ValidationFailure::Unreachable) => Self::Unreachable(detail),
            _ => Self::ValidationAssertionFailed(detail),
        })
    }

    /// 由记录上的失败原因构造
    pub fn from_failure(reason: &FailureReason) -> Self {
        match reason {
            FailureReason::Configuration(msg) => Self::Configuration(msg.clone()),
            FailureReason::AuthorizationDenied(action) => Self::AuthorizationDenied {
                action: action.clone(),
                raw: String::new(),
            },
            FailureReason::TemplateInvalid(msg) => Self::TemplateInvalid(msg.clone()),
            FailureReason::RemoteFailure(msg) => Self::RemoteFailure(msg.clone()),
            FailureReason::Timeout => Self::Timeout,
            FailureReason::Cancelled => Self::Cancelled,
            FailureReason::Unknown(raw) => Self::Unknown { raw: raw.clone() },
        }
    }

    /// 命令行退出码：1 配置错误，2 远端/部署失败，3 功能验证失败
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::SerdeError(_) | Self::IoError(_) | Self::Storage(_) => 1,
            Self::Unreachable(_) | Self::ValidationAssertionFailed(_) | Self::Validator(_) => 3,
            Self::AuthorizationDenied { .. }
            | Self::TemplateInvalid(_)
            | Self::RemoteFailure(_)
            | Self::Timeout
            | Self::Cancelled
            | Self::OutputShapeMismatch { .. }
            | Self::Unknown { .. }
            | Self::Provider(_) => 2,
        }
    }
}

impl From<serde_json::Error> for ExecutorError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerdeError(e.to_string())
    }
}

impl From<serde_yaml::Error> for ExecutorError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::SerdeError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
