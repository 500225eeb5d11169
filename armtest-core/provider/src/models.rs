//! 部署 API 数据模型

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// 部署输出（输出名 -> 字符串值）
pub type Outputs = BTreeMap<String, String>;

/// 资源组标签
pub type Tags = BTreeMap<String, String>;

/// 模板引用：稳定的路径，模板内部对编排器不透明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRef {
    pub path: PathBuf,
}

impl TemplateRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// 提交给 provider 的参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterPayload {
    /// 参数名 -> 值
    pub values: BTreeMap<String, serde_json::Value>,

    /// 已落盘的 ARM 参数文件（存在时优先使用）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl ParameterPayload {
    pub fn new(values: BTreeMap<String, serde_json::Value>) -> Self {
        Self { values, file: None }
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// ARM 参数文件格式 `{ name: { "value": v } }`
    pub fn to_arm_parameters(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::json!({ "value": v })))
            .collect();
        serde_json::Value::Object(map)
    }
}

/// 已提交部署的句柄
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentHandle {
    pub resource_group: String,
    pub deployment_name: String,
}

impl DeploymentHandle {
    pub fn new(resource_group: impl Into<String>, deployment_name: impl Into<String>) -> Self {
        Self {
            resource_group: resource_group.into(),
            deployment_name: deployment_name.into(),
        }
    }
}

impl fmt::Display for DeploymentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_group, self.deployment_name)
    }
}

/// provider 侧的部署状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningState {
    Accepted,
    Running,
    Succeeded,
    Failed,
    Canceled,
    /// 部署不存在
    NotFound,
    /// 其他中间状态（Deleting、Updating 等）
    Other(String),
}

impl ProvisioningState {
    /// 从 provider 返回的 `provisioningState` 字段解析
    pub fn parse(value: &str) -> Self {
        match value {
            "Accepted" => Self::Accepted,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            "Canceled" | "Cancelled" => Self::Canceled,
            "NotFound" => Self::NotFound,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// 部署存在且仍在进行或已成功
    pub fn indicates_progress(&self) -> bool {
        matches!(self, Self::Accepted | Self::Running | Self::Succeeded | Self::Other(_))
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(s) => f.write_str(s),
            other => write!(f, "{:?}", other),
        }
    }
}

/// 状态查询结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: ProvisioningState,
    /// 原始诊断（错误详情、stderr 等），可能为空
    #[serde(default)]
    pub raw_diagnostics: String,
    /// provider 报告的时间戳
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl StatusReport {
    pub fn new(state: ProvisioningState) -> Self {
        Self { state, raw_diagnostics: String::new(), timestamp: None }
    }

    pub fn with_diagnostics(mut self, raw: impl Into<String>) -> Self {
        self.raw_diagnostics = raw.into();
        self
    }
}

/// 预检（dry-run）结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub passed: bool,
    #[serde(default)]
    pub diagnostics: String,
}

impl ValidationOutcome {
    pub fn passed() -> Self {
        Self { passed: true, diagnostics: String::new() }
    }

    pub fn failed(diagnostics: impl Into<String>) -> Self {
        Self { passed: false, diagnostics: diagnostics.into() }
    }
}

/// 部署中失败的单个操作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    pub resource_name: String,
    pub resource_type: String,
    pub status_code: String,
    pub message: String,
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) [{}]: {}",
            self.resource_name, self.resource_type, self.status_code, self.message
        )
    }
}
