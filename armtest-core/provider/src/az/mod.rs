//! 基于 `az` 命令行的部署客户端实现

mod deployment;
mod group;

pub use deployment::{parse_operations, parse_outputs, parse_status, DeploymentApi};
pub use group::GroupApi;

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::client::{with_timeout, DeploymentClient};
use crate::error::{ProviderError, Result};
use crate::models::{
    DeploymentHandle, OperationError, Outputs, ParameterPayload, StatusReport, Tags, TemplateRef,
    ValidationOutcome,
};

/// `az` 客户端配置
#[derive(Debug, Clone)]
pub struct AzCliConfig {
    /// 可执行文件（默认 `az`）
    pub program: PathBuf,

    /// 目标订阅（为空时使用 CLI 当前订阅）
    pub subscription: Option<String>,
}

impl Default for AzCliConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("az"),
            subscription: None,
        }
    }
}

/// `az` 命令行客户端
#[derive(Debug, Clone)]
pub struct AzCliClient {
    config: AzCliConfig,
}

impl AzCliClient {
    pub fn new(config: AzCliConfig) -> Self {
        Self { config }
    }

    /// 资源组 API
    pub fn group(&self) -> GroupApi<'_> {
        GroupApi::new(self)
    }

    /// 部署 API
    pub fn deployment(&self) -> DeploymentApi<'_> {
        DeploymentApi::new(self)
    }

    /// 执行一条 `az` 命令，返回 stdout
    ///
    /// 非零退出时返回 `CommandFailed`，其中 stderr 原样保留。
    pub(crate) async fn run(&self, args: Vec<String>, timeout: Duration) -> Result<String> {
        let mut args = args;
        if let Some(subscription) = &self.config.subscription {
            args.push("--subscription".to_string());
            args.push(subscription.clone());
        }

        let command_line = format!("az {}", args.join(" "));
        debug!("执行命令: {}", command_line);

        let mut command = Command::new(&self.config.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = with_timeout(&command_line, timeout, async {
            command.output().await.map_err(ProviderError::from)
        })
        .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(ProviderError::CommandFailed {
                command: command_line,
                code: output.status.code(),
                stderr: if stderr.trim().is_empty() { stdout } else { stderr },
            });
        }

        Ok(stdout)
    }
}

/// 判断 stderr 是否表示资源不存在
pub(crate) fn is_not_found(stderr: &str) -> bool {
    stderr.contains("DeploymentNotFound")
        || stderr.contains("ResourceGroupNotFound")
        || stderr.contains("could not be found")
}

/// 参数传递方式：落盘文件优先，否则内联 JSON
pub(crate) fn parameters_arg(params: &ParameterPayload) -> String {
    match &params.file {
        Some(path) => format!("@{}", path.display()),
        None => params.to_arm_parameters().to_string(),
    }
}

#[async_trait]
impl DeploymentClient for AzCliClient {
    async fn validate(
        &self,
        handle: &DeploymentHandle,
        template: &TemplateRef,
        params: &ParameterPayload,
        timeout: Duration,
    ) -> Result<ValidationOutcome> {
        self.deployment().validate(handle, template, params, timeout).await
    }

    async fn submit(
        &self,
        handle: &DeploymentHandle,
        template: &TemplateRef,
        params: &ParameterPayload,
        timeout: Duration,
    ) -> Result<DeploymentHandle> {
        self.deployment().create(handle, template, params, timeout).await
    }

    async fn get_status(&self, handle: &DeploymentHandle, timeout: Duration) -> Result<StatusReport> {
        self.deployment().show(handle, timeout).await
    }

    async fn get_operations(
        &self,
        handle: &DeploymentHandle,
        timeout: Duration,
    ) -> Result<Vec<OperationError>> {
        self.deployment().failed_operations(handle, timeout).await
    }

    async fn get_outputs(&self, handle: &DeploymentHandle, timeout: Duration) -> Result<Outputs> {
        self.deployment().outputs(handle, timeout).await
    }

    async fn delete(&self, resource_group: &str, timeout: Duration) -> Result<()> {
        self.group().delete(resource_group, timeout).await
    }

    async fn create_resource_group(
        &self,
        name: &str,
        location: &str,
        tags: &Tags,
        timeout: Duration,
    ) -> Result<()> {
        self.group().create(name, location, tags, timeout).await
    }

    async fn resource_group_exists(&self, name: &str, timeout: Duration) -> Result<bool> {
        self.group().exists(name, timeout).await
    }

    async fn resource_group_tags(&self, name: &str, timeout: Duration) -> Result<Tags> {
        self.group().tags(name, timeout).await
    }
}
