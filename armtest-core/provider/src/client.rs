//! 部署客户端接口
//!
//! 其他组件只依赖此 trait，从不直接依赖 provider 的 CLI 或 SDK。
//! 每个调用都带调用方提供的超时。

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::error::{ProviderError, Result};
use crate::models::{
    DeploymentHandle, OperationError, Outputs, ParameterPayload, StatusReport, Tags, TemplateRef,
    ValidationOutcome,
};

/// 部署客户端
#[async_trait]
pub trait DeploymentClient: Send + Sync {
    /// 预检（dry-run）验证
    async fn validate(
        &self,
        handle: &DeploymentHandle,
        template: &TemplateRef,
        params: &ParameterPayload,
        timeout: Duration,
    ) -> Result<ValidationOutcome>;

    /// 提交部署（不等待完成）
    async fn submit(
        &self,
        handle: &DeploymentHandle,
        template: &TemplateRef,
        params: &ParameterPayload,
        timeout: Duration,
    ) -> Result<DeploymentHandle>;

    /// 查询部署状态
    async fn get_status(&self, handle: &DeploymentHandle, timeout: Duration) -> Result<StatusReport>;

    /// 查询失败的部署操作
    async fn get_operations(
        &self,
        handle: &DeploymentHandle,
        timeout: Duration,
    ) -> Result<Vec<OperationError>>;

    /// 获取部署输出
    async fn get_outputs(&self, handle: &DeploymentHandle, timeout: Duration) -> Result<Outputs>;

    /// 删除资源组（异步触发，不等待删除完成）
    async fn delete(&self, resource_group: &str, timeout: Duration) -> Result<()>;

    /// 创建资源组
    async fn create_resource_group(
        &self,
        name: &str,
        location: &str,
        tags: &Tags,
        timeout: Duration,
    ) -> Result<()>;

    /// 资源组是否存在
    async fn resource_group_exists(&self, name: &str, timeout: Duration) -> Result<bool>;

    /// 资源组标签
    async fn resource_group_tags(&self, name: &str, timeout: Duration) -> Result<Tags>;
}

/// 以超时包裹一次远端调用
pub async fn with_timeout<T, F>(operation: &str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("远端调用超时: {} ({:?})", operation, timeout);
            Err(ProviderError::Timeout {
                operation: operation.to_string(),
                timeout,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let result: Result<()> = with_timeout("slow", Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through() {
        let result = with_timeout("fast", Duration::from_secs(1), async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
