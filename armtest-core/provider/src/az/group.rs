//! 资源组 API

use std::time::Duration;
use tracing::info;

use super::{is_not_found, AzCliClient};
use crate::error::{ProviderError, Result};
use crate::models::Tags;

/// 资源组 API
pub struct GroupApi<'a> {
    client: &'a AzCliClient,
}

impl<'a> GroupApi<'a> {
    pub(crate) fn new(client: &'a AzCliClient) -> Self {
        Self { client }
    }

    /// 创建资源组并打标签
    pub async fn create(&self, name: &str, location: &str, tags: &Tags, timeout: Duration) -> Result<()> {
        info!("创建资源组: {} ({})", name, location);

        let mut args = vec![
            "group".to_string(),
            "create".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--location".to_string(),
            location.to_string(),
            "--output".to_string(),
            "none".to_string(),
        ];
        if !tags.is_empty() {
            args.push("--tags".to_string());
            args.extend(tags.iter().map(|(k, v)| format!("{}={}", k, v)));
        }

        self.client.run(args, timeout).await?;
        Ok(())
    }

    /// 资源组是否存在
    pub async fn exists(&self, name: &str, timeout: Duration) -> Result<bool> {
        let args = vec![
            "group".to_string(),
            "exists".to_string(),
            "--name".to_string(),
            name.to_string(),
        ];
        let stdout = self.client.run(args, timeout).await?;
        Ok(stdout.trim().eq_ignore_ascii_case("true"))
    }

    /// 读取资源组标签
    pub async fn tags(&self, name: &str, timeout: Duration) -> Result<Tags> {
        let args = vec![
            "group".to_string(),
            "show".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--query".to_string(),
            "tags".to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        let stdout = match self.client.run(args, timeout).await {
            Ok(stdout) => stdout,
            Err(ProviderError::CommandFailed { stderr, .. }) if is_not_found(&stderr) => {
                return Err(ProviderError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e),
        };
        parse_tags(&stdout)
    }

    /// 删除资源组（`--no-wait`，不等待删除完成）
    pub async fn delete(&self, name: &str, timeout: Duration) -> Result<()> {
        info!("请求删除资源组: {}", name);
        let args = vec![
            "group".to_string(),
            "delete".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--yes".to_string(),
            "--no-wait".to_string(),
        ];
        self.client.run(args, timeout).await?;
        Ok(())
    }
}

/// 解析 `az group show --query tags` 的输出（无标签时为 `null`）
pub(crate) fn parse_tags(stdout: &str) -> Result<Tags> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Tags::new());
    }
    let value: serde_json::Value = serde_json::from_str(trimmed)?;
    let object = value
        .as_object()
        .ok_or_else(|| ProviderError::ParseError(format!("标签不是 JSON 对象: {}", trimmed)))?;
    Ok(object
        .iter()
        .map(|(k, v)| {
            let v = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
            (k.clone(), v)
        })
        .collect())
}
