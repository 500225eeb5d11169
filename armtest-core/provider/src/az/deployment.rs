//! 部署 API（validate / create / show / operation list）

use std::time::Duration;
use tracing::{debug, info, warn};

use super::{is_not_found, parameters_arg, AzCliClient};
use crate::error::{ProviderError, Result};
use crate::models::{
    DeploymentHandle, OperationError, Outputs, ParameterPayload, ProvisioningState, StatusReport,
    TemplateRef, ValidationOutcome,
};

/// 部署 API
pub struct DeploymentApi<'a> {
    client: &'a AzCliClient,
}

impl<'a> DeploymentApi<'a> {
    pub(crate) fn new(client: &'a AzCliClient) -> Self {
        Self { client }
    }

    fn base_args(
        action: &str,
        handle: &DeploymentHandle,
        template: &TemplateRef,
        params: &ParameterPayload,
    ) -> Vec<String> {
        vec![
            "deployment".to_string(),
            "group".to_string(),
            action.to_string(),
            "--resource-group".to_string(),
            handle.resource_group.clone(),
            "--name".to_string(),
            handle.deployment_name.clone(),
            "--template-file".to_string(),
            template.path.display().to_string(),
            "--parameters".to_string(),
            parameters_arg(params),
        ]
    }

    /// 预检验证
    ///
    /// 命令失败不视为调用错误，而是返回带诊断的失败结果，交给分类器处理。
    pub async fn validate(
        &self,
        handle: &DeploymentHandle,
        template: &TemplateRef,
        params: &ParameterPayload,
        timeout: Duration,
    ) -> Result<ValidationOutcome> {
        info!("预检验证部署: {}", handle);
        let mut args = Self::base_args("validate", handle, template, params);
        args.extend(["--output".to_string(), "json".to_string()]);

        match self.client.run(args, timeout).await {
            Ok(stdout) => {
                // validate 成功时 stdout 中仍可能带 error 字段
                let value: serde_json::Value =
                    serde_json::from_str(stdout.trim()).unwrap_or(serde_json::Value::Null);
                match value.pointer("/error").filter(|e| !e.is_null()) {
                    Some(error) => Ok(ValidationOutcome::failed(error.to_string())),
                    None => Ok(ValidationOutcome::passed()),
                }
            }
            Err(ProviderError::CommandFailed { stderr, .. }) => Ok(ValidationOutcome::failed(stderr)),
            Err(e) => Err(e),
        }
    }

    /// 提交部署（`--no-wait`）
    pub async fn create(
        &self,
        handle: &DeploymentHandle,
        template: &TemplateRef,
        params: &ParameterPayload,
        timeout: Duration,
    ) -> Result<DeploymentHandle> {
        info!("提交部署: {}", handle);
        let mut args = Self::base_args("create", handle, template, params);
        args.push("--no-wait".to_string());
        self.client.run(args, timeout).await?;
        Ok(handle.clone())
    }

    async fn show_raw(&self, handle: &DeploymentHandle, timeout: Duration) -> Result<Option<String>> {
        let args = vec![
            "deployment".to_string(),
            "group".to_string(),
            "show".to_string(),
            "--resource-group".to_string(),
            handle.resource_group.clone(),
            "--name".to_string(),
            handle.deployment_name.clone(),
            "--output".to_string(),
            "json".to_string(),
        ];
        match self.client.run(args, timeout).await {
            Ok(stdout) => Ok(Some(stdout)),
            Err(ProviderError::CommandFailed { stderr, .. }) if is_not_found(&stderr) => {
                debug!("部署不存在: {}", handle);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// 查询部署状态
    pub async fn show(&self, handle: &DeploymentHandle, timeout: Duration) -> Result<StatusReport> {
        match self.show_raw(handle, timeout).await? {
            Some(stdout) => parse_status(&stdout),
            None => Ok(StatusReport::new(ProvisioningState::NotFound)),
        }
    }

    /// 读取部署输出
    pub async fn outputs(&self, handle: &DeploymentHandle, timeout: Duration) -> Result<Outputs> {
        match self.show_raw(handle, timeout).await? {
            Some(stdout) => parse_outputs(&stdout),
            None => Err(ProviderError::NotFound(handle.to_string())),
        }
    }

    /// 列出失败的部署操作
    pub async fn failed_operations(
        &self,
        handle: &DeploymentHandle,
        timeout: Duration,
    ) -> Result<Vec<OperationError>> {
        let args = vec![
            "deployment".to_string(),
            "operation".to_string(),
            "group".to_string(),
            "list".to_string(),
            "--resource-group".to_string(),
            handle.resource_group.clone(),
            "--name".to_string(),
            handle.deployment_name.clone(),
            "--output".to_string(),
            "json".to_string(),
        ];
        let stdout = self.client.run(args, timeout).await?;
        let operations = parse_operations(&stdout)?;
        if !operations.is_empty() {
            warn!("部署 {} 有 {} 个失败操作", handle, operations.len());
        }
        Ok(operations)
    }
}

/// 解析 `az deployment group show` 输出中的状态
pub fn parse_status(stdout: &str) -> Result<StatusReport> {
    let value: serde_json::Value = serde_json::from_str(stdout.trim())?;
    let properties = value
        .get("properties")
        .ok_or_else(|| ProviderError::ParseError("缺少 properties 字段".to_string()))?;

    let state = properties
        .get("provisioningState")
        .and_then(|s| s.as_str())
        .map(ProvisioningState::parse)
        .ok_or_else(|| ProviderError::ParseError("缺少 provisioningState 字段".to_string()))?;

    let raw_diagnostics = properties
        .get("error")
        .filter(|e| !e.is_null())
        .map(|e| e.to_string())
        .unwrap_or_default();

    Ok(StatusReport {
        state,
        raw_diagnostics,
        timestamp: properties
            .get("timestamp")
            .and_then(|t| t.as_str())
            .map(str::to_string),
    })
}

/// 解析部署输出，`properties.outputs.<name>.value` 拉平为字符串
pub fn parse_outputs(stdout: &str) -> Result<Outputs> {
    let value: serde_json::Value = serde_json::from_str(stdout.trim())?;
    let mut outputs = Outputs::new();

    if let Some(map) = value.pointer("/properties/outputs").and_then(|o| o.as_object()) {
        for (name, entry) in map {
            let raw = entry.get("value").unwrap_or(entry);
            let text = match raw {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => continue,
                other => other.to_string(),
            };
            outputs.insert(name.clone(), text);
        }
    }

    Ok(outputs)
}

/// 解析 `az deployment operation group list`，只保留失败的操作
pub fn parse_operations(stdout: &str) -> Result<Vec<OperationError>> {
    let value: serde_json::Value = serde_json::from_str(stdout.trim())?;
    let items = value
        .as_array()
        .ok_or_else(|| ProviderError::ParseError("操作列表不是数组".to_string()))?;

    let text = |v: Option<&serde_json::Value>| -> String {
        v.and_then(|v| v.as_str()).unwrap_or("unknown").to_string()
    };

    Ok(items
        .iter()
        .filter_map(|op| op.get("properties"))
        .filter(|props| props.get("provisioningState").and_then(|s| s.as_str()) == Some("Failed"))
        .map(|props| {
            let message = props
                .pointer("/statusMessage/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .or_else(|| props.get("statusMessage").map(|m| m.to_string()))
                .unwrap_or_else(|| "unknown".to_string());
            OperationError {
                resource_name: text(props.pointer("/targetResource/resourceName")),
                resource_type: text(props.pointer("/targetResource/resourceType")),
                status_code: text(props.get("statusCode")),
                message,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOW_SUCCEEDED: &str = r#"{
        "name": "neo4j-deploy-standalone-v5-20250101-120000",
        "properties": {
            "provisioningState": "Succeeded",
            "timestamp": "2025-01-01T12:10:00Z",
            "error": null,
            "outputs": {
                "neo4jBrowserURL": {"type": "String", "value": "http://vm0.eastus.cloudapp.azure.com:7474"},
                "username": {"type": "String", "value": "neo4j"},
                "nodeCount": {"type": "Int", "value": 1}
            }
        }
    }"#;

    #[test]
    fn test_parse_status_succeeded() {
        let report = parse_status(SHOW_SUCCEEDED).unwrap();
        assert_eq!(report.state, ProvisioningState::Succeeded);
        assert!(report.raw_diagnostics.is_empty());
        assert_eq!(report.timestamp.as_deref(), Some("2025-01-01T12:10:00Z"));
    }

    #[test]
    fn test_parse_status_failed_keeps_error() {
        let stdout = r#"{"properties": {"provisioningState": "Failed",
            "error": {"code": "DeploymentFailed", "message": "At least one resource deployment operation failed."}}}"#;
        let report = parse_status(stdout).unwrap();
        assert_eq!(report.state, ProvisioningState::Failed);
        assert!(report.raw_diagnostics.contains("DeploymentFailed"));
    }

    #[test]
    fn test_parse_status_missing_state() {
        assert!(parse_status(r#"{"properties": {}}"#).is_err());
        assert!(parse_status("not json").is_err());
    }

    #[test]
    fn test_parse_outputs_flattens_values() {
        let outputs = parse_outputs(SHOW_SUCCEEDED).unwrap();
        assert_eq!(outputs["username"], "neo4j");
        assert_eq!(outputs["nodeCount"], "1");
        assert_eq!(outputs["neo4jBrowserURL"], "http://vm0.eastus.cloudapp.azure.com:7474");
    }

    #[test]
    fn test_parse_outputs_without_outputs() {
        let outputs = parse_outputs(r#"{"properties": {"provisioningState": "Running"}}"#).unwrap();
        assert!(outputs.is_empty());
    }

    #[test]
    fn test_parse_operations_filters_failed() {
        let stdout = r#"[
            {"properties": {"provisioningState": "Succeeded", "statusCode": "OK",
                "targetResource": {"resourceName": "vnet", "resourceType": "Microsoft.Network/virtualNetworks"}}},
            {"properties": {"provisioningState": "Failed", "statusCode": "Conflict",
                "targetResource": {"resourceName": "vmss", "resourceType": "Microsoft.Compute/virtualMachineScaleSets"},
                "statusMessage": {"error": {"code": "QuotaExceeded", "message": "Operation could not be completed as it results in exceeding approved quota."}}}}
        ]"#;
        let ops = parse_operations(stdout).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].resource_name, "vmss");
        assert_eq!(ops[0].status_code, "Conflict");
        assert!(ops[0].message.contains("exceeding approved quota"));
    }
}
