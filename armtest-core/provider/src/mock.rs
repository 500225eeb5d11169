//! 内存中的可编排部署客户端
//!
//! 按预设脚本返回结果并记录每次调用，用于在不访问云端的情况下驱动编排器、
//! 监控器和清理管理器。

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::client::{with_timeout, DeploymentClient};
use crate::error::{ProviderError, Result};
use crate::models::{
    DeploymentHandle, OperationError, Outputs, ParameterPayload, ProvisioningState, StatusReport,
    Tags, TemplateRef, ValidationOutcome,
};

/// 记录的调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCall {
    Validate(String),
    Submit(String),
    GetStatus(String),
    GetOperations(String),
    GetOutputs(String),
    Delete(String),
    CreateResourceGroup(String),
    ResourceGroupExists(String),
    ResourceGroupTags(String),
}

/// 提交行为
#[derive(Debug, Clone)]
pub enum SubmitBehavior {
    /// 正常接受
    Accept,
    /// 以给定 stderr 失败
    Fail(String),
}

#[derive(Debug)]
struct MockState {
    validation: ValidationOutcome,
    submit: SubmitBehavior,
    statuses: VecDeque<StatusReport>,
    status_delay: Option<Duration>,
    outputs: Outputs,
    operations: Vec<OperationError>,
    resource_groups: BTreeMap<String, Tags>,
    create_group_error: Option<String>,
    delete_error: Option<String>,
    calls: Vec<ClientCall>,
}

/// 可编排的部署客户端
#[derive(Debug)]
pub struct MockDeploymentClient {
    state: Mutex<MockState>,
}

impl Default for MockDeploymentClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDeploymentClient {
    /// 默认脚本：验证通过、提交成功、状态直接为 Succeeded
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                validation: ValidationOutcome::passed(),
                submit: SubmitBehavior::Accept,
                statuses: VecDeque::from(vec![StatusReport::new(ProvisioningState::Succeeded)]),
                status_delay: None,
                outputs: Outputs::new(),
                operations: Vec::new(),
                resource_groups: BTreeMap::new(),
                create_group_error: None,
                delete_error: None,
                calls: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // 测试替身，锁中毒时继续使用内部数据
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_validation(self, outcome: ValidationOutcome) -> Self {
        self.lock().validation = outcome;
        self
    }

    pub fn with_submit(self, behavior: SubmitBehavior) -> Self {
        self.lock().submit = behavior;
        self
    }

    /// 状态序列：依次返回，最后一个重复返回
    pub fn with_statuses(self, states: Vec<ProvisioningState>) -> Self {
        self.with_status_reports(states.into_iter().map(StatusReport::new).collect())
    }

    pub fn with_status_reports(self, reports: Vec<StatusReport>) -> Self {
        self.lock().statuses = reports.into();
        self
    }

    /// 每次状态查询前的人为延迟（用于超时测试）
    pub fn with_status_delay(self, delay: Duration) -> Self {
        self.lock().status_delay = Some(delay);
        self
    }

    pub fn with_outputs<I, K, V>(self, outputs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.lock().outputs = outputs.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    pub fn with_operations(self, operations: Vec<OperationError>) -> Self {
        self.lock().operations = operations;
        self
    }

    /// 预置一个已存在的资源组
    pub fn with_resource_group(self, name: impl Into<String>, tags: Tags) -> Self {
        self.lock().resource_groups.insert(name.into(), tags);
        self
    }

    pub fn with_create_group_error(self, stderr: impl Into<String>) -> Self {
        self.lock().create_group_error = Some(stderr.into());
        self
    }

    pub fn with_delete_error(self, stderr: impl Into<String>) -> Self {
        self.lock().delete_error = Some(stderr.into());
        self
    }

    /// 全部调用记录
    pub fn calls(&self) -> Vec<ClientCall> {
        self.lock().calls.clone()
    }

    pub fn submit_count(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, ClientCall::Submit(_))).count()
    }

    pub fn status_count(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, ClientCall::GetStatus(_))).count()
    }

    /// 被请求删除的资源组
    pub fn deleted_groups(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ClientCall::Delete(rg) => Some(rg),
                _ => None,
            })
            .collect()
    }

    /// 当前存在的资源组
    pub fn resource_groups(&self) -> Vec<String> {
        self.lock().resource_groups.keys().cloned().collect()
    }

    fn record(&self, call: ClientCall) {
        self.lock().calls.push(call);
    }

    fn failure(operation: &str, stderr: &str) -> ProviderError {
        ProviderError::CommandFailed {
            command: format!("mock {}", operation),
            code: Some(1),
            stderr: stderr.to_string(),
        }
    }

    fn next_status(&self) -> StatusReport {
        let mut state = self.lock();
        if state.statuses.len() > 1 {
            state.statuses.pop_front().unwrap_or_else(|| StatusReport::new(ProvisioningState::NotFound))
        } else {
            state
                .statuses
                .front()
                .cloned()
                .unwrap_or_else(|| StatusReport::new(ProvisioningState::NotFound))
        }
    }
}

#[async_trait]
impl DeploymentClient for MockDeploymentClient {
    async fn validate(
        &self,
        handle: &DeploymentHandle,
        _template: &TemplateRef,
        _params: &ParameterPayload,
        _timeout: Duration,
    ) -> Result<ValidationOutcome> {
        self.record(ClientCall::Validate(handle.to_string()));
        Ok(self.lock().validation.clone())
    }

    async fn submit(
        &self,
        handle: &DeploymentHandle,
        _template: &TemplateRef,
        _params: &ParameterPayload,
        _timeout: Duration,
    ) -> Result<DeploymentHandle> {
        self.record(ClientCall::Submit(handle.to_string()));
        let behavior = self.lock().submit.clone();
        match behavior {
            SubmitBehavior::Accept => Ok(handle.clone()),
            SubmitBehavior::Fail(stderr) => Err(Self::failure("submit", &stderr)),
        }
    }

    async fn get_status(&self, handle: &DeploymentHandle, timeout: Duration) -> Result<StatusReport> {
        self.record(ClientCall::GetStatus(handle.to_string()));
        let delay = self.lock().status_delay;
        with_timeout("mock get_status", timeout, async {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.next_status())
        })
        .await
    }

    async fn get_operations(
        &self,
        handle: &DeploymentHandle,
        _timeout: Duration,
    ) -> Result<Vec<OperationError>> {
        self.record(ClientCall::GetOperations(handle.to_string()));
        Ok(self.lock().operations.clone())
    }

    async fn get_outputs(&self, handle: &DeploymentHandle, _timeout: Duration) -> Result<Outputs> {
        self.record(ClientCall::GetOutputs(handle.to_string()));
        Ok(self.lock().outputs.clone())
    }

    async fn delete(&self, resource_group: &str, _timeout: Duration) -> Result<()> {
        self.record(ClientCall::Delete(resource_group.to_string()));
        let mut state = self.lock();
        if let Some(stderr) = state.delete_error.clone() {
            return Err(Self::failure("delete", &stderr));
        }
        state.resource_groups.remove(resource_group);
        Ok(())
    }

    async fn create_resource_group(
        &self,
        name: &str,
        _location: &str,
        tags: &Tags,
        _timeout: Duration,
    ) -> Result<()> {
        self.record(ClientCall::CreateResourceGroup(name.to_string()));
        let mut state = self.lock();
        if let Some(stderr) = state.create_group_error.clone() {
            return Err(Self::failure("group create", &stderr));
        }
        state.resource_groups.insert(name.to_string(), tags.clone());
        Ok(())
    }

    async fn resource_group_exists(&self, name: &str, _timeout: Duration) -> Result<bool> {
        self.record(ClientCall::ResourceGroupExists(name.to_string()));
        Ok(self.lock().resource_groups.contains_key(name))
    }

    async fn resource_group_tags(&self, name: &str, _timeout: Duration) -> Result<Tags> {
        self.record(ClientCall::ResourceGroupTags(name.to_string()));
        self.lock()
            .resource_groups
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }
}
