//! 部署编排器
//!
//! 状态机 `Pending → Validating → Submitted → Polling → Succeeded | Failed → (CleanedUp)`。
//! 预检失败直接进入 Failed，不会提交。提交返回错误时不信任该结果：
//! 等待片刻后重新查询部署状态，以远端实际状态为准。

use armtest_common::{DeploymentState, ErrorClass};
use armtest_provider::{
    DeploymentClient, DeploymentHandle, OperationError, ProviderError, Tags, TemplateRef,
    ValidationOutcome,
};
use armtest_storage::{DeploymentRecord, ErrorRecord, Storage};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::classifier::ErrorClassifier;
use crate::parameters::ParameterSet;
use crate::settings::Settings;
use crate::Result;

/// 提交阶段的结果
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// 部署已被远端接受，进入轮询
    Polling(DeploymentRecord),
    /// 提交前或对账后判定失败
    Failed(DeploymentRecord),
}

impl SubmitOutcome {
    pub fn record(&self) -> &DeploymentRecord {
        match self {
            Self::Polling(record) | Self::Failed(record) => record,
        }
    }

    pub fn is_polling(&self) -> bool {
        matches!(self, Self::Polling(_))
    }
}

/// 预检（dry-run）结果
#[derive(Debug, Clone, PartialEq)]
pub enum DryRunOutcome {
    /// 远端预检通过
    Passed,
    /// 远端预检失败
    Rejected(ErrorClass),
    /// 资源组不存在，跳过远端预检
    Skipped,
}

/// 记录的句柄
pub fn handle_of(record: &DeploymentRecord) -> DeploymentHandle {
    DeploymentHandle::new(&record.resource_group, &record.deployment_name)
}

/// 查询失败的部署操作，查询本身失败时返回空列表
pub(crate) async fn fetch_failed_operations(
    client: &dyn DeploymentClient,
    handle: &DeploymentHandle,
    timeout: Duration,
) -> Vec<OperationError> {
    match client.get_operations(handle, timeout).await {
        Ok(ops) => ops,
        Err(e) => {
            warn!("查询失败操作出错 {}: {}", handle, e);
            Vec::new()
        }
    }
}

/// 部署编排器
pub struct Orchestrator {
    client: Arc<dyn DeploymentClient>,
    storage: Arc<Storage>,
    settings: Arc<Settings>,
    classifier: ErrorClassifier,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn DeploymentClient>,
        storage: Arc<Storage>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            client,
            storage,
            settings,
            classifier: ErrorClassifier::new(),
        }
    }

    /// 创建部署记录（Pending），并落盘参数文件
    pub async fn prepare(&self, params: &ParameterSet, template: &Path) -> Result<DeploymentRecord> {
        let id = params.deployment_id();
        let params_file = self
            .storage
            .parameters()
            .write(id, &params.to_arm_document())
            .await?;

        let mut record = DeploymentRecord::new(
            id,
            &params.scenario,
            &params.names.resource_group,
            &params.names.deployment_name,
            template,
            &params.region,
            self.settings.cleanup.policy,
        );
        record.created_at = params.names.created_at;
        record.parameters_file = Some(params_file);
        self.storage.deployments().insert(&record).await?;

        info!(
            "创建部署记录: {} (资源组 {}, 部署 {})",
            id, record.resource_group, record.deployment_name
        );
        Ok(record)
    }

    /// 预检、提交、对账，直到 Polling 或 Failed
    pub async fn launch(
        &self,
        record: &DeploymentRecord,
        params: &ParameterSet,
        tags: &Tags,
    ) -> Result<SubmitOutcome> {
        let id = record.deployment_id.as_str();
        let handle = handle_of(record);
        let template = TemplateRef::new(&record.template);
        let payload = params.payload().with_file(
            record
                .parameters_file
                .clone()
                .unwrap_or_else(|| self.storage.parameters().path(id)),
        );
        let deployment = &self.settings.deployment;

        // 资源组创建属于预检阶段
        self.storage.deployments().transition(id, DeploymentState::Validating).await?;
        if let Err(e) = self
            .client
            .create_resource_group(&record.resource_group, &record.region, tags, deployment.call_timeout)
            .await
        {
            error!("创建资源组失败 {}: {}", record.resource_group, e);
            let raw = e.raw_diagnostics();
            let class = self.classifier.classify(&raw);
            return self.fail_with(id, class, raw, Vec::new()).await.map(SubmitOutcome::Failed);
        }

        // 预检
        info!("预检部署: {}", handle);
        let outcome = match self
            .client
            .validate(&handle, &template, &payload, deployment.submit_timeout)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => ValidationOutcome::failed(e.raw_diagnostics()),
        };
        if !outcome.passed {
            let class = self.classifier.classify(&outcome.diagnostics);
            if class == ErrorClass::TransientToolingGlitch {
                warn!("预检返回已知的 CLI 缺陷签名，继续提交: {}", id);
            } else {
                warn!("预检失败 {}: {}", id, class);
                return self
                    .fail_with(id, class, outcome.diagnostics, Vec::new())
                    .await
                    .map(SubmitOutcome::Failed);
            }
        }

        // 提交
        self.storage.deployments().transition(id, DeploymentState::Submitted).await?;
        info!("提交部署: {}", handle);
        match self
            .client
            .submit(&handle, &template, &payload, deployment.submit_timeout)
            .await
        {
            Ok(_) => {
                let record = self.storage.deployments().transition(id, DeploymentState::Polling).await?;
                Ok(SubmitOutcome::Polling(record))
            }
            Err(e) => self.reconcile(id, &handle, e).await,
        }
    }

    /// 提交返回错误后的对账：以远端状态为准
    async fn reconcile(
        &self,
        id: &str,
        handle: &DeploymentHandle,
        submit_error: ProviderError,
    ) -> Result<SubmitOutcome> {
        let raw = submit_error.raw_diagnostics();
        let class = self.classifier.classify(&raw);
        if class.needs_reconciliation() {
            warn!("提交结果无法判定 {} ({})，重新查询部署状态", id, class.name());
        } else {
            warn!("提交返回错误 {} ({})，仍以远端状态为准", id, class.name());
        }

        tokio::time::sleep(self.settings.deployment.reconciliation_delay).await;

        let status = self
            .client
            .get_status(handle, self.settings.deployment.call_timeout)
            .await;

        match status {
            Ok(report) if report.state.indicates_progress() => {
                info!("对账确认部署存在 {}: {}", id, report.state);
                let record = self
                    .storage
                    .deployments()
                    .update(id, |record| {
                        record.error = Some(ErrorRecord::new(class, raw));
                        record.transition(DeploymentState::Polling)?;
                        record.last_polled_at = Some(chrono::Utc::now());
                        Ok(record.clone())
                    })
                    .await?;
                Ok(SubmitOutcome::Polling(record))
            }
            Ok(report) => {
                warn!("对账确认部署未成功 {}: {}", id, report.state);
                let operations = fetch_failed_operations(
                    self.client.as_ref(),
                    handle,
                    self.settings.deployment.call_timeout,
                )
                .await;
                let raw = if report.raw_diagnostics.is_empty() {
                    raw
                } else {
                    format!("{}\n{}", raw, report.raw_diagnostics)
                };
                self.fail_with(id, class, raw, operations).await.map(SubmitOutcome::Failed)
            }
            Err(e) => {
                error!("对账查询失败 {}: {}", id, e);
                let raw = format!("{}\n对账查询失败: {}", raw, e);
                self.fail_with(id, class, raw, Vec::new()).await.map(SubmitOutcome::Failed)
            }
        }
    }

    /// 记录错误分类并转入 Failed
    async fn fail_with(
        &self,
        id: &str,
        class: ErrorClass,
        raw: String,
        operations: Vec<OperationError>,
    ) -> Result<DeploymentRecord> {
        // 工具噪声或未知错误时，以失败操作作为原因
        let reason = match self.classifier.summarize_operations(&operations) {
            Some(summary) if class.needs_reconciliation() => summary.to_failure_reason(),
            _ => class.to_failure_reason(),
        };

        let record = self
            .storage
            .deployments()
            .update(id, |record| {
                let mut error = ErrorRecord::new(class, raw);
                error.failed_operations = operations.iter().map(|op| op.to_string()).collect();
                record.error = Some(error);
                record.fail(reason)?;
                Ok(record.clone())
            })
            .await?;

        warn!(
            "部署失败 {}: {}",
            id,
            record.failure.as_ref().map(|f| f.to_string()).unwrap_or_default()
        );
        Ok(record)
    }

    /// 仅预检：资源组不存在时跳过
    pub async fn dry_run(&self, params: &ParameterSet, template: &Path) -> Result<DryRunOutcome> {
        let timeout = self.settings.deployment.call_timeout;
        let rg = &params.names.resource_group;
        if !self.client.resource_group_exists(rg, timeout).await? {
            warn!("资源组 {} 不存在，跳过远端预检", rg);
            return Ok(DryRunOutcome::Skipped);
        }

        let handle = DeploymentHandle::new(rg, &params.names.deployment_name);
        let payload = params
            .payload()
            .with_file(self.storage.parameters().path(params.deployment_id()));
        let outcome = match self
            .client
            .validate(
                &handle,
                &TemplateRef::new(template),
                &payload,
                self.settings.deployment.submit_timeout,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => ValidationOutcome::failed(e.raw_diagnostics()),
        };

        if outcome.passed {
            debug!("预检通过: {}", handle);
            Ok(DryRunOutcome::Passed)
        } else {
            Ok(DryRunOutcome::Rejected(self.classifier.classify(&outcome.diagnostics)))
        }
    }
}
