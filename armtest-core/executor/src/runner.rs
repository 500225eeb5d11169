//! 部署运行器
//!
//! 把编排器、监控器、提取器、验证器和清理管理串成一次完整的测试运行。
//! 多个场景并发执行，每个场景的失败互不影响，最终逐个返回结果。

use armtest_common::{CleanupPolicy, DeploymentState, ValidationResult};
use armtest_provider::DeploymentClient;
use armtest_storage::{DeploymentRecord, Storage};
use armtest_validator::{ProbeCredentials, ProbeFactory, Validator};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::extractor::{ConnectionExtractor, OutputMapping};
use crate::lifecycle::{CleanupSummary, LifecycleManager};
use crate::monitor::{Monitor, ProgressRenderer};
use crate::orchestrator::{DryRunOutcome, Orchestrator};
use crate::parameters::{ParameterGenerator, ParameterSet, RunContext};
use crate::scenario::Scenario;
use crate::settings::Settings;
use crate::template::TemplateSchema;
use crate::{ExecutorError, Result};

/// 运行选项
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// 只生成参数并预检
    pub dry_run: bool,
    /// 提交后立即返回，不等待终态
    pub no_wait: bool,
    /// 部署成功后执行功能验证
    pub validate: bool,
    /// 覆盖默认区域
    pub region: Option<String>,
    /// `key=value` 参数覆盖
    pub overrides: Vec<(String, String)>,
    /// 到达终态后按策略清理
    pub cleanup: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            no_wait: false,
            validate: true,
            region: None,
            overrides: Vec::new(),
            cleanup: true,
        }
    }
}

/// 单个场景的运行结果
#[derive(Debug)]
pub struct DeploymentOutcome {
    pub scenario: String,
    pub deployment_id: Option<String>,
    pub record: Option<DeploymentRecord>,
    pub parameters_file: Option<PathBuf>,
    pub dry_run: Option<DryRunOutcome>,
    pub connection: Option<armtest_common::ConnectionDescriptor>,
    pub validation: Option<ValidationResult>,
    pub cleanup: Option<CleanupSummary>,
    pub error: Option<ExecutorError>,
}

impl DeploymentOutcome {
    fn new(scenario: &str) -> Self {
        Self {
            scenario: scenario.to_string(),
            deployment_id: None,
            record: None,
            parameters_file: None,
            dry_run: None,
            connection: None,
            validation: None,
            cleanup: None,
            error: None,
        }
    }

    fn with_error(mut self, error: ExecutorError) -> Self {
        self.error = Some(error);
        self
    }

    /// 当前记录状态
    pub fn state(&self) -> Option<DeploymentState> {
        self.record.as_ref().map(|r| r.state)
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == 0
    }

    /// 0 成功；1 配置；2 远端/部署；3 功能验证
    pub fn exit_code(&self) -> i32 {
        if let Some(error) = &self.error {
            return error.exit_code();
        }
        if let Some(error) = self.validation.as_ref().and_then(ExecutorError::from_validation) {
            return error.exit_code();
        }
        if let Some(failure) = self.record.as_ref().and_then(|r| r.failure.as_ref()) {
            return ExecutorError::from_failure(failure).exit_code();
        }
        if let Some(DryRunOutcome::Rejected(_)) = &self.dry_run {
            return 2;
        }
        0
    }
}

/// 部署运行器
pub struct DeploymentRunner {
    settings: Arc<Settings>,
    client: Arc<dyn DeploymentClient>,
    storage: Arc<Storage>,
    probes: Arc<dyn ProbeFactory>,
    cancel: CancellationToken,
}

impl DeploymentRunner {
    pub fn new(
        settings: Arc<Settings>,
        client: Arc<dyn DeploymentClient>,
        storage: Arc<Storage>,
        probes: Arc<dyn ProbeFactory>,
    ) -> Self {
        Self {
            settings,
            client,
            storage,
            probes,
            cancel: CancellationToken::new(),
        }
    }

    /// 取消令牌：取消后停止所有本地轮询（远端部署不受影响）
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.client.clone(), self.storage.clone(), self.settings.clone())
    }

    fn extractor(&self) -> ConnectionExtractor {
        ConnectionExtractor::new(
            self.client.clone(),
            self.storage.clone(),
            self.settings.deployment.call_timeout,
        )
    }

    fn lifecycle(&self) -> LifecycleManager {
        LifecycleManager::new(
            self.client.clone(),
            self.storage.clone(),
            self.settings.deployment.call_timeout,
        )
    }

    /// 运行一组场景
    pub async fn run<R>(&self, scenarios: &[Scenario], options: &RunOptions, renderer: R) -> Vec<DeploymentOutcome>
    where
        R: ProgressRenderer + 'static,
    {
        let region = options
            .region
            .clone()
            .unwrap_or_else(|| self.settings.azure.default_region.clone());
        let context = RunContext::new(region)
            .with_run_id(Uuid::new_v4().to_string())
            .with_overrides(options.overrides.clone());
        info!(
            "开始测试运行 {}: {} 个场景，区域 {}",
            context.run_id,
            scenarios.len(),
            context.region
        );

        // 1. 参数生成、预检、提交
        let launches = join_all(
            scenarios
                .iter()
                .map(|scenario| self.launch_scenario(scenario, &context, options)),
        )
        .await;

        if options.dry_run || options.no_wait {
            return launches.into_iter().map(|(outcome, _)| outcome).collect();
        }

        // 2. 并发监控所有在途部署
        let monitor = Monitor::new(self.client.clone(), self.storage.clone(), self.settings.clone());
        let render_task = monitor.spawn_renderer(renderer);
        let waits = launches.into_iter().map(|(mut outcome, polling)| {
            let handle = polling.map(|record| monitor.spawn(&record, self.cancel.child_token()));
            async move {
                if let Some(handle) = handle {
                    match handle.wait().await {
                        Ok(record) => outcome.record = Some(record),
                        Err(e) => outcome.error = Some(e),
                    }
                }
                outcome
            }
        });
        let monitored = join_all(waits).await;
        drop(monitor);
        if let Err(e) = render_task.await {
            warn!("进度渲染任务异常退出: {}", e);
        }

        // 3. 提取、验证、清理
        join_all(
            monitored
                .into_iter()
                .zip(scenarios)
                .map(|(outcome, scenario)| {
                    self.finish_deployment(outcome, scenario.config.node_count(), options)
                }),
        )
        .await
    }

    /// 单个场景：返回结果，以及需要继续监控的记录
    async fn launch_scenario(
        &self,
        scenario: &Scenario,
        context: &RunContext,
        options: &RunOptions,
    ) -> (DeploymentOutcome, Option<DeploymentRecord>) {
        let mut outcome = DeploymentOutcome::new(&scenario.name);
        if self.cancel.is_cancelled() {
            return (outcome.with_error(ExecutorError::Cancelled), None);
        }

        let template = self.settings.template_path(scenario.template.as_deref());
        let prepared = TemplateSchema::load(&template).and_then(|schema| {
            let password = self.settings.credentials.password_strategy.resolve()?;
            ParameterGenerator::new(&self.settings, &schema).generate(scenario, context, &password)
        });
        let params = match prepared {
            Ok(params) => params,
            Err(e) => {
                error!("场景 {} 参数生成失败: {}", scenario.name, e);
                return (outcome.with_error(e), None);
            }
        };
        outcome.deployment_id = Some(params.deployment_id().to_string());

        let orchestrator = self.orchestrator();
        if options.dry_run {
            match self.dry_run_scenario(&orchestrator, &params, &template).await {
                Ok((path, dry_run)) => {
                    info!("场景 {} 预检结果: {:?}", scenario.name, dry_run);
                    outcome.parameters_file = Some(path);
                    outcome.dry_run = Some(dry_run);
                }
                Err(e) => outcome.error = Some(e),
            }
            return (outcome, None);
        }

        let record = match orchestrator.prepare(&params, &template).await {
            Ok(record) => record,
            Err(e) => return (outcome.with_error(e), None),
        };
        outcome.parameters_file = record.parameters_file.clone();

        let owner = self
            .settings
            .azure
            .owner_email
            .clone()
            .unwrap_or_else(|| context.owner.clone());
        let tags = params.names.tags(
            &scenario.name,
            &owner,
            record.cleanup_policy,
            self.settings.cleanup.schedule_hours,
        );

        match orchestrator.launch(&record, &params, &tags).await {
            Ok(submitted) => {
                let polling = submitted.is_polling();
                let record = submitted.record().clone();
                outcome.record = Some(record.clone());
                (outcome, polling.then_some(record))
            }
            Err(e) => (outcome.with_error(e), None),
        }
    }

    async fn dry_run_scenario(
        &self,
        orchestrator: &Orchestrator,
        params: &ParameterSet,
        template: &Path,
    ) -> Result<(PathBuf, DryRunOutcome)> {
        let path = self
            .storage
            .parameters()
            .write(params.deployment_id(), &params.to_arm_document())
            .await?;
        let dry_run = orchestrator.dry_run(params, template).await?;
        Ok((path, dry_run))
    }

    /// 终态后的处理：成功则提取连接并验证，最后按策略清理
    async fn finish_deployment(
        &self,
        mut outcome: DeploymentOutcome,
        node_count: u32,
        options: &RunOptions,
    ) -> DeploymentOutcome {
        let Some(record) = outcome.record.clone() else {
            return outcome;
        };

        if record.state == DeploymentState::Succeeded {
            let mapping = OutputMapping::neo4j(node_count);
            match self.extractor().extract_for(&record, &mapping).await {
                Ok(descriptor) => {
                    outcome.connection = Some(descriptor);
                    if options.validate && self.settings.validation.after_deploy {
                        match self.validate_deployment(&record.deployment_id).await {
                            Ok(result) => outcome.validation = Some(result),
                            Err(e) => outcome.error = Some(e),
                        }
                    }
                }
                Err(e) => outcome.error = Some(e),
            }
        }

        // 取消后远端可能仍在部署，不做清理
        let cleanup = options.cleanup && record.state.is_terminal() && !self.cancel.is_cancelled();
        // on-success 策略下，部署成功但后续提取/验证未能执行时保留现场
        let keep_for_inspection = record.state == DeploymentState::Succeeded
            && record.cleanup_policy == CleanupPolicy::OnSuccess
            && outcome.error.is_some();
        if keep_for_inspection {
            warn!("部署 {} 的后续步骤出错，保留资源组 {}", record.deployment_id, record.resource_group);
        }
        if cleanup && !keep_for_inspection {
            match self.lifecycle().apply_policy(&record.deployment_id).await {
                Ok(summary) => outcome.cleanup = Some(summary),
                Err(e) => warn!("清理部署 {} 失败: {}", record.deployment_id, e),
            }
        }

        match self.storage.deployments().load(&record.deployment_id).await {
            Ok(latest) => outcome.record = Some(latest),
            Err(e) => warn!("重新读取部署记录失败 {}: {}", record.deployment_id, e),
        }
        outcome
    }

    /// 对已成功的部署执行功能验证，结果写入记录
    pub async fn validate_deployment(&self, deployment_id: &str) -> Result<ValidationResult> {
        let record = self.storage.deployments().load(deployment_id).await?;
        if record.state != DeploymentState::Succeeded {
            return Err(ExecutorError::Configuration(format!(
                "部署 {} 处于 {} 状态，只能验证已成功的部署",
                deployment_id, record.state
            )));
        }

        let descriptor = self.storage.connections().load(deployment_id).await?;
        let password = match self
            .storage
            .parameters()
            .read_value(deployment_id, "adminPassword")
            .await?
        {
            Some(value) => value.as_str().map(str::to_string).ok_or_else(|| {
                ExecutorError::Configuration(format!("部署 {} 的 adminPassword 不是字符串", deployment_id))
            })?,
            None => self.settings.credentials.password_strategy.resolve()?,
        };
        let identity = if descriptor.identity.is_empty() {
            self.settings.credentials.username.clone()
        } else {
            descriptor.identity.clone()
        };

        let probe = self
            .probes
            .create(&descriptor, ProbeCredentials::new(identity, password))?;
        let result = Validator::new(self.settings.validation.retry.clone())
            .validate(probe.as_ref())
            .await;

        self.storage
            .deployments()
            .update(deployment_id, |record| {
                record.validations.push(result.clone());
                Ok(())
            })
            .await?;

        if result.pass {
            info!("部署 {} 功能验证通过", deployment_id);
        } else {
            warn!(
                "部署 {} 功能验证失败: {:?}",
                deployment_id,
                result.failed_assertions().map(|a| a.name.as_str()).collect::<Vec<_>>()
            );
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armtest_common::{FailureReason, ValidationFailure};

    fn validation(pass: bool) -> ValidationResult {
        if pass {
            ValidationResult::from_assertions(
                vec![armtest_common::Assertion::pass("connect")],
                Vec::new(),
                chrono::Utc::now(),
            )
        } else {
            ValidationResult::unreachable(vec!["refused".into()], chrono::Utc::now())
        }
    }

    #[test]
    fn test_exit_code_precedence() {
        let outcome = DeploymentOutcome::new("s");
        assert_eq!(outcome.exit_code(), 0);

        let mut outcome = DeploymentOutcome::new("s");
        outcome.validation = Some(validation(false));
        assert_eq!(outcome.validation.as_ref().unwrap().reason, Some(ValidationFailure::Unreachable));
        assert_eq!(outcome.exit_code(), 3);

        let outcome = DeploymentOutcome::new("s").with_error(ExecutorError::Configuration("x".into()));
        assert_eq!(outcome.exit_code(), 1);

        let mut outcome = DeploymentOutcome::new("s");
        outcome.dry_run = Some(DryRunOutcome::Rejected(armtest_common::ErrorClass::TemplateInvalid {
            message: "bad".into(),
        }));
        assert_eq!(outcome.exit_code(), 2);

        let mut record = DeploymentRecord::new(
            "id",
            "s",
            "rg",
            "dep",
            "t.json",
            "eastus",
            armtest_common::CleanupPolicy::Manual,
        );
        record.fail(FailureReason::Timeout).unwrap();
        let mut outcome = DeploymentOutcome::new("s");
        outcome.record = Some(record);
        outcome.validation = Some(validation(true));
        assert_eq!(outcome.exit_code(), 2);
    }

    #[test]
    fn test_default_options() {
        let options = RunOptions::default();
        assert!(options.validate);
        assert!(options.cleanup);
        assert!(!options.dry_run);
    }
}
