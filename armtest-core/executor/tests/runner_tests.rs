//! 部署运行器端到端测试（mock 部署客户端 + 内存探针）

use armtest_common::{
    CleanupPolicy, ConnectionDescriptor, DeploymentState, FailureReason, ValidationFailure,
    MANAGED_BY_TAG, MANAGED_BY_VALUE,
};
use armtest_executor::{
    CleanupAction, CleanupOptions, CleanupTarget, CollectingRenderer, DeploymentRunner,
    DryRunOutcome, ExecutorError, LifecycleManager, ParameterGenerator, PasswordStrategy,
    RunContext, RunOptions, Scenario, ScenarioRegistry, Settings, TemplateSchema,
};
use armtest_provider::{
    MockDeploymentClient, ProvisioningState, SubmitBehavior, Tags, ValidationOutcome,
};
use armtest_storage::{DeploymentRecord, Storage, StorageManager};
use armtest_validator::{
    InMemoryProbe, ProbeCredentials, ProbeFactory, RetryPolicy, ServiceProbe, ValidatorError,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const TEMPLATE: &str = r#"{
  "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#",
  "parameters": {
    "location": { "type": "string" },
    "adminPassword": { "type": "securestring" },
    "nodeCount": { "type": "int", "allowedValues": [1, 3, 4, 5, 6, 7, 8, 9, 10] },
    "graphDatabaseVersion": { "type": "string", "allowedValues": ["5", "4.4"] },
    "diskSize": { "type": "int" },
    "licenseType": { "type": "string" },
    "vmSize": { "type": "string" },
    "readReplicaCount": { "type": "int", "defaultValue": 0 },
    "readReplicaVmSize": { "type": "string", "defaultValue": "Standard_E4s_v5" },
    "readReplicaDiskSize": { "type": "int", "defaultValue": 32 },
    "installGraphDataScience": { "type": "string" },
    "graphDataScienceLicenseKey": { "type": "string", "defaultValue": "None" },
    "installBloom": { "type": "string" },
    "bloomLicenseKey": { "type": "string", "defaultValue": "None" }
  },
  "outputs": {}
}"#;

/// 共享同一个内存探针，便于测试后检查
struct SharedProbe(Arc<InMemoryProbe>);

#[async_trait]
impl ServiceProbe for SharedProbe {
    fn name(&self) -> &str {
        self.0.name()
    }

    async fn connect(&self) -> Result<(), ValidatorError> {
        self.0.connect().await
    }

    async fn write_probe(&self, key: &str, value: &str) -> Result<(), ValidatorError> {
        self.0.write_probe(key, value).await
    }

    async fn read_probe(&self, key: &str) -> Result<Option<String>, ValidatorError> {
        self.0.read_probe(key).await
    }

    async fn delete_probe(&self, key: &str) -> Result<(), ValidatorError> {
        self.0.delete_probe(key).await
    }
}

#[derive(Default)]
struct MemoryProbeFactory {
    probe: Arc<InMemoryProbe>,
    seen: Mutex<Vec<(ConnectionDescriptor, ProbeCredentials)>>,
}

impl MemoryProbeFactory {
    fn with_probe(probe: InMemoryProbe) -> Self {
        Self {
            probe: Arc::new(probe),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<(ConnectionDescriptor, ProbeCredentials)> {
        self.seen.lock().unwrap().clone()
    }
}

impl ProbeFactory for MemoryProbeFactory {
    fn create(
        &self,
        descriptor: &ConnectionDescriptor,
        credentials: ProbeCredentials,
    ) -> Result<Box<dyn ServiceProbe>, ValidatorError> {
        self.seen.lock().unwrap().push((descriptor.clone(), credentials));
        Ok(Box::new(SharedProbe(self.probe.clone())))
    }
}

struct Harness {
    _tmp: TempDir,
    settings: Arc<Settings>,
    storage: Arc<Storage>,
}

impl Harness {
    fn new() -> Self {
        Self::with_policy(CleanupPolicy::OnSuccess)
    }

    fn with_policy(policy: CleanupPolicy) -> Self {
        let tmp = TempDir::new().unwrap();
        let templates = tmp.path().join("templates");
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::write(templates.join("mainTemplate.json"), TEMPLATE).unwrap();

        let mut settings = Settings::default();
        settings.templates.dir = templates;
        settings.deployment.poll_interval = Duration::from_millis(20);
        settings.deployment.timeout = Duration::from_secs(20);
        settings.deployment.call_timeout = Duration::from_secs(5);
        settings.deployment.reconciliation_delay = Duration::from_millis(10);
        settings.validation.retry =
            RetryPolicy::new(2, Duration::from_millis(10), Duration::from_secs(2));
        settings.credentials.password_strategy = PasswordStrategy::Fixed("S3cret-pass!".into());
        settings.cleanup.policy = policy;

        let manager = StorageManager::new(tmp.path().join("state").to_str().unwrap()).unwrap();
        Self {
            _tmp: tmp,
            settings: Arc::new(settings),
            storage: Arc::new(Storage::from_manager(&manager)),
        }
    }

    fn runner(
        &self,
        client: Arc<MockDeploymentClient>,
        probes: Arc<MemoryProbeFactory>,
    ) -> DeploymentRunner {
        DeploymentRunner::new(self.settings.clone(), client, self.storage.clone(), probes)
    }
}

fn standalone() -> Scenario {
    ScenarioRegistry::default_scenarios().remove(0)
}

fn standalone_outputs() -> Vec<(&'static str, &'static str)> {
    vec![("neo4jBrowserURL", "svc-abc:7474"), ("username", "neo4j")]
}

fn options() -> RunOptions {
    RunOptions::default()
}

#[tokio::test]
async fn test_standalone_run_succeeds_and_cleans_up() {
    let h = Harness::new();
    let client = Arc::new(
        MockDeploymentClient::new()
            .with_statuses(vec![ProvisioningState::Running, ProvisioningState::Succeeded])
            .with_outputs(standalone_outputs()),
    );
    let probes = Arc::new(MemoryProbeFactory::default());
    let renderer = CollectingRenderer::new();

    let outcomes = h
        .runner(client.clone(), probes.clone())
        .run(&[standalone()], &options(), renderer.clone())
        .await;

    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    assert_eq!(outcome.exit_code(), 0);

    let connection = outcome.connection.as_ref().unwrap();
    assert_eq!(connection.endpoint, "svc-abc:7474");
    assert_eq!(connection.identity, "neo4j");

    let validation = outcome.validation.as_ref().unwrap();
    assert!(validation.pass);
    // 验证结束后探针数据已删除
    assert!(probes.probe.stored_keys().is_empty());
    assert_eq!(probes.probe.written_keys().len(), 1);

    let (_, credentials) = &probes.seen()[0];
    assert_eq!(credentials.username, "neo4j");
    assert_eq!(credentials.password, "S3cret-pass!");

    // OnSuccess：成功后删除资源组
    let record = outcome.record.as_ref().unwrap();
    assert_eq!(record.state, DeploymentState::CleanedUp);
    assert!(record.cleanup_requested_at.is_some());
    assert_eq!(record.validations.len(), 1);
    assert_eq!(client.deleted_groups(), vec![record.resource_group.clone()]);
    assert_eq!(outcome.cleanup.as_ref().unwrap().cleaned, 1);

    let phases = renderer.phases(&record.deployment_id);
    assert_eq!(phases.last().map(String::as_str), Some("Succeeded"));
}

#[tokio::test]
async fn test_authorization_denied_never_submits() {
    let h = Harness::new();
    let client = Arc::new(MockDeploymentClient::new().with_validation(ValidationOutcome::failed(
        "ERROR: The client does not have permission to perform action 'role/write'",
    )));
    let outcomes = h
        .runner(client.clone(), Arc::new(MemoryProbeFactory::default()))
        .run(&[standalone()], &options(), CollectingRenderer::new())
        .await;

    let outcome = &outcomes[0];
    let record = outcome.record.as_ref().unwrap();
    assert_eq!(record.state, DeploymentState::Failed);
    assert_eq!(record.failure, Some(FailureReason::AuthorizationDenied("role/write".into())));
    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(client.submit_count(), 0);
    // OnSuccess 保留失败部署的资源组
    assert!(client.deleted_groups().is_empty());
}

#[tokio::test]
async fn test_ambiguous_submit_is_reconciled() {
    let h = Harness::new();
    let client = Arc::new(
        MockDeploymentClient::new()
            .with_submit(SubmitBehavior::Fail(
                "ERROR: The content for this response was already consumed".into(),
            ))
            .with_statuses(vec![ProvisioningState::Running, ProvisioningState::Succeeded])
            .with_outputs(standalone_outputs()),
    );
    let outcomes = h
        .runner(client.clone(), Arc::new(MemoryProbeFactory::default()))
        .run(&[standalone()], &options(), CollectingRenderer::new())
        .await;

    let outcome = &outcomes[0];
    assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.error);
    assert_eq!(client.submit_count(), 1);
    let record = outcome.record.as_ref().unwrap();
    assert!(record.state_path().contains(&DeploymentState::Succeeded));
}

#[tokio::test]
async fn test_unreachable_service_exits_with_validation_code() {
    let h = Harness::new();
    let client = Arc::new(
        MockDeploymentClient::new()
            .with_statuses(vec![ProvisioningState::Succeeded])
            .with_outputs(standalone_outputs()),
    );
    let probes = Arc::new(MemoryProbeFactory::with_probe(InMemoryProbe::new().always_unreachable()));

    let outcomes = h
        .runner(client, probes.clone())
        .run(&[standalone()], &options(), CollectingRenderer::new())
        .await;

    let outcome = &outcomes[0];
    let validation = outcome.validation.as_ref().unwrap();
    assert!(!validation.pass);
    assert_eq!(validation.reason, Some(ValidationFailure::Unreachable));
    assert_eq!(outcome.exit_code(), 3);
    assert_eq!(probes.probe.connect_attempts(), 2);
}

#[tokio::test]
async fn test_missing_output_is_shape_mismatch() {
    let h = Harness::new();
    let client = Arc::new(
        MockDeploymentClient::new()
            .with_statuses(vec![ProvisioningState::Succeeded])
            .with_outputs(vec![("neo4jBrowserURL", "svc-abc:7474")]),
    );
    let probes = Arc::new(MemoryProbeFactory::default());
    let outcomes = h
        .runner(client.clone(), probes.clone())
        .run(&[standalone()], &options(), CollectingRenderer::new())
        .await;

    let outcome = &outcomes[0];
    assert!(matches!(
        outcome.error,
        Some(ExecutorError::OutputShapeMismatch { ref field }) if field == "username"
    ));
    assert_eq!(outcome.exit_code(), 2);
    assert!(outcome.validation.is_none());
    assert!(probes.seen().is_empty());
    // 提取失败时 on-success 不清理
    assert!(client.deleted_groups().is_empty());
    assert_eq!(outcome.record.as_ref().unwrap().state, DeploymentState::Succeeded);
}

#[tokio::test]
async fn test_on_success_keeps_group_when_validation_fails() {
    let h = Harness::new();
    let client = Arc::new(
        MockDeploymentClient::new()
            .with_statuses(vec![ProvisioningState::Succeeded])
            .with_outputs(standalone_outputs()),
    );
    let probes = Arc::new(MemoryProbeFactory::with_probe(InMemoryProbe::new().always_unreachable()));

    let outcomes = h
        .runner(client.clone(), probes)
        .run(&[standalone()], &options(), CollectingRenderer::new())
        .await;

    let outcome = &outcomes[0];
    assert!(!outcome.validation.as_ref().unwrap().pass);
    let record = outcome.record.as_ref().unwrap();
    assert_eq!(record.state, DeploymentState::Succeeded);
    assert!(record.cleanup_requested_at.is_none());
    assert!(client.deleted_groups().is_empty());

    let cleanup = outcome.cleanup.as_ref().unwrap();
    assert_eq!(cleanup.cleaned, 0);
    assert_eq!(cleanup.decisions[0].action, CleanupAction::Skip);
}

#[tokio::test]
async fn test_dry_run_writes_parameters_only() {
    let h = Harness::new();
    let client = Arc::new(MockDeploymentClient::new());
    let dry_run = RunOptions {
        dry_run: true,
        ..RunOptions::default()
    };
    let outcomes = h
        .runner(client.clone(), Arc::new(MemoryProbeFactory::default()))
        .run(&[standalone()], &dry_run, CollectingRenderer::new())
        .await;

    let outcome = &outcomes[0];
    assert_eq!(outcome.dry_run, Some(DryRunOutcome::Skipped));
    assert_eq!(outcome.exit_code(), 0);
    assert!(outcome.parameters_file.as_ref().unwrap().exists());
    assert!(h.storage.deployments().list().await.unwrap().is_empty());
    assert_eq!(client.submit_count(), 0);
}

#[tokio::test]
async fn test_undeclared_override_is_configuration_error() {
    let h = Harness::new();
    let client = Arc::new(MockDeploymentClient::new());
    let bad = RunOptions {
        overrides: vec![("notAParameter".into(), "1".into())],
        ..RunOptions::default()
    };
    let outcomes = h
        .runner(client.clone(), Arc::new(MemoryProbeFactory::default()))
        .run(&[standalone()], &bad, CollectingRenderer::new())
        .await;

    assert_eq!(outcomes[0].exit_code(), 1);
    assert!(outcomes[0].record.is_none());
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn test_scenarios_fail_independently() {
    let h = Harness::new();
    let client = Arc::new(
        MockDeploymentClient::new()
            .with_statuses(vec![ProvisioningState::Succeeded])
            .with_outputs(standalone_outputs()),
    );
    let broken = Scenario::new("broken", standalone().config).with_template("missing.json");
    let outcomes = h
        .runner(client, Arc::new(MemoryProbeFactory::default()))
        .run(&[standalone(), broken], &options(), CollectingRenderer::new())
        .await;

    assert_eq!(outcomes[0].exit_code(), 0);
    assert_eq!(outcomes[1].scenario, "broken");
    assert_eq!(outcomes[1].exit_code(), 1);
}

#[tokio::test]
async fn test_validate_deployment_requires_success() {
    let h = Harness::new();
    let record = DeploymentRecord::new(
        "dep-1",
        "standalone-v5",
        "rg",
        "dep",
        "t.json",
        "eastus",
        CleanupPolicy::Manual,
    );
    h.storage.deployments().insert(&record).await.unwrap();

    let runner = h.runner(Arc::new(MockDeploymentClient::new()), Arc::new(MemoryProbeFactory::default()));
    let err = runner.validate_deployment("dep-1").await.unwrap_err();
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn test_parameters_are_deterministic() {
    let h = Harness::new();
    let schema = TemplateSchema::from_json(TEMPLATE).unwrap();
    let context = RunContext::new("eastus").with_run_id("run-42");
    let generator = ParameterGenerator::new(&h.settings, &schema);

    let a = generator.generate(&standalone(), &context, "pw").unwrap();
    let b = generator.generate(&standalone(), &context, "pw").unwrap();
    assert_eq!(a.values, b.values);
    assert_eq!(a.names, b.names);

    let other = generator
        .generate(&standalone(), &RunContext::new("eastus").with_run_id("run-43"), "pw")
        .unwrap();
    assert_ne!(a.names.deployment_id, other.names.deployment_id);
}

// 清理

async fn terminal_record(
    storage: &Storage,
    id: &str,
    state: DeploymentState,
    policy: CleanupPolicy,
) -> DeploymentRecord {
    let mut record = DeploymentRecord::new(
        id,
        "standalone-v5",
        format!("rg-{}", id),
        format!("dep-{}", id),
        "t.json",
        "eastus",
        policy,
    );
    record.transition(DeploymentState::Validating).unwrap();
    record.transition(DeploymentState::Submitted).unwrap();
    record.transition(DeploymentState::Polling).unwrap();
    if state == DeploymentState::Failed {
        record.fail(FailureReason::Timeout).unwrap();
    } else {
        record.transition(state).unwrap();
    }
    storage.deployments().insert(&record).await.unwrap();
    record
}

fn managed() -> Tags {
    let mut tags = Tags::new();
    tags.insert(MANAGED_BY_TAG.into(), MANAGED_BY_VALUE.into());
    tags
}

#[tokio::test]
async fn test_on_success_cleanup_only_deletes_succeeded() {
    let h = Harness::new();
    let ok = terminal_record(&h.storage, "ok", DeploymentState::Succeeded, CleanupPolicy::OnSuccess).await;
    let failed = terminal_record(&h.storage, "failed", DeploymentState::Failed, CleanupPolicy::OnSuccess).await;
    let client = Arc::new(
        MockDeploymentClient::new()
            .with_resource_group(&ok.resource_group, managed())
            .with_resource_group(&failed.resource_group, managed()),
    );
    let manager = LifecycleManager::new(client.clone(), h.storage.clone(), Duration::from_secs(5));

    let summary = manager.cleanup(&CleanupOptions::new(CleanupTarget::All)).await.unwrap();
    assert_eq!(summary.cleaned, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(client.deleted_groups(), vec![ok.resource_group.clone()]);
    assert_eq!(h.storage.deployments().load("ok").await.unwrap().state, DeploymentState::CleanedUp);
    assert_eq!(h.storage.deployments().load("failed").await.unwrap().state, DeploymentState::Failed);

    // 再次清理不会重复删除
    let again = manager.cleanup(&CleanupOptions::new(CleanupTarget::All)).await.unwrap();
    assert_eq!(again.cleaned, 0);
    assert_eq!(client.deleted_groups().len(), 1);
}

#[tokio::test]
async fn test_unmanaged_group_is_kept() {
    let h = Harness::new();
    let record = terminal_record(&h.storage, "x", DeploymentState::Succeeded, CleanupPolicy::Always).await;
    let client = Arc::new(MockDeploymentClient::new().with_resource_group(&record.resource_group, Tags::new()));
    let manager = LifecycleManager::new(client.clone(), h.storage.clone(), Duration::from_secs(5));

    let summary = manager.apply_policy("x").await.unwrap();
    assert_eq!(summary.skipped, 1);
    assert!(client.deleted_groups().is_empty());
    assert_eq!(h.storage.deployments().load("x").await.unwrap().state, DeploymentState::Succeeded);
}

#[tokio::test]
async fn test_missing_group_is_marked_cleaned() {
    let h = Harness::new();
    terminal_record(&h.storage, "gone", DeploymentState::Failed, CleanupPolicy::Always).await;
    let client = Arc::new(MockDeploymentClient::new());
    let manager = LifecycleManager::new(client.clone(), h.storage.clone(), Duration::from_secs(5));

    let summary = manager.apply_policy("gone").await.unwrap();
    assert_eq!(summary.cleaned, 1);
    assert!(client.deleted_groups().is_empty());
    assert_eq!(h.storage.deployments().load("gone").await.unwrap().state, DeploymentState::CleanedUp);
}

#[tokio::test]
async fn test_dry_run_cleanup_deletes_nothing() {
    let h = Harness::new();
    let record = terminal_record(&h.storage, "d", DeploymentState::Succeeded, CleanupPolicy::Always).await;
    let client = Arc::new(MockDeploymentClient::new().with_resource_group(&record.resource_group, managed()));
    let manager = LifecycleManager::new(client.clone(), h.storage.clone(), Duration::from_secs(5));

    let summary = manager
        .cleanup(&CleanupOptions::new(CleanupTarget::All).with_dry_run(true))
        .await
        .unwrap();
    assert_eq!(summary.decisions[0].action, CleanupAction::Delete);
    assert!(client.deleted_groups().is_empty());
    assert_eq!(client.resource_groups(), vec![record.resource_group]);
}
