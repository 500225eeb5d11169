//! 参数生成器
//!
//! 场景 + 运行上下文 → 完全解析的参数集。除唯一令牌外结果是确定的，
//! 且不会输出模板未声明的参数。

use armtest_provider::ParameterPayload;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use uuid::Uuid;

use crate::naming::DeploymentNames;
use crate::scenario::Scenario;
use crate::settings::Settings;
use crate::template::{TemplateSchema, ARTIFACTS_LOCATION, ARTIFACTS_SAS_TOKEN};
use crate::{ExecutorError, Result};

const PARAMETERS_SCHEMA: &str =
    "https://schema.management.azure.com/schemas/2019-04-01/deploymentParameters.json#";
const TOKEN_LEN: usize = 12;

/// 运行上下文
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub region: String,
    pub owner: String,
    /// 命令行覆盖 (key, value)，最后应用
    pub overrides: Vec<(String, String)>,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            region: region.into(),
            owner: std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
            overrides: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_overrides(mut self, overrides: Vec<(String, String)>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }
}

/// 解析 `key=value` 覆盖项
pub fn parse_override(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(ExecutorError::Configuration(format!(
            "参数覆盖格式应为 key=value: {}",
            raw
        ))),
    }
}

/// 由 (run_id, 场景名) 派生的资源命名令牌
pub fn naming_token(run_id: &str, scenario: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", run_id, scenario).as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..TOKEN_LEN].to_string()
}

/// 完全解析的参数集
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet {
    pub scenario: String,
    pub token: String,
    pub region: String,
    pub names: DeploymentNames,
    pub values: BTreeMap<String, Value>,
    secure_keys: BTreeSet<String>,
}

impl ParameterSet {
    pub fn deployment_id(&self) -> &str {
        &self.names.deployment_id
    }

    /// ARM 参数文件
    pub fn to_arm_document(&self) -> Value {
        json!({
            "$schema": PARAMETERS_SCHEMA,
            "contentVersion": "1.0.0.0",
            "parameters": self.payload().to_arm_parameters(),
        })
    }

    pub fn payload(&self) -> ParameterPayload {
        ParameterPayload::new(self.values.clone())
    }

    /// 日志用视图，安全参数已遮蔽
    pub fn redacted(&self) -> BTreeMap<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| {
                if self.secure_keys.contains(k) {
                    (k.clone(), json!("******"))
                } else {
                    (k.clone(), v.clone())
                }
            })
            .collect()
    }
}

/// 参数生成器
pub struct ParameterGenerator<'a> {
    settings: &'a Settings,
    schema: &'a TemplateSchema,
}

impl<'a> ParameterGenerator<'a> {
    pub fn new(settings: &'a Settings, schema: &'a TemplateSchema) -> Self {
        Self { settings, schema }
    }

    /// 生成参数集；密码由调用方按策略取得
    pub fn generate(
        &self,
        scenario: &Scenario,
        context: &RunContext,
        admin_password: &str,
    ) -> Result<ParameterSet> {
        let token = naming_token(&context.run_id, &scenario.name);
        let names = DeploymentNames::new(
            &self.settings.azure.resource_group_prefix,
            &scenario.name,
            &token,
            context.started_at,
        );

        // 场景值必须全部在模板中声明
        let mut values = BTreeMap::new();
        for (key, value) in scenario.config.template_values() {
            if !self.schema.declares(&key) {
                return Err(ExecutorError::Configuration(format!(
                    "场景 {} 引用了模板未声明的参数: {}",
                    scenario.name, key
                )));
            }
            values.insert(key, value);
        }

        // 运行上下文值，仅当模板声明时注入
        let mut inject = |key: &str, value: Value| {
            if self.schema.declares(key) {
                values.insert(key.to_string(), value);
            }
        };
        inject("location", json!(context.region));
        inject("adminPassword", json!(admin_password));
        if let Some(location) = &self.settings.templates.artifacts_location {
            inject(ARTIFACTS_LOCATION, json!(location));
        }
        if let Some(token) = &self.settings.templates.artifacts_sas_token {
            inject(ARTIFACTS_SAS_TOKEN, json!(token));
        }

        for (key, raw) in &context.overrides {
            let spec = self.schema.get(key).ok_or_else(|| {
                ExecutorError::Configuration(format!("覆盖了模板未声明的参数: {}", key))
            })?;
            let value = spec.param_type.coerce(raw).ok_or_else(|| {
                ExecutorError::Configuration(format!(
                    "参数 {} 的覆盖值无法转换为 {}",
                    key, spec.param_type
                ))
            })?;
            values.insert(key.clone(), value);
        }

        for spec in self.schema.required() {
            if !values.contains_key(&spec.name) {
                return Err(ExecutorError::Configuration(format!(
                    "缺少必填参数: {}",
                    spec.name
                )));
            }
        }
        for (key, value) in &values {
            if let Some(spec) = self.schema.get(key) {
                spec.check(value)?;
            }
        }

        let secure_keys = values
            .keys()
            .filter(|k| self.schema.is_secure(k))
            .cloned()
            .collect();

        let set = ParameterSet {
            scenario: scenario.name.clone(),
            token,
            region: context.region.clone(),
            names,
            values,
            secure_keys,
        };
        debug!(
            "参数已生成 {}: {}",
            set.deployment_id(),
            serde_json::to_string(&set.redacted()).unwrap_or_default()
        );
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::ScenarioRegistry;
    use crate::template::{ParamSpec, ParamType};

    fn spec(name: &str, t: ParamType, default: Option<Value>) -> ParamSpec {
        ParamSpec {
            name: name.to_string(),
            param_type: t,
            default_value: default,
            allowed_values: None,
        }
    }

    fn vm_schema() -> TemplateSchema {
        TemplateSchema::from_specs(vec![
            spec("location", ParamType::String, None),
            spec("adminPassword", ParamType::SecureString, None),
            spec("nodeCount", ParamType::Int, Some(json!(1))),
            spec("graphDatabaseVersion", ParamType::String, Some(json!("5"))),
            spec("diskSize", ParamType::Int, Some(json!(32))),
            spec("licenseType", ParamType::String, Some(json!("Evaluation"))),
            spec("vmSize", ParamType::String, Some(json!("Standard_E4s_v5"))),
            spec("readReplicaCount", ParamType::Int, Some(json!(0))),
            spec("readReplicaVmSize", ParamType::String, Some(json!("Standard_E4s_v5"))),
            spec("readReplicaDiskSize", ParamType::Int, Some(json!(32))),
            spec("installGraphDataScience", ParamType::String, Some(json!("No"))),
            spec("installBloom", ParamType::String, Some(json!("No"))),
        ])
    }

    fn standalone() -> Scenario {
        ScenarioRegistry::default_scenarios().remove(0)
    }

    fn context(run_id: &str) -> RunContext {
        RunContext::new("eastus").with_run_id(run_id).with_owner("qa")
    }

    #[test]
    fn test_naming_token() {
        let token = naming_token("run-1", "standalone-v5");
        assert_eq!(token.len(), 12);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(token, naming_token("run-1", "standalone-v5"));
        assert_ne!(token, naming_token("run-2", "standalone-v5"));
        assert_ne!(token, naming_token("run-1", "cluster-v5"));
    }

    #[test]
    fn test_deterministic_except_token() {
        let settings = Settings::default();
        let schema = vm_schema();
        let generator = ParameterGenerator::new(&settings, &schema);
        let ctx = context("run-1");

        let a = generator.generate(&standalone(), &ctx, "Secr3t!pw").unwrap();
        let b = generator.generate(&standalone(), &ctx, "Secr3t!pw").unwrap();
        assert_eq!(a, b);

        let c = generator
            .generate(&standalone(), &ctx.clone().with_run_id("run-2"), "Secr3t!pw")
            .unwrap();
        assert_eq!(a.values, c.values);
        assert_ne!(a.token, c.token);
    }

    #[test]
    fn test_emits_only_declared_keys() {
        let settings = Settings::default();
        let schema = vm_schema();
        let set = ParameterGenerator::new(&settings, &schema)
            .generate(&standalone(), &context("run-1"), "pw")
            .unwrap();
        assert!(set.values.keys().all(|k| schema.declares(k)));
        assert_eq!(set.values["location"], json!("eastus"));
        assert_eq!(set.values["installBloom"], json!("No"));
    }

    #[test]
    fn test_artifacts_injected_only_when_declared() {
        let mut settings = Settings::default();
        settings.templates.artifacts_location = Some("https://example.com/artifacts/".into());

        let schema = vm_schema();
        let set = ParameterGenerator::new(&settings, &schema)
            .generate(&standalone(), &context("run-1"), "pw")
            .unwrap();
        assert!(!set.values.contains_key(ARTIFACTS_LOCATION));

        let mut specs: Vec<_> = schema.params().cloned().collect();
        specs.push(spec(ARTIFACTS_LOCATION, ParamType::String, Some(json!(""))));
        let schema = TemplateSchema::from_specs(specs);
        let set = ParameterGenerator::new(&settings, &schema)
            .generate(&standalone(), &context("run-1"), "pw")
            .unwrap();
        assert_eq!(set.values[ARTIFACTS_LOCATION], json!("https://example.com/artifacts/"));
    }

    #[test]
    fn test_undeclared_scenario_key_is_configuration_error() {
        let settings = Settings::default();
        let schema = TemplateSchema::from_specs(vec![spec("location", ParamType::String, None)]);
        let err = ParameterGenerator::new(&settings, &schema)
            .generate(&standalone(), &context("run-1"), "pw")
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Configuration(_)));
    }

    #[test]
    fn test_missing_required_is_configuration_error() {
        let settings = Settings::default();
        let mut specs: Vec<_> = vm_schema().params().cloned().collect();
        specs.push(spec("licenseAgreement", ParamType::String, None));
        let schema = TemplateSchema::from_specs(specs);
        let err = ParameterGenerator::new(&settings, &schema)
            .generate(&standalone(), &context("run-1"), "pw")
            .unwrap_err();
        assert!(err.to_string().contains("licenseAgreement"));
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::default();
        let schema = vm_schema();
        let generator = ParameterGenerator::new(&settings, &schema);

        let ctx = context("run-1").with_overrides(vec![parse_override("diskSize=64").unwrap()]);
        let set = generator.generate(&standalone(), &ctx, "pw").unwrap();
        assert_eq!(set.values["diskSize"], json!(64));

        let ctx = context("run-1").with_overrides(vec![("unknownKey".into(), "1".into())]);
        assert!(generator.generate(&standalone(), &ctx, "pw").is_err());

        let ctx = context("run-1").with_overrides(vec![("diskSize".into(), "big".into())]);
        assert!(generator.generate(&standalone(), &ctx, "pw").is_err());

        assert!(parse_override("noequals").is_err());
    }

    #[test]
    fn test_arm_document_and_redaction() {
        let settings = Settings::default();
        let schema = vm_schema();
        let set = ParameterGenerator::new(&settings, &schema)
            .generate(&standalone(), &context("run-1"), "Secr3t!pw")
            .unwrap();

        let doc = set.to_arm_document();
        assert_eq!(doc["contentVersion"], "1.0.0.0");
        assert_eq!(doc["parameters"]["adminPassword"]["value"], "Secr3t!pw");

        let redacted = set.redacted();
        assert_eq!(redacted["adminPassword"], json!("******"));
        assert_eq!(redacted["location"], json!("eastus"));
    }
}
