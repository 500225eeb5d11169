//! 运行配置管理
//!
//! 进程启动时构造一次，按引用传给各组件，没有全局状态。
//! 支持从多个源加载:
//! - 环境变量 (优先级最高)
//! - 配置文件 (YAML/TOML/JSON)
//! - 默认值 (优先级最低)
//!
//! 配置文件搜索路径 (按优先级):
//! 1. 命令行 `--config` 指定的路径
//! 2. `ARMTEST_CONFIG` 环境变量指定的路径
//! 3. `<workdir>/config/settings.{yaml,yml,toml,json}`
//! 4. `~/.config/armtest/settings.yaml`

use anyhow::{Context, Result};
use armtest_common::CleanupPolicy;
use armtest_validator::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::password::PasswordStrategy;

// ============================================
// 核心配置结构
// ============================================

/// 运行配置 (顶层)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Azure 配置
    #[serde(default)]
    pub azure: AzureSettings,

    /// 模板配置
    #[serde(default)]
    pub templates: TemplateSettings,

    /// 部署行为配置
    #[serde(default)]
    pub deployment: DeploymentSettings,

    /// 功能验证配置
    #[serde(default)]
    pub validation: ValidationSettings,

    /// 资源清理配置
    #[serde(default)]
    pub cleanup: CleanupSettings,

    /// 凭据配置
    #[serde(default)]
    pub credentials: CredentialSettings,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Azure 配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AzureSettings {
    /// 默认区域
    #[serde(default = "default_region")]
    pub default_region: String,

    /// 资源组名前缀
    #[serde(default = "default_resource_group_prefix")]
    pub resource_group_prefix: String,

    /// 订阅 ID (为空时使用 az CLI 当前订阅)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,

    /// 资源所有者 (写入 owner 标签)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,

    /// az 可执行文件
    #[serde(default = "default_az_program")]
    pub az_program: PathBuf,
}

/// 模板配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSettings {
    /// 模板目录
    #[serde(default = "default_templates_dir")]
    pub dir: PathBuf,

    /// 场景未指定模板时使用的模板文件
    #[serde(default = "default_template")]
    pub default_template: String,

    /// 制品基础地址 (仅当模板声明 `_artifactsLocation` 时注入)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts_location: Option<String>,

    /// 制品 SAS 令牌
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts_sas_token: Option<String>,
}

/// 部署行为配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSettings {
    /// 状态轮询间隔
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// 轮询上限，超过后记录为 Failed{Timeout}
    #[serde(with = "humantime_serde", default = "default_deployment_timeout")]
    pub timeout: Duration,

    /// 普通远端调用超时 (状态、输出、删除等)
    #[serde(with = "humantime_serde", default = "default_call_timeout")]
    pub call_timeout: Duration,

    /// 预检与提交调用超时
    #[serde(with = "humantime_serde", default = "default_submit_timeout")]
    pub submit_timeout: Duration,

    /// 提交结果可疑时，重新查询状态前的等待
    #[serde(with = "humantime_serde", default = "default_reconciliation_delay")]
    pub reconciliation_delay: Duration,
}

/// 功能验证配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSettings {
    /// 部署成功后立即验证
    #[serde(default = "default_validate_after_deploy")]
    pub after_deploy: bool,

    /// 连接重试策略
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Neo4j 数据库名
    #[serde(default = "default_database")]
    pub database: String,

    /// 是否校验 TLS 证书
    #[serde(default)]
    pub verify_tls: bool,
}

/// 资源清理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupSettings {
    /// 默认清理策略
    #[serde(default)]
    pub policy: CleanupPolicy,

    /// 资源组过期时间 (小时)，设置后写入 expires 标签
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_hours: Option<u32>,
}

/// 凭据配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialSettings {
    /// 管理员密码策略
    #[serde(default)]
    pub password_strategy: PasswordStrategy,

    /// 管理员用户名
    #[serde(default = "default_username")]
    pub username: String,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// 日志级别 (debug/info/warn/error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ============================================
// 默认值函数
// ============================================

fn default_region() -> String {
    "eastus".to_string()
}
fn default_resource_group_prefix() -> String {
    "neo4j-test".to_string()
}
fn default_az_program() -> PathBuf {
    PathBuf::from("az")
}
fn default_templates_dir() -> PathBuf {
    PathBuf::from("marketplace/neo4j-enterprise")
}
fn default_template() -> String {
    "mainTemplate.json".to_string()
}
fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_deployment_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}
fn default_call_timeout() -> Duration {
    Duration::from_secs(120)
}
fn default_submit_timeout() -> Duration {
    Duration::from_secs(300)
}
fn default_reconciliation_delay() -> Duration {
    Duration::from_secs(3)
}
fn default_validate_after_deploy() -> bool {
    true
}
fn default_database() -> String {
    "neo4j".to_string()
}
fn default_username() -> String {
    "neo4j".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

// ============================================
// Default 实现
// ============================================

impl Default for Settings {
    fn default() -> Self {
        Self {
            azure: AzureSettings::default(),
            templates: TemplateSettings::default(),
            deployment: DeploymentSettings::default(),
            validation: ValidationSettings::default(),
            cleanup: CleanupSettings::default(),
            credentials: CredentialSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for AzureSettings {
    fn default() -> Self {
        Self {
            default_region: default_region(),
            resource_group_prefix: default_resource_group_prefix(),
            subscription: None,
            owner_email: None,
            az_program: default_az_program(),
        }
    }
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            dir: default_templates_dir(),
            default_template: default_template(),
            artifacts_location: None,
            artifacts_sas_token: None,
        }
    }
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            timeout: default_deployment_timeout(),
            call_timeout: default_call_timeout(),
            submit_timeout: default_submit_timeout(),
            reconciliation_delay: default_reconciliation_delay(),
        }
    }
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            after_deploy: default_validate_after_deploy(),
            retry: RetryPolicy::default(),
            database: default_database(),
            verify_tls: false,
        }
    }
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            policy: CleanupPolicy::default(),
            schedule_hours: None,
        }
    }
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            password_strategy: PasswordStrategy::default(),
            username: default_username(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================
// 配置加载实现
// ============================================

/// 文件格式
fn format_of(path: &Path) -> Option<&'static str> {
    match path.extension().and_then(|s| s.to_str()) {
        Some("toml") => Some("toml"),
        Some("yaml") | Some("yml") => Some("yaml"),
        Some("json") => Some("json"),
        _ => None,
    }
}

/// 解析 humantime 时长 (30s, 5m, 2h)
fn parse_duration_env(name: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value).with_context(|| format!("Invalid {} value: {}", name, value))
}

impl Settings {
    /// 从多个源加载配置 (优先级: 环境变量 > 配置文件 > 默认值)
    pub fn load(explicit: Option<&Path>, workdir: &Path) -> Result<Self> {
        // 1. 从默认值开始
        let mut settings = Self::default();

        // 2. 尝试加载配置文件
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_config_file(workdir),
        };
        if let Some(path) = path {
            tracing::debug!("Loading settings from: {:?}", path);
            settings = Self::load_from_file(&path)?;
        } else {
            tracing::debug!("No settings file found, using defaults");
        }

        // 3. 从环境变量覆盖
        settings.apply_env_vars()?;

        settings.validate()?;
        Ok(settings)
    }

    /// 从指定文件加载配置
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {:?}", path))?;

        // 根据文件扩展名选择解析器
        let settings = match format_of(path) {
            Some("toml") => toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML settings: {:?}", path))?,
            Some("yaml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML settings: {:?}", path))?,
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON settings: {:?}", path))?,
            _ => anyhow::bail!("Unsupported settings file format: {:?}", path),
        };

        Ok(settings)
    }

    /// 查找配置文件 (按优先级搜索)
    fn find_config_file(workdir: &Path) -> Option<PathBuf> {
        // 1. 环境变量指定的路径
        if let Ok(path) = env::var("ARMTEST_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
        }

        // 2. 工作目录
        let config_dir = workdir.join("config");
        for name in ["settings.yaml", "settings.yml", "settings.toml", "settings.json"] {
            let path = config_dir.join(name);
            if path.exists() {
                return Some(path);
            }
        }

        // 3. 用户配置目录
        if let Some(home) = dirs::home_dir() {
            let path = home.join(".config/armtest/settings.yaml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// 从环境变量覆盖配置
    fn apply_env_vars(&mut self) -> Result<()> {
        // Azure
        if let Ok(region) = env::var("ARMTEST_REGION") {
            self.azure.default_region = region;
        }
        if let Ok(prefix) = env::var("ARMTEST_RESOURCE_GROUP_PREFIX") {
            self.azure.resource_group_prefix = prefix;
        }
        if let Ok(subscription) = env::var("ARMTEST_SUBSCRIPTION") {
            self.azure.subscription = Some(subscription);
        }
        if let Ok(owner) = env::var("ARMTEST_OWNER_EMAIL") {
            self.azure.owner_email = Some(owner);
        }

        // Deployment
        if let Ok(interval) = env::var("ARMTEST_POLL_INTERVAL") {
            self.deployment.poll_interval = parse_duration_env("ARMTEST_POLL_INTERVAL", &interval)?;
        }
        if let Ok(timeout) = env::var("ARMTEST_DEPLOYMENT_TIMEOUT") {
            self.deployment.timeout = parse_duration_env("ARMTEST_DEPLOYMENT_TIMEOUT", &timeout)?;
        }

        // Cleanup
        if let Ok(policy) = env::var("ARMTEST_CLEANUP_POLICY") {
            self.cleanup.policy = policy
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid ARMTEST_CLEANUP_POLICY value")?;
        }

        // Credentials
        if let Ok(strategy) = env::var("ARMTEST_PASSWORD_STRATEGY") {
            self.credentials.password_strategy = strategy
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid ARMTEST_PASSWORD_STRATEGY value")?;
        }

        // Logging
        if let Ok(level) = env::var("ARMTEST_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.azure.default_region.trim().is_empty() {
            anyhow::bail!("default_region cannot be empty");
        }

        let prefix = &self.azure.resource_group_prefix;
        if prefix.is_empty()
            || !prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            anyhow::bail!(
                "resource_group_prefix must be lower-case alphanumeric or '-': {:?}",
                prefix
            );
        }

        let durations = [
            ("deployment.poll_interval", self.deployment.poll_interval),
            ("deployment.timeout", self.deployment.timeout),
            ("deployment.call_timeout", self.deployment.call_timeout),
            ("deployment.submit_timeout", self.deployment.submit_timeout),
            ("validation.retry.attempt_timeout", self.validation.retry.attempt_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }

        if self.validation.retry.attempts == 0 {
            anyhow::bail!("validation.retry.attempts must be at least 1");
        }

        if self.credentials.username.is_empty() {
            anyhow::bail!("credentials.username cannot be empty");
        }

        Ok(())
    }

    /// 保存配置到文件
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        // 确保目录存在
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        // 根据文件扩展名选择格式
        let content = match format_of(path) {
            Some("toml") => toml::to_string_pretty(self).context("Failed to serialize to TOML")?,
            Some("yaml") => serde_yaml::to_string(self).context("Failed to serialize to YAML")?,
            Some("json") => serde_json::to_string_pretty(self).context("Failed to serialize to JSON")?,
            _ => anyhow::bail!("Unsupported settings file format: {:?}", path),
        };

        fs::write(path, content)
            .with_context(|| format!("Failed to write settings file: {:?}", path))?;

        Ok(())
    }

    /// 模板文件的完整路径 (`name` 为空时使用默认模板)
    pub fn template_path(&self, name: Option<&str>) -> PathBuf {
        let name = name.unwrap_or(&self.templates.default_template);
        let path = Path::new(name);
        if path.is_absolute() || path.components().count() > 1 {
            path.to_path_buf()
        } else {
            self.templates.dir.join(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.azure.default_region, "eastus");
        assert_eq!(settings.azure.resource_group_prefix, "neo4j-test");
        assert_eq!(settings.deployment.poll_interval, Duration::from_secs(30));
        assert_eq!(settings.deployment.timeout, Duration::from_secs(1800));
        assert_eq!(settings.cleanup.policy, CleanupPolicy::OnSuccess);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_serialization() {
        let settings = Settings::default();

        // Test YAML
        let yaml = serde_yaml::to_string(&settings).unwrap();
        assert!(yaml.contains("poll_interval: 30s"));
        assert!(yaml.contains("password_strategy: generate"));

        // Test TOML
        let toml = toml::to_string_pretty(&settings).unwrap();
        assert!(toml.contains("default_region = \"eastus\""));

        // Test JSON
        let json = serde_json::to_string_pretty(&settings).unwrap();
        assert!(json.contains("\"timeout\": \"30m\""));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "deployment:\n  poll_interval: 10s\ncleanup:\n  policy: Always\n";
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.deployment.poll_interval, Duration::from_secs(10));
        assert_eq!(settings.deployment.timeout, Duration::from_secs(1800));
        assert_eq!(settings.cleanup.policy, CleanupPolicy::Always);
        assert_eq!(settings.azure.default_region, "eastus");
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();

        settings.azure.resource_group_prefix = "Neo4J_Test".to_string();
        assert!(settings.validate().is_err());

        settings.azure.resource_group_prefix = "neo4j-test".to_string();
        settings.deployment.poll_interval = Duration::ZERO;
        assert!(settings.validate().is_err());

        settings.deployment.poll_interval = Duration::from_secs(5);
        settings.validation.retry.attempts = 0;
        assert!(settings.validate().is_err());

        settings.validation.retry.attempts = 1;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_roundtrip_all_formats() {
        let tmp = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.azure.owner_email = Some("qa@example.com".to_string());
        settings.cleanup.schedule_hours = Some(8);

        for name in ["settings.yaml", "settings.toml", "settings.json"] {
            let path = tmp.path().join(name);
            settings.save_to_file(&path).unwrap();
            let loaded = Settings::load_from_file(&path).unwrap();
            assert_eq!(loaded, settings, "{}", name);
        }
    }

    #[test]
    fn test_unsupported_format() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.ini");
        assert!(Settings::default().save_to_file(&path).is_err());
    }

    #[test]
    fn test_load_from_workdir() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config/settings.yaml");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "azure:\n  default_region: westeurope\n").unwrap();

        let settings = Settings::load(None, tmp.path()).unwrap();
        // 环境变量可能覆盖区域
        if env::var("ARMTEST_REGION").is_err() {
            assert_eq!(settings.azure.default_region, "westeurope");
        }
    }

    #[test]
    fn test_template_path() {
        let settings = Settings::default();
        assert_eq!(
            settings.template_path(None),
            PathBuf::from("marketplace/neo4j-enterprise/mainTemplate.json")
        );
        assert_eq!(
            settings.template_path(Some("aks.json")),
            PathBuf::from("marketplace/neo4j-enterprise/aks.json")
        );
        assert_eq!(
            settings.template_path(Some("marketplace/neo4j-community/mainTemplate.json")),
            PathBuf::from("marketplace/neo4j-community/mainTemplate.json")
        );
    }
}
