//! 场景注册表
//!
//! 场景 = 模板引用 + 按部署类型区分的封闭配置。未知字段在加载时拒绝。

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

use crate::{ExecutorError, Result};

const MIN_DISK_SIZE: u32 = 32;
const MAX_NODE_COUNT: u32 = 10;

/// Neo4j 大版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphDatabaseVersion {
    #[serde(rename = "5")]
    V5,
    #[serde(rename = "4.4")]
    V44,
}

impl GraphDatabaseVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V5 => "5",
            Self::V44 => "4.4",
        }
    }
}

impl Default for GraphDatabaseVersion {
    fn default() -> Self {
        Self::V5
    }
}

/// 许可证类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LicenseType {
    Enterprise,
    Evaluation,
}

impl LicenseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enterprise => "Enterprise",
            Self::Evaluation => "Evaluation",
        }
    }
}

impl Default for LicenseType {
    fn default() -> Self {
        Self::Evaluation
    }
}

/// 虚拟机部署配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VmConfig {
    #[serde(default = "default_node_count")]
    pub node_count: u32,

    #[serde(default)]
    pub graph_database_version: GraphDatabaseVersion,

    #[serde(default = "default_vm_size")]
    pub vm_size: String,

    #[serde(default = "default_disk_size")]
    pub disk_size: u32,

    #[serde(default)]
    pub license_type: LicenseType,

    /// 只读副本（仅 4.4 集群）
    #[serde(default)]
    pub read_replica_count: u32,

    #[serde(default = "default_vm_size")]
    pub read_replica_vm_size: String,

    #[serde(default = "default_disk_size")]
    pub read_replica_disk_size: u32,

    #[serde(default)]
    pub install_graph_data_science: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_data_science_license_key: Option<String>,

    #[serde(default)]
    pub install_bloom: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bloom_license_key: Option<String>,
}

/// AKS 部署配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AksConfig {
    #[serde(default = "default_node_count")]
    pub node_count: u32,

    #[serde(default)]
    pub graph_database_version: GraphDatabaseVersion,

    #[serde(default = "default_kubernetes_version")]
    pub kubernetes_version: String,

    #[serde(default = "default_user_node_size")]
    pub user_node_size: String,

    #[serde(default = "default_user_node_count_min")]
    pub user_node_count_min: u32,

    #[serde(default = "default_user_node_count_max")]
    pub user_node_count_max: u32,

    #[serde(default = "default_disk_size")]
    pub disk_size: u32,

    #[serde(default)]
    pub license_type: LicenseType,
}

/// 社区版部署配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommunityConfig {
    #[serde(default = "default_community_vm_size")]
    pub vm_size: String,

    #[serde(default = "default_disk_size")]
    pub disk_size: u32,
}

fn default_node_count() -> u32 {
    1
}
fn default_vm_size() -> String {
    "Standard_E4s_v5".to_string()
}
fn default_community_vm_size() -> String {
    "Standard_B2s".to_string()
}
fn default_disk_size() -> u32 {
    MIN_DISK_SIZE
}
fn default_kubernetes_version() -> String {
    "1.30".to_string()
}
fn default_user_node_size() -> String {
    "Standard_E4s_v5".to_string()
}
fn default_user_node_count_min() -> u32 {
    1
}
fn default_user_node_count_max() -> u32 {
    10
}

/// 场景配置（按 `deployment_type` 区分）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "deployment_type", rename_all = "lowercase")]
pub enum ScenarioConfig {
    Vm(VmConfig),
    Aks(AksConfig),
    Community(CommunityConfig),
}

impl ScenarioConfig {
    pub fn deployment_type(&self) -> &'static str {
        match self {
            Self::Vm(_) => "vm",
            Self::Aks(_) => "aks",
            Self::Community(_) => "community",
        }
    }

    /// 数据库节点数（社区版恒为 1）
    pub fn node_count(&self) -> u32 {
        match self {
            Self::Vm(c) => c.node_count,
            Self::Aks(c) => c.node_count,
            Self::Community(_) => 1,
        }
    }

    /// 展开为模板参数（camelCase 名称）
    pub fn template_values(&self) -> BTreeMap<String, Value> {
        let mut values = BTreeMap::new();
        let mut set = |key: &str, value: Value| {
            values.insert(key.to_string(), value);
        };

        match self {
            Self::Vm(c) => {
                set("nodeCount", json!(c.node_count));
                set("graphDatabaseVersion", json!(c.graph_database_version.as_str()));
                set("diskSize", json!(c.disk_size));
                set("licenseType", json!(c.license_type.as_str()));
                set("vmSize", json!(c.vm_size));
                if c.read_replica_count > 0 {
                    set("readReplicaCount", json!(c.read_replica_count));
                    set("readReplicaVmSize", json!(c.read_replica_vm_size));
                    set("readReplicaDiskSize", json!(c.read_replica_disk_size));
                }
                // 模板期望 "Yes"/"No" 字符串
                set("installGraphDataScience", json!(yes_no(c.install_graph_data_science)));
                if let (true, Some(key)) = (c.install_graph_data_science, &c.graph_data_science_license_key) {
                    set("graphDataScienceLicenseKey", json!(key));
                }
                set("installBloom", json!(yes_no(c.install_bloom)));
                if let (true, Some(key)) = (c.install_bloom, &c.bloom_license_key) {
                    set("bloomLicenseKey", json!(key));
                }
            }
            Self::Aks(c) => {
                set("nodeCount", json!(c.node_count));
                set("graphDatabaseVersion", json!(c.graph_database_version.as_str()));
                set("diskSize", json!(c.disk_size));
                set("licenseType", json!(c.license_type.as_str()));
                set("kubernetesVersion", json!(c.kubernetes_version));
                set("userNodeSize", json!(c.user_node_size));
                set("userNodeCountMin", json!(c.user_node_count_min));
                set("userNodeCountMax", json!(c.user_node_count_max));
            }
            Self::Community(c) => {
                set("vmSize", json!(c.vm_size));
                set("diskSize", json!(c.disk_size));
            }
        }
        values
    }

    fn validate(&self, name: &str) -> Result<()> {
        let err = |msg: String| -> Result<()> {
            Err(ExecutorError::Configuration(format!("场景 {}: {}", name, msg)))
        };

        let check_nodes = |count: u32| count == 1 || (3..=MAX_NODE_COUNT).contains(&count);

        match self {
            Self::Vm(c) => {
                if !check_nodes(c.node_count) {
                    return err(format!("node_count 必须为 1 或 3..={}，实际 {}", MAX_NODE_COUNT, c.node_count));
                }
                if c.disk_size < MIN_DISK_SIZE || c.read_replica_disk_size < MIN_DISK_SIZE {
                    return err(format!("disk_size 不能小于 {}", MIN_DISK_SIZE));
                }
                if c.read_replica_count > 0
                    && (c.graph_database_version != GraphDatabaseVersion::V44 || c.node_count < 3)
                {
                    return err("只读副本仅支持 4.4 版本且 node_count >= 3".to_string());
                }
                if c.license_type == LicenseType::Enterprise {
                    if c.install_graph_data_science && c.graph_data_science_license_key.is_none() {
                        return err("启用 Graph Data Science 时需要 graph_data_science_license_key".to_string());
                    }
                    if c.install_bloom && c.bloom_license_key.is_none() {
                        return err("启用 Bloom 时需要 bloom_license_key".to_string());
                    }
                }
            }
            Self::Aks(c) => {
                if !check_nodes(c.node_count) {
                    return err(format!("node_count 必须为 1 或 3..={}，实际 {}", MAX_NODE_COUNT, c.node_count));
                }
                if c.disk_size < MIN_DISK_SIZE {
                    return err(format!("disk_size 不能小于 {}", MIN_DISK_SIZE));
                }
                if c.user_node_count_min > c.user_node_count_max {
                    return err(format!(
                        "user_node_count_min ({}) 大于 user_node_count_max ({})",
                        c.user_node_count_min, c.user_node_count_max
                    ));
                }
            }
            Self::Community(c) => {
                if c.disk_size < MIN_DISK_SIZE {
                    return err(format!("disk_size 不能小于 {}", MIN_DISK_SIZE));
                }
            }
        }
        Ok(())
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "Yes"
    } else {
        "No"
    }
}

/// 测试场景
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// 场景名（唯一）
    pub name: String,

    /// 模板文件（为空时使用配置中的默认模板）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    pub config: ScenarioConfig,
}

impl Scenario {
    pub fn new(name: impl Into<String>, config: ScenarioConfig) -> Self {
        Self {
            name: name.into(),
            template: None,
            description: String::new(),
            tags: Vec::new(),
            config,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_cluster(&self) -> bool {
        self.config.node_count() > 1
    }
}

/// 场景文件格式
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioFile {
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
}

/// 场景注册表
#[derive(Debug, Clone, Default)]
pub struct ScenarioRegistry {
    scenarios: Vec<Scenario>,
}

impl ScenarioRegistry {
    /// 从场景列表构建，执行全部校验规则
    pub fn from_scenarios(scenarios: Vec<Scenario>) -> Result<Self> {
        let mut seen = HashSet::new();
        for scenario in &scenarios {
            if scenario.name.trim().is_empty() {
                return Err(ExecutorError::Configuration("场景名不能为空".to_string()));
            }
            if !seen.insert(scenario.name.as_str()) {
                return Err(ExecutorError::Configuration(format!("场景名重复: {}", scenario.name)));
            }
            scenario.config.validate(&scenario.name)?;
        }
        Ok(Self { scenarios })
    }

    /// 从 YAML 文件加载
    pub fn load(path: &Path) -> Result<Self> {
        debug!("加载场景文件: {:?}", path);
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExecutorError::Configuration(format!("无法读取场景文件 {}: {}", path.display(), e))
        })?;
        let file: ScenarioFile = serde_yaml::from_str(&content).map_err(|e| {
            ExecutorError::Configuration(format!("场景文件 {} 格式错误: {}", path.display(), e))
        })?;
        let registry = Self::from_scenarios(file.scenarios)?;
        info!("已加载 {} 个场景", registry.scenarios.len());
        Ok(registry)
    }

    /// 按名称查找
    pub fn get(&self, name: &str) -> Result<&Scenario> {
        self.scenarios.iter().find(|s| s.name == name).ok_or_else(|| {
            ExecutorError::Configuration(format!(
                "场景不存在: {} (可用: {})",
                name,
                self.names().join(", ")
            ))
        })
    }

    pub fn list(&self) -> &[Scenario] {
        &self.scenarios
    }

    pub fn names(&self) -> Vec<&str> {
        self.scenarios.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// 内置默认场景
    pub fn default_scenarios() -> Vec<Scenario> {
        let vm = |node_count: u32, version: GraphDatabaseVersion, replicas: u32| VmConfig {
            node_count,
            graph_database_version: version,
            vm_size: default_vm_size(),
            disk_size: default_disk_size(),
            license_type: LicenseType::Evaluation,
            read_replica_count: replicas,
            read_replica_vm_size: default_vm_size(),
            read_replica_disk_size: default_disk_size(),
            install_graph_data_science: false,
            graph_data_science_license_key: None,
            install_bloom: false,
            bloom_license_key: None,
        };

        vec![
            Scenario::new("standalone-v5", ScenarioConfig::Vm(vm(1, GraphDatabaseVersion::V5, 0)))
                .with_description("Neo4j 5 单节点")
                .with_tags(["smoke", "v5"]),
            Scenario::new("cluster-v5", ScenarioConfig::Vm(vm(3, GraphDatabaseVersion::V5, 0)))
                .with_description("Neo4j 5 三节点集群")
                .with_tags(["cluster", "v5"]),
            Scenario::new("standalone-v44", ScenarioConfig::Vm(vm(1, GraphDatabaseVersion::V44, 0)))
                .with_description("Neo4j 4.4 单节点")
                .with_tags(["smoke", "v44"]),
            Scenario::new(
                "cluster-read-replicas",
                ScenarioConfig::Vm(vm(3, GraphDatabaseVersion::V44, 1)),
            )
            .with_description("Neo4j 4.4 三节点集群 + 1 个只读副本")
            .with_tags(["cluster", "v44"]),
        ]
    }

    /// 写出默认场景文件
    pub fn write_defaults(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = ScenarioFile {
            scenarios: Self::default_scenarios(),
        };
        std::fs::write(path, serde_yaml::to_string(&file)?)?;
        info!("已写入默认场景: {:?}", path);
        Ok(())
    }
}
