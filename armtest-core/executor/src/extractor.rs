//! 部署输出 → 连接描述
//!
//! 按声明的字段映射读取输出，缺少字段时报告 `OutputShapeMismatch`，不做默认填充。

use armtest_common::ConnectionDescriptor;
use armtest_provider::{DeploymentClient, Outputs};
use armtest_storage::{DeploymentRecord, Storage};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::orchestrator::handle_of;
use crate::{ExecutorError, Result};

const BOLT_PORT: u16 = 7687;

/// 输出字段映射
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputMapping {
    /// 主端点对应的输出键
    pub endpoint: String,
    /// 身份对应的输出键
    pub identity: String,
    /// 可选的辅助输出键
    pub auxiliary: Vec<String>,
    /// 是否由端点推导协议 URI
    pub derive_protocol_uri: bool,
}

impl OutputMapping {
    pub fn new(endpoint: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            identity: identity.into(),
            auxiliary: Vec::new(),
            derive_protocol_uri: false,
        }
    }

    pub fn with_auxiliary(mut self, key: impl Into<String>) -> Self {
        self.auxiliary.push(key.into());
        self
    }

    pub fn with_protocol_uri(mut self) -> Self {
        self.derive_protocol_uri = true;
        self
    }

    /// Neo4j 模板的输出映射：单节点与集群使用不同的浏览器 URL 键
    pub fn neo4j(node_count: u32) -> Self {
        let endpoint = if node_count > 1 {
            "neo4jClusterBrowserURL"
        } else {
            "neo4jBrowserURL"
        };
        Self::new(endpoint, "username")
            .with_auxiliary("neo4jBloomURL")
            .with_protocol_uri()
    }

    /// 描述 → 输出子集（与构建时使用的键一致）
    pub fn to_output_map(&self, descriptor: &ConnectionDescriptor) -> Outputs {
        let mut map = BTreeMap::new();
        map.insert(self.endpoint.clone(), descriptor.endpoint.clone());
        map.insert(self.identity.clone(), descriptor.identity.clone());
        for key in &self.auxiliary {
            if let Some(value) = descriptor.auxiliary.get(key) {
                map.insert(key.clone(), value.clone());
            }
        }
        map
    }
}

/// 由 http(s) 浏览器 URL 推导 `neo4j://host:7687`
pub fn protocol_uri(endpoint: &str) -> Option<String> {
    let without_scheme = endpoint
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(endpoint);
    let authority = without_scheme.split('/').next()?;
    let host = if let Some(rest) = authority.strip_prefix('[') {
        // IPv6 字面量
        format!("[{}]", rest.split(']').next()?)
    } else {
        authority.split(':').next()?.to_string()
    };
    if host.is_empty() {
        None
    } else {
        Some(format!("neo4j://{}:{}", host, BOLT_PORT))
    }
}

/// 连接提取器
pub struct ConnectionExtractor {
    client: Arc<dyn DeploymentClient>,
    storage: Arc<Storage>,
    call_timeout: Duration,
}

impl ConnectionExtractor {
    pub fn new(client: Arc<dyn DeploymentClient>, storage: Arc<Storage>, call_timeout: Duration) -> Self {
        Self {
            client,
            storage,
            call_timeout,
        }
    }

    /// 从输出映射构建连接描述
    pub fn extract(outputs: &Outputs, mapping: &OutputMapping) -> Result<ConnectionDescriptor> {
        let field = |key: &str| {
            outputs
                .get(key)
                .filter(|v| !v.trim().is_empty())
                .cloned()
                .ok_or_else(|| ExecutorError::OutputShapeMismatch { field: key.to_string() })
        };

        let endpoint = field(&mapping.endpoint)?;
        let identity = field(&mapping.identity)?;
        let mut descriptor = ConnectionDescriptor::new(&endpoint, identity);

        if mapping.derive_protocol_uri {
            if let Some(uri) = protocol_uri(&endpoint) {
                descriptor = descriptor.with_protocol_uri(uri);
            }
        }
        for key in &mapping.auxiliary {
            if let Some(value) = outputs.get(key).filter(|v| !v.is_empty()) {
                descriptor = descriptor.with_auxiliary(key, value);
            }
        }
        Ok(descriptor)
    }

    /// 读取已成功部署的输出，生成并保存连接描述
    pub async fn extract_for(
        &self,
        record: &DeploymentRecord,
        mapping: &OutputMapping,
    ) -> Result<ConnectionDescriptor> {
        let id = record.deployment_id.as_str();
        let outputs = self
            .client
            .get_outputs(&handle_of(record), self.call_timeout)
            .await?;

        let descriptor = match Self::extract(&outputs, mapping) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(
                    "部署 {} 的输出不符合映射: {} (实际键: {:?})",
                    id,
                    e,
                    outputs.keys().collect::<Vec<_>>()
                );
                return Err(e);
            }
        };

        let path = self.storage.connections().save(id, &descriptor).await?;
        self.storage
            .deployments()
            .update(id, |record| {
                record.connection_file = Some(path.clone());
                Ok(())
            })
            .await?;

        info!("连接信息 {}: {}", id, descriptor.endpoint);
        Ok(descriptor)
    }
}
