//! 被部署服务的连接描述

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 连接描述
///
/// 由部署输出按声明的字段映射构建，构建后不可变。
/// 只保存身份（用户名），密钥在验证时从参数集解析，不会落盘到连接文件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    /// 主端点（如浏览器 URL 或 host:port）
    pub endpoint: String,

    /// 身份（用户名）
    pub identity: String,

    /// 由端点推导的 bolt/neo4j 协议 URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_uri: Option<String>,

    /// 辅助 URL（输出键 -> 值）
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub auxiliary: BTreeMap<String, String>,
}

impl ConnectionDescriptor {
    pub fn new(endpoint: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            identity: identity.into(),
            protocol_uri: None,
            auxiliary: BTreeMap::new(),
        }
    }

    pub fn with_protocol_uri(mut self, uri: impl Into<String>) -> Self {
        self.protocol_uri = Some(uri.into());
        self
    }

    pub fn with_auxiliary(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.auxiliary.insert(key.into(), value.into());
        self
    }

    /// 端点的 HTTP 基础地址（缺少 scheme 时补 `http://`）
    pub fn http_base(&self) -> String {
        let endpoint = self.endpoint.trim_end_matches('/');
        let endpoint = endpoint.strip_suffix("/browser").unwrap_or(endpoint);
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("http://{}", endpoint)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_base() {
        let desc = ConnectionDescriptor::new("svc-abc:7474", "neo4j");
        assert_eq!(desc.http_base(), "http://svc-abc:7474");

        let desc = ConnectionDescriptor::new("https://vm1.eastus.cloudapp.azure.com:7473/browser/", "neo4j");
        assert_eq!(desc.http_base(), "https://vm1.eastus.cloudapp.azure.com:7473");
    }

    #[test]
    fn test_builder() {
        let desc = ConnectionDescriptor::new("svc:7474", "neo4j")
            .with_protocol_uri("neo4j://svc:7687")
            .with_auxiliary("neo4jBloomURL", "http://svc:7474/bloom");
        assert_eq!(desc.protocol_uri.as_deref(), Some("neo4j://svc:7687"));
        assert_eq!(desc.auxiliary.len(), 1);
    }

    #[test]
    fn test_serialization_skips_empty() {
        let desc = ConnectionDescriptor::new("svc:7474", "neo4j");
        let json = serde_json::to_string(&desc).unwrap();
        assert!(!json.contains("auxiliary"));
        assert!(!json.contains("protocol_uri"));
    }
}
