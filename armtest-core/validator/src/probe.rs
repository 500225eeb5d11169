//! 服务探针适配器接口

use armtest_common::ConnectionDescriptor;
use async_trait::async_trait;
use std::fmt;

use crate::Result;

/// 访问被部署服务的凭据
#[derive(Clone)]
pub struct ProbeCredentials {
    pub username: String,
    pub password: String,
}

impl ProbeCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for ProbeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeCredentials")
            .field("username", &self.username)
            .field("password", &"******")
            .finish()
    }
}

/// 每种服务的协议适配器
///
/// 实现需保证 `delete_probe` 幂等：对不存在的键执行删除不是错误。
#[async_trait]
pub trait ServiceProbe: Send + Sync {
    /// 适配器名称（日志使用）
    fn name(&self) -> &str;

    /// 建立连接并确认认证有效
    async fn connect(&self) -> Result<()>;

    /// 写入探针数据
    async fn write_probe(&self, key: &str, value: &str) -> Result<()>;

    /// 回读探针数据，不存在时返回 `None`
    async fn read_probe(&self, key: &str) -> Result<Option<String>>;

    /// 删除探针数据
    async fn delete_probe(&self, key: &str) -> Result<()>;
}

/// 根据连接描述构建探针
pub trait ProbeFactory: Send + Sync {
    fn create(
        &self,
        descriptor: &ConnectionDescriptor,
        credentials: ProbeCredentials,
    ) -> Result<Box<dyn ServiceProbe>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = ProbeCredentials::new("neo4j", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("neo4j"));
        assert!(!debug.contains("hunter2"));
    }
}
