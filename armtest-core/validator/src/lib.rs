//! armtest 功能验证器
//!
//! 使用提取出的连接描述连接被部署的服务，执行最小化的
//! 写入 → 回读 → 断言 → 删除 流程，证明服务可用且配置正确。
//! 具体协议由可插拔的 [`ServiceProbe`] 适配器提供。

pub mod memory;
pub mod neo4j;
pub mod probe;
pub mod retry;
pub mod validator;

pub use memory::InMemoryProbe;
pub use neo4j::{Neo4jHttpProbe, Neo4jProbeConfig, Neo4jProbeFactory};
pub use probe::{ProbeCredentials, ProbeFactory, ServiceProbe};
pub use retry::RetryPolicy;
pub use validator::Validator;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("连接失败: {0}")]
    Connection(String),

    #[error("认证失败: {0}")]
    Authentication(String),

    #[error("验证超时")]
    Timeout,

    #[error("协议错误: {0}")]
    Protocol(String),

    #[error("HTTP 错误: {0}")]
    Http(#[from] reqwest::Error),

    #[error("序列化错误: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ValidatorError>;
