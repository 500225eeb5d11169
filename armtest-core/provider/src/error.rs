//! 部署客户端错误定义

use std::time::Duration;
use thiserror::Error;

/// 部署客户端错误类型
#[derive(Error, Debug)]
pub enum ProviderError {
    /// 外部命令以非零状态退出，`stderr` 保留原始诊断输出
    #[error("命令执行失败 [{command}] (退出码 {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("调用超时: {operation} 超过 {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    #[error("解析错误: {0}")]
    ParseError(String),

    #[error("资源不存在: {0}")]
    NotFound(String),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("未知错误: {0}")]
    Unknown(String),
}

impl ProviderError {
    /// 原始诊断文本，交给错误分类器使用
    pub fn raw_diagnostics(&self) -> String {
        match self {
            Self::CommandFailed { stderr, .. } => stderr.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// 部署客户端结果类型
pub type Result<T> = std::result::Result<T, ProviderError>;
