use armtest_common::DeploymentState;
use thiserror::Error;

/// Storage 层错误类型
#[derive(Error, Debug)]
pub enum StorageError {
    /// 文件读写错误
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// 数据序列化错误
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML 序列化错误
    #[error("YAML serialization error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// 数据未找到
    #[error("Data not found: {0}")]
    NotFound(String),

    /// 数据已存在
    #[error("Data already exists: {0}")]
    AlreadyExists(String),

    /// 数据验证错误
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// 非法的状态转换
    #[error("Invalid state transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: DeploymentState,
        to: DeploymentState,
    },

    /// 记录锁获取超时
    #[error("Timed out acquiring lock for record: {0}")]
    LockTimeout(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;
