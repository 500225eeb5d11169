//! armtest 通用类型定义
//!
//! 此 crate 包含 provider、storage、validator、executor 与 CLI 之间共享的类型：
//! 部署生命周期状态、错误分类、清理策略、连接描述以及功能验证结果。

pub mod connection;
pub mod error_class;
pub mod policy;
pub mod state;
pub mod validation;

pub use connection::ConnectionDescriptor;
pub use error_class::ErrorClass;
pub use policy::CleanupPolicy;
pub use state::{DeploymentState, FailureReason};
pub use validation::{Assertion, ValidationFailure, ValidationResult};

/// 受本工具管理的资源组标签键
pub const MANAGED_BY_TAG: &str = "managed-by";

/// 受本工具管理的资源组标签值
pub const MANAGED_BY_VALUE: &str = "armtest";
