//! armtest 部署客户端
//!
//! 云资源管理 API 的薄适配层：提交、预检、查询状态、查询失败操作、读取输出、删除。
//! 其余组件只通过 [`DeploymentClient`] trait 使用它。
//!
//! - [`AzCliClient`]：通过 `az` 命令行调用 Azure Resource Manager
//! - [`MockDeploymentClient`]：内存脚本实现，供测试和演练使用

pub mod az;
pub mod client;
pub mod error;
pub mod mock;
pub mod models;

pub use az::{AzCliClient, AzCliConfig};
pub use client::{with_timeout, DeploymentClient};
pub use error::{ProviderError, Result};
pub use mock::{ClientCall, MockDeploymentClient, SubmitBehavior};
pub use models::{
    DeploymentHandle, OperationError, Outputs, ParameterPayload, ProvisioningState, StatusReport,
    Tags, TemplateRef, ValidationOutcome,
};
