//! armtest 状态存储
//!
//! 部署记录是“我拥有什么、处于什么状态”的唯一事实来源，跨进程重启保留。
//! 参数文件与连接描述按部署 ID 只写一次；报告按需从记录生成。

mod error;
mod manager;
mod models;
mod repositories;
mod state_store;

pub use error::{Result, StorageError};
pub use manager::StorageManager;
pub use models::*;
pub use repositories::*;
pub use state_store::StateStore;

/// 统一的数据访问层入口
pub struct Storage {
    manager: StorageManager,
    deployments: StateStore,
    parameters: ParameterFileRepository,
    connections: ConnectionRepository,
    reports: ReportRepository,
}

impl Storage {
    /// 从 StorageManager 创建 Storage
    pub fn from_manager(manager: &StorageManager) -> Self {
        Self {
            manager: manager.clone(),
            deployments: StateStore::new(manager.state_dir()),
            parameters: ParameterFileRepository::new(manager.params_dir()),
            connections: ConnectionRepository::new(manager.results_dir()),
            reports: ReportRepository::new(manager.results_dir()),
        }
    }

    pub fn manager(&self) -> &StorageManager {
        &self.manager
    }

    /// 获取部署记录存储
    pub fn deployments(&self) -> &StateStore {
        &self.deployments
    }

    /// 获取参数文件仓储
    pub fn parameters(&self) -> &ParameterFileRepository {
        &self.parameters
    }

    /// 获取连接描述仓储
    pub fn connections(&self) -> &ConnectionRepository {
        &self.connections
    }

    /// 获取报告仓储
    pub fn reports(&self) -> &ReportRepository {
        &self.reports
    }
}
