use std::path::{Path, PathBuf};
use tracing::debug;

use super::{read_existing, write_once};
use crate::error::Result;

/// 参数文件仓储
///
/// 每次部署一个 ARM 参数文件 `params/<deployment_id>.json`，只写一次。
/// 文件中可能包含管理员密码，Unix 下权限为 0600。
pub struct ParameterFileRepository {
    dir: PathBuf,
}

impl ParameterFileRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, deployment_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", deployment_id))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 写入参数文件，返回路径
    pub async fn write(&self, deployment_id: &str, document: &serde_json::Value) -> Result<PathBuf> {
        let path = self.path(deployment_id);
        write_once(&path, &serde_json::to_string_pretty(document)?).await?;
        debug!("写入参数文件: {}", path.display());
        Ok(path)
    }

    /// 读取参数文件
    pub async fn read(&self, deployment_id: &str) -> Result<serde_json::Value> {
        let content = read_existing(&self.path(deployment_id)).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// 读取 ARM 参数文件中单个参数的值
    pub async fn read_value(&self, deployment_id: &str, name: &str) -> Result<Option<serde_json::Value>> {
        let document = self.read(deployment_id).await?;
        Ok(document
            .pointer(&format!("/parameters/{}/value", name))
            .cloned())
    }
}
