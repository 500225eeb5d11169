use armtest_common::ConnectionDescriptor;
use std::path::PathBuf;
use tracing::debug;

use super::{read_existing, write_once};
use crate::error::Result;

/// 连接描述仓储：`results/<deployment_id>.connection.json`，只写一次
pub struct ConnectionRepository {
    dir: PathBuf,
}

impl ConnectionRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, deployment_id: &str) -> PathBuf {
        self.dir.join(format!("{}.connection.json", deployment_id))
    }

    pub async fn save(&self, deployment_id: &str, descriptor: &ConnectionDescriptor) -> Result<PathBuf> {
        let path = self.path(deployment_id);
        write_once(&path, &serde_json::to_string_pretty(descriptor)?).await?;
        debug!("写入连接描述: {}", path.display());
        Ok(path)
    }

    pub async fn load(&self, deployment_id: &str) -> Result<ConnectionDescriptor> {
        let content = read_existing(&self.path(deployment_id)).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let repo = ConnectionRepository::new(tmp.path());
        let desc = ConnectionDescriptor::new("svc-abc:7474", "neo4j");

        repo.save("dep-1", &desc).await.unwrap();
        assert_eq!(repo.load("dep-1").await.unwrap(), desc);
        assert!(repo.save("dep-1", &desc).await.is_err());
    }
}
