//! 文件后端的部署状态存储
//!
//! 每个部署一个 JSON 文件 `<state_dir>/<deployment_id>.json`。
//! 所有读-改-写都在记录级作用域锁内完成：进程内用 tokio 互斥锁串行化，
//! 跨进程用 `<deployment_id>.lock` 独占文件串行化。写入先落临时文件再原子改名，
//! 无锁读取不会看到写了一半的记录。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use armtest_common::DeploymentState;
use tokio::io::AsyncWriteExt;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Result, StorageError};
use crate::models::DeploymentRecord;

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);
const STALE_LOCK_AGE: Duration = Duration::from_secs(120);

/// 记录级锁，释放时删除锁文件
struct RecordLock {
    _guard: OwnedMutexGuard<()>,
    lock_file: PathBuf,
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.lock_file) {
            warn!("删除锁文件失败 {}: {}", self.lock_file.display(), e);
        }
    }
}

/// 部署状态存储
pub struct StateStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    lock_timeout: Duration,
    stale_lock_age: Duration,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
            lock_timeout: Duration::from_secs(30),
            stale_lock_age: STALE_LOCK_AGE,
        }
    }

    /// 设置跨进程锁的等待上限
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// 锁文件超过该时长未更新即视为崩溃进程遗留
    pub fn with_stale_lock_age(mut self, age: Duration) -> Self {
        self.stale_lock_age = age;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn validate_id(id: &str) -> Result<()> {
        let valid = !id.is_empty()
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(())
        } else {
            Err(StorageError::ValidationError(format!("非法的部署 ID: {:?}", id)))
        }
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn acquire(&self, id: &str) -> Result<RecordLock> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(id.to_string()).or_default().clone()
        };
        let guard = mutex.lock_owned().await;

        let lock_file = self.dir.join(format!("{}.lock", id));
        let started = Instant::now();
        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_file)
                .await
            {
                Ok(mut file) => {
                    let lock = RecordLock { _guard: guard, lock_file };
                    file.write_all(std::process::id().to_string().as_bytes()).await?;
                    return Ok(lock);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if lock_is_stale(&lock_file, self.stale_lock_age).await {
                        warn!("清除过期锁文件: {}", lock_file.display());
                        match tokio::fs::remove_file(&lock_file).await {
                            Ok(()) => continue,
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                            Err(e) => warn!("删除过期锁文件失败 {}: {}", lock_file.display(), e),
                        }
                    }
                    if started.elapsed() >= self.lock_timeout {
                        return Err(StorageError::LockTimeout(id.to_string()));
                    }
                    tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn read_record(&self, id: &str) -> Result<Option<DeploymentRecord>> {
        match tokio::fs::read_to_string(self.record_path(id)).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_record(&self, record: &DeploymentRecord) -> Result<()> {
        let path = self.record_path(&record.deployment_id);
        let tmp = self.dir.join(format!(".{}.json.tmp", record.deployment_id));
        let content = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("写入部署记录: {} ({})", record.deployment_id, record.state);
        Ok(())
    }

    /// 插入新记录，已存在时返回 `AlreadyExists`
    pub async fn insert(&self, record: &DeploymentRecord) -> Result<()> {
        Self::validate_id(&record.deployment_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let _lock = self.acquire(&record.deployment_id).await?;

        if self.read_record(&record.deployment_id).await?.is_some() {
            return Err(StorageError::AlreadyExists(record.deployment_id.clone()));
        }
        self.write_record(record).await
    }

    /// 读取记录，不存在时返回 `None`
    pub async fn get(&self, id: &str) -> Result<Option<DeploymentRecord>> {
        Self::validate_id(id)?;
        self.read_record(id).await
    }

    /// 读取记录，不存在时返回 `NotFound`
    pub async fn load(&self, id: &str) -> Result<DeploymentRecord> {
        self.get(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    /// 所有记录，按创建时间倒序
    ///
    /// 无法解析的文件记日志后跳过。
    pub async fn list(&self) -> Result<Vec<DeploymentRecord>> {
        let mut records = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_record = path.extension().and_then(|e| e.to_str()) == Some("json")
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with('.'))
                    .unwrap_or(true);
            if !is_record {
                continue;
            }

            let parsed = tokio::fs::read_to_string(&path)
                .await
                .map_err(StorageError::from)
                .and_then(|content| {
                    serde_json::from_str::<DeploymentRecord>(&content).map_err(StorageError::from)
                });
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => warn!("跳过无法解析的状态文件 {}: {}", path.display(), e),
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// 记录级读-改-写
    ///
    /// 加锁、读取、在副本上执行 `mutate`、写回、释放。`mutate` 返回错误时不写入。
    pub async fn update<T, F>(&self, id: &str, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut DeploymentRecord) -> Result<T>,
    {
        Self::validate_id(id)?;
        let _lock = self.acquire(id).await?;

        let mut record = self
            .read_record(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        let value = mutate(&mut record)?;
        if record.deployment_id != id {
            return Err(StorageError::ValidationError(format!(
                "不允许修改部署 ID: {} -> {}",
                id, record.deployment_id
            )));
        }
        self.write_record(&record).await?;
        Ok(value)
    }

    /// 状态转换（加锁执行）
    pub async fn transition(&self, id: &str, to: DeploymentState) -> Result<DeploymentRecord> {
        self.update(id, |record| {
            record.transition(to)?;
            Ok(record.clone())
        })
        .await
    }

    /// 清除记录（操作员显式清理）
    pub async fn remove(&self, id: &str) -> Result<()> {
        Self::validate_id(id)?;
        let _lock = self.acquire(id).await?;
        match tokio::fs::remove_file(self.record_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

async fn lock_is_stale(path: &Path, max_age: Duration) -> bool {
    match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => SystemTime::now()
            .duration_since(modified)
            .map(|age| age > max_age)
            .unwrap_or(false),
        Err(_) => false,
    }
}
