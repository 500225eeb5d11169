//! 内存探针，用于在没有真实服务时演练验证流程

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::probe::ServiceProbe;
use crate::{Result, ValidatorError};

/// 内存探针
#[derive(Debug, Default)]
pub struct InMemoryProbe {
    data: Mutex<HashMap<String, String>>,
    written: Mutex<Vec<String>>,
    /// 剩余的连接失败次数，`u32::MAX` 表示永远不可达
    unreachable_attempts: AtomicU32,
    connect_attempts: AtomicU32,
    corrupt_reads: bool,
    failing_delete: bool,
}

impl InMemoryProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// 前 `n` 次连接失败（模拟服务仍在启动）
    pub fn with_unreachable_attempts(self, n: u32) -> Self {
        self.unreachable_attempts.store(n, Ordering::SeqCst);
        self
    }

    pub fn always_unreachable(self) -> Self {
        self.with_unreachable_attempts(u32::MAX)
    }

    /// 回读时返回错误的值
    pub fn with_corrupt_reads(mut self) -> Self {
        self.corrupt_reads = true;
        self
    }

    pub fn with_failing_delete(mut self) -> Self {
        self.failing_delete = true;
        self
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// 写入过的全部键（按写入顺序）
    pub fn written_keys(&self) -> Vec<String> {
        self.written.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 当前存储的键
    pub fn stored_keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ServiceProbe for InMemoryProbe {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<()> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.unreachable_attempts.load(Ordering::SeqCst);
        if remaining == u32::MAX {
            return Err(ValidatorError::Connection("connection refused".to_string()));
        }
        if remaining > 0 {
            self.unreachable_attempts.store(remaining - 1, Ordering::SeqCst);
            return Err(ValidatorError::Connection("connection refused".to_string()));
        }
        Ok(())
    }

    async fn write_probe(&self, key: &str, value: &str) -> Result<()> {
        self.lock().insert(key.to_string(), value.to_string());
        self.written
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(key.to_string());
        Ok(())
    }

    async fn read_probe(&self, key: &str) -> Result<Option<String>> {
        let value = self.lock().get(key).cloned();
        if self.corrupt_reads {
            return Ok(value.map(|v| format!("{}-corrupted", v)));
        }
        Ok(value)
    }

    async fn delete_probe(&self, key: &str) -> Result<()> {
        if self.failing_delete {
            return Err(ValidatorError::Protocol("delete rejected".to_string()));
        }
        self.lock().remove(key);
        Ok(())
    }
}
