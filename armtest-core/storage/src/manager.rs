use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::Result;

/// 工作目录下的子目录
pub const STATE_DIR: &str = "state";
pub const PARAMS_DIR: &str = "params";
pub const RESULTS_DIR: &str = "results";
pub const LOGS_DIR: &str = "logs";
pub const CONFIG_DIR: &str = "config";

/// 存储管理器 - 负责工作目录布局
///
/// ```text
/// <root>/
///   config/   settings.yaml, scenarios.yaml
///   state/    <deployment_id>.json
///   params/   <deployment_id>.json
///   results/  <deployment_id>.connection.json, report-<ts>.md
///   logs/
/// ```
#[derive(Debug, Clone)]
pub struct StorageManager {
    root: PathBuf,
}

impl StorageManager {
    /// 创建存储管理器并确保目录存在
    ///
    /// # 参数
    /// - `root`: 工作目录，支持 `~` 展开
    pub fn new(root: &str) -> Result<Self> {
        // 展开用户目录
        let expanded = shellexpand::tilde(root);
        let root = PathBuf::from(expanded.as_ref());

        for dir in [CONFIG_DIR, STATE_DIR, PARAMS_DIR, RESULTS_DIR, LOGS_DIR] {
            std::fs::create_dir_all(root.join(dir))?;
        }

        info!("工作目录: {}", root.display());
        Ok(Self { root })
    }

    /// 打开已存在的工作目录（不创建）
    pub fn open(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        debug!("打开工作目录: {}", root.display());
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join(CONFIG_DIR)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn params_dir(&self) -> PathBuf {
        self.root.join(PARAMS_DIR)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join(RESULTS_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    /// 工作目录是否已初始化
    pub fn is_initialized(&self) -> bool {
        self.state_dir().is_dir() && self.config_dir().is_dir()
    }
}
