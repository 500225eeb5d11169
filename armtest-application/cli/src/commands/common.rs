//! 公共工具函数模块
//!
//! 提供各命令模块共享的功能，包括：
//! - 工作目录解析和存储初始化
//! - 部署客户端和探针工厂创建
//! - 场景文件加载

use anyhow::{Context, Result};
use armtest_executor::{DeploymentRunner, ScenarioRegistry, Settings};
use armtest_provider::{AzCliClient, AzCliConfig, DeploymentClient};
use armtest_storage::{Storage, StorageManager};
use armtest_validator::{Neo4jProbeConfig, Neo4jProbeFactory, ProbeFactory};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::GlobalArgs;

pub const DEFAULT_WORKDIR: &str = ".arm-testing";
pub const SCENARIOS_FILE: &str = "scenarios.yaml";
pub const SETTINGS_FILE: &str = "settings.yaml";

/// `--workdir` > `ARMTEST_STATE_DIR` > `.arm-testing`
pub fn resolve_workdir(global: &GlobalArgs) -> PathBuf {
    global
        .workdir
        .clone()
        .or_else(|| std::env::var_os("ARMTEST_STATE_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKDIR))
}

/// 一次命令执行所需的上下文
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub storage: Arc<Storage>,
}

impl AppContext {
    pub fn new(global: &GlobalArgs, settings: Settings) -> Result<Self> {
        let workdir = resolve_workdir(global);
        let workdir_str = workdir
            .to_str()
            .with_context(|| format!("工作目录不是有效的 UTF-8 路径: {:?}", workdir))?;
        let manager = StorageManager::new(workdir_str)
            .with_context(|| format!("无法初始化工作目录: {}", workdir.display()))?;

        Ok(Self {
            settings: Arc::new(settings),
            storage: Arc::new(Storage::from_manager(&manager)),
        })
    }

    pub fn scenarios_path(&self) -> PathBuf {
        self.storage.manager().config_dir().join(SCENARIOS_FILE)
    }

    /// 加载场景文件，不存在时使用内置场景
    pub fn scenarios(&self) -> Result<ScenarioRegistry> {
        let path = self.scenarios_path();
        if path.exists() {
            info!("加载场景文件: {}", path.display());
            Ok(ScenarioRegistry::load(&path)?)
        } else {
            warn!("场景文件 {} 不存在，使用内置场景 (运行 armtest setup 生成)", path.display());
            Ok(ScenarioRegistry::from_scenarios(ScenarioRegistry::default_scenarios())?)
        }
    }

    /// az CLI 部署客户端
    pub fn client(&self) -> Arc<dyn DeploymentClient> {
        Arc::new(AzCliClient::new(AzCliConfig {
            program: self.settings.azure.az_program.clone(),
            subscription: self.settings.azure.subscription.clone(),
        }))
    }

    /// Neo4j 探针工厂
    pub fn probes(&self) -> Arc<dyn ProbeFactory> {
        let validation = &self.settings.validation;
        Arc::new(Neo4jProbeFactory::new(Neo4jProbeConfig {
            database: validation.database.clone(),
            request_timeout: validation.retry.attempt_timeout,
            verify_tls: validation.verify_tls,
        }))
    }

    pub fn runner(&self) -> DeploymentRunner {
        DeploymentRunner::new(
            self.settings.clone(),
            self.client(),
            self.storage.clone(),
            self.probes(),
        )
    }
}

/// 相对时间 (`5m ago`)
pub fn format_age(age: chrono::Duration) -> String {
    let secs = age.num_seconds().max(0);
    match secs {
        0..=59 => format!("{}s ago", secs),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86400),
    }
}

/// 时长的简短显示 (`12m 30s`)
pub fn format_elapsed(elapsed: std::time::Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

/// 写文件前检查是否需要覆盖
pub fn should_write(path: &Path, force: bool) -> bool {
    force || !path.exists()
}
