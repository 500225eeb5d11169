//! 初始化工作目录

use anyhow::{Context, Result};
use armtest_executor::{ScenarioRegistry, Settings};
use armtest_storage::StorageManager;
use colored::Colorize;

use super::common::{resolve_workdir, should_write, SCENARIOS_FILE, SETTINGS_FILE};
use crate::GlobalArgs;

pub async fn handle(global: &GlobalArgs, force: bool) -> Result<i32> {
    let workdir = resolve_workdir(global);
    let workdir_str = workdir
        .to_str()
        .with_context(|| format!("工作目录不是有效的 UTF-8 路径: {:?}", workdir))?;
    let manager = StorageManager::new(workdir_str)
        .with_context(|| format!("无法创建工作目录: {}", workdir.display()))?;
    println!("{} 工作目录: {}", "✓".green(), workdir.display());

    let settings_path = global
        .config
        .clone()
        .unwrap_or_else(|| manager.config_dir().join(SETTINGS_FILE));
    if should_write(&settings_path, force) {
        Settings::default().save_to_file(&settings_path)?;
        println!("{} 已写入默认配置: {}", "✓".green(), settings_path.display());
    } else {
        println!(
            "{} 配置已存在，跳过: {} (使用 --force 覆盖)",
            "ℹ".yellow(),
            settings_path.display()
        );
    }

    let scenarios_path = manager.config_dir().join(SCENARIOS_FILE);
    if should_write(&scenarios_path, force) {
        ScenarioRegistry::write_defaults(&scenarios_path)?;
        println!("{} 已写入默认场景: {}", "✓".green(), scenarios_path.display());
    } else {
        println!(
            "{} 场景文件已存在，跳过: {} (使用 --force 覆盖)",
            "ℹ".yellow(),
            scenarios_path.display()
        );
    }

    println!("\n下一步: {} 然后 {}", "armtest validate".cyan(), "armtest deploy --scenario standalone-v5".cyan());
    Ok(0)
}
