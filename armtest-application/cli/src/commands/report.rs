//! 部署报告生成

use anyhow::{Context, Result};
use armtest_executor::Settings;
use armtest_storage::{DeploymentReport, ReportFormat};
use colored::Colorize;
use std::path::PathBuf;

use super::common::AppContext;
use crate::GlobalArgs;

pub async fn handle(
    global: &GlobalArgs,
    settings: Settings,
    format: &str,
    output: Option<PathBuf>,
) -> Result<i32> {
    let format: ReportFormat = format.parse().context("无效的报告格式")?;
    let ctx = AppContext::new(global, settings)?;

    println!("{} 从状态存储生成报告...", "⏳".cyan());
    let records = ctx.storage.deployments().list().await?;
    let report = DeploymentReport::from_records(&records);
    let path = ctx.storage.reports().write(&report, format, output).await?;

    println!(
        "{} 共 {} 个部署，验证通过 {} / 失败 {}",
        "✓".green(),
        report.total,
        report.validations_passed,
        report.validations_failed
    );
    for (state, count) in &report.by_state {
        println!("  {:<12} {}", state, count);
    }
    println!("\n{} 报告已写入: {}", "✓".green(), path.display());
    Ok(0)
}
