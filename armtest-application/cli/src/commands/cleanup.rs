//! 资源组清理

use anyhow::Result;
use armtest_executor::lifecycle::parse_age;
use armtest_executor::{
    CleanupAction, CleanupDecision, CleanupOptions, CleanupTarget, ExecutorError, LifecycleManager,
    Settings,
};
use colored::Colorize;

use super::common::AppContext;
use super::output::{print_table, TableRow};
use crate::{CleanupArgs, GlobalArgs};

struct DecisionRow<'a>(&'a CleanupDecision);

impl TableRow for DecisionRow<'_> {
    fn headers() -> Vec<&'static str> {
        vec!["资源组", "部署 ID", "操作", "原因"]
    }

    fn row(&self) -> Vec<String> {
        let action = match self.0.action {
            CleanupAction::Delete => "delete".red().to_string(),
            CleanupAction::Skip => "skip".dimmed().to_string(),
        };
        vec![
            self.0.resource_group.clone(),
            self.0.deployment_id.clone(),
            action,
            self.0.reason.clone(),
        ]
    }

    fn widths() -> Vec<usize> {
        vec![56, 44, 8, 40]
    }
}

fn options(args: &CleanupArgs) -> Result<CleanupOptions> {
    let target = match (&args.deployment, args.all) {
        (Some(id), _) => CleanupTarget::Deployment(id.clone()),
        (None, true) => CleanupTarget::All,
        (None, false) => {
            return Err(ExecutorError::Configuration("需要指定 --deployment <ID> 或 --all".into()).into())
        }
    };
    let older_than = args.older_than.as_deref().map(parse_age).transpose()?;

    Ok(CleanupOptions::new(target)
        .with_force(args.force)
        .with_older_than(older_than)
        .with_dry_run(args.dry_run))
}

pub async fn handle(global: &GlobalArgs, settings: Settings, args: CleanupArgs) -> Result<i32> {
    let options = options(&args)?;
    let ctx = AppContext::new(global, settings)?;
    let manager = LifecycleManager::new(
        ctx.client(),
        ctx.storage.clone(),
        ctx.settings.deployment.call_timeout,
    );

    if options.dry_run {
        println!("{} 预览模式，不会删除任何资源", "ℹ".blue());
    }
    let summary = manager.cleanup(&options).await?;

    let rows: Vec<DecisionRow> = summary.decisions.iter().map(DecisionRow).collect();
    if rows.is_empty() {
        println!("{} 没有可清理的部署", "ℹ".yellow());
        return Ok(0);
    }
    print_table(&rows);

    println!(
        "\n共 {}，已清理 {}，跳过 {}，失败 {}",
        summary.total,
        summary.cleaned.to_string().green(),
        summary.skipped.to_string().yellow(),
        summary.failed.to_string().red()
    );
    Ok(if summary.is_success() { 0 } else { 2 })
}
