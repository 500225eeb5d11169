//! 部署命令

use anyhow::Result;
use armtest_executor::parameters::parse_override;
use armtest_executor::{
    DeploymentOutcome, DryRunOutcome, ExecutorError, RunOptions, Scenario, ScenarioRegistry,
    Settings,
};
use colored::Colorize;

use super::common::AppContext;
use super::output::{print_table, TableRow};
use super::progress::SpinnerRenderer;
use crate::{DeployArgs, GlobalArgs};

struct OutcomeRow<'a>(&'a DeploymentOutcome);

impl TableRow for OutcomeRow<'_> {
    fn headers() -> Vec<&'static str> {
        vec!["场景", "部署 ID", "状态", "连接", "验证", "结果"]
    }

    fn row(&self) -> Vec<String> {
        let o = self.0;
        let state = match (&o.dry_run, o.state()) {
            (Some(DryRunOutcome::Passed), _) => "dry-run: passed".to_string(),
            (Some(DryRunOutcome::Skipped), _) => "dry-run: skipped".to_string(),
            (Some(DryRunOutcome::Rejected(class)), _) => format!("dry-run: {}", class.name()),
            (None, Some(state)) => state.to_string(),
            (None, None) => "-".to_string(),
        };
        let validation = match &o.validation {
            Some(v) if v.pass => "PASS".green().to_string(),
            Some(v) => v
                .reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "FAIL".to_string())
                .red()
                .to_string(),
            None => "-".to_string(),
        };
        let result = if o.is_success() {
            "OK".green().to_string()
        } else {
            format!("exit {}", o.exit_code()).red().to_string()
        };

        vec![
            o.scenario.clone(),
            o.deployment_id.clone().unwrap_or_else(|| "-".to_string()),
            state,
            o.connection
                .as_ref()
                .map(|c| c.endpoint.clone())
                .unwrap_or_else(|| "-".to_string()),
            validation,
            result,
        ]
    }

    fn widths() -> Vec<usize> {
        vec![24, 44, 18, 36, 12, 8]
    }
}

fn select(registry: &ScenarioRegistry, args: &DeployArgs) -> Result<Vec<Scenario>> {
    if args.all {
        return Ok(registry.list().to_vec());
    }
    if args.scenario.is_empty() {
        return Err(ExecutorError::Configuration("需要指定 --scenario <名称> 或 --all".into()).into());
    }
    args.scenario
        .iter()
        .map(|name| registry.get(name).cloned().map_err(anyhow::Error::from))
        .collect()
}

fn print_details(outcome: &DeploymentOutcome) {
    if let Some(error) = &outcome.error {
        println!("  {} {}: {}", "✗".red(), outcome.scenario.bold(), error);
    }
    if let Some(record) = &outcome.record {
        if let Some(failure) = &record.failure {
            println!("  {} {}: {}", "✗".red(), outcome.scenario.bold(), failure);
        }
        if let Some(error) = &record.error {
            for op in &error.failed_operations {
                println!("      - {}", op);
            }
        }
    }
    if let Some(DryRunOutcome::Rejected(class)) = &outcome.dry_run {
        println!("  {} {}: 预检未通过 ({})", "✗".red(), outcome.scenario.bold(), class);
    }
    if let Some(connection) = &outcome.connection {
        if let Some(uri) = &connection.protocol_uri {
            println!("  {} {}: {}", "→".cyan(), outcome.scenario.bold(), uri);
        }
    }
    if let Some(path) = &outcome.parameters_file {
        println!("  {} 参数文件: {}", "ℹ".blue(), path.display());
    }
}

pub async fn handle(global: &GlobalArgs, settings: Settings, args: DeployArgs) -> Result<i32> {
    let ctx = AppContext::new(global, settings)?;
    let registry = ctx.scenarios()?;
    let scenarios = select(&registry, &args)?;
    let overrides = args
        .params
        .iter()
        .map(|raw| parse_override(raw))
        .collect::<armtest_executor::Result<Vec<_>>>()?;

    let options = RunOptions {
        dry_run: args.dry_run,
        no_wait: args.no_wait,
        validate: !args.skip_validation,
        region: args.region.clone(),
        overrides,
        cleanup: true,
    };

    let names: Vec<&str> = scenarios.iter().map(|s| s.name.as_str()).collect();
    println!(
        "{} {} {} 个场景: {}",
        "⏳".cyan(),
        if options.dry_run { "预检" } else { "部署" },
        scenarios.len(),
        names.join(", ")
    );

    let runner = ctx.runner();
    let cancel = runner.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "\n{} 已取消本地监控。远端部署不会被取消，可能仍在运行或自行回滚；请用 armtest status / armtest cleanup 处理。",
                "⚠".yellow()
            );
            cancel.cancel();
        }
    });

    let outcomes = runner.run(&scenarios, &options, SpinnerRenderer::new()).await;

    println!();
    let rows: Vec<OutcomeRow> = outcomes.iter().map(OutcomeRow).collect();
    print_table(&rows);
    println!();
    for outcome in &outcomes {
        print_details(outcome);
    }

    if options.no_wait && !options.dry_run {
        println!("\n{} 已提交，使用 {} 查看进度", "ℹ".blue(), "armtest status".cyan());
    }

    let worst = outcomes.iter().map(DeploymentOutcome::exit_code).max().unwrap_or(0);
    if worst == 0 {
        println!("\n{} 全部完成", "✓".green());
    }
    Ok(worst)
}
