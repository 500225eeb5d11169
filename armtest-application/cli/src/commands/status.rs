//! 部署状态查询

use anyhow::Result;
use armtest_common::DeploymentState;
use armtest_executor::Settings;
use armtest_storage::DeploymentRecord;
use chrono::Utc;
use colored::Colorize;
use serde::Serialize;

use super::common::{format_age, AppContext};
use super::output::{output_formatted, TableRow};
use crate::GlobalArgs;

#[derive(Serialize)]
struct StatusRow {
    deployment_id: String,
    scenario: String,
    state: DeploymentState,
    resource_group: String,
    created: String,
    age: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    validation: Option<bool>,
}

impl StatusRow {
    fn from_record(record: &DeploymentRecord) -> Self {
        Self {
            deployment_id: record.deployment_id.clone(),
            scenario: record.scenario.clone(),
            state: record.state,
            resource_group: record.resource_group.clone(),
            created: record.created_at.to_rfc3339(),
            age: format_age(Utc::now() - record.created_at),
            failure: record.failure.as_ref().map(|f| f.to_string()),
            validation: record.latest_validation().map(|v| v.pass),
        }
    }
}

impl TableRow for StatusRow {
    fn headers() -> Vec<&'static str> {
        vec!["部署 ID", "场景", "状态", "资源组", "创建", "验证"]
    }

    fn row(&self) -> Vec<String> {
        let state = match self.state {
            DeploymentState::Succeeded => self.state.to_string().green().to_string(),
            DeploymentState::Failed => self.state.to_string().red().to_string(),
            DeploymentState::CleanedUp => self.state.to_string().dimmed().to_string(),
            _ => self.state.to_string().yellow().to_string(),
        };
        let validation = match self.validation {
            Some(true) => "PASS".green().to_string(),
            Some(false) => "FAIL".red().to_string(),
            None => "-".to_string(),
        };
        vec![
            self.deployment_id.clone(),
            self.scenario.clone(),
            state,
            self.resource_group.clone(),
            self.age.clone(),
            validation,
        ]
    }

    fn widths() -> Vec<usize> {
        vec![44, 24, 12, 56, 10, 6]
    }
}

pub async fn handle(global: &GlobalArgs, settings: Settings, format: &str) -> Result<i32> {
    let ctx = AppContext::new(global, settings)?;
    let records = ctx.storage.deployments().list().await?;

    let rows: Vec<StatusRow> = records
        .iter()
        .filter(|r| global.verbose || r.state != DeploymentState::CleanedUp)
        .map(StatusRow::from_record)
        .collect();

    if rows.is_empty() {
        if format == "table" {
            println!("{} 没有部署记录", "ℹ".yellow());
        } else {
            output_formatted(&rows, format)?;
        }
        return Ok(0);
    }

    output_formatted(&rows, format)?;

    if format == "table" {
        let hidden = records.len() - rows.len();
        if hidden > 0 {
            println!("\n{} 另有 {} 个已清理的部署 (使用 --verbose 显示)", "ℹ".blue(), hidden);
        }
        if global.verbose {
            for record in records.iter().filter(|r| r.failure.is_some()) {
                if let Some(error) = &record.error {
                    println!("\n{} {} [{}]", "✗".red(), record.deployment_id.bold(), error.class.name());
                    println!("{}", error.raw);
                }
            }
        }
    }
    Ok(0)
}
