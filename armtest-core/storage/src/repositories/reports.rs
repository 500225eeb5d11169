use armtest_common::DeploymentState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

use crate::error::{Result, StorageError};
use crate::models::DeploymentRecord;

/// 报告格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Markdown,
    Json,
    Yaml,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(StorageError::ValidationError(format!("不支持的报告格式: {}", other))),
        }
    }
}

/// 报告中的单条部署
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub deployment_id: String,
    pub scenario: String,
    pub resource_group: String,
    pub region: String,
    pub state: DeploymentState,
    pub created_at: DateTime<Utc>,
    pub duration_secs: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_passed: Option<bool>,
}

impl From<&DeploymentRecord> for ReportEntry {
    fn from(record: &DeploymentRecord) -> Self {
        Self {
            deployment_id: record.deployment_id.clone(),
            scenario: record.scenario.clone(),
            resource_group: record.resource_group.clone(),
            region: record.region.clone(),
            state: record.state,
            created_at: record.created_at,
            duration_secs: record.elapsed().num_seconds(),
            failure: record.failure.as_ref().map(|f| f.to_string()),
            error_class: record.error.as_ref().map(|e| e.class.name().to_string()),
            validation_passed: record.latest_validation().map(|v| v.pass),
        }
    }
}

/// 部署报告（按需从状态存储生成，不是事实来源）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentReport {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub by_state: BTreeMap<String, usize>,
    pub validations_passed: usize,
    pub validations_failed: usize,
    pub entries: Vec<ReportEntry>,
}

impl DeploymentReport {
    pub fn from_records(records: &[DeploymentRecord]) -> Self {
        let mut by_state = BTreeMap::new();
        for record in records {
            *by_state.entry(record.state.to_string()).or_insert(0) += 1;
        }

        let entries: Vec<ReportEntry> = records.iter().map(ReportEntry::from).collect();
        let validations_passed = entries.iter().filter(|e| e.validation_passed == Some(true)).count();
        let validations_failed = entries.iter().filter(|e| e.validation_passed == Some(false)).count();

        Self {
            generated_at: Utc::now(),
            total: records.len(),
            by_state,
            validations_passed,
            validations_failed,
            entries,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# 部署测试报告");
        let _ = writeln!(out);
        let _ = writeln!(out, "生成时间: {}", self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(out);
        let _ = writeln!(out, "## 汇总");
        let _ = writeln!(out);
        let _ = writeln!(out, "- 部署总数: {}", self.total);
        for (state, count) in &self.by_state {
            let _ = writeln!(out, "- {}: {}", state, count);
        }
        let _ = writeln!(
            out,
            "- 功能验证: {} 通过 / {} 失败",
            self.validations_passed, self.validations_failed
        );
        let _ = writeln!(out);

        if self.entries.is_empty() {
            let _ = writeln!(out, "_没有部署记录_");
            return out;
        }

        let _ = writeln!(out, "## 部署明细");
        let _ = writeln!(out);
        let _ = writeln!(out, "| 部署 ID | 场景 | 资源组 | 状态 | 耗时 | 验证 | 失败原因 |");
        let _ = writeln!(out, "|---|---|---|---|---|---|---|");
        for entry in &self.entries {
            let validation = match entry.validation_passed {
                Some(true) => "通过",
                Some(false) => "失败",
                None => "-",
            };
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} | {} |",
                entry.deployment_id,
                entry.scenario,
                entry.resource_group,
                entry.state,
                format_duration(entry.duration_secs),
                validation,
                entry.failure.as_deref().unwrap_or("-").replace('|', "\\|").replace('\n', " "),
            );
        }
        out
    }

    pub fn render(&self, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Markdown => Ok(self.to_markdown()),
            ReportFormat::Json => self.to_json(),
            ReportFormat::Yaml => self.to_yaml(),
        }
    }
}

fn format_duration(secs: i64) -> String {
    if secs >= 3600 {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs.max(0))
    }
}

/// 报告仓储：渲染并写入 `results/`
pub struct ReportRepository {
    dir: PathBuf,
}

impl ReportRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// 默认输出路径 `results/report-<ts>.<ext>`
    pub fn default_path(&self, format: ReportFormat) -> PathBuf {
        let ts = Utc::now().format("%Y%m%d-%H%M%S");
        self.dir.join(format!("report-{}.{}", ts, format.extension()))
    }

    /// 渲染报告写入文件，`path` 为空时使用默认路径
    pub async fn write(
        &self,
        report: &DeploymentReport,
        format: ReportFormat,
        path: Option<PathBuf>,
    ) -> Result<PathBuf> {
        let path = path.unwrap_or_else(|| self.default_path(format));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, report.render(format)?).await?;
        info!("报告已生成: {}", path.display());
        Ok(path)
    }
}
