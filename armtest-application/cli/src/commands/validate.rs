//! 本地校验：场景规则 + 模板参数 (不访问远端)

use anyhow::Result;
use armtest_executor::{ParameterGenerator, RunContext, Scenario, Settings, TemplateSchema};
use colored::Colorize;

use super::common::AppContext;
use super::output::{print_table, TableRow};
use crate::GlobalArgs;

struct CheckRow {
    scenario: String,
    template: String,
    parameters: usize,
    passed: bool,
    message: String,
}

impl TableRow for CheckRow {
    fn headers() -> Vec<&'static str> {
        vec!["场景", "模板", "参数", "结果", "说明"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.scenario.clone(),
            self.template.clone(),
            self.parameters.to_string(),
            if self.passed { "PASS".green().to_string() } else { "FAIL".red().to_string() },
            self.message.clone(),
        ]
    }

    fn widths() -> Vec<usize> {
        vec![24, 40, 6, 6, 40]
    }
}

fn check(settings: &Settings, scenario: &Scenario) -> CheckRow {
    let template = settings.template_path(scenario.template.as_deref());
    let result = TemplateSchema::load(&template).and_then(|schema| {
        let password = settings.credentials.password_strategy.resolve()?;
        let context = RunContext::new(&settings.azure.default_region);
        ParameterGenerator::new(settings, &schema).generate(scenario, &context, &password)
    });

    let (passed, parameters, message) = match result {
        Ok(params) => (true, params.values.len(), format!("资源组 {}", params.names.resource_group)),
        Err(e) => (false, 0, e.to_string()),
    };
    CheckRow {
        scenario: scenario.name.clone(),
        template: template.display().to_string(),
        parameters,
        passed,
        message,
    }
}

pub async fn handle(global: &GlobalArgs, settings: Settings, scenario: Option<String>) -> Result<i32> {
    let ctx = AppContext::new(global, settings)?;
    let registry = ctx.scenarios()?;

    let selected: Vec<&Scenario> = match &scenario {
        Some(name) => vec![registry.get(name)?],
        None => registry.list().iter().collect(),
    };

    let rows: Vec<CheckRow> = selected.iter().map(|s| check(&ctx.settings, s)).collect();
    print_table(&rows);

    let failed = rows.iter().filter(|r| !r.passed).count();
    if failed == 0 {
        println!("\n{} {} 个场景校验通过", "✓".green(), rows.len());
        Ok(0)
    } else {
        println!("\n{} {} 个场景校验失败", "✗".red(), failed);
        Ok(1)
    }
}
