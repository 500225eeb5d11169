//! armtest CLI 应用

use anyhow::Result;
use armtest_executor::{ExecutorError, Settings};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "armtest")]
#[command(about = "ARM 模板部署测试工具 - 部署、验证、清理 Neo4j 市场模板", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// 所有命令共享的参数
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// 配置文件路径
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// 工作目录 (默认 .arm-testing，可用 ARMTEST_STATE_DIR 覆盖)
    #[arg(long, global = true)]
    pub workdir: Option<PathBuf>,

    /// 输出调试日志
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// 初始化工作目录和默认配置
    Setup {
        /// 覆盖已存在的配置文件
        #[arg(long)]
        force: bool,
    },

    /// 本地校验场景和参数 (不访问远端)
    Validate {
        /// 场景名称 (默认全部)
        #[arg(short, long)]
        scenario: Option<String>,
    },

    /// 部署场景
    Deploy(DeployArgs),

    /// 查看部署状态
    Status {
        /// 输出格式 (table/json/yaml)
        #[arg(short = 'f', long, default_value = "table")]
        format: String,
    },

    /// 对已成功的部署执行功能验证
    #[command(name = "test", alias = "validate-deployment")]
    Test {
        /// 部署 ID
        deployment_id: String,
    },

    /// 清理资源组
    Cleanup(CleanupArgs),

    /// 生成部署报告
    Report {
        /// 报告格式 (markdown/json/yaml)
        #[arg(short = 'f', long, default_value = "markdown")]
        format: String,

        /// 输出文件路径 (默认 results/report-<ts>.<ext>)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
pub struct DeployArgs {
    /// 场景名称 (可重复)
    #[arg(short, long, conflicts_with = "all")]
    pub scenario: Vec<String>,

    /// 部署全部场景
    #[arg(long)]
    pub all: bool,

    /// 仅生成参数并预检，不提交
    #[arg(long)]
    pub dry_run: bool,

    /// 部署区域
    #[arg(short, long)]
    pub region: Option<String>,

    /// 参数覆盖 key=value (可重复)
    #[arg(short = 'p', long = "param")]
    pub params: Vec<String>,

    /// 提交后立即返回，不等待部署完成
    #[arg(long)]
    pub no_wait: bool,

    /// 部署成功后跳过功能验证
    #[arg(long)]
    pub skip_validation: bool,
}

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// 只清理指定部署
    #[arg(short, long, conflicts_with = "all")]
    pub deployment: Option<String>,

    /// 清理全部部署
    #[arg(long)]
    pub all: bool,

    /// 忽略清理策略
    #[arg(long)]
    pub force: bool,

    /// 只清理早于该时长的部署 (30m/2h/3d/1w)
    #[arg(long)]
    pub older_than: Option<String>,

    /// 只显示决策，不删除
    #[arg(long)]
    pub dry_run: bool,
}

fn init_tracing(verbose: bool, settings: Option<&Settings>) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = settings.map(|s| s.logging.level.as_str()).unwrap_or("info");
            EnvFilter::new(level)
        })
    };

    // 日志写到 stderr，stdout 只输出结果
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// 错误 → 退出码：执行器错误按分类，其余视为配置错误
fn exit_code_of(error: &anyhow::Error) -> i32 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<ExecutorError>())
        .map(ExecutorError::exit_code)
        .unwrap_or(1)
}

async fn run(cli: Cli, settings: Result<Settings>) -> Result<i32> {
    let global = cli.global;
    match cli.command {
        Commands::Setup { force } => commands::setup::handle(&global, force).await,
        Commands::Validate { scenario } => {
            commands::validate::handle(&global, settings?, scenario).await
        }
        Commands::Deploy(args) => commands::deploy::handle(&global, settings?, args).await,
        Commands::Status { format } => commands::status::handle(&global, settings?, &format).await,
        Commands::Test { deployment_id } => {
            commands::test::handle(&global, settings?, &deployment_id).await
        }
        Commands::Cleanup(args) => commands::cleanup::handle(&global, settings?, args).await,
        Commands::Report { format, output } => {
            commands::report::handle(&global, settings?, &format, output).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let workdir = commands::common::resolve_workdir(&cli.global);
    let settings = Settings::load(cli.global.config.as_deref(), &workdir);
    init_tracing(cli.global.verbose, settings.as_ref().ok());

    let code = match run(cli, settings).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "✗".red(), e);
            exit_code_of(&e)
        }
    };
    std::process::exit(code);
}
