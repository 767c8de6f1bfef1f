//! TCE CLI 应用

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tce_executor::EngineConfig;

mod commands;

#[derive(Parser)]
#[command(name = "tce")]
#[command(about = "TCE - 脚本化测试用例执行引擎", long_about = None)]
#[command(version)]
struct Cli {
    /// 日志级别 (设置 RUST_LOG 时以其为准)
    #[arg(short, long)]
    log_level: Option<String>,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 运行测试用例 (多个用例并发执行)
    Run(RunArgs),

    /// 列出测试用例
    List {
        /// 用例目录 (默认取配置中的 cases.directory)
        dir: Option<PathBuf>,

        /// 输出格式 (table/json/yaml)
        #[arg(short = 'f', long, default_value = "table")]
        format: String,
    },

    /// 按队列逐个运行目录中的全部用例
    Suite(SuiteArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// 用例脚本或目录
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// 输出格式 (table/json/yaml/csv)
    #[arg(short = 'f', long)]
    format: Option<String>,

    /// 导出结果文件 (不带目录时写在用例旁边)
    #[arg(long, num_args = 0..=1, value_name = "DIR")]
    export: Option<Option<PathBuf>>,

    /// IN_PROGRESS 步骤的轮询间隔 (毫秒)
    #[arg(long)]
    poll_interval_ms: Option<u64>,
}

#[derive(Args)]
pub struct SuiteArgs {
    /// 用例目录 (默认取配置中的 cases.directory)
    dir: Option<PathBuf>,

    /// 第一轮结束后重新运行失败的用例
    #[arg(long)]
    retry_failed: bool,

    /// 汇总 CSV 输出路径
    #[arg(long)]
    summary: Option<PathBuf>,

    /// 导出结果文件 (不带目录时写在用例旁边)
    #[arg(long, num_args = 0..=1, value_name = "DIR")]
    export: Option<Option<PathBuf>>,

    /// 输出格式 (table/json/yaml)
    #[arg(short = 'f', long, default_value = "table")]
    format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = EngineConfig::load(cli.config.as_deref()).context("加载配置失败")?;

    // 初始化日志 (输出到 stderr，避免干扰 json/yaml 输出)
    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.log_level.clone())
        .to_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    config.validate().context("配置无效")?;

    info!("TCE CLI 启动");

    match cli.command {
        Commands::Run(args) => commands::run::handle(args, config).await?,
        Commands::List { dir, format } => commands::list::handle(dir, &format, config)?,
        Commands::Suite(args) => commands::suite::handle(args, config).await?,
    }

    Ok(())
}
