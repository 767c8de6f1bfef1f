//! 公共工具函数模块
//!
//! 提供各命令模块共享的功能，包括用例文件收集、结果导出和报告展示。

use anyhow::{Context, Result};
use chrono::Utc;
use colored::{ColoredString, Colorize};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use tce_executor::{RunOutcome, RunReport, Status};
use tce_script::discover;

/// 结果文件导出位置
#[derive(Debug, Clone, PartialEq)]
pub enum ExportTarget {
    /// 写在用例脚本所在目录
    BesideCase,

    /// 写入指定目录下以用例名称命名的子目录
    Dir(PathBuf),
}

impl ExportTarget {
    /// 由命令行参数与配置确定导出位置，命令行优先
    pub fn resolve(flag: Option<Option<PathBuf>>, configured: Option<PathBuf>) -> Option<Self> {
        match flag {
            Some(Some(dir)) => Some(ExportTarget::Dir(dir)),
            Some(None) => Some(ExportTarget::BesideCase),
            None => configured.map(ExportTarget::Dir),
        }
    }
}

/// 收集用例文件: 目录按匹配模式递归发现，文件直接使用
pub fn collect_case_files(paths: &[PathBuf], pattern: &Regex) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_dir() {
            let found = discover(path, pattern)
                .with_context(|| format!("读取用例目录失败: {:?}", path))?;
            files.extend(found);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            anyhow::bail!("用例路径不存在: {:?}", path);
        }
    }

    Ok(files)
}

/// 导出单次运行结果为 CSV，返回写入的文件路径
pub fn export_result(report: &RunReport, case_file: &Path, target: &ExportTarget) -> Result<PathBuf> {
    let dir = match target {
        ExportTarget::BesideCase => case_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
        ExportTarget::Dir(dir) => dir.join(sanitize(&report.case_name)),
    };

    fs::create_dir_all(&dir).with_context(|| format!("创建导出目录失败: {:?}", dir))?;

    let path = dir.join(report.result_file_name(Utc::now()));
    fs::write(&path, report.to_csv()).with_context(|| format!("写入结果文件失败: {:?}", path))?;

    info!("结果已导出: {}", path.display());
    Ok(path)
}

/// 用例名称转为文件名 (非字母数字字符替换为下划线)
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// 创建加载提示 spinner
pub fn spinner(message: String) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}

pub fn colored_outcome(report: &RunReport) -> ColoredString {
    let label = report.outcome_label();
    match report.outcome {
        Some(RunOutcome::Passed) | Some(RunOutcome::Actioned) => label.green().bold(),
        Some(RunOutcome::Skipped) | Some(RunOutcome::Cancelled) => label.yellow().bold(),
        Some(RunOutcome::Failed) => label.red().bold(),
        None => label.bright_black(),
    }
}

fn status_icon(status: Option<Status>) -> ColoredString {
    match status {
        Some(Status::Passed) | Some(Status::Actioned) => "✓".green(),
        Some(Status::Failed) => "✗".red(),
        Some(Status::Skipped) => "⊘".yellow(),
        Some(Status::InProgress) => "…".cyan(),
        None => "·".bright_black(),
    }
}

/// 显示运行报告
pub fn print_report(report: &RunReport) {
    println!("\n{}", "=".repeat(60));
    println!("用例名称: {}", report.case_name.cyan().bold());
    println!("运行结果: {}", colored_outcome(report));
    println!(
        "执行时间: {} ms (tick {} 次)",
        report.duration_ms.to_string().yellow(),
        report.ticks
    );

    let (passed, failed, skipped, not_run) = report.counts();
    println!(
        "步骤统计: 成功 {} / 失败 {} / 跳过 {} / 未运行 {}",
        passed.to_string().green(),
        failed.to_string().red(),
        skipped.to_string().yellow(),
        not_run.to_string().bright_black()
    );
    println!();

    for step in &report.steps {
        println!(
            "{} 步骤 {}: {} [{}]",
            status_icon(step.status).bold(),
            step.number.to_string().bright_black(),
            step.description,
            step.status_label()
        );

        if !step.message.is_empty() {
            println!("   信息: {}", step.message.bright_black());
        }
        if step.attempts > 1 {
            println!("   调用: {} 次", step.attempts.to_string().bright_black());
        }
    }
}
