//! 运行命令
//!
//! 加载用例脚本后通过调度器并发运行，运行过程中按事件刷新进度条。

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, info, warn};

use tce_executor::{
    DefinitionSource, EngineConfig, RunEvent, RunId, RunReport, Scheduler, Status,
};
use tce_script::ScriptSource;

use super::common::{self, ExportTarget};
use super::output;
use crate::RunArgs;

/// 运行进度展示
struct Progress {
    multi: MultiProgress,
    style: ProgressStyle,
    bars: HashMap<RunId, ProgressBar>,
}

impl Progress {
    fn new() -> Result<Self> {
        let style = ProgressStyle::default_bar()
            .template("{prefix:.cyan.bold} [{bar:30.green/white}] {pos}/{len} {msg}")?
            .progress_chars("=>-");

        Ok(Self {
            multi: MultiProgress::new(),
            style,
            bars: HashMap::new(),
        })
    }

    fn on_event(&mut self, event: RunEvent) {
        match event {
            RunEvent::Started { id, case_name, steps } => {
                let bar = self.multi.add(ProgressBar::new(steps as u64));
                bar.set_style(self.style.clone());
                bar.set_prefix(case_name);
                self.bars.insert(id, bar);
            }
            RunEvent::StepUpdated { id, step, result, .. } => {
                if let Some(bar) = self.bars.get(&id) {
                    if result.status != Status::InProgress {
                        bar.set_position(step as u64);
                    }
                    bar.set_message(format!("[{}] {}", result.status, result.message));
                }
            }
            RunEvent::Finished { id, outcome } => {
                if let Some(bar) = self.bars.remove(&id) {
                    bar.finish_with_message(outcome.to_string());
                }
            }
        }
    }
}

pub async fn handle(args: RunArgs, mut config: EngineConfig) -> Result<()> {
    if let Some(ms) = args.poll_interval_ms {
        config.scheduler.poll_interval_ms = ms;
    }
    let format = args
        .format
        .clone()
        .unwrap_or_else(|| config.report.format.clone());

    let pattern = config.cases.pattern_regex()?;
    let files = common::collect_case_files(&args.paths, &pattern)?;
    if files.is_empty() {
        anyhow::bail!("没有找到匹配 {} 的用例脚本", config.cases.pattern);
    }

    // 加载失败的脚本单独报告，不参与运行
    let mut load_failures = 0;
    let mut loaded: Vec<(PathBuf, Arc<dyn DefinitionSource>)> = Vec::new();
    for file in files {
        match ScriptSource::from_file(&file) {
            Ok(source) => loaded.push((file, Arc::new(source))),
            Err(e) => {
                load_failures += 1;
                eprintln!("{} {}: {}", "加载失败".red().bold(), file.display(), e);
            }
        }
    }

    let (paths, sources): (Vec<_>, Vec<_>) = loaded.into_iter().unzip();
    info!("运行 {} 个用例", sources.len());

    let scheduler = Arc::new(Scheduler::new(config.scheduler.clone()));
    let mut events = scheduler.subscribe();

    // 表格模式下显示进度条，其余格式保持标准输出干净
    let mut progress = if format == "table" {
        Some(Progress::new()?)
    } else {
        None
    };

    let run = scheduler.run_all(sources);
    tokio::pin!(run);

    let results = loop {
        tokio::select! {
            results = &mut run => break results,
            Ok(event) = events.recv() => {
                if let Some(progress) = progress.as_mut() {
                    progress.on_event(event);
                }
            }
        }
    };

    loop {
        match events.try_recv() {
            Ok(event) => {
                if let Some(progress) = progress.as_mut() {
                    progress.on_event(event);
                }
            }
            Err(TryRecvError::Lagged(skipped)) => debug!("进度事件落后，跳过 {} 个", skipped),
            Err(_) => break,
        }
    }
    scheduler.shutdown().await;

    let mut failures = load_failures;
    let mut reports: Vec<(PathBuf, RunReport)> = Vec::new();
    for (path, result) in paths.into_iter().zip(results) {
        match result {
            Ok(report) => {
                if !report.is_success() {
                    failures += 1;
                }
                reports.push((path, report));
            }
            Err(e) => {
                failures += 1;
                eprintln!("{} {}: {}", "运行失败".red().bold(), path.display(), e);
            }
        }
    }

    print_reports(&reports, &format)?;

    if let Some(target) = ExportTarget::resolve(args.export, config.report.export_dir.clone()) {
        for (path, report) in &reports {
            let file = common::export_result(report, path, &target)
                .with_context(|| format!("导出结果失败: {}", report.case_name))?;
            if format == "table" {
                println!("{} {}", "已导出".green(), file.display());
            }
        }
    }

    if failures > 0 {
        warn!("{} 个用例未通过", failures);
        anyhow::bail!("{} 个用例未通过", failures);
    }

    Ok(())
}

fn print_reports(reports: &[(PathBuf, RunReport)], format: &str) -> Result<()> {
    let only_reports: Vec<&RunReport> = reports.iter().map(|(_, r)| r).collect();

    match format {
        "json" => output::print_json(&only_reports)?,
        "yaml" => output::print_yaml(&only_reports)?,
        "csv" => {
            for report in only_reports {
                println!("# {}", report.case_name);
                print!("{}", report.to_csv());
            }
        }
        _ => {
            for report in only_reports {
                common::print_report(report);
            }
            println!();
        }
    }

    Ok(())
}
