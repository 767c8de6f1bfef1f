//! 套件命令
//!
//! 将目录中的用例加入目录队列逐个运行，可选择重跑失败用例并写出汇总 CSV。

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use tce_executor::{CaseCatalog, EngineConfig, RunReport, Scheduler};
use tce_script::load_dir;

use super::common::{self, ExportTarget};
use super::output::{output_formatted, TableRow};
use crate::SuiteArgs;

/// 套件结果行
#[derive(Debug, Serialize)]
pub struct SuiteRow {
    pub name: String,
    pub status: String,
    pub last_updated: String,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl TableRow for SuiteRow {
    fn headers() -> Vec<&'static str> {
        vec!["用例", "状态", "更新时间", "成功/失败/跳过"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.status.clone(),
            self.last_updated.clone(),
            format!("{}/{}/{}", self.passed, self.failed, self.skipped),
        ]
    }
}

pub async fn handle(args: SuiteArgs, config: EngineConfig) -> Result<()> {
    let dir = args.dir.clone().unwrap_or_else(|| config.cases.directory.clone());
    let pattern = config.cases.pattern_regex()?;

    let spinner = common::spinner(format!("加载用例目录 {}", dir.display()))?;
    let loaded = load_dir(&dir, &pattern).with_context(|| format!("读取用例目录失败: {:?}", dir))?;

    let mut catalog = CaseCatalog::new();
    let mut case_files: Vec<PathBuf> = Vec::new();
    let mut load_failures = 0;

    for (path, source) in loaded {
        let added = source.and_then(|source| catalog.add(Arc::new(source)));
        match added {
            Ok(_) => case_files.push(path),
            Err(e) => {
                load_failures += 1;
                spinner.println(format!("{} {}: {}", "加载失败".red().bold(), path.display(), e));
            }
        }
    }
    spinner.finish_and_clear();

    if catalog.is_empty() {
        anyhow::bail!("目录 {} 中没有可运行的用例", dir.display());
    }

    let scheduler = Scheduler::new(config.scheduler.clone());

    let queued = catalog.enqueue_all();
    let spinner = common::spinner(format!("运行 {} 个用例", queued))?;
    catalog.run_enqueued(&scheduler).await;
    spinner.finish_and_clear();

    if args.retry_failed {
        let retried = catalog.enqueue_failed();
        if retried > 0 {
            info!("重新运行 {} 个失败用例", retried);
            let spinner = common::spinner(format!("重新运行 {} 个失败用例", retried))?;
            catalog.run_enqueued(&scheduler).await;
            spinner.finish_and_clear();
        }
    }
    scheduler.shutdown().await;

    let rows: Vec<SuiteRow> = catalog
        .entries()
        .iter()
        .map(|entry| {
            let (passed, failed, skipped, _) = entry
                .last_report
                .as_ref()
                .map(RunReport::counts)
                .unwrap_or_default();
            SuiteRow {
                name: entry.info.name.clone(),
                status: entry.status_label().to_string(),
                last_updated: entry
                    .last_updated
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default(),
                passed,
                failed,
                skipped,
            }
        })
        .collect();
    output_formatted(&rows, &args.format)?;

    if let Some(path) = &args.summary {
        fs::write(path, catalog.summary_csv())
            .with_context(|| format!("写入汇总文件失败: {:?}", path))?;
        info!("汇总已写入: {}", path.display());
    }

    if let Some(target) = ExportTarget::resolve(args.export, config.report.export_dir.clone()) {
        for (file, entry) in case_files.iter().zip(catalog.entries()) {
            if let Some(report) = &entry.last_report {
                common::export_result(report, file, &target)?;
            }
        }
    }

    let failures = load_failures
        + catalog
            .entries()
            .iter()
            .filter(|entry| !entry.last_outcome.is_some_and(|o| o.is_success()))
            .count();

    if failures > 0 {
        warn!("{} 个用例未通过", failures);
        anyhow::bail!("{} 个用例未通过", failures);
    }

    Ok(())
}
