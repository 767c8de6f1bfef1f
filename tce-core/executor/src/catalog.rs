//! 用例目录与运行队列

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

use tce_common::CaseInfo;

use crate::definition::{validate_info, DefinitionSource, LoadError};
use crate::report::{quote, RunReport, NOT_RUN};
use crate::runner::RunOutcome;
use crate::scheduler::Scheduler;
use crate::{ExecutorError, Result};

/// 目录中的用例
pub struct CaseEntry {
    pub source: Arc<dyn DefinitionSource>,

    /// 添加时读取的用例信息
    pub info: Arc<CaseInfo>,

    pub last_outcome: Option<RunOutcome>,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_report: Option<RunReport>,
}

impl CaseEntry {
    pub fn label(&self) -> String {
        self.source.label()
    }

    /// 状态名称，从未运行时为 `NOT_RUN`
    pub fn status_label(&self) -> &'static str {
        self.last_outcome.map(|o| o.as_str()).unwrap_or(NOT_RUN)
    }
}

/// 用例目录
///
/// 队列中的用例按先进先出顺序逐个运行，每次运行都使用新的用例实例。
#[derive(Default)]
pub struct CaseCatalog {
    entries: Vec<CaseEntry>,
    queue: VecDeque<usize>,
}

impl CaseCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加用例，返回其索引
    ///
    /// 创建一个临时实例读取用例信息，该实例随后丢弃。
    pub fn add(&mut self, source: Arc<dyn DefinitionSource>) -> std::result::Result<usize, LoadError> {
        let mut probe = source.instantiate()?;
        let info = probe.info()?;
        validate_info(&info)?;

        info!("添加用例: {} ({})", info.name, source.label());

        self.entries.push(CaseEntry {
            source,
            info: Arc::new(info),
            last_outcome: None,
            last_updated: None,
            last_report: None,
        });

        Ok(self.entries.len() - 1)
    }

    pub fn entries(&self) -> &[CaseEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&CaseEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 将用例加入队列
    pub fn enqueue(&mut self, index: usize) -> Result<()> {
        if index >= self.entries.len() {
            return Err(ExecutorError::CaseNotFound(index));
        }
        self.queue.push_back(index);
        Ok(())
    }

    /// 将所有用例加入队列
    pub fn enqueue_all(&mut self) -> usize {
        self.enqueue_where(|_| true)
    }

    /// 将从未运行过的用例加入队列
    pub fn enqueue_not_run(&mut self) -> usize {
        self.enqueue_where(|entry| entry.last_outcome.is_none())
    }

    /// 将上次运行失败的用例加入队列
    pub fn enqueue_failed(&mut self) -> usize {
        self.enqueue_where(|entry| entry.last_outcome == Some(RunOutcome::Failed))
    }

    pub fn clear_enqueued(&mut self) {
        self.queue.clear();
    }

    pub fn enqueued_count(&self) -> usize {
        self.queue.len()
    }

    /// 逐个运行队列中的用例，返回 (索引, 结果) 列表
    pub async fn run_enqueued(
        &mut self,
        scheduler: &Scheduler,
    ) -> Vec<(usize, Result<RunReport>)> {
        let mut results = Vec::new();

        while let Some(index) = self.queue.pop_front() {
            let Some(entry) = self.entries.get_mut(index) else {
                continue;
            };

            info!(
                "运行队列中的用例: {} (剩余 {})",
                entry.info.name,
                self.queue.len()
            );

            let result = scheduler.run(entry.source.as_ref()).await;
            entry.last_updated = Some(Utc::now());

            match &result {
                Ok(report) => {
                    entry.last_outcome = report.outcome;
                    entry.last_report = Some(report.clone());
                }
                Err(e) => {
                    warn!("用例 {} 运行失败: {}", entry.info.name, e);
                    entry.last_outcome = Some(RunOutcome::Failed);
                    entry.last_report = None;
                }
            }

            results.push((index, result));
        }

        results
    }

    /// 汇总 CSV (列: "Test case", "Last updated", "Status")
    pub fn summary_csv(&self) -> String {
        let mut out = String::from("\"Test case\", \"Last updated\", \"Status\"\n");
        for entry in &self.entries {
            let updated = entry
                .last_updated
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "{}, {}, {}",
                quote(&entry.info.name),
                quote(&updated),
                quote(entry.status_label())
            );
        }
        out
    }

    fn enqueue_where(&mut self, filter: impl Fn(&CaseEntry) -> bool) -> usize {
        let before = self.queue.len();
        for (index, entry) in self.entries.iter().enumerate() {
            if filter(entry) {
                self.queue.push_back(index);
            }
        }
        self.queue.len() - before
    }
}
