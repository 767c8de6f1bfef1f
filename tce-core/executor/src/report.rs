//! 运行报告

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use tce_common::Status;

use crate::runner::{RunOutcome, RunState};

/// 未运行步骤在导出时的状态名称
pub const NOT_RUN: &str = "NOT_RUN";

/// 步骤记录 (每个声明的步骤一条)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// 步骤编号 (从 1 开始)
    pub number: usize,

    /// 步骤描述
    pub description: String,

    /// 最近一次结果的状态，None 表示尚未运行
    pub status: Option<Status>,

    /// 最近一次结果的消息
    pub message: String,

    /// 调用次数 (IN_PROGRESS 会累加)
    pub attempts: u64,

    /// 最近更新时间
    pub last_updated: Option<DateTime<Utc>>,
}

impl StepRecord {
    pub fn new(number: usize, description: impl Into<String>) -> Self {
        Self {
            number,
            description: description.into(),
            status: None,
            message: String::new(),
            attempts: 0,
            last_updated: None,
        }
    }

    /// 状态名称，未运行时为 `NOT_RUN`
    pub fn status_label(&self) -> &'static str {
        self.status.map(|s| s.as_str()).unwrap_or(NOT_RUN)
    }

    pub(crate) fn update(&mut self, status: Status, message: impl Into<String>) {
        self.status = Some(status);
        self.message = message.into();
        self.last_updated = Some(Utc::now());
    }
}

/// 运行报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// 用例名称
    pub case_name: String,

    /// 运行结果，运行结束前为 None
    pub outcome: Option<RunOutcome>,

    /// 运行状态
    pub run_state: RunState,

    /// tick 次数
    pub ticks: u64,

    /// 开始时间 (第一次 tick)
    pub started_at: Option<DateTime<Utc>>,

    /// 结束时间
    pub finished_at: Option<DateTime<Utc>>,

    /// 总耗时（毫秒）
    pub duration_ms: u64,

    /// 步骤记录列表
    pub steps: Vec<StepRecord>,
}

impl RunReport {
    /// 运行是否成功结束
    pub fn is_success(&self) -> bool {
        self.outcome.map(|o| o.is_success()).unwrap_or(false)
    }

    /// 结果名称，运行中为当前运行状态
    pub fn outcome_label(&self) -> &'static str {
        match self.outcome {
            Some(outcome) => outcome.as_str(),
            None => self.run_state.as_str(),
        }
    }

    /// 各状态的步骤数 (passed, failed, skipped, not_run)
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        let mut counts = (0, 0, 0, 0);
        for step in &self.steps {
            match step.status {
                Some(Status::Passed) | Some(Status::Actioned) => counts.0 += 1,
                Some(Status::Failed) => counts.1 += 1,
                Some(Status::Skipped) => counts.2 += 1,
                Some(Status::InProgress) | None => counts.3 += 1,
            }
        }
        counts
    }

    /// 导出为 JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// 导出为 YAML
    pub fn to_yaml(&self) -> serde_yaml::Result<String> {
        serde_yaml::to_string(self)
    }

    /// 导出为 CSV (列: Step, "Description", Status, "Info")
    pub fn to_csv(&self) -> String {
        let mut out = String::from("Step, \"Description\", Status, \"Info\"\n");
        for step in &self.steps {
            let _ = writeln!(
                out,
                "{}, {}, {}, {}",
                step.number,
                quote(&step.description),
                step.status_label(),
                quote(&step.message)
            );
        }
        out
    }

    /// 结果文件名: `result_<yyyyMMdd_HHmmss>_<OUTCOME>.csv`
    pub fn result_file_name(&self, at: DateTime<Utc>) -> String {
        format!(
            "result_{}_{}.csv",
            at.format("%Y%m%d_%H%M%S"),
            self.outcome_label()
        )
    }
}

/// CSV 字段加引号，内部引号加倍
pub(crate) fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}
