//! 用例运行器
//!
//! 驱动单个用例定义实例完成一次运行。每次 tick 最多调用一个步骤，
//! 何时再次 tick 由调度器决定。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use tce_common::{CaseInfo, Status, StepResult};

use crate::definition::{validate_info, CaseDefinition, LoadError, StepError};
use crate::report::{RunReport, StepRecord};

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// 尚未 tick
    NotStarted,

    /// 可以立即推进到下一步骤
    Running,

    /// 当前步骤返回 IN_PROGRESS，等待再次轮询
    Waiting,

    /// 运行结束 (完成或取消)
    Done,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::NotStarted => "NOT_STARTED",
            RunState::Running => "RUNNING",
            RunState::Waiting => "WAITING",
            RunState::Done => "DONE",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 运行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    Passed,
    Failed,
    Skipped,
    Actioned,
    Cancelled,
}

impl RunOutcome {
    /// 由终态步骤状态得到运行结果，IN_PROGRESS 没有对应结果
    pub fn from_status(status: Status) -> Option<Self> {
        match status {
            Status::Passed => Some(RunOutcome::Passed),
            Status::Failed => Some(RunOutcome::Failed),
            Status::Skipped => Some(RunOutcome::Skipped),
            Status::Actioned => Some(RunOutcome::Actioned),
            Status::InProgress => None,
        }
    }

    /// 成功结束 (PASSED / SKIPPED / ACTIONED)
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            RunOutcome::Passed | RunOutcome::Skipped | RunOutcome::Actioned
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Passed => "PASSED",
            RunOutcome::Failed => "FAILED",
            RunOutcome::Skipped => "SKIPPED",
            RunOutcome::Actioned => "ACTIONED",
            RunOutcome::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单次 tick 后的运行快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub run_state: RunState,

    /// 运行结束后才有值
    pub outcome: Option<RunOutcome>,

    /// 当前步骤编号 (从 1 开始，只增不减)
    pub current_step: usize,

    pub last_result: Option<StepResult>,
}

impl TickReport {
    pub fn last_message(&self) -> Option<&str> {
        self.last_result.as_ref().map(|r| r.message.as_str())
    }

    pub fn is_done(&self) -> bool {
        self.run_state == RunState::Done
    }
}

/// 用例运行器
pub struct CaseRunner {
    /// 用例定义实例，运行结束时释放
    definition: Option<Box<dyn CaseDefinition>>,

    /// 用例信息 (只读共享)
    info: Arc<CaseInfo>,

    current_step: usize,
    last_result: Option<StepResult>,
    run_state: RunState,
    outcome: Option<RunOutcome>,

    /// 步骤记录
    records: Vec<StepRecord>,

    ticks: u64,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
    duration_ms: u64,
}

impl CaseRunner {
    /// 创建运行器
    ///
    /// 在任何步骤之前调用一次 `info()` 并校验结果。
    pub fn new(mut definition: Box<dyn CaseDefinition>) -> Result<Self, LoadError> {
        let info = definition.info()?;
        validate_info(&info)?;

        debug!("用例 {} 声明了 {} 个步骤", info.name, info.step_count());

        let records = info
            .steps
            .iter()
            .enumerate()
            .map(|(i, description)| StepRecord::new(i + 1, description.clone()))
            .collect();

        Ok(Self {
            definition: Some(definition),
            info: Arc::new(info),
            current_step: 1,
            last_result: None,
            run_state: RunState::NotStarted,
            outcome: None,
            records,
            ticks: 0,
            started_at: None,
            finished_at: None,
            started: None,
            duration_ms: 0,
        })
    }

    /// 推进一次
    ///
    /// 运行结束后再次调用不产生任何效果，直接返回当前快照。
    pub fn tick(&mut self) -> TickReport {
        if self.run_state == RunState::Done {
            return self.snapshot();
        }

        self.ticks += 1;

        if self.run_state == RunState::NotStarted {
            self.started_at = Some(Utc::now());
            self.started = Some(Instant::now());
            self.run_state = RunState::Running;
            info!("开始运行用例: {}", self.info.name);

            if let Err(e) = self.call_hook(Hook::Before) {
                warn!("用例 {} 的 before 钩子失败: {}", self.info.name, e);
                self.last_result = Some(StepResult::failed(format!("before 钩子失败: {}", e)));
                self.finish(RunOutcome::Failed);
                return self.snapshot();
            }
        }

        if self.current_step > self.info.step_count() {
            self.finish(self.completion_outcome());
            return self.snapshot();
        }

        let number = self.current_step;
        debug!("调用用例 {} 的步骤 {}", self.info.name, number);

        let result = self.invoke_step(number);
        self.record(number, &result);

        match result.status {
            Status::InProgress => {
                debug!("步骤 {} 进行中: {}", number, result.message);
                self.last_result = Some(result);
                self.run_state = RunState::Waiting;
            }
            Status::Failed => {
                warn!("步骤 {} 失败: {}", number, result.message);
                self.last_result = Some(result);
                self.finish(RunOutcome::Failed);
            }
            status => {
                info!("步骤 {} 完成 [{}]: {}", number, status, result.message);
                self.last_result = Some(result);
                self.current_step += 1;

                if self.current_step > self.info.step_count() {
                    self.finish(self.completion_outcome());
                } else {
                    self.run_state = RunState::Running;
                }
            }
        }

        self.snapshot()
    }

    /// 取消运行
    ///
    /// 当前未完成的步骤标记为 SKIPPED，用例定义实例随即释放。
    pub fn cancel(&mut self) -> TickReport {
        if self.run_state == RunState::Done {
            return self.snapshot();
        }

        info!("取消运行用例: {}", self.info.name);

        if self.run_state != RunState::NotStarted {
            if let Some(record) = self.records.get_mut(self.current_step - 1) {
                if !record.status.map(|s| s.is_terminal()).unwrap_or(false) {
                    record.update(Status::Skipped, "运行已取消");
                }
            }
        }

        self.finish(RunOutcome::Cancelled);
        self.snapshot()
    }

    /// 当前运行快照
    pub fn snapshot(&self) -> TickReport {
        TickReport {
            run_state: self.run_state,
            outcome: self.outcome,
            current_step: self.current_step,
            last_result: self.last_result.clone(),
        }
    }

    /// 生成运行报告
    pub fn report(&self) -> RunReport {
        let duration_ms = match (self.run_state, self.started) {
            (RunState::Done, _) | (_, None) => self.duration_ms,
            (_, Some(started)) => started.elapsed().as_millis() as u64,
        };

        RunReport {
            case_name: self.info.name.clone(),
            outcome: self.outcome,
            run_state: self.run_state,
            ticks: self.ticks,
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration_ms,
            steps: self.records.clone(),
        }
    }

    pub fn info(&self) -> Arc<CaseInfo> {
        Arc::clone(&self.info)
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        self.outcome
    }

    pub fn is_done(&self) -> bool {
        self.run_state == RunState::Done
    }

    /// 调用步骤并将调用错误转换为步骤结果
    fn invoke_step(&mut self, number: usize) -> StepResult {
        let Some(definition) = self.definition.as_mut() else {
            return StepResult::failed("用例实例已释放");
        };

        match guarded(|| definition.step(number)) {
            Ok(result) => result,
            Err(StepError::Unimplemented(n)) => {
                debug!("步骤 {} 未实现，按 SKIPPED 处理", n);
                StepResult::skipped(StepError::Unimplemented(n).to_string())
            }
            Err(StepError::Execution(cause)) => StepResult::failed(cause),
        }
    }

    fn call_hook(&mut self, hook: Hook) -> Result<(), StepError> {
        match self.definition.as_mut() {
            Some(definition) => guarded(|| match hook {
                Hook::Before => definition.before(),
                Hook::After => definition.after(),
            }),
            None => Ok(()),
        }
    }

    fn record(&mut self, number: usize, result: &StepResult) {
        if let Some(record) = self.records.get_mut(number - 1) {
            record.attempts = record.attempts.saturating_add(1);
            record.update(result.status, result.message.clone());
        }
    }

    /// 正常完成时的结果: 最后一个步骤结果的状态，没有结果时为 PASSED
    fn completion_outcome(&self) -> RunOutcome {
        self.last_result
            .as_ref()
            .and_then(|r| RunOutcome::from_status(r.status))
            .unwrap_or(RunOutcome::Passed)
    }

    fn finish(&mut self, outcome: RunOutcome) {
        let mut outcome = outcome;

        // 未开始的运行没有调用过 before，也不调用 after
        if self.run_state != RunState::NotStarted {
            if let Err(e) = self.call_hook(Hook::After) {
                warn!("用例 {} 的 after 钩子失败: {}", self.info.name, e);
                if outcome != RunOutcome::Cancelled {
                    outcome = RunOutcome::Failed;
                    self.last_result = Some(StepResult::failed(format!("after 钩子失败: {}", e)));
                }
            }
        }

        self.definition = None;
        self.run_state = RunState::Done;
        self.outcome = Some(outcome);
        self.finished_at = Some(Utc::now());
        if let Some(started) = self.started {
            self.duration_ms = started.elapsed().as_millis() as u64;
        }

        info!(
            "用例 {} 运行结束: {} (tick {} 次, 耗时 {}ms)",
            self.info.name, outcome, self.ticks, self.duration_ms
        );
    }
}

#[derive(Debug, Clone, Copy)]
enum Hook {
    Before,
    After,
}

/// 调用用例定义，panic 按执行错误处理
fn guarded<T>(call: impl FnOnce() -> Result<T, StepError>) -> Result<T, StepError> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => Err(StepError::Execution(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 步骤 1 轮询 `polls` 次后完成，步骤 2 通过
    struct Polling {
        polls: u32,
        count: u32,
    }

    impl CaseDefinition for Polling {
        fn info(&mut self) -> Result<CaseInfo, LoadError> {
            Ok(CaseInfo::new("polling").with_step("Wait").with_step("Check"))
        }

        fn step(&mut self, number: usize) -> Result<StepResult, StepError> {
            match number {
                1 if self.count < self.polls => {
                    self.count += 1;
                    Ok(StepResult::in_progress(format!("Waiting [{}]", self.count)))
                }
                1 => Ok(StepResult::actioned("Done waiting")),
                2 => Ok(StepResult::passed("Checked")),
                n => Err(StepError::Unimplemented(n)),
            }
        }
    }

    struct Panicking;

    impl CaseDefinition for Panicking {
        fn info(&mut self) -> Result<CaseInfo, LoadError> {
            Ok(CaseInfo::new("panicking").with_step("Boom").with_step("Never"))
        }

        fn step(&mut self, number: usize) -> Result<StepResult, StepError> {
            if number == 1 {
                panic!("step body exploded");
            }
            Ok(StepResult::passed("unreachable"))
        }
    }

    #[test]
    fn test_polling_step_waits() {
        let mut runner = CaseRunner::new(Box::new(Polling { polls: 2, count: 0 })).unwrap();
        assert_eq!(runner.run_state(), RunState::NotStarted);

        let report = runner.tick();
        assert_eq!(report.run_state, RunState::Waiting);
        assert_eq!(report.current_step, 1);
        assert_eq!(report.last_message(), Some("Waiting [1]"));

        runner.tick();
        let report = runner.tick();
        assert_eq!(report.run_state, RunState::Running);
        assert_eq!(report.current_step, 2);

        let report = runner.tick();
        assert!(report.is_done());
        assert_eq!(report.outcome, Some(RunOutcome::Passed));
        assert_eq!(runner.tick_count(), 4);
        assert_eq!(runner.records()[0].attempts, 3);
    }

    #[test]
    fn test_done_tick_is_idempotent() {
        let mut runner = CaseRunner::new(Box::new(Polling { polls: 0, count: 0 })).unwrap();
        runner.tick();
        let done = runner.tick();
        assert!(done.is_done());

        assert_eq!(runner.tick(), done);
        assert_eq!(runner.tick_count(), 2);
    }

    #[test]
    fn test_panic_is_failed() {
        let mut runner = CaseRunner::new(Box::new(Panicking)).unwrap();
        let report = runner.tick();

        assert_eq!(report.outcome, Some(RunOutcome::Failed));
        assert!(report.last_message().unwrap().contains("step body exploded"));
        assert_eq!(runner.records()[1].status, None);
    }

    #[test]
    fn test_cancel_marks_current_step_skipped() {
        let mut runner = CaseRunner::new(Box::new(Polling { polls: 5, count: 0 })).unwrap();
        runner.tick();

        let report = runner.cancel();
        assert_eq!(report.outcome, Some(RunOutcome::Cancelled));
        assert_eq!(runner.records()[0].status, Some(Status::Skipped));
        assert_eq!(runner.records()[1].status, None);

        // 取消后 tick 不再调用步骤
        assert_eq!(runner.tick().outcome, Some(RunOutcome::Cancelled));
        assert_eq!(runner.tick_count(), 1);
    }

    #[test]
    fn test_cancel_before_start() {
        let mut runner = CaseRunner::new(Box::new(Polling { polls: 0, count: 0 })).unwrap();
        let report = runner.cancel();

        assert!(report.is_done());
        assert_eq!(report.current_step, 1);
        assert!(runner.records().iter().all(|r| r.status.is_none()));
        assert!(runner.report().started_at.is_none());
    }

    #[test]
    fn test_attempts_saturate() {
        let mut runner = CaseRunner::new(Box::new(Polling { polls: 5, count: 0 })).unwrap();
        runner.records[0].attempts = u64::MAX;

        let report = runner.tick();
        assert_eq!(report.run_state, RunState::Waiting);
        assert_eq!(runner.records()[0].attempts, u64::MAX);
    }

    #[test]
    fn test_outcome_from_status() {
        assert_eq!(RunOutcome::from_status(Status::Skipped), Some(RunOutcome::Skipped));
        assert_eq!(RunOutcome::from_status(Status::InProgress), None);
        assert!(RunOutcome::Actioned.is_success());
        assert!(!RunOutcome::Cancelled.is_success());
        assert!(!RunOutcome::Failed.is_success());
    }
}
