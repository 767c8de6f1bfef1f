//! 集成测试共用的用例定义

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tce_executor::{CaseDefinition, CaseInfo, DefinitionSource, FnSource, LoadError, StepError, StepResult};

/// 示例用例 1: 步骤 2 轮询三次后完成，步骤 3 跳过，步骤 4 失败
pub struct SampleCase {
    count: u32,
}

impl SampleCase {
    pub fn new() -> Self {
        Self { count: 0 }
    }
}

impl CaseDefinition for SampleCase {
    fn info(&mut self) -> Result<CaseInfo, LoadError> {
        Ok(CaseInfo::new("Sample test case 1")
            .with_step("Step 1")
            .with_step("Step 2")
            .with_step("Step 3")
            .with_step("Step 4"))
    }

    fn step(&mut self, number: usize) -> Result<StepResult, StepError> {
        match number {
            1 => {
                self.count = 1;
                Ok(StepResult::passed(format!("All fine in step 1 [{}]", self.count)))
            }
            2 => {
                self.count += 1;
                if self.count < 5 {
                    Ok(StepResult::in_progress(format!("Still waiting... [{}]", self.count)))
                } else {
                    Ok(StepResult::actioned(format!("All fine in step 2 [{}]", self.count)))
                }
            }
            3 => {
                self.count += 1;
                Ok(StepResult::skipped(format!("Step 3 skipped [{}]", self.count)))
            }
            4 => {
                self.count += 1;
                Ok(StepResult::failed(format!("Step 4 failed [{}]", self.count)))
            }
            n => Err(StepError::Unimplemented(n)),
        }
    }
}

/// 按顺序返回固定结果，每个步骤只调用一次即完成
pub struct FixedCase {
    name: String,
    results: Vec<StepResult>,
    implemented: usize,
    calls: Arc<AtomicUsize>,
}

impl FixedCase {
    pub fn new(name: &str, results: Vec<StepResult>) -> Self {
        let implemented = results.len();
        Self {
            name: name.to_string(),
            results,
            implemented,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 声明 `declared` 个步骤，但只实现 `results` 中的步骤
    pub fn partial(name: &str, declared: usize, results: Vec<StepResult>) -> Self {
        let implemented = results.len();
        let mut case = Self::new(name, results);
        case.results
            .resize(declared.max(implemented), StepResult::passed(""));
        case.implemented = implemented;
        case
    }

    pub fn with_counter(mut self, calls: Arc<AtomicUsize>) -> Self {
        self.calls = calls;
        self
    }
}

impl CaseDefinition for FixedCase {
    fn info(&mut self) -> Result<CaseInfo, LoadError> {
        let mut info = CaseInfo::new(self.name.clone());
        for i in 1..=self.results.len() {
            info = info.with_step(format!("Step {}", i));
        }
        Ok(info)
    }

    fn step(&mut self, number: usize) -> Result<StepResult, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if number > self.implemented {
            return Err(StepError::Unimplemented(number));
        }
        Ok(self.results[number - 1].clone())
    }
}

/// 永远返回 IN_PROGRESS 的用例
pub struct EndlessCase;

impl CaseDefinition for EndlessCase {
    fn info(&mut self) -> Result<CaseInfo, LoadError> {
        Ok(CaseInfo::new("Endless").with_step("Wait forever").with_step("Never"))
    }

    fn step(&mut self, _number: usize) -> Result<StepResult, StepError> {
        Ok(StepResult::in_progress("Still waiting..."))
    }
}

/// 检测重入的用例: 步骤执行期间再次进入时计入 `overlaps`
pub struct ReentryCase {
    pub busy: Arc<AtomicBool>,
    pub overlaps: Arc<AtomicUsize>,
}

impl CaseDefinition for ReentryCase {
    fn info(&mut self) -> Result<CaseInfo, LoadError> {
        Ok(CaseInfo::new("Reentry").with_step("Poll").with_step("Never"))
    }

    fn step(&mut self, _number: usize) -> Result<StepResult, StepError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        std::thread::sleep(Duration::from_millis(2));
        self.busy.store(false, Ordering::SeqCst);
        Ok(StepResult::in_progress("Polling"))
    }
}

/// before 钩子失败的用例
pub struct RefusingCase;

impl CaseDefinition for RefusingCase {
    fn info(&mut self) -> Result<CaseInfo, LoadError> {
        Ok(CaseInfo::new("Refusing").with_step("Step 1"))
    }

    fn step(&mut self, _number: usize) -> Result<StepResult, StepError> {
        Ok(StepResult::passed("unreachable"))
    }

    fn before(&mut self) -> Result<(), StepError> {
        Err(StepError::Execution("environment not ready".to_string()))
    }
}

/// 缺少用例信息的定义
pub struct BrokenCase;

impl CaseDefinition for BrokenCase {
    fn info(&mut self) -> Result<CaseInfo, LoadError> {
        Err(LoadError::MissingCapability("get_info".to_string()))
    }

    fn step(&mut self, number: usize) -> Result<StepResult, StepError> {
        Err(StepError::Unimplemented(number))
    }
}

pub fn sample_source() -> Arc<dyn DefinitionSource> {
    Arc::new(FnSource::new("sample", || {
        Box::new(SampleCase::new()) as Box<dyn CaseDefinition>
    }))
}

pub fn fixed_source(name: &'static str, results: Vec<StepResult>) -> Arc<dyn DefinitionSource> {
    Arc::new(FnSource::new(name, move || {
        Box::new(FixedCase::new(name, results.clone())) as Box<dyn CaseDefinition>
    }))
}

pub fn endless_source() -> Arc<dyn DefinitionSource> {
    Arc::new(FnSource::new("endless", || {
        Box::new(EndlessCase) as Box<dyn CaseDefinition>
    }))
}

pub fn broken_source() -> Arc<dyn DefinitionSource> {
    Arc::new(FnSource::new("broken", || {
        Box::new(BrokenCase) as Box<dyn CaseDefinition>
    }))
}

pub fn reentry_source(busy: Arc<AtomicBool>, overlaps: Arc<AtomicUsize>) -> Arc<dyn DefinitionSource> {
    Arc::new(FnSource::new("reentry", move || {
        Box::new(ReentryCase {
            busy: Arc::clone(&busy),
            overlaps: Arc::clone(&overlaps),
        }) as Box<dyn CaseDefinition>
    }))
}

pub fn refusing_source() -> Arc<dyn DefinitionSource> {
    Arc::new(FnSource::new("refusing", || {
        Box::new(RefusingCase) as Box<dyn CaseDefinition>
    }))
}
