//! TCE 执行器
//!
//! 测试用例执行引擎：用例定义抽象、步骤状态机、调度器以及运行报告。

pub mod catalog;
pub mod config;
pub mod definition;
pub mod report;
pub mod runner;
pub mod scheduler;

pub use catalog::{CaseCatalog, CaseEntry};
pub use config::{CasesConfig, EngineConfig, ReportConfig, SchedulerConfig};
pub use definition::{
    validate_info, CaseDefinition, DefinitionSource, FnSource, LoadError, StepError,
};
pub use report::{RunReport, StepRecord};
pub use runner::{CaseRunner, RunOutcome, RunState, TickReport};
pub use scheduler::{RunEvent, RunHandle, RunId, Scheduler};

pub use tce_common::{CaseInfo, Status, StepResult};

use thiserror::Error;

/// 执行器错误类型
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("测试用例加载失败: {0}")]
    LoadFailed(#[from] LoadError),

    #[error("运行不存在: {0}")]
    RunNotFound(RunId),

    #[error("用例不存在: #{0}")]
    CaseNotFound(usize),

    #[error("运行已关闭: {0}")]
    RunClosed(RunId),

    #[error("运行任务异常: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
