//! 测试用例定义抽象
//!
//! 执行引擎只依赖 [`CaseDefinition`] 能力接口，脚本如何加载、编译和求值
//! 由 [`DefinitionSource`] 的实现者 (脚本宿主) 负责。

use tce_common::{CaseInfo, StepResult};
use thiserror::Error;

/// 加载错误
///
/// 在运行开始之前检测到，不会创建运行器。
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("缺少必需的函数: {0}")]
    MissingCapability(String),

    #[error("用例信息无效: {0}")]
    InvalidInfo(String),

    #[error("脚本编译失败: {0}")]
    CompileFailed(String),

    #[error("脚本执行失败: {0}")]
    ScriptFailed(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 步骤调用错误
///
/// 由运行器在 tick 内部转换为步骤结果，从不传播到调度器。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// 声明的步骤没有对应的实现 (按 SKIPPED 处理)
    #[error("步骤 {0} 未实现")]
    Unimplemented(usize),

    /// 步骤体执行时抛出异常 (按 FAILED 处理)
    #[error("步骤执行异常: {0}")]
    Execution(String),
}

/// 测试用例定义
///
/// 每个实例拥有脚本声明的私有变量。每次运行都必须使用新实例，
/// 同一运行内的多次调用共享同一实例的状态。
pub trait CaseDefinition: Send {
    /// 获取用例信息
    ///
    /// 每个实例只调用一次，在第一次步骤调用之前。
    fn info(&mut self) -> Result<CaseInfo, LoadError>;

    /// 调用第 `number` 个步骤 (从 1 开始，与声明的步骤列表顺序一致)
    fn step(&mut self, number: usize) -> Result<StepResult, StepError>;

    /// 运行前钩子，在第一个步骤之前调用
    fn before(&mut self) -> Result<(), StepError> {
        Ok(())
    }

    /// 运行后钩子，运行结束 (包括取消) 时调用一次
    fn after(&mut self) -> Result<(), StepError> {
        Ok(())
    }
}

/// 用例定义来源
///
/// 每次调用 [`DefinitionSource::instantiate`] 都返回一个拥有全新私有状态的实例。
pub trait DefinitionSource: Send + Sync {
    /// 来源标签 (文件路径或名称，用于日志)
    fn label(&self) -> String;

    /// 创建新的用例定义实例
    fn instantiate(&self) -> Result<Box<dyn CaseDefinition>, LoadError>;
}

/// 基于闭包的用例定义来源
pub struct FnSource<F> {
    label: String,
    factory: F,
}

impl<F> FnSource<F>
where
    F: Fn() -> Box<dyn CaseDefinition> + Send + Sync,
{
    pub fn new(label: impl Into<String>, factory: F) -> Self {
        Self {
            label: label.into(),
            factory,
        }
    }
}

impl<F> DefinitionSource for FnSource<F>
where
    F: Fn() -> Box<dyn CaseDefinition> + Send + Sync,
{
    fn label(&self) -> String {
        self.label.clone()
    }

    fn instantiate(&self) -> Result<Box<dyn CaseDefinition>, LoadError> {
        Ok((self.factory)())
    }
}

/// 校验用例信息 (名称非空，至少声明一个步骤)
pub fn validate_info(info: &CaseInfo) -> Result<(), LoadError> {
    if info.name.trim().is_empty() {
        return Err(LoadError::InvalidInfo("用例名称不能为空".to_string()));
    }

    if info.steps.is_empty() {
        return Err(LoadError::InvalidInfo(format!(
            "用例 {} 没有声明任何步骤",
            info.name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Empty;

    impl CaseDefinition for Empty {
        fn info(&mut self) -> Result<CaseInfo, LoadError> {
            Ok(CaseInfo::new("empty").with_step("Step 1"))
        }

        fn step(&mut self, number: usize) -> Result<StepResult, StepError> {
            Err(StepError::Unimplemented(number))
        }
    }

    #[test]
    fn test_validate_info() {
        assert!(validate_info(&CaseInfo::new("ok").with_step("Step 1")).is_ok());

        let err = validate_info(&CaseInfo::new("  ").with_step("Step 1")).unwrap_err();
        assert!(matches!(err, LoadError::InvalidInfo(_)));

        let err = validate_info(&CaseInfo::new("no steps")).unwrap_err();
        assert!(err.to_string().contains("no steps"));
    }

    #[test]
    fn test_fn_source_creates_fresh_instances() {
        let source = FnSource::new("empty", || Box::new(Empty) as Box<dyn CaseDefinition>);
        assert_eq!(source.label(), "empty");

        let mut first = source.instantiate().unwrap();
        let mut second = source.instantiate().unwrap();
        assert_eq!(first.info().unwrap().name, "empty");
        assert_eq!(second.step(1), Err(StepError::Unimplemented(1)));
        assert!(first.before().is_ok());
        assert!(first.after().is_ok());
    }

    #[test]
    fn test_step_error_display() {
        assert_eq!(StepError::Unimplemented(3).to_string(), "步骤 3 未实现");
        assert!(StepError::Execution("boom".to_string())
            .to_string()
            .contains("boom"));
    }
}
