//! 脚本用例来源与实例

use rhai::{Array, CallFnOptions, Dynamic, Engine, EvalAltResult, Map, Scope, AST};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use tce_common::{CaseInfo, Status, StepResult};
use tce_executor::{CaseDefinition, DefinitionSource, LoadError, StepError};

use crate::engine::build_engine;

const INFO_FN: &str = "get_info";
const INIT_FN: &str = "init";
const BEFORE_FN: &str = "before";
const AFTER_FN: &str = "after";

/// 编译后的脚本 (所有实例共享)
struct ScriptProgram {
    label: String,
    engine: Engine,
    ast: AST,

    /// 已实现的步骤编号
    steps: BTreeSet<usize>,

    has_init: bool,
    has_before: bool,
    has_after: bool,
}

impl ScriptProgram {
    /// 以 `state` 作为 `this` 调用无参函数
    fn call(&self, state: &mut Dynamic, name: &str) -> Result<Dynamic, Box<EvalAltResult>> {
        let mut scope = Scope::new();
        let options = CallFnOptions::new()
            .eval_ast(false)
            .rewind_scope(true)
            .bind_this_ptr(state);

        self.engine
            .call_fn_with_options::<Dynamic>(options, &mut scope, &self.ast, name, ())
    }
}

/// 脚本用例来源
///
/// 脚本只编译一次，每次实例化都得到拥有全新私有状态的 [`ScriptCase`]。
#[derive(Clone)]
pub struct ScriptSource {
    program: Arc<ScriptProgram>,
}

impl ScriptSource {
    /// 编译脚本并检查函数约定
    pub fn compile(label: impl Into<String>, script: &str) -> Result<Self, LoadError> {
        let label = label.into();
        let engine = build_engine(&label);

        let ast = engine
            .compile(script)
            .map_err(|e| LoadError::CompileFailed(format!("{}: {}", label, e)))?;

        let mut has_info = false;
        let mut has_init = false;
        let mut has_before = false;
        let mut has_after = false;
        let mut steps = BTreeSet::new();

        for function in ast.iter_functions() {
            if !function.params.is_empty() {
                continue;
            }

            match function.name {
                INFO_FN => has_info = true,
                INIT_FN => has_init = true,
                BEFORE_FN => has_before = true,
                AFTER_FN => has_after = true,
                name => {
                    if let Some(number) = step_number(name) {
                        steps.insert(number);
                    }
                }
            }
        }

        if !has_info {
            return Err(LoadError::MissingCapability(format!("{}: {}()", label, INFO_FN)));
        }

        debug!("脚本 {} 实现了步骤 {:?}", label, steps);

        Ok(Self {
            program: Arc::new(ScriptProgram {
                label,
                engine,
                ast,
                steps,
                has_init,
                has_before,
                has_after,
            }),
        })
    }

    /// 从文件加载脚本
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        info!("加载用例脚本: {}", path.display());
        let script = fs::read_to_string(path)?;
        Self::compile(path.display().to_string(), &script)
    }

    /// 已实现的步骤编号 (升序)
    pub fn implemented_steps(&self) -> Vec<usize> {
        self.program.steps.iter().copied().collect()
    }

    /// 创建脚本实例
    pub fn instance(&self) -> Result<ScriptCase, LoadError> {
        ScriptCase::new(Arc::clone(&self.program))
    }
}

impl DefinitionSource for ScriptSource {
    fn label(&self) -> String {
        self.program.label.clone()
    }

    fn instantiate(&self) -> Result<Box<dyn CaseDefinition>, LoadError> {
        Ok(Box::new(self.instance()?))
    }
}

/// 脚本用例实例
pub struct ScriptCase {
    program: Arc<ScriptProgram>,

    /// 实例私有状态 (脚本中的 `this`)
    state: Dynamic,
}

impl ScriptCase {
    fn new(program: Arc<ScriptProgram>) -> Result<Self, LoadError> {
        let state = if program.has_init {
            let mut unbound = Dynamic::UNIT;
            let value = program
                .call(&mut unbound, INIT_FN)
                .map_err(|e| LoadError::ScriptFailed(format!("{}: {}", program.label, e)))?;

            if value.is_map() {
                value
            } else if value.is_unit() {
                Dynamic::from_map(Map::new())
            } else {
                return Err(LoadError::ScriptFailed(format!(
                    "{}: init() 必须返回对象映射，实际为 {}",
                    program.label,
                    value.type_name()
                )));
            }
        } else {
            Dynamic::from_map(Map::new())
        };

        Ok(Self { program, state })
    }

    /// 当前私有状态 (用于诊断)
    pub fn state(&self) -> &Dynamic {
        &self.state
    }

    fn call_hook(&mut self, name: &str) -> Result<(), StepError> {
        let value = self
            .program
            .call(&mut self.state, name)
            .map_err(|e| StepError::Execution(e.to_string()))?;

        match value.as_bool() {
            Ok(false) => Err(StepError::Execution(format!("{}() 返回 false", name))),
            _ => Ok(()),
        }
    }
}

impl CaseDefinition for ScriptCase {
    fn info(&mut self) -> Result<CaseInfo, LoadError> {
        let value = self
            .program
            .call(&mut self.state, INFO_FN)
            .map_err(|e| LoadError::ScriptFailed(format!("{}: {}", self.program.label, e)))?;

        to_case_info(value)
    }

    fn step(&mut self, number: usize) -> Result<StepResult, StepError> {
        if !self.program.steps.contains(&number) {
            return Err(StepError::Unimplemented(number));
        }

        let value = self
            .program
            .call(&mut self.state, &format!("step{}", number))
            .map_err(|e| StepError::Execution(e.to_string()))?;

        to_step_result(number, value)
    }

    fn before(&mut self) -> Result<(), StepError> {
        if self.program.has_before {
            self.call_hook(BEFORE_FN)
        } else {
            Ok(())
        }
    }

    fn after(&mut self) -> Result<(), StepError> {
        if self.program.has_after {
            self.call_hook(AFTER_FN)
        } else {
            Ok(())
        }
    }
}

/// 解析 `stepN` 函数名中的步骤编号
fn step_number(name: &str) -> Option<usize> {
    let digits = name.strip_prefix("step")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|n| *n >= 1)
}

fn to_case_info(value: Dynamic) -> Result<CaseInfo, LoadError> {
    let type_name = value.type_name();
    let map = value.try_cast::<Map>().ok_or_else(|| {
        LoadError::InvalidInfo(format!("get_info() 必须返回对象映射，实际为 {}", type_name))
    })?;

    let name = map
        .get("name")
        .and_then(|v| v.clone().into_string().ok())
        .ok_or_else(|| LoadError::InvalidInfo("缺少字符串字段 name".to_string()))?;

    let steps = map
        .get("steps")
        .and_then(|v| v.clone().try_cast::<Array>())
        .ok_or_else(|| LoadError::InvalidInfo("缺少数组字段 steps".to_string()))?;

    let mut info = CaseInfo::new(name);
    for step in steps {
        let description = step
            .into_string()
            .map_err(|t| LoadError::InvalidInfo(format!("步骤描述必须是字符串，实际为 {}", t)))?;
        info = info.with_step(description);
    }

    Ok(info)
}

fn to_step_result(number: usize, value: Dynamic) -> Result<StepResult, StepError> {
    let type_name = value.type_name();

    if value.is::<StepResult>() {
        if let Some(result) = value.try_cast::<StepResult>() {
            return Ok(result);
        }
    } else if let Some(map) = value.try_cast::<Map>() {
        let status = map
            .get("status")
            .and_then(|v| v.clone().into_string().ok())
            .ok_or_else(|| {
                StepError::Execution(format!("步骤 {} 的结果缺少字符串字段 status", number))
            })?
            .parse::<Status>()
            .map_err(StepError::Execution)?;

        let message = map
            .get("message")
            .and_then(|v| v.clone().into_string().ok())
            .unwrap_or_default();

        return Ok(StepResult::new(status, message));
    }

    Err(StepError::Execution(format!(
        "步骤 {} 返回了无效的结果类型: {}",
        number, type_name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_number() {
        assert_eq!(step_number("step1"), Some(1));
        assert_eq!(step_number("step12"), Some(12));
        assert_eq!(step_number("step0"), None);
        assert_eq!(step_number("step"), None);
        assert_eq!(step_number("step_1"), None);
        assert_eq!(step_number("stepper"), None);
    }

    #[test]
    fn test_state_is_private_per_instance() {
        let source = ScriptSource::compile(
            "counter",
            r#"
            fn init() { #{ count: 0 } }
            fn get_info() { #{ name: "counter", steps: ["Count"] } }
            fn step1() {
                this.count += 1;
                in_progress(`count ${this.count}`)
            }
            "#,
        )
        .unwrap();

        let mut first = source.instance().unwrap();
        let mut second = source.instance().unwrap();

        assert_eq!(first.step(1).unwrap().message, "count 1");
        assert_eq!(first.step(1).unwrap().message, "count 2");
        assert_eq!(second.step(1).unwrap().message, "count 1");
    }

    #[test]
    fn test_map_result() {
        let source = ScriptSource::compile(
            "map",
            r#"
            fn get_info() { #{ name: "map", steps: ["One", "Two"] } }
            fn step1() { #{ status: "actioned", message: "sent" } }
            fn step2() { 42 }
            "#,
        )
        .unwrap();

        let mut case = source.instance().unwrap();
        assert_eq!(case.step(1).unwrap(), StepResult::actioned("sent"));
        assert!(matches!(case.step(2), Err(StepError::Execution(_))));
        assert_eq!(case.step(3), Err(StepError::Unimplemented(3)));
    }

    #[test]
    fn test_invalid_info() {
        let source = ScriptSource::compile(
            "bad info",
            r#"fn get_info() { "Sample test case" }"#,
        )
        .unwrap();

        let mut case = source.instance().unwrap();
        assert!(matches!(case.info(), Err(LoadError::InvalidInfo(_))));
    }

    #[test]
    fn test_hooks() {
        let source = ScriptSource::compile(
            "hooks",
            r#"
            fn get_info() { #{ name: "hooks", steps: ["One"] } }
            fn before() { false }
            fn after() { this.closed = true; }
            "#,
        )
        .unwrap();

        let mut case = source.instance().unwrap();
        assert!(matches!(case.before(), Err(StepError::Execution(_))));
        assert!(case.after().is_ok());
    }
}
