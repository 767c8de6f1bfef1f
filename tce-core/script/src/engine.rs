//! 脚本引擎构建

use rhai::Engine;
use tracing::{debug, info};

use tce_common::StepResult;

/// 构建脚本引擎并注册步骤结果辅助函数
///
/// 脚本中的 `print` / `debug` 输出写入日志，并带上用例标签。
pub fn build_engine(label: &str) -> Engine {
    let mut engine = Engine::new();

    engine
        .register_type_with_name::<StepResult>("StepResult")
        .register_fn("passed", |msg: &str| StepResult::passed(msg))
        .register_fn("failed", |msg: &str| StepResult::failed(msg))
        .register_fn("skipped", |msg: &str| StepResult::skipped(msg))
        .register_fn("actioned", |msg: &str| StepResult::actioned(msg))
        .register_fn("in_progress", |msg: &str| StepResult::in_progress(msg))
        .register_get("status", |result: &mut StepResult| {
            result.status.as_str().to_string()
        })
        .register_get("message", |result: &mut StepResult| result.message.clone())
        .register_fn("to_string", |result: &mut StepResult| {
            format!("{}: {}", result.status, result.message)
        });

    let print_label = label.to_string();
    engine.on_print(move |text| info!("[{}] {}", print_label, text));

    let debug_label = label.to_string();
    engine.on_debug(move |text, _source, pos| debug!("[{}] {} ({})", debug_label, text, pos));

    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use tce_common::Status;

    #[test]
    fn test_result_helpers() {
        let engine = build_engine("test");

        let result: StepResult = engine.eval(r#"in_progress("waiting")"#).unwrap();
        assert_eq!(result.status, Status::InProgress);
        assert_eq!(result.message, "waiting");

        let status: String = engine.eval(r#"actioned("done").status"#).unwrap();
        assert_eq!(status, "ACTIONED");

        let message: String = engine.eval(r#"failed("bad").message"#).unwrap();
        assert_eq!(message, "bad");
    }

    #[test]
    fn test_print_does_not_fail() {
        let engine = build_engine("test");
        engine.run(r#"print("hello"); debug("world");"#).unwrap();
    }
}
