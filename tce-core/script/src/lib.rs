//! TCE 脚本宿主
//!
//! 将 Rhai 脚本加载为 [`tce_executor::CaseDefinition`]。脚本约定:
//!
//! - `get_info()` (必需): 返回 `#{ name: "...", steps: ["Step 1", ...] }`
//! - `step1()` .. `stepN()`: 返回 `passed(msg)` 等辅助函数的结果，
//!   或 `#{ status: "PASSED", message: "..." }`
//! - `init()` (可选): 返回对象映射，作为实例私有状态 (`this`) 的初始值
//! - `before()` / `after()` (可选): 运行前后钩子，返回 `false` 表示失败
//!
//! 所有函数都以实例私有状态作为 `this` 调用，同一运行内的调用共享该状态。

pub mod discovery;
pub mod engine;
pub mod source;

pub use discovery::{discover, load_dir};
pub use engine::build_engine;
pub use source::{ScriptCase, ScriptSource};
