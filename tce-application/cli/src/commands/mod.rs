//! CLI 命令处理模块

pub mod common; // 公共工具函数
pub mod list;
pub mod output;
pub mod run;
pub mod suite;
