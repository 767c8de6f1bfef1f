//! TCE 通用类型定义
//!
//! 此 crate 包含执行引擎与脚本宿主之间共享的类型：步骤状态、步骤结果和用例信息。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 步骤状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// 步骤成功
    Passed,

    /// 步骤失败，整个运行以失败结束
    Failed,

    /// 步骤被有意跳过，不计为失败
    Skipped,

    /// 步骤成功完成了一个外部动作
    Actioned,

    /// 步骤仍在进行中，需要稍后再次调用
    InProgress,
}

impl Status {
    /// 所有状态值
    pub const ALL: [Status; 5] = [
        Status::Passed,
        Status::Failed,
        Status::Skipped,
        Status::Actioned,
        Status::InProgress,
    ];

    /// 是否为终态 (除 IN_PROGRESS 外均为终态)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Passed => "PASSED",
            Status::Failed => "FAILED",
            Status::Skipped => "SKIPPED",
            Status::Actioned => "ACTIONED",
            Status::InProgress => "IN_PROGRESS",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    /// 解析状态名称，忽略大小写，`-` 与 `_` 等价
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Status::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| format!("未知的步骤状态: {}", s))
    }
}

/// 步骤结果 (每次调用步骤时新建，创建后不再修改)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// 步骤状态
    pub status: Status,

    /// 步骤消息
    pub message: String,
}

impl StepResult {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn passed(message: impl Into<String>) -> Self {
        Self::new(Status::Passed, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(Status::Failed, message)
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self::new(Status::Skipped, message)
    }

    pub fn actioned(message: impl Into<String>) -> Self {
        Self::new(Status::Actioned, message)
    }

    pub fn in_progress(message: impl Into<String>) -> Self {
        Self::new(Status::InProgress, message)
    }
}

/// 测试用例信息
///
/// 步骤描述列表的长度即声明的步骤数，它是一个上限：
/// 用例实现的步骤函数可以少于声明的步骤数。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseInfo {
    /// 用例名称
    pub name: String,

    /// 按顺序排列的步骤描述
    #[serde(default)]
    pub steps: Vec<String>,
}

impl CaseInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// 追加一个步骤描述
    pub fn with_step(mut self, description: impl Into<String>) -> Self {
        self.steps.push(description.into());
        self
    }

    /// 声明的步骤数
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// 获取步骤描述 (1-based)
    pub fn step_description(&self, number: usize) -> Option<&str> {
        number
            .checked_sub(1)
            .and_then(|i| self.steps.get(i))
            .map(String::as_str)
    }
}
