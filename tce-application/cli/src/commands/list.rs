//! 列出测试用例命令

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;

use tce_executor::{CaseDefinition, EngineConfig, LoadError};
use tce_script::{load_dir, ScriptSource};

use super::output::{output_formatted, TableRow};

/// 用例列表行
#[derive(Debug, Serialize)]
pub struct CaseRow {
    pub file: String,
    pub name: String,
    pub steps: usize,

    /// 已实现的步骤编号
    pub implemented: Vec<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CaseRow {
    fn from_source(file: String, loaded: Result<ScriptSource, LoadError>) -> Self {
        let probed = loaded.and_then(|source| {
            let info = source.instance()?.info()?;
            tce_executor::validate_info(&info)?;
            Ok((source.implemented_steps(), info))
        });

        match probed {
            Ok((implemented, info)) => Self {
                file,
                name: info.name,
                steps: info.steps.len(),
                implemented,
                error: None,
            },
            Err(e) => Self {
                file,
                name: String::new(),
                steps: 0,
                implemented: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }
}

impl TableRow for CaseRow {
    fn headers() -> Vec<&'static str> {
        vec!["文件", "名称", "步骤", "已实现"]
    }

    fn row(&self) -> Vec<String> {
        match &self.error {
            Some(e) => vec![self.file.clone(), format!("加载失败: {}", e), "-".into(), "-".into()],
            None => vec![
                self.file.clone(),
                self.name.clone(),
                self.steps.to_string(),
                format!("{}/{}", self.implemented.len(), self.steps),
            ],
        }
    }
}

pub fn handle(dir: Option<PathBuf>, format: &str, config: EngineConfig) -> Result<()> {
    let dir = dir.unwrap_or_else(|| config.cases.directory.clone());
    let pattern = config.cases.pattern_regex()?;

    let rows = collect_rows(&dir, &pattern)?;
    if rows.is_empty() && format == "table" {
        println!("目录 {} 中没有用例脚本", dir.display());
        return Ok(());
    }

    output_formatted(&rows, format)
}

fn collect_rows(dir: &std::path::Path, pattern: &regex::Regex) -> Result<Vec<CaseRow>> {
    let loaded = load_dir(dir, pattern).with_context(|| format!("读取用例目录失败: {:?}", dir))?;

    Ok(loaded
        .into_iter()
        .map(|(path, source)| CaseRow::from_source(path.display().to_string(), source))
        .collect())
}
