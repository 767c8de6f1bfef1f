//! 用例脚本发现

use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use tce_executor::LoadError;

use crate::source::ScriptSource;

/// 递归查找文件名匹配 `pattern` 的用例脚本，按路径排序
pub fn discover(dir: &Path, pattern: &Regex) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    walk(dir, pattern, &mut found)?;
    found.sort();

    debug!("在 {} 中发现 {} 个用例脚本", dir.display(), found.len());
    Ok(found)
}

/// 发现并加载目录中的所有用例脚本
///
/// 单个脚本加载失败不影响其他脚本。
pub fn load_dir(
    dir: &Path,
    pattern: &Regex,
) -> io::Result<Vec<(PathBuf, Result<ScriptSource, LoadError>)>> {
    let loaded = discover(dir, pattern)?
        .into_iter()
        .map(|path| {
            let source = ScriptSource::from_file(&path);
            if let Err(e) = &source {
                warn!("加载用例脚本失败 {}: {}", path.display(), e);
            }
            (path, source)
        })
        .collect();

    Ok(loaded)
}

fn walk(dir: &Path, pattern: &Regex, found: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if entry.file_type()?.is_dir() {
            walk(&path, pattern, found)?;
        } else if entry
            .file_name()
            .to_str()
            .map(|name| pattern.is_match(name))
            .unwrap_or(false)
        {
            found.push(path);
        }
    }

    Ok(())
}
