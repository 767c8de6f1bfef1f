//! 引擎配置管理
//!
//! 支持从多个源加载配置:
//! - 环境变量 (优先级最高)
//! - 配置文件 (TOML/YAML/JSON)
//! - 默认值 (优先级最低)
//!
//! 配置文件搜索路径 (按优先级):
//! 1. `TCE_CONFIG` 环境变量指定的路径
//! 2. `./tce.toml`、`./tce.yaml`、`./tce.json` (当前目录)
//! 3. `~/.config/tce/config.toml` (用户配置目录)
//! 4. `/etc/tce/config.toml` (系统配置目录)

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 引擎配置 (顶层)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 日志级别 (trace/debug/info/warn/error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// 调度配置
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// 用例发现配置
    #[serde(default)]
    pub cases: CasesConfig,

    /// 报告配置
    #[serde(default)]
    pub report: ReportConfig,
}

/// 调度配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IN_PROGRESS 步骤的轮询间隔 (毫秒)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// 步骤完成后立即推进下一步骤
    #[serde(default = "default_eager")]
    pub eager: bool,
}

/// 用例发现配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CasesConfig {
    /// 用例目录
    #[serde(default = "default_case_directory")]
    pub directory: PathBuf,

    /// 用例文件名匹配模式 (正则)
    #[serde(default = "default_case_pattern")]
    pub pattern: String,
}

/// 报告配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    /// 输出格式 (table/json/yaml/csv)
    #[serde(default = "default_report_format")]
    pub format: String,

    /// 结果文件导出目录，未设置时不导出
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_eager() -> bool {
    true
}
fn default_case_directory() -> PathBuf {
    PathBuf::from("./test_cases")
}
fn default_case_pattern() -> String {
    r"^tc.*\.rhai$".to_string()
}
fn default_report_format() -> String {
    "table".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            scheduler: SchedulerConfig::default(),
            cases: CasesConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            eager: default_eager(),
        }
    }
}

impl Default for CasesConfig {
    fn default() -> Self {
        Self {
            directory: default_case_directory(),
            pattern: default_case_pattern(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format: default_report_format(),
            export_dir: None,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl CasesConfig {
    /// 编译文件名匹配模式
    pub fn pattern_regex(&self) -> Result<Regex> {
        Regex::new(&self.pattern)
            .with_context(|| format!("Invalid case pattern: {}", self.pattern))
    }
}

impl EngineConfig {
    /// 从多个源加载配置 (优先级: 环境变量 > 配置文件 > 默认值)
    ///
    /// 指定 `path` 时跳过配置文件搜索。
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path.map(Path::to_path_buf).or_else(Self::find_config_file) {
            Some(path) => {
                tracing::debug!("Loading config from: {:?}", path);
                Self::load_from_file(&path)?
            }
            None => {
                tracing::debug!("No config file found, using defaults");
                Self::default()
            }
        };

        config.apply_env_vars()?;

        Ok(config)
    }

    /// 从指定文件加载配置
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {:?}", path))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {:?}", path))?,
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {:?}", path))?,
            _ => anyhow::bail!("Unsupported config file format: {:?}", path),
        };

        Ok(config)
    }

    /// 查找配置文件 (按优先级搜索)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = env::var("TCE_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
        }

        let mut paths = vec![
            PathBuf::from("./tce.toml"),
            PathBuf::from("./tce.yaml"),
            PathBuf::from("./tce.json"),
        ];

        if let Some(config_dir) = dirs::home_dir().map(|home| home.join(".config/tce")) {
            paths.push(config_dir.join("config.toml"));
        }

        #[cfg(target_os = "linux")]
        paths.push(PathBuf::from("/etc/tce/config.toml"));

        paths.into_iter().find(|path| path.exists())
    }

    /// 从环境变量覆盖配置
    fn apply_env_vars(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// 按变量名查找覆盖值
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(interval) = lookup("TCE_POLL_INTERVAL_MS") {
            self.scheduler.poll_interval_ms = interval
                .parse()
                .context("Invalid TCE_POLL_INTERVAL_MS value")?;
        }
        if let Some(eager) = lookup("TCE_EAGER") {
            self.scheduler.eager = eager.parse().context("Invalid TCE_EAGER value")?;
        }
        if let Some(directory) = lookup("TCE_CASE_DIR") {
            self.cases.directory = PathBuf::from(directory);
        }
        if let Some(pattern) = lookup("TCE_CASE_PATTERN") {
            self.cases.pattern = pattern;
        }
        if let Some(level) = lookup("TCE_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(dir) = lookup("TCE_EXPORT_DIR") {
            self.report.export_dir = Some(PathBuf::from(dir));
        }

        Ok(())
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than 0");
        }

        if self.cases.pattern.is_empty() {
            anyhow::bail!("Case pattern cannot be empty");
        }
        self.cases.pattern_regex()?;

        Ok(())
    }

    /// 保存配置到文件
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let content = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::to_string_pretty(self).context("Failed to serialize to TOML")?,
            Some("yaml") | Some("yml") => {
                serde_yaml::to_string(self).context("Failed to serialize to YAML")?
            }
            Some("json") => {
                serde_json::to_string_pretty(self).context("Failed to serialize to JSON")?
            }
            _ => anyhow::bail!("Unsupported config file format: {:?}", path),
        };

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.scheduler.poll_interval_ms, 1000);
        assert!(config.scheduler.eager);
        assert_eq!(config.cases.directory, PathBuf::from("./test_cases"));
        assert_eq!(config.report.format, "table");
        assert_eq!(config.log_level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_pattern_matches_case_files() {
        let regex = CasesConfig::default().pattern_regex().unwrap();
        assert!(regex.is_match("tc1.rhai"));
        assert!(regex.is_match("tc_login.rhai"));
        assert!(!regex.is_match("helper.rhai"));
        assert!(!regex.is_match("tc1.rhai.bak"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.scheduler.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        config.scheduler.poll_interval_ms = 10;
        config.cases.pattern = String::new();
        assert!(config.validate().is_err());

        config.cases.pattern = "tc(".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config: EngineConfig = toml::from_str(
            r#"
            [scheduler]
            poll_interval_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.poll_interval_ms, 250);
        assert!(config.scheduler.eager);
        assert_eq!(config.cases.pattern, r"^tc.*\.rhai$");
    }

    #[test]
    fn test_apply_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TCE_POLL_INTERVAL_MS", "50"),
            ("TCE_EAGER", "false"),
            ("TCE_CASE_DIR", "/tmp/cases"),
            ("TCE_EXPORT_DIR", "/tmp/results"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.scheduler.poll_interval_ms, 50);
        assert!(!config.scheduler.eager);
        assert_eq!(config.cases.directory, PathBuf::from("/tmp/cases"));
        assert_eq!(config.report.export_dir, Some(PathBuf::from("/tmp/results")));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_invalid_override() {
        let mut config = EngineConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "TCE_POLL_INTERVAL_MS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.yaml");
        fs::write(&path, "cases:\n  directory: suites\n").unwrap();

        let config = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.cases.directory, PathBuf::from("suites"));
        assert_eq!(config.cases.pattern, r"^tc.*\.rhai$");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.scheduler.poll_interval_ms = 20;
        config.report.export_dir = Some(PathBuf::from("out"));

        for name in ["tce.toml", "tce.yaml", "tce.json"] {
            let path = dir.path().join("nested").join(name);
            config.save_to_file(&path).unwrap();
            assert_eq!(EngineConfig::load_from_file(&path).unwrap(), config);
        }

        assert!(EngineConfig::load_from_file(&dir.path().join("tce.ini")).is_err());
    }
}
