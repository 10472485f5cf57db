use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppError, AppResult};

/// 默认配置文件名（位于工作目录）
pub const DEFAULT_CONFIG_FILE: &str = "cadastre.toml";

/// 程序配置文件
///
/// 加载顺序：默认值 → TOML 文件 → 环境变量
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP 监听地址
    pub bind_addr: String,
    /// 上传图片存放目录
    pub upload_folder: String,
    /// 记录表与导出文件存放目录
    pub result_folder: String,
    /// 记录表文件名（JSON）
    pub store_file_name: String,
    /// 导出文件名（CSV）
    pub export_file_name: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    // --- 调用策略 ---
    /// 单次调用超时（秒）
    pub analyzer_timeout_secs: u64,
    /// 临时故障最大重试次数
    pub analyzer_max_retries: u32,
    /// 首次重试等待（毫秒），之后每次翻倍
    pub analyzer_retry_backoff_ms: u64,
    /// 同一批次内同时分析的图片数量
    pub max_concurrent_analyses: usize,
    // --- 报告 ---
    /// 描述文字每行最大字符数
    pub report_wrap_width: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            upload_folder: "uploads".to_string(),
            result_folder: "results".to_string(),
            store_file_name: "analyse.json".to_string(),
            export_file_name: "analyse.csv".to_string(),
            verbose_logging: false,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o".to_string(),
            llm_temperature: 0.0,
            llm_max_tokens: 1024,
            analyzer_timeout_secs: 60,
            analyzer_max_retries: 3,
            analyzer_retry_backoff_ms: 500,
            max_concurrent_analyses: 4,
            report_wrap_width: 90,
        }
    }
}

impl Config {
    /// 默认值 + 环境变量
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 从 TOML 文件加载，未出现的字段使用默认值
    pub fn from_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| AppError::io(path, e))?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// 完整加载流程
    ///
    /// 配置文件路径取自 `CADASTRE_CONFIG`，否则尝试工作目录下的 `cadastre.toml`，
    /// 文件不存在时直接使用默认值
    pub fn load() -> AppResult<Self> {
        let explicit = std::env::var("CADASTRE_CONFIG").ok().map(PathBuf::from);
        let base = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Self::default()
                }
            }
        };
        let config = base.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 用环境变量覆盖当前值
    pub fn with_env_overrides(self) -> Self {
        fn parsed<T: std::str::FromStr>(name: &str, current: T) -> T {
            std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(current)
        }

        let llm_api_key = std::env::var("LLM_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .unwrap_or(self.llm_api_key);

        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(self.bind_addr),
            upload_folder: std::env::var("UPLOAD_FOLDER").unwrap_or(self.upload_folder),
            result_folder: std::env::var("RESULT_FOLDER").unwrap_or(self.result_folder),
            store_file_name: std::env::var("STORE_FILE_NAME").unwrap_or(self.store_file_name),
            export_file_name: std::env::var("EXPORT_FILE_NAME").unwrap_or(self.export_file_name),
            verbose_logging: parsed("VERBOSE_LOGGING", self.verbose_logging),
            llm_api_key,
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(self.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(self.llm_model_name),
            llm_temperature: parsed("LLM_TEMPERATURE", self.llm_temperature),
            llm_max_tokens: parsed("LLM_MAX_TOKENS", self.llm_max_tokens),
            analyzer_timeout_secs: parsed("ANALYZER_TIMEOUT_SECS", self.analyzer_timeout_secs),
            analyzer_max_retries: parsed("ANALYZER_MAX_RETRIES", self.analyzer_max_retries),
            analyzer_retry_backoff_ms: parsed(
                "ANALYZER_RETRY_BACKOFF_MS",
                self.analyzer_retry_backoff_ms,
            ),
            max_concurrent_analyses: parsed("MAX_CONCURRENT_ANALYSES", self.max_concurrent_analyses),
            report_wrap_width: parsed("REPORT_WRAP_WIDTH", self.report_wrap_width),
        }
    }

    /// 检查取值范围
    pub fn validate(&self) -> AppResult<()> {
        if self.max_concurrent_analyses == 0 {
            return Err(AppError::Config("max_concurrent_analyses 必须大于 0".into()));
        }
        if self.analyzer_timeout_secs == 0 {
            return Err(AppError::Config("analyzer_timeout_secs 必须大于 0".into()));
        }
        if self.report_wrap_width < 10 {
            return Err(AppError::Config(format!(
                "report_wrap_width 过小: {}",
                self.report_wrap_width
            )));
        }
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        Path::new(&self.result_folder).join(&self.store_file_name)
    }

    pub fn export_path(&self) -> PathBuf {
        Path::new(&self.result_folder).join(&self.export_file_name)
    }

    pub fn analyzer_timeout(&self) -> Duration {
        Duration::from_secs(self.analyzer_timeout_secs)
    }

    pub fn analyzer_backoff(&self) -> Duration {
        Duration::from_millis(self.analyzer_retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "upload_folder = \"/srv/uploads\"\nanalyzer_max_retries = 5").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.upload_folder, "/srv/uploads");
        assert_eq!(config.analyzer_max_retries, 5);
        assert_eq!(config.store_file_name, "analyse.json");
        assert_eq!(config.llm_model_name, "gpt-4o");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "analyzer_max_retries = \"many\"").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = Config {
            max_concurrent_analyses: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_derived_paths() {
        let config = Config::default();
        assert_eq!(config.store_path(), Path::new("results").join("analyse.json"));
        assert_eq!(config.export_path(), Path::new("results").join("analyse.csv"));
    }
}
