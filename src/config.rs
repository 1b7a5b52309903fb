// 配置管理
// 读取顺序：.env -> 配置文件（可选）-> SKILLCOACH_* 环境变量 -> 旧版 SMYTHOS_* 变量

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::services::parser::GrammarSelection;

const ENV_PREFIX: &str = "SKILLCOACH";
const LEGACY_ENDPOINT_VAR: &str = "SMYTHOS_SKILLCOACH_URL";
const LEGACY_API_KEY_VAR: &str = "SMYTHOS_API_KEY";

/// 应用配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: Option<PathBuf>,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub parser: ParserConfig,
    pub provider: ProviderConfig,
    pub practice: PracticeConfig,
    pub exam: ExamConfig,
    pub storage: StorageConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            log_level: "info".to_string(),
            log_file: None,
            parser: ParserConfig::default(),
            provider: ProviderConfig::default(),
            practice: PracticeConfig::default(),
            exam: ExamConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// 题块解析配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub grammar: GrammarSelection,
}

/// AI 出题服务配置，构造客户端时显式注入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub endpoint: Option<String>,
    pub explanation_endpoint: Option<String>,
    pub chat_endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub explanation_timeout_ms: u64,
    pub chat_timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            explanation_endpoint: None,
            chat_endpoint: None,
            api_key: None,
            timeout_ms: 10_000,
            explanation_timeout_ms: 15_000,
            chat_timeout_ms: 15_000,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn explanation_timeout(&self) -> Duration {
        Duration::from_millis(self.explanation_timeout_ms)
    }

    pub fn chat_timeout(&self) -> Duration {
        Duration::from_millis(self.chat_timeout_ms)
    }

    /// 未单独配置时由练习地址推导
    pub fn resolved_explanation_endpoint(&self) -> Option<String> {
        self.explanation_endpoint
            .clone()
            .or_else(|| self.derive_endpoint("/getExplanationForQuestion"))
    }

    pub fn resolved_chat_endpoint(&self) -> Option<String> {
        self.chat_endpoint
            .clone()
            .or_else(|| self.derive_endpoint("/chatWithTutor"))
    }

    fn derive_endpoint(&self, path: &str) -> Option<String> {
        self.endpoint
            .as_ref()
            .map(|url| url.replace("/practice-by-tag", path))
    }
}

/// 练习组卷配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PracticeConfig {
    pub default_count: usize,
    pub oversample_factor: usize,
}

impl Default for PracticeConfig {
    fn default() -> Self {
        Self {
            default_count: 5,
            oversample_factor: 2,
        }
    }
}

/// 测验配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExamConfig {
    pub size: usize,
    pub topic_type: i64,
}

impl Default for ExamConfig {
    fn default() -> Self {
        Self {
            size: 5,
            topic_type: 1,
        }
    }
}

/// SQLite 写入配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub busy_timeout_ms: u64,
    pub max_write_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            max_write_retries: 3,
            retry_delay_ms: 50,
        }
    }
}

impl StorageConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// 第 attempt 次失败后的等待时间，逐次翻倍
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(10);
        Duration::from_millis(self.retry_delay_ms.saturating_mul(factor))
    }
}

impl AppConfig {
    /// 加载配置；`path` 为空时尝试当前目录下的 `skillcoach.toml`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = path
            .map(|p| config::File::from(p.to_path_buf()).required(true))
            .unwrap_or_else(|| config::File::with_name("skillcoach").required(false));

        let mut loaded: AppConfig = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.apply_legacy_env(|key| std::env::var(key).ok());
        Ok(loaded)
    }

    fn apply_legacy_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.provider.endpoint.is_none() {
            self.provider.endpoint = lookup(LEGACY_ENDPOINT_VAR).filter(|v| !v.is_empty());
        }
        if self.provider.api_key.is_none() {
            self.provider.api_key = lookup(LEGACY_API_KEY_VAR).filter(|v| !v.is_empty());
        }
    }

    /// 数据库路径，未配置时落在本地数据目录
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(crate::utils::get_database_path)
    }
}
