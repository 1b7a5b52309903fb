// 错误类型定义
// 文档级错误向调用方暴露，单题块错误只记录不中断

use std::path::PathBuf;

/// 核心错误类型
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// 文档无法读取或格式不支持，提取结果为空文本
    #[error("No text extracted from {}", path.display())]
    ExtractionFailure { path: PathBuf },

    /// 文本中没有任何合法题块
    #[error("No valid questions found in document")]
    NoQuestionsParsed,

    /// 单个题块字段为空，已丢弃
    #[error("Block {index} dropped: {reason}")]
    InvalidEntry { index: usize, reason: String },

    /// AI 服务不可用或超时
    #[error("Practice provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// 计数写入在重试后仍然冲突
    #[error("Performance update for student {student_id} conflicted after {attempts} attempts")]
    WriteConflict { student_id: String, attempts: u32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Exam {0} has already been submitted")]
    ExamAlreadyCompleted(String),

    #[error("Database connection lock poisoned")]
    StorePoisoned,

    #[error("Logger setup failed: {0}")]
    Logger(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
