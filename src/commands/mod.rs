// 命令模块
// 组合各服务完成一次完整请求：导入、练习、测验、辅导对话与档案查询

pub mod chat;
pub mod exam;
pub mod ingest;
pub mod practice;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::Result;
use crate::services::{
    DatabaseService, FileTextExtractor, PracticeProvider, PracticeSetAssembler, QuestionParser,
    QuestionStore, SkillCoachClient, TextExtractor,
};

pub use chat::{chat, chat_history, clear_chat_history};
pub use exam::{start_exam, submit_exam, ExamQuestionDto, ExamStart, ExamSubmission};
pub use ingest::{ingest_document, ingest_text, IngestReport};
pub use practice::{
    find_questions, list_tags, practice, profile, submit_practice, PracticeSubmission,
};

/// 应用状态，持有所有协作方
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn QuestionStore>,
    pub extractor: Arc<dyn TextExtractor>,
    pub provider: Arc<dyn PracticeProvider>,
    pub parser: QuestionParser,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn QuestionStore>,
        extractor: Arc<dyn TextExtractor>,
        provider: Arc<dyn PracticeProvider>,
    ) -> Result<Self> {
        let parser = QuestionParser::new(config.parser.grammar)?;
        Ok(Self {
            config,
            store,
            extractor,
            provider,
            parser,
        })
    }

    /// 按配置打开数据库并构造 HTTP 客户端
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let db_path = config.database_path();
        log::info!("Opening database at {}", db_path.display());
        let store = DatabaseService::open(&db_path, &config.storage)?;
        let provider = SkillCoachClient::new(config.provider.clone());

        Self::new(
            config,
            Arc::new(store),
            Arc::new(FileTextExtractor),
            Arc::new(provider),
        )
    }

    pub fn assembler(&self) -> PracticeSetAssembler {
        PracticeSetAssembler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.provider),
            self.config.practice.clone(),
            self.config.provider.timeout(),
        )
    }
}
