// 服务模块
// 提供核心业务逻辑服务

pub mod assembler;
pub mod database;
pub mod extractor;
pub mod parser;
pub mod performance;
pub mod skillcoach;
pub mod tags;

pub use assembler::PracticeSetAssembler;

pub use database::{
    DatabaseService,
    EntryFilter,
    QuestionStore,
};

pub use extractor::{
    FileTextExtractor,
    TextExtractor,
    normalize_text,
};

pub use parser::{
    BlockGrammar,
    ClassicGrammar,
    GrammarSelection,
    ParseReport,
    ParsedBlock,
    QuestionParser,
    RatedGrammar,
};

pub use performance::{
    PerformanceAggregator,
    aggregate,
    is_correct,
};

pub use skillcoach::{
    ChatReply,
    ChatRequest,
    Explanation,
    ExplanationRequest,
    PracticeProvider,
    PracticeQuery,
    ProviderQuestion,
    SkillCoachClient,
};

pub use tags::{TagNormalizer, TagRegistration};
