use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 题目难度，缺省为 medium
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    /// 解析难度标记，会先去空白并转小写
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_lowercase().as_str() {
            "easy" => Some(Difficulty::Easy),
            "medium" => Some(Difficulty::Medium),
            "hard" => Some(Difficulty::Hard),
            _ => None,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 题库中的一道题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionEntry {
    pub id: String,
    pub source_document_id: Option<String>,
    pub topic_type_code: Option<i64>,
    pub question: String,
    pub answer: String,
    pub tags: Vec<String>,
    pub difficulty: Difficulty,
    pub created_at: DateTime<Utc>,
}

/// 待入库的题目
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub source_document_id: Option<String>,
    pub topic_type_code: Option<i64>,
    pub question: String,
    pub answer: String,
    pub tags: Vec<String>,
    pub difficulty: Difficulty,
}

/// 知识点标签
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// 上传文档记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedDocument {
    pub id: String,
    pub file_path: String,
    pub uploaded_at: DateTime<Utc>,
    pub topic_type_code: Option<i64>,
}

/// 练习题来源
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Ai,
    Fallback,
}

/// 一次组卷中的候选题，只存在于内存
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeCandidate {
    pub id: Option<String>,
    pub question: String,
    pub answer: String,
    pub tags: Vec<String>,
    pub provenance: Provenance,
}

impl PracticeCandidate {
    pub fn from_entry(entry: QuestionEntry) -> Self {
        Self {
            id: Some(entry.id),
            question: entry.question,
            answer: entry.answer,
            tags: entry.tags,
            provenance: Provenance::Fallback,
        }
    }
}

/// 组卷结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSet {
    pub questions: Vec<PracticeCandidate>,
    pub source: Provenance,
    pub ai_count: usize,
    pub fallback_count: usize,
    pub pool_exhausted: bool,
}

/// 判分后的一道作答，仅保留聚合所需字段
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredAnswer {
    pub tags: Vec<String>,
    pub is_correct: bool,
}

/// 一个批次内某标签的增量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDelta {
    pub attempted: u64,
    pub correct: u64,
}

/// 学生提交的作答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedAnswer {
    pub question_id: String,
    pub student_answer: String,
}

/// 单题判分结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResult {
    pub question: String,
    pub correct_answer: String,
    pub student_answer: String,
    pub is_correct: bool,
}

/// 学生的知识点累计记录，每个学生一条
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub student_id: String,
    pub attempted_by_tag: BTreeMap<String, u64>,
    pub correct_by_tag: BTreeMap<String, u64>,
    pub last_updated: DateTime<Utc>,
}

impl PerformanceRecord {
    /// 按 attempted 中出现的标签推导掌握度
    pub fn mastery(&self) -> BTreeMap<String, TagMastery> {
        self.attempted_by_tag
            .iter()
            .map(|(tag, &total)| {
                let correct = self.correct_by_tag.get(tag).copied().unwrap_or(0);
                (tag.clone(), TagMastery::new(total, correct))
            })
            .collect()
    }
}

/// 单个标签的掌握度视图，从不落库
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMastery {
    pub total: u64,
    pub correct: u64,
    pub percentage: u64,
}

impl TagMastery {
    pub fn new(total: u64, correct: u64) -> Self {
        Self {
            total,
            correct,
            percentage: mastery_percentage(total, correct),
        }
    }
}

/// round(100 * correct / attempted)，attempted 为 0 时返回 0
pub fn mastery_percentage(attempted: u64, correct: u64) -> u64 {
    if attempted == 0 {
        return 0;
    }
    (200 * correct + attempted) / (2 * attempted)
}

/// 学生档案
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub student_id: String,
    pub performance: BTreeMap<String, TagMastery>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// 测验
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exam {
    pub id: String,
    pub student_id: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

/// 测验中的一道题及作答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamQuestion {
    pub exam_id: String,
    pub entry_id: String,
    pub student_answer: Option<String>,
    pub is_correct: bool,
}

/// 对话角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "user" => Some(ChatRole::User),
            "assistant" => Some(ChatRole::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// 学生与辅导老师的对话记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistory {
    pub student_id: String,
    pub messages: Vec<ChatMessage>,
    pub session_start: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl ChatHistory {
    pub fn empty(student_id: &str) -> Self {
        Self {
            student_id: student_id.to_string(),
            messages: Vec::new(),
            session_start: None,
            last_updated: None,
        }
    }
}
