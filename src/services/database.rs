// 数据库服务模块
// 提供 SQLite 存储：题库、标签、学生掌握度与测验记录

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::models::{
    ChatHistory, ChatMessage, ChatRole, Difficulty, Exam, ExamQuestion, NewEntry,
    PerformanceRecord, QuestionEntry, Tag, TagDelta, UploadedDocument,
};

const ENTRY_COLUMNS: &str =
    "e.id, e.document_id, e.topic_type, e.question, e.answer, e.tags, e.difficulty, e.created_at";

/// 题目查询条件
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryFilter {
    pub tag: Option<String>,
    pub difficulties: Vec<Difficulty>,
    pub topic_type: Option<i64>,
    pub limit: Option<usize>,
}

impl EntryFilter {
    pub fn by_tag(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Default::default()
        }
    }

    pub fn by_topic_type(topic_type: i64) -> Self {
        Self {
            topic_type: Some(topic_type),
            ..Default::default()
        }
    }
}

/// 持久化协作方
///
/// 组卷与统计只依赖其中四类原语：条件查询、随机抽样、按键原子 upsert、原子计数累加。
pub trait QuestionStore: Send + Sync {
    /// 记录文档并写入其题目（单个事务），题目的来源文档统一指向新文档
    fn insert_document(
        &self,
        file_path: &str,
        topic_type_code: Option<i64>,
        entries: &[NewEntry],
    ) -> Result<(UploadedDocument, Vec<QuestionEntry>)>;

    /// 批量写入题目（单个事务）
    fn insert_entries(&self, entries: &[NewEntry]) -> Result<Vec<QuestionEntry>>;

    fn get_entry(&self, id: &str) -> Result<Option<QuestionEntry>>;

    fn find_entries(&self, filter: &EntryFilter) -> Result<Vec<QuestionEntry>>;

    /// 随机抽取至多 `size` 道满足条件的题目
    fn sample_entries(&self, filter: &EntryFilter, size: usize) -> Result<Vec<QuestionEntry>>;

    /// 查找或创建标签，并发调用同名标签只会存在一条
    fn upsert_tag(&self, name: &str) -> Result<Tag>;

    fn list_tags(&self) -> Result<Vec<Tag>>;

    /// 把一个批次的增量原子地累加到学生记录上，记录不存在时创建
    fn apply_performance(
        &self,
        student_id: &str,
        deltas: &BTreeMap<String, TagDelta>,
    ) -> Result<PerformanceRecord>;

    fn performance_record(&self, student_id: &str) -> Result<Option<PerformanceRecord>>;

    fn create_exam(&self, student_id: &str, entry_ids: &[String]) -> Result<Exam>;

    fn get_exam(&self, exam_id: &str) -> Result<Option<Exam>>;

    fn exam_questions(&self, exam_id: &str) -> Result<Vec<ExamQuestion>>;

    /// 认领并提交测验
    ///
    /// 同一事务内把测验标记为已完成、写入作答并累加掌握度增量。
    /// 只有属于该学生且尚未完成的测验能被认领，并发提交中只有一个成功，其余得到 `ExamAlreadyCompleted`。
    fn submit_exam(
        &self,
        exam_id: &str,
        student_id: &str,
        answers: &[ExamQuestion],
        deltas: &BTreeMap<String, TagDelta>,
    ) -> Result<PerformanceRecord>;

    /// 追加一条对话消息，会话不存在时创建
    fn append_chat_message(&self, student_id: &str, role: ChatRole, content: &str) -> Result<ChatMessage>;

    fn chat_history(&self, student_id: &str) -> Result<Option<ChatHistory>>;

    /// 删除学生的对话记录，返回此前是否存在
    fn clear_chat_history(&self, student_id: &str) -> Result<bool>;
}

/// 数据库服务
pub struct DatabaseService {
    pool: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
    storage: StorageConfig,
}

impl DatabaseService {
    /// 打开（或创建）数据库文件
    pub fn open(db_path: &Path, storage: &StorageConfig) -> Result<Self> {
        // 确保数据目录存在
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(storage.busy_timeout())?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::with_connection(conn, Some(db_path.to_path_buf()), storage.clone())
    }

    /// 内存数据库，测试与一次性导入使用
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, None, StorageConfig::default())
    }

    fn with_connection(conn: Connection, db_path: Option<PathBuf>, storage: StorageConfig) -> Result<Self> {
        conn.busy_timeout(storage.busy_timeout())?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let service = Self {
            pool: Arc::new(Mutex::new(conn)),
            db_path,
            storage,
        };
        service.initialize()?;
        Ok(service)
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.pool.lock().map_err(|_| Error::StorePoisoned)
    }

    /// 初始化表结构并执行迁移
    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                topic_type INTEGER,
                uploaded_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entries (
                id TEXT PRIMARY KEY,
                document_id TEXT REFERENCES documents(id),
                topic_type INTEGER,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                difficulty TEXT DEFAULT 'medium',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entry_tags (
                entry_id TEXT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
                tag TEXT NOT NULL,
                PRIMARY KEY (entry_id, tag)
            );

            CREATE TABLE IF NOT EXISTS tags (
                name TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS performance_records (
                student_id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                last_updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tag_performance (
                student_id TEXT NOT NULL REFERENCES performance_records(student_id),
                tag TEXT NOT NULL,
                attempted INTEGER NOT NULL DEFAULT 0 CHECK (attempted >= 0),
                correct INTEGER NOT NULL DEFAULT 0 CHECK (correct >= 0 AND correct <= attempted),
                PRIMARY KEY (student_id, tag)
            );

            CREATE TABLE IF NOT EXISTS exams (
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                completed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS exam_questions (
                exam_id TEXT NOT NULL REFERENCES exams(id) ON DELETE CASCADE,
                entry_id TEXT NOT NULL REFERENCES entries(id),
                student_answer TEXT,
                is_correct INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (exam_id, entry_id)
            );

            CREATE TABLE IF NOT EXISTS chat_sessions (
                student_id TEXT PRIMARY KEY,
                session_start TEXT NOT NULL,
                last_updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                student_id TEXT NOT NULL REFERENCES chat_sessions(student_id) ON DELETE CASCADE,
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entries_topic_type ON entries(topic_type);
            CREATE INDEX IF NOT EXISTS idx_entries_difficulty ON entries(difficulty);
            CREATE INDEX IF NOT EXISTS idx_entry_tags_tag ON entry_tags(tag);
            CREATE INDEX IF NOT EXISTS idx_exams_student ON exams(student_id);
            CREATE INDEX IF NOT EXISTS idx_chat_messages_student ON chat_messages(student_id, id);
            ",
        )?;

        Self::backfill_difficulty(&conn)?;
        Ok(())
    }

    /// 缺失或非法的难度统一补为 medium
    fn backfill_difficulty(conn: &Connection) -> Result<usize> {
        let updated = conn.execute(
            "UPDATE entries SET difficulty = 'medium'
             WHERE difficulty IS NULL OR difficulty NOT IN ('easy', 'medium', 'hard')",
            [],
        )?;
        if updated > 0 {
            log::info!("Backfilled difficulty on {} entries", updated);
        }
        Ok(updated)
    }

    fn query_entries(&self, filter: &EntryFilter, order_by: &str, limit: Option<usize>) -> Result<Vec<QuestionEntry>> {
        let conn = self.conn()?;

        let mut sql = format!("SELECT {} FROM entries e WHERE 1 = 1", ENTRY_COLUMNS);
        let mut values: Vec<Value> = Vec::new();

        if let Some(tag) = &filter.tag {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM entry_tags t WHERE t.entry_id = e.id AND t.tag = ?)",
            );
            values.push(Value::Text(tag.clone()));
        }
        if !filter.difficulties.is_empty() {
            let placeholders = vec!["?"; filter.difficulties.len()].join(", ");
            sql.push_str(&format!(" AND e.difficulty IN ({})", placeholders));
            values.extend(
                filter
                    .difficulties
                    .iter()
                    .map(|d| Value::Text(d.as_str().to_string())),
            );
        }
        if let Some(topic_type) = filter.topic_type {
            sql.push_str(" AND e.topic_type = ?");
            values.push(Value::Integer(topic_type));
        }

        sql.push_str(" ORDER BY ");
        sql.push_str(order_by);
        if let Some(limit) = limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(limit as i64));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), Self::row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn load_performance(conn: &Connection, student_id: &str) -> Result<Option<PerformanceRecord>> {
        let last_updated: Option<DateTime<Utc>> = conn
            .query_row(
                "SELECT last_updated FROM performance_records WHERE student_id = ?1",
                params![student_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(last_updated) = last_updated else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT tag, attempted, correct FROM tag_performance WHERE student_id = ?1",
        )?;
        let rows = stmt.query_map(params![student_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut attempted_by_tag = BTreeMap::new();
        let mut correct_by_tag = BTreeMap::new();
        for row in rows {
            let (tag, attempted, correct) = row?;
            attempted_by_tag.insert(tag.clone(), attempted.max(0) as u64);
            correct_by_tag.insert(tag, correct.max(0) as u64);
        }

        Ok(Some(PerformanceRecord {
            student_id: student_id.to_string(),
            attempted_by_tag,
            correct_by_tag,
            last_updated,
        }))
    }

    /// 在给定连接（通常是事务）上累加增量并读回记录
    fn write_performance(
        conn: &Connection,
        student_id: &str,
        deltas: &BTreeMap<String, TagDelta>,
    ) -> Result<PerformanceRecord> {
        conn.execute(
            "INSERT INTO performance_records (student_id, created_at, last_updated)
             VALUES (?1, ?2, ?2)
             ON CONFLICT(student_id) DO UPDATE SET last_updated = excluded.last_updated",
            params![student_id, Utc::now()],
        )?;

        let mut stmt = conn.prepare(
            "INSERT INTO tag_performance (student_id, tag, attempted, correct)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(student_id, tag) DO UPDATE SET
                attempted = attempted + excluded.attempted,
                correct = correct + excluded.correct",
        )?;
        for (tag, delta) in deltas {
            stmt.execute(params![
                student_id,
                tag,
                delta.attempted as i64,
                delta.correct as i64
            ])?;
        }

        Self::load_performance(conn, student_id)?
            .ok_or_else(|| Error::NotFound(format!("performance record for {}", student_id)))
    }

    fn try_apply_performance(
        &self,
        student_id: &str,
        deltas: &BTreeMap<String, TagDelta>,
    ) -> Result<PerformanceRecord> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let record = Self::write_performance(&tx, student_id, deltas)?;
        tx.commit()?;
        Ok(record)
    }

    fn try_submit_exam(
        &self,
        exam_id: &str,
        student_id: &str,
        answers: &[ExamQuestion],
        deltas: &BTreeMap<String, TagDelta>,
    ) -> Result<PerformanceRecord> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let claimed = tx.execute(
            "UPDATE exams SET completed = 1 WHERE id = ?1 AND student_id = ?2 AND completed = 0",
            params![exam_id, student_id],
        )?;
        if claimed == 0 {
            let completed: Option<bool> = tx
                .query_row(
                    "SELECT completed FROM exams WHERE id = ?1 AND student_id = ?2",
                    params![exam_id, student_id],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match completed {
                Some(true) => Error::ExamAlreadyCompleted(exam_id.to_string()),
                _ => Error::NotFound(format!("exam {} for student {}", exam_id, student_id)),
            });
        }

        {
            let mut stmt = tx.prepare(
                "UPDATE exam_questions SET student_answer = ?1, is_correct = ?2
                 WHERE exam_id = ?3 AND entry_id = ?4",
            )?;
            for answer in answers {
                stmt.execute(params![
                    answer.student_answer,
                    answer.is_correct,
                    exam_id,
                    answer.entry_id
                ])?;
            }
        }
        let record = Self::write_performance(&tx, student_id, deltas)?;

        tx.commit()?;
        Ok(record)
    }

    /// 写锁被占用时按退避间隔重试，次数用尽返回 `WriteConflict`
    fn retry_busy<T>(&self, student_id: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Err(Error::Database(e)) if is_busy(&e) => {
                    if attempt > self.storage.max_write_retries {
                        return Err(Error::WriteConflict {
                            student_id: student_id.to_string(),
                            attempts: attempt,
                        });
                    }
                    let delay = self.storage.retry_delay(attempt);
                    log::warn!(
                        "Write for {} busy (attempt {}), retrying in {:?}",
                        student_id,
                        attempt,
                        delay
                    );
                    std::thread::sleep(delay);
                }
                other => return other,
            }
        }
    }

    /// 在给定连接（通常是事务）上写入题目；`document_id` 覆盖题目自带的来源
    fn write_entries(
        conn: &Connection,
        entries: &[NewEntry],
        document_id: Option<&str>,
    ) -> Result<Vec<QuestionEntry>> {
        let mut insert_entry = conn.prepare(
            "INSERT INTO entries
             (id, document_id, topic_type, question, answer, tags, difficulty, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        let mut insert_tag =
            conn.prepare("INSERT OR IGNORE INTO entry_tags (entry_id, tag) VALUES (?1, ?2)")?;

        let mut saved = Vec::with_capacity(entries.len());
        for entry in entries {
            let saved_entry = QuestionEntry {
                id: Uuid::new_v4().to_string(),
                source_document_id: document_id
                    .map(str::to_string)
                    .or_else(|| entry.source_document_id.clone()),
                topic_type_code: entry.topic_type_code,
                question: entry.question.clone(),
                answer: entry.answer.clone(),
                tags: entry.tags.clone(),
                difficulty: entry.difficulty,
                created_at: Utc::now(),
            };

            insert_entry.execute(params![
                saved_entry.id,
                saved_entry.source_document_id,
                saved_entry.topic_type_code,
                saved_entry.question,
                saved_entry.answer,
                serde_json::to_string(&saved_entry.tags)?,
                saved_entry.difficulty.as_str(),
                saved_entry.created_at,
            ])?;
            for tag in &saved_entry.tags {
                insert_tag.execute(params![saved_entry.id, tag])?;
            }

            saved.push(saved_entry);
        }
        Ok(saved)
    }

    // ==================== 辅助方法 ====================

    /// 从数据库行转换为 QuestionEntry
    fn row_to_entry(row: &Row) -> rusqlite::Result<QuestionEntry> {
        let tags_json: String = row.get(5)?;
        let tags: Vec<String> = serde_json::from_str(&tags_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
        let difficulty: Option<String> = row.get(6)?;

        Ok(QuestionEntry {
            id: row.get(0)?,
            source_document_id: row.get(1)?,
            topic_type_code: row.get(2)?,
            question: row.get(3)?,
            answer: row.get(4)?,
            tags,
            difficulty: difficulty
                .as_deref()
                .and_then(Difficulty::from_token)
                .unwrap_or_default(),
            created_at: row.get(7)?,
        })
    }

    fn row_to_chat_message(row: &Row) -> rusqlite::Result<ChatMessage> {
        let role: String = row.get(0)?;
        let role = ChatRole::from_token(&role).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(0, Type::Text, format!("unknown chat role {:?}", role).into())
        })?;

        Ok(ChatMessage {
            role,
            content: row.get(1)?,
            timestamp: row.get(2)?,
        })
    }

    fn row_to_exam(row: &Row) -> rusqlite::Result<Exam> {
        Ok(Exam {
            id: row.get(0)?,
            student_id: row.get(1)?,
            completed: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

fn is_busy(error: &rusqlite::Error) -> bool {
    matches!(
        error.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

impl QuestionStore for DatabaseService {
    fn insert_document(
        &self,
        file_path: &str,
        topic_type_code: Option<i64>,
        entries: &[NewEntry],
    ) -> Result<(UploadedDocument, Vec<QuestionEntry>)> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let document = UploadedDocument {
            id: Uuid::new_v4().to_string(),
            file_path: file_path.to_string(),
            uploaded_at: Utc::now(),
            topic_type_code,
        };

        tx.execute(
            "INSERT INTO documents (id, file_path, topic_type, uploaded_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                document.id,
                document.file_path,
                document.topic_type_code,
                document.uploaded_at
            ],
        )?;
        let saved = Self::write_entries(&tx, entries, Some(&document.id))?;

        tx.commit()?;
        Ok((document, saved))
    }

    fn insert_entries(&self, entries: &[NewEntry]) -> Result<Vec<QuestionEntry>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let saved = Self::write_entries(&tx, entries, None)?;
        tx.commit()?;
        Ok(saved)
    }

    fn get_entry(&self, id: &str) -> Result<Option<QuestionEntry>> {
        let conn = self.conn()?;
        let entry = conn
            .query_row(
                &format!("SELECT {} FROM entries e WHERE e.id = ?1", ENTRY_COLUMNS),
                params![id],
                Self::row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn find_entries(&self, filter: &EntryFilter) -> Result<Vec<QuestionEntry>> {
        self.query_entries(filter, "e.created_at, e.rowid", filter.limit)
    }

    fn sample_entries(&self, filter: &EntryFilter, size: usize) -> Result<Vec<QuestionEntry>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        self.query_entries(filter, "RANDOM()", Some(size))
    }

    fn upsert_tag(&self, name: &str) -> Result<Tag> {
        if name.trim().is_empty() {
            return Err(Error::InvalidRequest("tag name is empty".to_string()));
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tags (name, created_at) VALUES (?1, ?2) ON CONFLICT(name) DO NOTHING",
            params![name, Utc::now()],
        )?;
        let tag = conn.query_row(
            "SELECT name, created_at FROM tags WHERE name = ?1",
            params![name],
            |row| {
                Ok(Tag {
                    name: row.get(0)?,
                    created_at: row.get(1)?,
                })
            },
        )?;
        Ok(tag)
    }

    fn list_tags(&self) -> Result<Vec<Tag>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name, created_at FROM tags ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(Tag {
                name: row.get(0)?,
                created_at: row.get(1)?,
            })
        })?;

        let mut tags = Vec::new();
        for row in rows {
            tags.push(row?);
        }
        Ok(tags)
    }

    fn apply_performance(
        &self,
        student_id: &str,
        deltas: &BTreeMap<String, TagDelta>,
    ) -> Result<PerformanceRecord> {
        self.retry_busy(student_id, || self.try_apply_performance(student_id, deltas))
    }

    fn performance_record(&self, student_id: &str) -> Result<Option<PerformanceRecord>> {
        let conn = self.conn()?;
        Self::load_performance(&conn, student_id)
    }

    fn create_exam(&self, student_id: &str, entry_ids: &[String]) -> Result<Exam> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let exam = Exam {
            id: Uuid::new_v4().to_string(),
            student_id: student_id.to_string(),
            completed: false,
            created_at: Utc::now(),
        };

        tx.execute(
            "INSERT INTO exams (id, student_id, completed, created_at) VALUES (?1, ?2, 0, ?3)",
            params![exam.id, exam.student_id, exam.created_at],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO exam_questions (exam_id, entry_id) VALUES (?1, ?2)",
            )?;
            for entry_id in entry_ids {
                stmt.execute(params![exam.id, entry_id])?;
            }
        }
        tx.commit()?;

        Ok(exam)
    }

    fn get_exam(&self, exam_id: &str) -> Result<Option<Exam>> {
        let conn = self.conn()?;
        let exam = conn
            .query_row(
                "SELECT id, student_id, completed, created_at FROM exams WHERE id = ?1",
                params![exam_id],
                Self::row_to_exam,
            )
            .optional()?;
        Ok(exam)
    }

    fn exam_questions(&self, exam_id: &str) -> Result<Vec<ExamQuestion>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT exam_id, entry_id, student_answer, is_correct
             FROM exam_questions WHERE exam_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![exam_id], |row| {
            Ok(ExamQuestion {
                exam_id: row.get(0)?,
                entry_id: row.get(1)?,
                student_answer: row.get(2)?,
                is_correct: row.get(3)?,
            })
        })?;

        let mut questions = Vec::new();
        for row in rows {
            questions.push(row?);
        }
        Ok(questions)
    }

    fn submit_exam(
        &self,
        exam_id: &str,
        student_id: &str,
        answers: &[ExamQuestion],
        deltas: &BTreeMap<String, TagDelta>,
    ) -> Result<PerformanceRecord> {
        self.retry_busy(student_id, || {
            self.try_submit_exam(exam_id, student_id, answers, deltas)
        })
    }

    fn append_chat_message(&self, student_id: &str, role: ChatRole, content: &str) -> Result<ChatMessage> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let message = ChatMessage {
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        };

        tx.execute(
            "INSERT INTO chat_sessions (student_id, session_start, last_updated)
             VALUES (?1, ?2, ?2)
             ON CONFLICT(student_id) DO UPDATE SET last_updated = excluded.last_updated",
            params![student_id, message.timestamp],
        )?;
        tx.execute(
            "INSERT INTO chat_messages (student_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![student_id, role.as_str(), message.content, message.timestamp],
        )?;

        tx.commit()?;
        Ok(message)
    }

    fn chat_history(&self, student_id: &str) -> Result<Option<ChatHistory>> {
        let conn = self.conn()?;
        let session: Option<(DateTime<Utc>, DateTime<Utc>)> = conn
            .query_row(
                "SELECT session_start, last_updated FROM chat_sessions WHERE student_id = ?1",
                params![student_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((session_start, last_updated)) = session else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT role, content, created_at FROM chat_messages WHERE student_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![student_id], Self::row_to_chat_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(Some(ChatHistory {
            student_id: student_id.to_string(),
            messages,
            session_start: Some(session_start),
            last_updated: Some(last_updated),
        }))
    }

    fn clear_chat_history(&self, student_id: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chat_messages WHERE student_id = ?1", params![student_id])?;
        let removed = tx.execute("DELETE FROM chat_sessions WHERE student_id = ?1", params![student_id])?;
        tx.commit()?;
        Ok(removed > 0)
    }
}
