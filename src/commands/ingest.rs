// 文档导入
// 提取文本 -> 解析题块 -> 注册标签 -> 文档与题目一并入库

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use super::AppState;
use crate::error::{Error, Result};
use crate::models::{QuestionEntry, UploadedDocument};
use crate::services::parser::DroppedBlock;
use crate::services::TagNormalizer;

/// 导入结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub document: UploadedDocument,
    pub grammar: String,
    pub entries: Vec<QuestionEntry>,
    pub dropped: Vec<DroppedBlock>,
    pub registered_tags: Vec<String>,
    pub failed_tags: Vec<String>,
}

/// 导入一个文件
pub fn ingest_document(state: &AppState, path: &Path, topic_type: Option<i64>) -> Result<IngestReport> {
    let text = state.extractor.extract(path);
    if text.is_empty() {
        return Err(Error::ExtractionFailure {
            path: path.to_path_buf(),
        });
    }

    ingest_text(state, &text, &path.display().to_string(), topic_type)
}

/// 导入已提取的文本，`source` 记录为文档路径
pub fn ingest_text(
    state: &AppState,
    text: &str,
    source: &str,
    topic_type: Option<i64>,
) -> Result<IngestReport> {
    let report = state.parser.parse_report(text);
    if report.blocks.is_empty() {
        log::warn!("{}: {}", source, Error::NoQuestionsParsed);
        return Err(Error::NoQuestionsParsed);
    }

    let tag_names: BTreeSet<&str> = report
        .blocks
        .iter()
        .flat_map(|block| block.tags.iter().map(String::as_str))
        .collect();
    let registration = TagNormalizer::register(state.store.as_ref(), tag_names);

    let new_entries: Vec<_> = report
        .blocks
        .into_iter()
        .map(|block| block.into_entry(None, topic_type))
        .collect();
    let (document, entries) = state.store.insert_document(source, topic_type, &new_entries)?;

    log::info!(
        "Ingested {}: {} questions, {} dropped, {} tags ({} grammar)",
        source,
        entries.len(),
        report.dropped.len(),
        registration.registered.len(),
        report.grammar
    );

    Ok(IngestReport {
        document,
        grammar: report.grammar,
        entries,
        dropped: report.dropped,
        registered_tags: registration.registered,
        failed_tags: registration.failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{state, state_with_store, RejectingTagStore};
    use crate::services::{EntryFilter, QuestionStore};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    const DOC: &str = "Q1: What is 2+2? [math,arithmetic]{easy} Ans: 4\n\
                       Q2: Capital of France? [geography]{HARD} Ans: Paris\n\
                       Q3: Left blank? [blank]{easy} Ans:   ";

    #[test]
    fn test_ingest_text_stores_entries_and_tags() {
        let state = state();
        let report = ingest_text(&state, DOC, "quiz.txt", Some(1)).unwrap();

        assert_eq!(report.grammar, "rated");
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.registered_tags, vec!["arithmetic", "geography", "math"]);
        assert!(report
            .entries
            .iter()
            .all(|e| e.source_document_id.as_deref() == Some(report.document.id.as_str())));

        let stored = state.store.get_entry(&report.entries[1].id).unwrap().unwrap();
        assert_eq!(stored.answer, "Paris");
        assert_eq!(stored.topic_type_code, Some(1));
    }

    #[test]
    fn test_ingest_without_blocks_fails() {
        let state = state();
        let err = ingest_text(&state, "just some notes", "notes.txt", None).unwrap_err();

        assert!(matches!(err, Error::NoQuestionsParsed));
        assert!(state.store.list_tags().unwrap().is_empty());
    }

    #[test]
    fn test_ingest_document_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quiz.txt");
        fs::write(&path, "Q1: Largest planet? [astronomy] Ans: Jupiter\n").unwrap();

        let state = state();
        let report = ingest_document(&state, &path, Some(2)).unwrap();
        assert_eq!(report.entries[0].question, "Q1: Largest planet?");
        assert_eq!(report.document.topic_type_code, Some(2));

        let missing = ingest_document(&state, &dir.path().join("missing.pdf"), None).unwrap_err();
        assert!(matches!(missing, Error::ExtractionFailure { .. }));
    }

    #[test]
    fn test_failed_tag_does_not_block_entries() {
        let state = state_with_store(Arc::new(RejectingTagStore::new("geography")));
        let report = ingest_text(&state, DOC, "quiz.txt", None).unwrap();

        assert_eq!(report.failed_tags, vec!["geography"]);
        assert_eq!(report.registered_tags, vec!["arithmetic", "math"]);
        assert_eq!(report.entries.len(), 2);

        let stored = state.store.get_entry(&report.entries[1].id).unwrap().unwrap();
        assert_eq!(stored.tags, vec!["geography"]);
        assert_eq!(
            state
                .store
                .find_entries(&EntryFilter::by_tag("geography"))
                .unwrap()
                .len(),
            1
        );
    }
}
