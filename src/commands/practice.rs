// 练习与档案命令

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::AppState;
use crate::error::{Error, Result};
use crate::models::{
    AnswerResult, Difficulty, PracticeSet, QuestionEntry, ScoredAnswer, StudentProfile,
    SubmittedAnswer, TagMastery,
};
use crate::services::{is_correct, EntryFilter, PerformanceAggregator};

const DEFAULT_QUERY_LIMIT: usize = 10;

/// 练习提交结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeSubmission {
    pub results: Vec<AnswerResult>,
    pub tag: String,
    pub total_questions: usize,
    pub correct_answers: usize,
    pub performance: BTreeMap<String, TagMastery>,
}

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidRequest(format!("{} is required", field)));
    }
    Ok(())
}

/// 所有已注册的标签名，按字母排序
pub fn list_tags(state: &AppState) -> Result<Vec<String>> {
    Ok(state
        .store
        .list_tags()?
        .into_iter()
        .map(|tag| tag.name)
        .collect())
}

/// 按标签与难度列表查询题目
pub fn find_questions(
    state: &AppState,
    tag: Option<&str>,
    difficulties: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<QuestionEntry>> {
    let (Some(tag), Some(difficulties)) = (tag, difficulties) else {
        return Err(Error::InvalidRequest(
            "tag and difficulties are required".to_string(),
        ));
    };
    require(tag, "tag")?;

    let mut levels = Vec::new();
    for token in difficulties.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let level = Difficulty::from_token(token)
            .ok_or_else(|| Error::InvalidRequest(format!("unknown difficulty {:?}", token)))?;
        if !levels.contains(&level) {
            levels.push(level);
        }
    }
    if levels.is_empty() {
        return Err(Error::InvalidRequest("no valid difficulty provided".to_string()));
    }

    let filter = EntryFilter {
        tag: Some(tag.trim().to_string()),
        difficulties: levels,
        topic_type: None,
        limit: Some(limit.unwrap_or(DEFAULT_QUERY_LIMIT).max(1)),
    };
    state.store.find_entries(&filter)
}

/// 组一套练习题
pub async fn practice(
    state: &AppState,
    student_id: &str,
    tag: &str,
    count: Option<usize>,
    auth_token: Option<&str>,
) -> Result<PracticeSet> {
    require(student_id, "student id")?;
    require(tag, "tag")?;

    let desired = count.unwrap_or(state.config.practice.default_count);
    state
        .assembler()
        .assemble(student_id, tag, desired, auth_token)
        .await
}

/// 判分，返回展示结果与聚合用的作答
pub(crate) fn grade(entry: &QuestionEntry, student_answer: &str) -> (AnswerResult, ScoredAnswer) {
    let correct = is_correct(&entry.answer, student_answer);
    (
        AnswerResult {
            question: entry.question.clone(),
            correct_answer: entry.answer.clone(),
            student_answer: student_answer.to_string(),
            is_correct: correct,
        },
        ScoredAnswer {
            tags: entry.tags.clone(),
            is_correct: correct,
        },
    )
}

/// 提交练习作答；找不到的题目被跳过
pub fn submit_practice(
    state: &AppState,
    student_id: &str,
    tag: &str,
    answers: &[SubmittedAnswer],
) -> Result<PracticeSubmission> {
    require(student_id, "student id")?;
    require(tag, "tag")?;

    let mut results = Vec::with_capacity(answers.len());
    let mut scored = Vec::with_capacity(answers.len());
    for answer in answers {
        let Some(entry) = state.store.get_entry(&answer.question_id)? else {
            log::debug!("Skipping unknown question {}", answer.question_id);
            continue;
        };
        let (result, score) = grade(&entry, &answer.student_answer);
        results.push(result);
        scored.push(score);
    }

    let record = PerformanceAggregator::record_batch(state.store.as_ref(), student_id, &scored)?;

    Ok(PracticeSubmission {
        total_questions: results.len(),
        correct_answers: results.iter().filter(|r| r.is_correct).count(),
        results,
        tag: tag.to_string(),
        performance: record.mastery(),
    })
}

pub fn profile(state: &AppState, student_id: &str) -> Result<StudentProfile> {
    require(student_id, "student id")?;
    PerformanceAggregator::profile(state.store.as_ref(), student_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::ingest_text;
    use crate::commands::testing::state;
    use crate::models::Provenance;

    const DOC: &str = "Q1: 2+2? [math]{easy} Ans: 4\n\
                       Q2: 3*3? [math, multiplication]{medium} Ans: 9\n\
                       Q3: Prove it. [math]{hard} Ans: QED";

    #[test]
    fn test_find_questions_validates_input() {
        let state = state();
        ingest_text(&state, DOC, "doc", Some(1)).unwrap();

        assert!(matches!(
            find_questions(&state, Some("math"), None, None),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            find_questions(&state, Some("math"), Some("easy,extreme"), None),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            find_questions(&state, Some("math"), Some(" , "), None),
            Err(Error::InvalidRequest(_))
        ));

        let found = find_questions(&state, Some("math"), Some("easy, Medium"), None).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(
            find_questions(&state, Some("math"), Some("easy,medium,hard"), Some(0))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_list_tags_sorted() {
        let state = state();
        ingest_text(&state, DOC, "doc", Some(1)).unwrap();

        assert_eq!(list_tags(&state).unwrap(), vec!["math", "multiplication"]);
    }

    #[tokio::test]
    async fn test_practice_uses_fallback_pool() {
        let state = state();
        ingest_text(&state, DOC, "doc", Some(1)).unwrap();

        let set = practice(&state, "s1", "multiplication", None, None).await.unwrap();
        assert_eq!(set.source, Provenance::Fallback);
        assert_eq!(set.questions.len(), 1);
        assert!(set.pool_exhausted);

        assert!(matches!(
            practice(&state, "", "math", None, None).await,
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_submit_practice_grades_and_records() {
        let state = state();
        let report = ingest_text(&state, DOC, "doc", Some(1)).unwrap();
        let answers = vec![
            SubmittedAnswer {
                question_id: report.entries[0].id.clone(),
                student_answer: " 4 ".to_string(),
            },
            SubmittedAnswer {
                question_id: report.entries[1].id.clone(),
                student_answer: "6".to_string(),
            },
            SubmittedAnswer {
                question_id: "unknown".to_string(),
                student_answer: "x".to_string(),
            },
        ];

        let submission = submit_practice(&state, "s1", "math", &answers).unwrap();

        assert_eq!(submission.total_questions, 2);
        assert_eq!(submission.correct_answers, 1);
        assert_eq!(submission.performance["math"].total, 2);
        assert_eq!(submission.performance["math"].percentage, 50);
        assert_eq!(submission.performance["multiplication"].percentage, 0);

        let profile = profile(&state, "s1").unwrap();
        assert_eq!(profile.performance, submission.performance);
    }
}
