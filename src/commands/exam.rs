// 测验命令

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::practice::grade;
use super::AppState;
use crate::error::{Error, Result};
use crate::models::{AnswerResult, ExamQuestion, StudentProfile, SubmittedAnswer};
use crate::services::{aggregate, EntryFilter, PerformanceAggregator};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamQuestionDto {
    pub id: String,
    pub question: String,
}

/// 新建测验的返回
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamStart {
    pub exam_id: String,
    pub questions: Vec<ExamQuestionDto>,
}

/// 测验提交结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamSubmission {
    pub exam_id: String,
    pub results: Vec<AnswerResult>,
    pub profile: StudentProfile,
}

/// 随机抽题组成一次测验
pub fn start_exam(state: &AppState, student_id: &str) -> Result<ExamStart> {
    if student_id.trim().is_empty() {
        return Err(Error::InvalidRequest("student id is required".to_string()));
    }

    let filter = EntryFilter::by_topic_type(state.config.exam.topic_type);
    let entries = state.store.sample_entries(&filter, state.config.exam.size)?;
    if entries.is_empty() {
        return Err(Error::NotFound(format!(
            "no questions of topic type {}",
            state.config.exam.topic_type
        )));
    }

    let entry_ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
    let exam = state.store.create_exam(student_id, &entry_ids)?;
    log::info!(
        "Started exam {} for {} with {} questions",
        exam.id,
        student_id,
        entries.len()
    );

    Ok(ExamStart {
        exam_id: exam.id,
        questions: entries
            .into_iter()
            .map(|e| ExamQuestionDto {
                id: e.id,
                question: e.question,
            })
            .collect(),
    })
}

/// 判分、保存作答并累计掌握度；只统计属于本次测验的题目
///
/// 认领测验、写入作答与累加统计在存储层的同一个事务里完成，重复或并发的提交只有一次生效。
pub fn submit_exam(
    state: &AppState,
    exam_id: &str,
    student_id: &str,
    answers: &[SubmittedAnswer],
) -> Result<ExamSubmission> {
    let exam = state
        .store
        .get_exam(exam_id)?
        .filter(|exam| exam.student_id == student_id)
        .ok_or_else(|| Error::NotFound(format!("exam {} for student {}", exam_id, student_id)))?;
    if exam.completed {
        return Err(Error::ExamAlreadyCompleted(exam.id));
    }

    let members: HashSet<String> = state
        .store
        .exam_questions(&exam.id)?
        .into_iter()
        .map(|q| q.entry_id)
        .collect();

    let mut results = Vec::new();
    let mut scored = Vec::new();
    let mut stored_answers = Vec::new();
    for answer in answers {
        if !members.contains(&answer.question_id) {
            log::debug!("Question {} is not part of exam {}", answer.question_id, exam.id);
            continue;
        }
        let Some(entry) = state.store.get_entry(&answer.question_id)? else {
            continue;
        };

        let (result, score) = grade(&entry, &answer.student_answer);
        stored_answers.push(ExamQuestion {
            exam_id: exam.id.clone(),
            entry_id: entry.id.clone(),
            student_answer: Some(answer.student_answer.clone()),
            is_correct: result.is_correct,
        });
        results.push(result);
        scored.push(score);
    }

    let deltas = aggregate(&scored);
    state
        .store
        .submit_exam(&exam.id, student_id, &stored_answers, &deltas)?;
    log::info!(
        "Submitted exam {} for {}: {} of {} correct",
        exam.id,
        student_id,
        results.iter().filter(|r| r.is_correct).count(),
        results.len()
    );
    let profile = PerformanceAggregator::profile(state.store.as_ref(), student_id)?;

    Ok(ExamSubmission {
        exam_id: exam.id,
        results,
        profile,
    })
}
