// 作答判分与掌握度累计

use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::models::{PerformanceRecord, ScoredAnswer, StudentProfile, TagDelta};
use crate::services::database::QuestionStore;

const ANSWER_PREFIX: &str = "Ans:";

/// 判断作答是否正确：去掉标准答案的 "Ans:" 前缀后，忽略首尾空白与大小写做完全匹配
pub fn is_correct(stored_answer: &str, submitted: &str) -> bool {
    let trimmed = stored_answer.trim_start();
    let expected = trimmed.strip_prefix(ANSWER_PREFIX).unwrap_or(trimmed);
    expected.trim().to_lowercase() == submitted.trim().to_lowercase()
}

/// 把一个批次按标签汇总；同一道题重复出现的标签只计一次
pub fn aggregate(answers: &[ScoredAnswer]) -> BTreeMap<String, TagDelta> {
    let mut deltas: BTreeMap<String, TagDelta> = BTreeMap::new();

    for answer in answers {
        let tags: BTreeSet<&str> = answer
            .tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        for tag in tags {
            let delta = deltas.entry(tag.to_string()).or_default();
            delta.attempted += 1;
            if answer.is_correct {
                delta.correct += 1;
            }
        }
    }

    deltas
}

pub struct PerformanceAggregator;

impl PerformanceAggregator {
    /// 汇总后一次性写入学生记录
    pub fn record_batch(
        store: &dyn QuestionStore,
        student_id: &str,
        answers: &[ScoredAnswer],
    ) -> Result<PerformanceRecord> {
        let deltas = aggregate(answers);
        let record = store.apply_performance(student_id, &deltas)?;
        log::debug!(
            "Recorded {} answers across {} tags for {}",
            answers.len(),
            deltas.len(),
            student_id
        );
        Ok(record)
    }

    /// 掌握度视图，没有记录时返回空表
    pub fn profile(store: &dyn QuestionStore, student_id: &str) -> Result<StudentProfile> {
        let record = store.performance_record(student_id)?;
        Ok(StudentProfile {
            student_id: student_id.to_string(),
            performance: record.as_ref().map(|r| r.mastery()).unwrap_or_default(),
            last_updated: record.map(|r| r.last_updated),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::DatabaseService;

    fn scored(tags: &[&str], is_correct: bool) -> ScoredAnswer {
        ScoredAnswer {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            is_correct,
        }
    }

    #[test]
    fn test_is_correct() {
        assert!(is_correct("Ans: 4", "4"));
        assert!(is_correct("  Paris ", "paris"));
        assert!(is_correct("Ans:Ans: x", "Ans: x"));
        assert!(!is_correct("4", "four"));
        assert!(!is_correct("42", "4"));
    }

    #[test]
    fn test_aggregate_groups_by_tag() {
        let deltas = aggregate(&[
            scored(&["tagA", "tagB"], true),
            scored(&["tagA"], false),
            scored(&["tagA", "tagA"], true),
        ]);

        assert_eq!(deltas["tagA"], TagDelta { attempted: 3, correct: 2 });
        assert_eq!(deltas["tagB"], TagDelta { attempted: 1, correct: 1 });
    }

    #[test]
    fn test_two_batches_accumulate() {
        let db = DatabaseService::open_in_memory().unwrap();
        PerformanceAggregator::record_batch(
            &db,
            "s1",
            &[
                scored(&["tagA"], true),
                scored(&["tagA"], false),
                scored(&["tagA", "tagB"], true),
            ],
        )
        .unwrap();
        let record = PerformanceAggregator::record_batch(
            &db,
            "s1",
            &[scored(&["tagA"], true), scored(&["tagA"], false)],
        )
        .unwrap();

        assert_eq!(record.attempted_by_tag["tagA"], 5);
        assert_eq!(record.attempted_by_tag["tagB"], 1);
        for (tag, correct) in &record.correct_by_tag {
            assert!(*correct <= record.attempted_by_tag[tag]);
        }
    }

    #[test]
    fn test_profile_percentages() {
        let db = DatabaseService::open_in_memory().unwrap();
        let empty = PerformanceAggregator::profile(&db, "nobody").unwrap();
        assert!(empty.performance.is_empty());
        assert!(empty.last_updated.is_none());

        PerformanceAggregator::record_batch(
            &db,
            "s1",
            &[
                scored(&["math"], true),
                scored(&["math"], true),
                scored(&["math"], true),
                scored(&["math"], false),
            ],
        )
        .unwrap();

        let profile = PerformanceAggregator::profile(&db, "s1").unwrap();
        assert_eq!(profile.performance["math"].percentage, 75);
        assert_eq!(profile.performance["math"].total, 4);
        assert!(profile.last_updated.is_some());
    }
}
