// 练习组卷
// AI 结果非空时原样返回（不补题），否则整体退回本地题库抽样

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PracticeConfig;
use crate::error::{Error, Result};
use crate::models::{PracticeCandidate, PracticeSet, Provenance};
use crate::services::database::{EntryFilter, QuestionStore};
use crate::services::skillcoach::{PracticeProvider, PracticeQuery};

/// 判重用的题干键
fn question_key(question: &str) -> String {
    question.trim().to_lowercase()
}

pub struct PracticeSetAssembler {
    store: Arc<dyn QuestionStore>,
    provider: Arc<dyn PracticeProvider>,
    config: PracticeConfig,
    provider_timeout: Duration,
}

impl PracticeSetAssembler {
    pub fn new(
        store: Arc<dyn QuestionStore>,
        provider: Arc<dyn PracticeProvider>,
        config: PracticeConfig,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            config,
            provider_timeout,
        }
    }

    pub async fn assemble(
        &self,
        student_id: &str,
        tag: &str,
        desired_count: usize,
        auth_token: Option<&str>,
    ) -> Result<PracticeSet> {
        if desired_count == 0 {
            return Ok(PracticeSet {
                questions: Vec::new(),
                source: Provenance::Fallback,
                ai_count: 0,
                fallback_count: 0,
                pool_exhausted: false,
            });
        }

        let query = PracticeQuery {
            user_id: student_id.to_string(),
            tag: tag.to_string(),
            desired_count,
            auth_token: auth_token.map(str::to_string),
        };

        let ai_questions = self.request_ai(&query).await;
        if !ai_questions.is_empty() {
            log::info!(
                "Practice set for {} on {}: {} AI questions",
                student_id,
                tag,
                ai_questions.len()
            );
            return Ok(PracticeSet {
                ai_count: ai_questions.len(),
                questions: ai_questions,
                source: Provenance::Ai,
                fallback_count: 0,
                pool_exhausted: false,
            });
        }

        let questions = self.sample_fallback(tag, desired_count)?;
        let pool_exhausted = questions.len() < desired_count;
        if pool_exhausted {
            log::warn!(
                "Fallback pool for tag {} exhausted: {} of {} questions",
                tag,
                questions.len(),
                desired_count
            );
        }
        log::info!(
            "Practice set for {} on {}: {} fallback questions",
            student_id,
            tag,
            questions.len()
        );

        Ok(PracticeSet {
            fallback_count: questions.len(),
            questions,
            source: Provenance::Fallback,
            ai_count: 0,
            pool_exhausted,
        })
    }

    /// 调用 AI 服务；超时与传输失败都视为零结果
    async fn request_ai(&self, query: &PracticeQuery) -> Vec<PracticeCandidate> {
        let raw = match tokio::time::timeout(self.provider_timeout, self.provider.request_practice(query)).await {
            Ok(Ok(items)) => items,
            Ok(Err(e)) => {
                log::warn!("{}; falling back to local pool", e);
                return Vec::new();
            }
            Err(_) => {
                let e = Error::ProviderUnavailable(format!("timed out after {:?}", self.provider_timeout));
                log::warn!("{}; falling back to local pool", e);
                return Vec::new();
            }
        };

        let received = raw.len();
        let mut candidates: Vec<PracticeCandidate> = raw
            .into_iter()
            .filter_map(|item| item.into_candidate(&query.tag))
            .collect();
        if candidates.len() < received {
            log::warn!(
                "Discarded {} malformed provider questions",
                received - candidates.len()
            );
        }

        let distinct: HashSet<String> = candidates.iter().map(|c| question_key(&c.question)).collect();
        if distinct.len() < candidates.len() {
            log::warn!(
                "Provider response contains duplicates: {} questions, {} distinct",
                candidates.len(),
                distinct.len()
            );
        }

        candidates.truncate(query.desired_count);
        candidates
    }

    fn sample_fallback(&self, tag: &str, desired_count: usize) -> Result<Vec<PracticeCandidate>> {
        let sample_size = desired_count.saturating_mul(self.config.oversample_factor.max(1));
        let sample = self
            .store
            .sample_entries(&EntryFilter::by_tag(tag), sample_size)?;

        let mut seen = HashSet::new();
        let mut questions: Vec<PracticeCandidate> = sample
            .into_iter()
            .filter(|entry| seen.insert(question_key(&entry.question)))
            .map(PracticeCandidate::from_entry)
            .collect();
        questions.truncate(desired_count);
        Ok(questions)
    }
}
