// SkillCoach 出题服务客户端
// 负责调用外部 AI 练习与讲解接口，并解析 APIOutput 响应结构

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::models::{PracticeCandidate, Provenance};

const API_OUTPUT_NAME: &str = "APIOutput";

/// 练习请求
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeQuery {
    pub user_id: String,
    pub tag: String,
    pub desired_count: usize,
    pub auth_token: Option<String>,
}

/// 服务返回的原始题目，字段都可能缺失或类型不对
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderQuestion {
    #[serde(default, alias = "_id")]
    pub id: Option<Value>,
    #[serde(default)]
    pub question: Option<Value>,
    #[serde(default)]
    pub answer: Option<Value>,
    #[serde(default)]
    pub tags: Option<Value>,
}

impl ProviderQuestion {
    /// 转为候选题；题干或答案不是非空字符串时返回 None
    pub fn into_candidate(self, requested_tag: &str) -> Option<PracticeCandidate> {
        let question = non_empty_text(self.question.as_ref())?;
        let answer = non_empty_text(self.answer.as_ref())?;

        let mut tags: Vec<String> = match self.tags {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|t| t.as_str())
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            Some(Value::String(csv)) => csv
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            _ => Vec::new(),
        };
        if tags.is_empty() {
            tags.push(requested_tag.to_string());
        }

        let id = match self.id {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        Some(PracticeCandidate {
            id,
            question,
            answer,
            tags,
            provenance: Provenance::Ai,
        })
    }
}

fn non_empty_text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// 讲解请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplanationRequest {
    pub user_id: String,
    pub question: String,
    pub user_answer: String,
    pub correct_answer: String,
    pub auth_token: Option<String>,
}

/// 讲解结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Explanation {
    pub explanation: Option<String>,
    pub common_mistakes: Vec<String>,
    pub concept: String,
    pub tips: Vec<String>,
}

impl Explanation {
    /// 服务失败时使用的本地讲解
    pub fn fallback(request: &ExplanationRequest) -> Self {
        Self {
            explanation: Some(format!(
                "The correct answer is \"{}\" for the question \"{}\". Your answer \"{}\" was incorrect.",
                request.correct_answer, request.question, request.user_answer
            )),
            common_mistakes: vec![
                "Calculation error".to_string(),
                "Misunderstanding the operation".to_string(),
            ],
            concept: "Review the underlying concept".to_string(),
            tips: vec![
                "Double-check your work".to_string(),
                "Practice similar problems".to_string(),
            ],
        }
    }

    fn from_output(output: &Value) -> Self {
        Self {
            explanation: output
                .get("explanation")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            common_mistakes: string_list(output.get("commonMistakes")),
            concept: output
                .get("concept")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            tips: string_list(output.get("tips")),
        }
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// 辅导对话请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub user_id: String,
    pub message: String,
    pub auth_token: Option<String>,
}

/// 辅导老师的回复
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub response: String,
    pub suggestions: Vec<String>,
    pub related_tags: Vec<String>,
    pub confidence_score: f64,
    pub follow_up_questions: Vec<String>,
}

impl ChatReply {
    /// 服务不可用时的固定回复
    pub fn fallback() -> Self {
        Self {
            response: "Sorry, I'm experiencing technical difficulties. Please try again.".to_string(),
            suggestions: vec![
                "Wait a moment and try again".to_string(),
                "Check your connection".to_string(),
            ],
            related_tags: Vec::new(),
            confidence_score: 0.0,
            follow_up_questions: Vec::new(),
        }
    }

    fn from_output(output: &Value) -> Option<Self> {
        let response = output
            .get("response")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|r| !r.is_empty())?;

        Some(Self {
            response: response.to_string(),
            suggestions: string_list(output.get("suggestions")),
            related_tags: string_list(output.get("relatedTags")),
            confidence_score: output
                .get("confidenceScore")
                .and_then(|v| v.as_f64())
                .unwrap_or_default(),
            follow_up_questions: string_list(output.get("followUpQuestions")),
        })
    }
}

/// AI 练习服务协作方
#[async_trait]
pub trait PracticeProvider: Send + Sync {
    /// 请求至多 `desired_count` 道练习题；传输失败返回 `ProviderUnavailable`
    async fn request_practice(&self, query: &PracticeQuery) -> Result<Vec<ProviderQuestion>>;

    /// 获取讲解，失败时返回本地讲解
    async fn explain(&self, request: &ExplanationRequest) -> Explanation;

    /// 与辅导老师对话；服务失败或回复为空时返回 `ProviderUnavailable`
    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply>;
}

/// 定位 `result.Output`：数组形式取名为 APIOutput 的元素，对象形式直接读取
pub fn find_output(body: &Value) -> Option<&Value> {
    match body {
        Value::Array(items) => items
            .iter()
            .find(|item| item.get("name").and_then(|n| n.as_str()) == Some(API_OUTPUT_NAME))
            .and_then(|item| item.pointer("/result/Output")),
        Value::Object(_) => body.pointer("/result/Output"),
        _ => None,
    }
}

/// 从响应体中取出题目列表，无法识别的元素被跳过
pub fn parse_practice_body(body: &Value) -> Vec<ProviderQuestion> {
    let Some(items) = find_output(body)
        .and_then(|output| output.get("questions"))
        .and_then(|q| q.as_array())
    else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| serde_json::from_value::<ProviderQuestion>(item.clone()).ok())
        .collect()
}

/// 讲解响应解析，兼容数组首元素与对象顶层字段两种写法
pub fn parse_explanation_body(body: &Value) -> Explanation {
    if let Some(output) = find_output(body) {
        return Explanation::from_output(output);
    }

    let item = match body {
        Value::Array(items) => match items.first() {
            Some(first) => first,
            None => return Explanation::default(),
        },
        Value::Object(_) => body,
        _ => return Explanation::default(),
    };

    match item.pointer("/result/Output") {
        Some(output) if item.get("explanation").is_none() => Explanation::from_output(output),
        _ => Explanation::from_output(item),
    }
}

/// 对话响应解析：APIOutput 包装或顶层字段，缺少 response 时返回 None
pub fn parse_chat_body(body: &Value) -> Option<ChatReply> {
    if let Some(reply) = find_output(body).and_then(ChatReply::from_output) {
        return Some(reply);
    }

    match body {
        Value::Array(items) => items.first().and_then(ChatReply::from_output),
        Value::Object(_) => ChatReply::from_output(body),
        _ => None,
    }
}

/// HTTP 客户端
pub struct SkillCoachClient {
    http_client: reqwest::Client,
    config: ProviderConfig,
}

impl SkillCoachClient {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn post_json(
        &self,
        url: &str,
        payload: &impl Serialize,
        timeout: std::time::Duration,
    ) -> Result<Value> {
        let mut request = self.http_client.post(url).json(payload).timeout(timeout);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ProviderUnavailable(format!(
                "{} responded with status {}",
                url, status
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("invalid response body: {}", e)))
    }
}

#[async_trait]
impl PracticeProvider for SkillCoachClient {
    async fn request_practice(&self, query: &PracticeQuery) -> Result<Vec<ProviderQuestion>> {
        let Some(endpoint) = self.config.endpoint.as_deref() else {
            log::info!("No practice endpoint configured, skipping provider");
            return Ok(Vec::new());
        };

        log::debug!(
            "Requesting {} practice questions on {} for {}",
            query.desired_count,
            query.tag,
            query.user_id
        );
        let body = self.post_json(endpoint, query, self.config.timeout()).await?;
        let questions = parse_practice_body(&body);
        log::debug!("Provider returned {} questions", questions.len());
        Ok(questions)
    }

    async fn explain(&self, request: &ExplanationRequest) -> Explanation {
        let Some(endpoint) = self.config.resolved_explanation_endpoint() else {
            log::info!("No explanation endpoint configured");
            return Explanation::default();
        };

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Payload<'a> {
            #[serde(flatten)]
            request: &'a ExplanationRequest,
            request_type: &'static str,
        }

        let payload = Payload {
            request,
            request_type: "explanation",
        };

        match self
            .post_json(&endpoint, &payload, self.config.explanation_timeout())
            .await
        {
            Ok(body) => parse_explanation_body(&body),
            Err(e) => {
                log::warn!("Explanation request failed, using fallback: {}", e);
                Explanation::fallback(request)
            }
        }
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply> {
        let Some(endpoint) = self.config.resolved_chat_endpoint() else {
            return Err(Error::ProviderUnavailable(
                "no tutor endpoint configured".to_string(),
            ));
        };

        log::debug!("Sending tutor message for {}", request.user_id);
        let body = self
            .post_json(&endpoint, request, self.config.chat_timeout())
            .await?;
        parse_chat_body(&body)
            .ok_or_else(|| Error::ProviderUnavailable("tutor reply has no response".to_string()))
    }
}
