// 辅导对话命令

use super::AppState;
use crate::error::{Error, Result};
use crate::models::{ChatHistory, ChatRole};
use crate::services::{ChatReply, ChatRequest};

fn require_student(student_id: &str) -> Result<()> {
    if student_id.trim().is_empty() {
        return Err(Error::InvalidRequest("student id is required".to_string()));
    }
    Ok(())
}

/// 向辅导老师发送一条消息并记录这一轮对话
///
/// 服务不可用时返回固定的提示回复，这一轮不写入记录。
pub async fn chat(
    state: &AppState,
    student_id: &str,
    message: &str,
    auth_token: Option<&str>,
) -> Result<ChatReply> {
    require_student(student_id)?;
    let message = message.trim();
    if message.is_empty() {
        return Err(Error::InvalidRequest("message is required".to_string()));
    }

    let request = ChatRequest {
        user_id: student_id.to_string(),
        message: message.to_string(),
        auth_token: auth_token.map(str::to_string),
    };
    let reply = match state.provider.chat(&request).await {
        Ok(reply) => reply,
        Err(e) => {
            log::warn!("Tutor chat for {} failed, using fallback reply: {}", student_id, e);
            return Ok(ChatReply::fallback());
        }
    };

    state
        .store
        .append_chat_message(student_id, ChatRole::User, message)?;
    state
        .store
        .append_chat_message(student_id, ChatRole::Assistant, &reply.response)?;
    Ok(reply)
}

/// 对话记录，没有时返回空记录
pub fn chat_history(state: &AppState, student_id: &str) -> Result<ChatHistory> {
    require_student(student_id)?;
    Ok(state
        .store
        .chat_history(student_id)?
        .unwrap_or_else(|| ChatHistory::empty(student_id)))
}

pub fn clear_chat_history(state: &AppState, student_id: &str) -> Result<bool> {
    require_student(student_id)?;
    let removed = state.store.clear_chat_history(student_id)?;
    log::info!("Cleared chat history for {} (existed: {})", student_id, removed);
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    use crate::commands::testing::state;
    use crate::config::AppConfig;
    use crate::services::{
        DatabaseService, Explanation, ExplanationRequest, FileTextExtractor, PracticeProvider,
        PracticeQuery, ProviderQuestion,
    };

    /// 把学生的话原样复述回去
    struct EchoTutor;

    #[async_trait]
    impl PracticeProvider for EchoTutor {
        async fn request_practice(&self, _query: &PracticeQuery) -> Result<Vec<ProviderQuestion>> {
            Ok(Vec::new())
        }

        async fn explain(&self, request: &ExplanationRequest) -> Explanation {
            Explanation::fallback(request)
        }

        async fn chat(&self, request: &ChatRequest) -> Result<ChatReply> {
            Ok(ChatReply {
                response: format!("You said: {}", request.message),
                related_tags: vec!["echo".to_string()],
                ..ChatReply::default()
            })
        }
    }

    fn tutor_state() -> AppState {
        AppState::new(
            AppConfig::default(),
            Arc::new(DatabaseService::open_in_memory().unwrap()),
            Arc::new(FileTextExtractor),
            Arc::new(EchoTutor),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_chat_records_exchange() {
        let state = tutor_state();
        assert!(chat_history(&state, "s1").unwrap().messages.is_empty());

        let reply = chat(&state, "s1", "  what is a prime?  ", None).await.unwrap();
        assert_eq!(reply.response, "You said: what is a prime?");
        chat(&state, "s1", "thanks", Some("token")).await.unwrap();

        let history = chat_history(&state, "s1").unwrap();
        assert_eq!(history.messages.len(), 4);
        assert_eq!(history.messages[0].role, ChatRole::User);
        assert_eq!(history.messages[0].content, "what is a prime?");
        assert_eq!(history.messages[1].role, ChatRole::Assistant);
        assert!(history.session_start.is_some());

        assert!(clear_chat_history(&state, "s1").unwrap());
        let cleared = chat_history(&state, "s1").unwrap();
        assert!(cleared.messages.is_empty());
        assert!(cleared.last_updated.is_none());
    }

    #[tokio::test]
    async fn test_chat_validates_input() {
        let state = tutor_state();
        assert!(matches!(
            chat(&state, "s1", "   ", None).await,
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            chat(&state, "", "hello", None).await,
            Err(Error::InvalidRequest(_))
        ));
        assert!(state.store.chat_history("s1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chat_falls_back_when_tutor_unavailable() {
        let state = state();
        let reply = chat(&state, "s1", "hello", None).await.unwrap();

        assert_eq!(reply, ChatReply::fallback());
        assert_eq!(reply.confidence_score, 0.0);
        assert!(chat_history(&state, "s1").unwrap().messages.is_empty());
    }
}
