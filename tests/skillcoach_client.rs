use mockito::{Matcher, Server};
use serde_json::json;

use skillcoach::config::ProviderConfig;
use skillcoach::models::Provenance;
use skillcoach::services::{
    ChatRequest, Explanation, ExplanationRequest, PracticeProvider, PracticeQuery,
    SkillCoachClient,
};
use skillcoach::Error;

fn client_for(server: &Server, api_key: Option<&str>) -> SkillCoachClient {
    SkillCoachClient::new(ProviderConfig {
        endpoint: Some(format!("{}/api/practice-by-tag", server.url())),
        api_key: api_key.map(str::to_string),
        timeout_ms: 2_000,
        explanation_timeout_ms: 2_000,
        chat_timeout_ms: 2_000,
        ..ProviderConfig::default()
    })
}

fn query() -> PracticeQuery {
    PracticeQuery {
        user_id: "student-1".to_string(),
        tag: "math".to_string(),
        desired_count: 3,
        auth_token: Some("token".to_string()),
    }
}

fn explanation_request() -> ExplanationRequest {
    ExplanationRequest {
        user_id: "student-1".to_string(),
        question: "What is 2+2?".to_string(),
        user_answer: "5".to_string(),
        correct_answer: "4".to_string(),
        auth_token: None,
    }
}

#[tokio::test]
async fn test_practice_array_envelope() {
    let mut server = Server::new_async().await;
    let body = json!([
        { "name": "Classifier", "result": { "Output": { "questions": [] } } },
        { "name": "APIOutput", "result": { "Output": { "questions": [
            { "_id": "ai-1", "question": "What is 2+2?", "answer": "4", "tags": ["math"] },
            { "question": "What is 3+3?", "answer": "6", "tags": ["math"] },
            { "question": "broken" }
        ]}}}
    ]);
    let mock = server
        .mock("POST", "/api/practice-by-tag")
        .match_header("authorization", "Bearer secret")
        .match_body(Matcher::PartialJson(json!({
            "userId": "student-1",
            "tag": "math",
            "desiredCount": 3,
            "authToken": "token"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await;

    let questions = client_for(&server, Some("secret"))
        .request_practice(&query())
        .await
        .unwrap();
    mock.assert_async().await;

    assert_eq!(questions.len(), 3);
    let candidates: Vec<_> = questions
        .into_iter()
        .filter_map(|q| q.into_candidate("math"))
        .collect();
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].id.as_deref(), Some("ai-1"));
    assert_eq!(candidates[0].provenance, Provenance::Ai);
}

#[tokio::test]
async fn test_practice_object_envelope() {
    let mut server = Server::new_async().await;
    let body = json!({ "result": { "Output": { "questions": [
        { "question": "Define a loop", "answer": "Repetition" }
    ]}}});
    server
        .mock("POST", "/api/practice-by-tag")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await;

    let questions = client_for(&server, None)
        .request_practice(&query())
        .await
        .unwrap();
    assert_eq!(questions.len(), 1);
}

#[tokio::test]
async fn test_practice_server_error_is_unavailable() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/practice-by-tag")
        .with_status(500)
        .with_body("internal error")
        .create_async()
        .await;

    let err = client_for(&server, None)
        .request_practice(&query())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProviderUnavailable(_)));
}

#[tokio::test]
async fn test_explanation_uses_derived_endpoint() {
    let mut server = Server::new_async().await;
    let body = json!([{ "name": "APIOutput", "result": { "Output": {
        "explanation": "2+2 is 4",
        "commonMistakes": ["Off by one"],
        "concept": "Addition",
        "tips": ["Count on fingers"]
    }}}]);
    let mock = server
        .mock("POST", "/api/getExplanationForQuestion")
        .match_body(Matcher::PartialJson(json!({
            "question": "What is 2+2?",
            "userAnswer": "5",
            "correctAnswer": "4",
            "requestType": "explanation"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await;

    let explanation = client_for(&server, None).explain(&explanation_request()).await;
    mock.assert_async().await;

    assert_eq!(explanation.explanation.as_deref(), Some("2+2 is 4"));
    assert_eq!(explanation.concept, "Addition");
    assert_eq!(explanation.common_mistakes, vec!["Off by one"]);
}

#[tokio::test]
async fn test_explanation_failure_falls_back() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/getExplanationForQuestion")
        .with_status(503)
        .create_async()
        .await;

    let request = explanation_request();
    let explanation = client_for(&server, None).explain(&request).await;

    assert_eq!(explanation, Explanation::fallback(&request));
    assert!(explanation.explanation.unwrap().contains("\"4\""));
}

fn chat_request() -> ChatRequest {
    ChatRequest {
        user_id: "student-1".to_string(),
        message: "Why is 7 prime?".to_string(),
        auth_token: Some("token".to_string()),
    }
}

#[tokio::test]
async fn test_chat_uses_derived_endpoint() {
    let mut server = Server::new_async().await;
    let body = json!([{ "name": "APIOutput", "result": { "Output": {
        "response": "7 has no divisors other than 1 and itself.",
        "suggestions": ["Try 9"],
        "relatedTags": ["primes"],
        "confidenceScore": 0.9,
        "followUpQuestions": ["Is 9 prime?"]
    }}}]);
    let mock = server
        .mock("POST", "/api/chatWithTutor")
        .match_header("authorization", "Bearer secret")
        .match_body(Matcher::PartialJson(json!({
            "userId": "student-1",
            "message": "Why is 7 prime?",
            "authToken": "token"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await;

    let reply = client_for(&server, Some("secret"))
        .chat(&chat_request())
        .await
        .unwrap();
    mock.assert_async().await;

    assert_eq!(reply.response, "7 has no divisors other than 1 and itself.");
    assert_eq!(reply.related_tags, vec!["primes"]);
    assert_eq!(reply.follow_up_questions, vec!["Is 9 prime?"]);
}

#[tokio::test]
async fn test_chat_errors_are_unavailable() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/chatWithTutor")
        .with_status(500)
        .create_async()
        .await;
    let err = client_for(&server, None).chat(&chat_request()).await.unwrap_err();
    assert!(matches!(err, Error::ProviderUnavailable(_)));

    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/chatWithTutor")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "status": "ok" }).to_string())
        .create_async()
        .await;
    let err = client_for(&server, None).chat(&chat_request()).await.unwrap_err();
    assert!(matches!(err, Error::ProviderUnavailable(_)));
}
