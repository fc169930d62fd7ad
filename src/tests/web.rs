use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::config::IndexScope;
use crate::explain::{ExplainError, ExplanationProvider, PLACEHOLDER};
use crate::web::{router, SharedState};

use super::*;

struct FixedExplainer;

impl ExplanationProvider for FixedExplainer {
    fn explain(&self, _job_description: &str, resume_text: &str) -> Result<String, ExplainError> {
        Ok(format!("fits because: {resume_text}"))
    }
}

struct DownExplainer;

impl ExplanationProvider for DownExplainer {
    fn explain(&self, _job_description: &str, _resume_text: &str) -> Result<String, ExplainError> {
        Err(ExplainError::Api {
            status: 503,
            message: "unavailable".to_string(),
        })
    }
}

fn app(scope: IndexScope, explainer: Arc<dyn ExplanationProvider>) -> Router {
    let state = SharedState {
        service: Arc::new(service(scope)),
        explainer,
    };
    router(state, 1024 * 1024)
}

fn file(filename: &str, body: &[u8]) -> Value {
    json!({ "filename": filename, "content": STANDARD.encode(body) })
}

async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };

    (status, value)
}

#[tokio::test]
async fn test_rank_endpoint() {
    let app = app(IndexScope::Session, Arc::new(FixedExplainer));
    let body = json!({
        "job_description": PYTHON_JOB,
        "files": [
            file("a.txt", PYTHON_RESUME.as_bytes()),
            file("broken.pdf", b"not a pdf"),
            file("b.txt", ACCOUNTANT_RESUME.as_bytes()),
        ],
    });

    let (status, value) = send(app, "POST", "/api/rank", Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    let results = value["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["id"], "a.txt");
    assert_eq!(results[0]["rank"], 1);

    let outcomes = value["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[1]["id"], "broken.pdf");
    assert_eq!(outcomes[1]["status"], "skipped");
    assert_eq!(outcomes[0]["status"], "indexed");
}

#[tokio::test]
async fn test_rank_top_k() {
    let app = app(IndexScope::Session, Arc::new(FixedExplainer));
    let body = json!({
        "job_description": PYTHON_JOB,
        "top_k": 1,
        "files": [
            file("a.txt", PYTHON_RESUME.as_bytes()),
            file("b.txt", ACCOUNTANT_RESUME.as_bytes()),
        ],
    });

    let (status, value) = send(app, "POST", "/api/rank", Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["results"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_rank_empty_job_is_bad_request() {
    let app = app(IndexScope::Session, Arc::new(FixedExplainer));
    let body = json!({
        "job_description": "  ",
        "files": [file("a.txt", PYTHON_RESUME.as_bytes())],
    });

    let (status, value) = send(app, "POST", "/api/rank", Some(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(value["error"].as_str().unwrap().contains("job description"));
}

#[tokio::test]
async fn test_rank_invalid_base64_file_is_skipped() {
    let app = app(IndexScope::Session, Arc::new(FixedExplainer));
    let body = json!({
        "job_description": PYTHON_JOB,
        "files": [
            file("a.txt", PYTHON_RESUME.as_bytes()),
            { "filename": "bad.txt", "content": "%%% not base64 %%%" },
            file("b.txt", ACCOUNTANT_RESUME.as_bytes()),
        ],
    });

    let (status, value) = send(app, "POST", "/api/rank", Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["results"].as_array().unwrap().len(), 2);
    let outcomes = value["outcomes"].as_array().unwrap();
    let ids: Vec<&str> = outcomes.iter().map(|o| o["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["a.txt", "bad.txt", "b.txt"]);
    assert_eq!(outcomes[1]["status"], "skipped");
    assert!(outcomes[1]["reason"].as_str().unwrap().contains("base64"));
}

#[tokio::test]
async fn test_rank_only_invalid_base64_is_unprocessable() {
    let app = app(IndexScope::Session, Arc::new(FixedExplainer));
    let body = json!({
        "job_description": PYTHON_JOB,
        "files": [{ "filename": "bad.txt", "content": "%%% not base64 %%%" }],
    });

    let (status, value) = send(app, "POST", "/api/rank", Some(body)).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(value["outcomes"][0]["id"], "bad.txt");
}

#[tokio::test]
async fn test_rank_declared_format() {
    let app = app(IndexScope::Session, Arc::new(FixedExplainer));
    let body = json!({
        "job_description": PYTHON_JOB,
        "files": [{
            "filename": "resume",
            "content": STANDARD.encode(PYTHON_RESUME),
            "format": "txt",
        }],
    });

    let (status, value) = send(app, "POST", "/api/rank", Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["results"][0]["id"], "resume");
    assert!(value["results"][0].get("text").is_none());
}

#[tokio::test]
async fn test_rank_nothing_usable_is_unprocessable() {
    let app = app(IndexScope::Session, Arc::new(FixedExplainer));
    let body = json!({
        "job_description": PYTHON_JOB,
        "files": [file("broken.pdf", b"garbage")],
    });

    let (status, value) = send(app, "POST", "/api/rank", Some(body)).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(value["outcomes"][0]["id"], "broken.pdf");
}

#[tokio::test]
async fn test_explain_endpoint() {
    let app = app(IndexScope::Session, Arc::new(FixedExplainer));
    let body = json!({ "job_description": PYTHON_JOB, "resume_text": "Python dev" });

    let (status, value) = send(app, "POST", "/api/explain", Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["explanation"], "fits because: Python dev");
    assert_eq!(value["degraded"], false);
}

#[tokio::test]
async fn test_explain_failure_degrades_to_placeholder() {
    let app = app(IndexScope::Session, Arc::new(DownExplainer));
    let body = json!({ "job_description": PYTHON_JOB, "resume_text": "Python dev" });

    let (status, value) = send(app, "POST", "/api/explain", Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["explanation"], PLACEHOLDER);
    assert_eq!(value["degraded"], true);
}

#[tokio::test]
async fn test_explain_by_indexed_id() {
    let app = app(IndexScope::Persistent, Arc::new(FixedExplainer));
    let rank = json!({
        "job_description": PYTHON_JOB,
        "files": [file("a.txt", PYTHON_RESUME.as_bytes())],
    });
    let (status, _) = send(app.clone(), "POST", "/api/rank", Some(rank)).await;
    assert_eq!(status, StatusCode::OK);

    let body = json!({ "job_description": PYTHON_JOB, "resume_id": "a.txt" });
    let (status, value) = send(app.clone(), "POST", "/api/explain", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["explanation"], format!("fits because: {PYTHON_RESUME}"));

    let body = json!({ "job_description": PYTHON_JOB, "resume_id": "missing.txt" });
    let (status, _) = send(app, "POST", "/api/explain", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_explain_requires_resume() {
    let app = app(IndexScope::Session, Arc::new(FixedExplainer));
    let body = json!({ "job_description": PYTHON_JOB });

    let (status, _) = send(app, "POST", "/api/explain", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_index_stats_and_clear() {
    let app = app(IndexScope::Persistent, Arc::new(FixedExplainer));
    let rank = json!({
        "job_description": PYTHON_JOB,
        "files": [
            file("a.txt", PYTHON_RESUME.as_bytes()),
            file("b.txt", ACCOUNTANT_RESUME.as_bytes()),
        ],
    });
    send(app.clone(), "POST", "/api/rank", Some(rank)).await;

    let (status, stats) = send(app.clone(), "GET", "/api/index", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["scope"], "persistent");
    assert_eq!(stats["entries"], 2);
    assert_eq!(stats["dimensions"], 384);
    assert_eq!(stats["model"], "hashing");

    let (status, cleared) = send(app.clone(), "POST", "/api/index/clear", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["removed"], 2);

    let (_, stats) = send(app, "GET", "/api/index", None).await;
    assert_eq!(stats["entries"], 0);
}

#[tokio::test]
async fn test_remove_indexed_resume() {
    let app = app(IndexScope::Persistent, Arc::new(FixedExplainer));
    let rank = json!({
        "job_description": PYTHON_JOB,
        "files": [
            file("a.txt", PYTHON_RESUME.as_bytes()),
            file("b.txt", ACCOUNTANT_RESUME.as_bytes()),
        ],
    });
    send(app.clone(), "POST", "/api/rank", Some(rank)).await;

    let (status, value) = send(app.clone(), "DELETE", "/api/index/a.txt", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["removed"], "a.txt");

    let (_, stats) = send(app.clone(), "GET", "/api/index", None).await;
    assert_eq!(stats["entries"], 1);

    let (status, _) = send(app, "DELETE", "/api/index/a.txt", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
