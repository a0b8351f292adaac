//! HTTP surface: query endpoints and health.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::Stream;
use futures::StreamExt;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use clearpath_core::error::ClearpathError;
use clearpath_core::pipeline::QueryPipeline;
use clearpath_core::types::QueryRequest;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<QueryPipeline>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/query", post(query))
        .route("/query/stream", post(query_stream))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_response(error: ClearpathError) -> (StatusCode, Json<Value>) {
    let status = match &error {
        ClearpathError::Llm(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "detail": error.to_string() })))
}

fn validate(request: &QueryRequest) -> Result<(), (StatusCode, Json<Value>)> {
    if request.question.trim().is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "detail": "question must not be empty" })),
        ));
    }
    Ok(())
}

async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Response {
    if let Err(rejection) = validate(&request) {
        return rejection.into_response();
    }
    match state.pipeline.answer(request).await {
        Ok(response) => Json(response).into_response(),
        Err(error) => error_response(error).into_response(),
    }
}

async fn query_stream(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Response {
    if let Err(rejection) = validate(&request) {
        return rejection.into_response();
    }

    let cancel = CancellationToken::new();
    let events = state.pipeline.answer_streaming(request, cancel.clone());

    // Dropping the response stream (client disconnect) drops the guard,
    // which cancels the in-flight generation.
    let guard = cancel.drop_guard();
    let stream: std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>> =
        Box::pin(ReceiverStream::new(events).map(move |event| {
            let _held = &guard;
            Ok(Event::default().data(event.to_wire().to_string()))
        }));

    (
        [("Cache-Control", "no-cache"), ("X-Accel-Buffering", "no")],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "segments": state.pipeline.segment_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, header};
    use clearpath_core::config::AppConfig;
    use clearpath_core::embedding::EmbeddingProvider;
    use clearpath_core::error::LlmError;
    use clearpath_core::index::CorpusIndex;
    use clearpath_core::memory::ConversationStore;
    use clearpath_core::provider::{ChatRequest, ChatResponse, LlmProvider};
    use clearpath_core::types::{Segment, SegmentKind, TokenUsage};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            Ok(vec![1.0, 0.0])
        }
    }

    struct FixedLlm;

    #[async_trait]
    impl LlmProvider for FixedLlm {
        async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, LlmError> {
            Ok(ChatResponse {
                content: "The Pro plan is $49 per month.".to_string(),
                usage: TokenUsage { input: 80, output: 10 },
            })
        }

        async fn complete_streaming(
            &self,
            _request: ChatRequest,
            tx: mpsc::Sender<String>,
            _cancel: CancellationToken,
        ) -> Result<TokenUsage, LlmError> {
            for token in ["The Pro plan ", "is $49 per month."] {
                if tx.send(token.to_string()).await.is_err() {
                    return Err(LlmError::Cancelled);
                }
            }
            Ok(TokenUsage { input: 80, output: 10 })
        }
    }

    fn test_app() -> Router {
        let config = Arc::new(AppConfig::default());
        let segments = vec![Segment {
            id: "pricing_1_0".to_string(),
            document: "pricing.md".to_string(),
            page: Some(1),
            text: "The Pro plan costs $49 per month.".to_string(),
            kind: SegmentKind::Prose,
            embedding: vec![1.0, 0.0],
        }];
        let index = Arc::new(CorpusIndex::from_segments(segments, 2).unwrap());
        let store = Arc::new(ConversationStore::new(config.memory.clone()));
        let pipeline = Arc::new(QueryPipeline::new(
            config,
            index,
            store,
            Arc::new(FixedEmbedder),
            Arc::new(FixedLlm),
        ));
        router(AppState { pipeline })
    }

    fn json_request(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = test_app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["segments"], 1);
    }

    #[tokio::test]
    async fn test_query_returns_answer_with_metadata() {
        let response = test_app()
            .oneshot(json_request("/query", json!({ "question": "What is the Pro plan price?" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["answer"], "The Pro plan is $49 per month.");
        assert_eq!(body["metadata"]["classification"], "simple");
        assert_eq!(body["metadata"]["chunks_retrieved"], 1);
        assert!(body["conversation_id"].as_str().unwrap().starts_with("conv_"));
        assert_eq!(body["sources"][0]["document"], "pricing.md");
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let response = test_app()
            .oneshot(json_request("/query", json!({ "question": "   " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_stream_emits_tokens_then_done() {
        let response = test_app()
            .oneshot(json_request(
                "/query/stream",
                json!({ "question": "What is the Pro plan price?" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            "text/event-stream"
        );
        assert_eq!(response.headers()["x-accel-buffering"], "no");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        let payloads: Vec<Value> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect();

        assert!(payloads.len() >= 2);
        let tokens: String = payloads
            .iter()
            .filter_map(|p| p["token"].as_str())
            .collect();
        assert_eq!(tokens, "The Pro plan is $49 per month.");

        let done = payloads.last().unwrap();
        assert_eq!(done["done"], true);
        assert_eq!(done["metadata"]["classification"], "simple");
        assert!(done["conversation_id"].as_str().unwrap().starts_with("conv_"));
    }

    #[tokio::test]
    async fn test_stream_rejects_empty_question() {
        let response = test_app()
            .oneshot(json_request("/query/stream", json!({ "question": "" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
