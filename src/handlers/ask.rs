use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::time::Instant;

/// Body of `POST /api/v1/ask`. Omitted limits fall back to the `rag` settings.
#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub query: String,
    pub top_k: Option<usize>,
    pub max_ctx_chars: Option<usize>,
}

/// Answer a typed question with the same pipeline the voice session uses.
pub async fn ask(state: web::Data<AppState>, body: web::Json<AskRequest>) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();
    let query = request.query.trim();
    if query.is_empty() {
        return Err(AppError::ValidationError("query must not be empty".to_string()));
    }
    if request.max_ctx_chars == Some(0) {
        return Err(AppError::ValidationError("max_ctx_chars must be greater than 0".to_string()));
    }

    let config = state.get_config();
    let top_k = request.top_k.unwrap_or(config.rag.top_k_default);
    let max_ctx_chars = request.max_ctx_chars.unwrap_or(config.rag.max_ctx_chars);

    let start_time = Instant::now();
    let result = state.composer.answer(query, top_k, max_ctx_chars).await;
    state.record_answer(result.outcome, start_time.elapsed().as_millis() as u64);

    Ok(HttpResponse::Ok().json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::extractive_state;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::json;

    #[actix_web::test]
    async fn test_ask_returns_answer_result() {
        let state = extractive_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/api/v1/ask", web::post().to(ask)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/ask")
            .set_json(json!({ "query": "first", "top_k": 2 }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["outcome"], "extractive");
        assert_eq!(body["backend"], "extractive");
        assert_eq!(body["retrieved"], 2);
        assert_eq!(body["sources"].as_array().unwrap().len(), 2);
        assert_eq!(body["sources"][0]["law_title"], "نظام رقم 0");
        assert!(body["answer"].as_str().unwrap().contains("نص المادة 0"));

        assert_eq!(state.get_metrics_snapshot().answers.extractive, 1);
    }

    #[actix_web::test]
    async fn test_ask_uses_configured_top_k() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(extractive_state()))
                .route("/api/v1/ask", web::post().to(ask)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/ask")
            .set_json(json!({ "query": "middle" }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["retrieved"], 6);
        assert_eq!(body["sources"].as_array().unwrap().len(), 3);
    }

    #[actix_web::test]
    async fn test_blank_query_rejected() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(extractive_state()))
                .route("/api/v1/ask", web::post().to(ask)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/ask")
            .set_json(json!({ "query": "   " }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "validation_error");
    }
}
