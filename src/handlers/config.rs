use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Effective configuration with secrets redacted.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config().redacted();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::extractive_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_config_is_redacted() {
        let state = extractive_state();
        state.config.write().unwrap().speech.azure_key = "secret".to_string();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/v1/config", web::get().to(get_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/config").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["config"]["speech"]["azure_key"], "***");
        assert_eq!(body["config"]["rag"]["top_k_default"], 6);
        assert_eq!(body["config"]["generation"]["backend"], "llama");
    }
}
