use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /api/v1/config`: the effective configuration after files and environment.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": config.server,
            "transcoder": config.transcoder,
            "engine": config.engine,
            "workspace": {
                "root": config.workspace_root(),
                "prefix": config.workspace.prefix
            },
            "performance": config.performance
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_config_shows_effective_values() {
        let mut config = AppConfig::default();
        config.engine.backend = "command".to_string();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::from_config(config)))
                .route("/config", web::get().to(get_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/config").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["config"]["engine"]["backend"], "command");
        assert_eq!(body["config"]["transcoder"]["program"], "ffmpeg");
        assert_eq!(body["config"]["performance"]["max_concurrent_jobs"], 2);
        assert!(body["config"]["workspace"]["root"].as_str().is_some());
    }
}
