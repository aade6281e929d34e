use crate::application::Service;
use crate::server::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::sync::Arc;

pub const API_SERVICE_ID: &str = "api";

/// JSON request handling. Has no page capability, so page modules stay passive.
#[derive(Debug, Default)]
pub struct ApiService;

impl Service for ApiService {
    fn id(&self) -> &str {
        API_SERVICE_ID
    }
}

pub async fn health(State(state): State<AppState>) -> Response {
    match state.build_application(Arc::new(ApiService)) {
        Ok(app) => {
            app.complete_init();
            Json(json!({
                "status": "ok",
                "service": app.service().id(),
            }))
            .into_response()
        }
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// Declared modules and the names of the available application parameters.
pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    let modules: Vec<serde_json::Value> = state
        .host
        .modules
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "class": m.class,
                "properties": m.properties.keys().collect::<Vec<_>>(),
            })
        })
        .collect();
    let mut parameters: Vec<&String> = state.host.parameters.0.keys().collect();
    parameters.sort();
    Json(json!({
        "modules": modules,
        "parameters": parameters,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ParameterStore;
    use crate::config::{AppConfig, HostConfig, ModuleConfig};
    use crate::routing::FsPageSource;
    use std::path::PathBuf;

    fn state(host: HostConfig) -> AppState {
        let config = AppConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            page_root: PathBuf::from("/tmp/pages"),
            host_config: None,
            enable_cors: false,
        };
        let pages = Arc::new(FsPageSource::new(config.page_root.clone()));
        AppState::new(config, host, pages)
    }

    #[test]
    fn api_service_has_no_page_capability() {
        assert!(ApiService.as_page_service().is_none());
        assert_eq!(ApiService.id(), API_SERVICE_ID);
    }

    #[tokio::test]
    async fn config_lists_parameter_names_only() {
        let host = HostConfig {
            parameters: ParameterStore::new().with("GoogleAnalyticsMeasurementId", "G-SECRET"),
            modules: vec![ModuleConfig::new("ga", "gtag").with_property("MeasurementId", "G-1")],
        };
        let resp = get_config(State(state(host))).await.into_response();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["parameters"][0], "GoogleAnalyticsMeasurementId");
        assert_eq!(json["modules"][0]["id"], "ga");
        assert_eq!(json["modules"][0]["properties"][0], "MeasurementId");
        assert!(!json.to_string().contains("G-SECRET"));
    }
}
