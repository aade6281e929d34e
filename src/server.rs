use crate::api;
use crate::application::{Application, ModuleError, ParameterSource, Service};
use crate::config::{AppConfig, HostConfig};
use crate::page::{Page, PageService};
use crate::routing::{PageLookup, PageSource};
use axum::Router;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub host: Arc<HostConfig>,
    pub pages: Arc<dyn PageSource>,
}

impl AppState {
    pub fn new(config: AppConfig, host: HostConfig, pages: Arc<dyn PageSource>) -> Self {
        Self {
            config,
            host: Arc::new(host),
            pages,
        }
    }

    /// Builds the application for one request, loading every configured module.
    pub fn build_application(&self, service: Arc<dyn Service>) -> Result<Application, ModuleError> {
        let parameters: Arc<dyn ParameterSource> = Arc::new(self.host.parameters.clone());
        Application::builder(service)
            .parameters(parameters)
            .modules(self.host.modules.iter().cloned())
            .build()
    }
}

pub fn router(state: AppState) -> Router {
    let enable_cors = state.config.enable_cors;
    let router = Router::new()
        .route("/api/health", get(api::health))
        .route("/api/config", get(api::get_config))
        .fallback(serve_page)
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    if enable_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

pub async fn run(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(?err, "failed to listen for shutdown signal");
    }
}

async fn serve_page(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let path = uri.path().to_string();
    let html = match state.pages.load_page(&path).await {
        Ok(PageLookup::Found(html)) => html,
        Ok(PageLookup::NotFound) => return (StatusCode::NOT_FOUND, "page not found").into_response(),
        Err(err) => {
            warn!(%path, ?err, "failed to load page");
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    };

    let service = Arc::new(PageService::new());
    let app = match state.build_application(service.clone()) {
        Ok(app) => app,
        Err(err) => {
            error!(%path, %err, "failed to build application");
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    };
    app.complete_init();

    match service.run_page(Page::new(path.clone(), html)) {
        Ok(rendered) => Html(rendered).into_response(),
        Err(err) => {
            warn!(%path, %err, "page render failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}
