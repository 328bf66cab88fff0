//! HTTP server assembly.

use axum::Router;
use axum::routing::{get, post};
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

use codeforge::chat::LLMClient;

use crate::api;
use crate::chat::ChatService;
use crate::config::AgentConfig;
use crate::error::AgentResult;
use crate::project::Project;
use crate::rag::RAGIndex;
use crate::status::StatusManager;
use crate::tasks::BackgroundTasks;

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

/// Shared state behind every handler.
pub struct AppState {
    pub service: Arc<ChatService>,
    pub project: Arc<Project>,
    pub config: AgentConfig,
    pub status: Arc<StatusManager>,
    pub tasks: BackgroundTasks,
    pub rag: Arc<dyn RAGIndex>,
    pub shutdown: watch::Sender<bool>,
}

/// The assembled server for one project.
pub struct AgentServer {
    state: Arc<AppState>,
}

impl AgentServer {
    pub fn new(
        project: Arc<Project>,
        config: AgentConfig,
        llm: Arc<dyn LLMClient>,
        rag: Arc<dyn RAGIndex>,
    ) -> AgentResult<Self> {
        let status = Arc::new(StatusManager::new(project.status_path()));
        status.detect_crash();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let service = Arc::new(ChatService::new(
            project.clone(),
            config.clone(),
            llm,
            rag.clone(),
            shutdown_rx,
        ));

        Ok(Self {
            state: Arc::new(AppState {
                service,
                project,
                config,
                status,
                tasks: BackgroundTasks::new(),
                rag,
                shutdown: shutdown_tx,
            }),
        })
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/chat", post(api::chat::chat))
            .route("/api/dialogs", get(api::dialogs::list).post(api::dialogs::create))
            .route(
                "/api/dialogs/current",
                get(api::dialogs::current).patch(api::dialogs::set_current),
            )
            .route(
                "/api/dialogs/{id}",
                get(api::dialogs::get)
                    .patch(api::dialogs::patch)
                    .delete(api::dialogs::delete),
            )
            .route("/api/dialogs/{id}/history", get(api::history::get))
            .route("/api/dialogs/{id}/checkpoints", get(api::checkpoints::list))
            .route("/api/dialogs/{id}/restore", post(api::checkpoints::restore))
            .route("/api/dialogs/{id}/approve", post(api::checkpoints::approve))
            .route("/api/dialogs/{id}/reset", post(api::checkpoints::reset))
            .route("/api/dialogs/{id}/session", get(api::checkpoints::session_status))
            .route("/health", get(api::health::get))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind and serve until ctrl-c, then drain background work.
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let state = self.state.clone();
        state.status.set_starting();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();
        state.status.set_running(port);
        info!("server listening on http://{}", listener.local_addr()?);

        let app = self.router();
        let shutdown_state = state.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown signal received, abandoning in-flight streams");
                let _ = shutdown_state.shutdown.send(true);
            })
            .await?;

        state.tasks.shutdown(SHUTDOWN_DRAIN).await;
        state.status.set_stopped();
        Ok(())
    }
}
