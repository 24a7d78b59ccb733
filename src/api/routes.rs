//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::PipelineError;
use crate::workflow::{RunReport, Workflow};
use crate::workflows::{
    community_rewards, community_summary, community_tasks, message_reward, Collaborators,
    Pipelines,
};

/// Shared application state.
pub struct AppState {
    pub pipelines: Pipelines,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub workflows: Vec<&'static str>,
}

type ApiError = (StatusCode, String);

/// Build the router over already-constructed pipelines.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/workflows/:name", post(run_workflow))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let collaborators = Collaborators::from_config(&config);
    let pipelines = Pipelines::build(&collaborators, config.step_timeout)?;
    let app = router(Arc::new(AppState { pipelines }));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, finishing in-flight runs");
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        workflows: vec![
            message_reward::NAME,
            community_rewards::NAME,
            community_tasks::NAME,
            community_summary::NAME,
        ],
    })
}

async fn run_workflow(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let pipelines = &state.pipelines;
    let report = match name.as_str() {
        message_reward::NAME => trigger_run(&pipelines.message_reward, body).await?,
        community_rewards::NAME => trigger_run(&pipelines.community_rewards, body).await?,
        community_tasks::NAME => trigger_run(&pipelines.community_tasks, body).await?,
        community_summary::NAME => trigger_run(&pipelines.community_summary, body).await?,
        other => {
            return Err((
                StatusCode::NOT_FOUND,
                format!("Workflow {} not found", other),
            ))
        }
    };
    Ok(Json(report.to_json()))
}

async fn trigger_run<T>(workflow: &Workflow<T>, body: Value) -> Result<RunReport, ApiError>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    let trigger: T = serde_json::from_value(body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("Invalid trigger for {}: {}", workflow.name(), e),
        )
    })?;
    workflow.run(trigger).await.map_err(|e| {
        tracing::error!("Workflow '{}' failed: {}", workflow.name(), e);
        (status_for(&e), e.to_string())
    })
}

/// HTTP status for a failed run.
pub fn status_for(error: &PipelineError) -> StatusCode {
    match error.root() {
        PipelineError::NotFound { .. } => StatusCode::NOT_FOUND,
        PipelineError::SchemaViolation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::ExternalService { .. }
        | PipelineError::SettlementFailure(_)
        | PipelineError::SettlementUnconfirmed { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_failed(source: PipelineError) -> PipelineError {
        PipelineError::StepFailed {
            step: "fetchMessage".to_string(),
            source: Box::new(source),
        }
    }

    #[test]
    fn test_status_mapping_uses_root_cause() {
        assert_eq!(
            status_for(&step_failed(PipelineError::not_found("message", "m-1"))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&step_failed(PipelineError::schema("identifyTasks", "bad json"))),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&PipelineError::external("wallet resolver", "503")),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&PipelineError::Configuration("missing".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_health_lists_workflows() {
        let Json(health) = health().await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.workflows.len(), 4);
        assert!(health.workflows.contains(&"community-tasks"));
    }
}
