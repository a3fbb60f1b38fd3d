//! HTTP server implementation.
//!
//! Serves the task page, the htmx fragments it refreshes, and the JSON API
//! the page's scripts call.

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::render::{render_counts, render_forest};
use super::templates;
use crate::config::Config;
use crate::db::Database;
use crate::db::tasks::{Completion, TaskUpdate};
use crate::error::{ApiError, ApiResult};
use crate::recurrence::Recurrence;
use crate::types::{NewTask, Priority, Task, TaskTree};

/// Server state shared across handlers.
#[derive(Clone)]
pub struct TodoServer {
    /// Reference to the task database.
    db: Arc<Database>,
    /// Whether tree views hide completed tasks when the request doesn't say.
    hide_completed_default: bool,
}

impl TodoServer {
    /// Create a new server state.
    pub fn new(db: Arc<Database>, hide_completed_default: bool) -> Self {
        Self {
            db,
            hide_completed_default,
        }
    }

    /// Get the database reference.
    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    fn hide_completed(&self, requested: Option<&str>) -> bool {
        match requested {
            Some(s) if !s.is_empty() => s == "true" || s == "1",
            _ => self.hide_completed_default,
        }
    }
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint.
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Root endpoint - serves the task page.
async fn root() -> Html<&'static str> {
    Html(templates::INDEX_TEMPLATE)
}

/// Query parameters for tree views.
#[derive(Debug, Deserialize)]
struct TreeParams {
    /// "true"/"1" hides completed tasks; absent uses the configured default.
    hide_completed: Option<String>,
}

/// Flat task list, newest first.
async fn api_list_tasks(State(state): State<TodoServer>) -> ApiResult<Json<Vec<Task>>> {
    Ok(Json(state.db().list_tasks()?))
}

/// Assembled task forest.
async fn api_task_tree(
    State(state): State<TodoServer>,
    Query(params): Query<TreeParams>,
) -> ApiResult<Json<Vec<TaskTree>>> {
    let hide = state.hide_completed(params.hide_completed.as_deref());
    Ok(Json(state.db().task_tree(hide)?))
}

/// Task rows for htmx - returns HTML fragment.
async fn api_tasks_fragment(
    State(state): State<TodoServer>,
    Query(params): Query<TreeParams>,
) -> Html<String> {
    let hide = state.hide_completed(params.hide_completed.as_deref());
    match state.db().task_tree(hide) {
        Ok(forest) => Html(render_forest(&forest)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to load task tree");
            Html(r#"<div class="empty-state">Failed to load tasks</div>"#.to_string())
        }
    }
}

/// Header counts for htmx - returns HTML fragment.
async fn api_stats(State(state): State<TodoServer>) -> Html<String> {
    Html(render_counts(state.db().task_counts().unwrap_or_default()))
}

/// Body for task creation. `repeat` is the UI preset and may stand in for
/// an explicit `recurrence`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskRequest {
    #[serde(flatten)]
    task: NewTask,
    repeat: Option<String>,
}

/// Create a task.
async fn api_create_task(
    State(state): State<TodoServer>,
    Json(body): Json<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let mut input = body.task;
    if let Some(preset) = body.repeat.as_deref() {
        let preset_rule = parse_repeat(preset)?;
        if input.recurrence.is_some() && preset_rule.is_some() {
            return Err(ApiError::invalid_value(
                "repeat",
                "Give either repeat or recurrence, not both",
            ));
        }
        input.recurrence = input.recurrence.or(preset_rule);
    }
    let task = state.db().create_task(input)?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// Get a single task.
async fn api_get_task(
    State(state): State<TodoServer>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<Task>> {
    state
        .db()
        .get_task(&task_id)?
        .map(Json)
        .ok_or_else(|| ApiError::task_not_found(&task_id))
}

/// Distinguish a missing field (`None`) from an explicit `null` (`Some(None)`).
fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// Partial update. Absent fields are left alone; `dueDate: null` and
/// `recurrence: null` clear the schedule.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskPatch {
    is_completed: Option<bool>,
    title: Option<String>,
    priority: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    due_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    recurrence: Option<Option<Recurrence>>,
    repeat: Option<String>,
}

fn parse_repeat(preset: &str) -> ApiResult<Option<Recurrence>> {
    Recurrence::from_preset(preset).map_err(|reason| ApiError::invalid_value("repeat", reason))
}

fn parse_priority(priority: &str) -> ApiResult<Priority> {
    Priority::parse(priority).ok_or_else(|| {
        ApiError::invalid_value(
            "priority",
            format!("Unknown priority '{}'. Expected Low, Medium or High", priority),
        )
    })
}

impl TaskPatch {
    /// Parse every field up front so a rejected patch writes nothing.
    fn into_update(self) -> ApiResult<TaskUpdate> {
        let priority = self.priority.as_deref().map(parse_priority).transpose()?;
        let recurrence = match (self.recurrence, self.repeat.as_deref()) {
            (Some(_), Some(_)) => {
                return Err(ApiError::invalid_value(
                    "repeat",
                    "Give either repeat or recurrence, not both",
                ));
            }
            (Some(rule), None) => Some(rule),
            (None, Some(preset)) => Some(parse_repeat(preset)?),
            (None, None) => None,
        };
        Ok(TaskUpdate {
            title: self.title,
            priority,
            due_date: self.due_date,
            recurrence,
            is_completed: self.is_completed,
        })
    }
}

/// Update a task. Details and schedule are applied before completion so a
/// recurring task completed in the same request rolls over from its new due date.
async fn api_update_task(
    State(state): State<TodoServer>,
    Path(task_id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> ApiResult<Json<Completion>> {
    let update = patch.into_update()?;
    Ok(Json(state.db().update_task(&task_id, update)?))
}

/// Response for deletions.
#[derive(Debug, Serialize)]
struct DeleteResponse {
    deleted: usize,
}

/// Delete a task and its subtasks.
async fn api_delete_task(
    State(state): State<TodoServer>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    let deleted = state.db().delete_task(&task_id)?;
    Ok(Json(DeleteResponse { deleted }))
}

/// Body for sibling reordering.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReorderRequest {
    parent_id: Option<String>,
    ordered_ids: Vec<String>,
}

/// Persist the sibling order produced by drag-and-drop.
async fn api_reorder(
    State(state): State<TodoServer>,
    Json(body): Json<ReorderRequest>,
) -> ApiResult<StatusCode> {
    let parent_id = body.parent_id.as_deref().filter(|p| !p.is_empty());
    state.db().reorder_siblings(parent_id, &body.ordered_ids)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Build the router with all routes.
pub fn build_router(state: TodoServer) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Page routes
        .route("/", get(root))
        // htmx fragment routes
        .route("/api/stats", get(api_stats))
        .route("/api/tasks/fragment", get(api_tasks_fragment))
        // JSON API
        .route("/api/tasks", get(api_list_tasks).post(api_create_task))
        .route("/api/tasks/tree", get(api_task_tree))
        .route("/api/tasks/reorder", post(api_reorder))
        .route(
            "/api/tasks/{task_id}",
            get(api_get_task)
                .patch(api_update_task)
                .delete(api_delete_task),
        )
        .route("/api/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handle for a running server.
pub struct ServerHandle {
    /// Address the server is bound to.
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.join.await {
            tracing::error!("Server task failed: {}", e);
        }
    }
}

/// Start the HTTP server on the configured host and port.
///
/// Port 0 binds an ephemeral port; the bound address is in the handle.
pub async fn start_server(db: Arc<Database>, config: &Config) -> anyhow::Result<ServerHandle> {
    let state = TodoServer::new(db, config.tree.hide_completed);
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let bound_addr = listener.local_addr()?;

    info!("Task server listening on http://{}", bound_addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let join = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                info!("Task server shutting down");
            })
            .await
        {
            tracing::error!("Task server error: {}", e);
        }
    });

    Ok(ServerHandle {
        addr: bound_addr,
        shutdown_tx: Some(shutdown_tx),
        join,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy",
            version: "0.1.0",
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("0.1.0"));
    }

    #[test]
    fn patch_distinguishes_absent_from_null() {
        let patch: TaskPatch = serde_json::from_str(r#"{"title": "x"}"#).unwrap();
        assert!(patch.due_date.is_none());
        assert!(patch.recurrence.is_none());

        let patch: TaskPatch =
            serde_json::from_str(r#"{"dueDate": null, "recurrence": null}"#).unwrap();
        assert_eq!(patch.due_date, Some(None));
        assert_eq!(patch.recurrence, Some(None));

        let patch: TaskPatch = serde_json::from_str(
            r#"{"dueDate": "2024-06-01T00:00:00Z", "recurrence": {"interval": 2, "unit": "week"}}"#,
        )
        .unwrap();
        assert!(matches!(patch.due_date, Some(Some(_))));
        assert_eq!(
            patch.recurrence,
            Some(Some(Recurrence::new(2, crate::recurrence::RecurrenceUnit::Week)))
        );
    }

    #[test]
    fn hide_completed_flag_falls_back_to_default() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let state = TodoServer::new(db, true);
        assert!(state.hide_completed(None));
        assert!(state.hide_completed(Some("")));
        assert!(!state.hide_completed(Some("false")));
        assert!(state.hide_completed(Some("1")));
    }
}
