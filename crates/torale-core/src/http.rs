//! Thin axum surface over `TaskService` (spec.md §6 "TaskService port
//! (consumed by HTTP/CLI layer)"). Grounded in the teacher's health-check
//! handler shape (`main.rs::health_check`) and kurbezz's `routes::*::router()`
//! per-resource nesting.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Task, TaskFilter, TaskPatch};
use crate::error::CoreError;
use crate::task_service::{CreateTaskRequest, TaskService};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            CoreError::InvalidSchedule(_) | CoreError::InvalidNotifyBehavior(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::AlreadyExists(_) => StatusCode::CONFLICT,
            CoreError::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[derive(Deserialize)]
struct CreateTaskBody {
    user_id: String,
    name: String,
    schedule: String,
    search_query: String,
    condition_description: String,
    notify_behavior: String,
    #[serde(default)]
    config: std::collections::HashMap<String, serde_json::Value>,
}

async fn create_task(
    State(service): State<Arc<TaskService>>,
    Json(body): Json<CreateTaskBody>,
) -> Result<Json<Task>, CoreError> {
    let task = service
        .create_task(CreateTaskRequest {
            user_id: body.user_id,
            name: body.name,
            schedule: body.schedule,
            search_query: body.search_query,
            condition_description: body.condition_description,
            notify_behavior: body.notify_behavior,
            config: body.config,
        })
        .await?;
    Ok(Json(task))
}

#[derive(Deserialize)]
struct UserIdQuery {
    user_id: String,
}

async fn get_task(
    State(service): State<Arc<TaskService>>,
    Path(id): Path<Uuid>,
    Query(query): Query<UserIdQuery>,
) -> Result<Json<Task>, CoreError> {
    Ok(Json(service.get_task(id, &query.user_id).await?))
}

#[derive(Deserialize, Default)]
struct UpdateTaskBody {
    name: Option<String>,
    schedule: Option<String>,
    search_query: Option<String>,
    condition_description: Option<String>,
    notify_behavior: Option<String>,
    config: Option<std::collections::HashMap<String, serde_json::Value>>,
    is_active: Option<bool>,
}

async fn update_task(
    State(service): State<Arc<TaskService>>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateTaskBody>,
) -> Result<Json<Task>, CoreError> {
    let notify_behavior = body.notify_behavior.map(|s| s.parse()).transpose()?;
    let task = service
        .update_task(
            id,
            TaskPatch {
                name: body.name,
                schedule: body.schedule,
                search_query: body.search_query,
                condition_description: body.condition_description,
                notify_behavior,
                config: body.config,
                is_active: body.is_active,
            },
        )
        .await?;
    Ok(Json(task))
}

async fn delete_task(
    State(service): State<Arc<TaskService>>,
    Path(id): Path<Uuid>,
    Query(query): Query<UserIdQuery>,
) -> Result<StatusCode, CoreError> {
    service.delete_task(id, &query.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Default)]
struct ListTasksQuery {
    user_id: Option<String>,
    is_active: Option<bool>,
}

async fn list_tasks(
    State(service): State<Arc<TaskService>>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<Task>>, CoreError> {
    let tasks = service
        .list_tasks(TaskFilter {
            user_id: query.user_id,
            is_active: query.is_active,
        })
        .await?;
    Ok(Json(tasks))
}

#[derive(Deserialize, Default)]
struct RunTaskBody {
    #[serde(default)]
    suppress_notifications: bool,
}

#[derive(Serialize)]
struct RunTaskResponse {
    execution_id: Uuid,
}

async fn run_task(
    State(service): State<Arc<TaskService>>,
    Path(id): Path<Uuid>,
    Json(body): Json<RunTaskBody>,
) -> Result<Json<RunTaskResponse>, CoreError> {
    let execution_id = service.run_task(id, body.suppress_notifications).await?;
    Ok(Json(RunTaskResponse { execution_id }))
}

#[derive(Deserialize)]
struct ListExecutionsQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    50
}

async fn list_executions(
    State(service): State<Arc<TaskService>>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListExecutionsQuery>,
) -> Result<Json<Vec<crate::domain::Execution>>, CoreError> {
    Ok(Json(service.list_executions(id, query.limit).await?))
}

pub fn router(service: Arc<TaskService>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/tasks", post(create_task).get(list_tasks))
        .route("/tasks/{id}", get(get_task).patch(update_task).delete(delete_task))
        .route("/tasks/{id}/run", post(run_task))
        .route("/tasks/{id}/executions", get(list_executions))
        .with_state(service)
}
