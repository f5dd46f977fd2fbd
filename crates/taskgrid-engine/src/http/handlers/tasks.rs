//! Task submission and tracking handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use taskgrid_core::{TaskCommand, TaskId};
use tracing::info;

use crate::http::responses::{
    ApiError, CancelResponse, ProgressQuery, ProgressResponse, ResultResponse, SubmitTaskRequest,
    SubmitTaskResponse, TaskSummaryResponse,
};
use crate::http::{ApiState, Caller};

/// Submit a task on behalf of the caller.
pub async fn submit_task(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
    Json(req): Json<SubmitTaskRequest>,
) -> Result<(StatusCode, Json<SubmitTaskResponse>), ApiError> {
    let mut command = TaskCommand::new(req.task_type, caller).with_parameters(req.parameters);
    if let Some(id) = req.task_id {
        command = command.with_id(TaskId::new(id));
    }
    if let Some(target) = req.target {
        command = command.with_target(target);
    }
    if let Some(minutes) = req.max_queue_minutes {
        command.max_queue_minutes = minutes;
    }
    if let Some(minutes) = req.max_runtime_minutes {
        command = command.with_max_runtime_minutes(minutes);
    }
    if req.remote_only {
        command = command.remote_only();
    }
    command.email_alert = req.email_alert;

    let task_id = if req.remote || req.remote_only {
        state.tasks.submit_remote(command).await?
    } else {
        state.tasks.submit_local(command).await?
    };
    info!(task_id = %task_id, "Task accepted over HTTP");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitTaskResponse {
            task_id: task_id.into_inner(),
        }),
    ))
}

/// List every tracked task. Admins only.
pub async fn list_tasks(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
) -> Result<Json<Vec<TaskSummaryResponse>>, ApiError> {
    let tasks = state.progress.get_submitted_tasks(&caller).await?;
    Ok(Json(
        tasks
            .iter()
            .map(|t| TaskSummaryResponse::from_task(t))
            .collect(),
    ))
}

pub async fn get_task(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskSummaryResponse>, ApiError> {
    let task = state.progress.get_task(&TaskId::new(id)).await?;
    Ok(Json(TaskSummaryResponse::from_task(&task)))
}

/// Progress entries from `?offset=` on.
pub async fn get_progress(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Query(query): Query<ProgressQuery>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let task_id = TaskId::new(id);
    let task = state.progress.get_task(&task_id).await?;
    // read the state first so a terminal state implies the entries are complete
    let task_state = task.status();
    let entries = state
        .progress
        .get_progress_status(&task_id, query.offset)
        .await?;
    Ok(Json(ProgressResponse {
        task_id: task_id.into_inner(),
        state: task_state,
        offset: query.offset,
        next_offset: query.offset + entries.len(),
        entries,
    }))
}

/// Full outcome, failures included. 409 while the task is still live.
pub async fn get_result(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<ResultResponse>, ApiError> {
    let task_id = TaskId::new(id);
    let task = state.progress.get_task(&task_id).await?;
    let result = state.progress.get_result(&task_id).await?;
    Ok(Json(ResultResponse::new(task.status(), result)))
}

/// Bare answer of a finished task; failed or cancelled tasks are errors.
pub async fn check_result(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let answer = state.progress.check_result(&TaskId::new(id)).await?;
    Ok(Json(answer.unwrap_or(serde_json::Value::Null)))
}

pub async fn cancel_task(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let task_id = TaskId::new(id);
    // unknown ids are a 404 rather than a quiet `false`
    state.progress.get_task(&task_id).await?;
    let cancelled = state.progress.cancel_job(&caller, &task_id).await;
    Ok(Json(CancelResponse {
        task_id: task_id.into_inner(),
        cancelled,
    }))
}

pub async fn add_email_alert(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .progress
        .add_email_alert(&caller, &TaskId::new(id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
